//! 离线写文件驱动：每条语句写成 `<dir>/<序号>.sql.gz`，不连接数据库。

use crate::context::Context;
use crate::driver::{Driver, DriverError, DriverTx, ExecResult, Queryer, Rows};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct WriterState {
    dir: PathBuf,
    next: AtomicU64,
}

impl WriterState {
    fn write(&self, n: u64, statement: &str) -> io::Result<PathBuf> {
        let path = self.dir.join(format!("{n:08}.sql.gz"));
        let mut enc = GzEncoder::new(File::create(&path)?, Compression::default());
        enc.write_all(statement.as_bytes())?;
        enc.write_all(b";\n")?;
        enc.finish()?.sync_all()?;
        tracing::debug!(path = %path.display(), bytes = statement.len(), "wrote statement");
        Ok(path)
    }
}

/// 把执行的语句依次写成 gzip 文件。查询一律拒绝。
#[derive(Debug, Clone)]
pub struct SqlFileWriter {
    state: Arc<WriterState>,
}

impl SqlFileWriter {
    /// 目录不存在时创建。
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            state: Arc::new(WriterState {
                dir,
                next: AtomicU64::new(0),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.state.dir
    }

    /// 同步写一条语句，返回文件路径。
    pub fn write_statement(&self, statement: &str) -> io::Result<PathBuf> {
        let n = self.state.next.fetch_add(1, Ordering::SeqCst);
        self.state.write(n, statement)
    }

    /// 序号在提交前分配，文件写入放到阻塞线程池。
    async fn exec_statement(&self, statement: &str) -> Result<ExecResult, DriverError> {
        let state = Arc::clone(&self.state);
        let n = state.next.fetch_add(1, Ordering::SeqCst);
        let statement = statement.to_string();
        tokio::task::spawn_blocking(move || state.write(n, &statement))
            .await
            .map_err(|e| DriverError::Other(format!("sql file writer task: {e}")))?
            .map(|_| ExecResult::default())
            .map_err(|e| DriverError::Other(format!("sql file writer: {e}")))
    }
}

fn reject_query() -> DriverError {
    DriverError::Other("sql file writer does not support queries".to_string())
}

#[async_trait]
impl Queryer for SqlFileWriter {
    async fn query(&self, _ctx: &Context, _query: &str) -> Result<Box<dyn Rows>, DriverError> {
        Err(reject_query())
    }

    async fn exec(&self, _ctx: &Context, query: &str) -> Result<ExecResult, DriverError> {
        self.exec_statement(query).await
    }
}

#[async_trait]
impl Driver for SqlFileWriter {
    async fn begin(&self, _ctx: &Context) -> Result<Box<dyn DriverTx>, DriverError> {
        Ok(Box::new(FileTx {
            writer: self.clone(),
        }))
    }

    async fn ping(&self, _ctx: &Context) -> Result<(), DriverError> {
        Ok(())
    }
}

/// 直通事务：语句照常写文件，提交与回滚都是空操作。
#[derive(Debug)]
struct FileTx {
    writer: SqlFileWriter,
}

#[async_trait]
impl Queryer for FileTx {
    async fn query(&self, _ctx: &Context, _query: &str) -> Result<Box<dyn Rows>, DriverError> {
        Err(reject_query())
    }

    async fn exec(&self, _ctx: &Context, query: &str) -> Result<ExecResult, DriverError> {
        self.writer.exec_statement(query).await
    }
}

#[async_trait]
impl DriverTx for FileTx {
    async fn commit(&self, _ctx: &Context) -> Result<(), DriverError> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &Context) -> Result<(), DriverError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqlFileWriter;
    use crate::context::Context;
    use crate::db::Database;
    use crate::insert::Source;
    use crate::params;
    use crate::params::Params;
    use crate::value::SqlValue;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use std::path::Path;
    use std::time::Duration;

    fn read_gz(path: &Path) -> String {
        let mut s = String::new();
        GzDecoder::new(std::fs::File::open(path).unwrap())
            .read_to_string(&mut s)
            .unwrap();
        s
    }

    #[test]
    fn files_are_numbered_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let w = SqlFileWriter::new(dir.path().join("out")).unwrap();
        let a = w.write_statement("create table t(a int)").unwrap();
        let b = w.write_statement("insert into t values(1)").unwrap();
        assert_eq!(a.file_name().unwrap(), "00000000.sql.gz");
        assert_eq!(b.file_name().unwrap(), "00000001.sql.gz");
        assert_eq!(read_gz(&a), "create table t(a int);\n");
        assert_eq!(read_gz(&b), "insert into t values(1);\n");
    }

    #[tokio::test]
    async fn database_writes_inserts_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::file_writer(dir.path()).unwrap();
        let ctx = Context::background();

        let mut row = Params::new();
        row.insert("id".to_string(), SqlValue::I64(1));
        db.insert(&ctx, "t", Source::one(row)).await.unwrap();
        db.exec(&ctx, "delete from t where id=@@id", &[params! { "id" => 2 }])
            .await
            .unwrap();

        assert_eq!(
            read_gz(&dir.path().join("00000000.sql.gz")),
            "insert into`t`(`id`)values(1);\n"
        );
        assert_eq!(
            read_gz(&dir.path().join("00000001.sql.gz")),
            "delete from t where id=2;\n"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_execs_get_distinct_files() {
        use crate::driver::Queryer;

        let dir = tempfile::tempdir().unwrap();
        let w = SqlFileWriter::new(dir.path()).unwrap();
        let ctx = Context::background();
        let (a, b, c) = tokio::join!(
            w.exec(&ctx, "select 1"),
            w.exec(&ctx, "select 2"),
            w.exec(&ctx, "select 3"),
        );
        for r in [a, b, c] {
            r.unwrap();
        }
        let mut got: Vec<String> = (0..3)
            .map(|i| read_gz(&dir.path().join(format!("{i:08}.sql.gz"))))
            .collect();
        got.sort();
        assert_eq!(got, vec!["select 1;\n", "select 2;\n", "select 3;\n"]);
    }

    #[tokio::test]
    async fn queries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::file_writer(dir.path()).unwrap();
        let err = db
            .exists(&Context::background(), "select 1", Duration::ZERO, &[])
            .await
            .unwrap_err();
        assert!(err.driver_error().is_some());
    }
}
