//! 结果缓存：后端契约、进程内实现与多级缓存。
//!
//! 缓存内容是 msgpack 编码的原始结果行（列名 + 驱动值），
//! 以保留字节串与字符串的区别。

use crate::value::SqlValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// 键不存在（不是错误，只是未命中）。
    #[error("cache miss")]
    Miss,
    #[error("cache backend: {0}")]
    Backend(String),
    #[error("cache codec: {0}")]
    Codec(String),
}

/// 单飞锁；drop 时释放。
pub struct CacheGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CacheGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// 不持有任何资源的锁。
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for CacheGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for CacheGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// 获取单飞锁；已被他人持有时返回 `None`。默认不加锁。
    async fn lock(&self, _key: &str, _ttl: Duration) -> Result<Option<CacheGuard>, CacheError> {
        Ok(Some(CacheGuard::noop()))
    }
}

/// 缓存错误处理：返回 `Ok(())` 表示吞掉（按未命中处理），返回 `Err` 表示上抛。
pub type CacheErrorHandler = Arc<dyn Fn(CacheError) -> Result<(), CacheError> + Send + Sync>;

/// 默认处理：全部上抛。
pub fn surface_cache_errors() -> CacheErrorHandler {
    Arc::new(|err: CacheError| -> Result<(), CacheError> { Err(err) })
}

/// 吞掉所有缓存错误（只记录日志）。
pub fn ignore_cache_errors() -> CacheErrorHandler {
    Arc::new(|err: CacheError| -> Result<(), CacheError> {
        tracing::warn!(error = %err, "ignoring cache error");
        Ok(())
    })
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, (Vec<u8>, Instant)>,
    locks: HashSet<String>,
    next_sweep: Option<Instant>,
}

/// 写入时清理过期条目的最小间隔。
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// 进程内 TTL 缓存，带单飞锁。
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.entries.values().filter(|(_, exp)| *exp > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 包括尚未清理的过期条目在内的条目数。
    #[cfg(test)]
    pub(crate) fn held(&self) -> usize {
        let st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.entries.len()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let hit = st
            .entries
            .get(key)
            .map(|(v, exp)| (*exp > now).then(|| v.clone()));
        match hit {
            Some(Some(v)) => Ok(v),
            Some(None) => {
                st.entries.remove(key);
                Err(CacheError::Miss)
            }
            None => Err(CacheError::Miss),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if st.next_sweep.is_none_or(|at| now >= at) {
            st.entries.retain(|_, (_, exp)| *exp > now);
            st.next_sweep = Some(now + SWEEP_INTERVAL);
        }
        st.entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn lock(&self, key: &str, _ttl: Duration) -> Result<Option<CacheGuard>, CacheError> {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !st.locks.insert(key.to_string()) {
            return Ok(None);
        }
        let state = Arc::clone(&self.state);
        let key = key.to_string();
        Ok(Some(CacheGuard::new(move || {
            let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
            st.locks.remove(&key);
        })))
    }
}

/// 多级缓存：按顺序读取，命中后回填前面的层；写入所有层；锁由最后一层提供。
#[derive(Clone)]
pub struct MultiCache {
    tiers: Vec<Arc<dyn Cache>>,
    backfill_ttl: Duration,
}

impl MultiCache {
    pub fn new(tiers: Vec<Arc<dyn Cache>>) -> Self {
        Self {
            tiers,
            backfill_ttl: Duration::from_secs(60),
        }
    }

    /// 回填前面各层时使用的 TTL（后端不回传剩余 TTL）。
    pub fn backfill_ttl(mut self, ttl: Duration) -> Self {
        self.backfill_ttl = ttl;
        self
    }
}

impl std::fmt::Debug for MultiCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiCache")
            .field("tiers", &self.tiers.len())
            .field("backfill_ttl", &self.backfill_ttl)
            .finish()
    }
}

#[async_trait]
impl Cache for MultiCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        for (i, tier) in self.tiers.iter().enumerate() {
            match tier.get(key).await {
                Ok(v) => {
                    for earlier in &self.tiers[..i] {
                        earlier.set(key, v.clone(), self.backfill_ttl).await?;
                    }
                    return Ok(v);
                }
                Err(CacheError::Miss) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CacheError::Miss)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        for tier in &self.tiers {
            tier.set(key, value.clone(), ttl).await?;
        }
        Ok(())
    }

    async fn lock(&self, key: &str, ttl: Duration) -> Result<Option<CacheGuard>, CacheError> {
        match self.tiers.last() {
            Some(tier) => tier.lock(key, ttl).await,
            None => Ok(Some(CacheGuard::noop())),
        }
    }
}

/// 缓存的结果集。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct CachedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl CachedRows {
    pub(crate) fn encode(&self) -> Result<Vec<u8>, CacheError> {
        rmp_serde::to_vec(self).map_err(|e| CacheError::Codec(e.to_string()))
    }

    pub(crate) fn decode(raw: &[u8]) -> Result<Self, CacheError> {
        rmp_serde::from_slice(raw).map_err(|e| CacheError::Codec(e.to_string()))
    }
}

/// 行缓存键：目标类型、内联查询与 TTL 的 xxh3-128 十六进制摘要。
pub fn row_cache_key(type_name: &str, query: &str, ttl: Duration) -> String {
    let mut buf = Vec::with_capacity(type_name.len() + query.len() + 24);
    buf.extend_from_slice(type_name.as_bytes());
    buf.push(0);
    buf.extend_from_slice(query.as_bytes());
    buf.push(0);
    buf.extend_from_slice(&ttl.as_nanos().to_le_bytes());
    format!("{:032x}", xxhash_rust::xxh3::xxh3_128(&buf))
}

/// 存在性检查的缓存键。
pub fn exists_cache_key(query: &str, ttl: Duration) -> String {
    format!("exists:{query}:{ttl:?}")
}
