#[cfg(test)]
mod tests {
    use crate::context::Context;
    use crate::error::Error;
    use crate::insert::{
        ChunkInfo, ChunkState, Chunker, InsertTarget, Source, parse_insert_target,
    };
    use crate::mock::{MockDriver, MockReply, test_config};
    use crate::params::Params;
    use crate::sql_row;
    use crate::value::SqlValue;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, Default)]
    struct Person {
        id: i64,
        name: String,
        cache: String,
    }

    sql_row! {
        impl Person {
            id: col("id"),
            name: col("name"),
            cache: skip,
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Counter {
        a: i64,
    }

    sql_row! {
        impl Counter {
            a: col("a,defaultzero"),
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Note {
        id: i64,
        body: String,
    }

    sql_row! {
        impl Note {
            id: col("id"),
            body: col("body,omitempty"),
        }
    }

    fn counting_mock() -> MockDriver {
        MockDriver::new(|q: &str| MockReply::affected(q.matches("),(").count() as u64 + 1))
    }

    fn row(pairs: &[(&str, SqlValue)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn single_struct_insert() {
        let mock = counting_mock();
        let db = mock.database();
        let res = db
            .insert(
                &Context::background(),
                "people",
                Source::one(Person {
                    id: 1,
                    name: "Alice".into(),
                    cache: "ignored".into(),
                }),
            )
            .await
            .unwrap();
        assert_eq!(res.rows_affected, 1);
        assert_eq!(
            mock.statements(),
            vec![
                "insert into`people`(`id`,`name`)values(1,_utf8mb4 0x416c696365 collate utf8mb4_unicode_ci)"
            ]
        );
    }

    #[tokio::test]
    async fn defaultzero_on_insert() {
        let mock = counting_mock();
        let db = mock.database();
        let ctx = Context::background();
        db.insert(&ctx, "t", Source::one(Counter { a: 0 }))
            .await
            .unwrap();
        db.insert(&ctx, "t", Source::one(Counter { a: 1 }))
            .await
            .unwrap();
        assert_eq!(
            mock.statements(),
            vec![
                "insert into`t`(`a`)values(default(`a`))",
                "insert into`t`(`a`)values(1)"
            ]
        );
    }

    #[tokio::test]
    async fn omitempty_emits_default() {
        let mock = counting_mock();
        let db = mock.database();
        db.insert(
            &Context::background(),
            "notes",
            vec![
                Note {
                    id: 1,
                    body: String::new(),
                },
                Note {
                    id: 2,
                    body: "x".into(),
                },
            ],
        )
        .await
        .unwrap();
        assert_eq!(
            mock.statements(),
            vec![
                "insert into`notes`(`id`,`body`)values(1,default),(2,_utf8mb4 0x78 collate utf8mb4_unicode_ci)"
            ]
        );
    }

    #[tokio::test]
    async fn map_rows_fill_missing_keys_with_default() {
        let mock = counting_mock();
        let db = mock.database();
        let res = db
            .insert(
                &Context::background(),
                "db.t",
                vec![
                    row(&[("a", SqlValue::I64(1)), ("b", SqlValue::I64(2))]),
                    row(&[("a", SqlValue::I64(3))]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(res.rows_affected, 2);
        assert_eq!(
            mock.statements(),
            vec!["insert into`db`.`t`(`a`,`b`)values(1,2),(3,default)"]
        );
    }

    #[tokio::test]
    async fn lists_are_inserted_as_json() {
        let mock = counting_mock();
        let db = mock.database();
        db.insert(
            &Context::background(),
            "t",
            Source::one(row(&[("tags", SqlValue::from(vec!["a", "b"]))])),
        )
        .await
        .unwrap();
        assert_eq!(
            mock.statements(),
            vec!["insert into`t`(`tags`)values(_utf8mb4 0x5b2261222c2262225d collate utf8mb4_unicode_ci)"]
        );
    }

    #[tokio::test]
    async fn positional_rows() {
        let mock = counting_mock();
        let db = mock.database();
        db.insert(
            &Context::background(),
            "insert into t (a, b) values",
            vec![
                vec![SqlValue::I64(1), SqlValue::I64(2)],
                vec![SqlValue::I64(3)],
            ],
        )
        .await
        .unwrap();
        assert_eq!(
            mock.statements(),
            vec!["insert into t (a, b)values(1,2),(3,default)"]
        );
    }

    #[tokio::test]
    async fn explicit_columns_pick_struct_fields() {
        let mock = counting_mock();
        let db = mock.database();
        db.insert(
            &Context::background(),
            "insert ignore into people(`name`)",
            Source::one(Person {
                id: 9,
                name: "x".into(),
                cache: String::new(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            mock.statements(),
            vec!["insert ignore into people(`name`)values(_utf8mb4 0x78 collate utf8mb4_unicode_ci)"]
        );
    }

    #[tokio::test]
    async fn bare_insert_fragment_derives_columns() {
        let mock = counting_mock();
        let db = mock.database();
        db.insert(
            &Context::background(),
            "INSERT IGNORE INTO t VALUES",
            Source::one(row(&[("a", SqlValue::I64(1))])),
        )
        .await
        .unwrap();
        assert_eq!(
            mock.statements(),
            vec!["INSERT IGNORE INTO t(`a`)values(1)"]
        );
    }

    #[tokio::test]
    async fn empty_source_executes_nothing() {
        let mock = counting_mock();
        let db = mock.database();
        let res = db
            .insert(&Context::background(), "t", Vec::<Params>::new())
            .await
            .unwrap();
        assert_eq!(res.rows_affected, 0);
        assert!(mock.statements().is_empty());
    }

    #[tokio::test]
    async fn rows_without_columns_are_rejected() {
        let mock = counting_mock();
        let db = mock.database();
        let err = db
            .insert(&Context::background(), "t", Source::one(Params::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoColumns));
    }

    #[tokio::test]
    async fn channel_source() {
        let mock = counting_mock();
        let db = mock.database();
        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move {
            for id in 1..=3_i64 {
                tx.send(row(&[("id", SqlValue::I64(id))])).await.unwrap();
            }
        });
        let res = db.insert(&Context::background(), "t", rx).await.unwrap();
        assert_eq!(res.rows_affected, 3);
        assert_eq!(
            mock.statements(),
            vec!["insert into`t`(`id`)values(1),(2),(3)"]
        );
    }

    #[tokio::test]
    async fn chunks_by_packet_budget_and_fires_hooks() {
        let mock = counting_mock();
        let db = mock
            .builder()
            .config(test_config().max_allowed_packet(50))
            .build();
        let rows: Vec<Params> = (1..=7_i64)
            .map(|id| row(&[("id", SqlValue::I64(id))]))
            .collect();

        let mut seen_rows = Vec::new();
        let mut before = Vec::new();
        let mut after = Vec::new();
        let res = db
            .inserter()
            .on_row(|r| seen_rows.push(r.index))
            .before_chunk(|c| before.push(c))
            .after_chunk(|c, r| after.push((c.index, r.rows_affected)))
            .insert(&Context::background(), "t", rows)
            .await
            .unwrap();

        assert_eq!(res.rows_affected, 7);
        assert_eq!(
            mock.statements(),
            vec![
                "insert into`t`(`id`)values(1),(2),(3)",
                "insert into`t`(`id`)values(4),(5),(6)",
                "insert into`t`(`id`)values(7)",
            ]
        );
        assert_eq!(seen_rows, (0..7).collect::<Vec<_>>());
        assert_eq!(
            before,
            vec![
                ChunkInfo {
                    index: 0,
                    rows: 3,
                    bytes: 37
                },
                ChunkInfo {
                    index: 1,
                    rows: 3,
                    bytes: 37
                },
                ChunkInfo {
                    index: 2,
                    rows: 1,
                    bytes: 29
                },
            ]
        );
        assert_eq!(after, vec![(0, 3), (1, 3), (2, 1)]);
    }

    #[test]
    fn chunker_states() {
        let header = "insert into`t`(`id`)values".to_string();
        let mut c = Chunker::new(header, 50);
        assert_eq!(c.state(), ChunkState::Empty);
        assert_eq!(c.push("(1)"), None);
        assert_eq!(c.state(), ChunkState::HasRows);
        assert_eq!(c.push("(2)"), None);
        assert_eq!(c.push("(3)"), None);
        let flushed = c.push("(4)").unwrap();
        assert_eq!(flushed.rows, 3);
        assert!(flushed.sql.len() <= 50);
        assert_eq!(c.state(), ChunkState::HasRows);
        let last = c.finish().unwrap();
        assert_eq!(last.sql, "insert into`t`(`id`)values(4)");
        assert_eq!(c.state(), ChunkState::Flushed);
        assert_eq!(c.finish(), None);
    }

    #[test]
    fn oversized_single_row_is_sent_alone() {
        let mut c = Chunker::new("h".to_string(), 10);
        assert_eq!(c.push("(0123456789)"), None);
        let first = c.push("(1)").unwrap();
        assert_eq!(first.sql, "h(0123456789)");
        assert_eq!(first.rows, 1);
    }

    #[test]
    fn insert_targets() {
        assert_eq!(
            parse_insert_target("people"),
            InsertTarget {
                head: "insert into`people`".into(),
                columns: None
            }
        );
        assert_eq!(
            parse_insert_target(" db.people "),
            InsertTarget {
                head: "insert into`db`.`people`".into(),
                columns: None
            }
        );
        assert_eq!(
            parse_insert_target("`odd name`"),
            InsertTarget {
                head: "insert into`odd name`".into(),
                columns: None
            }
        );
        assert_eq!(
            parse_insert_target("insert into t (`a`, b) values"),
            InsertTarget {
                head: "insert into t (`a`, b)".into(),
                columns: Some(vec!["a".into(), "b".into()])
            }
        );
        assert_eq!(
            parse_insert_target("replace into t values"),
            InsertTarget {
                head: "replace into t".into(),
                columns: None
            }
        );
    }
}
