#[cfg(test)]
mod tests {
    use crate::scan::{
        ColumnSink, FromRow, FromSql, Json, MapRow, RowCells, RowShape, ScanError, ScanPlan,
    };
    use crate::sql_row;
    use crate::value::{SqlValue, ZERO_DATE, ZERO_TIME};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use time::macros::{date, datetime};
    use time::{Date, OffsetDateTime};

    #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Meta {
        tags: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Audit {
        created: Date,
    }

    sql_row! {
        impl Audit {
            created: col("created_at"),
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
        name: Option<String>,
        meta: Meta,
        audit: Audit,
        scratch: i64,
    }

    sql_row! {
        impl Row {
            id: col("ID"),
            name: col,
            meta: json("meta"),
            audit: flatten(Audit),
            scratch: skip,
        }
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn scan<T: FromRow>(cols: &[&str], values: Vec<SqlValue>) -> Result<T, ScanError> {
        let plan = ScanPlan::new(&columns(cols), T::shape()?, false)?;
        T::from_row(plan.cells(values)?)
    }

    #[test]
    fn integers_from_various_driver_values() {
        assert_eq!(i64::from_sql(SqlValue::U64(5)).unwrap(), 5);
        assert_eq!(u8::from_sql(SqlValue::from("42")).unwrap(), 42);
        assert_eq!(i32::from_sql(SqlValue::Bytes(b"-7".to_vec())).unwrap(), -7);
        assert_eq!(i16::from_sql(SqlValue::Bool(true)).unwrap(), 1);
        assert_eq!(
            i64::from_sql(SqlValue::Decimal(Decimal::new(300, 2))).unwrap(),
            3
        );
        assert_eq!(
            u8::from_sql(SqlValue::I64(300)),
            Err(ScanError::Overflow { to: "u8" })
        );
        assert!(matches!(
            i64::from_sql(SqlValue::from("x")),
            Err(ScanError::Parse { to: "i64", .. })
        ));
    }

    #[test]
    fn null_becomes_zero_value_except_option() {
        assert_eq!(i64::from_opt(Some(SqlValue::Null)).unwrap(), 0);
        assert_eq!(String::from_opt(None).unwrap(), "");
        assert_eq!(OffsetDateTime::from_opt(None).unwrap(), ZERO_TIME);
        assert_eq!(Date::from_opt(None).unwrap(), ZERO_DATE);
        assert_eq!(Option::<i64>::from_opt(Some(SqlValue::Null)).unwrap(), None);
        assert_eq!(
            Option::<i64>::from_opt(Some(SqlValue::I64(3))).unwrap(),
            Some(3)
        );
    }

    #[test]
    fn booleans_and_strings() {
        assert!(bool::from_sql(SqlValue::from("1")).unwrap());
        assert!(!bool::from_sql(SqlValue::from("FALSE")).unwrap());
        assert!(bool::from_sql(SqlValue::I64(2)).unwrap());
        assert_eq!(String::from_sql(SqlValue::I64(12)).unwrap(), "12");
        assert_eq!(String::from_sql(SqlValue::Bytes(b"ab".to_vec())).unwrap(), "ab");
    }

    #[test]
    fn timestamps_from_text() {
        assert_eq!(
            OffsetDateTime::from_sql(SqlValue::from("2024-05-06 07:08:09.5")).unwrap(),
            datetime!(2024-05-06 07:08:09.5 UTC)
        );
        assert_eq!(
            OffsetDateTime::from_sql(SqlValue::from("2024-05-06")).unwrap(),
            datetime!(2024-05-06 00:00:00 UTC)
        );
        assert_eq!(
            OffsetDateTime::from_sql(SqlValue::from("0000-00-00 00:00:00")).unwrap(),
            ZERO_TIME
        );
        assert_eq!(
            Date::from_sql(SqlValue::from("2024-05-06 10:00:00")).unwrap(),
            date!(2024-05-06)
        );
    }

    #[test]
    fn rfc3339_keeps_time_of_day() {
        assert_eq!(
            OffsetDateTime::from_sql(SqlValue::from("2024-01-02T03:04:05Z")).unwrap(),
            datetime!(2024-01-02 03:04:05 UTC)
        );
        assert_eq!(
            OffsetDateTime::from_sql(SqlValue::from("2024-01-02T03:04:05+02:00")).unwrap(),
            datetime!(2024-01-02 01:04:05 UTC)
        );
        assert_eq!(
            OffsetDateTime::from_sql(SqlValue::from("2024-01-02T03:04:05")).unwrap(),
            datetime!(2024-01-02 03:04:05 UTC)
        );
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(matches!(
            OffsetDateTime::from_sql(SqlValue::from("2024-01-02 not a time")),
            Err(ScanError::Parse { to: "datetime", .. })
        ));
        assert!(matches!(
            Date::from_sql(SqlValue::from("2024-01-02xyz")),
            Err(ScanError::Parse { to: "date", .. })
        ));
        assert!(matches!(
            OffsetDateTime::from_sql(SqlValue::from("2024-13-02")),
            Err(ScanError::Parse { .. })
        ));
    }

    #[test]
    fn json_wrapper() {
        let v = Json::<Vec<i64>>::from_sql(SqlValue::Json("[1,2]".into())).unwrap();
        assert_eq!(v.into_inner(), vec![1, 2]);
        let empty = Json::<Vec<i64>>::from_sql(SqlValue::Bytes(Vec::new())).unwrap();
        assert_eq!(empty.0, Vec::<i64>::new());
        assert!(matches!(
            Json::<Vec<i64>>::from_sql(SqlValue::from("nope")),
            Err(ScanError::Json(_))
        ));
    }

    #[test]
    fn struct_rows_match_columns_case_insensitively() {
        let got: Row = scan(
            &["name", "id", "META", "created_at", "unknown"],
            vec![
                SqlValue::from("n"),
                SqlValue::I64(7),
                SqlValue::Json(r#"{"tags":["a"]}"#.into()),
                SqlValue::from("2024-01-02"),
                SqlValue::I64(1),
            ],
        )
        .unwrap();
        assert_eq!(
            got,
            Row {
                id: 7,
                name: Some("n".into()),
                meta: Meta {
                    tags: vec!["a".into()]
                },
                audit: Audit {
                    created: date!(2024-01-02)
                },
                scratch: 0,
            }
        );
    }

    #[test]
    fn missing_struct_columns_keep_zero_values() {
        let got: Row = scan(&["id"], vec![SqlValue::I64(1)]).unwrap();
        assert_eq!(got.name, None);
        assert_eq!(got.meta, Meta::default());
        assert_eq!(got.audit.created, ZERO_DATE);
    }

    #[test]
    fn field_errors_name_the_field() {
        let err = scan::<Row>(&["id"], vec![SqlValue::from("abc")]).unwrap_err();
        assert!(matches!(err, ScanError::Field { field: "id", .. }));
    }

    #[test]
    fn plan_sinks() {
        let RowShape::Struct(fields) = Row::shape().unwrap() else {
            panic!("struct shape expected");
        };
        let plan = ScanPlan::new(
            &columns(&["id", "meta", "scratch", "other"]),
            RowShape::Struct(fields),
            false,
        )
        .unwrap();
        assert_eq!(
            plan.sinks(),
            &[
                ColumnSink::Field(0),
                ColumnSink::Json(2),
                ColumnSink::Discard,
                ColumnSink::Discard,
            ]
        );
    }

    #[test]
    fn map_rows_keep_column_case() {
        let got: MapRow = scan(&["Id", "name"], vec![SqlValue::I64(1), SqlValue::Null]).unwrap();
        let mut want = BTreeMap::new();
        want.insert("Id".to_string(), SqlValue::I64(1));
        want.insert("name".to_string(), SqlValue::Null);
        assert_eq!(got.into_inner(), want);
    }

    #[test]
    fn scalar_rows() {
        assert_eq!(scan::<String>(&["n"], vec![SqlValue::from("x")]).unwrap(), "x");
        assert_eq!(
            scan::<Option<i64>>(&["n"], vec![SqlValue::Null]).unwrap(),
            None
        );
        assert_eq!(
            scan::<i64>(&["a", "b"], vec![SqlValue::I64(1), SqlValue::I64(2)]).unwrap_err(),
            ScanError::ColumnCount {
                expected: 1,
                got: 2
            }
        );
    }

    #[test]
    fn row_width_must_match_columns() {
        let plan = ScanPlan::new(&columns(&["a"]), RowShape::Scalar, false).unwrap();
        assert!(matches!(
            plan.cells(vec![]),
            Err(ScanError::ColumnCount { expected: 1, got: 0 })
        ));
        assert!(matches!(
            plan.cells(vec![SqlValue::I64(1)]),
            Ok(RowCells::Scalar(SqlValue::I64(1)))
        ));
    }
}
