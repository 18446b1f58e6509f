#[cfg(test)]
mod tests {
    use crate::marshal::{MarshalError, MarshalOpts, marshal, to_json};
    use crate::value::{SqlValue, ZERO_DATE, ZERO_TIME};
    use crate::valuer::{CustomValue, SqlValuer, ValuerError, ValuerFuncs};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use time::macros::{date, datetime};

    fn m(v: impl Into<SqlValue>) -> String {
        marshal(&v.into(), MarshalOpts::NONE, "", &ValuerFuncs::new()).unwrap()
    }

    fn mo(v: impl Into<SqlValue>, opts: MarshalOpts, field: &str) -> String {
        marshal(&v.into(), opts, field, &ValuerFuncs::new()).unwrap()
    }

    #[test]
    fn primitives() {
        assert_eq!(m(true), "1");
        assert_eq!(m(false), "0");
        assert_eq!(m(-42_i32), "-42");
        assert_eq!(m(u64::MAX), "18446744073709551615");
        assert_eq!(m(()), "null");
        assert_eq!(m(None::<i64>), "null");
    }

    #[test]
    fn floats_use_upper_scientific_form() {
        assert_eq!(m(1.5_f64), "1.5E+00");
        assert_eq!(m(0.0_f64), "0E+00");
        assert_eq!(m(1_000_000.0_f64), "1E+06");
        assert_eq!(m(-0.000125_f64), "-1.25E-04");
        assert_eq!(m(1e100_f64), "1E+100");
        assert_eq!(m(0.1_f32), "1E-01");
    }

    #[test]
    fn non_finite_float_is_rejected() {
        let err = marshal(
            &SqlValue::F64(f64::NAN),
            MarshalOpts::NONE,
            "",
            &ValuerFuncs::new(),
        )
        .unwrap_err();
        assert!(matches!(err, MarshalError::NonFinite(_)));
    }

    #[test]
    fn large_float_still_encodes() {
        assert_eq!(m(2f64.powi(60)), "1.152921504606847E+18");
    }

    #[test]
    fn strings_are_hex_encoded() {
        assert_eq!(
            m("hello"),
            "_utf8mb4 0x68656c6c6f collate utf8mb4_unicode_ci"
        );
        assert_eq!(m(""), "''");
        assert_eq!(
            m("it's"),
            "_utf8mb4 0x69742773 collate utf8mb4_unicode_ci"
        );
        assert_eq!(
            m(SqlValue::Json(r#"{"a":1}"#.to_string())),
            "_utf8mb4 0x7b2261223a317d collate utf8mb4_unicode_ci"
        );
    }

    #[test]
    fn bytes() {
        assert_eq!(m(vec![0xde_u8, 0xad, 0xbe, 0xef]), "0xdeadbeef");
        assert_eq!(m(Vec::<u8>::new()), "''");
        assert_eq!(m(None::<Vec<u8>>), "null");
    }

    #[test]
    fn timestamps_are_converted_to_utc() {
        let t = datetime!(2024-03-05 10:11:12.123456789 +02:00);
        assert_eq!(
            m(t),
            "convert_tz('2024-03-05 08:11:12.123456','UTC',@@session.time_zone)"
        );
        assert_eq!(m(ZERO_TIME), "null");
    }

    #[test]
    fn dates() {
        assert_eq!(m(date!(2024-02-29)), "'2024-02-29'");
        assert_eq!(m(ZERO_DATE), "null");
    }

    #[test]
    fn decimal_and_raw() {
        assert_eq!(m(Decimal::from_str("12.50").unwrap()), "12.50");
        assert_eq!(m(SqlValue::raw("now()")), "now()");
    }

    #[test]
    fn lists() {
        let list = SqlValue::list([1_i64, 2, 3]);
        assert_eq!(mo(list.clone(), MarshalOpts::NONE, ""), "1,2,3");
        assert_eq!(
            mo(list.clone(), MarshalOpts::WRAP_SLICE_WITH_PARENS, ""),
            "(1,2,3)"
        );
        assert_eq!(
            mo(list, MarshalOpts::JSON_SLICE, ""),
            "_utf8mb4 0x5b312c322c335d collate utf8mb4_unicode_ci"
        );
        let empty = SqlValue::List(Vec::new());
        assert_eq!(mo(empty.clone(), MarshalOpts::NONE, ""), "null");
        assert_eq!(
            mo(empty, MarshalOpts::WRAP_SLICE_WITH_PARENS, ""),
            "(null)"
        );
    }

    #[test]
    fn default_on_zero() {
        let opts = MarshalOpts::DEFAULT_ON_ZERO;
        assert_eq!(mo(0_i64, opts, "a"), "default(`a`)");
        assert_eq!(mo(0_i64, opts, ""), "default");
        assert_eq!(mo(1_i64, opts, "a"), "1");
        assert_eq!(mo("", opts, "name"), "default(`name`)");
    }

    #[test]
    fn default_on_zero_does_not_reach_list_items() {
        let opts = MarshalOpts::DEFAULT_ON_ZERO;
        assert_eq!(mo(SqlValue::list([0_i64, 1]), opts, "a"), "0,1");
    }

    #[derive(Debug, Clone)]
    struct Zero;

    impl SqlValuer for Zero {
        fn value(&self) -> Result<SqlValue, ValuerError> {
            Ok(SqlValue::I64(0))
        }
    }

    #[test]
    fn default_on_zero_does_not_reach_valuer_result() {
        let v = SqlValue::Valuer(Box::new(Zero));
        assert_eq!(mo(v, MarshalOpts::DEFAULT_ON_ZERO, "a"), "0");
    }

    #[derive(Debug, Clone)]
    struct Failing;

    impl SqlValuer for Failing {
        fn value(&self) -> Result<SqlValue, ValuerError> {
            Err(ValuerError("boom".into()))
        }
    }

    #[test]
    fn valuer_error_surfaces() {
        let err = marshal(
            &SqlValue::Valuer(Box::new(Failing)),
            MarshalOpts::NONE,
            "",
            &ValuerFuncs::new(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "sql valuer error: boom");
    }

    struct Point {
        x: i64,
        y: i64,
    }

    #[test]
    fn registered_valuer_functions() {
        let mut funcs = ValuerFuncs::new();
        funcs.register::<Point, _>(|p| Ok(SqlValue::from(format!("POINT({} {})", p.x, p.y))));

        let got = marshal(
            &SqlValue::custom(Point { x: 1, y: 2 }),
            MarshalOpts::NONE,
            "",
            &funcs,
        )
        .unwrap();
        assert_eq!(
            got,
            "_utf8mb4 0x504f494e542831203229 collate utf8mb4_unicode_ci"
        );

        let nil = marshal(
            &SqlValue::Custom(CustomValue::nil::<Point>()),
            MarshalOpts::NONE,
            "",
            &funcs,
        )
        .unwrap();
        assert_eq!(nil, "null");
    }

    #[test]
    fn unregistered_custom_is_unencodable() {
        let err = marshal(
            &SqlValue::custom(Point { x: 1, y: 2 }),
            MarshalOpts::NONE,
            "pos",
            &ValuerFuncs::new(),
        )
        .unwrap_err();
        assert!(matches!(err, MarshalError::Unencodable { .. }));
        assert!(err.to_string().contains("for field pos"));
    }

    #[test]
    fn json_shape_of_values() {
        let v = SqlValue::list([
            SqlValue::from("a"),
            SqlValue::Bytes(b"hi".to_vec()),
            SqlValue::Null,
            SqlValue::Json("[1]".into()),
        ]);
        let got = to_json(&v, &ValuerFuncs::new()).unwrap();
        assert_eq!(got, serde_json::json!(["a", "aGk=", null, [1]]));
    }
}
