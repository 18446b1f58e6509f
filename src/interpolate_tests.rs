#[cfg(test)]
mod tests {
    use crate::interpolate::{Interpolated, interpolate};
    use crate::params::{Param, Params};
    use crate::sql_row;
    use crate::template::TemplateFuncs;
    use crate::value::SqlValue;
    use crate::valuer::ValuerFuncs;
    use crate::{error::Error, params};
    use pretty_assertions::assert_eq;

    fn run(query: &str, params: &[Param]) -> Interpolated {
        interpolate(query, &TemplateFuncs::new(), &ValuerFuncs::new(), params).unwrap()
    }

    const HELLO: &str = "_utf8mb4 0x68656c6c6f collate utf8mb4_unicode_ci";
    const WORLD: &str = "_utf8mb4 0x776f726c64 collate utf8mb4_unicode_ci";

    #[test]
    fn named_map_substitution() {
        let got = run(
            "SELECT * FROM t WHERE a=@@1 AND b=@@2",
            &[params! { "1" => "hello", "2" => "world" }],
        );
        assert_eq!(
            got.query,
            format!("SELECT * FROM t WHERE a={HELLO} AND b={WORLD}")
        );
        assert_eq!(got.params.len(), 2);
    }

    #[test]
    fn list_expands_in_place() {
        let got = run(
            "SELECT * FROM t WHERE a IN (@@1)",
            &[Param::from(vec!["hello", "world"])],
        );
        assert_eq!(
            got.query,
            format!("SELECT * FROM t WHERE a IN ({HELLO},{WORLD})")
        );
    }

    #[test]
    fn template_marshal_function() {
        let got = run("SELECT {{marshal .foo}}", &[params! { "foo" => "bar" }]);
        assert_eq!(
            got.query,
            "SELECT _utf8mb4 0x626172 collate utf8mb4_unicode_ci"
        );
        assert!(got.params.is_empty());
    }

    #[test]
    fn template_then_params() {
        let got = run(
            "select * from t where {{if .ByName}}name=@@Name{{else}}id=@@Name{{end}}",
            &[params! { "ByName" => true, "Name" => "hello" }],
        );
        assert_eq!(got.query, format!("select * from t where name={HELLO}"));
    }

    #[test]
    fn template_missing_key_aborts() {
        let err = interpolate(
            "select {{.Nope}}",
            &TemplateFuncs::new(),
            &ValuerFuncs::new(),
            &[params! { "foo" => 1 }],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn single_scalar_uses_first_param_name() {
        let got = run("select * from t where id=@@id", &[Param::from(7_i64)]);
        assert_eq!(got.query, "select * from t where id=7");
        let mut want = Params::new();
        want.insert("id".to_string(), SqlValue::I64(7));
        assert_eq!(got.params, want);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let got = run("select @@ID, @@id", &[params! { "Id" => 3 }]);
        assert_eq!(got.query, "select 3, 3");
        assert_eq!(got.params.keys().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn later_maps_override_earlier() {
        let got = run(
            "select @@a",
            &[params! { "a" => 1 }, params! { "A" => 2 }],
        );
        assert_eq!(got.query, "select 2");
    }

    #[test]
    fn unknown_params_pass_through() {
        let got = run(
            "select @@max_allowed_packet, @@a",
            &[params! { "a" => 1 }],
        );
        assert_eq!(got.query, "select @@max_allowed_packet, 1");
        assert_eq!(got.params.len(), 1);
    }

    #[test]
    fn params_inside_strings_are_untouched() {
        let got = run("select '@@a', @@a", &[params! { "a" => 1 }]);
        assert_eq!(got.query, "select '@@a', 1");
    }

    #[test]
    fn no_sentinel_returns_empty_params() {
        let got = run("select 1", &[params! { "a" => 1 }]);
        assert_eq!(got.query, "select 1");
        assert!(got.params.is_empty());
    }

    #[test]
    fn abutting_tokens_get_a_separator() {
        let got = run("select @@a@@b, @@a'x', @@a`c`, @@a(1)", &[params! { "a" => 1, "b" => 2 }]);
        assert_eq!(got.query, "select 1 2, 1 'x', 1 `c`, 1(1)");
    }

    #[test]
    fn ambient_params() {
        let got = run("select @@MaxTime", &[]);
        assert_eq!(
            got.query,
            "select convert_tz('9999-12-31 23:59:59.999999','UTC',@@session.time_zone)"
        );
        let now = run("select @@now", &[]);
        assert!(now.query.starts_with("select convert_tz('"));
        assert!(now.params.contains_key("now"));
    }

    #[test]
    fn user_params_shadow_ambient() {
        let got = run("select @@now", &[params! { "now" => 1 }]);
        assert_eq!(got.query, "select 1");
    }

    #[test]
    fn indexed_params() {
        let got = run("select @@0, @@1", &[Param::indexed(["a", "b"])]);
        assert_eq!(
            got.query,
            "select _utf8mb4 0x61 collate utf8mb4_unicode_ci, _utf8mb4 0x62 collate utf8mb4_unicode_ci"
        );
    }

    #[derive(Debug, Clone, Default)]
    struct Filter {
        id: i64,
        status: String,
        note: String,
    }

    sql_row! {
        impl Filter {
            id: col("id,defaultzero"),
            status: col("Status,omitempty"),
            note: col,
        }
    }

    #[test]
    fn struct_params_honor_tags() {
        let row = Filter::default();
        let got = run(
            "insert into t values(@@id, @@status, @@note)",
            &[Param::row(&row).unwrap()],
        );
        assert_eq!(got.query, "insert into t values(default(`id`), default, '')");
    }

    #[test]
    fn struct_params_non_zero() {
        let row = Filter {
            id: 5,
            status: "hello".to_string(),
            note: "world".to_string(),
        };
        let got = run(
            "select @@id, @@status, @@note",
            &[Param::row(&row).unwrap()],
        );
        assert_eq!(got.query, format!("select 5, {HELLO}, {WORLD}"));
    }

    #[test]
    fn template_with_registered_function() {
        let mut funcs = TemplateFuncs::new();
        funcs.register("upper", |args| {
            let s = match args.first() {
                Some(SqlValue::String(s)) => s.to_uppercase(),
                _ => String::new(),
            };
            Ok(SqlValue::raw(s))
        });
        let got = interpolate(
            "select * from {{.Table | upper}} where id=@@id",
            &funcs,
            &ValuerFuncs::new(),
            &[params! { "Table" => "people", "id" => 1 }],
        )
        .unwrap();
        assert_eq!(got.query, "select * from PEOPLE where id=1");
    }
}
