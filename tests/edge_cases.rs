use rstest::rstest;
use serde_json::json;
use shimmytpl::{compile, render, Context, Error, ParseError, RenderError, ValueError};

fn ctx(bindings: serde_json::Value) -> Context {
    Context::from_serialize(&bindings).unwrap()
}

fn ok(template: &str, bindings: serde_json::Value) -> String {
    render(template, &ctx(bindings)).unwrap_or_else(|e| panic!("{template}: {e}"))
}

fn render_err(template: &str, bindings: serde_json::Value) -> RenderError {
    match render(template, &ctx(bindings)) {
        Err(Error::Render(e)) => e,
        other => panic!("expected render error for {template}, got {other:?}"),
    }
}

// ── Conditionals ──

#[rstest]
#[case(json!(true), "A")]
#[case(json!(false), "B")]
#[case(json!(0), "B")]
#[case(json!(0.0), "B")]
#[case(json!(""), "B")]
#[case(json!([]), "B")]
#[case(json!({}), "B")]
#[case(json!(null), "B")]
#[case(json!([false]), "A")]
#[case(json!("0"), "A")]
#[case(json!(-3), "A")]
fn if_else_renders_exactly_one_branch(#[case] condition: serde_json::Value, #[case] expected: &str) {
    let out = ok("{% if c %}A{% else %}B{% endif %}", json!({ "c": condition }));
    assert_eq!(out, expected);
}

#[test]
fn elif_chain_picks_first_truthy() {
    let template = "{% if n == 1 %}one{% elif n == 2 %}two{% elif n > 1 %}many{% else %}none{% endif %}";
    assert_eq!(ok(template, json!({"n": 1})), "one");
    assert_eq!(ok(template, json!({"n": 2})), "two");
    assert_eq!(ok(template, json!({"n": 7})), "many");
    assert_eq!(ok(template, json!({"n": 0})), "none");
}

#[test]
fn if_without_else_renders_nothing_when_false() {
    assert_eq!(ok("[{% if false %}x{% endif %}]", json!({})), "[]");
}

// ── Loops ──

#[rstest]
#[case(0)]
#[case(1)]
#[case(4)]
fn loop_index_first_last(#[case] n: usize) {
    let items: Vec<usize> = (0..n).collect();
    let out = ok(
        "{% for i in items %}{{ loop.index }}{% if loop.first %}f{% endif %}{% if loop.last %}l{% endif %};{% endfor %}",
        json!({ "items": items }),
    );
    let expected: String = (0..n)
        .map(|i| {
            let mut s = i.to_string();
            if i == 0 {
                s.push('f');
            }
            if i + 1 == n {
                s.push('l');
            }
            s.push(';');
            s
        })
        .collect();
    assert_eq!(out, expected);
}

#[test]
fn empty_sequence_renders_empty_string() {
    assert_eq!(ok("{% for item in items %}{{ item }}{% endfor %}", json!({"items": []})), "");
}

#[test]
fn break_stops_the_loop() {
    let out = render(
        "{% for i in [1,2,3] %}{% if i == 2 %}{% break %}{% endif %}{{ i }}{% endfor %}",
        &Context::new(),
    )
    .unwrap();
    assert_eq!(out, "1");
}

#[test]
fn continue_skips_the_rest_of_the_iteration() {
    let out = render(
        "{% for i in [1,2,3] %}{% if i == 2 %}{% continue %}{% endif %}{{ i }}{% endfor %}",
        &Context::new(),
    )
    .unwrap();
    assert_eq!(out, "13");
}

#[test]
fn break_in_inner_loop_does_not_affect_outer() {
    let out = ok(
        "{% for a in [1,2,3] %}{% for b in [1,2,3] %}{% if b > a %}{% break %}{% endif %}{{ a }}{{ b }} {% endfor %}|{% endfor %}",
        json!({}),
    );
    assert_eq!(out, "11 |21 22 |31 32 33 |");
}

#[test]
fn continue_in_inner_loop_does_not_affect_outer() {
    let out = ok(
        "{% for a in [1,2] %}{% for b in [1,2] %}{% if b == 1 %}{% continue %}{% endif %}{{ a }}{{ b }}{% endfor %}.{% endfor %}",
        json!({}),
    );
    assert_eq!(out, "12.22.");
}

#[test]
fn nested_loop_sees_parent_index() {
    let out = ok(
        "{% for a in 'xyz' %}{% for b in [0, 1] %}{{ loop.parent.index }}{{ loop.index }}{% endfor %} {% endfor %}",
        json!({}),
    );
    assert_eq!(out, "0001 1011 2021 ");
}

#[test]
fn grandparent_is_reachable() {
    let out = ok(
        "{% for a in [1,2] %}{% for b in [1] %}{% for c in [1] %}{{ loop.parent.parent.index }}{% endfor %}{% endfor %}{% endfor %}",
        json!({}),
    );
    assert_eq!(out, "01");
}

#[test]
fn nested_loops_shadow_names_only_inside() {
    let out = ok(
        "{% for x in [1, 2] %}{% for x in ['a'] %}{{ x }}{% endfor %}{{ x }}{% endfor %}",
        json!({}),
    );
    assert_eq!(out, "a1a2");
}

#[test]
fn loop_over_mapping() {
    let bindings = json!({"m": {"b": 2, "a": 1}});
    assert_eq!(ok("{% for k in m %}{{ k }}{% endfor %}", bindings.clone()), "ab");
    assert_eq!(ok("{% for k, v in m %}{{ k }}={{ v }};{% endfor %}", bindings), "a=1;b=2;");
}

#[test]
fn loop_over_string_and_index_pairs() {
    assert_eq!(ok("{% for c in 'héj' %}[{{ c }}]{% endfor %}", json!({})), "[h][é][j]");
    assert_eq!(ok("{% for i, v in ['a', 'b'] %}{{ i }}{{ v }}{% endfor %}", json!({})), "0a1b");
}

#[rstest]
#[case(json!(3), "int")]
#[case(json!(true), "bool")]
#[case(json!(null), "nil")]
fn non_iterables_fail(#[case] value: serde_json::Value, #[case] ty: &str) {
    let err = render_err("{% for x in v %}{% endfor %}", json!({ "v": value }));
    assert!(matches!(err, RenderError::NotIterable { ty: t, .. } if t == ty));
}

// ── Coercion ──

#[rstest]
#[case("{{ 1 + 2 }}", "3")]
#[case("{{ 1 + 2.0 }}", "3")]
#[case("{{ 1.5 + 1 }}", "2.5")]
#[case("{{ 'a' + 'b' }}", "ab")]
#[case("{{ 7 / 2 }}", "3.5")]
#[case("{{ 7 % 3 }}", "1")]
#[case("{{ 2 * 3 - 4 }}", "2")]
#[case("{{ -(2 + 3) }}", "-5")]
#[case("{{ +4 }}", "4")]
#[case("{{ (1 + 2) * 3 }}", "9")]
#[case("{{ 1 < 2 }}", "true")]
#[case("{{ 'b' >= 'a' }}", "true")]
#[case("{{ 1 == 1.0 }}", "true")]
#[case("{{ true != false }}", "true")]
#[case("{{ not [] }}", "true")]
#[case("{{ [1, 'a'] }}", "[1, \"a\"]")]
#[case("{{ nil }}", "")]
fn expression_results(#[case] template: &str, #[case] expected: &str) {
    assert_eq!(ok(template, json!({})), expected);
}

#[test]
fn adding_number_and_string_fails() {
    let err = render_err("{{ 1 + 'a' }}", json!({}));
    assert_eq!(err.to_string(), "cannot add types int and string at line 1, column 4");
}

#[rstest]
#[case("{{ 'a' == 1 }}")]
#[case("{{ 1 != '1' }}")]
#[case("{{ true == 1 }}")]
#[case("{{ true < false }}")]
fn cross_class_comparison_is_an_error(#[case] template: &str) {
    let err = render_err(template, json!({}));
    assert!(matches!(
        err,
        RenderError::Value { source: ValueError::CannotCompare { .. }, .. }
    ));
}

#[rstest]
#[case("{{ 1 / 0 }}", ValueError::DivisionByZero)]
#[case("{{ 'x' / 0.0 }}", ValueError::DivisionByZero)]
#[case("{{ 5 % 0 }}", ValueError::ModuloByZero)]
fn zero_divisors(#[case] template: &str, #[case] expected: ValueError) {
    let err = render_err(template, json!({}));
    assert!(matches!(err, RenderError::Value { ref source, .. } if *source == expected));
}

// ── Access ──

#[test]
fn property_and_index_chains() {
    let bindings = json!({"users": [{"name": "ann", "tags": ["x", "y"]}]});
    assert_eq!(ok("{{ users.0.name }}", bindings.clone()), "ann");
    assert_eq!(ok("{{ users[0]['tags'].1 }}", bindings.clone()), "y");
    assert_eq!(ok("{{ users.0.tags | join:'+' }}", bindings), "x+y");
}

#[test]
fn access_errors() {
    let bindings = json!({"users": [{"name": "ann"}]});
    assert!(matches!(
        render_err("{{ users.0.age }}", bindings.clone()),
        RenderError::Value { source: ValueError::UndefinedProperty { .. }, .. }
    ));
    assert!(matches!(
        render_err("{{ users.5 }}", bindings.clone()),
        RenderError::Value { source: ValueError::IndexOutOfRange { index: 5, len: 1 }, .. }
    ));
    assert!(matches!(
        render_err("{{ users.0.name.0.x }}", bindings),
        RenderError::Value { source: ValueError::UndefinedProperty { .. }, .. }
    ));
    assert!(matches!(
        render_err("{{ missing }}", json!({})),
        RenderError::UndefinedVariable { ref name, .. } if name == "missing"
    ));
}

// ── Filters ──

#[test]
fn filter_pipeline_is_left_associative() {
    assert_eq!(ok("{{ name | trim | upper }}", json!({"name": "  ann "})), "ANN");
    assert_eq!(ok("{{ (items | length) + 1 }}", json!({"items": [1, 2]})), "3");
    assert!(compile("{{ items | length + 1 }}").is_err());
}

#[test]
fn filter_errors() {
    assert!(matches!(
        render_err("{{ 1 | nosuchfilter }}", json!({})),
        RenderError::FilterNotFound { ref name, .. } if name == "nosuchfilter"
    ));
    assert!(matches!(
        render_err("{{ 1 | upper }}", json!({})),
        RenderError::Filter { ref name, .. } if name == "upper"
    ));
}

// ── Compile errors ──

#[rstest]
#[case("{% if x %}a{% else %}b{% else %}c{% endif %}")]
#[case("{% if x %}{% else %}{% elif y %}{% endif %}")]
#[case("{% if x %}")]
#[case("{% for x in y %}")]
#[case("{% for x y %}{% endfor %}")]
#[case("{% break %}")]
#[case("{% continue %}")]
#[case("{{ (1 }}")]
#[case("{{ 1 2 }}")]
#[case("{{ 'abc }}")]
#[case("{{ 1.x }}")]
#[case("{{ # }}")]
fn malformed_templates_fail_to_compile(#[case] template: &str) {
    assert!(compile(template).is_err(), "{template} should not compile");
}

#[test]
fn multiple_else_is_reported_by_kind() {
    assert!(matches!(
        compile("{% if x %}a{% else %}b{% else %}c{% endif %}"),
        Err(ParseError::MultipleElse { .. })
    ));
}

#[test]
fn comments_are_ignored() {
    assert_eq!(ok("a{# {% broken #}b", json!({})), "ab");
}

// ── Determinism and sharing ──

#[test]
fn compiling_twice_renders_identically() {
    let source = "{% for k, v in m %}{{ k }}:{{ v | json }} {% endfor %}";
    let bindings = ctx(json!({"m": {"z": [1, 2], "a": {"q": null}, "m": "s"}}));
    let first = compile(source).unwrap();
    let second = compile(source).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.render(&bindings).unwrap(), second.render(&bindings).unwrap());
}

#[test]
fn template_renders_concurrently() {
    let template = compile("{% for i in items %}{{ i * n }}{% endfor %}").unwrap();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=4)
            .map(|n| {
                let template = &template;
                scope.spawn(move || {
                    let ctx = Context::new().with("items", vec![1, 2, 3]).with("n", n);
                    template.render(&ctx).unwrap()
                })
            })
            .collect();
        let outputs: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outputs, vec!["123", "246", "369", "4812"]);
    });
}

#[test]
fn collection_read_inside_its_own_loop_stays_linear() {
    let rows: Vec<Vec<i64>> = (0..3000).map(|i| (i..i + 50).collect()).collect();
    let ctx = Context::new().with("items", rows);
    let template = compile("{% for x in items %}{{ items.0.0 }}{{ items[loop.index].1 }}{% endfor %}").unwrap();

    let started = std::time::Instant::now();
    let out = template.render(&ctx).unwrap();
    let elapsed = started.elapsed();

    assert!(out.starts_with("0102"));
    assert!(out.ends_with("03000"));
    assert!(elapsed < std::time::Duration::from_secs(5), "took {elapsed:?}");
}

#[test]
fn deeply_nested_templates_fail_to_compile() {
    let depth = 100_000;
    let parens = format!("{{{{ {}1{} }}}}", "(".repeat(depth), ")".repeat(depth));
    assert!(matches!(compile(&parens), Err(ParseError::NestingTooDeep { .. })));

    let blocks = format!("{}x{}", "{% for x in xs %}".repeat(depth), "{% endfor %}".repeat(depth));
    assert!(matches!(compile(&blocks), Err(ParseError::NestingTooDeep { .. })));

    let ifs = format!("{}x{}", "{% if true %}".repeat(20), "{% endif %}".repeat(20));
    assert_eq!(ok(&ifs, json!({})), "x");
}

#[test]
fn records_are_accessible() {
    use shimmytpl::Record;
    let ctx = Context::new().with(
        "user",
        Record::new("User").with_field("name", "ann").with_field("admin", true),
    );
    assert_eq!(
        render("{% if user.admin %}{{ user['name'] }}{% endif %}", &ctx).unwrap(),
        "ann"
    );
    assert_eq!(
        render("{{ user }}", &ctx).unwrap(),
        "User { name: \"ann\", admin: true }"
    );
}
