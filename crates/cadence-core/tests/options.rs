use cadence_core::options::{extract_task_options, ExtractionStrategy, OptionLimits};
use cadence_core::script::LiteParser;
use chrono::Utc;
use rstest::rstest;

#[rstest]
#[case::both(
    r#"option task = {name: "x", every: 1h, cron: "* * * * *"}"#,
    "cannot use both cron and every in task options"
)]
#[case::none(r#"from(bucket: "b") |> range(start: -1h)"#, "no task options defined")]
#[case::multiple(
    "option task = {name: \"a\", every: 1h}\noption task = {name: \"b\", every: 2h}",
    "multiple task options defined"
)]
fn structural_failures(
    #[case] script: &str,
    #[case] expected: &str,
    #[values(ExtractionStrategy::Simple, ExtractionStrategy::Evaluated)] strategy: ExtractionStrategy,
) {
    let err = extract_task_options(&LiteParser::new(), script, strategy).unwrap_err();
    assert_eq!(err.to_string(), expected);
}

#[rstest]
fn hourly_example(
    #[values(ExtractionStrategy::Simple, ExtractionStrategy::Evaluated)] strategy: ExtractionStrategy,
) {
    let script = r#"option task = {name: "a task", every: 1h} from(bucket:"test") |> range(start:-1h)"#;
    let options = extract_task_options(&LiteParser::new(), script, strategy).unwrap();
    assert_eq!(options.name, "a task");
    assert_eq!(options.every.as_ref().map(ToString::to_string).as_deref(), Some("1h"));
    assert_eq!(options.cron, None);
    assert_eq!(options.concurrency, 1);
    assert_eq!(options.retry, 1);
    options.validate(&OptionLimits::default(), Utc::now()).unwrap();
}

#[test]
fn evaluated_strategy_follows_variables() {
    let script = r#"
interval = 10m
option task = {name: "rollup", every: interval, offset: 30s, concurrency: 2}
"#;
    let options =
        extract_task_options(&LiteParser::new(), script, ExtractionStrategy::Evaluated).unwrap();
    assert_eq!(options.every.as_ref().map(ToString::to_string).as_deref(), Some("10m"));
    assert_eq!(options.offset.as_ref().map(ToString::to_string).as_deref(), Some("30s"));
    assert_eq!(options.concurrency, 2);

    let err = extract_task_options(&LiteParser::new(), script, ExtractionStrategy::Simple)
        .unwrap_err();
    assert_eq!(err.to_string(), "every option must be a literal duration");
}
