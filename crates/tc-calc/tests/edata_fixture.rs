use tc_calc::{
    CalcError, ColumnCalculator, Computable, CountBy, CounterOptions, EvaluationPolicy, Predicate,
    TableSource,
};
use tc_expr::ExprError;
use tc_table::{Table, TableError};
use tc_types::Scalar;

/// Six rows; `sparse` only appears on rows 1 and 3.
fn mock_edata() -> Table {
    let mut table = Table::new();
    let rows: [(&str, &str, Option<&str>); 6] = [
        ("3188", "2400", None),
        ("4515", "2400", Some("20")),
        ("6515", "2400", None),
        ("8115", "2400", Some("50")),
        ("9815", "2400", None),
        ("12515", "2800", None),
    ];
    for (stim_time, run_start, sparse) in rows {
        let mut row = table.add_row();
        row.set("stim_time", stim_time).expect("stim_time");
        row.set("run_start", run_start).expect("run_start");
        if let Some(sparse) = sparse {
            row.set("sparse", sparse).expect("sparse");
        }
    }
    table
}

fn values(calc: &ColumnCalculator, name: &str) -> Vec<Scalar> {
    calc.rows()
        .expect("materialize")
        .map(|row| row.get(name).expect("column").clone())
        .collect()
}

fn numbers(values: &[f64]) -> Vec<Scalar> {
    values.iter().copied().map(Scalar::Number).collect()
}

#[test]
fn fixture_reads_blank_for_missing_sparse_cells() {
    let data = mock_edata();
    assert_eq!(data.columns(), &["stim_time", "run_start", "sparse"]);
    assert_eq!(data.row(0).expect("row").get("sparse").expect("sparse"), &Scalar::Blank);
    assert!(matches!(
        data.row(6),
        Err(TableError::RowOutOfRange { index: 6, len: 6 })
    ));
}

#[test]
fn data_passes_through_unchanged() {
    let calc = ColumnCalculator::with_data(mock_edata());
    assert_eq!(
        values(&calc, "stim_time"),
        ["3188", "4515", "6515", "8115", "9815", "12515"]
            .map(Scalar::from)
            .to_vec()
    );
}

#[test]
fn stim_offset_is_numeric_difference() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.computed_column("stim_offset", "{stim_time} - {run_start}")
        .expect("stim_offset");
    assert_eq!(
        values(&calc, "stim_offset"),
        numbers(&[788.0, 2115.0, 4115.0, 5715.0, 7415.0, 9715.0])
    );
}

#[test]
fn somewhat_arbitrary_expression() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.computed_column("result", "({stim_time} - {run_start})+ 100 / 2")
        .expect("result");
    assert_eq!(
        values(&calc, "result"),
        numbers(&[838.0, 2165.0, 4165.0, 5765.0, 7465.0, 9765.0])
    );
}

#[test]
fn diamond_dependencies_resolve() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.computed_column("c1", "{stim_time} - {run_start}")
        .expect("c1")
        .computed_column("c2", "{c1}")
        .expect("c2")
        .computed_column("c3", "{c1} - {c2}")
        .expect("c3");
    assert_eq!(values(&calc, "c3"), numbers(&[0.0; 6]));
}

#[test]
fn mutual_reference_is_an_evaluation_loop() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.computed_column("a", "{b}")
        .expect("a")
        .computed_column("b", "{a}")
        .expect("b");
    match calc.table() {
        Err(CalcError::Expr(ExprError::EvaluationLoop { column, .. })) => assert_eq!(column, "a"),
        other => panic!("expected an evaluation loop, got {other:?}"),
    }
}

#[test]
fn default_counter_counts_every_row() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.counter_column("n", CounterOptions::default()).expect("n");
    assert_eq!(
        values(&calc, "n"),
        numbers(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
    );
}

#[test]
fn counter_resets_on_sparse_rows() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.counter_column(
        "n",
        CounterOptions {
            reset_when: Predicate::expression("{sparse}").expect("reset"),
            ..CounterOptions::default()
        },
    )
    .expect("n");
    assert_eq!(
        values(&calc, "n"),
        numbers(&[1.0, 1.0, 2.0, 1.0, 2.0, 3.0])
    );
}

#[test]
fn copydown_holds_latest_sparse_value() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.copydown_column("sparse_down", "sparse").expect("copydown");
    assert_eq!(
        values(&calc, "sparse_down"),
        ["", "20", "20", "50", "50", "50"].map(Scalar::from).to_vec()
    );
}

#[test]
fn reset_when_sparse_holds_stim_time_between_resets() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.computed_column_with(
        "held",
        Computable::Expression(tc_expr::parse_expr("{stim_time}").expect("parse")),
        Some(EvaluationPolicy {
            reset_when: Predicate::expression("{sparse}").expect("reset"),
            ..EvaluationPolicy::default()
        }),
    )
    .expect("held");
    let held = values(&calc, "held");
    assert_eq!(held[0], Scalar::Blank);
    assert_eq!(&held[1..], numbers(&[4515.0, 4515.0, 8115.0, 8115.0, 8115.0]));
}

#[test]
fn once_reset_keeps_first_value() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.computed_column_with(
        "first",
        Computable::Expression(tc_expr::parse_expr("{stim_time}").expect("parse")),
        Some(EvaluationPolicy {
            reset_when: Predicate::Once,
            ..EvaluationPolicy::default()
        }),
    )
    .expect("first");
    assert_eq!(values(&calc, "first"), numbers(&[3188.0; 6]));
}

#[test]
fn count_sometimes_with_policy() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.computed_column_with(
        "seen",
        Computable::Literal(Scalar::Number(0.0)),
        Some(EvaluationPolicy {
            reset_when: Predicate::Once,
            count_when: Predicate::expression("{sparse}").expect("count"),
            count_by: CountBy::Increment,
        }),
    )
    .expect("seen");
    assert_eq!(
        values(&calc, "seen"),
        numbers(&[0.0, 1.0, 1.0, 2.0, 2.0, 2.0])
    );
}

#[test]
fn computed_columns_can_read_counters_and_copydowns() {
    let mut calc = ColumnCalculator::with_data(mock_edata());
    calc.computed_column("label", "{sparse_down} & '-' & {n}")
        .expect("label")
        .copydown_column("sparse_down", "sparse")
        .expect("copydown")
        .counter_column("n", CounterOptions::default())
        .expect("counter");
    assert_eq!(
        values(&calc, "label"),
        ["-1", "20-2", "20-3", "50-4", "50-5", "50-6"]
            .map(Scalar::from)
            .to_vec()
    );
}
