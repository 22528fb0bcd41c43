use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tc_expr::{
    Environment, EvalPath, Expr, ExprError, ExpressionParser, RowValues, parse_expr,
    resolve_column,
};
use tc_table::{RowRef, Table, default_sort_key};
use tc_types::Scalar;

use crate::{CalcError, TableSource};

/// Computes a value from the row being built. Sees data columns and the
/// derived columns resolved so far.
pub type RowFunction = Arc<dyn Fn(&dyn RowValues) -> Scalar>;

pub type RowPredicate = Arc<dyn Fn(&dyn RowValues) -> bool>;

/// Advances a running value by one step.
pub type StepFunction = Arc<dyn Fn(&Scalar) -> Scalar>;

/// Body of a computed column.
#[derive(Clone)]
pub enum Computable {
    Expression(Expr),
    Literal(Scalar),
    Function(RowFunction),
}

impl Computable {
    fn compute<E: Environment>(&self, env: &mut E, path: &mut EvalPath) -> Result<Scalar, ExprError> {
        match self {
            Self::Expression(expr) => expr.evaluate_with_path(env, path),
            Self::Literal(value) => Ok(value.clone()),
            Self::Function(function) => Ok(function(&*env)),
        }
    }
}

impl From<Expr> for Computable {
    fn from(expr: Expr) -> Self {
        Self::Expression(expr)
    }
}

impl From<Scalar> for Computable {
    fn from(value: Scalar) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Debug for Computable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression(expr) => f.debug_tuple("Expression").field(&expr.to_string()).finish(),
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// A per-row condition for counters and stateful computed columns.
#[derive(Clone)]
pub enum Predicate {
    Always,
    Never,
    /// Holds on the first row only.
    Once,
    /// Holds when the expression's value is truthy.
    Expression(Expr),
    Function(RowPredicate),
}

impl Predicate {
    /// Parse `text` into an [`Predicate::Expression`].
    pub fn expression(text: &str) -> Result<Self, ExprError> {
        parse_expr(text).map(Self::Expression)
    }

    fn holds<E: Environment>(
        &self,
        env: &mut E,
        first_row: bool,
        path: &mut EvalPath,
    ) -> Result<bool, ExprError> {
        Ok(match self {
            Self::Always => true,
            Self::Never => false,
            Self::Once => first_row,
            Self::Expression(expr) => expr.evaluate_with_path(env, path)?.truthy(),
            Self::Function(function) => function(&*env),
        })
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Never => f.write_str("Never"),
            Self::Once => f.write_str("Once"),
            Self::Expression(expr) => f.debug_tuple("Expression").field(&expr.to_string()).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

#[derive(Clone, Default)]
pub enum CountBy {
    /// Add one.
    #[default]
    Increment,
    Step(f64),
    Function(StepFunction),
}

impl CountBy {
    fn advance(&self, current: &Scalar) -> Scalar {
        let step = match self {
            Self::Increment => 1.0,
            Self::Step(step) => *step,
            Self::Function(function) => return function(current),
        };
        current
            .to_f64()
            .map_or_else(|_| Scalar::nan(), |value| Scalar::Number(value + step))
    }
}

impl fmt::Debug for CountBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increment => f.write_str("Increment"),
            Self::Step(step) => f.debug_tuple("Step").field(step).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Makes a computed column stateful: on each row the running value is
/// recomputed when `reset_when` holds, then advanced when `count_when` holds.
#[derive(Debug, Clone)]
pub struct EvaluationPolicy {
    pub reset_when: Predicate,
    pub count_when: Predicate,
    pub count_by: CountBy,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self {
            reset_when: Predicate::Always,
            count_when: Predicate::Never,
            count_by: CountBy::Increment,
        }
    }
}

/// Where a counter starts, and restarts on reset.
#[derive(Clone)]
pub enum StartValue {
    Value(Scalar),
    /// Evaluated against the row being built each time the counter
    /// (re)starts.
    Function(RowFunction),
}

impl StartValue {
    fn resolve(&self, row: &dyn RowValues) -> Scalar {
        match self {
            Self::Value(value) => value.clone(),
            Self::Function(function) => function(row),
        }
    }
}

impl From<Scalar> for StartValue {
    fn from(value: Scalar) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for StartValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CounterOptions {
    pub start_value: StartValue,
    pub count_by: CountBy,
    pub count_when: Predicate,
    pub reset_when: Predicate,
}

impl Default for CounterOptions {
    fn default() -> Self {
        Self {
            start_value: StartValue::Value(Scalar::Number(0.0)),
            count_by: CountBy::Increment,
            count_when: Predicate::Always,
            reset_when: Predicate::Never,
        }
    }
}

#[derive(Debug, Clone)]
struct ComputedColumn {
    name: String,
    computable: Computable,
    policy: Option<EvaluationPolicy>,
}

#[derive(Debug, Clone)]
struct CopydownColumn {
    name: String,
    source: String,
}

#[derive(Debug, Clone)]
struct CounterColumn {
    name: String,
    options: CounterOptions,
}

/// A derived column by kind and index within its group.
#[derive(Debug, Clone, Copy)]
enum Registered {
    Computed(usize),
    Copydown(usize),
    Counter(usize),
}

/// Derives computed, copydown and counter columns over a data table.
///
/// Output columns are the data columns, then computed, then copydown, then
/// counter columns, each group in registration order. Each row steps its
/// derived columns in the order they were registered, whatever their kind.
/// The derived table is built on first access and cached until the next
/// registration.
#[derive(Debug, Default)]
pub struct ColumnCalculator {
    parser: ExpressionParser,
    data: Table,
    computed: Vec<ComputedColumn>,
    copydowns: Vec<CopydownColumn>,
    counters: Vec<CounterColumn>,
    registered: Vec<Registered>,
    sort_expression: Option<Expr>,
    materialized: OnceCell<Table>,
}

impl ColumnCalculator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_data(data: Table) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Replace the data table. Fails if a data column collides with a
    /// registered derived column.
    pub fn set_data(&mut self, data: Table) -> Result<&mut Self, CalcError> {
        if let Some(name) = data
            .columns()
            .iter()
            .find(|name| self.derived_names().any(|derived| derived == name.as_str()))
        {
            return Err(CalcError::DuplicateColumn(name.clone()));
        }
        self.data = data;
        Ok(self.invalidate())
    }

    #[must_use]
    pub fn data(&self) -> &Table {
        &self.data
    }

    /// Register a computed column from expression text.
    pub fn computed_column(&mut self, name: &str, expression: &str) -> Result<&mut Self, CalcError> {
        let expr = self.parser.parse(expression)?;
        self.computed_column_with(name, Computable::Expression(expr), None)
    }

    pub fn computed_column_with(
        &mut self,
        name: &str,
        computable: Computable,
        policy: Option<EvaluationPolicy>,
    ) -> Result<&mut Self, CalcError> {
        self.ensure_unique(name)?;
        self.registered.push(Registered::Computed(self.computed.len()));
        self.computed.push(ComputedColumn {
            name: name.to_owned(),
            computable,
            policy,
        });
        Ok(self.invalidate())
    }

    pub fn copydown_column(&mut self, name: &str, source: &str) -> Result<&mut Self, CalcError> {
        self.ensure_unique(name)?;
        self.registered.push(Registered::Copydown(self.copydowns.len()));
        self.copydowns.push(CopydownColumn {
            name: name.to_owned(),
            source: source.to_owned(),
        });
        Ok(self.invalidate())
    }

    pub fn counter_column(&mut self, name: &str, options: CounterOptions) -> Result<&mut Self, CalcError> {
        self.ensure_unique(name)?;
        self.registered.push(Registered::Counter(self.counters.len()));
        self.counters.push(CounterColumn {
            name: name.to_owned(),
            options,
        });
        Ok(self.invalidate())
    }

    /// Set the per-row sort key expression (default `1`).
    pub fn set_sort_expression(&mut self, expression: &str) -> Result<&mut Self, CalcError> {
        let expr = self.parser.parse(expression)?;
        Ok(self.set_sort_expr(expr))
    }

    pub fn set_sort_expr(&mut self, expr: Expr) -> &mut Self {
        self.sort_expression = Some(expr);
        self.invalidate()
    }

    #[must_use]
    pub fn sort_expression(&self) -> String {
        self.sort_expression
            .as_ref()
            .map_or_else(|| "1".to_owned(), ToString::to_string)
    }

    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.data
            .columns()
            .iter()
            .map(String::as_str)
            .chain(self.derived_names())
            .map(str::to_owned)
            .collect()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.data
            .columns()
            .iter()
            .map(String::as_str)
            .chain(self.derived_names())
            .position(|column| column == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, index: usize) -> Result<RowRef<'_>, CalcError> {
        Ok(self.table()?.row(index)?)
    }

    pub fn rows(&self) -> Result<impl ExactSizeIterator<Item = RowRef<'_>>, CalcError> {
        Ok(self.table()?.rows())
    }

    /// Materialize and take ownership of the derived table.
    pub fn into_table(mut self) -> Result<Table, CalcError> {
        match self.materialized.take() {
            Some(table) => Ok(table),
            None => self.materialize(),
        }
    }

    fn derived_names(&self) -> impl Iterator<Item = &str> {
        self.computed
            .iter()
            .map(|column| column.name.as_str())
            .chain(self.copydowns.iter().map(|column| column.name.as_str()))
            .chain(self.counters.iter().map(|column| column.name.as_str()))
    }

    fn ensure_unique(&self, name: &str) -> Result<(), CalcError> {
        if self.column_index(name).is_some() {
            return Err(CalcError::DuplicateColumn(name.to_owned()));
        }
        Ok(())
    }

    fn invalidate(&mut self) -> &mut Self {
        self.materialized = OnceCell::new();
        self
    }

    fn materialize(&self) -> Result<Table, CalcError> {
        let columns = self.columns();
        let layout = Layout::new(self, &columns);
        let mut carried = layout
            .derived
            .iter()
            .map(Derived::initial_state)
            .collect::<Vec<_>>();
        let mut output = Table::with_columns(&columns, false);

        for source in self.data.rows() {
            let mut values = vec![None; columns.len()];
            for (position, slot) in values.iter_mut().enumerate().take(layout.data_width) {
                *slot = Some(source.get(position)?.clone());
            }
            let mut env = RowEnv {
                layout: &layout,
                carried: &mut carried,
                values,
                first_row: source.index() == 0,
            };

            for &slot in &layout.steps {
                resolve_column(layout.derived[slot].name(), &mut env, &mut EvalPath::new())?;
            }
            let sort_key = match &self.sort_expression {
                Some(expr) => expr.evaluate(&mut env)?.magic_cast(),
                None => default_sort_key(),
            };
            let row = env.values.into_iter().map(Option::unwrap_or_default).collect();
            output.push_row(row, sort_key)?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            rows = output.len(),
            columns = output.column_count(),
            "materialized column calculator"
        );
        Ok(output)
    }
}

impl TableSource for ColumnCalculator {
    fn table(&self) -> Result<&Table, CalcError> {
        if let Some(table) = self.materialized.get() {
            return Ok(table);
        }
        let table = self.materialize()?;
        Ok(self.materialized.get_or_init(|| table))
    }
}

#[derive(Clone, Copy)]
enum Derived<'c> {
    Computed(&'c ComputedColumn),
    Copydown(&'c CopydownColumn),
    Counter(&'c CounterColumn),
}

impl<'c> Derived<'c> {
    fn name(&self) -> &'c str {
        match self {
            Self::Computed(column) => &column.name,
            Self::Copydown(column) => &column.name,
            Self::Counter(column) => &column.name,
        }
    }

    /// Value carried between rows before the first row is seen.
    fn initial_state(&self) -> Option<Scalar> {
        match self {
            Self::Computed(_) => None,
            Self::Copydown(_) => Some(Scalar::Text(String::new())),
            // A computed start waits for the first row.
            Self::Counter(column) => match &column.options.start_value {
                StartValue::Value(value) => Some(value.clone()),
                StartValue::Function(_) => None,
            },
        }
    }
}

struct Layout<'c> {
    positions: HashMap<&'c str, usize>,
    data_width: usize,
    /// In column order.
    derived: Vec<Derived<'c>>,
    /// Slots into `derived`, in registration order.
    steps: Vec<usize>,
}

impl<'c> Layout<'c> {
    fn new(calculator: &'c ColumnCalculator, columns: &'c [String]) -> Self {
        let derived = calculator
            .computed
            .iter()
            .map(Derived::Computed)
            .chain(calculator.copydowns.iter().map(Derived::Copydown))
            .chain(calculator.counters.iter().map(Derived::Counter))
            .collect();
        let copydown_base = calculator.computed.len();
        let counter_base = copydown_base + calculator.copydowns.len();
        let steps = calculator
            .registered
            .iter()
            .map(|registered| match *registered {
                Registered::Computed(index) => index,
                Registered::Copydown(index) => copydown_base + index,
                Registered::Counter(index) => counter_base + index,
            })
            .collect();
        Self {
            positions: columns
                .iter()
                .enumerate()
                .map(|(position, name)| (name.as_str(), position))
                .collect(),
            data_width: calculator.data.column_count(),
            derived,
            steps,
        }
    }
}

/// One output row under construction plus the state carried between rows.
struct RowEnv<'r, 'c> {
    layout: &'r Layout<'c>,
    carried: &'r mut [Option<Scalar>],
    values: Vec<Option<Scalar>>,
    first_row: bool,
}

impl RowEnv<'_, '_> {
    /// Raw value of `column`, deriving it first when needed.
    fn fetch(&mut self, column: &str, path: &mut EvalPath) -> Result<Scalar, ExprError> {
        match self.value(column) {
            Some(value) => Ok(value),
            None => resolve_column(column, self, path),
        }
    }

    fn step(&mut self, derived: Derived<'_>, slot: usize, path: &mut EvalPath) -> Result<Scalar, ExprError> {
        let first_row = self.first_row;
        match derived {
            Derived::Computed(column) => {
                let Some(policy) = &column.policy else {
                    return column.computable.compute(self, path);
                };
                if policy.reset_when.holds(self, first_row, path)? {
                    self.carried[slot] = Some(column.computable.compute(self, path)?);
                }
                if policy.count_when.holds(self, first_row, path)? {
                    // Counting before the first reset leaves the column blank.
                    let advanced = self.carried[slot]
                        .as_ref()
                        .map(|current| policy.count_by.advance(current));
                    if advanced.is_some() {
                        self.carried[slot] = advanced;
                    }
                }
                Ok(self.carried[slot].clone().unwrap_or_default())
            }
            Derived::Copydown(column) => {
                let value = self.fetch(&column.source, path)?;
                if !value.is_blank() {
                    self.carried[slot] = Some(value);
                }
                Ok(self.carried[slot].clone().unwrap_or_default())
            }
            Derived::Counter(column) => {
                let options = &column.options;
                if options.reset_when.holds(self, first_row, path)? || self.carried[slot].is_none() {
                    self.carried[slot] = Some(options.start_value.resolve(&*self));
                }
                if options.count_when.holds(self, first_row, path)? {
                    let current = self.carried[slot].take().unwrap_or_default();
                    self.carried[slot] = Some(options.count_by.advance(&current));
                }
                Ok(self.carried[slot].clone().unwrap_or_default())
            }
        }
    }
}

impl RowValues for RowEnv<'_, '_> {
    fn value(&self, column: &str) -> Option<Scalar> {
        let position = *self.layout.positions.get(column)?;
        self.values[position].clone()
    }
}

impl Environment for RowEnv<'_, '_> {
    fn derive(&mut self, column: &str, path: &mut EvalPath) -> Option<Result<Scalar, ExprError>> {
        let layout = self.layout;
        let position = *layout.positions.get(column)?;
        let slot = position.checked_sub(layout.data_width)?;
        let result = self.step(layout.derived[slot], slot, path);
        if let Ok(value) = &result {
            self.values[position] = Some(value.clone());
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tc_expr::{ExprError, RowValues};
    use tc_table::Table;
    use tc_types::Scalar;

    use super::{
        ColumnCalculator, Computable, CountBy, CounterOptions, EvaluationPolicy, Predicate,
        StartValue,
    };
    use crate::{CalcError, TableSource};

    fn sample() -> Table {
        let mut table = Table::new();
        for (a, b) in [("1", "x"), ("2", ""), ("3", "y")] {
            let mut row = table.add_row();
            row.set("a", a).expect("a");
            row.set("b", b).expect("b");
        }
        table
    }

    fn column(calc: &ColumnCalculator, name: &str) -> Vec<Scalar> {
        calc.rows()
            .expect("materialize")
            .map(|row| row.get(name).expect("column").clone())
            .collect()
    }

    #[test]
    fn column_order_groups_derived_kinds() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.counter_column("n", CounterOptions::default())
            .expect("counter")
            .copydown_column("b_down", "b")
            .expect("copydown")
            .computed_column("double", "{a} * 2")
            .expect("computed");
        assert_eq!(calc.columns(), vec!["a", "b", "double", "b_down", "n"]);
        assert_eq!(calc.column_index("b_down"), Some(3));
        assert_eq!(calc.len(), 3);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut calc = ColumnCalculator::with_data(sample());
        assert_eq!(
            calc.computed_column("a", "1").map(|_| ()),
            Err(CalcError::DuplicateColumn("a".to_owned()))
        );
        calc.counter_column("n", CounterOptions::default()).expect("counter");
        assert_eq!(
            calc.copydown_column("n", "a").map(|_| ()),
            Err(CalcError::DuplicateColumn("n".to_owned()))
        );

        let mut clashing = Table::new();
        clashing.add_row().set("n", "1").expect("n");
        assert_eq!(
            calc.set_data(clashing).map(|_| ()),
            Err(CalcError::DuplicateColumn("n".to_owned()))
        );
    }

    #[test]
    fn bad_expression_fails_at_registration() {
        let mut calc = ColumnCalculator::with_data(sample());
        assert!(matches!(
            calc.computed_column("bad", "FIAL"),
            Err(CalcError::Expr(ExprError::Syntax { .. }))
        ));
        assert_eq!(calc.columns(), vec!["a", "b"]);
    }

    #[test]
    fn computed_columns_may_reference_later_columns() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.computed_column("foo2", "{foo}").expect("foo2");
        calc.computed_column("foo", "{a} + 10").expect("foo");
        assert_eq!(
            column(&calc, "foo2"),
            vec![Scalar::Number(11.0), Scalar::Number(12.0), Scalar::Number(13.0)]
        );
    }

    #[test]
    fn literal_and_function_computables() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.computed_column_with("one", Computable::Literal(Scalar::Number(1.0)), None)
            .expect("literal");
        calc.computed_column_with(
            "echo",
            Computable::Function(Arc::new(|row: &dyn RowValues| row.value("b").unwrap_or_default())),
            None,
        )
        .expect("function");
        assert_eq!(column(&calc, "one"), vec![Scalar::Number(1.0); 3]);
        assert_eq!(
            column(&calc, "echo"),
            vec![Scalar::from("x"), Scalar::from(""), Scalar::from("y")]
        );
    }

    #[test]
    fn loops_surface_on_materialization() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.computed_column("nc1", "{nc2}").expect("nc1");
        calc.computed_column("nc2", "{nc1}").expect("nc2");
        assert!(matches!(
            calc.row(0),
            Err(CalcError::Expr(ExprError::EvaluationLoop { .. }))
        ));
    }

    #[test]
    fn unknown_references_are_errors() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.computed_column("bad", "{missing} + 1").expect("bad");
        assert_eq!(
            calc.table().map(|_| ()),
            Err(CalcError::Expr(ExprError::UnknownColumn("missing".to_owned())))
        );
    }

    #[test]
    fn derived_columns_step_in_registration_order() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.counter_column("n", CounterOptions::default()).expect("n");
        calc.computed_column_with(
            "sees_n",
            Computable::Function(Arc::new(|row: &dyn RowValues| row.value("n").unwrap_or_default())),
            None,
        )
        .expect("sees_n");
        calc.copydown_column("b_down", "b").expect("b_down");
        calc.counter_column(
            "b_seen",
            CounterOptions {
                count_when: Predicate::Function(Arc::new(|row: &dyn RowValues| {
                    row.value("b_down").is_some_and(|value| !value.is_blank())
                })),
                ..CounterOptions::default()
            },
        )
        .expect("b_seen");

        assert_eq!(calc.columns(), vec!["a", "b", "sees_n", "b_down", "n", "b_seen"]);
        assert_eq!(
            column(&calc, "sees_n"),
            vec![Scalar::Number(1.0), Scalar::Number(2.0), Scalar::Number(3.0)]
        );
        assert_eq!(
            column(&calc, "b_seen"),
            vec![Scalar::Number(1.0), Scalar::Number(2.0), Scalar::Number(3.0)]
        );
    }

    #[test]
    fn computed_start_value_is_evaluated_on_reset() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.counter_column(
            "from_a",
            CounterOptions {
                start_value: StartValue::Function(Arc::new(|row: &dyn RowValues| {
                    row.value("a")
                        .unwrap_or_default()
                        .magic_cast()
                        .arithmetic(tc_types::ArithmeticOp::Mul, &Scalar::Number(100.0))
                })),
                reset_when: Predicate::expression("{b}").expect("reset"),
                ..CounterOptions::default()
            },
        )
        .expect("from_a");
        assert_eq!(
            column(&calc, "from_a"),
            vec![Scalar::Number(101.0), Scalar::Number(102.0), Scalar::Number(301.0)]
        );
    }

    #[test]
    fn copydown_carries_last_non_blank_value() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.copydown_column("b_down", "b").expect("copydown");
        assert_eq!(
            column(&calc, "b_down"),
            vec![Scalar::from("x"), Scalar::from("x"), Scalar::from("y")]
        );
    }

    #[test]
    fn counter_steps_and_custom_increments() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.counter_column(
            "by_five",
            CounterOptions {
                start_value: Scalar::Number(10.0).into(),
                count_by: CountBy::Step(5.0),
                ..CounterOptions::default()
            },
        )
        .expect("by_five");
        calc.counter_column(
            "doubling",
            CounterOptions {
                start_value: Scalar::Number(1.0).into(),
                count_by: CountBy::Function(Arc::new(|value: &Scalar| {
                    value.arithmetic(tc_types::ArithmeticOp::Mul, &Scalar::Number(2.0))
                })),
                ..CounterOptions::default()
            },
        )
        .expect("doubling");
        calc.counter_column(
            "text",
            CounterOptions {
                start_value: Scalar::from("a").into(),
                ..CounterOptions::default()
            },
        )
        .expect("text");

        assert_eq!(
            column(&calc, "by_five"),
            vec![Scalar::Number(15.0), Scalar::Number(20.0), Scalar::Number(25.0)]
        );
        assert_eq!(
            column(&calc, "doubling"),
            vec![Scalar::Number(2.0), Scalar::Number(4.0), Scalar::Number(8.0)]
        );
        assert!(column(&calc, "text").iter().all(Scalar::is_nan));
    }

    #[test]
    fn count_when_expression_gates_counting() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.counter_column(
            "seen_b",
            CounterOptions {
                count_when: Predicate::expression("{b}").expect("predicate"),
                ..CounterOptions::default()
            },
        )
        .expect("counter");
        assert_eq!(
            column(&calc, "seen_b"),
            vec![Scalar::Number(1.0), Scalar::Number(1.0), Scalar::Number(2.0)]
        );
    }

    #[test]
    fn policy_with_once_reset_counts_up() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.computed_column_with(
            "count",
            Computable::Literal(Scalar::Number(0.0)),
            Some(EvaluationPolicy {
                reset_when: Predicate::Once,
                count_when: Predicate::Always,
                count_by: CountBy::Increment,
            }),
        )
        .expect("count");
        assert_eq!(
            column(&calc, "count"),
            vec![Scalar::Number(1.0), Scalar::Number(2.0), Scalar::Number(3.0)]
        );
    }

    #[test]
    fn never_reset_policy_stays_blank() {
        let mut calc = ColumnCalculator::with_data(sample());
        calc.computed_column_with(
            "never",
            Computable::Expression(tc_expr::parse_expr("{a}").expect("expr")),
            Some(EvaluationPolicy {
                reset_when: Predicate::expression("''").expect("predicate"),
                ..EvaluationPolicy::default()
            }),
        )
        .expect("never");
        assert_eq!(column(&calc, "never"), vec![Scalar::Blank; 3]);
    }

    #[test]
    fn sort_expression_sets_numeric_sort_keys() {
        let mut calc = ColumnCalculator::with_data(sample());
        assert_eq!(calc.sort_expression(), "1");
        calc.set_sort_expression("0 - {a}").expect("sort");
        assert_eq!(calc.sort_expression(), "(0 - {a})");
        let keys = calc
            .rows()
            .expect("rows")
            .map(|row| row.sort_key().clone())
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![Scalar::Number(-1.0), Scalar::Number(-2.0), Scalar::Number(-3.0)]
        );
    }

    #[test]
    fn registration_invalidates_materialized_table() {
        let mut calc = ColumnCalculator::with_data(sample());
        assert_eq!(calc.table().expect("first").column_count(), 2);
        calc.computed_column("c", "1").expect("c");
        assert_eq!(calc.table().expect("second").column_count(), 3);
        let owned = calc.into_table().expect("owned");
        assert_eq!(owned.columns(), &["a", "b", "c"]);
    }
}
