use std::cell::OnceCell;

use tc_expr::{Expr, ExprError, ExpressionParser};
use tc_table::Table;

use crate::calculator::{ColumnCalculator, Computable};
use crate::filter::{Filter, RowFilter};
use crate::{CalcError, TableSource};

/// One independent transformation of the source: computed columns, a sort
/// expression, then a filter.
#[derive(Debug, Clone)]
pub struct Pass {
    parser: ExpressionParser,
    sort_expression: Expr,
    filter: Filter,
    computed_columns: Vec<(String, Expr)>,
}

impl Default for Pass {
    fn default() -> Self {
        Self {
            parser: ExpressionParser::new(),
            sort_expression: Expr::NumberLiteral {
                text: "1".to_owned(),
            },
            filter: Filter::all(),
            computed_columns: Vec::new(),
        }
    }
}

impl Pass {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sort_expression(&mut self, expression: &str) -> Result<&mut Self, ExprError> {
        self.sort_expression = self.parser.parse(expression)?;
        Ok(self)
    }

    pub fn set_filter(&mut self, filter: Filter) -> &mut Self {
        self.filter = filter;
        self
    }

    pub fn computed_column(&mut self, name: &str, expression: &str) -> Result<&mut Self, ExprError> {
        let expr = self.parser.parse(expression)?;
        self.computed_columns.push((name.to_owned(), expr));
        Ok(self)
    }

    #[must_use]
    pub fn sort_expression(&self) -> &Expr {
        &self.sort_expression
    }

    #[must_use]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    fn run(&self, source: &Table) -> Result<Table, CalcError> {
        let mut calculator = ColumnCalculator::with_data(source.clone());
        calculator.set_sort_expr(self.sort_expression.clone());
        for (name, expr) in &self.computed_columns {
            calculator.computed_column_with(name, Computable::Expression(expr.clone()), None)?;
        }
        let filtered = RowFilter::new(calculator, self.filter.clone());
        Ok(filtered.table()?.clone())
    }
}

/// Runs every pass over the same source, concatenates the results and
/// stable-sorts them by sort key. With no passes, one identity pass runs.
#[derive(Debug)]
pub struct Multipasser<S> {
    source: S,
    passes: Vec<Pass>,
    materialized: OnceCell<Table>,
}

impl<S: TableSource> Multipasser<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            passes: Vec::new(),
            materialized: OnceCell::new(),
        }
    }

    pub fn add_pass(&mut self, pass: Pass) -> &mut Self {
        self.passes.push(pass);
        self.materialized = OnceCell::new();
        self
    }

    #[must_use]
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn source_mut(&mut self) -> &mut S {
        self.materialized = OnceCell::new();
        &mut self.source
    }

    fn materialize(&self) -> Result<Table, CalcError> {
        let source = self.source.table()?;
        let identity = [Pass::default()];
        let passes = if self.passes.is_empty() {
            &identity[..]
        } else {
            &self.passes[..]
        };

        let mut output = Table::new();
        for pass in passes {
            let result = pass.run(source)?;
            output.merge_in_place(&[&result]);
        }
        output.sort_by_sort_key();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            passes = passes.len(),
            rows = output.len(),
            "materialized multipass table"
        );
        Ok(output)
    }
}

impl<S: TableSource> TableSource for Multipasser<S> {
    fn table(&self) -> Result<&Table, CalcError> {
        if let Some(table) = self.materialized.get() {
            return Ok(table);
        }
        let table = self.materialize()?;
        Ok(self.materialized.get_or_init(|| table))
    }
}

#[cfg(test)]
mod tests {
    use tc_expr::parse_expr;
    use tc_table::Table;
    use tc_types::Scalar;

    use super::{Multipasser, Pass};
    use crate::{Filter, TableSource};

    fn trials() -> Table {
        let mut table = Table::new();
        for (trial, onset, offset) in [("1", "100", "150"), ("2", "300", "420"), ("3", "500", "530")] {
            let mut row = table.add_row();
            row.set("trial", trial).expect("trial");
            row.set("onset", onset).expect("onset");
            row.set("offset", offset).expect("offset");
        }
        table
    }

    fn column(table: &Table, name: &str) -> Vec<String> {
        table
            .rows()
            .map(|row| row.get(name).expect("column").to_string())
            .collect()
    }

    #[test]
    fn no_passes_is_identity() {
        let multi = Multipasser::new(trials());
        let table = multi.table().expect("identity");
        assert_eq!(table.columns(), &["trial", "onset", "offset"]);
        assert_eq!(column(table, "trial"), vec!["1", "2", "3"]);
    }

    #[test]
    fn passes_interleave_by_sort_key() {
        let mut onsets = Pass::new();
        onsets
            .set_sort_expression("{onset}")
            .expect("sort")
            .computed_column("time", "{onset}")
            .expect("time")
            .computed_column("event", "'on'")
            .expect("event");
        let mut offsets = Pass::new();
        offsets
            .set_sort_expression("{offset}")
            .expect("sort")
            .computed_column("time", "{offset}")
            .expect("time")
            .computed_column("event", "'off'")
            .expect("event");

        let mut multi = Multipasser::new(trials());
        multi.add_pass(onsets).add_pass(offsets);
        let table = multi.table().expect("multipass");

        assert_eq!(table.len(), 6);
        assert_eq!(table.columns(), &["trial", "onset", "offset", "time", "event"]);
        assert_eq!(
            column(table, "time"),
            vec!["100", "150", "300", "420", "500", "530"]
        );
        assert_eq!(
            column(table, "event"),
            vec!["on", "off", "on", "off", "on", "off"]
        );
        assert_eq!(
            table.row(5).expect("row").sort_key(),
            &Scalar::Number(530.0)
        );
    }

    #[test]
    fn pass_filters_apply_after_computation() {
        let mut long_only = Pass::new();
        long_only
            .computed_column("duration", "{offset} - {onset}")
            .expect("duration")
            .set_filter(Filter::Compiled(parse_expr("{duration} > 50").expect("filter")));

        let mut multi = Multipasser::new(trials());
        multi.add_pass(long_only);
        let table = multi.table().expect("multipass");
        assert_eq!(column(table, "trial"), vec!["2"]);
        assert_eq!(column(table, "duration"), vec!["120"]);
    }
}
