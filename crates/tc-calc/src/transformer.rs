use std::cell::OnceCell;

use tc_expr::{Expr, ExpressionParser};
use tc_table::Table;

use crate::calculator::{ColumnCalculator, Computable, CounterOptions, EvaluationPolicy};
use crate::filter::{Filter, RowFilter};
use crate::multipass::{Multipasser, Pass};
use crate::{CalcError, TableSource};

#[derive(Debug, Clone)]
enum ColumnDef {
    Computed(String, Computable, Option<EvaluationPolicy>),
    Copydown(String, String),
    Counter(String, CounterOptions),
}

/// The whole pipeline in one place: derived columns, then a row filter,
/// then passes. Any change drops the processed table.
#[derive(Debug, Default)]
pub struct Transformer {
    parser: ExpressionParser,
    data: Table,
    /// Registration order.
    columns: Vec<ColumnDef>,
    row_filter: Filter,
    passes: Vec<Pass>,
    processed: OnceCell<Table>,
}

impl Transformer {
    #[must_use]
    pub fn new(data: Table) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn set_data(&mut self, data: Table) -> &mut Self {
        self.data = data;
        self.reset()
    }

    pub fn computed_column(&mut self, name: &str, expression: &str) -> Result<&mut Self, CalcError> {
        let expr = self.parser.parse(expression)?;
        Ok(self.computed_column_with(name, Computable::Expression(expr), None))
    }

    pub fn computed_column_with(
        &mut self,
        name: &str,
        computable: Computable,
        policy: Option<EvaluationPolicy>,
    ) -> &mut Self {
        self.columns
            .push(ColumnDef::Computed(name.to_owned(), computable, policy));
        self.reset()
    }

    pub fn copydown_column(&mut self, name: &str, source: &str) -> &mut Self {
        self.columns
            .push(ColumnDef::Copydown(name.to_owned(), source.to_owned()));
        self.reset()
    }

    pub fn counter_column(&mut self, name: &str, options: CounterOptions) -> &mut Self {
        self.columns
            .push(ColumnDef::Counter(name.to_owned(), options));
        self.reset()
    }

    pub fn set_row_filter(&mut self, filter: Filter) -> &mut Self {
        self.row_filter = filter;
        self.reset()
    }

    /// Keep rows where `expression` is truthy.
    pub fn set_row_filter_expression(&mut self, expression: &str) -> Result<&mut Self, CalcError> {
        let expr: Expr = self.parser.parse(expression)?;
        Ok(self.set_row_filter(Filter::Compiled(expr)))
    }

    pub fn add_pass(&mut self, pass: Pass) -> &mut Self {
        self.passes.push(pass);
        self.reset()
    }

    /// Consume the transformer, returning the processed table.
    pub fn into_table(mut self) -> Result<Table, CalcError> {
        match self.processed.take() {
            Some(table) => Ok(table),
            None => self.process(),
        }
    }

    fn reset(&mut self) -> &mut Self {
        self.processed = OnceCell::new();
        self
    }

    fn process(&self) -> Result<Table, CalcError> {
        let mut calculator = ColumnCalculator::with_data(self.data.clone());
        for column in &self.columns {
            match column {
                ColumnDef::Computed(name, computable, policy) => {
                    calculator.computed_column_with(name, computable.clone(), policy.clone())?
                }
                ColumnDef::Copydown(name, source) => calculator.copydown_column(name, source)?,
                ColumnDef::Counter(name, options) => {
                    calculator.counter_column(name, options.clone())?
                }
            };
        }

        let filtered = RowFilter::new(calculator, self.row_filter.clone());
        let mut multi = Multipasser::new(filtered);
        for pass in &self.passes {
            multi.add_pass(pass.clone());
        }
        Ok(multi.table()?.clone())
    }
}

impl TableSource for Transformer {
    fn table(&self) -> Result<&Table, CalcError> {
        if let Some(table) = self.processed.get() {
            return Ok(table);
        }
        let table = self.process()?;
        Ok(self.processed.get_or_init(|| table))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tc_expr::RowValues;
    use tc_table::Table;
    use tc_types::Scalar;

    use super::Transformer;
    use crate::{CalcError, Computable, CounterOptions, Pass, TableSource};

    fn blocks() -> Table {
        let mut table = Table::new();
        for (block, rt) in [("A", "400"), ("", "520"), ("B", "380"), ("", "")] {
            let mut row = table.add_row();
            row.set("block", block).expect("block");
            row.set("rt", rt).expect("rt");
        }
        table
    }

    #[test]
    fn pipeline_runs_calculator_filter_and_passes() {
        let mut transformer = Transformer::new(blocks());
        transformer
            .copydown_column("block_name", "block")
            .counter_column("trial", CounterOptions::default())
            .computed_column("slow", "{rt} > 390")
            .expect("slow");
        transformer
            .set_row_filter_expression("{rt}")
            .expect("filter");

        let table = transformer.table().expect("process");
        assert_eq!(
            table.columns(),
            &["block", "rt", "slow", "block_name", "trial"]
        );
        let summary = table
            .rows()
            .map(|row| {
                format!(
                    "{}:{}:{}",
                    row.get("block_name").expect("block_name"),
                    row.get("trial").expect("trial"),
                    row.get("slow").expect("slow")
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(summary, vec!["A:1:true", "A:2:true", "B:3:false"]);
    }

    #[test]
    fn functions_see_columns_registered_before_them() {
        let mut transformer = Transformer::new(blocks());
        transformer
            .counter_column("trial", CounterOptions::default())
            .computed_column_with(
                "label",
                Computable::Function(Arc::new(|row: &dyn RowValues| {
                    Scalar::from(format!("t{}", row.value("trial").unwrap_or_default()))
                })),
                None,
            );
        let table = transformer.table().expect("process");
        let labels = table
            .rows()
            .map(|row| row.get("label").expect("label").to_string())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["t1", "t2", "t3", "t4"]);
    }

    #[test]
    fn passes_see_filtered_rows() {
        let mut pass = Pass::new();
        pass.computed_column("double", "{rt} * 2").expect("double");
        let mut transformer = Transformer::new(blocks());
        transformer
            .set_row_filter_expression("{rt}")
            .expect("filter")
            .add_pass(pass);

        let table = transformer.table().expect("process");
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.row(1).expect("row").get("double").expect("double").to_string(),
            "1040"
        );
    }

    #[test]
    fn into_table_reuses_or_builds_the_result() {
        let mut transformer = Transformer::new(blocks());
        transformer.computed_column("fast", "{rt} < 400").expect("fast");
        let built = transformer.into_table().expect("built");
        assert_eq!(built.len(), 4);

        let mut transformer = Transformer::new(blocks());
        transformer.computed_column("fast", "{rt} < 400").expect("fast");
        let cached = transformer.table().expect("cached").clone();
        assert_eq!(transformer.into_table().expect("taken"), cached);
    }

    #[test]
    fn duplicate_names_surface_when_processing() {
        let mut transformer = Transformer::new(blocks());
        transformer.copydown_column("rt", "block");
        assert_eq!(
            transformer.table().map(|_| ()),
            Err(CalcError::DuplicateColumn("rt".to_owned()))
        );
    }
}
