#![forbid(unsafe_code)]

pub mod calculator;
pub mod filter;
pub mod multipass;
pub mod transformer;

pub use calculator::{
    ColumnCalculator, Computable, CountBy, CounterOptions, EvaluationPolicy, Predicate,
    RowFunction, RowPredicate, StartValue, StepFunction,
};
pub use filter::{Filter, RowFilter};
pub use multipass::{Multipasser, Pass};
pub use transformer::Transformer;

use tc_expr::ExprError;
use tc_table::{Table, TableError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("column {0:?} already exists")]
    DuplicateColumn(String),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Anything that can hand out a fully materialized table.
pub trait TableSource {
    fn table(&self) -> Result<&Table, CalcError>;
}

impl TableSource for Table {
    fn table(&self) -> Result<&Table, CalcError> {
        Ok(self)
    }
}
