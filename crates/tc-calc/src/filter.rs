use std::cell::OnceCell;
use std::fmt;
use std::sync::Arc;

use tc_expr::{Environment, Expr, RowValues};
use tc_table::{RowRef, Table};
use tc_types::Scalar;

use crate::{CalcError, TableSource};

/// Which rows a [`RowFilter`] keeps.
#[derive(Clone)]
pub enum Filter {
    Predicate(Arc<dyn Fn(RowRef<'_>) -> bool>),
    /// Keeps rows whose `column` displays the same as `value`.
    Equals { column: String, value: Scalar },
    /// Keeps rows where the expression is truthy.
    Compiled(Expr),
}

impl Filter {
    /// A filter that keeps every row.
    #[must_use]
    pub fn all() -> Self {
        Self::Predicate(Arc::new(|_: RowRef<'_>| true))
    }

    pub fn equals(column: &str, value: impl Into<Scalar>) -> Self {
        Self::Equals {
            column: column.to_owned(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: RowRef<'_>) -> Result<bool, CalcError> {
        match self {
            Self::Predicate(predicate) => Ok(predicate(row)),
            Self::Equals { column, value } => Ok(row.get(column)?.to_string() == value.to_string()),
            Self::Compiled(expr) => Ok(expr.evaluate(&mut RowView(row))?.truthy()),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Equals { column, value } => f
                .debug_struct("Equals")
                .field("column", column)
                .field("value", value)
                .finish(),
            Self::Compiled(expr) => f.debug_tuple("Compiled").field(&expr.to_string()).finish(),
        }
    }
}

struct RowView<'a>(RowRef<'a>);

impl RowValues for RowView<'_> {
    fn value(&self, column: &str) -> Option<Scalar> {
        self.0.get(column).ok().cloned()
    }
}

impl Environment for RowView<'_> {}

/// Lazily filtered copy of a source table. Rows keep their sort keys.
#[derive(Debug)]
pub struct RowFilter<S> {
    source: S,
    filter: Filter,
    materialized: OnceCell<Table>,
}

impl<S: TableSource> RowFilter<S> {
    pub fn new(source: S, filter: Filter) -> Self {
        Self {
            source,
            filter,
            materialized: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access to the source; drops the cached result.
    pub fn source_mut(&mut self) -> &mut S {
        self.materialized = OnceCell::new();
        &mut self.source
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
        self.materialized = OnceCell::new();
    }

    pub fn into_source(self) -> S {
        self.source
    }

    fn materialize(&self) -> Result<Table, CalcError> {
        let source = self.source.table()?;
        let mut output = Table::with_columns(source.columns(), false);
        for row in source.rows() {
            if self.filter.matches(row)? {
                output.push_row(row.values(), row.sort_key().clone())?;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            kept = output.len(),
            dropped = source.len() - output.len(),
            "materialized row filter"
        );
        Ok(output)
    }
}

impl<S: TableSource> TableSource for RowFilter<S> {
    fn table(&self) -> Result<&Table, CalcError> {
        if let Some(table) = self.materialized.get() {
            return Ok(table);
        }
        let table = self.materialize()?;
        Ok(self.materialized.get_or_init(|| table))
    }
}
