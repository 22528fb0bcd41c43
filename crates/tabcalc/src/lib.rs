#![forbid(unsafe_code)]

//! Computed, copydown and counter columns over tables read from E-Prime
//! style exports.
//!
//! ```
//! use tabcalc::{ColumnCalculator, Table};
//!
//! let mut data = Table::new();
//! let mut row = data.add_row();
//! row.set("onset", "1200")?;
//! row.set("start", "1000")?;
//!
//! let mut calc = ColumnCalculator::with_data(data);
//! calc.computed_column("offset", "{onset} - {start}")?;
//! assert_eq!(calc.row(0)?.get("offset")?.to_string(), "200");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use tc_calc::{
    CalcError, ColumnCalculator, Computable, CountBy, CounterOptions, EvaluationPolicy, Filter,
    Multipasser, Pass, Predicate, RowFilter, StartValue, TableSource, Transformer,
};
pub use tc_expr::{Environment, Expr, ExprError, ExpressionParser, RowValues, parse_expr};
pub use tc_io::{
    FileKind, IoError, LogReadOptions, StimtimesOptions, TabReadOptions, TabWriteOptions, decode,
    detect_kind, read_log_str, read_path, read_str, read_tab_str, write_stimtimes,
    write_stimtimes_string, write_tab, write_tab_string,
};
pub use tc_runner::{RunOptions, RunReport, RunnerError, Template, run};
pub use tc_table::{ColumnAddedWarning, ColumnId, RowMut, RowRef, Table, TableError};
pub use tc_types::{DType, Scalar, TypeError};

pub mod calc {
    pub use tc_calc::*;
}

pub mod expr {
    pub use tc_expr::*;
}

pub mod io {
    pub use tc_io::*;
}

pub mod runner {
    pub use tc_runner::*;
}
