use std::io::Write;

use tc_calc::{Filter, TableSource};
use tc_types::Scalar;

use crate::IoError;

/// Layout of a stimulus-times file: one line per run, holding the value
/// column of every kept row in that run.
#[derive(Debug, Clone)]
pub struct StimtimesOptions {
    pub run_column: String,
    /// Runs `1..=runs` each get a line, whether or not any row names them.
    pub runs: usize,
    pub value_column: String,
    pub filter: Filter,
}

impl StimtimesOptions {
    /// Keep every row.
    #[must_use]
    pub fn new(run_column: &str, runs: usize, value_column: &str) -> Self {
        Self {
            run_column: run_column.to_owned(),
            runs,
            value_column: value_column.to_owned(),
            filter: Filter::all(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// Zero-based line for a run cell. `" 2 "`, `"2"` and `2.0` all name run 2.
fn run_line(run: &Scalar, runs: usize) -> Option<usize> {
    let run = run.clone().magic_cast().to_string().parse::<usize>().ok()?;
    (1..=runs).contains(&run).then(|| run - 1)
}

/// Write the kept rows' values grouped by run. A run's line is its values
/// separated by spaces and closed with ` *`; a run without rows is `**`.
/// Rows whose run is outside `1..=runs` are left out.
pub fn write_stimtimes<S, W>(source: &S, mut writer: W, options: &StimtimesOptions) -> Result<(), IoError>
where
    S: TableSource + ?Sized,
    W: Write,
{
    let table = source.table()?;
    let mut lines = vec![Vec::new(); options.runs];
    for row in table.rows() {
        if !options.filter.matches(row)? {
            continue;
        }
        let Some(line) = run_line(row.get(options.run_column.as_str())?, options.runs) else {
            continue;
        };
        lines[line].push(row.get(options.value_column.as_str())?.to_string());
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        runs = options.runs,
        values = lines.iter().map(Vec::len).sum::<usize>(),
        "writing stimulus times"
    );

    for values in &lines {
        if values.is_empty() {
            writeln!(writer, "**")?;
        } else {
            writeln!(writer, "{} *", values.join(" "))?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_stimtimes_string<S>(source: &S, options: &StimtimesOptions) -> Result<String, IoError>
where
    S: TableSource + ?Sized,
{
    let mut buffer = Vec::new();
    write_stimtimes(source, &mut buffer, options)?;
    Ok(String::from_utf8(buffer)?)
}
