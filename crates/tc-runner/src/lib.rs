#![forbid(unsafe_code)]

pub mod template;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tc_calc::CalcError;
use tc_expr::ExprError;
use tc_io::{IoError, StimtimesOptions, TabWriteOptions};
use tc_table::Table;
use thiserror::Error;

pub use template::{
    ComputedColumnSpec, CopydownColumnSpec, CounterColumnSpec, PassColumnSpec, PassSpec,
    StimtimesSpec, Template, parse_predicate,
};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Calc(#[from] CalcError),
    #[error("{}: {source}", .path.display())]
    Input { path: PathBuf, source: IoError },
    #[error(transparent)]
    Output(#[from] IoError),
    #[error("no input files given")]
    NoInputs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub template: PathBuf,
    pub inputs: Vec<PathBuf>,
    /// Standard output when `None`.
    pub outfile: Option<PathBuf>,
    pub column_labels: bool,
}

impl RunOptions {
    #[must_use]
    pub fn new(template: impl Into<PathBuf>, inputs: Vec<PathBuf>) -> Self {
        Self {
            template: template.into(),
            inputs,
            outfile: None,
            column_labels: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSummary {
    pub path: PathBuf,
    pub rows: usize,
}

/// What a run read and wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub inputs: Vec<InputSummary>,
    pub rows: usize,
    pub columns: usize,
    /// Stimulus-times files written, in template order.
    pub stimtimes: Vec<PathBuf>,
}

/// Read every input (format detected per file) and stack the rows in
/// order, unioning the columns.
pub fn read_inputs(paths: &[PathBuf]) -> Result<(Table, Vec<InputSummary>), RunnerError> {
    if paths.is_empty() {
        return Err(RunnerError::NoInputs);
    }
    let mut merged = Table::new();
    let mut summaries = Vec::with_capacity(paths.len());
    for path in paths {
        let table = tc_io::read_path(path).map_err(|source| RunnerError::Input {
            path: path.clone(),
            source,
        })?;
        summaries.push(InputSummary {
            path: path.clone(),
            rows: table.len(),
        });
        merged.merge_in_place(&[&table]);
    }
    Ok((merged, summaries))
}

/// Apply `template` to the inputs.
pub fn process(
    template: &Template,
    inputs: &[PathBuf],
) -> Result<(Table, Vec<InputSummary>), RunnerError> {
    let (data, summaries) = read_inputs(inputs)?;
    let table = template.transformer(data)?.into_table()?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        inputs = summaries.len(),
        rows = table.len(),
        columns = table.column_count(),
        "processed inputs"
    );
    Ok((table, summaries))
}

/// Apply `template` to the inputs and write the result to `writer`.
pub fn run_template<W: Write>(
    template: &Template,
    inputs: &[PathBuf],
    column_labels: bool,
    writer: W,
) -> Result<RunReport, RunnerError> {
    let (table, summaries) = process(template, inputs)?;
    write_report(&table, summaries, column_labels, writer)
}

fn write_report<W: Write>(
    table: &Table,
    inputs: Vec<InputSummary>,
    column_labels: bool,
    writer: W,
) -> Result<RunReport, RunnerError> {
    tc_io::write_tab(table, writer, &TabWriteOptions { column_labels })?;
    Ok(RunReport {
        inputs,
        rows: table.len(),
        columns: table.column_count(),
        stimtimes: Vec::new(),
    })
}

fn create(path: &Path) -> Result<BufWriter<File>, RunnerError> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Load the template, process the inputs, and write to the outfile or
/// standard output, then write the template's stimulus-times files. No file
/// is created until processing succeeded.
pub fn run(options: &RunOptions) -> Result<RunReport, RunnerError> {
    let template = Template::load(&options.template)?;
    let stimtimes = template
        .stimtimes
        .iter()
        .map(|spec| spec.options().map(|parsed| (spec.outfile.as_path(), parsed)))
        .collect::<Result<Vec<(&Path, StimtimesOptions)>, _>>()?;
    let (table, summaries) = process(&template, &options.inputs)?;

    let mut report = match &options.outfile {
        Some(path) => {
            let mut writer = create(path)?;
            let report = write_report(&table, summaries, options.column_labels, &mut writer)?;
            writer.flush()?;
            report
        }
        None => write_report(&table, summaries, options.column_labels, io::stdout().lock())?,
    };
    for (path, stimtimes_options) in stimtimes {
        tc_io::write_stimtimes(&table, create(path)?, &stimtimes_options)?;
        report.stimtimes.push(path.to_path_buf());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{RunnerError, Template, read_inputs, run_template};

    #[test]
    fn no_inputs_is_an_error() {
        assert!(matches!(read_inputs(&[]), Err(RunnerError::NoInputs)));
    }

    #[test]
    fn unreadable_inputs_name_the_file() {
        let missing = PathBuf::from("/nonexistent/tabcalc/input.txt");
        let error = run_template(
            &Template::default(),
            std::slice::from_ref(&missing),
            true,
            Vec::new(),
        )
        .expect_err("missing input");
        assert!(matches!(&error, RunnerError::Input { path, .. } if *path == missing));
        assert!(error.to_string().starts_with("/nonexistent/tabcalc/input.txt: "));
    }
}
