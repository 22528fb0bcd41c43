use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tc_calc::{
    Computable, CountBy, CounterOptions, EvaluationPolicy, Filter, Pass, Predicate, Transformer,
};
use tc_expr::{ExprError, parse_expr};
use tc_io::StimtimesOptions;
use tc_table::Table;
use tc_types::Scalar;

use crate::RunnerError;

/// A YAML description of one pipeline run.
///
/// ```yaml
/// computed_columns:
///   - name: stim_offset
///     expression: "{stim_time} - {run_start}"
/// copydown_columns:
///   - name: block_name
///     source: BlockTitle
/// counter_columns:
///   - name: trial
///     reset_when: "{BlockTitle}"
/// row_filter: "{Stim.RT} > 0"
/// passes:
///   - sort_expression: "{stim_onset}"
///     computed_columns:
///       - name: event
///         expression: "'onset'"
/// stimtimes:
///   - outfile: faces.1D
///     run_column: run
///     runs: 4
///     value_column: stim_offset
///     row_filter: "{condition} = 'faces'"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Template {
    pub computed_columns: Vec<ComputedColumnSpec>,
    pub copydown_columns: Vec<CopydownColumnSpec>,
    pub counter_columns: Vec<CounterColumnSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<String>,
    pub passes: Vec<PassSpec>,
    /// Stimulus-times files written from the processed table.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stimtimes: Vec<StimtimesSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputedColumnSpec {
    pub name: String,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_when: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopydownColumnSpec {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterColumnSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_value: Option<f64>,
    /// Step added on each count; one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_by: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_when: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PassSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<String>,
    pub computed_columns: Vec<PassColumnSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PassColumnSpec {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StimtimesSpec {
    pub outfile: PathBuf,
    pub run_column: String,
    pub runs: usize,
    pub value_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<String>,
}

impl StimtimesSpec {
    pub fn options(&self) -> Result<StimtimesOptions, ExprError> {
        let options = StimtimesOptions::new(&self.run_column, self.runs, &self.value_column);
        Ok(match &self.row_filter {
            Some(filter) => options.with_filter(Filter::Compiled(parse_expr(filter)?)),
            None => options,
        })
    }
}

/// `always`, `never` and `once` name the fixed predicates; anything else
/// is an expression tested for truthiness.
pub fn parse_predicate(text: &str) -> Result<Predicate, ExprError> {
    match text.trim() {
        "always" => Ok(Predicate::Always),
        "never" => Ok(Predicate::Never),
        "once" => Ok(Predicate::Once),
        expression => Predicate::expression(expression),
    }
}

fn predicate_or(text: Option<&str>, default: Predicate) -> Result<Predicate, ExprError> {
    text.map_or(Ok(default), parse_predicate)
}

impl Template {
    pub fn from_yaml_str(text: &str) -> Result<Self, RunnerError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, RunnerError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Build the pipeline this template describes over `data`. Every
    /// expression is parsed here, so syntax errors surface before any row
    /// is processed.
    pub fn transformer(&self, data: Table) -> Result<Transformer, RunnerError> {
        let mut transformer = Transformer::new(data);

        for spec in &self.computed_columns {
            if spec.reset_when.is_none() && spec.count_when.is_none() {
                transformer.computed_column(&spec.name, &spec.expression)?;
                continue;
            }
            let policy = EvaluationPolicy {
                reset_when: predicate_or(spec.reset_when.as_deref(), Predicate::Always)?,
                count_when: predicate_or(spec.count_when.as_deref(), Predicate::Never)?,
                count_by: CountBy::Increment,
            };
            transformer.computed_column_with(
                &spec.name,
                Computable::Expression(parse_expr(&spec.expression)?),
                Some(policy),
            );
        }

        for spec in &self.copydown_columns {
            transformer.copydown_column(&spec.name, &spec.source);
        }

        for spec in &self.counter_columns {
            let defaults = CounterOptions::default();
            let options = CounterOptions {
                start_value: spec
                    .start_value
                    .map_or(defaults.start_value, |value| Scalar::from(value).into()),
                count_by: spec.count_by.map_or(defaults.count_by, CountBy::Step),
                count_when: predicate_or(spec.count_when.as_deref(), defaults.count_when)?,
                reset_when: predicate_or(spec.reset_when.as_deref(), defaults.reset_when)?,
            };
            transformer.counter_column(&spec.name, options);
        }

        if let Some(filter) = &self.row_filter {
            transformer.set_row_filter_expression(filter)?;
        }

        for spec in &self.passes {
            transformer.add_pass(spec.pass()?);
        }
        Ok(transformer)
    }
}

impl PassSpec {
    pub fn pass(&self) -> Result<Pass, ExprError> {
        let mut pass = Pass::new();
        if let Some(sort) = &self.sort_expression {
            pass.set_sort_expression(sort)?;
        }
        if let Some(filter) = &self.row_filter {
            pass.set_filter(Filter::Compiled(parse_expr(filter)?));
        }
        for column in &self.computed_columns {
            pass.computed_column(&column.name, &column.expression)?;
        }
        Ok(pass)
    }
}
