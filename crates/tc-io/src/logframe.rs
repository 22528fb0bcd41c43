use std::collections::{BTreeMap, BTreeSet};

use tc_table::Table;
use tc_types::Scalar;

use crate::{HEADER_START, IoError, strip_bom};

const HEADER_END: &str = "*** Header End ***";
const FRAME_START: &str = "*** LogFrame Start ***";
const FRAME_END: &str = "*** LogFrame End ***";
const LEVEL_KEY: &str = "Level";
const LEVEL_NAME_KEY: &str = "LevelName";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogReadOptions {
    /// Fixed column list for the output table, in order.
    pub columns: Option<Vec<String>>,
    /// Ignore column-added warnings and drop an unclosed trailing frame.
    pub force: bool,
}

#[derive(Debug, Default)]
struct Frame {
    level: usize,
    parent: Option<usize>,
    fields: Vec<(String, Scalar)>,
}

impl Frame {
    fn set(&mut self, key: &str, value: Scalar) {
        upsert(&mut self.fields, key, value);
    }
}

fn upsert(fields: &mut Vec<(String, Scalar)>, key: &str, value: Scalar) {
    match fields.iter_mut().find(|(name, _)| name == key) {
        Some((_, slot)) => *slot = value,
        None => fields.push((key.to_owned(), value)),
    }
}

/// `key: value` with any spaces after the colon dropped. Lines without a
/// colon come back with no value.
fn split_line(line: &str) -> (&str, Option<&str>) {
    match line.split_once(':') {
        Some((key, value)) => (key, Some(value.trim_start_matches(' '))),
        None => (line, None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    Header,
    InFrame { start_line: usize },
}

struct Parsed {
    levels: Vec<String>,
    top_level: usize,
    frames: Vec<Frame>,
}

fn parse_frames(text: &str, force: bool) -> Result<Parsed, IoError> {
    let mut levels = vec![String::new()];
    let mut top_level = 0;
    let mut frames = Vec::new();
    let mut frame = Frame::default();
    let mut state = State::Outside;

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = split_line(line);
        match state {
            State::Outside => {
                if key == HEADER_START {
                    state = State::Header;
                } else if key == FRAME_START {
                    state = State::InFrame {
                        start_line: index + 1,
                    };
                } else if key == LEVEL_KEY {
                    frame.level = value.and_then(|v| v.trim().parse().ok()).unwrap_or(0);
                    top_level = top_level.max(frame.level);
                }
            }
            State::Header => {
                if key == HEADER_END {
                    state = State::Outside;
                } else if key == LEVEL_NAME_KEY {
                    levels.push(value.unwrap_or_default().to_owned());
                }
            }
            State::InFrame { .. } => {
                if key == FRAME_END {
                    frames.push(std::mem::take(&mut frame));
                    state = State::Outside;
                } else if let Some(value) = value {
                    let key = if key == "Experiment" {
                        "ExperimentName"
                    } else {
                        key
                    };
                    frame.set(key, Scalar::from(value));
                }
            }
        }
    }

    if let State::InFrame { start_line } = state {
        if !force {
            return Err(IoError::DamagedFile {
                line: start_line,
                message: "last frame never closed".to_owned(),
            });
        }
        #[cfg(feature = "tracing")]
        tracing::warn!(line = start_line, "dropping unclosed trailing frame");
    }

    Ok(Parsed {
        levels,
        top_level,
        frames,
    })
}

fn level_name(levels: &[String], level: usize) -> &str {
    levels.get(level).map_or("", String::as_str)
}

/// Each frame's parent is the nearest later frame one level up.
fn set_parents(frames: &mut [Frame]) {
    let mut latest: BTreeMap<usize, usize> = BTreeMap::new();
    for index in (0..frames.len()).rev() {
        let level = frames[index].level;
        latest.insert(level, index);
        frames[index].parent = level
            .checked_sub(1)
            .and_then(|above| latest.get(&above).copied());
    }
}

/// Numbers frames within their parent, naming the counter after the level.
fn set_counters(frames: &mut [Frame], levels: &[String]) {
    let mut counts: BTreeMap<usize, u32> = BTreeMap::new();
    for frame in frames.iter_mut() {
        let count = counts.entry(frame.level).or_insert(0);
        *count += 1;
        let count = *count;
        counts.retain(|&level, _| level <= frame.level);

        let name = level_name(levels, frame.level);
        if !name.is_empty() {
            frame.set(name, Scalar::Number(f64::from(count)));
        }
    }
}

/// Own fields followed by everything inherited. Keys present in both the
/// frame and its ancestry land in `ambiguous` and are qualified with the
/// level names instead.
fn frame_columns(
    frames: &[Frame],
    levels: &[String],
    index: usize,
    ambiguous: &mut BTreeSet<String>,
) -> Vec<(String, Scalar)> {
    let frame = &frames[index];
    let mut columns = frame.fields.clone();
    let Some(parent) = frame.parent else {
        return columns;
    };
    let own_level = level_name(levels, frame.level);
    let parent_level = level_name(levels, frames[parent].level);

    for (key, inherited) in frame_columns(frames, levels, parent, ambiguous) {
        match frame.fields.iter().find(|(name, _)| *name == key) {
            Some((_, own)) => {
                upsert(&mut columns, &format!("{key}[{own_level}]"), own.clone());
                upsert(&mut columns, &format!("{key}[{parent_level}]"), inherited);
                ambiguous.insert(key);
            }
            None => upsert(&mut columns, &key, inherited),
        }
    }
    columns
}

/// Read a log-frame file: one row per frame at the deepest level, with the
/// fields of every enclosing frame and a counter per named level.
pub fn read_log_str(text: &str, options: &LogReadOptions) -> Result<Table, IoError> {
    let Parsed {
        levels,
        top_level,
        mut frames,
    } = parse_frames(strip_bom(text), options.force)?;
    set_parents(&mut frames);
    set_counters(&mut frames, &levels);

    let mut table = match &options.columns {
        Some(columns) => Table::with_columns(columns, options.force),
        None => Table::new(),
    };
    for index in (0..frames.len()).filter(|&index| frames[index].level == top_level) {
        let mut ambiguous = BTreeSet::new();
        let columns = frame_columns(&frames, &levels, index, &mut ambiguous);
        let mut row = table.add_row();
        for (key, value) in columns {
            if ambiguous.contains(&key) {
                continue;
            }
            row.set(key.as_str(), value)?;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        frames = frames.len(),
        levels = levels.len() - 1,
        rows = table.len(),
        "read log frames"
    );
    Ok(table)
}
