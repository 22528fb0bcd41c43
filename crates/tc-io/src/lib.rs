#![forbid(unsafe_code)]

mod logframe;
mod stimtimes;

use std::fs;
use std::io::Write;
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use tc_calc::CalcError;
use tc_table::{Table, TableError, default_sort_key};
use tc_types::Scalar;
use thiserror::Error;

pub use logframe::{LogReadOptions, read_log_str};
pub use stimtimes::{StimtimesOptions, write_stimtimes, write_stimtimes_string};

pub const HEADER_START: &str = "*** Header Start ***";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("damaged file at line {line}: {message}")]
    DamagedFile { line: usize, message: String },
    #[error("cannot determine the file type: {0}")]
    UnknownType(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("input has a UTF-16 byte order mark but is not valid UTF-16")]
    Utf16,
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Calc(#[from] CalcError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Hierarchical `*** LogFrame ***` log.
    Log,
    /// Tab-delimited with one leading file-name line.
    Excel,
    /// Tab-delimited with three leading lines.
    EprimeTab,
    /// Plain tab-delimited with a header line.
    RawTab,
}

impl FileKind {
    /// Lines to skip before the header of a tab-delimited flavor.
    #[must_use]
    pub fn skip_lines(self) -> usize {
        match self {
            Self::Excel => 1,
            Self::EprimeTab => 3,
            Self::Log | Self::RawTab => 0,
        }
    }
}

fn field_count(line: &str) -> usize {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        0
    } else {
        trimmed.split('\t').count()
    }
}

/// Guess the format from a file's first two lines.
#[must_use]
pub fn detect_kind(first: &str, second: &str) -> Option<FileKind> {
    if first.contains(HEADER_START) {
        return Some(FileKind::Log);
    }
    let (first_fields, second_fields) = (field_count(first), field_count(second));
    if !first.contains('\t') && second_fields >= 3 {
        Some(FileKind::Excel)
    } else if first_fields >= 3 && second_fields >= 3 {
        Some(FileKind::EprimeTab)
    } else if first_fields > 1 && first_fields == second_fields {
        Some(FileKind::RawTab)
    } else {
        None
    }
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Decode file contents to text. E-Prime writes its logs as UTF-16LE with a
/// byte order mark; UTF-16 input is recognized by its mark, a UTF-8 mark is
/// dropped, and anything else must be UTF-8.
pub fn decode(mut bytes: Vec<u8>) -> Result<String, IoError> {
    if let Some(body) = bytes.strip_prefix(UTF16LE_BOM) {
        return decode_utf16(body, u16::from_le_bytes);
    }
    if let Some(body) = bytes.strip_prefix(UTF16BE_BOM) {
        return decode_utf16(body, u16::from_be_bytes);
    }
    if bytes.starts_with(UTF8_BOM) {
        bytes.drain(..UTF8_BOM.len());
    }
    Ok(String::from_utf8(bytes)?)
}

fn decode_utf16(body: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, IoError> {
    let pairs = body.chunks_exact(2);
    if !pairs.remainder().is_empty() {
        return Err(IoError::Utf16);
    }
    let units = pairs
        .map(|pair| unit([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    String::from_utf16(&units).map_err(|_| IoError::Utf16)
}

/// `text` without a leading byte order mark.
pub(crate) fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Detect the format of `text` and read it.
pub fn read_str(text: &str) -> Result<Table, IoError> {
    let text = strip_bom(text);
    let mut lines = text.lines();
    let (Some(first), Some(second)) = (lines.next(), lines.next()) else {
        return Err(IoError::UnknownType("fewer than two lines".to_owned()));
    };
    let kind = detect_kind(first, second)
        .ok_or_else(|| IoError::UnknownType("first lines match no known layout".to_owned()))?;

    #[cfg(feature = "tracing")]
    tracing::debug!(?kind, bytes = text.len(), "detected file kind");

    match kind {
        FileKind::Log => read_log_str(text, &LogReadOptions::default()),
        tab => read_tab_str(
            text,
            &TabReadOptions {
                skip_lines: tab.skip_lines(),
            },
        ),
    }
}

pub fn read_path(path: impl AsRef<Path>) -> Result<Table, IoError> {
    let path = path.as_ref();
    let text = decode(fs::read(path)?)?;
    let table = read_str(&text)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        path = %path.display(),
        rows = table.len(),
        columns = table.column_count(),
        "read table"
    );
    Ok(table)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabReadOptions {
    /// Lines before the header line.
    pub skip_lines: usize,
}

fn skip_lines(text: &str, count: usize) -> &str {
    let mut rest = text;
    for _ in 0..count {
        match rest.find('\n') {
            Some(end) => rest = &rest[end + 1..],
            None => return "",
        }
    }
    rest
}

/// Read a tab-delimited table. The header fixes the column list; every
/// following non-empty line must have exactly as many fields.
pub fn read_tab_str(text: &str, options: &TabReadOptions) -> Result<Table, IoError> {
    let body = skip_lines(strip_bom(text), options.skip_lines);
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(body.as_bytes());
    let line_of = |record: &csv::StringRecord| {
        options.skip_lines
            + record
                .position()
                .map_or(0, |position| usize::try_from(position.line()).unwrap_or(usize::MAX))
    };

    let mut records = reader.records();
    let Some(header) = records.next() else {
        return Err(IoError::DamagedFile {
            line: options.skip_lines + 1,
            message: "missing header line".to_owned(),
        });
    };
    let header = header?;
    let columns = header
        .iter()
        .map(|field| field.trim().to_owned())
        .collect::<Vec<_>>();
    if let Some(duplicate) = columns
        .iter()
        .enumerate()
        .find_map(|(at, name)| columns[..at].contains(name).then_some(name))
    {
        return Err(IoError::DamagedFile {
            line: line_of(&header),
            message: format!("duplicate column {duplicate:?}"),
        });
    }

    let mut table = Table::with_columns(&columns, false);
    for record in records {
        let record = record?;
        if record.len() != columns.len() {
            return Err(IoError::DamagedFile {
                line: line_of(&record),
                message: format!(
                    "expected {} columns but found {}",
                    columns.len(),
                    record.len()
                ),
            });
        }
        let values = record
            .iter()
            .map(|field| Scalar::from(field.trim()))
            .collect();
        table.push_row(values, default_sort_key())?;
    }
    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabWriteOptions {
    /// Write the column names as the first record.
    pub column_labels: bool,
}

impl Default for TabWriteOptions {
    fn default() -> Self {
        Self {
            column_labels: true,
        }
    }
}

/// Write `table` as tab-separated records. Blank cells are empty and NaN
/// is written as `NaN`.
pub fn write_tab<W: Write>(table: &Table, writer: W, options: &TabWriteOptions) -> Result<(), IoError> {
    let mut out = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .flexible(true)
        .from_writer(writer);
    if options.column_labels {
        out.write_record(table.columns())?;
    }
    for row in table.rows() {
        out.write_record(row.values().iter().map(ToString::to_string))?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_tab_string(table: &Table, options: &TabWriteOptions) -> Result<String, IoError> {
    let mut buffer = Vec::new();
    write_tab(table, &mut buffer, options)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use tc_table::Table;
    use tc_types::Scalar;

    use super::{
        FileKind, IoError, TabReadOptions, TabWriteOptions, detect_kind, read_str, read_tab_str,
        write_tab_string,
    };

    #[test]
    fn detection_follows_first_two_lines() {
        assert_eq!(
            detect_kind("*** Header Start ***", "VersionPersist: 1"),
            Some(FileKind::Log)
        );
        assert_eq!(
            detect_kind("C:\\data\\stroop-7-1.txt", "a\tb\tc"),
            Some(FileKind::Excel)
        );
        assert_eq!(detect_kind("x\ty\tz", "a\tb\tc"), Some(FileKind::EprimeTab));
        assert_eq!(detect_kind("x\ty", "1\t2"), Some(FileKind::RawTab));
        assert_eq!(detect_kind("x\ty", "1\t2\t3\t4"), None);
        assert_eq!(detect_kind("hello", "world"), None);
    }

    #[test]
    fn unknown_inputs_are_rejected() {
        assert!(matches!(read_str("one line only"), Err(IoError::UnknownType(_))));
        assert!(matches!(read_str("hello\nworld\n"), Err(IoError::UnknownType(_))));
    }

    #[test]
    fn raw_tab_reads_trimmed_fields() {
        let table = read_str("a\tb\n 1\tx \n2\ty\n\n").expect("raw tab");
        assert_eq!(table.columns(), &["a", "b"]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.row(0).expect("row").values(),
            vec![Scalar::from("1"), Scalar::from("x")]
        );
        assert!(table.has_fixed_columns());
    }

    #[test]
    fn excel_flavor_skips_file_name_line() {
        let text = "stroop.txt\nSubject\tTrial\tRT\n7\t1\t400\n7\t2\t520\n";
        let table = read_str(text).expect("excel");
        assert_eq!(table.columns(), &["Subject", "Trial", "RT"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn eprime_flavor_skips_three_lines() {
        let text = "x\ty\tz\nx\ty\tz\nx\ty\tz\nSubject\tTrial\tRT\n7\t1\t400\n";
        let table = read_str(text).expect("eprime");
        assert_eq!(table.columns(), &["Subject", "Trial", "RT"]);
        assert_eq!(
            table.row(0).expect("row").get("RT").expect("RT"),
            &Scalar::from("400")
        );
    }

    #[test]
    fn ragged_lines_are_damage_with_line_numbers() {
        let text = "name.txt\na\tb\tc\n1\t2\t3\n1\t2\n";
        match read_tab_str(text, &TabReadOptions { skip_lines: 1 }) {
            Err(IoError::DamagedFile { line, message }) => {
                assert_eq!(line, 4);
                assert!(message.contains("expected 3 columns but found 2"), "{message}");
            }
            other => panic!("expected damaged file, got {other:?}"),
        }
    }

    #[test]
    fn missing_header_is_damage() {
        assert!(matches!(
            read_tab_str("skipped\n", &TabReadOptions { skip_lines: 1 }),
            Err(IoError::DamagedFile { line: 2, .. })
        ));
    }

    #[test]
    fn writer_emits_labels_blanks_and_nan() {
        let mut table = Table::new();
        let mut row = table.add_row();
        row.set("a", Scalar::Number(2.0)).expect("a");
        row.set("b", Scalar::nan()).expect("b");
        let mut row = table.add_row();
        row.set("a", "x").expect("a");

        let labelled = write_tab_string(&table, &TabWriteOptions::default()).expect("write");
        assert_eq!(labelled, "a\tb\n2\tNaN\nx\t\n");

        let bare = write_tab_string(
            &table,
            &TabWriteOptions {
                column_labels: false,
            },
        )
        .expect("write");
        assert_eq!(bare, "2\tNaN\nx\t\n");
    }
}
