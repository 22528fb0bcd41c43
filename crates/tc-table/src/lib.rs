#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashMap;

use tc_types::Scalar;
use thiserror::Error;

static BLANK: Scalar = Scalar::Blank;

/// Address of a column: by name or by ordinal position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnId<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for ColumnId<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for ColumnId<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name.as_str())
    }
}

impl From<usize> for ColumnId<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Raised when a table whose columns were fixed at construction grows a new
/// column. The column has already been appended at `index`; whether this is
/// fatal is up to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("column {name:?} was added at index {index} after the columns were fixed")]
pub struct ColumnAddedWarning {
    pub name: String,
    pub index: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("column {0:?} does not exist")]
    UnknownColumn(String),
    #[error("column index {index} is out of range for {len} columns")]
    ColumnOutOfRange { index: usize, len: usize },
    #[error("row index {index} is out of range for {len} rows")]
    RowOutOfRange { index: usize, len: usize },
    #[error("row has {values} values but the table has only {columns} columns")]
    RowTooWide { values: usize, columns: usize },
    #[error(transparent)]
    ColumnAdded(#[from] ColumnAddedWarning),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Schema {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Schema {
    fn position(&self, id: ColumnId<'_>) -> Option<usize> {
        match id {
            ColumnId::Name(name) => self.positions.get(name).copied(),
            ColumnId::Index(index) => (index < self.names.len()).then_some(index),
        }
    }

    fn require(&self, id: ColumnId<'_>) -> Result<usize, TableError> {
        self.position(id).ok_or_else(|| match id {
            ColumnId::Name(name) => TableError::UnknownColumn(name.to_owned()),
            ColumnId::Index(index) => TableError::ColumnOutOfRange {
                index,
                len: self.names.len(),
            },
        })
    }

    fn append(&mut self, name: &str) -> usize {
        let index = self.names.len();
        self.names.push(name.to_owned());
        self.positions.insert(name.to_owned(), index);
        index
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    values: Vec<Scalar>,
    sort_key: Scalar,
}

impl Row {
    fn new() -> Self {
        Self {
            values: Vec::new(),
            sort_key: default_sort_key(),
        }
    }

    fn slot(&self, index: usize) -> &Scalar {
        self.values.get(index).unwrap_or(&BLANK)
    }

    fn store(&mut self, index: usize, value: Scalar) {
        if self.values.len() <= index {
            self.values.resize(index + 1, Scalar::Blank);
        }
        self.values[index] = value;
    }
}

/// The sort key every row starts with.
#[must_use]
pub fn default_sort_key() -> Scalar {
    Scalar::Number(1.0)
}

/// Ordered columns plus ordered rows.
///
/// Rows never hold more slots than the table has columns; slots that were
/// never written read as [`Scalar::Blank`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    schema: Schema,
    rows: Vec<Row>,
    fixed_columns: bool,
    ignore_column_warnings: bool,
}

impl Table {
    /// A table that learns its columns from the first writes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with a pre-declared column order. When `columns` is empty
    /// this behaves like [`Table::new`].
    pub fn with_columns<I, S>(columns: I, ignore_column_warnings: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self {
            ignore_column_warnings,
            ..Self::default()
        };
        for name in columns {
            if table.schema.position(ColumnId::Name(name.as_ref())).is_none() {
                table.schema.append(name.as_ref());
            }
        }
        table.fixed_columns = !table.schema.names.is_empty();
        table
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.schema.names
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.schema.names.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn has_fixed_columns(&self) -> bool {
        self.fixed_columns
    }

    #[must_use]
    pub fn ignores_column_warnings(&self) -> bool {
        self.ignore_column_warnings
    }

    #[must_use]
    pub fn find_column_index<'a>(&self, id: impl Into<ColumnId<'a>>) -> Option<usize> {
        self.schema.position(id.into())
    }

    /// Look up `name`, appending it when absent. On a fixed-column table
    /// that does not ignore warnings the column is still appended, and the
    /// append is reported as [`TableError::ColumnAdded`].
    pub fn find_or_add_column_index(&mut self, name: &str) -> Result<usize, TableError> {
        if let Some(index) = self.schema.position(ColumnId::Name(name)) {
            return Ok(index);
        }

        let index = self.schema.append(name);
        if self.fixed_columns {
            if !self.ignore_column_warnings {
                return Err(ColumnAddedWarning {
                    name: name.to_owned(),
                    index,
                }
                .into());
            }
            #[cfg(feature = "tracing")]
            tracing::warn!(column = name, index, "column added after columns were fixed");
        }
        Ok(index)
    }

    /// Append an empty row and return a live handle to it.
    pub fn add_row(&mut self) -> RowMut<'_> {
        self.rows.push(Row::new());
        let index = self.rows.len() - 1;
        RowMut { table: self, index }
    }

    /// Append a row from positional values.
    pub fn push_row(&mut self, values: Vec<Scalar>, sort_key: Scalar) -> Result<(), TableError> {
        if values.len() > self.schema.names.len() {
            return Err(TableError::RowTooWide {
                values: values.len(),
                columns: self.schema.names.len(),
            });
        }
        self.rows.push(Row { values, sort_key });
        Ok(())
    }

    pub fn row(&self, index: usize) -> Result<RowRef<'_>, TableError> {
        self.rows
            .get(index)
            .map(|row| RowRef {
                schema: &self.schema,
                row,
                index,
            })
            .ok_or(TableError::RowOutOfRange {
                index,
                len: self.rows.len(),
            })
    }

    pub fn row_mut(&mut self, index: usize) -> Result<RowMut<'_>, TableError> {
        if index >= self.rows.len() {
            return Err(TableError::RowOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        Ok(RowMut { table: self, index })
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = RowRef<'_>> {
        self.rows.iter().enumerate().map(|(index, row)| RowRef {
            schema: &self.schema,
            row,
            index,
        })
    }

    /// Combined copy: this table's rows followed by each of `others`' rows.
    /// Columns are unioned, keeping each source's order.
    #[must_use]
    pub fn merge(&self, others: &[&Self]) -> Self {
        let mut merged = self.clone();
        merged.merge_in_place(others);
        merged
    }

    pub fn merge_in_place(&mut self, others: &[&Self]) {
        for other in others {
            let positions = other
                .schema
                .names
                .iter()
                .map(|name| {
                    self.schema
                        .position(ColumnId::Name(name))
                        .unwrap_or_else(|| self.schema.append(name))
                })
                .collect::<Vec<_>>();

            for source in &other.rows {
                let mut row = Row {
                    values: Vec::with_capacity(self.schema.names.len()),
                    sort_key: source.sort_key.clone(),
                };
                for (from, value) in source.values.iter().enumerate() {
                    if !matches!(value, Scalar::Blank) {
                        row.store(positions[from], value.clone());
                    }
                }
                self.rows.push(row);
            }
        }
    }

    /// Stable sort with a caller-supplied row comparator. Rows handed to
    /// the comparator report their position from before the sort.
    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(RowRef<'_>, RowRef<'_>) -> Ordering,
    {
        let mut order = (0..self.rows.len()).collect::<Vec<_>>();
        {
            let view = |index: usize| RowRef {
                schema: &self.schema,
                row: &self.rows[index],
                index,
            };
            order.sort_by(|&left, &right| compare(view(left), view(right)));
        }

        let mut rows = std::mem::take(&mut self.rows)
            .into_iter()
            .map(Some)
            .collect::<Vec<_>>();
        self.rows = order
            .into_iter()
            .filter_map(|index| rows[index].take())
            .collect();
    }

    /// Stable sort by each row's sort key.
    pub fn sort_by_sort_key(&mut self) {
        self.rows
            .sort_by(|left, right| left.sort_key.sort_cmp(&right.sort_key));
    }
}

/// Read-only view of one row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    schema: &'a Schema,
    row: &'a Row,
    index: usize,
}

impl<'a> RowRef<'a> {
    /// Position of this row in its table. Rows handed to a
    /// [`Table::sort_by`] comparator report where they stood before the
    /// sort.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Value of the addressed column. Unknown names and out-of-range indexes
    /// are errors; unwritten slots read as blank.
    pub fn get<'c>(&self, id: impl Into<ColumnId<'c>>) -> Result<&'a Scalar, TableError> {
        let position = self.schema.require(id.into())?;
        Ok(self.row.slot(position))
    }

    #[must_use]
    pub fn columns(&self) -> &'a [String] {
        &self.schema.names
    }

    /// One value per table column, blanks filled in.
    #[must_use]
    pub fn values(&self) -> Vec<Scalar> {
        (0..self.schema.names.len())
            .map(|position| self.row.slot(position).clone())
            .collect()
    }

    #[must_use]
    pub fn sort_key(&self) -> &'a Scalar {
        &self.row.sort_key
    }
}

/// Live, mutable handle to one row.
#[derive(Debug)]
pub struct RowMut<'a> {
    table: &'a mut Table,
    index: usize,
}

impl RowMut<'_> {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get<'c>(&self, id: impl Into<ColumnId<'c>>) -> Result<&Scalar, TableError> {
        let position = self.table.schema.require(id.into())?;
        Ok(self.table.rows[self.index].slot(position))
    }

    /// Store `value`. Setting an unknown name grows the table by one
    /// column; on a fixed-column table the value is still stored and the
    /// growth is reported as [`TableError::ColumnAdded`].
    pub fn set<'c>(
        &mut self,
        id: impl Into<ColumnId<'c>>,
        value: impl Into<Scalar>,
    ) -> Result<(), TableError> {
        let value = value.into();
        match id.into() {
            ColumnId::Index(index) => {
                let position = self.table.schema.require(ColumnId::Index(index))?;
                self.table.rows[self.index].store(position, value);
                Ok(())
            }
            ColumnId::Name(name) => match self.table.find_or_add_column_index(name) {
                Ok(position) => {
                    self.table.rows[self.index].store(position, value);
                    Ok(())
                }
                Err(TableError::ColumnAdded(warning)) => {
                    self.table.rows[self.index].store(warning.index, value);
                    Err(TableError::ColumnAdded(warning))
                }
                Err(other) => Err(other),
            },
        }
    }

    pub fn set_sort_key(&mut self, key: Scalar) {
        self.table.rows[self.index].sort_key = key;
    }

    #[must_use]
    pub fn sort_key(&self) -> &Scalar {
        &self.table.rows[self.index].sort_key
    }
}
