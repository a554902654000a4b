//! In-memory table: a header plus rows of [`Cell`]s.

use tracing::warn;

use crate::cell::Cell;
use crate::error::{StoreError, StoreResult};
use crate::remote::RemoteTable;

/// One cached table.
///
/// Every row is exactly as wide as the header, and rows keep the order in
/// which the remote returned or received them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    header: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Create an empty table with the given header.
    pub fn new(name: impl Into<String>, header: Vec<String>) -> Self {
        Self {
            name: name.into(),
            header,
            rows: Vec::new(),
        }
    }

    /// Build a table from raw remote text, coercing every cell.
    ///
    /// The remote omits trailing empty cells, so short rows are padded with
    /// [`Cell::Empty`]. Cells beyond the header are dropped.
    pub fn from_remote(name: impl Into<String>, raw: RemoteTable) -> Self {
        let name = name.into();
        let width = raw.header.len();
        let rows = raw
            .rows
            .into_iter()
            .enumerate()
            .map(|(index, values)| {
                if values.len() > width {
                    warn!(
                        table = %name,
                        row = index,
                        extra = values.len() - width,
                        "remote row wider than header, truncating"
                    );
                }
                let mut row: Vec<Cell> = values
                    .iter()
                    .take(width)
                    .map(|v| Cell::from_remote(v))
                    .collect();
                row.resize(width, Cell::Empty);
                row
            })
            .collect();

        Self {
            name,
            header: raw.header,
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.header.len()
    }

    /// Number of data rows (the header is not counted).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row(&self, row: usize) -> StoreResult<&[Cell]> {
        self.rows
            .get(row)
            .map(Vec::as_slice)
            .ok_or_else(|| StoreError::not_found("row", format!("{}[{row}]", self.name)))
    }

    pub fn cell(&self, row: usize, col: usize) -> StoreResult<&Cell> {
        self.check_col(col)?;
        Ok(&self.row(row)?[col])
    }

    /// All values of one column, in row order.
    pub fn col(&self, col: usize) -> StoreResult<Vec<Cell>> {
        self.check_col(col)?;
        Ok(self.rows.iter().map(|r| r[col].clone()).collect())
    }

    /// Zero-based index of the column named `name`.
    pub fn column_index(&self, name: &str) -> StoreResult<usize> {
        self.header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| StoreError::not_found("column", format!("{}.{name}", self.name)))
    }

    /// Index of the first row whose `col` equals `value`.
    pub fn find_row(&self, col: usize, value: &Cell) -> StoreResult<Option<usize>> {
        self.check_col(col)?;
        Ok(self.rows.iter().position(|r| &r[col] == value))
    }

    /// Append a row and return its index.
    pub(crate) fn push(&mut self, row: Vec<Cell>) -> StoreResult<usize> {
        if row.len() != self.width() {
            return Err(StoreError::InvalidArgument(format!(
                "row for `{}` has {} cells, header has {}",
                self.name,
                row.len(),
                self.width()
            )));
        }
        self.rows.push(row);
        Ok(self.rows.len() - 1)
    }

    /// Overwrite one cell, returning the previous value.
    pub(crate) fn set(&mut self, row: usize, col: usize, value: Cell) -> StoreResult<Cell> {
        self.check_col(col)?;
        let name = &self.name;
        let target = self
            .rows
            .get_mut(row)
            .ok_or_else(|| StoreError::not_found("row", format!("{name}[{row}]")))?;
        Ok(std::mem::replace(&mut target[col], value))
    }

    fn check_col(&self, col: usize) -> StoreResult<()> {
        if col < self.width() {
            Ok(())
        } else {
            Err(StoreError::not_found(
                "column",
                format!("{}[{col}]", self.name),
            ))
        }
    }
}
