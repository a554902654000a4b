//! Tagged cell values and their text coercion.
//!
//! The remote store only understands text. [`Cell::from_remote`] and
//! [`Cell::to_remote`] are the single place where that coercion happens;
//! everything inside the cache works with typed cells.

use std::fmt;

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Cell {
    /// Free text.
    Text(String),
    /// A signed integer.
    Int(i64),
    /// No value.
    #[default]
    Empty,
}

impl Cell {
    /// Coerce a remote text value into a typed cell.
    ///
    /// The empty string becomes [`Cell::Empty`]. A string that is the
    /// canonical decimal rendering of an `i64` becomes [`Cell::Int`], so
    /// `"007"` or `"+7"` stay text and survive a round trip unchanged.
    pub fn from_remote(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::Empty;
        }
        match raw.parse::<i64>() {
            Ok(n) if n.to_string() == raw => Self::Int(n),
            _ => Self::Text(raw.to_string()),
        }
    }

    /// Render the cell as the text sent to the remote store.
    pub fn to_remote(&self) -> String {
        self.to_string()
    }

    /// Integer value, if the cell holds one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Text value, if the cell holds text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Empty => Ok(()),
        }
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}
