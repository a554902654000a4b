//! Read-only lookups into the `enigma` table.

use std::sync::Arc;

use enigma_store::{Cell, StoreError, Table, TableStore};

use crate::error::{BotError, BotResult};
use crate::schema::{self, ENIGMA};

/// Separator between accepted answers in the `answer` column.
pub const ANSWER_DELIMITER: &str = ", ";

/// One puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enigma {
    pub uuid: i64,
    pub name: String,
    pub description: String,
    /// One accepted answer, or several joined by [`ANSWER_DELIMITER`].
    pub answer: String,
    pub author: String,
    pub feedback: String,
}

impl Enigma {
    fn from_row(index: usize, row: &[Cell]) -> BotResult<Self> {
        use schema::enigma::*;

        Ok(Self {
            uuid: row[UUID]
                .as_int()
                .ok_or_else(|| BotError::malformed(ENIGMA, index, "uuid is not an integer"))?,
            name: row[NAME].to_string(),
            description: row[DESCRIPTION].to_string(),
            answer: row[ANSWER].to_string(),
            author: row[AUTHOR].to_string(),
            feedback: row[FEEDBACK].to_string(),
        })
    }

    /// Accepted answer tokens, in column order.
    pub fn accepted_answers(&self) -> impl Iterator<Item = &str> {
        self.answer.split(ANSWER_DELIMITER)
    }

    /// Case-sensitive exact match against one accepted token.
    pub fn accepts(&self, text: &str) -> bool {
        self.accepted_answers().any(|token| token == text)
    }

    /// Title line, emphasized name, description.
    pub fn render(&self) -> String {
        format!(
            "Enigma #{}\n\n*{}*\n\n{}",
            self.uuid, self.name, self.description
        )
    }
}

fn find_enigma(table: &Table, id: i64) -> BotResult<Option<Enigma>> {
    match table.find_row(schema::enigma::UUID, &Cell::Int(id))? {
        Some(index) => Ok(Some(Enigma::from_row(index, table.row(index)?)?)),
        None => Ok(None),
    }
}

/// Lookups by enigma id.
#[derive(Clone)]
pub struct EnigmaCatalog {
    store: Arc<TableStore>,
}

impl EnigmaCatalog {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }

    /// The enigma with uuid `id`.
    pub fn lookup(&self, id: i64) -> BotResult<Enigma> {
        self.store
            .read(ENIGMA, |t| find_enigma(t, id))??
            .ok_or_else(|| StoreError::not_found("enigma", id).into())
    }

    pub fn exists(&self, id: i64) -> BotResult<bool> {
        Ok(self
            .store
            .find_row(ENIGMA, schema::enigma::UUID, &Cell::Int(id))?
            .is_some())
    }

    /// Display text for enigma `id`.
    pub fn render(&self, id: i64) -> BotResult<String> {
        Ok(self.lookup(id)?.render())
    }

    /// All enigma ids, in table order.
    pub fn ids(&self) -> BotResult<Vec<i64>> {
        Ok(self
            .store
            .get_col(ENIGMA, schema::enigma::UUID)?
            .iter()
            .filter_map(Cell::as_int)
            .collect())
    }
}
