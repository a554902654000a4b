//! Append-only ledger of answer submissions (`users_enigma`).

use std::sync::Arc;

use chrono::Utc;
use enigma_store::{Cell, TableStore};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::BotResult;
use crate::schema::{self, ATTEMPTS, applied_locally};

/// Timestamp format of the `timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How the `uuid` of a new attempt row is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptIdPolicy {
    /// Previous row's uuid plus one; 0 for the first row.
    #[default]
    Increment,
    /// Repeat the previous row's uuid (0 for the first row). Matches sheets
    /// written by earlier versions of the bot, where every attempt shares
    /// one id.
    CopyPrevious,
}

impl AttemptIdPolicy {
    fn next(self, previous: Option<i64>) -> i64 {
        match (self, previous) {
            (_, None) => 0,
            (Self::Increment, Some(last)) => last + 1,
            (Self::CopyPrevious, Some(last)) => last,
        }
    }
}

/// One submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub uuid: i64,
    pub timestamp: String,
    /// Platform id of the submitting user.
    pub user_id: i64,
    pub enigma_id: i64,
    pub answer: String,
    pub validated: bool,
}

impl AttemptRecord {
    fn to_row(&self) -> Vec<Cell> {
        vec![
            Cell::Int(self.uuid),
            Cell::from(self.timestamp.as_str()),
            Cell::Int(self.user_id),
            Cell::Int(self.enigma_id),
            if self.answer.is_empty() {
                Cell::Empty
            } else {
                Cell::from(self.answer.as_str())
            },
            Cell::Int(i64::from(self.validated)),
        ]
    }
}

fn is_validated(row: &[Cell]) -> bool {
    row[schema::attempts::VALIDATED].as_int() == Some(1)
}

fn is_for(row: &[Cell], user_id: i64) -> bool {
    row[schema::attempts::USER_ID].as_int() == Some(user_id)
}

/// Writer and queries for the attempt ledger.
#[derive(Clone)]
pub struct AttemptLog {
    store: Arc<TableStore>,
    policy: AttemptIdPolicy,
}

impl AttemptLog {
    pub fn new(store: Arc<TableStore>, policy: AttemptIdPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> AttemptIdPolicy {
        self.policy
    }

    /// Append one submission. The uuid is derived from the last row while
    /// the table lock is held.
    #[instrument(skip(self, text))]
    pub async fn record(
        &self,
        user_id: i64,
        enigma_id: i64,
        text: &str,
        validated: bool,
    ) -> BotResult<AttemptRecord> {
        let mut ledger = self.store.lock(ATTEMPTS).await?;
        let previous = ledger.read(|t| {
            t.rows()
                .last()
                .and_then(|row| row[schema::attempts::UUID].as_int())
        });

        let record = AttemptRecord {
            uuid: self.policy.next(previous),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            user_id,
            enigma_id,
            answer: text.to_string(),
            validated,
        };
        applied_locally(ATTEMPTS, ledger.append_row(record.to_row()).await)?;
        debug!(uuid = record.uuid, "attempt recorded");
        Ok(record)
    }

    /// The answer of the user's validated attempt on `enigma_id`, if any.
    pub fn solved_answer(&self, user_id: i64, enigma_id: i64) -> BotResult<Option<String>> {
        Ok(self.store.read(ATTEMPTS, |t| {
            t.rows()
                .iter()
                .find(|row| {
                    is_for(row, user_id)
                        && row[schema::attempts::ENIGMA_ID].as_int() == Some(enigma_id)
                        && is_validated(row)
                })
                .map(|row| row[schema::attempts::ANSWER].to_string())
        })?)
    }

    /// Distinct enigma ids the user has solved, in order of first success.
    pub fn solved_ids(&self, user_id: i64) -> BotResult<Vec<i64>> {
        Ok(self.store.read(ATTEMPTS, |t| {
            let mut ids = Vec::new();
            for row in t.rows() {
                if is_for(row, user_id) && is_validated(row) {
                    if let Some(id) = row[schema::attempts::ENIGMA_ID].as_int() {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
            }
            ids
        })?)
    }

    /// Number of submissions by the user, successful or not.
    pub fn attempt_count(&self, user_id: i64) -> BotResult<usize> {
        Ok(self.store.read(ATTEMPTS, |t| {
            t.rows().iter().filter(|row| is_for(row, user_id)).count()
        })?)
    }
}

#[cfg(test)]
mod tests {
    use enigma_store::MemoryRemote;

    use super::*;

    async fn log(rows: &[&[&str]], policy: AttemptIdPolicy) -> (Arc<MemoryRemote>, AttemptLog) {
        let remote = Arc::new(MemoryRemote::new().with_table(
            ATTEMPTS,
            schema::attempts::HEADER,
            rows,
        ));
        let store = Arc::new(TableStore::new(remote.clone()));
        store.load().await.unwrap();
        (remote, AttemptLog::new(store, policy))
    }

    #[tokio::test]
    async fn increment_policy_numbers_rows() {
        let (remote, log) = log(&[], AttemptIdPolicy::Increment).await;
        assert_eq!(log.record(1, 7, "x", false).await.unwrap().uuid, 0);
        assert_eq!(log.record(1, 7, "bar", true).await.unwrap().uuid, 1);
        let rows = remote.snapshot(ATTEMPTS).unwrap().rows;
        assert_eq!(rows[1][0], "1");
        assert_eq!(rows[1][5], "1");
        assert_eq!(rows[0][5], "0");
    }

    #[tokio::test]
    async fn copy_previous_policy_repeats_last_uuid() {
        let (_, log) = log(
            &[&["4", "2024-01-01 00:00:00", "1", "7", "x", "0"]],
            AttemptIdPolicy::CopyPrevious,
        )
        .await;
        assert_eq!(log.record(1, 7, "y", false).await.unwrap().uuid, 4);
        assert_eq!(log.record(1, 7, "z", false).await.unwrap().uuid, 4);
    }

    #[tokio::test]
    async fn solved_queries() {
        let (_, log) = log(
            &[
                &["0", "t", "111", "7", "foo", "0"],
                &["1", "t", "111", "7", "bar", "1"],
                &["2", "t", "222", "8", "x", "1"],
                &["3", "t", "111", "8", "nope", "0"],
            ],
            AttemptIdPolicy::Increment,
        )
        .await;
        assert_eq!(log.solved_answer(111, 7).unwrap(), Some("bar".to_string()));
        assert_eq!(log.solved_answer(111, 8).unwrap(), None);
        assert_eq!(log.solved_ids(111).unwrap(), vec![7]);
        assert_eq!(log.attempt_count(111).unwrap(), 3);
    }

    #[test]
    fn policy_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: AttemptIdPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"copy_previous\"").unwrap();
        assert_eq!(w.policy, AttemptIdPolicy::CopyPrevious);
    }
}
