//! In-process [`RemoteStore`] used by tests and offline runs.
//!
//! Stores everything as text, exactly like a spreadsheet would, and can be
//! told to fail or stall so cache behaviour under remote faults can be
//! exercised.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::remote::{RemoteStore, RemoteTable};

/// A remote store that lives in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    tables: Mutex<Vec<(String, RemoteTable)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    latency_ms: AtomicU64,
    writes: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper that adds a table from string slices.
    pub fn with_table(self, name: &str, header: &[&str], rows: &[&[&str]]) -> Self {
        self.put_table(
            name,
            RemoteTable {
                header: header.iter().map(|s| s.to_string()).collect(),
                rows: rows
                    .iter()
                    .map(|r| r.iter().map(|s| s.to_string()).collect())
                    .collect(),
            },
        );
        self
    }

    /// Insert or replace a table.
    pub fn put_table(&self, name: &str, table: RemoteTable) {
        let mut tables = self.lock();
        match tables.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = table,
            None => tables.push((name.to_string(), table)),
        }
    }

    /// Delete a table; returns whether it existed.
    pub fn remove_table(&self, name: &str) -> bool {
        let mut tables = self.lock();
        let before = tables.len();
        tables.retain(|(n, _)| n != name);
        tables.len() != before
    }

    /// Current remote contents of `name`.
    pub fn snapshot(&self, name: &str) -> Option<RemoteTable> {
        self.lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }

    /// Make every subsequent read fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of writes that reached the store successfully.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, RemoteTable)>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate(&self, fail: &AtomicBool, operation: &str) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if fail.load(Ordering::SeqCst) {
            return Err(StoreError::Remote(format!("injected {operation} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        self.simulate(&self.fail_reads, "list").await?;
        Ok(self.lock().iter().map(|(n, _)| n.clone()).collect())
    }

    async fn read_all(&self, table: &str) -> StoreResult<RemoteTable> {
        self.simulate(&self.fail_reads, "read").await?;
        self.snapshot(table)
            .ok_or_else(|| StoreError::not_found("table", table))
    }

    async fn append_row(&self, table: &str, values: &[String]) -> StoreResult<()> {
        self.simulate(&self.fail_writes, "append").await?;
        let mut tables = self.lock();
        let (_, target) = tables
            .iter_mut()
            .find(|(n, _)| n == table)
            .ok_or_else(|| StoreError::not_found("table", table))?;
        target.rows.push(values.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(table, rows = target.rows.len(), "memory remote append");
        Ok(())
    }

    async fn update_cell(
        &self,
        table: &str,
        row: usize,
        col: usize,
        value: &str,
    ) -> StoreResult<()> {
        self.simulate(&self.fail_writes, "update").await?;
        if row < 2 || col < 1 {
            return Err(StoreError::InvalidArgument(format!(
                "cell ({row}, {col}) is not a data cell"
            )));
        }
        let mut tables = self.lock();
        let (_, target) = tables
            .iter_mut()
            .find(|(n, _)| n == table)
            .ok_or_else(|| StoreError::not_found("table", table))?;
        let cells = target
            .rows
            .get_mut(row - 2)
            .ok_or_else(|| StoreError::Remote(format!("row {row} out of range in `{table}`")))?;
        if cells.len() < col {
            cells.resize(col, String::new());
        }
        cells[col - 1] = value.to_string();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_cell_uses_one_based_addressing() {
        let remote = MemoryRemote::new().with_table("t", &["a", "b"], &[&["1", "2"]]);
        remote.update_cell("t", 2, 2, "x").await.unwrap();
        assert_eq!(remote.snapshot("t").unwrap().rows[0], vec!["1", "x"]);
        assert!(remote.update_cell("t", 1, 1, "h").await.is_err());
    }

    #[tokio::test]
    async fn injected_failures() {
        let remote = MemoryRemote::new().with_table("t", &["a"], &[]);
        remote.set_fail_writes(true);
        assert!(remote.append_row("t", &["1".into()]).await.is_err());
        assert_eq!(remote.write_count(), 0);
        remote.set_fail_reads(true);
        assert!(remote.list_tables().await.is_err());
    }
}
