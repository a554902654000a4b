//! The write-through table cache.
//!
//! [`TableStore`] holds every remote table in memory. Reads never leave the
//! process; writes mutate the cache first and are then pushed to the
//! [`RemoteStore`]. A write the remote does not acknowledge stays queued on
//! its table, which is then reported as dirty until
//! [`TableStore::retry_pending`] or a reload clears it.
//!
//! ## Locking
//!
//! Each table has an async writer lock. Every mutation, and every
//! read-modify-write sequence built on [`TableStore::lock`], holds it for
//! its whole duration. When a sequence needs several tables it takes them
//! in name order (`config`, `enigma`, `users`, `users_enigma`), which is
//! also the order [`TableStore::load`] uses.
//!
//! The table map sits behind a synchronous `RwLock`. Reads hold it for the
//! length of one lookup; a reload holds it in write mode only while
//! swapping already-fetched tables in, so readers see either the old cache
//! or the new one, never a mix.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::cell::Cell;
use crate::error::{StoreError, StoreResult};
use crate::remote::{RemoteStore, RetryPolicy};
use crate::table::Table;

// ── pending writes ───────────────────────────────────────────────────

/// A mutation applied to the cache but not yet acknowledged by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingWrite {
    /// `index` is the zero-based data row the append must land on; `sent`
    /// records that it was handed to the remote at least once.
    Append {
        index: usize,
        values: Vec<String>,
        sent: bool,
    },
    /// Coordinates are already in remote (one-based, header-inclusive) form.
    Update { row: usize, col: usize, value: String },
}

// ── table slot ───────────────────────────────────────────────────────

struct TableSlot {
    writer: Arc<tokio::sync::Mutex<()>>,
    data: RwLock<Table>,
    pending: Mutex<Vec<PendingWrite>>,
    /// Set when a reload dropped this table.
    retired: AtomicBool,
}

impl TableSlot {
    fn new(table: Table) -> Self {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(())),
            data: RwLock::new(table),
            pending: Mutex::new(Vec::new()),
            retired: AtomicBool::new(false),
        }
    }

    fn data(&self) -> RwLockReadGuard<'_, Table> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn data_mut(&self) -> RwLockWriteGuard<'_, Table> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<PendingWrite>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── store ────────────────────────────────────────────────────────────

/// In-memory cache of every remote table.
///
/// Construct one at startup, call [`load`](Self::load), and share it
/// behind an `Arc`.
pub struct TableStore {
    remote: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    tables: RwLock<HashMap<String, Arc<TableSlot>>>,
    reload: tokio::sync::Mutex<()>,
}

impl TableStore {
    /// Create an empty store over `remote` with the default retry policy.
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            policy: RetryPolicy::default(),
            tables: RwLock::new(HashMap::new()),
            reload: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the retry policy applied to every remote call.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    // ── loading ──────────────────────────────────────────────────────

    /// Fetch every remote table and swap the whole cache in one step.
    ///
    /// Every writer lock is taken, in name order, before the first remote
    /// read and held through the swap, so no write can land on the remote
    /// between a table's read and its replacement. Nothing is replaced
    /// unless every table was read successfully; on failure the previous
    /// cache stays as it was. Writes still queued on the old cache are
    /// discarded, since the remote is authoritative. Returns the number of
    /// tables loaded.
    #[instrument(skip(self))]
    pub async fn load(&self) -> StoreResult<usize> {
        let _reload = self.reload.lock().await;

        let mut current: Vec<(String, Arc<TableSlot>)> = self
            .map()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        current.sort_by(|a, b| a.0.cmp(&b.0));
        let mut permits = Vec::with_capacity(current.len());
        for (_, slot) in &current {
            permits.push(Arc::clone(&slot.writer).lock_owned().await);
        }

        let names = self
            .policy
            .run("list_tables", || self.remote.list_tables())
            .await
            .map_err(remote_read)?;

        let mut fresh = Vec::with_capacity(names.len());
        for name in &names {
            let raw = self
                .policy
                .run("read_all", || self.remote.read_all(name))
                .await
                .map_err(remote_read)?;
            fresh.push(Table::from_remote(name.as_str(), raw));
        }

        let count = fresh.len();
        {
            let mut map = self.map_mut();
            let mut next = HashMap::with_capacity(count);
            for table in fresh {
                let name = table.name().to_string();
                let slot = match map.remove(&name) {
                    Some(slot) => {
                        discard_pending(&name, &slot);
                        *slot.data_mut() = table;
                        slot
                    }
                    None => Arc::new(TableSlot::new(table)),
                };
                next.insert(name, slot);
            }
            for (name, slot) in map.drain() {
                discard_pending(&name, &slot);
                slot.retired.store(true, Ordering::SeqCst);
                info!(table = %name, "table no longer present remotely, dropped");
            }
            *map = next;
        }
        drop(permits);

        info!(tables = count, "table cache loaded");
        Ok(count)
    }

    // ── reads ────────────────────────────────────────────────────────

    /// Names of all cached tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `f` against a consistent view of one table.
    pub fn read<R>(&self, table: &str, f: impl FnOnce(&Table) -> R) -> StoreResult<R> {
        let map = self.map();
        let slot = map
            .get(table)
            .ok_or_else(|| StoreError::not_found("table", table))?;
        let data = slot.data();
        Ok(f(&*data))
    }

    pub fn get_cell(&self, table: &str, row: usize, col: usize) -> StoreResult<Cell> {
        self.read(table, |t| t.cell(row, col).cloned())?
    }

    pub fn get_row(&self, table: &str, row: usize) -> StoreResult<Vec<Cell>> {
        self.read(table, |t| t.row(row).map(<[Cell]>::to_vec))?
    }

    pub fn get_col(&self, table: &str, col: usize) -> StoreResult<Vec<Cell>> {
        self.read(table, |t| t.col(col))?
    }

    pub fn header(&self, table: &str) -> StoreResult<Vec<String>> {
        self.read(table, |t| t.header().to_vec())
    }

    pub fn row_count(&self, table: &str) -> StoreResult<usize> {
        self.read(table, Table::len)
    }

    pub fn column_index(&self, table: &str, column: &str) -> StoreResult<usize> {
        self.read(table, |t| t.column_index(column))?
    }

    /// Index of the first row of `table` whose `col` equals `value`.
    pub fn find_row(&self, table: &str, col: usize, value: &Cell) -> StoreResult<Option<usize>> {
        self.read(table, |t| t.find_row(col, value))?
    }

    /// Whether `table` holds writes the remote has not acknowledged.
    pub fn is_dirty(&self, table: &str) -> StoreResult<bool> {
        Ok(self.pending_writes(table)? > 0)
    }

    /// Number of unacknowledged writes queued on `table`.
    pub fn pending_writes(&self, table: &str) -> StoreResult<usize> {
        let map = self.map();
        let slot = map
            .get(table)
            .ok_or_else(|| StoreError::not_found("table", table))?;
        let count = slot.pending().len();
        Ok(count)
    }

    /// Names of all dirty tables, sorted.
    pub fn dirty_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .map()
            .iter()
            .filter(|(_, slot)| !slot.pending().is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    // ── writes ───────────────────────────────────────────────────────

    /// Take the exclusive writer lock of `table`.
    ///
    /// Hold the returned guard across a whole read-modify-write sequence.
    pub async fn lock(&self, table: &str) -> StoreResult<TableGuard<'_>> {
        let slot = self
            .map()
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::not_found("table", table))?;
        let writer = Arc::clone(&slot.writer).lock_owned().await;
        if slot.retired.load(Ordering::SeqCst) {
            return Err(StoreError::not_found("table", table));
        }
        Ok(TableGuard {
            store: self,
            name: table.to_string(),
            slot,
            _writer: writer,
        })
    }

    /// Append a row and return its zero-based index.
    pub async fn append_row(&self, table: &str, row: Vec<Cell>) -> StoreResult<usize> {
        self.lock(table).await?.append_row(row).await
    }

    /// Overwrite one cell of an existing row.
    pub async fn update_cell(
        &self,
        table: &str,
        row: usize,
        col: usize,
        value: Cell,
    ) -> StoreResult<()> {
        self.lock(table).await?.update_cell(row, col, value).await
    }

    /// Replay the queued writes of `table` in order.
    pub async fn retry_pending(&self, table: &str) -> StoreResult<()> {
        let guard = self.lock(table).await?;
        self.flush_locked(&guard.name, &guard.slot).await
    }

    /// Retry every dirty table. Returns the first error after trying all.
    pub async fn flush_dirty(&self) -> StoreResult<()> {
        let mut first_err = None;
        for table in self.dirty_tables() {
            if let Err(err) = self.retry_pending(&table).await {
                warn!(table = %table, error = %err, "flush of dirty table failed");
                first_err.get_or_insert(err);
            } else {
                info!(table = %table, "dirty table flushed");
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // ── internals ────────────────────────────────────────────────────

    fn map(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<TableSlot>>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<TableSlot>>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `write` behind any earlier pending writes and push the queue.
    async fn propagate(&self, name: &str, slot: &TableSlot, write: PendingWrite) -> StoreResult<()> {
        slot.pending().push(write);
        self.flush_locked(name, slot).await
    }

    /// Send the queued append at the head of `slot`'s queue.
    ///
    /// An append is never retried blindly: a call that timed out or failed
    /// may still have been applied. Before sending a second time the remote
    /// table is read back and the write is dropped if its row is already
    /// there.
    async fn push_append(
        &self,
        name: &str,
        slot: &TableSlot,
        index: usize,
        values: &[String],
        resend: bool,
    ) -> StoreResult<()> {
        if resend {
            let remote = self
                .policy
                .run("read_all", || self.remote.read_all(name))
                .await?;
            if same_row(remote.rows.get(index), values) {
                info!(table = %name, index, "queued append already on remote, not resending");
                return Ok(());
            }
        }

        if let Some(PendingWrite::Append { sent, .. }) = slot.pending().first_mut() {
            *sent = true;
        }
        self.policy
            .without_retries()
            .run("append_row", || self.remote.append_row(name, values))
            .await
    }

    /// Send queued writes oldest first. Caller holds the writer lock.
    async fn flush_locked(&self, name: &str, slot: &TableSlot) -> StoreResult<()> {
        loop {
            let next = slot.pending().first().cloned();
            let Some(write) = next else {
                return Ok(());
            };
            let sent = match &write {
                PendingWrite::Append {
                    index,
                    values,
                    sent,
                } => self.push_append(name, slot, *index, values, *sent).await,
                PendingWrite::Update { row, col, value } => {
                    self.policy
                        .run("update_cell", || {
                            self.remote.update_cell(name, *row, *col, value)
                        })
                        .await
                }
            };
            match sent {
                Ok(()) => {
                    slot.pending().remove(0);
                }
                Err(err) => {
                    let queued = slot.pending().len();
                    warn!(table = %name, queued, error = %err, "remote write failed, table marked dirty");
                    return Err(StoreError::RemoteWrite {
                        table: name.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Whether a remote row holds `values`, compared the way cells are typed
/// on load.
fn same_row(remote: Option<&Vec<String>>, values: &[String]) -> bool {
    let Some(remote) = remote else {
        return false;
    };
    let cell = |row: &[String], col: usize| row.get(col).map_or(Cell::Empty, |s| Cell::from_remote(s));
    (0..remote.len().max(values.len()))
        .all(|col| cell(remote.as_slice(), col) == cell(values, col))
}

fn remote_read(err: StoreError) -> StoreError {
    StoreError::RemoteRead {
        message: err.to_string(),
    }
}

fn discard_pending(name: &str, slot: &TableSlot) {
    let mut pending = slot.pending();
    if !pending.is_empty() {
        warn!(table = %name, discarded = pending.len(), "reload discarded unacknowledged writes");
        pending.clear();
    }
}

// ── guard ────────────────────────────────────────────────────────────

/// Exclusive write access to one table.
///
/// Reads through the guard see the guard holder's own writes immediately.
/// Dropping the guard releases the table.
pub struct TableGuard<'a> {
    store: &'a TableStore,
    name: String,
    slot: Arc<TableSlot>,
    _writer: OwnedMutexGuard<()>,
}

impl TableGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` against the locked table.
    pub fn read<R>(&self, f: impl FnOnce(&Table) -> R) -> R {
        let data = self.slot.data();
        f(&*data)
    }

    pub fn get_cell(&self, row: usize, col: usize) -> StoreResult<Cell> {
        self.read(|t| t.cell(row, col).cloned())
    }

    pub fn get_row(&self, row: usize) -> StoreResult<Vec<Cell>> {
        self.read(|t| t.row(row).map(<[Cell]>::to_vec))
    }

    pub fn row_count(&self) -> usize {
        self.read(Table::len)
    }

    pub fn column_index(&self, column: &str) -> StoreResult<usize> {
        self.read(|t| t.column_index(column))
    }

    pub fn find_row(&self, col: usize, value: &Cell) -> StoreResult<Option<usize>> {
        self.read(|t| t.find_row(col, value))
    }

    /// Append `row` to the cache, then to the remote.
    ///
    /// The returned index is the row count before the append. When the
    /// remote write fails the row stays in the cache and
    /// [`StoreError::RemoteWrite`] is returned.
    #[instrument(skip(self, row), fields(table = %self.name))]
    pub async fn append_row(&mut self, row: Vec<Cell>) -> StoreResult<usize> {
        let values: Vec<String> = row.iter().map(Cell::to_remote).collect();
        let index = self.slot.data_mut().push(row)?;
        debug!(index, "row appended to cache");
        let write = PendingWrite::Append {
            index,
            values,
            sent: false,
        };
        self.store.propagate(&self.name, &self.slot, write).await?;
        Ok(index)
    }

    /// Overwrite one cell in the cache, then on the remote.
    #[instrument(skip(self, value), fields(table = %self.name))]
    pub async fn update_cell(&mut self, row: usize, col: usize, value: Cell) -> StoreResult<()> {
        let text = value.to_remote();
        let previous = self.slot.data_mut().set(row, col, value)?;
        debug!(row, col, previous = %previous, "cell updated in cache");
        let write = PendingWrite::Update {
            row: row + 2,
            col: col + 1,
            value: text,
        };
        self.store.propagate(&self.name, &self.slot, write).await
    }
}
