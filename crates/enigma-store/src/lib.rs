//! # enigma-store
//!
//! Write-through table cache for the enigma bot.
//!
//! The bot's durable data lives in a remote spreadsheet. This crate mirrors
//! every sheet into memory as a [`Table`] of typed [`Cell`]s, serves all
//! reads from that mirror, and pushes writes to the remote after applying
//! them locally.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  TableStore   (cache, per-table locks)  │
//! │    └─ pending writes / dirty marker     │
//! ├─────────────────────────────────────────┤
//! │  RetryPolicy  (timeout + bounded retry) │
//! ├─────────────────────────────────────────┤
//! │  RemoteStore  (trait)                   │
//! │    ├─ SheetsRemote  (Sheets v4 API)     │
//! │    └─ MemoryRemote  (in process)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use enigma_store::{Cell, MemoryRemote, TableStore};
//!
//! let remote = Arc::new(MemoryRemote::new().with_table("users", &["uuid"], &[]));
//! let store = TableStore::new(remote);
//! store.load().await?;
//! let index = store.append_row("users", vec![Cell::Int(0)]).await?;
//! ```

pub mod cell;
pub mod error;
pub mod memory;
pub mod remote;
pub mod sheets;
pub mod store;
pub mod table;

// ── re-exports ───────────────────────────────────────────────────────

pub use cell::Cell;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryRemote;
pub use remote::{RemoteStore, RemoteTable, RetryPolicy};
pub use sheets::SheetsRemote;
pub use store::{TableGuard, TableStore};
pub use table::Table;
