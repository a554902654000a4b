//! Table names and column positions of the bot's spreadsheet.
//!
//! Table names sort in the order their writer locks must be taken:
//! `config`, `enigma`, `users`, `users_enigma`.

use enigma_store::StoreResult;
use tracing::warn;

use crate::error::BotResult;

pub const CONFIG: &str = "config";
pub const ENIGMA: &str = "enigma";
pub const USERS: &str = "users";
pub const ATTEMPTS: &str = "users_enigma";

/// Columns of the `config` table (a single row).
pub mod config {
    pub const NEXT_UUID: usize = 0;
    pub const HEADER: &[&str] = &["next_uuid"];
}

/// Columns of the `users` table.
pub mod users {
    pub const UUID: usize = 0;
    pub const PLATFORM_ID: usize = 1;
    pub const FIRST_NAME: usize = 2;
    pub const LAST_NAME: usize = 3;
    pub const USERNAME: usize = 4;
    pub const SCORE: usize = 5;
    pub const CURRENT_ENIGMA: usize = 6;
    pub const HEADER: &[&str] = &[
        "uuid",
        "platform_id",
        "first_name",
        "last_name",
        "username",
        "score",
        "current_enigma",
    ];
}

/// Columns of the `enigma` table.
pub mod enigma {
    pub const UUID: usize = 0;
    pub const NAME: usize = 1;
    pub const DESCRIPTION: usize = 2;
    pub const ANSWER: usize = 3;
    pub const AUTHOR: usize = 4;
    pub const FEEDBACK: usize = 5;
    pub const HEADER: &[&str] = &["uuid", "name", "description", "answer", "author", "feedback"];
}

/// Columns of the `users_enigma` attempt ledger.
pub mod attempts {
    pub const UUID: usize = 0;
    pub const TIMESTAMP: usize = 1;
    pub const USER_ID: usize = 2;
    pub const ENIGMA_ID: usize = 3;
    pub const ANSWER: usize = 4;
    pub const VALIDATED: usize = 5;
    pub const HEADER: &[&str] = &["uuid", "timestamp", "user_id", "enigma_id", "answer", "validated"];
}

/// Accept a write that reached the cache even though the remote did not
/// acknowledge it. The table stays dirty and is retried by the periodic
/// flush; the conversation carries on with the cached value.
pub(crate) fn applied_locally<T>(table: &str, result: StoreResult<T>) -> BotResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_dirty() => {
            warn!(table, error = %err, "write kept in cache, remote pending");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

