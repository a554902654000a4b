//! User identity and profile management over the `users` and `config` tables.

use std::sync::Arc;

use enigma_store::{Cell, Table, TableStore};
use tracing::{debug, info, instrument, warn};

use crate::error::{BotError, BotResult};
use crate::schema::{self, CONFIG, USERS, applied_locally};

/// Identity of a message sender as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub platform_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Profile {
    /// `@username` when the sender has one, otherwise the first name.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.first_name.clone(),
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Sequential id assigned at registration.
    pub uuid: i64,
    /// Messaging platform id; unique across the table.
    pub platform_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub score: i64,
    /// Enigma the user is currently answering, 0 for none.
    pub current_enigma: i64,
}

impl User {
    fn from_row(index: usize, row: &[Cell]) -> BotResult<Self> {
        use schema::users::*;

        let int = |col: usize, what: &str| {
            row[col]
                .as_int()
                .ok_or_else(|| BotError::malformed(USERS, index, format!("{what} is not an integer")))
        };
        let opt_text = |col: usize| match &row[col] {
            Cell::Empty => None,
            other => Some(other.to_string()),
        };

        Ok(Self {
            uuid: int(UUID, "uuid")?,
            platform_id: int(PLATFORM_ID, "platform_id")?,
            first_name: row[FIRST_NAME].to_string(),
            last_name: opt_text(LAST_NAME),
            username: opt_text(USERNAME),
            score: row[SCORE].as_int().unwrap_or(0),
            current_enigma: row[CURRENT_ENIGMA].as_int().unwrap_or(0),
        })
    }

    fn to_row(&self) -> Vec<Cell> {
        vec![
            Cell::Int(self.uuid),
            Cell::Int(self.platform_id),
            text(&self.first_name),
            self.last_name.as_deref().map_or(Cell::Empty, text),
            self.username.as_deref().map_or(Cell::Empty, text),
            Cell::Int(self.score),
            Cell::Int(self.current_enigma),
        ]
    }
}

fn text(value: &str) -> Cell {
    if value.is_empty() {
        Cell::Empty
    } else {
        Cell::from(value)
    }
}

/// Row index and parsed user for `platform_id`, if registered.
fn find_user(table: &Table, platform_id: i64) -> BotResult<Option<(usize, User)>> {
    match table.find_row(schema::users::PLATFORM_ID, &Cell::Int(platform_id))? {
        Some(index) => Ok(Some((index, User::from_row(index, table.row(index)?)?))),
        None => Ok(None),
    }
}

/// Result of [`UserRegistry::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The platform id was already registered.
    Returning(User),
    /// A new row was created.
    Registered(User),
}

impl StartOutcome {
    pub fn user(&self) -> &User {
        match self {
            Self::Returning(user) | Self::Registered(user) => user,
        }
    }

    pub fn into_user(self) -> User {
        match self {
            Self::Returning(user) | Self::Registered(user) => user,
        }
    }
}

/// Registration and per-user fields of the `users` table.
#[derive(Clone)]
pub struct UserRegistry {
    store: Arc<TableStore>,
}

impl UserRegistry {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }

    /// Look up a user by platform id.
    pub fn find(&self, platform_id: i64) -> BotResult<Option<User>> {
        let found = self.store.read(USERS, |t| find_user(t, platform_id))??;
        Ok(found.map(|(_, user)| user))
    }

    /// Like [`find`](Self::find) but a missing user is an error.
    pub fn get(&self, platform_id: i64) -> BotResult<User> {
        self.find(platform_id)?
            .ok_or_else(|| enigma_store::StoreError::not_found("user", platform_id).into())
    }

    /// Register the sender unless already known. Never creates a second
    /// row for the same platform id.
    #[instrument(skip(self, profile), fields(platform_id = profile.platform_id))]
    pub async fn start(&self, profile: &Profile) -> BotResult<StartOutcome> {
        if let Some(user) = self.find(profile.platform_id)? {
            debug!(uuid = user.uuid, "returning user");
            return Ok(StartOutcome::Returning(user));
        }
        self.register_new_user(profile).await
    }

    /// Append a users row with the next uuid from `config`, then advance it.
    ///
    /// Holds the `config` and `users` locks for the whole sequence and
    /// re-checks the platform id under them, so concurrent registrations
    /// cannot duplicate a user or reuse a uuid. The uuid handed out is never
    /// lower than the last assigned one plus one, which covers a counter
    /// left behind by an interrupted registration.
    #[instrument(skip(self, profile), fields(platform_id = profile.platform_id))]
    pub async fn register_new_user(&self, profile: &Profile) -> BotResult<StartOutcome> {
        let mut config = self.store.lock(CONFIG).await?;
        let mut users = self.store.lock(USERS).await?;

        if let Some((_, user)) = users.read(|t| find_user(t, profile.platform_id))? {
            return Ok(StartOutcome::Returning(user));
        }

        let configured = config
            .get_cell(0, schema::config::NEXT_UUID)?
            .as_int()
            .ok_or_else(|| BotError::malformed(CONFIG, 0, "next_uuid is not an integer"))?;
        let after_last = users
            .read(|t| {
                t.rows()
                    .iter()
                    .filter_map(|r| r[schema::users::UUID].as_int())
                    .max()
            })
            .map_or(0, |last| last + 1);
        let uuid = configured.max(after_last);
        if uuid != configured {
            warn!(configured, uuid, "config uuid behind users table, skipping ahead");
        }

        let user = User {
            uuid,
            platform_id: profile.platform_id,
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            username: profile.username.clone(),
            score: 0,
            current_enigma: 0,
        };
        applied_locally(USERS, users.append_row(user.to_row()).await)?;
        applied_locally(
            CONFIG,
            config
                .update_cell(0, schema::config::NEXT_UUID, Cell::Int(uuid + 1))
                .await,
        )?;

        info!(uuid, "user registered");
        Ok(StartOutcome::Registered(user))
    }

    /// Set the user's active enigma (0 clears it).
    pub async fn set_current_enigma(&self, platform_id: i64, enigma_id: i64) -> BotResult<()> {
        let mut users = self.store.lock(USERS).await?;
        let (index, user) = users
            .read(|t| find_user(t, platform_id))?
            .ok_or_else(|| enigma_store::StoreError::not_found("user", platform_id))?;
        if user.current_enigma == enigma_id {
            return Ok(());
        }
        debug!(platform_id, from = user.current_enigma, to = enigma_id, "current enigma changed");
        applied_locally(
            USERS,
            users
                .update_cell(index, schema::users::CURRENT_ENIGMA, Cell::Int(enigma_id))
                .await,
        )
    }

    /// Add `delta` to the user's score and return the new score.
    pub async fn add_score(&self, platform_id: i64, delta: i64) -> BotResult<i64> {
        let mut users = self.store.lock(USERS).await?;
        let (index, user) = users
            .read(|t| find_user(t, platform_id))?
            .ok_or_else(|| enigma_store::StoreError::not_found("user", platform_id))?;
        let score = user.score + delta;
        applied_locally(
            USERS,
            users
                .update_cell(index, schema::users::SCORE, Cell::Int(score))
                .await,
        )?;
        Ok(score)
    }
}
