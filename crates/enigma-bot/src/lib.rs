//! # enigma-bot
//!
//! Conversation core of the enigma bot.
//!
//! Users pull puzzles ("enigmas") from a shared spreadsheet, answer them,
//! follow their progress, and write to the maintainers. Everything is read
//! from and written to an [`enigma_store::TableStore`]; this crate adds the
//! domain on top of it:
//!
//! - **[`users`]** -- registration and per-user fields (`users`, `config`)
//! - **[`catalog`]** -- enigma lookups and answer matching (`enigma`)
//! - **[`attempts`]** -- the append-only submission ledger (`users_enigma`)
//! - **[`engine`]** -- the per-user finite-state machine
//! - **[`dispatch`]** -- per-user ordered queues and the [`Transport`] seam
//!
//! The messaging platform stays behind [`Transport`]; the engine itself only
//! produces [`Outbound`] actions.

pub mod attempts;
pub mod catalog;
pub mod command;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod messages;
pub mod schema;
pub mod session;
pub mod users;

pub use attempts::{AttemptIdPolicy, AttemptLog, AttemptRecord};
pub use catalog::{Enigma, EnigmaCatalog};
pub use command::Command;
pub use dispatch::{Dispatcher, Transport, deliver};
pub use engine::{ConversationEngine, EngineConfig, Incoming, Outbound};
pub use error::{BotError, BotResult};
pub use messages::Messages;
pub use session::{ConversationState, ForwardTopic, SessionMap};
pub use users::{Profile, StartOutcome, User, UserRegistry};
