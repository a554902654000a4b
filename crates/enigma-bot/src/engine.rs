//! The conversation engine: one finite-state machine per user.
//!
//! ```text
//!            /new_enigma                valid unsolved id
//!  Idle ───────────────► ExpectEnigmaId ─────────────────► ExpectAnswer
//!   ▲  ▲                  │  bad / unknown / solved id       │  wrong answer
//!   │  │                  └──► (stays)                       └──► (stays)
//!   │  └──────────────────── correct answer ─────────────────────┘
//!   │
//!   │  /contact /suggest /report /add_enigma
//!   └──── Forwarding(topic) ── any text: forward, ack ──► Idle
//!
//!  /cancel from any state ──► Idle
//! ```
//!
//! Commands are dispatched before state handling, so `/new_enigma` in the
//! middle of a flow restarts it. Handlers return the next state; the
//! session is only updated when a handler succeeds, so a failed step leaves
//! the conversation where it was.

use std::sync::Arc;
use std::time::Duration;

use enigma_store::TableStore;
use tracing::{debug, error, info, instrument, warn};

use crate::attempts::{AttemptIdPolicy, AttemptLog};
use crate::catalog::EnigmaCatalog;
use crate::command::Command;
use crate::error::{BotError, BotResult};
use crate::messages::{Messages, keys};
use crate::session::{ConversationState, ForwardTopic, SessionMap};
use crate::users::{Profile, StartOutcome, UserRegistry};

// ---------------------------------------------------------------------------
// Inbound / outbound
// ---------------------------------------------------------------------------

/// One inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub profile: Profile,
    pub chat_id: i64,
    /// Transport message id, needed to forward the message verbatim.
    pub message_id: i64,
    pub text: String,
}

/// An action for the transport to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send `text` to `chat_id`; `rich` enables Markdown.
    Text { chat_id: i64, text: String, rich: bool },
    /// Forward a message unchanged to another chat.
    Forward {
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
    },
}

/// Collects the replies of one step.
struct Replies {
    chat_id: i64,
    items: Vec<Outbound>,
}

impl Replies {
    fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            items: Vec::new(),
        }
    }

    fn text(&mut self, text: String) {
        self.send_to(self.chat_id, text, false);
    }

    fn rich(&mut self, text: String) {
        self.send_to(self.chat_id, text, true);
    }

    fn send_to(&mut self, chat_id: i64, text: String, rich: bool) {
        self.items.push(Outbound::Text {
            chat_id,
            text,
            rich,
        });
    }

    fn forward(&mut self, from_chat_id: i64, message_id: i64, to_chat_id: i64) {
        self.items.push(Outbound::Forward {
            from_chat_id,
            message_id,
            to_chat_id,
        });
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chat that receives forwarded messages; forwarding is refused without one.
    pub maintainer_chat_id: Option<i64>,
    /// Platform ids allowed to run `/update`.
    pub admin_ids: Vec<i64>,
    /// Idle time after which a session is evicted.
    pub session_ttl: Duration,
    pub max_sessions: u64,
    pub attempt_ids: AttemptIdPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            maintainer_chat_id: None,
            admin_ids: Vec::new(),
            session_ttl: Duration::from_secs(3600),
            max_sessions: 10_000,
            attempt_ids: AttemptIdPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives every user's conversation against the shared table cache.
pub struct ConversationEngine {
    store: Arc<TableStore>,
    users: UserRegistry,
    catalog: EnigmaCatalog,
    attempts: AttemptLog,
    sessions: SessionMap,
    messages: Messages,
    config: EngineConfig,
}

impl ConversationEngine {
    pub fn new(store: Arc<TableStore>, messages: Messages, config: EngineConfig) -> Self {
        Self {
            users: UserRegistry::new(Arc::clone(&store)),
            catalog: EnigmaCatalog::new(Arc::clone(&store)),
            attempts: AttemptLog::new(Arc::clone(&store), config.attempt_ids),
            sessions: SessionMap::new(config.session_ttl, config.max_sessions),
            store,
            messages,
            config,
        }
    }

    pub fn store(&self) -> &Arc<TableStore> {
        &self.store
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn catalog(&self) -> &EnigmaCatalog {
        &self.catalog
    }

    pub fn attempts(&self) -> &AttemptLog {
        &self.attempts
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Current state of a user's session, `None` when there is none.
    pub async fn state_of(&self, user_id: i64) -> Option<ConversationState> {
        self.sessions.state(user_id).await
    }

    /// Advance the sender's conversation by one message.
    ///
    /// Never fails: errors are logged and answered with a generic apology,
    /// and the session keeps its previous state.
    #[instrument(skip(self, incoming), fields(user_id = incoming.profile.platform_id))]
    pub async fn handle(&self, incoming: &Incoming) -> Vec<Outbound> {
        let user_id = incoming.profile.platform_id;
        let session = self
            .sessions
            .session(user_id, || self.restore_state(user_id))
            .await;
        let mut state = session.lock().await;
        let current = *state;

        let mut out = Replies::new(incoming.chat_id);
        match self.step(current, incoming, &mut out).await {
            Ok(next) => {
                if next != current {
                    debug!(from = %current, to = %next, "state transition");
                }
                *state = next;
                out.items
            }
            Err(err) => {
                if matches!(err, BotError::StateMismatch { .. }) {
                    error!(state = %current, error = %err, "handler dispatched in wrong state");
                } else {
                    error!(state = %current, error = %err, "conversation step failed");
                }
                let mut apology = Replies::new(incoming.chat_id);
                apology.text(self.messages.get(keys::ERROR_GENERAL));
                apology.items
            }
        }
    }

    /// Initial state for a user without a live session: an active enigma
    /// recorded in the users table resumes the answer step.
    fn restore_state(&self, user_id: i64) -> ConversationState {
        match self.users.find(user_id) {
            Ok(Some(user)) if user.current_enigma != 0 => {
                if matches!(self.catalog.exists(user.current_enigma), Ok(true)) {
                    info!(user_id, enigma_id = user.current_enigma, "resuming active enigma");
                    ConversationState::ExpectAnswer {
                        enigma_id: user.current_enigma,
                    }
                } else {
                    ConversationState::Idle
                }
            }
            Ok(_) => ConversationState::Idle,
            Err(err) => {
                warn!(user_id, error = %err, "could not read user while creating session");
                ConversationState::Idle
            }
        }
    }

    async fn step(
        &self,
        state: ConversationState,
        incoming: &Incoming,
        out: &mut Replies,
    ) -> BotResult<ConversationState> {
        if let Some(command) = Command::parse(&incoming.text) {
            return self.on_command(state, command, incoming, out).await;
        }

        match state {
            ConversationState::Idle => {
                out.text(self.messages.get(keys::IDLE_HINT));
                Ok(state)
            }
            ConversationState::ExpectEnigmaId => self.on_enigma_id(state, incoming, out).await,
            ConversationState::ExpectAnswer { .. } => self.on_answer(state, incoming, out).await,
            ConversationState::Forwarding(_) => self.on_forward(state, incoming, out),
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn on_command(
        &self,
        state: ConversationState,
        command: Command,
        incoming: &Incoming,
        out: &mut Replies,
    ) -> BotResult<ConversationState> {
        let profile = &incoming.profile;

        match command {
            Command::Start => {
                let outcome = self.users.start(profile).await?;
                let key = match outcome {
                    StartOutcome::Registered(_) => keys::WELCOME_NEW,
                    StartOutcome::Returning(_) => keys::WELCOME_BACK,
                };
                out.text(
                    self.messages
                        .get_with(key, &[("first_name", &outcome.user().first_name)]),
                );
                Ok(state)
            }
            Command::Help => {
                out.text(self.messages.get(keys::HELP));
                Ok(state)
            }
            Command::NewEnigma => {
                let user = self.users.start(profile).await?.into_user();
                if user.current_enigma != 0 {
                    self.users.set_current_enigma(user.platform_id, 0).await?;
                }
                out.text(self.messages.get(keys::ASK_ID));
                Ok(ConversationState::ExpectEnigmaId)
            }
            Command::Cancel => {
                if self.users.find(profile.platform_id)?.is_some() {
                    self.users.set_current_enigma(profile.platform_id, 0).await?;
                }
                out.text(self.messages.get(keys::CANCELLED));
                Ok(ConversationState::Idle)
            }
            Command::Update => {
                self.reload(profile, out).await;
                Ok(state)
            }
            Command::Progress => {
                self.progress(profile, out).await?;
                Ok(state)
            }
            Command::Unknown(_) => {
                out.text(
                    self.messages
                        .get_with(keys::UNKNOWN_COMMAND, &[("command", &command.to_string())]),
                );
                Ok(state)
            }
            Command::Contact => Ok(self.enter_forwarding(state, ForwardTopic::Contact, out)),
            Command::Suggest => Ok(self.enter_forwarding(state, ForwardTopic::Suggest, out)),
            Command::Report => Ok(self.enter_forwarding(state, ForwardTopic::Report, out)),
            Command::AddEnigma => Ok(self.enter_forwarding(state, ForwardTopic::AddEnigma, out)),
        }
    }

    /// Forwarding flows only start from `Idle`.
    fn enter_forwarding(
        &self,
        state: ConversationState,
        topic: ForwardTopic,
        out: &mut Replies,
    ) -> ConversationState {
        if state != ConversationState::Idle {
            out.text(self.messages.get(keys::BUSY));
            return state;
        }
        out.text(self.messages.get(forward_prompt(topic)));
        ConversationState::Forwarding(topic)
    }

    /// Admin-only full reload of the table cache.
    async fn reload(&self, profile: &Profile, out: &mut Replies) {
        if !self.config.admin_ids.contains(&profile.platform_id) {
            warn!(user_id = profile.platform_id, "non-admin attempted reload");
            out.text(self.messages.get(keys::UPDATE_DENIED));
            return;
        }
        match self.store.load().await {
            Ok(count) => {
                info!(user_id = profile.platform_id, tables = count, "cache reloaded by admin");
                out.text(
                    self.messages
                        .get_with(keys::UPDATE_DONE, &[("count", &count.to_string())]),
                );
            }
            Err(err) => {
                error!(error = %err, "admin reload failed, keeping previous cache");
                out.text(self.messages.get(keys::UPDATE_FAILED));
            }
        }
    }

    async fn progress(&self, profile: &Profile, out: &mut Replies) -> BotResult<()> {
        let user = self.users.start(profile).await?.into_user();
        let solved = self.attempts.solved_ids(user.platform_id)?;
        if solved.is_empty() {
            out.text(self.messages.get(keys::PROGRESS_EMPTY));
            return Ok(());
        }
        let list = solved
            .iter()
            .map(|id| format!("#{id}"))
            .collect::<Vec<_>>()
            .join(", ");
        let attempts = self.attempts.attempt_count(user.platform_id)?;
        out.text(self.messages.get_with(
            keys::PROGRESS,
            &[
                ("score", &user.score.to_string()),
                ("solved", &list),
                ("attempts", &attempts.to_string()),
            ],
        ));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State handlers
    // -----------------------------------------------------------------------

    async fn on_enigma_id(
        &self,
        state: ConversationState,
        incoming: &Incoming,
        out: &mut Replies,
    ) -> BotResult<ConversationState> {
        if state != ConversationState::ExpectEnigmaId {
            return Err(mismatch("expect_enigma_id", state));
        }
        let user_id = incoming.profile.platform_id;
        let text = incoming.text.trim();

        let id = match parse_enigma_id(text) {
            Ok(id) => id,
            Err(err) => {
                debug!(user_id, error = %err, "rejected enigma id");
                out.text(self.messages.get_with(keys::INVALID_ID, &[("text", text)]));
                return Ok(state);
            }
        };

        if !self.catalog.exists(id)? {
            let known = self
                .catalog
                .ids()?
                .iter()
                .map(|known_id| format!("#{known_id}"))
                .collect::<Vec<_>>()
                .join(", ");
            out.text(self.messages.get_with(
                keys::UNKNOWN_ID,
                &[("id", &id.to_string()), ("known", &known)],
            ));
            return Ok(state);
        }

        if let Some(answer) = self.attempts.solved_answer(user_id, id)? {
            out.rich(self.catalog.render(id)?);
            out.text(
                self.messages
                    .get_with(keys::ALREADY_SOLVED, &[("answer", &answer)]),
            );
            return Ok(state);
        }

        let rendered = self.catalog.render(id)?;
        self.users.start(&incoming.profile).await?;
        self.users.set_current_enigma(user_id, id).await?;
        info!(user_id, enigma_id = id, "enigma selected");

        out.rich(rendered);
        out.text(self.messages.get(keys::ASK_ANSWER));
        Ok(ConversationState::ExpectAnswer { enigma_id: id })
    }

    async fn on_answer(
        &self,
        state: ConversationState,
        incoming: &Incoming,
        out: &mut Replies,
    ) -> BotResult<ConversationState> {
        let ConversationState::ExpectAnswer { enigma_id } = state else {
            return Err(mismatch("expect_answer", state));
        };
        let user_id = incoming.profile.platform_id;
        let enigma = self.catalog.lookup(enigma_id)?;

        if !enigma.accepts(&incoming.text) {
            self.attempts
                .record(user_id, enigma_id, &incoming.text, false)
                .await?;
            out.text(self.messages.get(keys::WRONG));
            return Ok(state);
        }

        // The ledger row goes first: if it cannot be written, the user row
        // is untouched and the answer can simply be sent again.
        self.attempts
            .record(user_id, enigma_id, &incoming.text, true)
            .await?;
        self.users.set_current_enigma(user_id, 0).await?;
        let score = self.users.add_score(user_id, 1).await?;
        info!(user_id, enigma_id, score, "enigma solved");

        out.text(
            self.messages
                .get_with(keys::CORRECT, &[("score", &score.to_string())]),
        );
        if !enigma.feedback.is_empty() {
            out.text(
                self.messages
                    .get_with(keys::FEEDBACK, &[("feedback", &enigma.feedback)]),
            );
        }
        Ok(ConversationState::Idle)
    }

    fn on_forward(
        &self,
        state: ConversationState,
        incoming: &Incoming,
        out: &mut Replies,
    ) -> BotResult<ConversationState> {
        let ConversationState::Forwarding(topic) = state else {
            return Err(mismatch("forwarding", state));
        };
        let Some(target) = self.config.maintainer_chat_id else {
            warn!(topic = topic.as_str(), "no maintainer chat configured, message dropped");
            out.text(self.messages.get(keys::FORWARD_UNAVAILABLE));
            return Ok(ConversationState::Idle);
        };

        let profile = &incoming.profile;
        out.send_to(
            target,
            self.messages.get_with(
                keys::FORWARD_HEADER,
                &[
                    ("topic", topic.as_str()),
                    ("name", &profile.display_name()),
                    ("user_id", &profile.platform_id.to_string()),
                ],
            ),
            false,
        );
        out.forward(incoming.chat_id, incoming.message_id, target);
        out.text(self.messages.get(keys::FORWARDED));
        info!(user_id = profile.platform_id, topic = topic.as_str(), "message forwarded");
        Ok(ConversationState::Idle)
    }
}

fn forward_prompt(topic: ForwardTopic) -> &'static str {
    match topic {
        ForwardTopic::Contact => keys::PROMPT_CONTACT,
        ForwardTopic::Suggest => keys::PROMPT_SUGGEST,
        ForwardTopic::Report => keys::PROMPT_REPORT,
        ForwardTopic::AddEnigma => keys::PROMPT_ADD_ENIGMA,
    }
}

fn parse_enigma_id(text: &str) -> BotResult<i64> {
    text.parse::<i64>()
        .map_err(|_| BotError::InvalidInput(format!("`{text}` is not an enigma id")))
}

fn mismatch(expected: &'static str, found: ConversationState) -> BotError {
    BotError::StateMismatch {
        expected,
        found: found.to_string(),
    }
}
