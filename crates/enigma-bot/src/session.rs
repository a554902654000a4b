//! Per-user conversation state and the session map that holds it.
//!
//! Sessions live in a [`moka`] cache keyed by platform id with a
//! time-to-idle policy, so abandoned conversations are evicted on their own.
//! Each entry is an async mutex: whoever holds it is the only task advancing
//! that user's conversation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::debug;

/// What a forwarding state forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardTopic {
    Contact,
    Suggest,
    Report,
    AddEnigma,
}

impl ForwardTopic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Suggest => "suggest",
            Self::Report => "report",
            Self::AddEnigma => "add_enigma",
        }
    }
}

/// State of one user's conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    #[default]
    Idle,
    /// Waiting for the user to name an enigma.
    ExpectEnigmaId,
    /// Waiting for an answer to `enigma_id`.
    ExpectAnswer { enigma_id: i64 },
    /// The next plain message is forwarded to the maintainers.
    Forwarding(ForwardTopic),
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::ExpectEnigmaId => f.write_str("expect_enigma_id"),
            Self::ExpectAnswer { enigma_id } => write!(f, "expect_answer({enigma_id})"),
            Self::Forwarding(topic) => write!(f, "forwarding({})", topic.as_str()),
        }
    }
}

/// Shared handle on one user's state.
pub type Session = Arc<Mutex<ConversationState>>;

/// Sessions keyed by platform id.
#[derive(Clone)]
pub struct SessionMap {
    inner: Cache<i64, Session>,
}

impl SessionMap {
    /// Sessions idle for longer than `ttl` are evicted.
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(ttl)
            .build();

        debug!(ttl_secs = ttl.as_secs(), max_capacity, "session map created");
        Self { inner }
    }

    /// The user's session, created from `init` when absent.
    pub async fn session<F>(&self, user_id: i64, init: F) -> Session
    where
        F: FnOnce() -> ConversationState,
    {
        self.inner
            .get_with(user_id, async move {
                let state = init();
                debug!(user_id, state = %state, "session created");
                Arc::new(Mutex::new(state))
            })
            .await
    }

    /// Current state of the user's session, if one exists.
    pub async fn state(&self, user_id: i64) -> Option<ConversationState> {
        let session = self.inner.get(&user_id).await?;
        let state = *session.lock().await;
        Some(state)
    }

    /// Drop the user's session.
    pub async fn remove(&self, user_id: i64) {
        self.inner.invalidate(&user_id).await;
    }

    /// Approximate number of live sessions.
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_is_created_once() {
        let sessions = SessionMap::new(Duration::from_secs(60), 100);
        let first = sessions.session(1, || ConversationState::ExpectEnigmaId).await;
        let second = sessions.session(1, || ConversationState::Idle).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sessions.state(1).await, Some(ConversationState::ExpectEnigmaId));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let sessions = SessionMap::new(Duration::from_secs(60), 100);
        let a = sessions.session(1, ConversationState::default).await;
        *a.lock().await = ConversationState::ExpectAnswer { enigma_id: 7 };
        sessions.session(2, ConversationState::default).await;
        assert_eq!(sessions.state(2).await, Some(ConversationState::Idle));
        assert_eq!(
            sessions.state(1).await,
            Some(ConversationState::ExpectAnswer { enigma_id: 7 })
        );
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let sessions = SessionMap::new(Duration::from_millis(50), 100);
        sessions.session(1, ConversationState::default).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(sessions.state(1).await, None);
    }

    #[test]
    fn state_display() {
        assert_eq!(ConversationState::Idle.to_string(), "idle");
        assert_eq!(
            ConversationState::Forwarding(ForwardTopic::AddEnigma).to_string(),
            "forwarding(add_enigma)"
        );
    }
}
