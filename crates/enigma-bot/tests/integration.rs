//! Conversation scenarios driven through the public engine and dispatcher.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use enigma_bot::schema::{self, ATTEMPTS, CONFIG, ENIGMA, USERS};
use enigma_bot::{
    BotResult, ConversationEngine, ConversationState, Dispatcher, EngineConfig, ForwardTopic,
    Incoming, Messages, Outbound, Profile, Transport,
};
use enigma_store::{MemoryRemote, RetryPolicy, TableStore};

// ── fixtures ─────────────────────────────────────────────────────────

const MAINTAINER: i64 = -100;
const ADMIN: i64 = 999;

fn remote() -> Arc<MemoryRemote> {
    Arc::new(
        MemoryRemote::new()
            .with_table(CONFIG, schema::config::HEADER, &[&["1"]])
            .with_table(
                USERS,
                schema::users::HEADER,
                &[&["0", "111", "A", "", "", "0", "0"]],
            )
            .with_table(
                ENIGMA,
                schema::enigma::HEADER,
                &[
                    &["7", "N", "D", "foo, bar", "me", "nice one"],
                    &["8", "Other", "Second", "42", "me", ""],
                ],
            )
            .with_table(ATTEMPTS, schema::attempts::HEADER, &[]),
    )
}

async fn engine_over(remote: &Arc<MemoryRemote>) -> ConversationEngine {
    let store = Arc::new(
        TableStore::new(remote.clone())
            .with_retry_policy(RetryPolicy::once(Duration::from_millis(200))),
    );
    store.load().await.unwrap();
    ConversationEngine::new(
        store,
        Messages::default(),
        EngineConfig {
            maintainer_chat_id: Some(MAINTAINER),
            admin_ids: vec![ADMIN],
            ..EngineConfig::default()
        },
    )
}

fn from(platform_id: i64, text: &str) -> Incoming {
    Incoming {
        profile: Profile {
            platform_id,
            first_name: "A".into(),
            last_name: None,
            username: None,
        },
        chat_id: platform_id,
        message_id: 42,
        text: text.into(),
    }
}

fn texts(outbound: &[Outbound]) -> Vec<&str> {
    outbound
        .iter()
        .filter_map(|o| match o {
            Outbound::Text { text, .. } => Some(text.as_str()),
            Outbound::Forward { .. } => None,
        })
        .collect()
}

// ── enigma flow ──────────────────────────────────────────────────────

#[tokio::test]
async fn solving_an_enigma() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    assert_eq!(engine.state_of(111).await, Some(ConversationState::ExpectEnigmaId));

    let replies = engine.handle(&from(111, "7")).await;
    let shown = texts(&replies).join("\n");
    assert!(shown.contains('N'));
    assert!(shown.contains('D'));
    assert!(matches!(&replies[0], Outbound::Text { rich: true, .. }));
    assert_eq!(engine.users().get(111).unwrap().current_enigma, 7);
    assert_eq!(
        engine.state_of(111).await,
        Some(ConversationState::ExpectAnswer { enigma_id: 7 })
    );

    let replies = engine.handle(&from(111, "bar")).await;
    let shown = texts(&replies);
    assert!(shown[0].starts_with("Correct"));
    assert!(shown[1].contains("nice one"));

    let user = engine.users().get(111).unwrap();
    assert_eq!(user.current_enigma, 0);
    assert_eq!(user.score, 1);
    assert_eq!(engine.state_of(111).await, Some(ConversationState::Idle));

    let ledger = remote.snapshot(ATTEMPTS).unwrap();
    assert_eq!(ledger.rows.len(), 1);
    assert_eq!(ledger.rows[0][schema::attempts::ENIGMA_ID], "7");
    assert_eq!(ledger.rows[0][schema::attempts::ANSWER], "bar");
    assert_eq!(ledger.rows[0][schema::attempts::VALIDATED], "1");
}

#[tokio::test]
async fn wrong_answers_are_logged_and_keep_the_question_open() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    engine.handle(&from(111, "7")).await;
    let replies = engine.handle(&from(111, "baz")).await;

    assert!(texts(&replies)[0].starts_with("Sorry, that is not"));
    assert_eq!(
        engine.state_of(111).await,
        Some(ConversationState::ExpectAnswer { enigma_id: 7 })
    );
    let ledger = remote.snapshot(ATTEMPTS).unwrap();
    assert_eq!(ledger.rows[0][schema::attempts::VALIDATED], "0");
    assert_eq!(engine.users().get(111).unwrap().score, 0);
}

#[tokio::test]
async fn non_numeric_id_reprompts() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    let replies = engine.handle(&from(111, "abc")).await;

    assert!(texts(&replies)[0].contains("\"abc\" is not a number"));
    assert_eq!(engine.state_of(111).await, Some(ConversationState::ExpectEnigmaId));
}

#[tokio::test]
async fn unknown_id_reprompts() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    let replies = engine.handle(&from(111, "99")).await;

    let reply = texts(&replies)[0];
    assert!(reply.contains("#99"));
    assert!(reply.contains("#7, #8"));
    assert_eq!(engine.state_of(111).await, Some(ConversationState::ExpectEnigmaId));
}

#[tokio::test]
async fn solved_enigma_is_not_asked_again() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    engine.handle(&from(111, "7")).await;
    engine.handle(&from(111, "foo")).await;

    engine.handle(&from(111, "/new_enigma")).await;
    let replies = engine.handle(&from(111, "7")).await;

    let shown = texts(&replies);
    assert!(shown.iter().any(|t| t.contains("already solved") && t.contains("foo")));
    assert_eq!(engine.state_of(111).await, Some(ConversationState::ExpectEnigmaId));
    assert_eq!(engine.users().get(111).unwrap().current_enigma, 0);
}

#[tokio::test]
async fn cancel_resets_from_any_state() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    engine.handle(&from(111, "8")).await;
    assert_eq!(engine.users().get(111).unwrap().current_enigma, 8);

    engine.handle(&from(111, "/cancel")).await;
    assert_eq!(engine.users().get(111).unwrap().current_enigma, 0);
    assert_eq!(engine.state_of(111).await, Some(ConversationState::Idle));

    engine.handle(&from(111, "/report")).await;
    engine.handle(&from(111, "/cancel")).await;
    assert_eq!(engine.state_of(111).await, Some(ConversationState::Idle));
}

#[tokio::test]
async fn new_enigma_registers_unknown_users() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(222, "/new_enigma")).await;
    engine.handle(&from(222, "8")).await;

    let user = engine.users().get(222).unwrap();
    assert_eq!(user.uuid, 1);
    assert_eq!(user.current_enigma, 8);
    assert_eq!(remote.snapshot(CONFIG).unwrap().rows[0][0], "2");
}

#[tokio::test]
async fn repeated_start_keeps_one_row_per_user() {
    let remote = remote();
    let engine = Arc::new(engine_over(&remote).await);

    let mut handles = Vec::new();
    for n in 0..10 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.handle(&from(300 + n % 3, "/start")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let rows = remote.snapshot(USERS).unwrap().rows;
    let mut ids: Vec<&str> = rows
        .iter()
        .map(|r| r[schema::users::PLATFORM_ID].as_str())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["111", "300", "301", "302"]);
}

// ── commands ─────────────────────────────────────────────────────────

#[tokio::test]
async fn forwarding_reaches_the_maintainer() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/suggest")).await;
    assert_eq!(
        engine.state_of(111).await,
        Some(ConversationState::Forwarding(ForwardTopic::Suggest))
    );

    let replies = engine.handle(&from(111, "more puzzles")).await;
    assert!(matches!(
        &replies[0],
        Outbound::Text { chat_id: MAINTAINER, text, .. } if text.contains("suggest")
    ));
    assert_eq!(
        replies[1],
        Outbound::Forward {
            from_chat_id: 111,
            message_id: 42,
            to_chat_id: MAINTAINER,
        }
    );
    assert!(matches!(&replies[2], Outbound::Text { chat_id: 111, .. }));
    assert_eq!(engine.state_of(111).await, Some(ConversationState::Idle));
}

#[tokio::test]
async fn forwarding_is_refused_mid_flow() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    let replies = engine.handle(&from(111, "/contact")).await;

    assert!(texts(&replies)[0].contains("/cancel"));
    assert_eq!(engine.state_of(111).await, Some(ConversationState::ExpectEnigmaId));
}

#[tokio::test]
async fn update_is_admin_only_and_reloads() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    remote.put_table(
        ENIGMA,
        enigma_store::RemoteTable {
            header: schema::enigma::HEADER.iter().map(|s| s.to_string()).collect(),
            rows: vec![vec![
                "9".into(),
                "New".into(),
                "Fresh".into(),
                "x".into(),
                String::new(),
                String::new(),
            ]],
        },
    );

    let replies = engine.handle(&from(111, "/update")).await;
    assert!(texts(&replies)[0].contains("administrators"));
    assert!(!engine.catalog().exists(9).unwrap());

    let replies = engine.handle(&from(ADMIN, "/update")).await;
    assert!(texts(&replies)[0].contains("Reloaded 4 tables"));
    assert!(engine.catalog().exists(9).unwrap());
    assert!(!engine.catalog().exists(7).unwrap());
}

#[tokio::test]
async fn progress_lists_solved_enigmas() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    let replies = engine.handle(&from(111, "/progress")).await;
    assert!(texts(&replies)[0].contains("not solved any"));

    engine.handle(&from(111, "/new_enigma")).await;
    engine.handle(&from(111, "8")).await;
    engine.handle(&from(111, "41")).await;
    engine.handle(&from(111, "42")).await;

    let replies = engine.handle(&from(111, "/progress")).await;
    let summary = texts(&replies)[0];
    assert!(summary.contains("Score: 1"));
    assert!(summary.contains("#8"));
    assert!(summary.contains("Attempts: 2"));
}

#[tokio::test]
async fn remote_write_failure_does_not_break_the_conversation() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    remote.set_fail_writes(true);
    engine.handle(&from(111, "/new_enigma")).await;
    engine.handle(&from(111, "7")).await;

    assert_eq!(
        engine.state_of(111).await,
        Some(ConversationState::ExpectAnswer { enigma_id: 7 })
    );
    assert!(engine.store().is_dirty(USERS).unwrap());

    remote.set_fail_writes(false);
    engine.store().flush_dirty().await.unwrap();
    assert_eq!(remote.snapshot(USERS).unwrap().rows[0][schema::users::CURRENT_ENIGMA], "7");
}

#[tokio::test]
async fn unrecorded_answer_leaves_user_and_session_untouched() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    engine.handle(&from(111, "7")).await;

    let ledger = remote.snapshot(ATTEMPTS).unwrap();
    assert!(remote.remove_table(ATTEMPTS));
    engine.store().load().await.unwrap();

    let replies = engine.handle(&from(111, "bar")).await;
    assert!(texts(&replies)[0].starts_with("Sorry, something went wrong"));
    assert_eq!(
        engine.state_of(111).await,
        Some(ConversationState::ExpectAnswer { enigma_id: 7 })
    );
    let user = engine.users().get(111).unwrap();
    assert_eq!(user.current_enigma, 7);
    assert_eq!(user.score, 0);

    remote.put_table(ATTEMPTS, ledger);
    engine.store().load().await.unwrap();
    engine.handle(&from(111, "bar")).await;

    let user = engine.users().get(111).unwrap();
    assert_eq!(user.current_enigma, 0);
    assert_eq!(user.score, 1);
    assert_eq!(remote.snapshot(ATTEMPTS).unwrap().rows.len(), 1);
}

#[tokio::test]
async fn unknown_commands_leave_state_alone() {
    let remote = remote();
    let engine = engine_over(&remote).await;

    engine.handle(&from(111, "/new_enigma")).await;
    let replies = engine.handle(&from(111, "/dance")).await;

    assert!(texts(&replies)[0].contains("/dance"));
    assert_eq!(engine.state_of(111).await, Some(ConversationState::ExpectEnigmaId));
}

// ── dispatcher ───────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingTransport {
    fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, chat_id: i64, text: &str, _rich: bool) -> BotResult<()> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn forward_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
    ) -> BotResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to_chat_id, format!("forward {from_chat_id}/{message_id}")));
        Ok(())
    }
}

#[tokio::test]
async fn dispatcher_keeps_per_user_order() {
    let remote = remote();
    let engine = Arc::new(engine_over(&remote).await);
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = Dispatcher::new(engine.clone(), transport.clone())
        .with_idle_timeout(Duration::from_millis(50));

    for text in ["/new_enigma", "7", "bar"] {
        assert!(dispatcher.submit(from(111, text)));
        assert!(dispatcher.submit(from(222, "/help")));
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    let replies = transport.sent_to(111);
    assert_eq!(replies.len(), 5);
    assert!(replies[0].starts_with("Which enigma"));
    assert!(replies[1].starts_with("Enigma #7"));
    assert!(replies[3].starts_with("Correct"));
    assert_eq!(transport.sent_to(222).len(), 3);
    assert_eq!(engine.state_of(111).await, Some(ConversationState::Idle));

    // Idle workers retire.
    assert_eq!(dispatcher.active_workers(), 0);
}

#[tokio::test]
async fn flooding_user_is_refused_without_blocking_others() {
    let remote = remote();
    let engine = Arc::new(engine_over(&remote).await);
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = Dispatcher::new(engine, transport.clone())
        .with_queue_capacity(1)
        .with_idle_timeout(Duration::from_millis(50));

    // No await between submits: the workers cannot drain anything yet.
    let accepted: Vec<bool> = (0..4)
        .map(|_| dispatcher.submit(from(555, "/help")))
        .collect();
    assert_eq!(accepted, vec![true, false, false, false]);
    assert!(dispatcher.submit(from(222, "/help")));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let to_flooder = transport.sent_to(555);
    assert_eq!(to_flooder.len(), 4);
    assert_eq!(
        to_flooder
            .iter()
            .filter(|t| t.contains("faster than I can answer"))
            .count(),
        3
    );
    assert_eq!(transport.sent_to(222).len(), 1);
}
