//! User-facing reply templates.
//!
//! Built-in English defaults can be overridden from the `[messages]`
//! section of `config/default.toml`. Nested tables are flattened into
//! dot-separated keys (`[messages.enigma] ask_id = "..."` overrides
//! `enigma.ask_id`). Placeholders are written `{name}`.

use std::collections::HashMap;

use tracing::warn;

// ---------------------------------------------------------------------------
// Message keys (compile-time constants to avoid typos)
// ---------------------------------------------------------------------------

pub mod keys {
    pub const WELCOME_NEW: &str = "start.welcome_new";
    pub const WELCOME_BACK: &str = "start.welcome_back";
    pub const HELP: &str = "help";
    pub const IDLE_HINT: &str = "idle.hint";
    pub const UNKNOWN_COMMAND: &str = "command.unknown";
    pub const BUSY: &str = "command.busy";

    pub const ASK_ID: &str = "enigma.ask_id";
    pub const INVALID_ID: &str = "enigma.invalid_id";
    pub const UNKNOWN_ID: &str = "enigma.unknown_id";
    pub const ALREADY_SOLVED: &str = "enigma.already_solved";
    pub const ASK_ANSWER: &str = "enigma.ask_answer";

    pub const CORRECT: &str = "answer.correct";
    pub const FEEDBACK: &str = "answer.feedback";
    pub const WRONG: &str = "answer.wrong";

    pub const CANCELLED: &str = "cancel.done";

    pub const PROMPT_CONTACT: &str = "forward.prompt_contact";
    pub const PROMPT_SUGGEST: &str = "forward.prompt_suggest";
    pub const PROMPT_REPORT: &str = "forward.prompt_report";
    pub const PROMPT_ADD_ENIGMA: &str = "forward.prompt_add_enigma";
    pub const FORWARD_HEADER: &str = "forward.header";
    pub const FORWARDED: &str = "forward.ack";
    pub const FORWARD_UNAVAILABLE: &str = "forward.unavailable";

    pub const UPDATE_DONE: &str = "update.done";
    pub const UPDATE_FAILED: &str = "update.failed";
    pub const UPDATE_DENIED: &str = "update.denied";

    pub const PROGRESS: &str = "progress.summary";
    pub const PROGRESS_EMPTY: &str = "progress.empty";

    pub const SLOW_DOWN: &str = "errors.slow_down";
    pub const ERROR_GENERAL: &str = "errors.general";
}

const DEFAULTS: &[(&str, &str)] = &[
    (
        keys::WELCOME_NEW,
        "Welcome {first_name}! You are now registered.\nSend /new_enigma to get a puzzle, or /help to see everything I can do.",
    ),
    (
        keys::WELCOME_BACK,
        "Welcome back {first_name}! Send /new_enigma to pick an enigma.",
    ),
    (
        keys::HELP,
        "/new_enigma - pick an enigma and answer it\n/progress - your score and solved enigmas\n/cancel - stop what you are doing\n/contact - write to the maintainers\n/suggest - suggest an improvement\n/report - report a problem\n/add_enigma - propose a new enigma",
    ),
    (keys::IDLE_HINT, "Send /new_enigma to play, or /help for the list of commands."),
    (keys::UNKNOWN_COMMAND, "I don't know {command}. Send /help for the list of commands."),
    (keys::BUSY, "Finish the current step first, or send /cancel."),
    (keys::ASK_ID, "Which enigma do you want? Send its number."),
    (keys::INVALID_ID, "\"{text}\" is not a number. Send the enigma number, or /cancel."),
    (
        keys::UNKNOWN_ID,
        "There is no enigma #{id}. Available: {known}\nSend another number, or /cancel.",
    ),
    (
        keys::ALREADY_SOLVED,
        "You already solved this one, your answer was: {answer}\nSend another number, or /cancel.",
    ),
    (keys::ASK_ANSWER, "Send your answer when you have it, or /cancel to stop."),
    (keys::CORRECT, "Correct, well done! Your score is now {score}."),
    (keys::FEEDBACK, "A word from the author: {feedback}"),
    (keys::WRONG, "Sorry, that is not the answer. Try again, or /cancel."),
    (keys::CANCELLED, "Cancelled. See you soon!"),
    (keys::PROMPT_CONTACT, "Write your message for the maintainers."),
    (keys::PROMPT_SUGGEST, "Describe your suggestion."),
    (keys::PROMPT_REPORT, "Describe the problem you found."),
    (
        keys::PROMPT_ADD_ENIGMA,
        "Send the enigma you want to add: its name, statement and answer.",
    ),
    (keys::FORWARD_HEADER, "[{topic}] from {name} (id {user_id})"),
    (keys::FORWARDED, "Thanks, your message was forwarded to the maintainers."),
    (keys::FORWARD_UNAVAILABLE, "Sorry, no maintainer is reachable right now."),
    (keys::UPDATE_DONE, "Reloaded {count} tables."),
    (keys::UPDATE_FAILED, "Reload failed, the previous data is still in use."),
    (keys::UPDATE_DENIED, "Only administrators can reload the data."),
    (keys::PROGRESS, "Score: {score}\nSolved: {solved}\nAttempts: {attempts}"),
    (
        keys::PROGRESS_EMPTY,
        "You have not solved any enigma yet. Send /new_enigma to start.",
    ),
    (keys::ERROR_GENERAL, "Sorry, something went wrong. Please try again."),
    (
        keys::SLOW_DOWN,
        "You are sending messages faster than I can answer. Please wait a moment and resend.",
    ),
];

// ---------------------------------------------------------------------------
// Messages store
// ---------------------------------------------------------------------------

/// Reply templates keyed by dotted name.
#[derive(Debug, Clone)]
pub struct Messages {
    templates: HashMap<String, String>,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            templates: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Messages {
    /// Defaults overridden by a parsed `[messages]` table.
    pub fn from_toml(section: &toml::Table) -> Self {
        let mut messages = Self::default();
        let mut overrides = HashMap::new();
        flatten("", section, &mut overrides);
        for (key, value) in overrides {
            if !messages.templates.contains_key(&key) {
                warn!(key = %key, "unknown message key in config, ignoring");
                continue;
            }
            messages.templates.insert(key, value);
        }
        messages
    }

    /// Template for `key`; the key itself when missing.
    pub fn get(&self, key: &str) -> String {
        self.templates
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Template for `key` with `{name}` placeholders substituted.
    pub fn get_with(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let mut msg = self.get(key);
        for (name, value) in vars {
            msg = msg.replace(&format!("{{{name}}}"), value);
        }
        msg
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::String(s) => {
                out.insert(full, s.clone());
            }
            toml::Value::Table(nested) => flatten(&full, nested, out),
            _ => warn!(key = %full, "message template is not a string, ignoring"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_key() {
        let messages = Messages::default();
        for (key, _) in DEFAULTS {
            assert_ne!(messages.get(key), *key);
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let messages = Messages::default();
        let text = messages.get_with(keys::UNKNOWN_ID, &[("id", "12")]);
        assert!(text.contains("#12"));
    }

    #[test]
    fn nested_overrides_apply() {
        let section: toml::Table = toml::from_str(
            r#"
            help = "Custom help"
            [enigma]
            ask_id = "Number please"
            bogus = "ignored"
            "#,
        )
        .unwrap();
        let messages = Messages::from_toml(&section);
        assert_eq!(messages.get(keys::HELP), "Custom help");
        assert_eq!(messages.get(keys::ASK_ID), "Number please");
        assert_eq!(messages.get("enigma.bogus"), "enigma.bogus");
    }
}
