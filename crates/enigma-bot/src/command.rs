//! Slash-command parsing.

use std::fmt;

/// A recognised bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    NewEnigma,
    Cancel,
    Contact,
    Suggest,
    Report,
    AddEnigma,
    /// Admin-only full reload of the table cache.
    Update,
    Progress,
    /// Any other `/word`.
    Unknown(String),
}

impl Command {
    /// Parse the leading `/command` of a message.
    ///
    /// Returns `None` for plain text. A `@botname` suffix is ignored, as is
    /// anything after the first whitespace.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim_start().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() {
            return None;
        }

        Some(match name {
            "start" => Self::Start,
            "help" => Self::Help,
            "new_enigma" => Self::NewEnigma,
            "cancel" => Self::Cancel,
            "contact" => Self::Contact,
            "suggest" => Self::Suggest,
            "report" => Self::Report,
            "add_enigma" => Self::AddEnigma,
            "update" => Self::Update,
            "progress" => Self::Progress,
            other => Self::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::NewEnigma => "new_enigma",
            Self::Cancel => "cancel",
            Self::Contact => "contact",
            Self::Suggest => "suggest",
            Self::Report => "report",
            Self::AddEnigma => "add_enigma",
            Self::Update => "update",
            Self::Progress => "progress",
            Self::Unknown(name) => name,
        };
        write!(f, "/{name}")
    }
}
