//! The conversation log.
//!
//! Append-only and ordered. Every append persists the full log through the
//! configured [`LogStore`]; a failed persist is logged and the in-memory log
//! stays authoritative.

use std::fmt;
use std::str::FromStr;

use glimpse_core::message::{ContentPart, Role, Turn, TurnContent};
use glimpse_core::tool::WEB_SEARCH;
use tracing::{trace, warn};

use crate::store::{LogStore, NoopLogStore};

/// How much of the log is replayed into a model invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryMode {
    /// Every turn, verbatim.
    #[default]
    Full,
    /// Tool traffic of earlier exchanges is dropped; text is kept.
    Compact,
}

impl FromStr for HistoryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown history mode: {other}")),
        }
    }
}

impl fmt::Display for HistoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Compact => f.write_str("compact"),
        }
    }
}

/// Ordered, append-only store of turns.
pub struct ConversationLog {
    turns: Vec<Turn>,
    store: Box<dyn LogStore>,
}

impl ConversationLog {
    pub fn new(store: Box<dyn LogStore>) -> Self {
        Self {
            turns: Vec::new(),
            store,
        }
    }

    /// A log that is never persisted.
    pub fn in_memory() -> Self {
        Self::new(Box::new(NoopLogStore))
    }

    /// Append a turn and persist the whole log.
    pub fn append(&mut self, turn: Turn) {
        trace!(role = ?turn.role, id = %turn.id, "Appending turn");
        self.turns.push(turn);
        if let Err(e) = self.store.persist(&self.turns) {
            warn!(store = self.store.name(), error = %e, "Failed to persist conversation log");
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Ordered turns for a model invocation.
    ///
    /// In compact mode, tool calls and tool results that precede the latest
    /// user turn are removed. The latest user turn and everything after it is
    /// always replayed in full.
    pub fn snapshot(&self, mode: HistoryMode) -> Vec<Turn> {
        match mode {
            HistoryMode::Full => self.turns.clone(),
            HistoryMode::Compact => {
                let current = self
                    .turns
                    .iter()
                    .rposition(|t| t.role == Role::User)
                    .unwrap_or(0);

                let mut out = Vec::with_capacity(self.turns.len());
                for (i, turn) in self.turns.iter().enumerate() {
                    if i >= current {
                        out.push(turn.clone());
                        continue;
                    }
                    if let Some(stripped) = strip_tool_parts(turn) {
                        out.push(stripped);
                    }
                }
                out
            }
        }
    }

    /// The `query` argument of the most recent search call in the log.
    pub fn last_search_query(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .filter(|t| t.role == Role::Assistant)
            .flat_map(|t| {
                t.tool_calls()
                    .into_iter()
                    .rev()
                    .filter(|c| c.name == WEB_SEARCH)
                    .filter_map(|c| c.arguments["query"].as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
            .next()
    }
}

/// Remove tool parts from a turn; `None` when nothing textual remains.
fn strip_tool_parts(turn: &Turn) -> Option<Turn> {
    if turn.role == Role::Tool {
        return None;
    }
    match &turn.content {
        TurnContent::Text(_) => Some(turn.clone()),
        TurnContent::Parts(parts) => {
            let kept: Vec<ContentPart> = parts
                .iter()
                .filter(|p| matches!(p, ContentPart::Text { text } if !text.is_empty()))
                .cloned()
                .collect();
            if kept.is_empty() {
                return None;
            }
            Some(Turn {
                content: TurnContent::Parts(kept),
                ..turn.clone()
            })
        }
    }
}
