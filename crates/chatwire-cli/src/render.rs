//! Incremental transcript printing.
//!
//! The transcript is re-published in full on every change; this module works
//! out what is new since the last call and writes only that.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use chatwire_client::{ChatMessage, MessageId, Role, SessionStatus};

/// Remembers how much of each message has been written.
#[derive(Debug, Default)]
pub struct Transcript {
    printed: HashMap<MessageId, usize>,
    finished: HashSet<MessageId>,
    thinking: bool,
}

impl Transcript {
    /// Write whatever changed since the previous call.
    pub fn render(&mut self, messages: &[ChatMessage], out: &mut impl Write) -> io::Result<()> {
        let thinking = messages.iter().any(|m| m.is_thinking);
        if thinking && !self.thinking {
            writeln!(out, "(thinking...)")?;
        }
        self.thinking = thinking;

        for message in messages.iter().filter(|m| !m.is_thinking) {
            if self.finished.contains(&message.id) {
                continue;
            }
            match message.role {
                // The terminal already echoed what the user typed.
                Role::User => {
                    self.finished.insert(message.id);
                }
                Role::Error => {
                    writeln!(out, "[error] {}", message.content)?;
                    self.finished.insert(message.id);
                }
                Role::Assistant => {
                    let printed = self.printed.entry(message.id).or_default();
                    if let Some(new) = message.content.get(*printed..) {
                        out.write_all(new.as_bytes())?;
                        *printed = message.content.len();
                    }
                    if !message.is_streaming {
                        writeln!(out)?;
                        self.printed.remove(&message.id);
                        self.finished.insert(message.id);
                    }
                }
            }
        }
        out.flush()
    }
}

/// One-line description of a status change, if it is worth showing.
pub fn describe_status(previous: &SessionStatus, current: &SessionStatus) -> Option<String> {
    if current.auth_error != previous.auth_error {
        if let Some(error) = &current.auth_error {
            return Some(format!("[auth error] {error}"));
        }
    }
    if current.is_connected && !previous.is_connected {
        return Some("[connected]".to_string());
    }
    if current.reconnecting && !previous.reconnecting {
        return Some("[connection lost, reconnecting...]".to_string());
    }
    if !current.is_connected && previous.is_connected && !current.reconnecting {
        return Some("[disconnected]".to_string());
    }
    None
}
