//! Wire texts of the chat protocol.
//!
//! Everything on the wire is plain text. Each read of up to
//! [`READ_BUFFER_SIZE`] bytes is split on `\n` and every segment is one line;
//! everything the server writes is terminated by a single `\n`.

use std::time::Duration;

/// Client request to leave the chat (exact match after trimming)
pub const EXIT_COMMAND: &str = ".exit";

pub const READ_BUFFER_SIZE: usize = 1024;

const SERVER_NAME: &str = "Server";

/// Why a requested display name was refused.
///
/// The `Display` text is what the client sees (after the server prefix).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("the name cannot be empty")]
    Empty,

    #[error("the name cannot contain spaces")]
    ContainsWhitespace,

    #[error("a user with that name is already in the chat")]
    Taken,
}

/// Trim a requested name and check it against the naming rules.
pub fn validate_name(raw: &str) -> Result<&str, NameError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(NameError::ContainsWhitespace);
    }
    Ok(name)
}

/// Split one raw read into trimmed lines.
///
/// A single trailing newline does not produce an extra empty line, so `"\n"`
/// yields one empty line and `"alice\n"` yields `["alice"]`.
pub fn split_lines(chunk: &[u8]) -> Vec<String> {
    let lossy = String::from_utf8_lossy(chunk);
    let text: &str = &lossy;
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n').map(|line| line.trim().to_string()).collect()
}

pub fn server_line(text: &str) -> String {
    format!("{SERVER_NAME} > {text}")
}

pub fn chat_line(name: &str, text: &str) -> String {
    format!("{name} > {text}")
}

pub fn name_prompt() -> String {
    server_line("Enter a username")
}

pub fn name_rejected(err: &NameError) -> String {
    server_line(&err.to_string())
}

pub fn joined(name: &str) -> String {
    server_line(&format!("user {name} has joined the chat"))
}

pub fn left(name: &str) -> String {
    server_line(&format!("user {name} has left the chat"))
}

pub fn chat_full(max_users: usize, grace: Duration) -> String {
    server_line(&format!(
        "the chat is full ({max_users} users max), try again later (closing connection in {}s)",
        grace.as_secs()
    ))
}

pub fn shutting_down(grace: Duration) -> String {
    server_line(&format!(
        "the server is shutting down in {}s...",
        grace.as_secs()
    ))
}
