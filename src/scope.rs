//! Helpers for `<kind>:<id>` scope strings.
//!
//! Scopes are free-form, but the chat services publish into two well-known
//! kinds: `server:<id>` for server-wide events (channel lifecycle, config)
//! and `channel:<id>` for per-channel traffic (messages).

/// Scope kind for server-wide events.
pub const SERVER: &str = "server";

/// Scope kind for per-channel events.
pub const CHANNEL: &str = "channel";

/// Build a `server:<id>` scope.
pub fn server(id: impl std::fmt::Display) -> String {
    format!("{SERVER}:{id}")
}

/// Build a `channel:<id>` scope.
pub fn channel(id: impl std::fmt::Display) -> String {
    format!("{CHANNEL}:{id}")
}

/// Split a scope into `(kind, id)`.
///
/// Returns `None` if there is no separator or either side is empty.
pub fn parse(scope: &str) -> Option<(&str, &str)> {
    let (kind, id) = scope.split_once(':')?;
    if kind.is_empty() || id.is_empty() {
        return None;
    }
    Some((kind, id))
}
