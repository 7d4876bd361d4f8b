// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Derive the session key addressing a conversation in the remote agent
/// runtime (spec §4.9 step 4): `agent:main:<prefix>-<channel>` for
/// top-level messages, `agent:main:<prefix>-<channel>-<thread>` for thread
/// messages.
pub fn derive_session_key(prefix: &str, channel: &str, thread: Option<&str>) -> String {
    match thread {
        Some(thread) => format!("agent:main:{prefix}-{channel}-{thread}"),
        None => format!("agent:main:{prefix}-{channel}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_message_has_no_thread_suffix() {
        assert_eq!(derive_session_key("tg", "c1", None), "agent:main:tg-c1");
    }

    #[test]
    fn thread_message_appends_thread_id() {
        assert_eq!(derive_session_key("tg", "c1", Some("t9")), "agent:main:tg-c1-t9");
    }
}
