//! Events emitted by the IRC client for the consumer.

use std::collections::HashMap;

/// Events that the SDK emits to the consumer (bot, tests, etc.)
#[derive(Debug, Clone)]
pub enum Event {
    /// Successfully connected to the server.
    Connected,

    /// IRC registration complete. `nick` is our confirmed nick.
    Registered {
        nick: String,
    },

    /// A message in a channel or private message.
    Message {
        /// Full source hostmask (`nick!user@host`).
        from: String,
        target: String,
        text: String,
        /// IRCv3 message tags (empty if none).
        tags: HashMap<String, String>,
    },

    /// A TAGMSG (tags only, no body). Carries reactions and typing indicators.
    TagMsg {
        from: String,
        target: String,
        tags: HashMap<String, String>,
    },

    /// Server sent an error or notice.
    ServerNotice {
        text: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },

    /// Raw server line (for debugging).
    RawLine(String),
}
