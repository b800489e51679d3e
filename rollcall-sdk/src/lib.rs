//! rollcall-sdk: a small IRCv3 client.
//!
//! Connects over TCP or TLS, registers, negotiates `message-tags` and
//! `server-time`, keeps the connection alive, and surfaces parsed events.

pub mod client;
pub mod event;
pub mod irc;
