//! Boundary between the roll call and the chat network.
//!
//! The core only needs to send text, react to a message, and hang up; it
//! receives [`InboundEvent`]s over a channel. [`IrcTransport`] and
//! [`forward_events`] plug `rollcall-sdk` into that boundary.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_sdk::client::ClientHandle;
use rollcall_sdk::event::Event;
use tokio::sync::mpsc;

use crate::roster::Address;

/// Longest PRIVMSG body we send in one line.
const MAX_LINE: usize = 400;

/// Outbound side of the chat network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a text message. Multi-line text is allowed. `Ok` means the
    /// network accepted every line.
    async fn send_text(&self, to: &Address, text: &str) -> anyhow::Result<()>;

    /// React to a message `sender` sent in `chat`.
    async fn react(
        &self,
        sender: &Address,
        chat: &str,
        message_id: Option<&str>,
        emoji: &str,
    ) -> anyhow::Result<()>;

    /// Release the connection.
    async fn disconnect(&self) -> anyhow::Result<()>;
}

/// Text carried by an inbound message, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    /// Text of a reply/quote-style message.
    pub extended_text: Option<String>,
    /// Plain conversation text.
    pub text: Option<String>,
}

impl Payload {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            extended_text: None,
            text: Some(text.into()),
        }
    }

    pub fn extended(text: impl Into<String>) -> Self {
        Self {
            extended_text: Some(text.into()),
            text: None,
        }
    }

    /// Quoted text wins over plain text; no text at all yields "".
    pub fn content(&self) -> &str {
        self.extended_text
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or("")
    }
}

/// One message observed on the network.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub sender: Address,
    /// Channel the message was posted in, or the sender's nick for a DM.
    pub chat: String,
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

/// [`Transport`] over a `rollcall-sdk` client connection.
#[derive(Clone)]
pub struct IrcTransport {
    handle: ClientHandle,
    line_delay: Duration,
    confirm_timeout: Duration,
}

impl IrcTransport {
    pub fn new(handle: ClientHandle) -> Self {
        Self {
            handle,
            line_delay: Duration::from_millis(100),
            confirm_timeout: Duration::from_secs(30),
        }
    }

    /// Pause between lines of a multi-line message, to stay under flood limits.
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    /// Join the report channel so the report isn't refused as an external
    /// message. Nick recipients need nothing.
    pub async fn join_recipient(&self, recipient: &Address) -> anyhow::Result<()> {
        if recipient.is_channel() {
            self.handle.join(recipient.user()).await?;
            tracing::info!(channel = recipient.user(), "Joining report channel");
        }
        Ok(())
    }

    /// How long to wait for the server to accept each line.
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for IrcTransport {
    async fn send_text(&self, to: &Address, text: &str) -> anyhow::Result<()> {
        for (i, line) in wrap_lines(text, MAX_LINE).iter().enumerate() {
            if i > 0 && !self.line_delay.is_zero() {
                tokio::time::sleep(self.line_delay).await;
            }
            let delivery = self.handle.privmsg_confirmed(to.user(), line);
            tokio::time::timeout(self.confirm_timeout, delivery)
                .await
                .with_context(|| format!("server did not confirm message to {to}"))??;
        }
        Ok(())
    }

    async fn react(
        &self,
        sender: &Address,
        chat: &str,
        message_id: Option<&str>,
        emoji: &str,
    ) -> anyhow::Result<()> {
        let target = if is_channel(chat) { chat } else { sender.user() };
        match message_id {
            Some(id) if !id.is_empty() => self.handle.react(target, emoji, id).await,
            // No msgid to point at: plain clients see the same thing the
            // server would downgrade a reaction to.
            _ => {
                self.handle
                    .privmsg(target, &format!("\x01ACTION reacted with {emoji}\x01"))
                    .await
            }
        }
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.handle.quit(Some("roll call complete")).await
    }
}

fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

/// Map an SDK event to an inbound roll-call event. `received_at` is used when
/// the server did not stamp the message with a `time` tag.
pub fn inbound_from_event(event: &Event, received_at: DateTime<Utc>) -> Option<InboundEvent> {
    let (from, target, tags, payload) = match event {
        Event::Message {
            from,
            target,
            text,
            tags,
        } => {
            let text = match text.strip_prefix('\x01') {
                Some(ctcp) => {
                    // Only /me is a real message; other CTCP is client chatter.
                    let body = ctcp.trim_end_matches('\x01').strip_prefix("ACTION")?;
                    body.trim_start().to_string()
                }
                None => text.clone(),
            };
            let payload = if tags.contains_key("+draft/reply") {
                Payload::extended(text)
            } else {
                Payload::plain(text)
            };
            (from, target, tags, payload)
        }
        Event::TagMsg { from, target, tags }
            if tags.contains_key("+draft/react") || tags.contains_key("+react") =>
        {
            (from, target, tags, Payload::default())
        }
        _ => return None,
    };

    let sender = Address::from_hostmask(from);
    if sender.user().is_empty() {
        return None;
    }
    let chat = if is_channel(target) {
        target.clone()
    } else {
        sender.user().to_string()
    };

    Some(InboundEvent {
        chat,
        message_id: tags.get("msgid").cloned(),
        timestamp: server_time(tags).unwrap_or(received_at),
        sender,
        payload,
    })
}

fn server_time(tags: &HashMap<String, String>) -> Option<DateTime<Utc>> {
    let raw = tags.get("time")?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Pump SDK events into the roll-call channel until either side closes.
///
/// Connection-level events are logged here; only messages reach the
/// coordinator.
pub async fn forward_events(mut events: mpsc::Receiver<Event>, tx: mpsc::Sender<InboundEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            Event::Connected => tracing::debug!("Connected"),
            Event::Registered { nick } => tracing::info!(nick = %nick, "Registered"),
            Event::ServerNotice { text } => tracing::info!(text = %text, "Server notice"),
            Event::Disconnected { reason } => tracing::warn!(reason = %reason, "Disconnected"),
            Event::RawLine(line) => tracing::trace!("<< {line}"),
            Event::Message { .. } | Event::TagMsg { .. } => {}
        }
        if let Some(inbound) = inbound_from_event(&event, Utc::now())
            && tx.send(inbound).await.is_err()
        {
            break;
        }
    }
}

/// Wrap text into non-empty lines of at most `max_len` bytes, breaking on
/// word boundaries.
fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        if line.len() <= max_len {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.len() + word.len() + 1 > max_len {
                result.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_sdk::client::Command;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn privmsg(from: &str, target: &str, text: &str, tags: HashMap<String, String>) -> Event {
        Event::Message {
            from: from.to_string(),
            target: target.to_string(),
            text: text.to_string(),
            tags,
        }
    }

    #[test]
    fn direct_message_maps_to_plain_text() {
        let now = Utc::now();
        let ev = privmsg(
            "1234!u@cloak.freeq",
            "rollcall",
            "all good",
            tags(&[("msgid", "m1"), ("time", "2025-03-01T08:00:00.250Z")]),
        );
        let inbound = inbound_from_event(&ev, now).unwrap();
        assert_eq!(inbound.sender, Address::new("1234", "cloak.freeq"));
        assert_eq!(inbound.chat, "1234");
        assert_eq!(inbound.message_id.as_deref(), Some("m1"));
        assert_eq!(inbound.timestamp.to_rfc3339(), "2025-03-01T08:00:00.250+00:00");
        assert_eq!(inbound.payload, Payload::plain("all good"));
    }

    #[test]
    fn reply_tag_marks_extended_text() {
        let ev = privmsg("1234!u@h", "#team", "yes", tags(&[("+draft/reply", "m0")]));
        let inbound = inbound_from_event(&ev, Utc::now()).unwrap();
        assert_eq!(inbound.chat, "#team");
        assert_eq!(inbound.payload, Payload::extended("yes"));
        assert_eq!(inbound.payload.content(), "yes");
    }

    #[test]
    fn missing_time_tag_uses_receipt_time() {
        let now = Utc::now();
        let ev = privmsg("1234!u@h", "rollcall", "ok", HashMap::new());
        let inbound = inbound_from_event(&ev, now).unwrap();
        assert_eq!(inbound.timestamp, now);
        assert!(inbound.message_id.is_none());
    }

    #[test]
    fn ctcp_action_is_unwrapped_and_other_ctcp_dropped() {
        let action = privmsg("1234!u@h", "rollcall", "\x01ACTION is fine\x01", HashMap::new());
        assert_eq!(inbound_from_event(&action, Utc::now()).unwrap().payload.content(), "is fine");

        let version = privmsg("1234!u@h", "rollcall", "\x01VERSION\x01", HashMap::new());
        assert!(inbound_from_event(&version, Utc::now()).is_none());
    }

    #[test]
    fn reaction_tagmsg_has_no_text() {
        let ev = Event::TagMsg {
            from: "1234!u@h".to_string(),
            target: "rollcall".to_string(),
            tags: tags(&[("+draft/react", "👍"), ("msgid", "m9")]),
        };
        let inbound = inbound_from_event(&ev, Utc::now()).unwrap();
        assert_eq!(inbound.payload, Payload::default());
        assert_eq!(inbound.payload.content(), "");
    }

    #[test]
    fn typing_and_connection_events_are_ignored() {
        let typing = Event::TagMsg {
            from: "1234!u@h".to_string(),
            target: "rollcall".to_string(),
            tags: tags(&[("+typing", "active")]),
        };
        assert!(inbound_from_event(&typing, Utc::now()).is_none());
        assert!(inbound_from_event(&Event::Connected, Utc::now()).is_none());
    }

    #[test]
    fn wrap_lines_drops_blank_lines_and_splits_long_ones() {
        assert_eq!(wrap_lines("*A*\nok\n\n", 400), vec!["*A*", "ok"]);
        let long = "word ".repeat(30);
        let wrapped = wrap_lines(&long, 20);
        assert!(wrapped.iter().all(|l| l.len() <= 20));
        assert_eq!(wrapped.join(" ").split(' ').count(), 30);
    }

    /// Stand-in for the connection task: renders each command as its IRC
    /// line and confirms every delivery except those to `reject`.
    fn fake_connection(
        reject: Option<&'static str>,
    ) -> (ClientHandle, mpsc::UnboundedReceiver<String>) {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let line = match cmd {
                    Command::ConfirmedPrivmsg { target, text, reply } => {
                        let delivery = if reject == Some(target.as_str()) {
                            Err("401 No such nick/channel".to_string())
                        } else {
                            Ok(())
                        };
                        let _ = reply.send(delivery);
                        format!("PRIVMSG {target} :{text}")
                    }
                    Command::Privmsg { target, text } => format!("PRIVMSG {target} :{text}"),
                    Command::Raw(line) => line,
                    Command::Quit(msg) => format!("QUIT {}", msg.unwrap_or_default()),
                    Command::Join(ch) => format!("JOIN {ch}"),
                };
                let _ = line_tx.send(line);
            }
        });
        (ClientHandle::from_sender(cmd_tx), line_rx)
    }

    async fn next_line(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn irc_transport_sends_one_privmsg_per_line() {
        let (handle, mut rx) = fake_connection(None);
        let transport = IrcTransport::new(handle).with_line_delay(Duration::ZERO);
        transport
            .send_text(&Address::new("commander", "net"), "*Alice*\nok\n")
            .await
            .unwrap();
        assert_eq!(next_line(&mut rx).await, "PRIVMSG commander :*Alice*");
        assert_eq!(next_line(&mut rx).await, "PRIVMSG commander :ok");
    }

    #[tokio::test]
    async fn irc_transport_send_fails_when_server_rejects_target() {
        let (handle, mut rx) = fake_connection(Some("commander"));
        let transport = IrcTransport::new(handle).with_line_delay(Duration::ZERO);
        let err = transport
            .send_text(&Address::new("commander", "net"), "*Alice*\nok\n")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("No such nick"), "{err:#}");
        // The first rejected line stops the rest.
        assert_eq!(next_line(&mut rx).await, "PRIVMSG commander :*Alice*");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn irc_transport_send_times_out_without_confirmation() {
        let (tx, _rx) = mpsc::channel(16);
        let transport = IrcTransport::new(ClientHandle::from_sender(tx))
            .with_confirm_timeout(Duration::from_millis(20));
        let err = transport
            .send_text(&Address::new("commander", "net"), "ok")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not confirm"), "{err}");
    }

    #[tokio::test]
    async fn irc_transport_joins_channel_recipient_only() {
        let (handle, mut rx) = fake_connection(None);
        let transport = IrcTransport::new(handle);
        transport.join_recipient(&Address::new("commander", "net")).await.unwrap();
        transport.join_recipient(&Address::new("#ops", "net")).await.unwrap();
        assert_eq!(next_line(&mut rx).await, "JOIN #ops");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn irc_transport_reacts_in_channel_or_dm() {
        let (handle, mut rx) = fake_connection(None);
        let transport = IrcTransport::new(handle);
        let sender = Address::new("1234", "h");

        transport.react(&sender, "#team", Some("m1"), "👍").await.unwrap();
        assert_eq!(next_line(&mut rx).await, "@+draft/react=👍;+draft/reply=m1 TAGMSG #team");

        transport.react(&sender, "1234", Some("m2"), "👍").await.unwrap();
        assert_eq!(next_line(&mut rx).await, "@+draft/react=👍;+draft/reply=m2 TAGMSG 1234");

        transport.react(&sender, "1234", None, "👍").await.unwrap();
        assert_eq!(next_line(&mut rx).await, "PRIVMSG 1234 :\x01ACTION reacted with 👍\x01");

        transport.disconnect().await.unwrap();
        assert_eq!(next_line(&mut rx).await, "QUIT roll call complete");
    }

    #[tokio::test]
    async fn forward_events_passes_messages_only() {
        let (sdk_tx, sdk_rx) = mpsc::channel(16);
        let (tx, mut rx) = mpsc::channel(16);
        let pump = tokio::spawn(forward_events(sdk_rx, tx));

        sdk_tx.send(Event::Connected).await.unwrap();
        sdk_tx.send(Event::Registered { nick: "rollcall".into() }).await.unwrap();
        sdk_tx
            .send(privmsg("1234!u@h", "rollcall", "ok", HashMap::new()))
            .await
            .unwrap();
        drop(sdk_tx);

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.sender.user(), "1234");
        assert!(rx.recv().await.is_none());
        pump.await.unwrap();
    }
}
