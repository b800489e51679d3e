//! The chain of filters every inbound event runs through.
//!
//! Order matters: acknowledge, capture, completion, log. A later filter sees
//! the state changes made by earlier ones in the same pass, so the reply that
//! completes the roster also triggers the report.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Error;
use crate::report::{self, ACK_EMOJI};
use crate::roster::Participant;
use crate::session::Session;
use crate::transport::{InboundEvent, Transport};

/// What the coordinator should do after a filter ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// The roll call is over; stop consuming events.
    Complete,
}

#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Errors from a critical filter end the roll call. Others are logged
    /// and the chain moves on.
    fn is_critical(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        event: &InboundEvent,
        session: &mut Session,
        transport: &dyn Transport,
    ) -> anyhow::Result<Verdict>;
}

/// The filters in the order they must run.
pub fn default_chain() -> Vec<Box<dyn Filter>> {
    vec![
        Box::new(Acknowledge),
        Box::new(Capture),
        Box::new(Completion),
        Box::new(LogEvent),
    ]
}

/// The participant this event should count for, if it is a fresh reply:
/// the session is open, the sender is on the roster and hasn't answered
/// yet, and the message is strictly newer than the prompt.
pub fn eligible_participant<'a>(
    session: &'a Session,
    event: &InboundEvent,
) -> Option<&'a Participant> {
    let started_at = session.started_at().filter(|_| session.is_open())?;
    let participant = session.roster().find_by_address(&event.sender)?;
    (!participant.has_answered() && event.timestamp > started_at).then_some(participant)
}

/// Reacts to a participant's first reply.
pub struct Acknowledge;

#[async_trait]
impl Filter for Acknowledge {
    fn name(&self) -> &'static str {
        "acknowledge"
    }

    async fn handle(
        &self,
        event: &InboundEvent,
        session: &mut Session,
        transport: &dyn Transport,
    ) -> anyhow::Result<Verdict> {
        if let Some(participant) = eligible_participant(session, event) {
            transport
                .react(
                    participant.address(),
                    &event.chat,
                    event.message_id.as_deref(),
                    ACK_EMOJI,
                )
                .await?;
        }
        Ok(Verdict::Continue)
    }
}

/// Stores a participant's first reply.
pub struct Capture;

#[async_trait]
impl Filter for Capture {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn handle(
        &self,
        event: &InboundEvent,
        session: &mut Session,
        _transport: &dyn Transport,
    ) -> anyhow::Result<Verdict> {
        if eligible_participant(session, event).is_none() {
            tracing::trace!(sender = %event.sender, "Not an eligible reply");
            return Ok(Verdict::Continue);
        }
        let content = event.payload.content();
        if let Some(participant) = session.roster_mut().find_by_address_mut(&event.sender)
            && participant.record_response(content)
        {
            tracing::info!(
                name = participant.display_name(),
                address = %participant.address(),
                response = content,
                "Participant answered"
            );
        }
        let roster = session.roster();
        tracing::info!(
            answered = roster.answered_count(),
            total = roster.len(),
            "Roll call progress"
        );
        Ok(Verdict::Continue)
    }
}

/// Sends the report once everyone has answered.
pub struct Completion;

#[async_trait]
impl Filter for Completion {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        _event: &InboundEvent,
        session: &mut Session,
        transport: &dyn Transport,
    ) -> anyhow::Result<Verdict> {
        if !session.is_open() || !session.roster().all_answered() {
            return Ok(Verdict::Continue);
        }
        let text = report::compose(session.roster());
        let recipient = session.recipient().clone();
        transport
            .send_text(&recipient, &text)
            .await
            .map_err(|e| Error::Report {
                recipient: recipient.to_string(),
                reason: format!("{e:#}"),
            })?;
        session.complete(Utc::now())?;
        tracing::info!(recipient = %recipient, "Report delivered");
        Ok(Verdict::Complete)
    }
}

/// Records every raw event for debugging.
pub struct LogEvent;

#[async_trait]
impl Filter for LogEvent {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn handle(
        &self,
        event: &InboundEvent,
        _session: &mut Session,
        _transport: &dyn Transport,
    ) -> anyhow::Result<Verdict> {
        tracing::debug!(?event, "Inbound event");
        Ok(Verdict::Continue)
    }
}
