//! Drives one roll call: prompt everyone, feed replies through the filter
//! chain, stop when the report is out.

use std::future::Future;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::filter::{self, Filter, Verdict};
use crate::report::PROMPT;
use crate::session::Session;
use crate::transport::{InboundEvent, Transport};

/// How a roll call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everyone answered and the report was delivered.
    Completed,
    /// A shutdown signal arrived first.
    Interrupted,
    /// The event stream ended first (connection lost).
    StreamClosed,
}

pub struct Coordinator<T: Transport> {
    session: Session,
    transport: T,
    filters: Vec<Box<dyn Filter>>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(session: Session, transport: T) -> Self {
        Self {
            session,
            transport,
            filters: filter::default_chain(),
        }
    }

    /// Replace the filter chain.
    pub fn with_filters(mut self, filters: Vec<Box<dyn Filter>>) -> Self {
        self.filters = filters;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send the prompt to every participant in roster order, then open the
    /// session. The first failed send aborts the roll call.
    pub async fn start(&mut self) -> Result<()> {
        if self.session.started_at().is_some() {
            return Err(Error::AlreadyStarted);
        }
        for participant in self.session.roster().participants() {
            self.transport
                .send_text(participant.address(), PROMPT)
                .await
                .map_err(|e| Error::Prompt {
                    name: participant.display_name().to_string(),
                    reason: format!("{e:#}"),
                })?;
            tracing::debug!(name = participant.display_name(), "Prompt sent");
        }
        let started_at = Utc::now();
        self.session.open(started_at)?;
        tracing::info!(
            participants = self.session.roster().len(),
            %started_at,
            "Roll call started"
        );
        Ok(())
    }

    /// Run one event through the whole chain.
    ///
    /// Failures of non-critical filters are logged and the chain continues;
    /// a critical failure is returned.
    pub async fn dispatch(&mut self, event: &InboundEvent) -> anyhow::Result<Verdict> {
        let mut verdict = Verdict::Continue;
        for filter in &self.filters {
            match filter.handle(event, &mut self.session, &self.transport).await {
                Ok(Verdict::Complete) => verdict = Verdict::Complete,
                Ok(Verdict::Continue) => {}
                Err(e) if filter.is_critical() => {
                    return Err(e.context(format!("{} filter failed", filter.name())));
                }
                Err(e) => {
                    tracing::warn!(
                        filter = filter.name(),
                        sender = %event.sender,
                        error = %e,
                        "Filter failed"
                    );
                }
            }
        }
        Ok(verdict)
    }

    /// Consume inbound events until the roll call completes, `shutdown`
    /// resolves, or the stream ends.
    pub async fn run<S>(
        &mut self,
        events: &mut mpsc::Receiver<InboundEvent>,
        shutdown: S,
    ) -> anyhow::Result<Outcome>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::warn!(
                            answered = self.session.roster().answered_count(),
                            total = self.session.roster().len(),
                            "Event stream closed before everyone answered"
                        );
                        return Ok(Outcome::StreamClosed);
                    };
                    if self.dispatch(&event).await? == Verdict::Complete {
                        return Ok(Outcome::Completed);
                    }
                }
                () = &mut shutdown => {
                    tracing::warn!(
                        answered = self.session.roster().answered_count(),
                        total = self.session.roster().len(),
                        "Roll call interrupted"
                    );
                    return Ok(Outcome::Interrupted);
                }
            }
        }
    }

    /// Hang up the transport. Errors are logged; there is nothing left to do
    /// with the connection either way.
    pub async fn shutdown(&self) {
        if let Err(e) = self.transport.disconnect().await {
            tracing::warn!(error = %e, "Disconnect failed");
        }
    }
}
