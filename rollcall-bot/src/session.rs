//! The roll-call session and its lifecycle.
//!
//! `Pending` until the prompt has gone out to everyone, `Open` while replies
//! are collected, `Complete` once the report has been delivered. There is no
//! way back: one session per process.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::roster::{Address, Roster};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Open {
        started_at: DateTime<Utc>,
    },
    Complete {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
}

#[derive(Debug)]
pub struct Session {
    roster: Roster,
    recipient: Address,
    phase: Phase,
}

impl Session {
    pub fn new(roster: Roster, recipient: Address) -> Self {
        Self {
            roster,
            recipient,
            phase: Phase::Pending,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut Roster {
        &mut self.roster
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// When the prompt finished going out, if it has.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            Phase::Pending => None,
            Phase::Open { started_at } | Phase::Complete { started_at, .. } => Some(started_at),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open { .. })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, Phase::Complete { .. })
    }

    /// Start accepting replies. Replies must be strictly newer than `at`.
    pub fn open(&mut self, at: DateTime<Utc>) -> Result<()> {
        match self.phase {
            Phase::Pending => {
                self.phase = Phase::Open { started_at: at };
                Ok(())
            }
            _ => Err(Error::AlreadyStarted),
        }
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
        match self.phase {
            Phase::Open { started_at } => {
                self.phase = Phase::Complete {
                    started_at,
                    completed_at: at,
                };
                Ok(())
            }
            _ => Err(Error::NotOpen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{Participant, Roster};
    use chrono::Duration;

    fn session() -> Session {
        let alice = Participant::new("Alice", Address::new("1", "net"));
        let roster = Roster::new(vec![alice]).unwrap();
        Session::new(roster, Address::new("commander", "net"))
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut s = session();
        assert_eq!(s.phase(), Phase::Pending);
        assert!(s.started_at().is_none());
        assert!(matches!(s.complete(Utc::now()), Err(Error::NotOpen)));

        let t0 = Utc::now();
        s.open(t0).unwrap();
        assert!(s.is_open());
        assert_eq!(s.started_at(), Some(t0));
        assert!(matches!(s.open(t0 + Duration::seconds(1)), Err(Error::AlreadyStarted)));

        let t1 = t0 + Duration::seconds(5);
        s.complete(t1).unwrap();
        assert!(s.is_complete());
        assert_eq!(s.started_at(), Some(t0));
        assert!(matches!(s.open(t1), Err(Error::AlreadyStarted)));
        assert!(matches!(s.complete(t1), Err(Error::NotOpen)));
    }
}
