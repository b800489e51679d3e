//! Roster of participants and sender attribution.
//!
//! An [`Address`] is a user portion plus a network suffix. Inbound messages
//! report the sender's host as the suffix, which rarely matches the suffix we
//! built the outbound address with, so attribution compares user portions only.

use std::fmt;

use serde::Deserialize;

use crate::error::{Error, Result};

/// A routable identity on the chat network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    user: String,
    network: String,
}

impl Address {
    pub fn new(user: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            network: network.into(),
        }
    }

    /// Build an address from a raw phone-number-like string.
    ///
    /// A leading `+` and common separators (space, `-`, `.`, parentheses) are
    /// dropped; what remains must be ASCII digits.
    pub fn from_number(name: &str, raw: &str, network: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let digits: String = trimmed
            .strip_prefix('+')
            .unwrap_or(trimmed)
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidNumber {
                name: name.to_string(),
                raw: raw.to_string(),
            });
        }
        Ok(Self::new(digits, network))
    }

    /// Build the report recipient: a channel (`#ops`, `&ops`) or a nick.
    pub fn recipient(raw: &str, network: &str) -> Result<Self> {
        let target = raw.trim();
        let bad_char = |c: char| c.is_whitespace() || matches!(c, ',' | '!' | '@' | ':');
        if target.is_empty() || target.chars().any(bad_char) {
            return Err(Error::InvalidRecipient(raw.to_string()));
        }
        Ok(Self::new(target, network))
    }

    /// Parse an IRC source hostmask (`nick!ident@host`). A bare nick gets an
    /// empty network.
    pub fn from_hostmask(prefix: &str) -> Self {
        let (nick, rest) = prefix.split_once('!').unwrap_or((prefix, ""));
        let host = rest.rsplit_once('@').map(|(_, h)| h).unwrap_or("");
        Self::new(nick, host)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Same participant regardless of network suffix.
    pub fn same_user(&self, other: &Address) -> bool {
        self.user == other.user
    }

    pub fn is_channel(&self) -> bool {
        self.user.starts_with('#') || self.user.starts_with('&')
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.network.is_empty() {
            f.write_str(&self.user)
        } else {
            write!(f, "{}@{}", self.user, self.network)
        }
    }
}

/// One roster line as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub number: String,
}

/// A person taking part in the roll call.
#[derive(Debug, Clone)]
pub struct Participant {
    display_name: String,
    address: Address,
    response: Option<String>,
}

impl Participant {
    pub fn new(display_name: impl Into<String>, address: Address) -> Self {
        Self {
            display_name: display_name.into(),
            address,
            response: None,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn has_answered(&self) -> bool {
        self.response.is_some()
    }

    /// Record the first answer. Returns false (and keeps the old answer) if
    /// one was already recorded.
    pub fn record_response(&mut self, text: impl Into<String>) -> bool {
        if self.response.is_some() {
            return false;
        }
        self.response = Some(text.into());
        true
    }
}

/// Ordered, non-empty list of participants.
#[derive(Debug, Clone)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    /// Rejects an empty list and any two participants sharing a user portion.
    pub fn new(participants: Vec<Participant>) -> Result<Self> {
        if participants.is_empty() {
            return Err(Error::EmptyRoster);
        }
        for (i, p) in participants.iter().enumerate() {
            if let Some(earlier) = participants[..i]
                .iter()
                .find(|q| q.address.same_user(&p.address))
            {
                return Err(Error::DuplicateAddress {
                    user: p.address.user().to_string(),
                    first: earlier.display_name.clone(),
                    second: p.display_name.clone(),
                });
            }
        }
        Ok(Self { participants })
    }

    /// Build from on-disk entries, deriving each address with `network` as suffix.
    pub fn from_entries(entries: &[RosterEntry], network: &str) -> Result<Self> {
        let participants = entries
            .iter()
            .map(|e| {
                Address::from_number(&e.name, &e.number, network)
                    .map(|a| Participant::new(&e.name, a))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(participants)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Attribute a sender to a participant. First match wins.
    pub fn find_by_address(&self, address: &Address) -> Option<&Participant> {
        self.participants.iter().find(|p| p.address.same_user(address))
    }

    pub fn find_by_address_mut(&mut self, address: &Address) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.address.same_user(address))
    }

    pub fn all_answered(&self) -> bool {
        self.participants.iter().all(Participant::has_answered)
    }

    pub fn answered_count(&self) -> usize {
        self.participants.iter().filter(|p| p.has_answered()).count()
    }
}
