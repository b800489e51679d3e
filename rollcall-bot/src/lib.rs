//! rollcall-bot: a roll call over IRC.
//!
//! Sends a check-in prompt to every participant on the roster, acknowledges
//! each first reply with a reaction, and once everyone has answered sends a
//! consolidated report to the configured recipient.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod report;
pub mod roster;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
