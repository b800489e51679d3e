//! Command-line / environment configuration and roster loading.
//!
//! Every flag has an environment fallback; a `.env` file in the working
//! directory is read first if present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use rollcall_sdk::client::ConnectConfig;

use crate::error::{Error, Result};
use crate::roster::{Address, Roster, RosterEntry};

/// Default IRC server.
pub const DEFAULT_SERVER: &str = "irc.freeq.at:6697";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "rollcall",
    about = "Roll call over IRC: prompt a roster, report when everyone answered"
)]
pub struct Args {
    /// IRC server address (host:port)
    #[arg(long, env = "ROLLCALL_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Bot nick
    #[arg(long, env = "ROLLCALL_NICK", default_value = "rollcall")]
    pub nick: String,

    /// Use TLS (implied for port 6697)
    #[arg(long, env = "ROLLCALL_TLS")]
    pub tls: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub tls_insecure: bool,

    /// Roster file: JSON array of {"name": ..., "number": ...}
    #[arg(long, env = "ROLLCALL_ROSTER", default_value = "roster.json")]
    pub roster: PathBuf,

    /// Who receives the final report (nick or #channel)
    #[arg(long, env = "COMMANDER_NUMBER")]
    pub recipient: String,

    /// Network suffix for participant addresses (defaults to the server host)
    #[arg(long, env = "ROLLCALL_NETWORK")]
    pub network: Option<String>,

    /// Seconds to wait for IRC registration before giving up
    #[arg(long, default_value_t = 30)]
    pub register_timeout: u64,
}

impl Args {
    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_addr: self.server.clone(),
            nick: self.nick.clone(),
            user: self.nick.clone(),
            realname: "roll-call bot".to_string(),
            tls: self.tls,
            tls_insecure: self.tls_insecure,
        }
    }

    /// Suffix used when building participant addresses.
    pub fn network(&self) -> String {
        self.network
            .clone()
            .unwrap_or_else(|| self.server.split(':').next().unwrap_or_default().to_string())
    }

    pub fn recipient_address(&self) -> Result<Address> {
        Address::recipient(&self.recipient, &self.network())
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout)
    }
}

/// Read and validate the roster file.
pub fn load_roster(path: &Path, network: &str) -> Result<Roster> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::RosterRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_roster(&raw, network).map_err(|e| match e {
        Error::RosterParse { source, .. } => Error::RosterParse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

fn parse_roster(raw: &str, network: &str) -> Result<Roster> {
    let entries: Vec<RosterEntry> = serde_json::from_str(raw).map_err(|source| Error::RosterParse {
        path: PathBuf::new(),
        source,
    })?;
    Roster::from_entries(&entries, network)
}
