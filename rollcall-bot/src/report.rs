//! Final report sent to the recipient once everyone has answered.
//!
//! The reply text itself is not inspected; any answer counts as "all good".

use crate::roster::Roster;

/// Check-in prompt sent to every participant.
pub const PROMPT: &str = "היי, הכל בסדר?";
/// Status line printed under every participant in the report.
pub const STATUS_OK: &str = "תקין";
/// Reaction used to acknowledge a participant's first reply.
pub const ACK_EMOJI: &str = "👍";
/// Separator between participants in the report.
pub const DIVIDER: &str = "--------------------";

pub fn compose(roster: &Roster) -> String {
    roster
        .participants()
        .iter()
        .map(|p| format!("*{}*\n{STATUS_OK}\n", p.display_name()))
        .collect::<Vec<_>>()
        .join(&format!("{DIVIDER}\n"))
}
