//! Agent lifecycle state and the rules for moving between states.
//!
//! The current state lives in a single atomic cell. The heartbeat loop reads
//! it on every tick; only the controller writes it, through
//! [`StateCell::transition`], which refuses anything the table below does
//! not allow.
//!
//! ```text
//! STARTING -> IDLE
//! IDLE     -> BUSY
//! BUSY     -> FINISHED | CLI_FAILED
//! FINISHED | CLI_FAILED -> IDLE                      (Wait directive)
//! STARTING | IDLE | BUSY | FINISHED | CLI_FAILED -> BACKEND_FAILURE | BACKEND_UNREACHABLE
//! BACKEND_FAILURE | BACKEND_UNREACHABLE -> BUSY      (coordinator re-dispatch)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state reported to the orchestrator on every heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum AgentState {
    Starting = 0,
    Idle = 1,
    Busy = 2,
    Finished = 3,
    CliFailed = 4,
    BackendFailure = 5,
    BackendUnreachable = 6,
}

impl AgentState {
    #[cfg(test)]
    const ALL: [Self; 7] = [
        Self::Starting,
        Self::Idle,
        Self::Busy,
        Self::Finished,
        Self::CliFailed,
        Self::BackendFailure,
        Self::BackendUnreachable,
    ];

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Idle,
            2 => Self::Busy,
            3 => Self::Finished,
            4 => Self::CliFailed,
            5 => Self::BackendFailure,
            _ => Self::BackendUnreachable,
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub const fn can_transition(self, to: Self) -> bool {
        use AgentState::{
            BackendFailure, BackendUnreachable, Busy, CliFailed, Finished, Idle, Starting,
        };

        match (self, to) {
            (Starting | Finished | CliFailed, Idle)
            | (Idle | BackendFailure | BackendUnreachable, Busy)
            | (Busy, Finished | CliFailed)
            | (
                Starting | Idle | Busy | Finished | CliFailed,
                BackendFailure | BackendUnreachable,
            ) => true,
            _ => false,
        }
    }

    /// States in which a `NewJob` directive may start a job.
    pub const fn accepts_job(self) -> bool {
        self.can_transition(Self::Busy)
    }

    /// Sticky states left only by a new job dispatch.
    pub const fn is_backend_error(self) -> bool {
        matches!(self, Self::BackendFailure | Self::BackendUnreachable)
    }

    /// Wire name, as serialized in heartbeats.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Finished => "FINISHED",
            Self::CliFailed => "CLI_FAILED",
            Self::BackendFailure => "BACKEND_FAILURE",
            Self::BackendUnreachable => "BACKEND_UNREACHABLE",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition the state table does not permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: AgentState,
    pub to: AgentState,
}

/// Atomic holder of the current [`AgentState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new(AgentState::Starting)
    }
}

impl StateCell {
    pub const fn new(initial: AgentState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    /// Snapshot of the current state.
    pub fn get(&self) -> AgentState {
        AgentState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if the table allows it from the current state.
    ///
    /// Returns the state that was replaced. The check and the swap happen
    /// atomically, so a concurrent writer can never slip an unchecked
    /// transition in between.
    pub fn transition(&self, to: AgentState) -> Result<AgentState, IllegalTransition> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                AgentState::from_u8(raw)
                    .can_transition(to)
                    .then_some(to as u8)
            })
            .map(AgentState::from_u8)
            .map_err(|raw| IllegalTransition {
                from: AgentState::from_u8(raw),
                to,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_starting() {
        assert_eq!(StateCell::default().get(), AgentState::Starting);
    }

    #[test]
    fn happy_path_transitions() {
        let cell = StateCell::default();
        assert_eq!(cell.transition(AgentState::Idle), Ok(AgentState::Starting));
        assert_eq!(cell.transition(AgentState::Busy), Ok(AgentState::Idle));
        assert_eq!(cell.transition(AgentState::Finished), Ok(AgentState::Busy));
        assert_eq!(cell.get(), AgentState::Finished);
    }

    #[test]
    fn finished_only_reachable_from_busy() {
        for from in AgentState::ALL {
            assert_eq!(
                from.can_transition(AgentState::Finished),
                from == AgentState::Busy,
                "{from} -> FINISHED"
            );
        }
    }

    #[test]
    fn cli_failed_only_reachable_from_busy() {
        for from in AgentState::ALL {
            assert_eq!(
                from.can_transition(AgentState::CliFailed),
                from == AgentState::Busy,
                "{from} -> CLI_FAILED"
            );
        }
        let cell = StateCell::new(AgentState::Idle);
        assert_eq!(
            cell.transition(AgentState::CliFailed),
            Err(IllegalTransition {
                from: AgentState::Idle,
                to: AgentState::CliFailed,
            })
        );
        assert_eq!(cell.get(), AgentState::Idle);
    }

    #[test]
    fn busy_refuses_a_second_job() {
        assert!(!AgentState::Busy.accepts_job());
        assert!(AgentState::Idle.accepts_job());
        assert!(AgentState::BackendFailure.accepts_job());
        assert!(AgentState::BackendUnreachable.accepts_job());
        assert!(!AgentState::Finished.accepts_job());
        assert!(!AgentState::Starting.accepts_job());
    }

    #[test]
    fn backend_errors_are_sticky() {
        for sticky in [AgentState::BackendFailure, AgentState::BackendUnreachable] {
            for to in AgentState::ALL {
                assert_eq!(sticky.can_transition(to), to == AgentState::Busy);
            }
        }
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_string(&AgentState::BackendUnreachable).unwrap();
        assert_eq!(json, "\"BACKEND_UNREACHABLE\"");
        for state in AgentState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn raw_roundtrip_covers_every_state() {
        for state in AgentState::ALL {
            assert_eq!(AgentState::from_u8(state as u8), state);
        }
    }
}
