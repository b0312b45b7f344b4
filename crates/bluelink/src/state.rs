//! Connection state of a peripheral

use crate::gatt::constants::*;
use crate::scope::TaskScope;
use std::fmt;

/// Cause reported with a transition to [`State::Disconnected`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectStatus {
    L2capFailure,
    Timeout,
    /// Remote device terminated the link
    PeripheralDisconnected,
    /// Local host terminated the link
    CentralDisconnected,
    LinkManagerProtocolTimeout,
    Failed,
    Cancelled,
    Unknown(u16),
}

impl DisconnectStatus {
    /// Maps a link-loss reason to a status. A zero reason carries no cause.
    pub fn from_reason(reason: u16) -> Option<DisconnectStatus> {
        let status = match reason {
            LINK_REASON_SUCCESS => return None,
            LINK_REASON_L2CAP_FAILURE => DisconnectStatus::L2capFailure,
            LINK_REASON_TIMEOUT => DisconnectStatus::Timeout,
            LINK_REASON_PEER_USER => DisconnectStatus::PeripheralDisconnected,
            LINK_REASON_LOCAL_HOST => DisconnectStatus::CentralDisconnected,
            LINK_REASON_LMP_TIMEOUT => DisconnectStatus::LinkManagerProtocolTimeout,
            LINK_REASON_FAILED_ESTABLISHMENT => DisconnectStatus::Failed,
            LINK_REASON_CANCELLED => DisconnectStatus::Cancelled,
            other => DisconnectStatus::Unknown(other),
        };
        Some(status)
    }
}

impl fmt::Display for DisconnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectStatus::L2capFailure => write!(f, "L2CAP Failure"),
            DisconnectStatus::Timeout => write!(f, "Timeout"),
            DisconnectStatus::PeripheralDisconnected => write!(f, "Peripheral Disconnected"),
            DisconnectStatus::CentralDisconnected => write!(f, "Central Disconnected"),
            DisconnectStatus::LinkManagerProtocolTimeout => write!(f, "LMP Timeout"),
            DisconnectStatus::Failed => write!(f, "Failed"),
            DisconnectStatus::Cancelled => write!(f, "Cancelled"),
            DisconnectStatus::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// Phase of an in-progress connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Connecting {
    /// Waiting for the link to come up
    Bluetooth,
    /// Link is up; discovering services
    Services,
    /// Re-arming observations
    Observes,
}

/// Connection state of a peripheral
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Disconnected(Option<DisconnectStatus>),
    Connecting(Connecting),
    /// Carries the scope that tasks bound to this connection are spawned in
    Connected(TaskScope),
    Disconnecting,
}

impl State {
    fn rank(&self) -> u8 {
        match self {
            State::Disconnected(_) => 0,
            State::Disconnecting => 1,
            State::Connecting(Connecting::Bluetooth) => 2,
            State::Connecting(Connecting::Services) => 3,
            State::Connecting(Connecting::Observes) => 4,
            State::Connected(_) => 5,
        }
    }

    /// Whether this state is at or past `other` in the ordering
    /// `Disconnected < Disconnecting < Connecting(..) < Connected`.
    pub fn is_at_least(&self, other: &State) -> bool {
        self.rank() >= other.rank()
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, State::Disconnected(_))
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, State::Connected(_))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Disconnected(None) => write!(f, "Disconnected"),
            State::Disconnected(Some(status)) => write!(f, "Disconnected({})", status),
            State::Connecting(phase) => write!(f, "Connecting.{:?}", phase),
            State::Connected(_) => write!(f, "Connected"),
            State::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}
