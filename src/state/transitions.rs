use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::error;

use crate::errors::Error;

/// Value of the `update-status` node annotation.
///
/// The annotation encodes a small state machine shared between the node agent
/// and the cluster operator. Which side may take which edge is defined by
/// [`Role::allowed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateStatus {
    /// Initial state: update_engine has not reported an update yet.
    NoUpdateAvailable,
    /// An update has been downloaded and may be applied.
    UpdateAvailable,
    /// The operator wants the available update applied.
    UpdateExpected,
    /// The agent is draining and rebooting into the update.
    UpdateInProgress,
    /// Updates on this node are not managed by the operator.
    Disabled,
}

impl UpdateStatus {
    pub const ALL: [UpdateStatus; 5] = [
        UpdateStatus::NoUpdateAvailable,
        UpdateStatus::UpdateAvailable,
        UpdateStatus::UpdateExpected,
        UpdateStatus::UpdateInProgress,
        UpdateStatus::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::NoUpdateAvailable => "no-update-available",
            UpdateStatus::UpdateAvailable => "update-available",
            UpdateStatus::UpdateExpected => "update-expected",
            UpdateStatus::UpdateInProgress => "update-in-progress",
            UpdateStatus::Disabled => "disabled",
        }
    }
}

impl Display for UpdateStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpdateStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidUpdateStatus(s.to_string()))
    }
}

/// The party writing the `update-status` annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Agent,
    Operator,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Agent => f.write_str("agent"),
            Role::Operator => f.write_str("operator"),
        }
    }
}

impl Role {
    /// Targets this role may move the annotation to from `from`.
    ///
    /// The agent and operator tables only share `UpdateAvailable` as a source
    /// state, and only the operator has an edge out of it.
    pub fn allowed(&self, from: UpdateStatus) -> &'static [UpdateStatus] {
        use UpdateStatus::*;
        match (self, from) {
            (Role::Agent, NoUpdateAvailable) => &[UpdateAvailable],
            (Role::Agent, UpdateExpected) => &[UpdateInProgress],
            (Role::Agent, UpdateInProgress) => &[NoUpdateAvailable],
            (Role::Agent, UpdateAvailable | Disabled) => &[],
            (Role::Operator, UpdateAvailable) => &[UpdateExpected],
            (Role::Operator, _) => &[],
        }
    }

    /// Re-asserting the current value is always allowed.
    pub fn can_transition(&self, from: UpdateStatus, to: UpdateStatus) -> bool {
        from == to || self.allowed(from).contains(&to)
    }
}

/// Reject a write that the transition table of `role` does not permit.
pub fn check_transition(role: Role, from: UpdateStatus, to: UpdateStatus) -> Result<(), Error> {
    if role.can_transition(from, to) {
        return Ok(());
    }
    error!(%role, %from, %to, "rejected update-status transition");
    Err(Error::ProtocolViolation { role, from, to })
}
