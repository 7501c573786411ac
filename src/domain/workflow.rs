//! Approval workflows for fund requests and IGP proposals.
//!
//! Both records carry a `status` field that moves through a fixed transition
//! table. A transition outside the table is refused before anything is
//! dispatched.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A status field with a fixed transition table.
pub trait StatusMachine: Copy + Eq + Display + FromStr + Send + Sync + 'static {
    /// Workflow name used in errors.
    const WORKFLOW: &'static str;
    /// Cache resource the status lives on.
    const RESOURCE: &'static str;

    /// Statuses reachable in one step.
    fn successors(self) -> &'static [Self];

    /// Returns true if `next` is reachable in one step.
    fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    /// Returns true if no transition leaves this status.
    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

/// Checks a transition against the table.
///
/// # Errors
///
/// Returns [`SyncError::InvalidTransition`] if `to` is not a successor of `from`.
pub fn check_transition<S: StatusMachine>(from: S, to: S) -> Result<S, SyncError> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(SyncError::InvalidTransition {
            workflow: S::WORKFLOW,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// =============================================================================
// Fund Request
// =============================================================================

/// Status of a fund request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundRequestStatus {
    /// Submitted, awaiting review.
    Pending,
    /// Approved by the council.
    Approved,
    /// Declined.
    Rejected,
    /// Funds handed out.
    Released,
    /// Receipts submitted and accepted.
    Liquidated,
    /// Withdrawn before release.
    Cancelled,
}

impl StatusMachine for FundRequestStatus {
    const WORKFLOW: &'static str = "fund-request";
    const RESOURCE: &'static str = "fund-requests";

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected, Self::Cancelled],
            Self::Approved => &[Self::Released, Self::Cancelled],
            Self::Released => &[Self::Liquidated],
            Self::Rejected | Self::Liquidated | Self::Cancelled => &[],
        }
    }
}

impl Display for FundRequestStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Released => "released",
            Self::Liquidated => "liquidated",
            Self::Cancelled => "cancelled",
        };
        formatter.write_str(name)
    }
}

impl FromStr for FundRequestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "released" => Ok(Self::Released),
            "liquidated" => Ok(Self::Liquidated),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown fund request status: {value}")),
        }
    }
}

// =============================================================================
// IGP
// =============================================================================

/// Status of an income-generating project proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgpStatus {
    /// Proposed, awaiting review.
    Pending,
    /// Approved to run.
    Approved,
    /// Declined.
    Rejected,
    /// Running.
    Ongoing,
    /// Finished.
    Completed,
    /// Stopped before completion.
    Cancelled,
}

impl StatusMachine for IgpStatus {
    const WORKFLOW: &'static str = "igp";
    const RESOURCE: &'static str = "igps";

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected, Self::Cancelled],
            Self::Approved => &[Self::Ongoing, Self::Cancelled],
            Self::Ongoing => &[Self::Completed, Self::Cancelled],
            Self::Rejected | Self::Completed | Self::Cancelled => &[],
        }
    }
}

impl Display for IgpStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        formatter.write_str(name)
    }
}

impl FromStr for IgpStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "ongoing" | "in-progress" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown IGP status: {value}")),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
