//! # Deal Lifecycle
//!
//! A deal carries two independent dimensions:
//! - `status` (open, won, lost) is the terminal classification
//! - `stage` is the ordered pipeline position and only moves while open
//!
//! Won and lost are one-way. The only way back to `open` is restoring a
//! soft-deleted deal, which always yields a re-workable deal.

use crate::{ContactId, DealId, Timestamp, UserId, ValidationError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum number of characters in a lost reason
pub const MIN_LOST_REASON_LENGTH: usize = 5;

/// Maximum length of a deal title
pub const MAX_TITLE_LENGTH: usize = 255;

/// Monetary value in minor currency units (cents)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Create an amount from minor units
    pub fn new(minor_units: u64) -> Self {
        Self(minor_units)
    }

    /// Get the value in minor units
    pub fn as_minor_units(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered pipeline position of a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStage {
    #[default]
    New,
    Qualified,
    Proposal,
    Negotiation,
    Closed,
}

impl DealStage {
    /// All stages in pipeline order
    pub const ALL: [DealStage; 5] = [
        Self::New,
        Self::Qualified,
        Self::Proposal,
        Self::Negotiation,
        Self::Closed,
    ];

    /// Zero-based pipeline position
    pub fn position(&self) -> usize {
        *self as usize
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Qualified => "qualified",
            Self::Proposal => "proposal",
            Self::Negotiation => "negotiation",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for DealStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealStage {
    type Err = crate::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s.to_lowercase())
            .ok_or_else(|| crate::ParseError::InvalidFormat {
                expected: "new, qualified, proposal, negotiation, or closed".to_string(),
                actual: s.to_string(),
            })
    }
}

/// Terminal classification of a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    #[default]
    Open,
    Won,
    Lost,
}

impl DealStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutating operations on a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealAction {
    ChangeStage,
    MarkWon,
    MarkLost,
    Assign,
    Delete,
    Restore,
}

impl DealAction {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChangeStage => "change_stage",
            Self::MarkWon => "mark_won",
            Self::MarkLost => "mark_lost",
            Self::Assign => "assign",
            Self::Delete => "delete",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for DealAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the deal state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DealError {
    #[error("Cannot {action} a deal that is {status}")]
    InvalidTransition {
        status: DealStatus,
        action: DealAction,
    },

    #[error("Cannot {action}: deal is not deleted")]
    NotDeleted { action: DealAction },

    #[error("Cannot {action}: deal is deleted")]
    Deleted { action: DealAction },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Stage movement produced by [`Deal::change_stage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageChange {
    pub from: DealStage,
    pub to: DealStage,
    pub probability: Option<u8>,
}

/// Owner change produced by [`Deal::assign`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub from: UserId,
    pub to: UserId,
}

/// A sales opportunity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub title: String,
    pub amount: Amount,
    /// ISO-4217 code, upper case
    pub currency: String,
    pub stage: DealStage,
    pub status: DealStatus,
    pub probability: Option<u8>,
    pub expected_close_date: Option<NaiveDate>,
    pub closed_at: Option<Timestamp>,
    pub won_amount: Option<Amount>,
    pub lost_reason: Option<String>,
    pub owner_id: UserId,
    pub contact_id: ContactId,
    pub product_id: Option<String>,
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Deal {
    /// Whether the deal is still being worked
    pub fn is_open(&self) -> bool {
        self.status == DealStatus::Open
    }

    /// Whether the deal is soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Move an open deal to another stage
    ///
    /// `Closed` is reached only by marking the deal won or lost.
    pub fn change_stage(
        &mut self,
        stage: DealStage,
        probability: Option<u8>,
        now: Timestamp,
    ) -> Result<StageChange, DealError> {
        self.require_open(DealAction::ChangeStage)?;
        if stage == DealStage::Closed {
            return Err(ValidationError::InvalidFormat {
                field: "stage".to_string(),
                message: "mark the deal won or lost to close it".to_string(),
            }
            .into());
        }
        if let Some(p) = probability {
            validate_probability(p)?;
        }

        let change = StageChange {
            from: self.stage,
            to: stage,
            probability,
        };
        self.stage = stage;
        if probability.is_some() {
            self.probability = probability;
        }
        self.updated_at = now;
        Ok(change)
    }

    /// Close the deal as won
    ///
    /// The final amount is `won_amount` when supplied, otherwise the deal
    /// amount. Returns the resolved amount.
    pub fn mark_as_won(
        &mut self,
        won_amount: Option<Amount>,
        now: Timestamp,
    ) -> Result<Amount, DealError> {
        self.require_open(DealAction::MarkWon)?;

        let resolved = won_amount.unwrap_or(self.amount);
        self.status = DealStatus::Won;
        self.stage = DealStage::Closed;
        self.closed_at = Some(now);
        self.won_amount = Some(resolved);
        self.updated_at = now;
        Ok(resolved)
    }

    /// Close the deal as lost
    ///
    /// The reason must contain at least [`MIN_LOST_REASON_LENGTH`] characters
    /// once surrounding whitespace is ignored; it is stored as given.
    pub fn mark_as_lost(&mut self, reason: &str, now: Timestamp) -> Result<(), DealError> {
        self.require_open(DealAction::MarkLost)?;
        validate_lost_reason(reason)?;

        self.status = DealStatus::Lost;
        self.stage = DealStage::Closed;
        self.closed_at = Some(now);
        self.lost_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Hand the deal to another owner
    pub fn assign(&mut self, owner: UserId, now: Timestamp) -> Result<Assignment, DealError> {
        if self.is_deleted() {
            return Err(DealError::Deleted {
                action: DealAction::Assign,
            });
        }
        let assignment = Assignment {
            from: self.owner_id,
            to: owner,
        };
        self.owner_id = owner;
        self.updated_at = now;
        Ok(assignment)
    }

    /// Soft-delete the deal
    pub fn soft_delete(&mut self, now: Timestamp) -> Result<(), DealError> {
        if self.is_deleted() {
            return Err(DealError::Deleted {
                action: DealAction::Delete,
            });
        }
        self.deleted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Restore a soft-deleted deal to an open, re-workable state
    pub fn restore(&mut self, now: Timestamp) -> Result<(), DealError> {
        if !self.is_deleted() {
            return Err(DealError::NotDeleted {
                action: DealAction::Restore,
            });
        }

        self.deleted_at = None;
        self.status = DealStatus::Open;
        self.closed_at = None;
        self.won_amount = None;
        self.lost_reason = None;
        if self.stage == DealStage::Closed {
            self.stage = DealStage::Negotiation;
        }
        self.updated_at = now;
        Ok(())
    }

    fn require_open(&self, action: DealAction) -> Result<(), DealError> {
        if self.is_deleted() {
            return Err(DealError::Deleted { action });
        }
        if !self.is_open() {
            return Err(DealError::InvalidTransition {
                status: self.status,
                action,
            });
        }
        Ok(())
    }
}

/// Operator input for creating a deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeal {
    pub title: String,
    pub amount: Amount,
    pub currency: String,
    #[serde(default)]
    pub stage: DealStage,
    #[serde(default)]
    pub probability: Option<u8>,
    #[serde(default)]
    pub expected_close_date: Option<NaiveDate>,
    /// Defaults to the creator
    #[serde(default)]
    pub owner_id: Option<UserId>,
    pub contact_id: ContactId,
    #[serde(default)]
    pub product_id: Option<String>,
}

impl NewDeal {
    /// Validate and build an open deal
    pub fn into_deal(self, created_by: UserId, now: Timestamp) -> Result<Deal, ValidationError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ValidationError::Required {
                field: "title".to_string(),
            });
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(ValidationError::TooLong {
                field: "title".to_string(),
                max_length: MAX_TITLE_LENGTH,
            });
        }

        let currency = self.currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidFormat {
                field: "currency".to_string(),
                message: "expected a three-letter ISO-4217 code".to_string(),
            });
        }

        if self.stage == DealStage::Closed {
            return Err(ValidationError::InvalidFormat {
                field: "stage".to_string(),
                message: "a new deal cannot start closed".to_string(),
            });
        }

        if let Some(p) = self.probability {
            validate_probability(p)?;
        }

        Ok(Deal {
            id: DealId::new(),
            title,
            amount: self.amount,
            currency,
            stage: self.stage,
            status: DealStatus::Open,
            probability: self.probability,
            expected_close_date: self.expected_close_date,
            closed_at: None,
            won_amount: None,
            lost_reason: None,
            owner_id: self.owner_id.unwrap_or(created_by),
            contact_id: self.contact_id,
            product_id: self.product_id.filter(|p| !p.trim().is_empty()),
            created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
}

fn validate_probability(probability: u8) -> Result<(), ValidationError> {
    if probability > 100 {
        return Err(ValidationError::OutOfRange {
            field: "probability".to_string(),
            min: 0,
            max: 100,
        });
    }
    Ok(())
}

fn validate_lost_reason(reason: &str) -> Result<(), ValidationError> {
    let length = reason.trim().chars().count();
    if length == 0 {
        return Err(ValidationError::Required {
            field: "lost_reason".to_string(),
        });
    }
    if length < MIN_LOST_REASON_LENGTH {
        return Err(ValidationError::TooShort {
            field: "lost_reason".to_string(),
            min_length: MIN_LOST_REASON_LENGTH,
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "deal_tests.rs"]
mod tests;
