//! Return requests for delivered items.

use crate::ids::{OrderItemId, ReturnRequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Review state of a return request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnStatus {
    /// Awaiting admin review
    Pending,
    /// Accepted; item returned and refunded
    Approved,
    /// Declined; item stays delivered
    Rejected,
}

impl ReturnStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse from the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A customer's request to return a delivered item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    /// Identifier
    pub id: ReturnRequestId,
    /// Item to return
    pub order_item_id: OrderItemId,
    /// Requester
    pub user_id: UserId,
    /// Customer's reason
    pub reason: String,
    /// Review state
    pub status: ReturnStatus,
    /// Raised at
    pub requested_at: DateTime<Utc>,
    /// Approved or rejected at
    pub resolved_at: Option<DateTime<Utc>>,
}
