use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PaymentStatus, Role};

/// Lifecycle of a delivery.
///
/// The happy path is `Pending -> Accepted -> Picked -> Transit -> Delivered`.
/// `Cancelled` and `Missed` are terminal side exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Picked,
    Transit,
    Delivered,
    Cancelled,
    Missed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::Picked,
        OrderStatus::Transit,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Missed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Picked => "picked",
            OrderStatus::Transit => "transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Missed => "missed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Missed
        )
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Cancelled)
                | (Pending, Missed)
                | (Accepted, Picked)
                | (Accepted, Cancelled)
                | (Accepted, Missed)
                | (Picked, Transit)
                | (Picked, Missed)
                | (Transit, Delivered)
                | (Transit, Missed)
        )
    }

    /// Which targets a role may request through the status endpoint.
    /// `Accepted` is never reachable this way; it goes through accept.
    pub fn settable_by(&self, role: Role) -> bool {
        use OrderStatus::*;
        match role {
            Role::Customer => *self == Cancelled,
            Role::Staff => matches!(self, Picked | Transit | Delivered | Missed),
            Role::Admin => *self != Accepted && *self != Pending,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Invalid order status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Online,
}

/// One entry in an order's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub changed_by: String,
    #[serde(with = "crate::models::timestamp")]
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    /// `User` id of the customer who placed it.
    pub customer_id: String,
    pub customer_profile_id: String,
    /// `Staff` id, written once by the accept operation.
    pub assigned_staff_id: Option<String>,
    pub quantity: u32,
    pub unit_price: f64,
    pub total_amount: f64,
    pub delivery_address: String,
    pub notes: Option<String>,
    #[serde(default, with = "crate::models::timestamp::option")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    #[serde(default)]
    pub rejected_by: Vec<String>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
    #[serde(default, with = "crate::models::timestamp::option")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::models::timestamp::option")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::models::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::models::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_assigned_to(&self, staff_id: &str) -> bool {
        self.assigned_staff_id.as_deref() == Some(staff_id)
    }
}
