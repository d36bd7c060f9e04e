use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// A delivery worker, one per `User` with role staff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    pub location: Option<GeoPoint>,
    pub fcm_token: Option<String>,
    pub vehicle_number: Option<String>,
    #[serde(default, with = "crate::models::timestamp::option")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::models::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::models::timestamp")]
    pub updated_at: DateTime<Utc>,
}
