mod customer;
mod order;
mod payment;
mod staff;
mod user;
pub mod timestamp;

use serde::{Deserialize, Serialize};

pub use customer::CustomerProfile;
pub use order::{Order, OrderStatus, PaymentMethod, StatusChange};
pub use payment::{Payment, PaymentChannel, PaymentStatus};
pub use staff::Staff;
pub use user::{PublicUser, Role, User};

/// A WGS84 coordinate reported by a client device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_bounds() {
        assert!(GeoPoint { lat: 12.97, lng: 77.59 }.is_valid());
        assert!(!GeoPoint { lat: 91.0, lng: 0.0 }.is_valid());
        assert!(!GeoPoint { lat: 0.0, lng: -180.5 }.is_valid());
    }
}
