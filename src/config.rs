use std::env;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub bind_addr: String,
    pub frontend_origin: String,
    /// Price of a single can; order totals are `quantity * can_unit_price`.
    pub can_unit_price: f64,
    pub max_cans_per_order: u32,
    pub fcm_server_key: Option<String>,
    pub fcm_endpoint: String,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Ok(Self {
            mongo_uri: required("MONGO_URI")?,
            database_name: env::var("DATABASE_NAME").unwrap_or_else(|_| "watercan".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_hours: parsed("JWT_EXPIRY_HOURS", 24 * 7)?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:19006".to_string()),
            can_unit_price: parsed("CAN_UNIT_PRICE", 30.0)?,
            max_cans_per_order: parsed("MAX_CANS_PER_ORDER", 50)?,
            fcm_server_key: env::var("FCM_SERVER_KEY").ok().filter(|k| !k.is_empty()),
            fcm_endpoint: env::var("FCM_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_FCM_ENDPOINT.to_string()),
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            mongo_uri: "mongodb://127.0.0.1:27017".to_string(),
            database_name: "watercan_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiry_hours: 1,
            bind_addr: "127.0.0.1:0".to_string(),
            frontend_origin: "http://localhost:19006".to_string(),
            can_unit_price: 30.0,
            max_cans_per_order: 50,
            fcm_server_key: None,
            fcm_endpoint: DEFAULT_FCM_ENDPOINT.to_string(),
            admin_email: None,
            admin_password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_falls_back_to_default() {
        let value: u32 = parsed("WATERCAN_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_parsed_rejects_garbage() {
        env::set_var("WATERCAN_TEST_BAD_PRICE", "thirty");
        let err = parsed::<f64>("WATERCAN_TEST_BAD_PRICE", 30.0).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "WATERCAN_TEST_BAD_PRICE", .. }));
    }
}
