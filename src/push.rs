// src/push.rs

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("FCM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("FCM rejected the message with status {0}")]
    Rejected(reqwest::StatusCode),
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>, data: Value) -> Self {
        PushMessage { title: title.into(), body: body.into(), data }
    }
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    to: &'a str,
    notification: FcmNotification<'a>,
    data: &'a Value,
}

/// Thin client for the FCM HTTP send endpoint. Without a server key every
/// send is a logged no-op.
#[derive(Clone)]
pub struct PushClient {
    http_client: reqwest::Client,
    endpoint: String,
    server_key: Option<String>,
}

impl PushClient {
    pub fn new(endpoint: impl Into<String>, server_key: Option<String>) -> Self {
        PushClient {
            http_client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            server_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.fcm_endpoint.clone(), config.fcm_server_key.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.server_key.is_some()
    }

    pub async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
        let Some(key) = &self.server_key else {
            debug!("Push disabled, dropping '{}' for {}", message.title, token);
            return Ok(());
        };

        let body = FcmRequest {
            to: token,
            notification: FcmNotification { title: &message.title, body: &message.body },
            data: &message.data,
        };
        let resp = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("key={}", key))
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(PushError::Rejected(resp.status()))
        }
    }

    /// Sends to each token on a background task. Failures are logged and
    /// never reach the caller.
    pub fn dispatch(&self, tokens: Vec<String>, message: PushMessage) {
        if tokens.is_empty() || !self.is_enabled() {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            for token in tokens {
                if let Err(e) = client.send(&token, &message).await {
                    warn!("Push '{}' to {} failed: {}", message.title, token, e);
                }
            }
        });
    }
}
