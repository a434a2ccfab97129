//! Fire-and-forget result delivery to caller-supplied URLs

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

/// Body of a delivery; the same `{success, ...}` shape as the HTTP response
#[derive(Serialize)]
struct Delivery<'a, T> {
    success: bool,
    #[serde(flatten)]
    payload: &'a T,
}

#[derive(Clone)]
pub struct CallbackNotifier {
    client: Client,
}

impl CallbackNotifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// POST `payload` to `url` in the background.
    ///
    /// Delivery failures are logged and never reach the caller of the review.
    pub fn notify<T: Serialize>(&self, url: &str, payload: &T) -> Option<JoinHandle<()>> {
        // Serialized straight to bytes so map order survives
        let delivery = Delivery {
            success: true,
            payload,
        };
        let body = match serde_json::to_vec(&delivery) {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %url, error = %e, "Callback payload could not be serialized");
                return None;
            }
        };

        let client = self.client.clone();
        let url = url.to_string();

        Some(tokio::spawn(async move {
            let sent = client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, status = %response.status(), "Callback delivered");
                }
                Ok(response) => {
                    warn!(url = %url, status = %response.status(), "Callback rejected");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Callback delivery failed");
                }
            }
        }))
    }
}
