//! REST client for the server's challenge and friend endpoints.

use serde_json::{json, Value};
use tracing::debug;

use crate::admission::Rejection;
use crate::error::BotError;
use crate::protocol::UserId;

pub struct RestClient {
    client: reqwest::Client,
    base: String,
    apikey: String,
}

impl RestClient {
    pub fn new(server_url: &str, apikey: &str) -> Result<Self, BotError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gobot/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| BotError::Rest(format!("client build: {e}")))?;
        Ok(RestClient {
            client,
            base: format!("{}/api/v1", server_url.trim_end_matches('/')),
            apikey: apikey.to_string(),
        })
    }

    pub async fn accept_challenge(&self, challenge_id: u64) -> Result<(), BotError> {
        self.post(&format!("me/challenges/{challenge_id}/accept"), &json!({}))
            .await
    }

    /// Decline a challenge. With a rejection attached the counterpart
    /// client can display a localized reason.
    pub async fn decline_challenge(
        &self,
        challenge_id: u64,
        rejection: Option<&Rejection>,
    ) -> Result<(), BotError> {
        let mut body = json!({
            "delete": true,
            "message": rejection
                .map(|r| r.message.clone())
                .unwrap_or_else(|| "This bot cannot accept this challenge.".to_string()),
        });
        if let Some(rejection) = rejection {
            body["rejection_details"] = serde_json::to_value(rejection)?;
        }
        self.post(&format!("me/challenges/{challenge_id}"), &body)
            .await
    }

    pub async fn accept_friend_request(&self, from_user: UserId) -> Result<(), BotError> {
        self.post("me/friends/invitations", &json!({ "from_user": from_user }))
            .await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(), BotError> {
        let url = format!("{}/{path}", self.base);
        debug!(%url, "REST POST");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.apikey))
            .json(body)
            .send()
            .await
            .map_err(|e| BotError::Rest(format!("{path}: {e}")))?;
        if !response.status().is_success() {
            return Err(BotError::Rest(format!("{path}: HTTP {}", response.status())));
        }
        Ok(())
    }
}
