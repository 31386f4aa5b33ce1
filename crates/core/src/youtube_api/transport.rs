use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::{
    error::{FinderError, Result},
    youtube_api::types::ErrorEnvelope,
};

pub const API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// One GET against a YouTube Data API list endpoint.
///
/// `endpoint` is the resource path (`videos`, `playlists`, `playlistItems`,
/// `search`); implementations add credentials themselves.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value>;
}

/// API-key authenticated transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("playlist-finder/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: API_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    // The key is sent as a query parameter and must never reach the logs.
    #[instrument(skip(self, params), level = tracing::Level::TRACE)]
    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(classify_error(
                status.as_u16(),
                endpoint,
                requested_id(params),
                &body,
            ));
        }

        Ok(response
            .json::<Value>()
            .await
            .map_err(reqwest::Error::without_url)?)
    }
}

/// The resource id a list request targets, if any.
fn requested_id<'a>(params: &'a [(&str, String)]) -> &'a str {
    params
        .iter()
        .find(|(name, _)| matches!(*name, "id" | "playlistId" | "channelId"))
        .map(|(_, value)| value.as_str())
        .unwrap_or("")
}

/// Map a non-success API response onto the error taxonomy.
pub fn classify_error(status: u16, endpoint: &str, id: &str, body: &str) -> FinderError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let message = if envelope.error.message.is_empty() {
        body.trim().to_string()
    } else {
        envelope.error.message.clone()
    };
    let has_reason = |wanted: &[&str]| {
        envelope
            .error
            .errors
            .iter()
            .any(|e| wanted.contains(&e.reason.as_str()))
    };

    if has_reason(&["quotaExceeded", "dailyLimitExceeded"]) {
        return FinderError::QuotaExceeded;
    }

    if status == 401
        || has_reason(&["keyInvalid", "keyExpired"])
        || body.contains("API_KEY_INVALID")
        || message.contains("API key not valid")
    {
        return FinderError::Auth { reason: message };
    }

    if has_reason(&["rateLimitExceeded", "userRateLimitExceeded"]) {
        return FinderError::Api {
            status: 429,
            message,
        };
    }

    if status == 404 {
        let resource = match endpoint {
            "videos" => "video",
            "playlists" | "playlistItems" => "playlist",
            "channels" => "channel",
            _ => "resource",
        };
        tracing::debug!(endpoint, id, "not found: {}", message);
        return FinderError::NotFound {
            resource,
            id: id.to_string(),
        };
    }

    FinderError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: u16, reason: &str, message: &str) -> String {
        serde_json::json!({
            "error": {
                "code": code,
                "message": message,
                "errors": [{ "reason": reason, "domain": "youtube.quota" }]
            }
        })
        .to_string()
    }

    #[test]
    fn quota_reason_maps_to_quota_exceeded() {
        let err = classify_error(403, "search", "", &body(403, "quotaExceeded", "quota"));
        assert!(matches!(err, FinderError::QuotaExceeded));
    }

    #[test]
    fn invalid_key_maps_to_auth() {
        let err = classify_error(
            400,
            "videos",
            "dQw4w9WgXcQ",
            &body(400, "badRequest", "API key not valid. Please pass a valid API key."),
        );
        assert!(matches!(err, FinderError::Auth { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn rate_limit_is_retryable() {
        let err = classify_error(403, "search", "", &body(403, "rateLimitExceeded", "slow down"));
        assert!(err.is_transient());
    }

    #[test]
    fn missing_playlist_maps_to_not_found() {
        let err = classify_error(
            404,
            "playlistItems",
            "PL123",
            &body(
                404,
                "playlistNotFound",
                "The playlist identified with the request's playlistId parameter cannot be found.",
            ),
        );
        assert!(matches!(
            &err,
            FinderError::NotFound {
                resource: "playlist",
                id,
            } if id == "PL123"
        ));
        assert_eq!(err.to_string(), "playlist PL123 not found");
    }

    #[tokio::test]
    async fn network_errors_do_not_leak_the_api_key() {
        let transport = HttpTransport::new("SECRET-API-KEY-123", Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://127.0.0.1:1");

        let err = transport
            .get_json("search", &[("q", "x".to_string())])
            .await
            .unwrap_err();

        assert!(matches!(err, FinderError::Network(_)));
        let shown = format!("{err} {err:?}");
        assert!(!shown.contains("SECRET-API-KEY-123"), "{shown}");
    }

    #[test]
    fn non_json_body_keeps_raw_text() {
        let err = classify_error(502, "search", "", "Bad Gateway");
        match err {
            FinderError::Api { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
