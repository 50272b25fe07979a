//! SMS through the Twilio REST API

use super::{DeliveryError, SendResult, SmsProvider};
use async_trait::async_trait;
use core_config::pipeline::TwilioSettings;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio error codes that will never succeed on retry:
/// invalid/unsubscribed/non-mobile numbers and bad credentials.
const PERMANENT_CODES: &[i64] = &[20003, 20001, 21211, 21408, 21610, 21612, 21614];

/// Twilio's "too many requests" code when it arrives with a 400
const RATE_LIMIT_CODE: i64 = 14107;

#[derive(Debug, Deserialize)]
struct MessageCreated {
    sid: String,
}

#[derive(Debug, Default, Deserialize)]
struct TwilioErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

pub struct TwilioSmsProvider {
    client: reqwest::Client,
    settings: TwilioSettings,
    base_url: String,
}

impl TwilioSmsProvider {
    pub fn new(settings: TwilioSettings, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            settings,
            base_url: TWILIO_API_BASE.to_string(),
        })
    }

    /// Point at another API host (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, self.settings.account_sid
        )
    }
}

fn classify(status: StatusCode, body: TwilioErrorBody) -> DeliveryError {
    let detail = format!(
        "twilio {}: {} (code {})",
        status.as_u16(),
        body.message.as_deref().unwrap_or("no message"),
        body.code.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
    );

    if status == StatusCode::TOO_MANY_REQUESTS || body.code == Some(RATE_LIMIT_CODE) {
        return DeliveryError::RateLimited(detail);
    }
    if body.code.is_some_and(|c| PERMANENT_CODES.contains(&c))
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        return DeliveryError::Rejected(detail);
    }
    if status.is_server_error() {
        return DeliveryError::Unavailable(detail);
    }
    DeliveryError::Rejected(detail)
}

#[async_trait]
impl SmsProvider for TwilioSmsProvider {
    async fn send(&self, to: &str, body: &str) -> Result<SendResult, DeliveryError> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.settings.account_sid, Some(&self.settings.auth_token))
            .form(&[
                ("To", to),
                ("From", self.settings.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| DeliveryError::Unavailable(format!("twilio request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let created: MessageCreated = response
                .json()
                .await
                .map_err(|e| DeliveryError::Unavailable(format!("unreadable twilio response: {e}")))?;
            return Ok(SendResult {
                message_id: created.sid,
            });
        }

        let error_body = response.json::<TwilioErrorBody>().await.unwrap_or_default();
        Err(classify(status, error_body))
    }

    fn name(&self) -> &'static str {
        "twilio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Form, Json, Router, http::StatusCode as AxumStatus, routing::post};
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn settings() -> TwilioSettings {
        TwilioSettings {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from_number: "+15005550006".into(),
        }
    }

    /// Serve a fake Messages endpoint that answers based on the `To` number
    async fn fake_twilio() -> String {
        async fn create(Form(form): Form<HashMap<String, String>>) -> (AxumStatus, Json<Value>) {
            match form.get("To").map(String::as_str) {
                Some("+15005550001") => (
                    AxumStatus::BAD_REQUEST,
                    Json(json!({"code": 21211, "message": "Invalid 'To' Phone Number"})),
                ),
                Some("+15005550009") => (
                    AxumStatus::TOO_MANY_REQUESTS,
                    Json(json!({"code": 20429, "message": "Too Many Requests"})),
                ),
                Some("+15005550010") => (AxumStatus::SERVICE_UNAVAILABLE, Json(json!({}))),
                _ => (AxumStatus::CREATED, Json(json!({"sid": "SM42", "status": "queued"}))),
            }
        }

        let app = Router::new().route("/Accounts/{sid}/Messages.json", post(create));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn provider() -> TwilioSmsProvider {
        TwilioSmsProvider::new(settings(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(fake_twilio().await)
    }

    #[tokio::test]
    async fn test_send_returns_message_sid() {
        let result = provider().await.send("+5511999998888", "hello").await.unwrap();
        assert_eq!(result.message_id, "SM42");
    }

    #[tokio::test]
    async fn test_invalid_number_is_permanent() {
        let err = provider().await.send("+15005550001", "hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected(ref m) if m.contains("21211")), "{err}");
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let err = provider().await.send("+15005550009", "hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::RateLimited(_)), "{err}");
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let err = provider().await.send("+15005550010", "hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unavailable(_)), "{err}");
    }

    #[test]
    fn test_rate_limit_code_without_429() {
        let err = classify(
            StatusCode::BAD_REQUEST,
            TwilioErrorBody {
                code: Some(RATE_LIMIT_CODE),
                message: None,
            },
        );
        assert!(matches!(err, DeliveryError::RateLimited(_)));
    }
}
