use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// The gateway gets 30 seconds; a hung upstream must not pin a request
/// worker indefinitely. Timeouts surface as `MpesaError::Transport`.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub base_url: String,
}

/// Daraja STK push client: OAuth token fetch followed by a push submission.
#[derive(Clone)]
pub struct MpesaClient {
    http: reqwest::Client,
    config: Arc<MpesaConfig>,
}

#[derive(Debug, Error)]
pub enum MpesaError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("gateway response carries no checkout reference")]
    MissingCheckoutReference,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct StkPushRequest {
    pub amount: u64,
    pub phone_number: String,
    pub channel_number: String,
    pub transaction_type: &'static str,
    pub account_reference: String,
    pub transaction_desc: String,
}

/// A successful push submission: the checkout reference used to correlate
/// the asynchronous callback, plus the verbatim gateway payload for audit.
#[derive(Debug, Clone)]
pub struct StkPushOutcome {
    pub checkout_request_id: String,
    pub raw: serde_json::Value,
}

fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    async fn access_token(&self) -> Result<String, MpesaError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MpesaError::Rejected(format!(
                "token request returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    pub async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushOutcome, MpesaError> {
        let token = self.access_token().await?;

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let payload = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            "Timestamp": timestamp,
            "TransactionType": request.transaction_type,
            "Amount": request.amount,
            "PartyA": request.phone_number,
            "PartyB": request.channel_number,
            "PhoneNumber": request.phone_number,
            "CallBackURL": self.config.callback_url,
            "AccountReference": request.account_reference,
            "TransactionDesc": request.transaction_desc,
        });

        let response = self
            .http
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.base_url
            ))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MpesaError::Rejected(format!(
                "push request returned {status}: {body}"
            )));
        }

        let raw: serde_json::Value = response.json().await?;
        let checkout_request_id = raw
            .get("CheckoutRequestID")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or(MpesaError::MissingCheckoutReference)?;

        info!(%checkout_request_id, "STK push accepted by gateway");
        Ok(StkPushOutcome {
            checkout_request_id,
            raw,
        })
    }
}
