//! Expo 推送服务客户端
//!
//! 每次请求发送只含一条通知的数组，响应里的第一张回执就是这条通知的结果。
//! 所有失败都在 `classify_response` 里一次性归类为 `PushError`。

use std::time::Duration;

use application::{PushError, PushMessage, PushProvider, PushTicket};
use async_trait::async_trait;
use config::PushConfig;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;

const DEVICE_NOT_REGISTERED: &str = "DeviceNotRegistered";

#[derive(Debug, Default, Deserialize)]
struct ExpoResponse {
    #[serde(default)]
    data: Vec<ExpoTicket>,
    #[serde(default)]
    errors: Vec<ExpoRequestError>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    id: Option<String>,
    message: Option<String>,
    details: Option<ExpoTicketDetails>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicketDetails {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExpoRequestError {
    code: Option<String>,
    message: String,
}

pub struct ExpoPushClient {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
    enabled: bool,
}

impl ExpoPushClient {
    pub fn new(config: &PushConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            access_token: config.access_token.clone().filter(|token| !token.is_empty()),
            enabled: config.enabled,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl PushProvider for ExpoPushClient {
    async fn send(&self, message: PushMessage) -> Result<PushTicket, PushError> {
        if !self.enabled {
            tracing::debug!(token = %message.to.redacted(), "推送已禁用，跳过");
            return Ok(PushTicket::default());
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(header::ACCEPT, "application/json")
            .json(&[&message]);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| PushError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| PushError::Transport(err.to_string()))?;

        classify_response(status, &body)
    }
}

/// 把 HTTP 状态和响应体归类为推送结果
pub fn classify_response(status: StatusCode, body: &str) -> Result<PushTicket, PushError> {
    let parsed = serde_json::from_str::<ExpoResponse>(body);

    if let Ok(response) = &parsed {
        if !response.errors.is_empty() {
            let reason = response
                .errors
                .iter()
                .map(|error| match &error.code {
                    Some(code) => format!("{code}: {}", error.message),
                    None => error.message.clone(),
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PushError::Server(reason));
        }
    }

    if !status.is_success() {
        return Err(PushError::Transport(format!("HTTP {status}")));
    }

    let response = parsed.map_err(|err| PushError::Server(format!("malformed response: {err}")))?;
    let ticket = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| PushError::Server("response carried no ticket".to_string()))?;

    match ticket.status.as_str() {
        "ok" => Ok(PushTicket { id: ticket.id }),
        "error" => {
            let code = ticket.details.and_then(|details| details.error);
            if code.as_deref() == Some(DEVICE_NOT_REGISTERED) {
                return Err(PushError::DeviceNotRegistered);
            }
            Err(PushError::Ticket(
                code.or(ticket.message)
                    .unwrap_or_else(|| "unknown ticket error".to_string()),
            ))
        }
        other => Err(PushError::Unexpected(format!("unknown ticket status {other}"))),
    }
}
