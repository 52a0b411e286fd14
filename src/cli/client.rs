use anyhow::{anyhow, bail, Context};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use url::Url;

/// Thin HTTP client for the broker API. Unwraps the `{success, data}`
/// envelope and turns `{error, message, code}` bodies into errors.
pub struct BrokerClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

/// Error body returned by the broker.
#[derive(Debug, thiserror::Error)]
#[error("{message} ({code}, HTTP {status})")]
pub struct ApiFailure {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl BrokerClient {
    pub fn new(server: &str, token: Option<String>) -> anyhow::Result<Self> {
        let base = Url::parse(server).with_context(|| format!("invalid server URL '{}'", server))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token,
        })
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
        self.send(Method::POST, path, body).await
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<Value> {
        self.send(Method::DELETE, path, None).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
        let url = self.base.join(path).with_context(|| format!("invalid path '{}'", path))?;
        let mut request = self.http.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.context("broker unreachable")?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("unexpected response (HTTP {}): {}", status, e))?;

        if status.is_success() {
            return Ok(payload.get("data").cloned().unwrap_or(payload));
        }

        let message = payload
            .get("message")
            .or_else(|| payload.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        let code = payload.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN").to_string();
        Err(ApiFailure { status, code, message }.into())
    }

    pub fn require_token(&self) -> anyhow::Result<()> {
        if self.token.is_none() {
            bail!("no token: pass --token or set BROKER_TOKEN (mint one with `elevation auth token`)");
        }
        Ok(())
    }
}
