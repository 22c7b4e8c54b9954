// Async HTTP implementation of `RemoteObjectClient`.
//
// Addressing convention:
//   GET    {base}/{collection}/{id}
//   PATCH  {base}/{collection}/{id}          (verb "update")
//   DELETE {base}/{collection}/{id}          (verb "delete")
//   POST   {base}/{collection}/{id}/{verb}   (every other verb)
// Auth: optional `Authorization: Bearer <token>` header.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::object::{RemoteObject, RemoteObjectClient};
use crate::transport::TransportConfig;
use crate::Error;

// ── Error response shapes ────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Accepts both `{"error": {"code", "message"}}` and a flat `{"code", "message"}`.
#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<ErrorDetail>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorResponse {
    fn into_parts(self) -> (Option<String>, Option<String>) {
        match self.error {
            Some(detail) => (detail.code.or(self.code), detail.message.or(self.message)),
            None => (self.code, self.message),
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for a JSON management endpoint.
pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpRemoteClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from an endpoint URL, optional bearer token, and transport config.
    pub fn new(
        base_url: &str,
        token: Option<&SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| Error::InvalidToken(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = transport.build_client_with_headers(headers)?;
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
            timeout: transport.timeout,
        })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
            timeout: TransportConfig::default().timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Ensure the base URL ends with `/` so segments append below it.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        if url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Append percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    // ── Request plumbing ─────────────────────────────────────────────

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        fallback_id: &str,
    ) -> Result<RemoteObject, Error> {
        debug!("{method} {url}");

        let mut req = self.http.request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                Error::Transport(e)
            }
        })?;
        Self::handle_response(resp, fallback_id).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response(
        resp: reqwest::Response,
        fallback_id: &str,
    ) -> Result<RemoteObject, Error> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        let body = resp.text().await?;
        if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
            return Ok(RemoteObject::bare(fallback_id));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })?;
        RemoteObject::from_value(fallback_id, value)
    }

    async fn parse_error(status: StatusCode, resp: reqwest::Response) -> Error {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0);
            return Error::RateLimited { retry_after_secs };
        }

        let raw = resp.text().await.unwrap_or_default();

        if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(&raw) {
            let (code, message) = parsed.into_parts();
            Error::Api {
                status: status.as_u16(),
                code,
                message: message.unwrap_or_else(|| status.to_string()),
            }
        } else {
            Error::Api {
                status: status.as_u16(),
                code: None,
                message: if raw.is_empty() {
                    status.to_string()
                } else {
                    raw
                },
            }
        }
    }
}

impl RemoteObjectClient for HttpRemoteClient {
    async fn get(&self, collection: &str, id: &str) -> Result<RemoteObject, Error> {
        let url = self.url(&[collection, id])?;
        self.send(Method::GET, url, None, id).await
    }

    async fn invoke(
        &self,
        collection: &str,
        id: &str,
        verb: &str,
        body: Option<&Value>,
    ) -> Result<RemoteObject, Error> {
        let (method, url) = match verb {
            "update" => (Method::PATCH, self.url(&[collection, id])?),
            "delete" => (Method::DELETE, self.url(&[collection, id])?),
            _ => (Method::POST, self.url(&[collection, id, verb])?),
        };
        self.send(method, url, body, id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let client =
            HttpRemoteClient::from_reqwest("https://mdm.example.com/api/v1", reqwest::Client::new())
                .unwrap();
        assert_eq!(client.base_url().as_str(), "https://mdm.example.com/api/v1/");
    }

    #[test]
    fn url_percent_encodes_segments() {
        let client =
            HttpRemoteClient::from_reqwest("https://mdm.example.com/api/", reqwest::Client::new())
                .unwrap();
        let url = client.url(&["managedDevices", "a b/c"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://mdm.example.com/api/managedDevices/a%20b%2Fc"
        );
    }

    #[test]
    fn error_response_prefers_nested_shape() {
        let parsed: ErrorResponse = serde_json::from_str(
            r#"{"error":{"code":"ResourceNotFound","message":"gone"},"code":"outer"}"#,
        )
        .unwrap();
        let (code, message) = parsed.into_parts();
        assert_eq!(code.as_deref(), Some("ResourceNotFound"));
        assert_eq!(message.as_deref(), Some("gone"));
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(HttpRemoteClient::from_reqwest("mailto:ops@example.com", reqwest::Client::new())
            .is_err());
    }
}
