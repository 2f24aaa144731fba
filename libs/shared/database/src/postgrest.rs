use anyhow::{Context, Result};
use reqwest::{
    Client, Response,
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Non-2xx reply from the REST API. Carried inside `anyhow::Error`; callers that
/// need to branch on the status use `downcast_ref::<ApiStatusError>()`.
#[derive(Debug, Error)]
#[error("API error ({status}): {body}")]
pub struct ApiStatusError {
    pub status: u16,
    pub body: String,
}

impl ApiStatusError {
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }
}

#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key).context("invalid anon key")?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).context("invalid bearer token")?,
            );
        }

        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: &[(&'static str, &str)],
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        for (name, value) in extra_headers {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_str(value)?);
        }

        let mut req = self.client.request(method, &url).headers(headers);
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(ApiStatusError { status: status.as_u16(), body: error_text }.into());
        }

        Ok(response)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        let response = self.send(method, path, auth_token, body, &[]).await?;
        Ok(response.json::<T>().await?)
    }

    /// Same as [`request`](Self::request) with additional headers, typically
    /// `Prefer: return=representation` on writes.
    pub async fn request_with_headers<T>(&self, method: Method, path: &str,
                                         auth_token: Option<&str>, body: Option<Value>,
                                         headers: &[(&'static str, &str)])
                                         -> Result<T>
    where T: DeserializeOwned {
        let response = self.send(method, path, auth_token, body, headers).await?;
        Ok(response.json::<T>().await?)
    }

    /// GET returning rows plus the exact total parsed from `Content-Range`.
    pub async fn request_with_count<T>(&self, path: &str, auth_token: Option<&str>)
                                       -> Result<(Vec<T>, u64)>
    where T: DeserializeOwned {
        let response = self
            .send(Method::GET, path, auth_token, None, &[("prefer", "count=exact")])
            .await?;

        let total = response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_total);

        let rows: Vec<T> = response.json().await?;
        let total = total.unwrap_or(rows.len() as u64);
        Ok((rows, total))
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// `0-9/42` -> 42, `*/0` -> 0. An unknown total (`0-9/*`) yields `None`.
fn parse_content_range_total(range: &str) -> Option<u64> {
    range.rsplit('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(uri: &str) -> SupabaseClient {
        let config = AppConfig {
            supabase_url: uri.to_string(),
            supabase_anon_key: "anon".to_string(),
            ..AppConfig::default()
        };
        SupabaseClient::new(&config)
    }

    #[test]
    fn parses_content_range() {
        assert_eq!(parse_content_range_total("0-9/42"), Some(42));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }

    #[tokio::test]
    async fn surfaces_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(409).set_body_string("conflicting key"))
            .mount(&server)
            .await;

        let err = client_for(&server.uri())
            .request::<Value>(Method::POST, "/rest/v1/appointments", Some("t"), Some(json!({})))
            .await
            .unwrap_err();

        let status = err.downcast_ref::<ApiStatusError>().unwrap();
        assert!(status.is_conflict());
    }

    #[tokio::test]
    async fn counts_rows_from_content_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(header("prefer", "count=exact"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-range", "0-1/17")
                    .set_body_json(json!([{"id": 1}, {"id": 2}])),
            )
            .mount(&server)
            .await;

        let (rows, total): (Vec<Value>, u64) = client_for(&server.uri())
            .request_with_count("/rest/v1/appointments?limit=2", None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(total, 17);
    }
}
