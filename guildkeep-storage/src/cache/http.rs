//! HTTP population path for API caches.

use std::fmt::Display;
use std::marker::PhantomData;

use async_trait::async_trait;
use guildkeep_core::{ConfigError, FetchError, HttpConfig};
use serde::de::DeserializeOwned;

use super::traits::ApiFetcher;

/// Placeholder replaced by the cache key in URL templates.
pub const KEY_PLACEHOLDER: &str = "{key}";

/// Fetches JSON documents from a URL template such as
/// `https://api.example.com/players/{key}`.
pub struct HttpJsonFetcher<V> {
    client: reqwest::Client,
    url_template: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for HttpJsonFetcher<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpJsonFetcher")
            .field("url_template", &self.url_template)
            .finish()
    }
}

impl<V> HttpJsonFetcher<V> {
    pub fn new(url_template: impl Into<String>, config: &HttpConfig) -> Result<Self, ConfigError> {
        let url_template = url_template.into();
        if !url_template.contains(KEY_PLACEHOLDER) {
            return Err(ConfigError::InvalidValue {
                field: "url_template".to_string(),
                value: url_template,
                reason: format!("must contain {}", KEY_PLACEHOLDER),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http_client".to_string(),
                value: config.user_agent.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            url_template,
            _value: PhantomData,
        })
    }

    /// Expand the template for one key.
    pub fn url_for(&self, key: &impl Display) -> String {
        self.url_template
            .replace(KEY_PLACEHOLDER, &urlencode(&key.to_string()))
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if let Some(status) = err.status() {
        FetchError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl<K, V> ApiFetcher<K, V> for HttpJsonFetcher<V>
where
    K: Display + Send + Sync,
    V: DeserializeOwned + Send,
{
    async fn fetch(&self, key: &K) -> Result<V, FetchError> {
        let url = self.url_for(key);
        tracing::debug!(url = %url, "Fetching external resource");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url,
                status: status.as_u16(),
            });
        }

        response.json::<V>().await.map_err(|e| classify(&url, e))
    }
}
