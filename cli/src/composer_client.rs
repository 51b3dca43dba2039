use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use dietweek_core::composer::{ComposeRequest, Composer, ComposerOutput};
use dietweek_core::error::ComposerError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const ERROR_BODY_LIMIT: usize = 512;

/// Composer reached over HTTP: the request is POSTed as JSON and the week comes back as JSON.
pub struct HttpComposer {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpComposer {
    pub fn new(url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(url).with_context(|| format!("Invalid composer URL '{url}'"))?;
        let client = reqwest::Client::builder()
            .user_agent(format!("dietweek/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }
}

fn transport_error(err: &reqwest::Error) -> ComposerError {
    if err.is_timeout() {
        ComposerError::Timeout(REQUEST_TIMEOUT)
    } else {
        ComposerError::Network(err.to_string())
    }
}

#[async_trait]
impl Composer for HttpComposer {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposerOutput, ComposerError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_LIMIT {
                let mut end = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(ComposerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| transport_error(&e))?;
        serde_json::from_slice(&bytes).map_err(|e| ComposerError::InvalidResponse(e.to_string()))
    }
}
