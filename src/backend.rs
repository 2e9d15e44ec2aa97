//! Client for the text-generation backend (`/generate` and `/learn`).

use crate::config::BackendConfig;
use crate::error::{BackendError, Result};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Status string the backend uses for successful calls.
const STATUS_SUCCESS: &str = "success";

/// Text-generation service the dispatcher forwards chat to.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Generate a reply continuing `seed_text`.
    async fn generate(&self, seed_text: &str, author_label: &str) -> Result<String>;

    /// Feed a message into the backend's training set.
    async fn learn(&self, message: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    seed_text: &'a str,
    user_label: &'a str,
}

#[derive(Debug, Serialize)]
struct LearnRequest<'a> {
    message: &'a str,
}

/// Response envelope shared by both endpoints.
#[derive(Debug, Deserialize)]
struct BackendResponse {
    status: String,
    #[serde(default)]
    generated_text: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl BackendResponse {
    /// Fail on any status other than "success".
    fn into_success(self) -> std::result::Result<Self, BackendError> {
        if self.status == STATUS_SUCCESS {
            Ok(self)
        } else {
            Err(BackendError::Rejected(
                self.message
                    .unwrap_or_else(|| format!("status '{}'", self.status)),
            ))
        }
    }
}

/// HTTP client for the backend.
pub struct BackendClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .with_context(|| "failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> std::result::Result<BackendResponse, BackendError> {
        // Error statuses still carry a JSON envelope with the reason.
        let response = self
            .http_client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?;
        Ok(response.json::<BackendResponse>().await?)
    }
}

#[async_trait::async_trait]
impl ChatBackend for BackendClient {
    async fn generate(&self, seed_text: &str, author_label: &str) -> Result<String> {
        let response = self
            .post(
                "generate",
                &GenerateRequest {
                    seed_text,
                    user_label: author_label,
                },
            )
            .await?
            .into_success()?;

        let text = response
            .generated_text
            .ok_or(BackendError::MissingField("generated_text"))?;
        Ok(text)
    }

    async fn learn(&self, message: &str) -> Result<String> {
        let response = self
            .post("learn", &LearnRequest { message })
            .await?
            .into_success()?;
        Ok(response.message.unwrap_or_default())
    }
}
