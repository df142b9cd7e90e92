use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use super::{
    redact_token, BatchResponse, CategoryListResponse, CategorySnapshot, TokenResponse,
    TriviaSource,
};

const OPENTDB_DEFAULT_BASE_URL: &str = "https://opentdb.com";
const OPENTDB_TOKEN_PATH: &str = "api_token.php";
const OPENTDB_BATCH_PATH: &str = "api.php";
const OPENTDB_CATEGORY_PATH: &str = "api_category.php";
/// The API rejects (code 2) any amount above this.
pub const OPENTDB_MAX_AMOUNT: u32 = 50;

#[derive(Debug, Clone)]
pub struct OpenTdbConfig {
    pub base_url: String,
    pub user_agent: String,
}

impl Default for OpenTdbConfig {
    fn default() -> Self {
        Self {
            base_url: OPENTDB_DEFAULT_BASE_URL.to_string(),
            user_agent: "trivia-import/0.1".to_string(),
        }
    }
}

impl OpenTdbConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = crate::util::env::env_opt("OPENTDB_BASE_URL") {
            cfg.base_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = crate::util::env::env_opt("OPENTDB_USER_AGENT") {
            cfg.user_agent = v;
        }
        cfg
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        let base = format!("{}/", self.base_url.trim_end_matches('/'));
        url::Url::parse(&base)
            .and_then(|b| b.join(path))
            .with_context(|| format!("invalid OpenTDB base url {}", self.base_url))
    }

    pub(crate) fn token_url(&self) -> Result<url::Url> {
        let mut url = self.endpoint(OPENTDB_TOKEN_PATH)?;
        url.query_pairs_mut().append_pair("command", "request");
        Ok(url)
    }

    pub(crate) fn batch_url(&self, token: Option<&str>, amount: u32) -> Result<url::Url> {
        let mut url = self.endpoint(OPENTDB_BATCH_PATH)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("amount", &amount.to_string());
            if let Some(t) = token {
                q.append_pair("token", t);
            }
        }
        Ok(url)
    }

    pub(crate) fn category_url(&self) -> Result<url::Url> {
        self.endpoint(OPENTDB_CATEGORY_PATH)
    }
}

/// Clamp a requested page size into the range the API accepts.
pub fn effective_amount(requested: u32) -> u32 {
    requested.clamp(1, OPENTDB_MAX_AMOUNT)
}

pub struct OpenTdbClient {
    cfg: OpenTdbConfig,
    http: Client,
}

impl OpenTdbClient {
    pub fn new(cfg: OpenTdbConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("failed to construct OpenTDB HTTP client")?;
        Ok(Self { cfg, http })
    }

    pub fn new_from_env() -> Result<Self> {
        Self::new(OpenTdbConfig::from_env())
    }

    async fn get_json<T>(&self, url: url::Url, what: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting OpenTDB {what}"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("reading OpenTDB {what} body"))?;
        if !status.is_success() {
            return Err(anyhow!(
                "OpenTDB {what} request failed (status={}): {}",
                status,
                text
            ));
        }
        serde_json::from_str(&text)
            .map_err(|err| anyhow!("failed to parse OpenTDB {what} payload ({err}): {text}"))
    }
}

/// A token response without a usable token is fatal for the run.
fn session_token(body: TokenResponse) -> Result<String> {
    match body.token {
        Some(token) if !token.trim().is_empty() => Ok(token),
        _ => Err(anyhow!(
            "could not obtain session token: response_code={:?} message={:?}",
            body.response_code,
            body.response_message
        )),
    }
}

#[async_trait]
impl TriviaSource for OpenTdbClient {
    #[instrument(skip(self))]
    async fn request_token(&self) -> Result<String> {
        let body: TokenResponse = self.get_json(self.cfg.token_url()?, "token").await?;
        let token = session_token(body)?;
        info!(token = %redact_token(&token), "obtained OpenTDB session token");
        Ok(token)
    }

    #[instrument(skip(self, token))]
    async fn fetch_batch(
        &self,
        token: Option<&str>,
        amount: u32,
    ) -> Result<Option<BatchResponse>> {
        let url = self.cfg.batch_url(token, amount)?;
        let batch: Option<BatchResponse> = self.get_json(url, "batch").await?;
        if let Some(b) = &batch {
            debug!(
                response_code = b.response_code,
                results = b.results.as_ref().map(Vec::len).unwrap_or(0),
                "fetched OpenTDB batch"
            );
        }
        Ok(batch)
    }

    #[instrument(skip(self))]
    async fn fetch_categories(&self) -> Result<CategorySnapshot> {
        let body: CategoryListResponse =
            self.get_json(self.cfg.category_url()?, "category list").await?;
        let snapshot = CategorySnapshot::from_pairs(
            body.trivia_categories
                .unwrap_or_default()
                .into_iter()
                .map(|c| (c.name, c.id)),
        );
        info!(categories = snapshot.len(), "loaded OpenTDB category snapshot");
        Ok(snapshot)
    }
}
