//! OpenTDB catalog: payload shapes, response codes and the source seam used by
//! the import loop.
pub mod client;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use crate::normalization::normalize_text;

pub use client::{OpenTdbClient, OpenTdbConfig};

/// Status codes carried in every OpenTDB batch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    NoResults,
    InvalidParameter,
    TokenNotFound,
    TokenEmpty,
    RateLimit,
    Unknown(i64),
}

impl ResponseCode {
    pub fn as_i64(self) -> i64 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::NoResults => 1,
            ResponseCode::InvalidParameter => 2,
            ResponseCode::TokenNotFound => 3,
            ResponseCode::TokenEmpty => 4,
            ResponseCode::RateLimit => 5,
            ResponseCode::Unknown(code) => code,
        }
    }
}

impl From<i64> for ResponseCode {
    fn from(code: i64) -> Self {
        match code {
            0 => ResponseCode::Success,
            1 => ResponseCode::NoResults,
            2 => ResponseCode::InvalidParameter,
            3 => ResponseCode::TokenNotFound,
            4 => ResponseCode::TokenEmpty,
            5 => ResponseCode::RateLimit,
            other => ResponseCode::Unknown(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResponseCode::Success => "success",
            ResponseCode::NoResults => "no results",
            ResponseCode::InvalidParameter => "invalid parameter",
            ResponseCode::TokenNotFound => "token not found",
            ResponseCode::TokenEmpty => "token empty",
            ResponseCode::RateLimit => "rate limit",
            ResponseCode::Unknown(_) => "unknown",
        };
        write!(f, "{} (response_code {})", label, self.as_i64())
    }
}

// ---------- OpenTDB API shapes ----------
// Every string field arrives HTML-escaped; decoding happens in the importer.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuestion {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub correct_answer: Option<String>,
    #[serde(default)]
    pub incorrect_answers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub response_code: i64,
    #[serde(default)]
    pub results: Option<Vec<RawQuestion>>,
}

impl BatchResponse {
    pub fn code(&self) -> ResponseCode {
        ResponseCode::from(self.response_code)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub response_code: Option<i64>,
    #[serde(default)]
    pub response_message: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategoryListResponse {
    #[serde(default)]
    pub trivia_categories: Option<Vec<CategoryEntry>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategoryEntry {
    pub id: i64,
    pub name: String,
}

/// Snapshot of the catalog's canonical category list, keyed by decoded name.
#[derive(Debug, Clone, Default)]
pub struct CategorySnapshot {
    ids: HashMap<String, i64>,
}

impl CategorySnapshot {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        let ids = pairs
            .into_iter()
            .map(|(name, id)| (normalize_text(Some(name.as_ref())), id))
            .collect();
        Self { ids }
    }

    /// External id for a decoded category name. Non-positive ids count as unknown.
    pub fn external_id(&self, name: &str) -> Option<i64> {
        self.ids.get(name).copied().filter(|id| *id > 0)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Everything the import loop needs from the remote catalog.
#[async_trait]
pub trait TriviaSource: Send + Sync {
    /// Obtain a fresh session token.
    async fn request_token(&self) -> Result<String>;

    /// One page of questions. `Ok(None)` means the body carried no data at all.
    async fn fetch_batch(&self, token: Option<&str>, amount: u32)
        -> Result<Option<BatchResponse>>;

    async fn fetch_categories(&self) -> Result<CategorySnapshot>;
}

/// Shortened token for log lines.
pub fn redact_token(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    if visible.len() < token.len() {
        format!("{visible}***")
    } else {
        "***".to_string()
    }
}
