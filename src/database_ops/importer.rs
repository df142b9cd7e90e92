//! Token-gated batch import loop for OpenTDB.
//!
//! OpenTDB hands out session tokens that guarantee no repeats until the
//! token's pool runs dry; after that it either answers `response_code 4` or
//! keeps serving questions we already have. Both cases are treated as
//! exhaustion and answered by rotating to a fresh token a bounded number of
//! times before giving up.
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database_ops::opentdb::client::effective_amount;
use crate::database_ops::opentdb::{
    redact_token, BatchResponse, CategorySnapshot, RawQuestion, ResponseCode, TriviaSource,
};
use crate::database_ops::resolver::EntityResolver;
use crate::database_ops::store::{NewQuestion, QuestionStore};
use crate::normalization::{difficulty_label, normalize_text, type_label};
use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_AMOUNT: u32 = 50;
pub const DEFAULT_DELAY_MS: u64 = 300;
pub const DEFAULT_MAX_ROTATION_ATTEMPTS: u32 = 5;

/// What to do when a single item cannot be imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemErrorPolicy {
    /// Stop the whole run with the item's error.
    #[default]
    Abort,
    /// Log, count and carry on with the next item.
    Skip,
}

impl FromStr for ItemErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(ItemErrorPolicy::Abort),
            "skip" => Ok(ItemErrorPolicy::Skip),
            other => Err(anyhow!("unknown item error policy {other:?} (expected abort|skip)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Questions requested per batch (clamped to what the API accepts).
    pub amount: u32,
    /// Pause between rounds and between rotation attempts.
    pub delay: Duration,
    pub max_rotation_attempts: u32,
    pub on_item_error: ItemErrorPolicy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            amount: DEFAULT_AMOUNT,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            max_rotation_attempts: DEFAULT_MAX_ROTATION_ATTEMPTS,
            on_item_error: ItemErrorPolicy::Abort,
        }
    }
}

impl ImportConfig {
    pub fn from_env() -> Result<Self> {
        let on_item_error = match env_opt("OPENTDB_ON_ITEM_ERROR") {
            Some(raw) => raw.parse()?,
            None => ItemErrorPolicy::default(),
        };
        Ok(Self {
            amount: effective_amount(env_parse("OPENTDB_AMOUNT", DEFAULT_AMOUNT)),
            delay: Duration::from_millis(env_parse("OPENTDB_DELAY_MS", DEFAULT_DELAY_MS)),
            max_rotation_attempts: env_parse(
                "OPENTDB_MAX_ROTATIONS",
                DEFAULT_MAX_ROTATION_ATTEMPTS,
            ),
            on_item_error,
        })
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// response_code 1.
    NoResults,
    /// Success code but no data or an empty result list.
    EmptyPage,
    /// response_code 2.
    InvalidParameter,
    /// response_code 3.
    TokenNotFound,
    /// response_code 4 seen by a one-shot import, which never rotates.
    TokenEmpty,
    UnexpectedCode(i64),
    /// Every rotation attempt came back without a new question.
    RotationExhausted,
    /// A one-shot import processed its single batch.
    SingleBatch,
}

impl StopReason {
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            StopReason::InvalidParameter | StopReason::TokenNotFound | StopReason::UnexpectedCode(_)
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NoResults => write!(f, "{}", ResponseCode::NoResults),
            StopReason::EmptyPage => write!(f, "empty result list"),
            StopReason::InvalidParameter => write!(f, "{}", ResponseCode::InvalidParameter),
            StopReason::TokenNotFound => write!(f, "{}", ResponseCode::TokenNotFound),
            StopReason::TokenEmpty => write!(f, "{}", ResponseCode::TokenEmpty),
            StopReason::UnexpectedCode(code) => write!(f, "{}", ResponseCode::from(*code)),
            StopReason::RotationExhausted => write!(f, "no new questions after token rotation"),
            StopReason::SingleBatch => write!(f, "single batch processed"),
        }
    }
}

/// State owned by one import run; build a fresh one per run.
#[derive(Debug, Default)]
pub struct RunContext {
    pub token: Option<String>,
    /// Loaded lazily on the first round and never refreshed.
    pub categories: Option<CategorySnapshot>,
    /// Normalized question texts processed this run, new or pre-existing.
    pub seen: HashSet<String>,
    pub total_imported: u64,
    pub rounds: u32,
    pub rotations: u32,
    pub skipped_seen: u64,
    pub skipped_existing: u64,
    pub failed_items: u64,
}

impl RunContext {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            ..Default::default()
        }
    }

    fn summary(&self, stop: StopReason) -> ImportSummary {
        ImportSummary {
            total_imported: self.total_imported,
            rounds: self.rounds,
            rotations: self.rotations,
            skipped_seen: self.skipped_seen,
            skipped_existing: self.skipped_existing,
            failed_items: self.failed_items,
            stop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub total_imported: u64,
    pub rounds: u32,
    pub rotations: u32,
    pub skipped_seen: u64,
    pub skipped_existing: u64,
    pub failed_items: u64,
    pub stop: StopReason,
}

enum PageOutcome {
    Items(Vec<RawQuestion>),
    Exhausted,
    Stop(StopReason),
}

fn classify_page(page: Option<BatchResponse>) -> PageOutcome {
    let Some(page) = page else {
        return PageOutcome::Stop(StopReason::EmptyPage);
    };
    match page.code() {
        ResponseCode::Success => match page.results {
            Some(items) if !items.is_empty() => PageOutcome::Items(items),
            _ => PageOutcome::Stop(StopReason::EmptyPage),
        },
        ResponseCode::NoResults => PageOutcome::Stop(StopReason::NoResults),
        ResponseCode::InvalidParameter => PageOutcome::Stop(StopReason::InvalidParameter),
        ResponseCode::TokenNotFound => PageOutcome::Stop(StopReason::TokenNotFound),
        ResponseCode::TokenEmpty => PageOutcome::Exhausted,
        other => PageOutcome::Stop(StopReason::UnexpectedCode(other.as_i64())),
    }
}

enum Phase {
    Fetching,
    Rotating { attempt: u32 },
    Done(StopReason),
}

pub struct Importer<'a, A, S>
where
    A: TriviaSource + ?Sized,
    S: QuestionStore + ?Sized,
{
    source: &'a A,
    resolver: EntityResolver<'a, S>,
    cfg: ImportConfig,
}

impl<'a, A, S> Importer<'a, A, S>
where
    A: TriviaSource + ?Sized,
    S: QuestionStore + ?Sized,
{
    pub fn new(source: &'a A, store: &'a S, cfg: ImportConfig) -> Self {
        Self {
            source,
            resolver: EntityResolver::new(store),
            cfg,
        }
    }

    /// Drive fetch rounds until the catalog runs dry or answers with a
    /// terminal code. Fatal codes come back as a summary whose
    /// `stop.is_fatal()` is true; transport and store errors come back as `Err`.
    pub async fn run(&mut self, ctx: &mut RunContext) -> Result<ImportSummary> {
        if ctx.token.is_none() {
            info!("no token provided; requesting a session token from OpenTDB");
            let token = self
                .source
                .request_token()
                .await
                .context("requesting initial session token")?;
            ctx.token = Some(token);
        }

        let mut phase = Phase::Fetching;
        loop {
            phase = match phase {
                Phase::Fetching => self.fetch_round(ctx).await?,
                Phase::Rotating { attempt } => self.rotation_attempt(ctx, attempt).await?,
                Phase::Done(stop) => {
                    if stop.is_fatal() {
                        warn!(%stop, total_imported = ctx.total_imported, "import stopped on fatal response");
                    } else {
                        info!(%stop, total_imported = ctx.total_imported, rounds = ctx.rounds, "import finished");
                    }
                    return Ok(ctx.summary(stop));
                }
            };
        }
    }

    /// Single batch with whatever token the context carries (possibly none);
    /// never requests or rotates tokens.
    pub async fn import_once(&mut self, ctx: &mut RunContext) -> Result<ImportSummary> {
        self.ensure_categories(ctx).await?;
        ctx.rounds += 1;
        let page = self
            .source
            .fetch_batch(ctx.token.as_deref(), self.cfg.amount)
            .await?;
        let stop = match classify_page(page) {
            PageOutcome::Items(items) => {
                let new_items = self.process_round(ctx, items).await?;
                info!(new_imported = new_items, "batch imported");
                StopReason::SingleBatch
            }
            PageOutcome::Exhausted => StopReason::TokenEmpty,
            PageOutcome::Stop(stop) => stop,
        };
        if stop != StopReason::SingleBatch {
            info!(%stop, "no results imported");
        }
        Ok(ctx.summary(stop))
    }

    async fn ensure_categories(&self, ctx: &mut RunContext) -> Result<()> {
        if ctx.categories.is_none() {
            let snapshot = self
                .source
                .fetch_categories()
                .await
                .context("fetching category snapshot")?;
            ctx.categories = Some(snapshot);
        }
        Ok(())
    }

    async fn fetch_round(&mut self, ctx: &mut RunContext) -> Result<Phase> {
        ctx.rounds += 1;
        info!(round = ctx.rounds, amount = self.cfg.amount, "request round: fetching batch");
        if ctx.rounds == 1 {
            self.ensure_categories(ctx).await?;
        }
        let page = self
            .source
            .fetch_batch(ctx.token.as_deref(), self.cfg.amount)
            .await?;
        match classify_page(page) {
            PageOutcome::Stop(stop) => Ok(Phase::Done(stop)),
            PageOutcome::Exhausted => {
                info!(round = ctx.rounds, "session token exhausted (response_code 4); rotating");
                Ok(Phase::Rotating { attempt: 0 })
            }
            PageOutcome::Items(items) => {
                let new_items = self.process_round(ctx, items).await?;
                info!(
                    round = ctx.rounds,
                    new_imported = new_items,
                    total_imported = ctx.total_imported,
                    "round finished"
                );
                if new_items > 0 {
                    self.pause().await;
                    Ok(Phase::Fetching)
                } else {
                    info!(round = ctx.rounds, "no new questions this round; rotating token");
                    Ok(Phase::Rotating { attempt: 0 })
                }
            }
        }
    }

    async fn rotation_attempt(&mut self, ctx: &mut RunContext, attempt: u32) -> Result<Phase> {
        let max = self.cfg.max_rotation_attempts;
        if attempt >= max {
            return Ok(Phase::Done(StopReason::RotationExhausted));
        }
        let attempt = attempt + 1;
        info!(attempt, max, "requesting fresh session token");
        let token = self
            .source
            .request_token()
            .await
            .context("rotating session token")?;
        info!(attempt, token = %redact_token(&token), "rotated session token");
        ctx.token = Some(token);
        ctx.rotations += 1;

        let page = self
            .source
            .fetch_batch(ctx.token.as_deref(), self.cfg.amount)
            .await?;
        let new_items = match classify_page(page) {
            PageOutcome::Stop(stop) => return Ok(Phase::Done(stop)),
            PageOutcome::Exhausted => 0,
            PageOutcome::Items(items) => self.process_round(ctx, items).await?,
        };
        info!(attempt, new_imported = new_items, "rotation attempt finished");

        if new_items > 0 {
            self.pause().await;
            return Ok(Phase::Fetching);
        }
        if attempt >= max {
            info!(attempts = max, "no new questions after token refresh attempts; stopping");
            return Ok(Phase::Done(StopReason::RotationExhausted));
        }
        self.pause().await;
        Ok(Phase::Rotating { attempt })
    }

    async fn pause(&self) {
        if !self.cfg.delay.is_zero() {
            tokio::time::sleep(self.cfg.delay).await;
        }
    }

    /// Process one page in order; returns how many questions were created.
    async fn process_round(&mut self, ctx: &mut RunContext, items: Vec<RawQuestion>) -> Result<u64> {
        let empty = CategorySnapshot::default();
        let mut new_items = 0u64;
        for item in items {
            let text = normalize_text(item.question.as_deref());
            if !ctx.seen.insert(text.clone()) {
                ctx.skipped_seen += 1;
                debug!(question = %preview(&text), "already seen this run");
                continue;
            }
            let snapshot = ctx.categories.as_ref().unwrap_or(&empty);
            match self.save_question(snapshot, &item, &text).await {
                Ok(true) => {
                    new_items += 1;
                    ctx.total_imported += 1;
                    debug!(question = %preview(&text), "imported");
                }
                Ok(false) => ctx.skipped_existing += 1,
                Err(err) => match self.cfg.on_item_error {
                    ItemErrorPolicy::Abort => {
                        return Err(err.context(format!("importing question {:?}", preview(&text))));
                    }
                    ItemErrorPolicy::Skip => {
                        ctx.failed_items += 1;
                        warn!(question = %preview(&text), error = %err, "skipping item that failed to import");
                    }
                },
            }
        }
        Ok(new_items)
    }

    /// `Ok(false)` when a question with this text is already stored.
    async fn save_question(
        &mut self,
        snapshot: &CategorySnapshot,
        item: &RawQuestion,
        text: &str,
    ) -> Result<bool> {
        if text.is_empty() {
            bail!("malformed item: empty question text");
        }
        let store = self.resolver.store();
        if store.find_question_id(text).await?.is_some() {
            return Ok(false);
        }

        let correct = item
            .correct_answer
            .as_deref()
            .ok_or_else(|| anyhow!("malformed item: missing correct_answer"))?;
        let kind = normalize_text(item.kind.as_deref());
        if kind.is_empty() {
            bail!("malformed item: missing type");
        }
        let category = normalize_text(item.category.as_deref());
        if category.is_empty() {
            bail!("malformed item: missing category");
        }

        let category_id = self.resolver.resolve_category(&category, snapshot).await?;
        let difficulty = difficulty_label(Some(&normalize_text(item.difficulty.as_deref())));
        let difficulty_id = self.resolver.resolve_difficulty(&difficulty).await?;
        let type_id = self.resolver.resolve_type(&type_label(&kind)).await?;

        let correct_answer_id = self
            .resolver
            .resolve_answer(&normalize_text(Some(correct)))
            .await?;
        let mut incorrect_answer_ids = Vec::new();
        for answer in item.incorrect_answers.iter().flatten() {
            incorrect_answer_ids.push(
                self.resolver
                    .resolve_answer(&normalize_text(Some(answer)))
                    .await?,
            );
        }

        store
            .create_question(&NewQuestion {
                question: text.to_string(),
                difficulty_id,
                category_id,
                type_id,
                correct_answer_id,
                incorrect_answer_ids,
            })
            .await?;
        Ok(true)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
