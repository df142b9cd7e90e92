//! Find-or-create resolution of the label tables a question points at.
//!
//! Labels are expected to be decoded and trimmed already. Ids for categories,
//! difficulties and types are cached for the lifetime of the resolver; answers
//! are always looked up since their text is not unique.
use anyhow::{bail, Result};
use rand::Rng;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::database_ops::opentdb::CategorySnapshot;
use crate::database_ops::store::QuestionStore;

const SYNTHETIC_ID_ATTEMPTS: usize = 8;

/// Negative external id for a category the catalog snapshot does not know.
///
/// Real catalog ids are small positive integers, so the negative range never
/// collides with a future authoritative id.
pub fn synthetic_category_id() -> i64 {
    let millis = chrono::Utc::now().timestamp_millis();
    let jitter: i64 = rand::thread_rng().gen_range(0..1_000);
    let magnitude = millis.saturating_mul(1_000).saturating_add(jitter).max(1);
    -magnitude
}

pub struct EntityResolver<'a, S: QuestionStore + ?Sized> {
    store: &'a S,
    category_ids: HashMap<String, i64>,
    difficulty_ids: HashMap<String, i64>,
    type_ids: HashMap<String, i64>,
}

impl<'a, S: QuestionStore + ?Sized> EntityResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            category_ids: HashMap::new(),
            difficulty_ids: HashMap::new(),
            type_ids: HashMap::new(),
        }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    /// Category row id for a decoded display name.
    ///
    /// A name the snapshot knows is looked up by its external id first, then by
    /// name, and only then created with that id. An unknown name is looked up
    /// by name and otherwise created with a synthetic negative id. Existing
    /// rows are returned as they are; their external id is never rewritten.
    pub async fn resolve_category(
        &mut self,
        name: &str,
        snapshot: &CategorySnapshot,
    ) -> Result<i64> {
        if let Some(id) = self.category_ids.get(name) {
            return Ok(*id);
        }
        let id = match snapshot.external_id(name) {
            Some(opentdb_id) => {
                if let Some(row) = self.store.find_category_by_external_id(opentdb_id).await? {
                    row.id
                } else if let Some(row) = self.store.find_category_by_name(name).await? {
                    debug!(category = %name, opentdb_id, existing = row.opentdb_id, "category exists via name");
                    row.id
                } else {
                    let id = self.store.create_category(name, opentdb_id).await?;
                    info!(category = %name, opentdb_id, category_id = id, "category inserted");
                    id
                }
            }
            None => match self.store.find_category_by_name(name).await? {
                Some(row) => row.id,
                None => {
                    let opentdb_id = self.unused_synthetic_id().await?;
                    let id = self.store.create_category(name, opentdb_id).await?;
                    info!(category = %name, opentdb_id, category_id = id, "category inserted with synthetic id");
                    id
                }
            },
        };
        self.category_ids.insert(name.to_string(), id);
        Ok(id)
    }

    async fn unused_synthetic_id(&self) -> Result<i64> {
        for _ in 0..SYNTHETIC_ID_ATTEMPTS {
            let candidate = synthetic_category_id();
            if self
                .store
                .find_category_by_external_id(candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }
        bail!("could not allocate an unused synthetic category id")
    }

    pub async fn resolve_difficulty(&mut self, level: &str) -> Result<i64> {
        if let Some(id) = self.difficulty_ids.get(level) {
            return Ok(*id);
        }
        let id = match self.store.find_difficulty_id(level).await? {
            Some(id) => id,
            None => {
                let id = self.store.create_difficulty(level).await?;
                info!(difficulty = %level, difficulty_id = id, "difficulty inserted");
                id
            }
        };
        self.difficulty_ids.insert(level.to_string(), id);
        Ok(id)
    }

    /// `label` is the display label, i.e. after `normalization::type_label`.
    pub async fn resolve_type(&mut self, label: &str) -> Result<i64> {
        if let Some(id) = self.type_ids.get(label) {
            return Ok(*id);
        }
        let id = match self.store.find_type_id(label).await? {
            Some(id) => id,
            None => {
                let id = self.store.create_type(label).await?;
                info!(question_type = %label, type_id = id, "question type inserted");
                id
            }
        };
        self.type_ids.insert(label.to_string(), id);
        Ok(id)
    }

    /// First answer row with exactly this text, or a new one.
    ///
    /// Duplicate answer rows left by earlier runs are tolerated and never merged;
    /// whichever the store reports first is reused.
    pub async fn resolve_answer(&self, text: &str) -> Result<i64> {
        if let Some(id) = self.store.find_first_answer_id(text).await? {
            return Ok(id);
        }
        self.store.create_answer(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::MemoryStore;

    fn snapshot() -> CategorySnapshot {
        CategorySnapshot::from_pairs([
            ("Entertainment: Video Games", 31),
            ("Science: Computers", 18),
        ])
    }

    #[test]
    fn synthetic_ids_are_negative() {
        for _ in 0..32 {
            assert!(synthetic_category_id() < 0);
        }
    }

    #[tokio::test]
    async fn known_category_is_created_with_external_id_once() {
        let store = MemoryStore::new();
        let snap = snapshot();
        let mut resolver = EntityResolver::new(&store);
        let a = resolver
            .resolve_category("Entertainment: Video Games", &snap)
            .await
            .unwrap();

        // A fresh resolver (next run) must find the same row.
        let mut next_run = EntityResolver::new(&store);
        let b = next_run
            .resolve_category("Entertainment: Video Games", &snap)
            .await
            .unwrap();
        assert_eq!(a, b);

        let tables = store.snapshot().unwrap();
        assert_eq!(tables.categories.len(), 1);
        assert_eq!(tables.categories[0].opentdb_id, 31);
    }

    #[tokio::test]
    async fn known_category_falls_back_to_existing_name_row() {
        let store = MemoryStore::new();
        let existing = store
            .create_category("Science: Computers", -42)
            .await
            .unwrap();
        let mut resolver = EntityResolver::new(&store);
        let id = resolver
            .resolve_category("Science: Computers", &snapshot())
            .await
            .unwrap();
        assert_eq!(id, existing);
        assert_eq!(store.snapshot().unwrap().categories.len(), 1);
    }

    #[tokio::test]
    async fn unknown_category_gets_synthetic_id_and_is_reused() {
        let store = MemoryStore::new();
        let snap = CategorySnapshot::default();
        let mut resolver = EntityResolver::new(&store);
        let a = resolver.resolve_category("Manual", &snap).await.unwrap();
        let mut again = EntityResolver::new(&store);
        let b = again.resolve_category("Manual", &snap).await.unwrap();
        assert_eq!(a, b);
        let tables = store.snapshot().unwrap();
        assert_eq!(tables.categories.len(), 1);
        assert!(tables.categories[0].opentdb_id < 0);
    }

    #[tokio::test]
    async fn labels_are_find_or_create() {
        let store = MemoryStore::new();
        let mut resolver = EntityResolver::new(&store);
        let easy = resolver.resolve_difficulty("Easy").await.unwrap();
        assert_eq!(resolver.resolve_difficulty("Easy").await.unwrap(), easy);
        let tf = resolver.resolve_type("True/False").await.unwrap();
        let mut other = EntityResolver::new(&store);
        assert_eq!(other.resolve_type("True/False").await.unwrap(), tf);
        let tables = store.snapshot().unwrap();
        assert_eq!(tables.difficulties.len(), 1);
        assert_eq!(tables.types, vec![(tf, "True/False".to_string())]);
    }

    #[tokio::test]
    async fn answers_reuse_first_match() {
        let store = MemoryStore::new();
        let first = store.create_answer("42").await.unwrap();
        store.create_answer("42").await.unwrap();
        let resolver = EntityResolver::new(&store);
        assert_eq!(resolver.resolve_answer("42").await.unwrap(), first);
        let fresh = resolver.resolve_answer("24").await.unwrap();
        assert_eq!(resolver.resolve_answer("24").await.unwrap(), fresh);
        assert_eq!(store.snapshot().unwrap().answers.len(), 3);
    }
}
