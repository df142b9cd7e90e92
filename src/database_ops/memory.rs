//! In-process `QuestionStore` used for dry runs and tests.
//!
//! Enforces the same uniqueness rules as the Postgres schema so a resolver bug
//! that would trip a unique constraint fails here too.
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

use crate::database_ops::store::{CategoryRecord, NewQuestion, QuestionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredQuestion {
    pub id: i64,
    pub question: NewQuestion,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    next_id: i64,
    pub questions: Vec<StoredQuestion>,
    pub categories: Vec<CategoryRecord>,
    pub difficulties: Vec<(i64, String)>,
    pub types: Vec<(i64, String)>,
    pub answers: Vec<(i64, String)>,
}

impl MemoryTables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryTables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Result<MemoryTables> {
        Ok(self.lock()?.clone())
    }
}

fn find_label(rows: &[(i64, String)], label: &str) -> Option<i64> {
    rows.iter().find(|(_, l)| l == label).map(|(id, _)| *id)
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn find_question_id(&self, text: &str) -> Result<Option<i64>> {
        Ok(self
            .lock()?
            .questions
            .iter()
            .find(|q| q.question.question == text)
            .map(|q| q.id))
    }

    async fn create_question(&self, question: &NewQuestion) -> Result<i64> {
        let mut t = self.lock()?;
        if t.questions.iter().any(|q| q.question.question == question.question) {
            bail!("unique violation: questions.question = {:?}", question.question);
        }
        let id = t.allocate_id();
        t.questions.push(StoredQuestion {
            id,
            question: question.clone(),
        });
        Ok(id)
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Option<CategoryRecord>> {
        Ok(self
            .lock()?
            .categories
            .iter()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn find_category_by_external_id(
        &self,
        opentdb_id: i64,
    ) -> Result<Option<CategoryRecord>> {
        Ok(self
            .lock()?
            .categories
            .iter()
            .find(|c| c.opentdb_id == opentdb_id)
            .cloned())
    }

    async fn create_category(&self, name: &str, opentdb_id: i64) -> Result<i64> {
        let mut t = self.lock()?;
        if t.categories.iter().any(|c| c.name == name) {
            bail!("unique violation: categories.name = {name:?}");
        }
        if t.categories.iter().any(|c| c.opentdb_id == opentdb_id) {
            bail!("unique violation: categories.opentdb_id = {opentdb_id}");
        }
        let id = t.allocate_id();
        t.categories.push(CategoryRecord {
            id,
            name: name.to_string(),
            opentdb_id,
        });
        Ok(id)
    }

    async fn find_difficulty_id(&self, level: &str) -> Result<Option<i64>> {
        Ok(find_label(&self.lock()?.difficulties, level))
    }

    async fn create_difficulty(&self, level: &str) -> Result<i64> {
        let mut t = self.lock()?;
        if find_label(&t.difficulties, level).is_some() {
            bail!("unique violation: difficulties.level = {level:?}");
        }
        let id = t.allocate_id();
        t.difficulties.push((id, level.to_string()));
        Ok(id)
    }

    async fn find_type_id(&self, label: &str) -> Result<Option<i64>> {
        Ok(find_label(&self.lock()?.types, label))
    }

    async fn create_type(&self, label: &str) -> Result<i64> {
        let mut t = self.lock()?;
        if find_label(&t.types, label).is_some() {
            bail!("unique violation: question_types.label = {label:?}");
        }
        let id = t.allocate_id();
        t.types.push((id, label.to_string()));
        Ok(id)
    }

    async fn find_first_answer_id(&self, text: &str) -> Result<Option<i64>> {
        Ok(find_label(&self.lock()?.answers, text))
    }

    async fn create_answer(&self, text: &str) -> Result<i64> {
        let mut t = self.lock()?;
        let id = t.allocate_id();
        t.answers.push((id, text.to_string()));
        Ok(id)
    }

    async fn count_questions(&self) -> Result<i64> {
        Ok(self.lock()?.questions.len() as i64)
    }

    async fn sample_questions(&self, limit: i64) -> Result<Vec<String>> {
        let take = usize::try_from(limit.max(0)).unwrap_or(0);
        Ok(self
            .lock()?
            .questions
            .iter()
            .take(take)
            .map(|q| q.question.question.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_allow_duplicates_and_first_match_wins() {
        let store = MemoryStore::new();
        let first = store.create_answer("Paris").await.unwrap();
        let second = store.create_answer("Paris").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.find_first_answer_id("Paris").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn unique_labels_are_enforced() {
        let store = MemoryStore::new();
        store.create_type("True/False").await.unwrap();
        assert!(store.create_type("True/False").await.is_err());
        store.create_category("Science", 17).await.unwrap();
        assert!(store.create_category("Science", 18).await.is_err());
        assert!(store.create_category("Other", 17).await.is_err());
    }

    #[tokio::test]
    async fn samples_in_insertion_order() {
        let store = MemoryStore::new();
        for text in ["a", "b", "c"] {
            store
                .create_question(&NewQuestion {
                    question: text.to_string(),
                    difficulty_id: 1,
                    category_id: 1,
                    type_id: 1,
                    correct_answer_id: 1,
                    incorrect_answer_ids: vec![],
                })
                .await
                .unwrap();
        }
        assert_eq!(store.count_questions().await.unwrap(), 3);
        assert_eq!(store.sample_questions(2).await.unwrap(), vec!["a", "b"]);
    }
}
