use anyhow::{bail, Result};
use tracing::info;

use crate::database_ops::opentdb::CategorySnapshot;
use crate::database_ops::resolver::EntityResolver;
use crate::database_ops::store::{NewQuestion, QuestionStore};
use crate::normalization::{difficulty_label, normalize_text, type_label};

pub const DEFAULT_CATEGORY: &str = "Manual";
pub const DEFAULT_DIFFICULTY: &str = "easy";
pub const DEFAULT_KIND: &str = "multiple";

/// A hand-written question. Text fields go through the same normalization as
/// imported ones, so entity-encoded input is accepted.
#[derive(Debug, Clone)]
pub struct ManualQuestion {
    pub question: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
    pub category: String,
    pub difficulty: String,
    /// `multiple` or `boolean` (or an already display-ready label).
    pub kind: String,
}

impl ManualQuestion {
    pub fn new(
        question: impl Into<String>,
        correct_answer: impl Into<String>,
        incorrect_answers: Vec<String>,
    ) -> Self {
        Self {
            question: question.into(),
            correct_answer: correct_answer.into(),
            incorrect_answers,
            category: DEFAULT_CATEGORY.to_string(),
            difficulty: DEFAULT_DIFFICULTY.to_string(),
            kind: DEFAULT_KIND.to_string(),
        }
    }
}

/// Insert one question; refuses text that is already stored.
pub async fn add_question<S>(store: &S, manual: &ManualQuestion) -> Result<i64>
where
    S: QuestionStore + ?Sized,
{
    let text = normalize_text(Some(&manual.question));
    if text.is_empty() {
        bail!("question text is empty");
    }
    let correct = normalize_text(Some(&manual.correct_answer));
    if correct.is_empty() {
        bail!("correct answer is empty");
    }
    let incorrect: Vec<String> = manual
        .incorrect_answers
        .iter()
        .map(|a| normalize_text(Some(a)))
        .filter(|a| !a.is_empty())
        .collect();
    if incorrect.is_empty() {
        bail!("at least one incorrect answer is required");
    }
    if let Some(existing) = store.find_question_id(&text).await? {
        bail!("question already exists (id {existing})");
    }

    let mut resolver = EntityResolver::new(store);
    let category = normalize_text(Some(&manual.category));
    let category = if category.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        category
    };
    let category_id = resolver
        .resolve_category(&category, &CategorySnapshot::default())
        .await?;
    let difficulty_id = resolver
        .resolve_difficulty(&difficulty_label(Some(&manual.difficulty)))
        .await?;
    let type_id = resolver
        .resolve_type(&type_label(manual.kind.trim()))
        .await?;
    let correct_answer_id = resolver.resolve_answer(&correct).await?;
    let mut incorrect_answer_ids = Vec::with_capacity(incorrect.len());
    for answer in &incorrect {
        incorrect_answer_ids.push(resolver.resolve_answer(answer).await?);
    }

    let id = store
        .create_question(&NewQuestion {
            question: text,
            difficulty_id,
            category_id,
            type_id,
            correct_answer_id,
            incorrect_answer_ids,
        })
        .await?;
    info!(question_id = id, category = %category, "manual question added");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::MemoryStore;

    fn capital() -> ManualQuestion {
        ManualQuestion::new(
            "What is the capital of France?",
            "Paris",
            vec!["Lyon".into(), "Marseille".into(), "Nice".into()],
        )
    }

    #[tokio::test]
    async fn adds_with_defaults() {
        let store = MemoryStore::new();
        let id = add_question(&store, &capital()).await.unwrap();

        let tables = store.snapshot().unwrap();
        assert_eq!(tables.questions.len(), 1);
        assert_eq!(tables.questions[0].id, id);
        assert_eq!(tables.questions[0].question.incorrect_answer_ids.len(), 3);
        assert_eq!(tables.categories[0].name, "Manual");
        assert!(tables.categories[0].opentdb_id < 0);
        assert_eq!(tables.difficulties[0].1, "Easy");
        assert_eq!(tables.types[0].1, "Multiple Choice");
    }

    #[tokio::test]
    async fn refuses_duplicate_text() {
        let store = MemoryStore::new();
        add_question(&store, &capital()).await.unwrap();
        let mut again = capital();
        again.question = "  What is the capital of France?  ".into();
        let err = add_question(&store, &again).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(store.snapshot().unwrap().questions.len(), 1);
    }

    #[tokio::test]
    async fn requires_an_incorrect_answer() {
        let store = MemoryStore::new();
        let mut q = capital();
        q.incorrect_answers = vec!["   ".into()];
        assert!(add_question(&store, &q).await.is_err());
        assert!(store.snapshot().unwrap().answers.is_empty());
    }

    #[tokio::test]
    async fn boolean_kind_maps_to_true_false() {
        let store = MemoryStore::new();
        let mut q = ManualQuestion::new("Rust has a garbage collector.", "False", vec!["True".into()]);
        q.kind = "boolean".into();
        q.difficulty = "hard".into();
        add_question(&store, &q).await.unwrap();
        let tables = store.snapshot().unwrap();
        assert_eq!(tables.types[0].1, "True/False");
        assert_eq!(tables.difficulties[0].1, "Hard");
    }
}
