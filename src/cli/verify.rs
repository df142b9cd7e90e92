use anyhow::Result;
use std::fmt;

use crate::database_ops::store::QuestionStore;

pub const DEFAULT_SAMPLE_LIMIT: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub total: i64,
    pub samples: Vec<String>,
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "questions: {}", self.total)?;
        for (i, text) in self.samples.iter().enumerate() {
            writeln!(f, "  {:>2}. {}", i + 1, text)?;
        }
        Ok(())
    }
}

/// Read-only: question count plus the first `limit` texts by id.
pub async fn report<S>(store: &S, limit: i64) -> Result<VerifyReport>
where
    S: QuestionStore + ?Sized,
{
    Ok(VerifyReport {
        total: store.count_questions().await?,
        samples: store.sample_questions(limit).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::add::{add_question, ManualQuestion};
    use crate::database_ops::memory::MemoryStore;

    #[tokio::test]
    async fn reports_count_and_first_samples() {
        let store = MemoryStore::new();
        for n in 0..7 {
            let q = ManualQuestion::new(format!("Question {n}?"), "yes", vec!["no".into()]);
            add_question(&store, &q).await.unwrap();
        }
        let report = report(&store, DEFAULT_SAMPLE_LIMIT).await.unwrap();
        assert_eq!(report.total, 7);
        assert_eq!(report.samples.len(), 5);
        assert_eq!(report.samples[0], "Question 0?");
        let printed = report.to_string();
        assert!(printed.starts_with("questions: 7\n"));
        assert!(printed.contains(" 5. Question 4?"));
    }

    #[tokio::test]
    async fn empty_store_reports_zero() {
        let report = report(&MemoryStore::new(), 5).await.unwrap();
        assert_eq!(report.total, 0);
        assert!(report.samples.is_empty());
    }
}
