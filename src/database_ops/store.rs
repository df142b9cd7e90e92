//! Persistence seam for the importer plus the Postgres implementation.
//!
//! Every operation is a single find or a single create; nothing here updates or
//! deletes rows. Question creation is not wrapped in a transaction, so a crash
//! between answer and question inserts can leave orphaned answer rows.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, instrument};

use crate::database_ops::db::Db;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRecord {
    pub id: i64,
    pub name: String,
    pub opentdb_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub question: String,
    pub difficulty_id: i64,
    pub category_id: i64,
    pub type_id: i64,
    pub correct_answer_id: i64,
    pub incorrect_answer_ids: Vec<i64>,
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn find_question_id(&self, text: &str) -> Result<Option<i64>>;
    async fn create_question(&self, question: &NewQuestion) -> Result<i64>;

    async fn find_category_by_name(&self, name: &str) -> Result<Option<CategoryRecord>>;
    async fn find_category_by_external_id(&self, opentdb_id: i64)
        -> Result<Option<CategoryRecord>>;
    async fn create_category(&self, name: &str, opentdb_id: i64) -> Result<i64>;

    async fn find_difficulty_id(&self, level: &str) -> Result<Option<i64>>;
    async fn create_difficulty(&self, level: &str) -> Result<i64>;

    async fn find_type_id(&self, label: &str) -> Result<Option<i64>>;
    async fn create_type(&self, label: &str) -> Result<i64>;

    /// Lowest-id answer with exactly this text. Answer text is not unique.
    async fn find_first_answer_id(&self, text: &str) -> Result<Option<i64>>;
    async fn create_answer(&self, text: &str) -> Result<i64>;

    async fn count_questions(&self) -> Result<i64>;
    async fn sample_questions(&self, limit: i64) -> Result<Vec<String>>;
}

async fn optional_id(db: &Db, sql: &str, key: &str) -> Result<Option<i64>> {
    let row = sqlx::query(sql)
        .persistent(false)
        .bind(key)
        .fetch_optional(&db.pool)
        .await?;
    Ok(row.map(|r| r.get::<i64, _>("id")))
}

async fn insert_returning_id(db: &Db, sql: &str, value: &str) -> Result<i64> {
    let row = sqlx::query(sql)
        .persistent(false)
        .bind(value)
        .fetch_one(&db.pool)
        .await?;
    Ok(row.get::<i64, _>("id"))
}

fn category_from_row(r: sqlx::postgres::PgRow) -> CategoryRecord {
    CategoryRecord {
        id: r.get("id"),
        name: r.get("name"),
        opentdb_id: r.get("opentdb_id"),
    }
}

#[async_trait]
impl QuestionStore for Db {
    async fn find_question_id(&self, text: &str) -> Result<Option<i64>> {
        optional_id(self, "SELECT id FROM questions WHERE question = $1", text)
            .await
            .context("looking up question by text")
    }

    #[instrument(skip(self, question), fields(incorrect = question.incorrect_answer_ids.len()))]
    async fn create_question(&self, question: &NewQuestion) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO questions (question, difficulty_id, category_id, type_id, correct_answer_id)
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .persistent(false)
        .bind(&question.question)
        .bind(question.difficulty_id)
        .bind(question.category_id)
        .bind(question.type_id)
        .bind(question.correct_answer_id)
        .fetch_one(&self.pool)
        .await
        .context("inserting question")?;
        let question_id: i64 = row.get("id");

        if !question.incorrect_answer_ids.is_empty() {
            sqlx::query(
                "INSERT INTO question_incorrect_answers (question_id, answer_id)
                 SELECT $1, UNNEST($2::bigint[])
                 ON CONFLICT DO NOTHING",
            )
            .persistent(false)
            .bind(question_id)
            .bind(question.incorrect_answer_ids.as_slice())
            .execute(&self.pool)
            .await
            .context("connecting incorrect answers")?;
        }
        debug!(question_id, "question inserted");
        Ok(question_id)
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Option<CategoryRecord>> {
        let row = sqlx::query("SELECT id, name, opentdb_id FROM categories WHERE name = $1")
            .persistent(false)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("looking up category by name")?;
        Ok(row.map(category_from_row))
    }

    async fn find_category_by_external_id(
        &self,
        opentdb_id: i64,
    ) -> Result<Option<CategoryRecord>> {
        let row = sqlx::query("SELECT id, name, opentdb_id FROM categories WHERE opentdb_id = $1")
            .persistent(false)
            .bind(opentdb_id)
            .fetch_optional(&self.pool)
            .await
            .context("looking up category by opentdb id")?;
        Ok(row.map(category_from_row))
    }

    #[instrument(skip(self))]
    async fn create_category(&self, name: &str, opentdb_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO categories (name, opentdb_id) VALUES ($1, $2) RETURNING id",
        )
        .persistent(false)
        .bind(name)
        .bind(opentdb_id)
        .fetch_one(&self.pool)
        .await
        .context("inserting category")?;
        Ok(row.get("id"))
    }

    async fn find_difficulty_id(&self, level: &str) -> Result<Option<i64>> {
        optional_id(self, "SELECT id FROM difficulties WHERE level = $1", level)
            .await
            .context("looking up difficulty")
    }

    #[instrument(skip(self))]
    async fn create_difficulty(&self, level: &str) -> Result<i64> {
        insert_returning_id(
            self,
            "INSERT INTO difficulties (level) VALUES ($1) RETURNING id",
            level,
        )
        .await
        .context("inserting difficulty")
    }

    async fn find_type_id(&self, label: &str) -> Result<Option<i64>> {
        optional_id(self, "SELECT id FROM question_types WHERE label = $1", label)
            .await
            .context("looking up question type")
    }

    #[instrument(skip(self))]
    async fn create_type(&self, label: &str) -> Result<i64> {
        insert_returning_id(
            self,
            "INSERT INTO question_types (label) VALUES ($1) RETURNING id",
            label,
        )
        .await
        .context("inserting question type")
    }

    async fn find_first_answer_id(&self, text: &str) -> Result<Option<i64>> {
        optional_id(
            self,
            "SELECT id FROM answers WHERE answer = $1 ORDER BY id LIMIT 1",
            text,
        )
        .await
        .context("looking up answer")
    }

    async fn create_answer(&self, text: &str) -> Result<i64> {
        insert_returning_id(
            self,
            "INSERT INTO answers (answer) VALUES ($1) RETURNING id",
            text,
        )
        .await
        .context("inserting answer")
    }

    async fn count_questions(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
            .persistent(false)
            .fetch_one(&self.pool)
            .await
            .context("counting questions")?;
        Ok(count)
    }

    async fn sample_questions(&self, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT question FROM questions ORDER BY id LIMIT $1")
            .persistent(false)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("sampling questions")?;
        Ok(rows.into_iter().map(|r| r.get("question")).collect())
    }
}
