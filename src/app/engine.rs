//! Chat engine: retrieval-augmented SQL generation over one BigQuery project.

use super::llm::{ChatModel, LlmError, Message};
use super::store::{StoreError, TrainingEntry, TrainingKind, VectorStore};
use super::warehouse::{BigQueryConnection, QueryResult, WarehouseError};
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Examples of each kind pulled into a prompt.
const RETRIEVAL_LIMIT: usize = 10;
const PREVIEW_ROWS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("model response did not contain SQL: {0}")]
    NoSql(String),

    #[error("query task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct ChatEngine {
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn ChatModel>,
    warehouse: BigQueryConnection,
}

impl ChatEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn ChatModel>,
        warehouse: BigQueryConnection,
    ) -> Self {
        Self {
            store,
            llm,
            warehouse,
        }
    }

    pub async fn generate_sql(&self, question: &str) -> Result<String, EngineError> {
        let examples = self.store.similar(TrainingKind::Sql, question, RETRIEVAL_LIMIT);
        let ddl = self.store.similar(TrainingKind::Ddl, question, RETRIEVAL_LIMIT);
        let docs = self
            .store
            .similar(TrainingKind::Documentation, question, RETRIEVAL_LIMIT);

        let messages = sql_prompt(question, &examples, &ddl, &docs);
        let response = self.llm.submit_prompt(&messages).await?;
        extract_sql(&response).ok_or(EngineError::NoSql(response))
    }

    pub async fn run_sql(&self, sql: &str) -> Result<QueryResult, EngineError> {
        let warehouse = self.warehouse.clone();
        let sql = sql.to_string();
        let result = tokio::task::spawn_blocking(move || warehouse.run_sql(&sql)).await??;
        Ok(result)
    }

    /// Ask the model to repair `sql` given the error it produced.
    pub async fn fix_sql(
        &self,
        question: &str,
        sql: &str,
        error: &str,
    ) -> Result<String, EngineError> {
        let messages = vec![
            Message::system(format!(
                "You are a BigQuery SQL expert working in project {}. \
                 Correct the query so that it runs. Reply with the corrected SQL only.",
                self.warehouse.project_id()
            )),
            Message::user(format!(
                "Question: {question}\n\nQuery:\n{sql}\n\nError:\n{error}"
            )),
        ];
        let response = self.llm.submit_prompt(&messages).await?;
        extract_sql(&response).ok_or(EngineError::NoSql(response))
    }

    /// `result` is only passed when the model is allowed to see data.
    pub async fn generate_followup_questions(
        &self,
        question: &str,
        sql: &str,
        result: Option<&QueryResult>,
        count: usize,
    ) -> Result<Vec<String>, EngineError> {
        let mut context = format!(
            "The user asked: {question}\n\nThe SQL query for this question was:\n{sql}\n"
        );
        if let Some(result) = result {
            context.push_str(&format!(
                "\nThe query returned:\n{}\n",
                result.preview(PREVIEW_ROWS)
            ));
        }
        let messages = vec![
            Message::system(context),
            Message::user(format!(
                "Generate a list of {count} followup questions the user might ask about \
                 this data. Each must be answerable with SQL. One question per line, no \
                 numbering and no explanations."
            )),
        ];
        let response = self.llm.submit_prompt(&messages).await?;
        Ok(parse_question_list(&response, count))
    }

    pub async fn generate_summary(
        &self,
        question: &str,
        result: &QueryResult,
    ) -> Result<String, EngineError> {
        let messages = vec![
            Message::system(format!(
                "The user asked: {question}\n\nThe query returned:\n{}",
                result.preview(PREVIEW_ROWS)
            )),
            Message::user(
                "Briefly summarize the data in answer to the question. \
                 Reply with the summary only.",
            ),
        ];
        Ok(self.llm.submit_prompt(&messages).await?.trim().to_string())
    }

    /// Sample of questions already in the training corpus.
    pub fn suggested_questions(&self, count: usize) -> Vec<String> {
        let questions: Vec<String> = self
            .store
            .entries()
            .into_iter()
            .filter(|e| e.kind == TrainingKind::Sql)
            .filter_map(|e| e.question)
            .collect();
        questions
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect()
    }

    /// Store writes hit the data volume, so they run on the blocking pool.
    pub async fn train(
        &self,
        kind: TrainingKind,
        question: Option<&str>,
        content: &str,
    ) -> Result<String, EngineError> {
        let store = Arc::clone(&self.store);
        let question = question.map(str::to_string);
        let content = content.to_string();
        let id = tokio::task::spawn_blocking(move || {
            store.add(kind, question.as_deref(), &content)
        })
        .await??;
        Ok(id)
    }

    pub fn training_data(&self) -> Vec<TrainingEntry> {
        self.store.entries()
    }

    pub async fn remove_training_data(&self, id: &str) -> Result<(), EngineError> {
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.remove(&id)).await??;
        Ok(())
    }
}

fn sql_prompt(
    question: &str,
    examples: &[TrainingEntry],
    ddl: &[TrainingEntry],
    docs: &[TrainingEntry],
) -> Vec<Message> {
    let mut system = String::from(
        "You are a BigQuery SQL expert. Generate a SQL query that answers the user's \
         question. Base the answer only on the context below.\n",
    );
    if !ddl.is_empty() {
        system.push_str("\n===Tables\n");
        for entry in ddl {
            system.push_str(&entry.content);
            system.push_str("\n\n");
        }
    }
    if !docs.is_empty() {
        system.push_str("\n===Additional Context\n");
        for entry in docs {
            system.push_str(&entry.content);
            system.push_str("\n\n");
        }
    }
    system.push_str(
        "\n===Response Guidelines\n\
         1. If the context is sufficient, reply with a valid BigQuery standard SQL query \
         and no explanation.\n\
         2. If the context is insufficient, explain why it cannot be answered.\n\
         3. Use fully qualified table names.\n",
    );

    let mut messages = vec![Message::system(system)];
    for example in examples {
        if let Some(q) = example.question.as_deref() {
            messages.push(Message::user(q));
            messages.push(Message::assistant(example.content.clone()));
        }
    }
    messages.push(Message::user(question));
    messages
}

/// Pull a SQL statement out of a model reply.
///
/// Prefers a fenced code block; otherwise takes the text from the first line
/// that begins with `SELECT` or `WITH`.
pub fn extract_sql(response: &str) -> Option<String> {
    if let Some(start) = response.find("```") {
        let after = &response[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        let body = body.find("```").map(|end| &body[..end]).unwrap_or(body);
        let sql = body.trim();
        if !sql.is_empty() {
            return Some(sql.to_string());
        }
    }

    let mut offset = 0;
    for line in response.split_inclusive('\n') {
        let first_word = line
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        if first_word == "SELECT" || first_word == "WITH" {
            let rest = response[offset..].trim();
            let sql = match rest.find(';') {
                Some(end) => &rest[..=end],
                None => rest,
            };
            return Some(sql.to_string());
        }
        offset += line.len();
    }
    None
}

fn parse_question_list(response: &str, limit: usize) -> Vec<String> {
    response
        .lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
        })
        .filter(|l| !l.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}
