//! BigQuery access through the `bq` command-line tool.

use crate::runner::{CommandRunner, CommandSpec};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

const MAX_ROWS: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("could not launch bq: {0}")]
    Launch(#[from] std::io::Error),

    #[error("query failed: {0}")]
    Query(String),

    #[error("could not decode query output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("could not encode CSV: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    /// Set when `bq` stopped at the row cap.
    pub truncated: bool,
}

impl QueryResult {
    fn from_rows(rows: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    pub fn to_csv(&self) -> Result<String, WarehouseError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(self.columns.iter().map(|c| cell(row.get(c))))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| WarehouseError::Csv(e.into_error().into()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Compact text rendering for prompts.
    pub fn preview(&self, max_rows: usize) -> String {
        let mut lines = vec![self.columns.join(" | ")];
        for row in self.rows.iter().take(max_rows) {
            let cells: Vec<String> = self.columns.iter().map(|c| cell(row.get(c))).collect();
            lines.push(cells.join(" | "));
        }
        lines.join("\n")
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Connection to a single BigQuery project.
#[derive(Clone)]
pub struct BigQueryConnection {
    project_id: String,
    location: String,
    runner: Arc<dyn CommandRunner>,
}

impl BigQueryConnection {
    pub fn new(project_id: &str, location: &str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            project_id: project_id.to_string(),
            location: location.to_string(),
            runner,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn query_command(&self, sql: &str) -> CommandSpec {
        let mut cmd = CommandSpec::new("bq")
            .arg(format!("--project_id={}", self.project_id))
            .arg("--format=json");
        if !self.location.is_empty() {
            cmd = cmd.arg(format!("--location={}", self.location));
        }
        cmd.arg("query")
            .arg("--use_legacy_sql=false")
            .arg(format!("--max_rows={MAX_ROWS}"))
            .arg(sql)
    }

    /// Blocks until `bq` exits.
    pub fn run_sql(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let output = self.runner.run(&self.query_command(sql))?;
        if !output.success() {
            // bq reports query errors on stdout as often as on stderr.
            let detail = [output.stderr.trim(), output.stdout.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(WarehouseError::Query(detail));
        }
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(QueryResult::default());
        }
        let rows: Vec<Map<String, Value>> = serde_json::from_str(stdout)?;
        let mut result = QueryResult::from_rows(rows);
        result.truncated = result.rows.len() >= MAX_ROWS as usize;
        if result.truncated {
            tracing::warn!(max_rows = MAX_ROWS, "query result truncated");
        }
        Ok(result)
    }
}
