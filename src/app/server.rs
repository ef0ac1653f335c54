//! HTTP front-end for the chat engine.

use super::engine::{ChatEngine, EngineError};
use super::store::{StoreError, TrainingKind};
use super::ui::UiSettings;
use super::warehouse::QueryResult;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

const SUGGESTED_QUESTIONS: usize = 5;
const FOLLOWUP_QUESTIONS: usize = 5;
/// Turns kept for follow-up requests before the oldest is dropped.
const MAX_TURNS: usize = 256;

/// One question and everything derived from it so far.
#[derive(Debug, Clone, Default)]
struct Turn {
    question: String,
    sql: Option<String>,
    result: Option<QueryResult>,
}

/// Insertion-ordered turn map with a fixed capacity.
#[derive(Debug)]
struct TurnCache {
    turns: HashMap<String, Turn>,
    order: VecDeque<String>,
    capacity: usize,
}

impl TurnCache {
    fn new(capacity: usize) -> Self {
        Self {
            turns: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, id: String, turn: Turn) {
        if self.turns.insert(id.clone(), turn).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                tracing::debug!(id = %oldest, "evicting turn");
                self.turns.remove(&oldest);
            }
        }
    }

    fn get(&self, id: &str) -> Option<&Turn> {
        self.turns.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Turn> {
        self.turns.get_mut(id)
    }
}

pub struct AppState {
    pub engine: ChatEngine,
    pub settings: UiSettings,
    turns: RwLock<TurnCache>,
}

impl AppState {
    pub fn new(engine: ChatEngine, settings: UiSettings) -> Self {
        Self::with_turn_capacity(engine, settings, MAX_TURNS)
    }

    fn with_turn_capacity(engine: ChatEngine, settings: UiSettings, capacity: usize) -> Self {
        Self {
            engine,
            settings,
            turns: RwLock::new(TurnCache::new(capacity)),
        }
    }

    async fn turn(&self, id: &str) -> Result<Turn, ApiError> {
        self.turns
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("no question with id {id}")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} is disabled")]
    FeatureDisabled(&'static str),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::FeatureDisabled(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::Engine(EngineError::Store(StoreError::NotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            ApiError::BadRequest(_) | ApiError::Engine(EngineError::Store(StoreError::Empty)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Engine(e) => {
                tracing::error!(error = %e, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({ "type": "error", "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

fn require(enabled: bool, feature: &'static str) -> Result<(), ApiError> {
    if enabled {
        Ok(())
    } else {
        Err(ApiError::FeatureDisabled(feature))
    }
}

fn gen_turn_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/get_config", get(get_config))
        .route("/generate_questions", get(generate_questions))
        .route("/generate_sql", get(generate_sql))
        .route("/run_sql", get(run_sql))
        .route("/download_csv", get(download_csv))
        .route("/generate_followup_questions", get(generate_followup_questions))
        .route("/generate_summary", get(generate_summary))
        .route("/get_training_data", get(get_training_data))
        .route("/train", post(train))
        .route("/remove_training_data", post(remove_training_data));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v0", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "type": "config", "config": state.settings }))
}

async fn generate_questions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require(state.settings.flags.suggested_questions, "suggested questions")?;
    let questions = state.engine.suggested_questions(SUGGESTED_QUESTIONS);
    Ok(Json(json!({
        "type": "question_list",
        "questions": questions,
        "header": "Here are some questions you can ask:",
    })))
}

#[derive(Debug, Deserialize)]
struct QuestionParams {
    question: String,
}

async fn generate_sql(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QuestionParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let question = params.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question is empty".to_string()));
    }
    let id = gen_turn_id();
    let sql = match state.engine.generate_sql(&question).await {
        Ok(sql) => sql,
        // The model explains itself when the context cannot answer the question.
        Err(EngineError::NoSql(text)) => {
            tracing::info!(%id, %question, "model answered without SQL");
            return Ok(Json(json!({ "type": "text", "id": id, "text": text.trim() })));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::debug!(%id, %question, %sql, "generated SQL");

    let mut body = json!({ "type": "sql", "id": id });
    if state.settings.flags.sql {
        body["text"] = json!(sql);
    }
    state.turns.write().await.insert(
        id,
        Turn {
            question,
            sql: Some(sql),
            result: None,
        },
    );
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn run_sql(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let turn = state.turn(&params.id).await?;
    let sql = turn
        .sql
        .ok_or_else(|| ApiError::BadRequest("no SQL for this question".to_string()))?;

    let (sql, result, fixed) = match state.engine.run_sql(&sql).await {
        Ok(result) => (sql, result, false),
        Err(EngineError::Warehouse(err)) if state.settings.flags.auto_fix_sql => {
            tracing::info!(id = %params.id, error = %err, "query failed, asking model to fix it");
            let fixed_sql = state
                .engine
                .fix_sql(&turn.question, &sql, &err.to_string())
                .await?;
            let result = state.engine.run_sql(&fixed_sql).await?;
            (fixed_sql, result, true)
        }
        Err(e) => return Err(e.into()),
    };

    let mut body = json!({
        "type": "df",
        "id": params.id,
        "columns": result.columns,
        "row_count": result.rows.len(),
        "truncated": result.truncated,
    });
    if state.settings.flags.table {
        body["df"] = json!(result.rows);
    }
    if fixed && state.settings.flags.sql {
        body["fixed_sql"] = json!(sql);
    }

    if let Some(turn) = state.turns.write().await.get_mut(&params.id) {
        turn.sql = Some(sql);
        turn.result = Some(result);
    }
    Ok(Json(body))
}

async fn download_csv(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> Result<Response, ApiError> {
    require(state.settings.flags.csv_download, "CSV download")?;
    let turn = state.turn(&params.id).await?;
    let result = turn
        .result
        .ok_or_else(|| ApiError::BadRequest("query has not been run".to_string()))?;
    let csv = result.to_csv().map_err(EngineError::from)?;
    let headers = [
        (header::CONTENT_TYPE, "text/csv".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.csv\"", params.id),
        ),
    ];
    Ok((headers, csv).into_response())
}

async fn generate_followup_questions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require(state.settings.flags.followup_questions, "followup questions")?;
    let turn = state.turn(&params.id).await?;
    let sql = turn
        .sql
        .ok_or_else(|| ApiError::BadRequest("no SQL for this question".to_string()))?;
    let visible = if state.settings.allow_llm_to_see_data {
        turn.result.as_ref()
    } else {
        None
    };
    let questions = state
        .engine
        .generate_followup_questions(&turn.question, &sql, visible, FOLLOWUP_QUESTIONS)
        .await?;
    Ok(Json(json!({
        "type": "question_list",
        "id": params.id,
        "questions": questions,
        "header": "Here are some potential followup questions:",
    })))
}

async fn generate_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require(state.settings.flags.summarization, "summarization")?;
    require(state.settings.allow_llm_to_see_data, "sharing data with the model")?;
    let turn = state.turn(&params.id).await?;
    let result = turn
        .result
        .ok_or_else(|| ApiError::BadRequest("query has not been run".to_string()))?;
    let summary = state.engine.generate_summary(&turn.question, &result).await?;
    Ok(Json(json!({ "type": "text", "id": params.id, "text": summary })))
}

async fn get_training_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require(state.settings.flags.show_training_data, "training data")?;
    Ok(Json(json!({ "type": "df", "df": state.engine.training_data() })))
}

#[derive(Debug, Deserialize)]
struct TrainRequest {
    question: Option<String>,
    sql: Option<String>,
    ddl: Option<String>,
    documentation: Option<String>,
}

async fn train(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrainRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require(state.settings.flags.show_training_data, "training data")?;
    let (kind, content) = match (req.sql, req.ddl, req.documentation) {
        (Some(sql), None, None) => (TrainingKind::Sql, sql),
        (None, Some(ddl), None) => (TrainingKind::Ddl, ddl),
        (None, None, Some(doc)) => (TrainingKind::Documentation, doc),
        _ => {
            return Err(ApiError::BadRequest(
                "provide exactly one of sql, ddl or documentation".to_string(),
            ))
        }
    };
    if kind == TrainingKind::Sql && req.question.as_deref().map_or(true, |q| q.trim().is_empty()) {
        return Err(ApiError::BadRequest("sql training needs a question".to_string()));
    }
    let id = state
        .engine
        .train(kind, req.question.as_deref(), &content)
        .await?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
struct RemoveRequest {
    id: String,
}

async fn remove_training_data(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require(state.settings.flags.show_training_data, "training data")?;
    state.engine.remove_training_data(&req.id).await?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::engine::tests::{rows_runner, ScriptedModel};
    use crate::app::store::LocalVectorStore;
    use crate::app::warehouse::BigQueryConnection;
    use crate::config::Personalization;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn settings() -> UiSettings {
        UiSettings::from_personalization(&Personalization {
            logo_url: "https://example.com/logo.png".to_string(),
            app_title: "Ask Your Data".to_string(),
            app_subtitle: "BigQuery".to_string(),
        })
    }

    fn state(dir: &std::path::Path, replies: &[&str], settings: UiSettings) -> Arc<AppState> {
        state_with(dir, Arc::new(ScriptedModel::new(replies)), settings, MAX_TURNS)
    }

    fn state_with(
        dir: &std::path::Path,
        model: Arc<ScriptedModel>,
        settings: UiSettings,
        capacity: usize,
    ) -> Arc<AppState> {
        let engine = ChatEngine::new(
            Arc::new(LocalVectorStore::open(dir).unwrap()),
            model,
            BigQueryConnection::new("demo-project", "US", rows_runner()),
        );
        Arc::new(AppState::with_turn_capacity(engine, settings, capacity))
    }

    async fn call(router: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn config_exposes_branding_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(state(dir.path(), &[], settings()));

        let (status, body) = call(router, get_req("/api/v0/get_config")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["title"], "Ask Your Data");
        assert_eq!(body["config"]["auto_fix_sql"], true);
        assert_eq!(body["config"]["summarization"], false);
    }

    #[tokio::test]
    async fn question_to_rows_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), &["SELECT country, orders FROM sales.t"], settings());
        let router = create_router(state.clone());

        let (status, body) = call(
            router.clone(),
            get_req("/api/v0/generate_sql?question=orders%20by%20country"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "SELECT country, orders FROM sales.t");
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = call(router.clone(), get_req(&format!("/api/v0/run_sql?id={id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row_count"], 1);
        assert_eq!(body["truncated"], false);
        assert_eq!(body["df"][0]["country"], "DE");

        let resp = router
            .oneshot(get_req(&format!("/api/v0/download_csv?id={id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&bytes), "country,orders\nDE,12\n");
    }

    #[tokio::test]
    async fn failing_query_is_fixed_once() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(
            dir.path(),
            &["SELECT broken FROM sales.t", "SELECT country FROM sales.t"],
            settings(),
        );
        let router = create_router(state);

        let (_, body) = call(router.clone(), get_req("/api/v0/generate_sql?question=q")).await;
        let id = body["id"].as_str().unwrap().to_string();
        let (status, body) = call(router, get_req(&format!("/api/v0/run_sql?id={id}"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fixed_sql"], "SELECT country FROM sales.t");
    }

    #[tokio::test]
    async fn failing_query_without_auto_fix_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings();
        settings.flags.auto_fix_sql = false;
        let router = create_router(state(dir.path(), &["SELECT broken FROM t"], settings));

        let (_, body) = call(router.clone(), get_req("/api/v0/generate_sql?question=q")).await;
        let id = body["id"].as_str().unwrap().to_string();
        let (status, body) = call(router, get_req(&format!("/api/v0/run_sql?id={id}"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["type"], "error");
    }

    #[tokio::test]
    async fn hidden_sql_and_table_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings();
        settings.flags.sql = false;
        settings.flags.table = false;
        let router = create_router(state(dir.path(), &["SELECT 1"], settings));

        let (_, body) = call(router.clone(), get_req("/api/v0/generate_sql?question=q")).await;
        assert!(body.get("text").is_none());
        let id = body["id"].as_str().unwrap().to_string();
        let (_, body) = call(router, get_req(&format!("/api/v0/run_sql?id={id}"))).await;
        assert!(body.get("df").is_none());
        assert_eq!(body["row_count"], 1);
    }

    #[tokio::test]
    async fn disabled_summary_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(state(dir.path(), &[], settings()));

        let (status, body) = call(router, get_req("/api/v0/generate_summary?id=abc")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "summarization is disabled");
    }

    #[tokio::test]
    async fn unknown_turn_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(state(dir.path(), &[], settings()));

        let (status, _) = call(router, get_req("/api/v0/run_sql?id=nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn training_data_can_be_added_listed_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(state(dir.path(), &[], settings()));

        let (status, body) = call(
            router.clone(),
            post_json(
                "/api/v0/train",
                json!({ "question": "orders?", "sql": "SELECT * FROM sales.orders" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["id"].as_str().unwrap().to_string();

        let (_, body) = call(router.clone(), get_req("/api/v0/get_training_data")).await;
        assert_eq!(body["df"].as_array().unwrap().len(), 1);

        let (_, body) = call(router.clone(), get_req("/api/v0/generate_questions")).await;
        assert_eq!(body["questions"][0], "orders?");

        let (status, _) = call(
            router.clone(),
            post_json("/api/v0/remove_training_data", json!({ "id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            router,
            post_json("/api/v0/remove_training_data", json!({ "id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn train_rejects_ambiguous_payload() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(state(dir.path(), &[], settings()));

        let (status, _) = call(
            router,
            post_json("/api/v0/train", json!({ "ddl": "CREATE TABLE t (x INT64)", "documentation": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn explanation_without_sql_is_returned_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let reply = "The provided context does not include any table with revenue data.";
        let state = state(dir.path(), &[reply], settings());
        let router = create_router(state.clone());

        let (status, body) = call(router, get_req("/api/v0/generate_sql?question=revenue")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "text");
        assert_eq!(body["text"], reply);
        assert!(state.turns.read().await.turns.is_empty());
    }

    #[tokio::test]
    async fn followups_never_see_rows_without_data_access() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(&[
            "SELECT country, orders FROM sales.t",
            "Orders by month?\nTop countries?",
        ]));
        let router = create_router(state_with(dir.path(), model.clone(), settings(), MAX_TURNS));

        let (_, body) = call(router.clone(), get_req("/api/v0/generate_sql?question=orders")).await;
        let id = body["id"].as_str().unwrap().to_string();
        let (status, _) = call(router.clone(), get_req(&format!("/api/v0/run_sql?id={id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(
            router,
            get_req(&format!("/api/v0/generate_followup_questions?id={id}")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["questions"].as_array().unwrap().len(), 2);
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        for message in &prompts[1] {
            assert!(!message.content.contains("DE"), "row leaked: {}", message.content);
            assert!(!message.content.contains("The query returned"));
        }
    }

    #[tokio::test]
    async fn followups_include_rows_when_data_access_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings();
        settings.allow_llm_to_see_data = true;
        let model = Arc::new(ScriptedModel::new(&[
            "SELECT country, orders FROM sales.t",
            "Orders by month?",
        ]));
        let router = create_router(state_with(dir.path(), model.clone(), settings, MAX_TURNS));

        let (_, body) = call(router.clone(), get_req("/api/v0/generate_sql?question=orders")).await;
        let id = body["id"].as_str().unwrap().to_string();
        call(router.clone(), get_req(&format!("/api/v0/run_sql?id={id}"))).await;
        let (status, _) = call(
            router,
            get_req(&format!("/api/v0/generate_followup_questions?id={id}")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1][0].content.contains("DE | 12"));
    }

    #[tokio::test]
    async fn disabled_features_are_forbidden() {
        let cases: [(fn(&mut UiSettings), Request<Body>); 7] = [
            (
                |s| s.flags.csv_download = false,
                get_req("/api/v0/download_csv?id=abc"),
            ),
            (
                |s| s.flags.followup_questions = false,
                get_req("/api/v0/generate_followup_questions?id=abc"),
            ),
            (
                |s| s.flags.suggested_questions = false,
                get_req("/api/v0/generate_questions"),
            ),
            (
                |s| s.flags.show_training_data = false,
                get_req("/api/v0/get_training_data"),
            ),
            (
                |s| s.flags.show_training_data = false,
                post_json("/api/v0/train", json!({ "documentation": "x" })),
            ),
            (
                |s| s.flags.show_training_data = false,
                post_json("/api/v0/remove_training_data", json!({ "id": "x" })),
            ),
            (
                |s| {
                    s.flags.summarization = true;
                    s.allow_llm_to_see_data = false;
                },
                get_req("/api/v0/generate_summary?id=abc"),
            ),
        ];

        for (disable, req) in cases {
            let dir = tempfile::tempdir().unwrap();
            let mut settings = settings();
            disable(&mut settings);
            let uri = req.uri().to_string();
            let (status, body) = call(create_router(state(dir.path(), &[], settings)), req).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
            assert_eq!(body["type"], "error", "{uri}");
        }
    }

    #[test]
    fn turn_cache_drops_the_oldest_entry() {
        let mut cache = TurnCache::new(2);
        for id in ["a", "b", "c"] {
            cache.insert(id.to_string(), Turn::default());
        }
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.order, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn evicted_turn_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(&["SELECT 1", "SELECT 2", "SELECT 3"]));
        let state = state_with(dir.path(), model, settings(), 2);
        let router = create_router(state.clone());

        let mut ids = Vec::new();
        for _ in 0..3 {
            let (_, body) = call(router.clone(), get_req("/api/v0/generate_sql?question=q")).await;
            ids.push(body["id"].as_str().unwrap().to_string());
        }

        assert_eq!(state.turns.read().await.turns.len(), 2);
        let (status, _) = call(router.clone(), get_req(&format!("/api/v0/run_sql?id={}", ids[0]))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(router, get_req(&format!("/api/v0/run_sql?id={}", ids[2]))).await;
        assert_eq!(status, StatusCode::OK);
    }
}
