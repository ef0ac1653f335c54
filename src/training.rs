//! Post-deploy training trigger.
//!
//! Asks a deployed service to build its training corpus from a BigQuery
//! dataset. Failures come back as a message instead of an error so callers
//! can report them without aborting.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TrainSetupRequest {
    pub project_id: String,
    pub dataset_id: String,
    /// Sent verbatim as configured, e.g. `['orders', 'customers']`.
    pub table_list: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainSetupOutcome {
    Started(serde_json::Value),
    Failed(String),
}

pub fn endpoint(service_url: &str) -> String {
    format!("{}/api/v0/setup_train", service_url.trim_end_matches('/'))
}

pub async fn train_setup(
    client: &reqwest::Client,
    service_url: &str,
    request: &TrainSetupRequest,
) -> TrainSetupOutcome {
    match post(client, service_url, request).await {
        Ok(body) => TrainSetupOutcome::Started(body),
        Err(e) => TrainSetupOutcome::Failed(format!("Error generating Training Session: {e}")),
    }
}

async fn post(
    client: &reqwest::Client,
    service_url: &str,
    request: &TrainSetupRequest,
) -> reqwest::Result<serde_json::Value> {
    let url = endpoint(service_url);
    tracing::info!(%url, "requesting training setup");
    client
        .post(url)
        .json(request)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}
