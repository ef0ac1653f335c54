//! Front-end settings served to the chat client.

use crate::config::Personalization;
use serde::Serialize;

/// What the end user gets to see and do. Each toggle is independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub show_training_data: bool,
    pub suggested_questions: bool,
    pub sql: bool,
    pub table: bool,
    pub csv_download: bool,
    pub chart: bool,
    pub redraw_chart: bool,
    pub auto_fix_sql: bool,
    pub ask_results_correct: bool,
    pub followup_questions: bool,
    pub summarization: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            show_training_data: true,
            suggested_questions: true,
            sql: true,
            table: true,
            csv_download: true,
            chart: true,
            redraw_chart: true,
            auto_fix_sql: true,
            ask_results_correct: true,
            followup_questions: true,
            summarization: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiSettings {
    pub debug: bool,
    /// When false, query results are never included in model prompts.
    pub allow_llm_to_see_data: bool,
    pub logo: String,
    pub title: String,
    pub subtitle: String,
    #[serde(flatten)]
    pub flags: FeatureFlags,
}

impl UiSettings {
    pub fn from_personalization(p: &Personalization) -> Self {
        Self {
            debug: true,
            allow_llm_to_see_data: false,
            logo: p.logo_url.clone(),
            title: p.app_title.clone(),
            subtitle: p.app_subtitle.clone(),
            flags: FeatureFlags::default(),
        }
    }
}
