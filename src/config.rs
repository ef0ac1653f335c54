//! INI configuration shared by every subcommand.
//!
//! The file is read once at process entry into an [`AppConfig`] that callers
//! pass around by reference. Every key is required; there are no defaults.

use ini::{EscapePolicy, Ini, ParseOption, Properties, WriteOption};
use std::path::{Path, PathBuf};

/// Location of the configuration file relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.ini";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write configuration file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration section [{0}] is missing")]
    MissingSection(&'static str),

    #[error("configuration key {key} is missing from section [{section}]")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    pub project_id: String,
    pub region_id: String,
    pub model: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigQuerySettings {
    pub dataset_id: String,
    pub region_id: String,
    pub table_list: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudRunSettings {
    pub data_bucket: String,
    pub service_account_name: String,
    pub app_name: String,
    // Loaded for completeness; the deploy step does not mount secrets.
    pub secret_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Personalization {
    pub logo_url: String,
    pub app_title: String,
    pub app_subtitle: String,
}

/// Every value the server and the provisioner consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub project: ProjectSettings,
    pub bigquery: BigQuerySettings,
    pub cloud_run: CloudRunSettings,
    pub api_key: String,
    pub personalization: Personalization,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = read_ini(path)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let global = section(ini, "CONFIG")?;
        let bigquery = section(ini, "BIGQUERY")?;
        let cloud_run = section(ini, "CLOUDRUN")?;
        let api_auth = section(ini, "API_AUTH")?;
        let personalization = section(ini, "PERSONALIZATION")?;

        Ok(Self {
            project: ProjectSettings {
                project_id: value(global, "CONFIG", "PROJECT_ID")?,
                region_id: value(global, "CONFIG", "REGION_ID")?,
                model: value(global, "CONFIG", "MODEL")?,
                language: value(global, "CONFIG", "LANGUAGE")?,
            },
            bigquery: BigQuerySettings {
                dataset_id: value(bigquery, "BIGQUERY", "BQ_DATASET_ID")?,
                region_id: value(bigquery, "BIGQUERY", "BQ_REGION_ID")?,
                table_list: value(bigquery, "BIGQUERY", "BQ_TABLE_LIST")?,
            },
            cloud_run: CloudRunSettings {
                data_bucket: value(cloud_run, "CLOUDRUN", "CHROMA_DATA_BUCKET")?,
                service_account_name: value(cloud_run, "CLOUDRUN", "SERVICE_ACCOUNT_NAME")?,
                app_name: value(cloud_run, "CLOUDRUN", "CLOUDRUN_APP_NAME")?,
                secret_name: value(cloud_run, "CLOUDRUN", "SECRET_NAME")?,
            },
            api_key: value(api_auth, "API_AUTH", "API_KEY")?,
            personalization: Personalization {
                logo_url: value(personalization, "PERSONALIZATION", "LOGO_URL")?,
                app_title: value(personalization, "PERSONALIZATION", "APP_TITLE")?,
                app_subtitle: value(personalization, "PERSONALIZATION", "APP_SUBTITLE")?,
            },
        })
    }
}

/// Store a freshly created API key under `[API_AUTH] api_key`.
///
/// Every other section and key already in the file is written back as-is.
pub fn persist_api_key(path: &Path, api_key: &str) -> Result<(), ConfigError> {
    let mut ini = read_ini(path)?;
    ini.with_section(Some("API_AUTH")).set("api_key", api_key);

    let opt = WriteOption {
        escape_policy: EscapePolicy::Nothing,
        ..Default::default()
    };
    ini.write_to_file_opt(path, opt)
        .map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn read_ini(path: &Path) -> Result<Ini, ConfigError> {
    // Values are URLs and free text; keep backslashes and quotes literal.
    let opt = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..Default::default()
    };
    Ini::load_from_file_opt(path, opt).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn section<'a>(ini: &'a Ini, name: &'static str) -> Result<&'a Properties, ConfigError> {
    ini.section(Some(name))
        .ok_or(ConfigError::MissingSection(name))
}

fn value(props: &Properties, section: &'static str, key: &'static str) -> Result<String, ConfigError> {
    props
        .get(key)
        .map(|v| v.trim().to_string())
        .ok_or(ConfigError::MissingKey { section, key })
}
