use crate::app::{self, ServeOptions};
use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::provision::{ProvisionOptions, Provisioner};
use crate::runner::SystemRunner;
use crate::training::{self, TrainSetupOutcome, TrainSetupRequest};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "nl2sql-cloudrun",
    version,
    about = "Natural-language-to-SQL chat over BigQuery, deployable to Cloud Run"
)]
pub struct Cli {
    /// Path to the INI configuration file
    #[arg(long, global = true, env = "NL2SQL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Start the chat server (blocks until killed)
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(long, env = "PORT", default_value_t = 8084)]
        port: u16,

        /// Directory holding the training corpus
        #[arg(long, default_value = app::DEFAULT_DATA_PATH)]
        data_path: PathBuf,
    },

    /// Create the cloud resources and deploy the app to Cloud Run
    Provision {
        /// Source directory passed to `gcloud run deploy --source`
        #[arg(long, default_value = ".")]
        source: String,

        /// Display name of the generated API key
        #[arg(long, default_value = "GENAI4SAP")]
        api_key_display_name: String,
    },

    /// Ask a deployed service to train on the configured dataset
    TrainSetup {
        /// Base URL of the deployed service
        #[arg(long)]
        service_url: String,
    },
}

pub async fn run(args: Cli) -> Result<()> {
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    match args.command {
        Command::Serve {
            host,
            port,
            data_path,
        } => {
            let options = ServeOptions {
                host,
                port,
                data_path,
            };
            app::serve(&config, &options).await
        }
        Command::Provision {
            source,
            api_key_display_name,
        } => {
            let options = ProvisionOptions {
                config_path: args.config.clone(),
                source_dir: source,
                api_key_display_name,
            };
            run_provision(config, options).await
        }
        Command::TrainSetup { service_url } => run_train_setup(&config, &service_url).await,
    }
}

/// Provisioning is sequential blocking I/O; keep it off the async workers.
async fn run_provision(config: AppConfig, options: ProvisionOptions) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || {
        Provisioner::new(&SystemRunner, &config, &options).run()
    })
    .await
    .context("provisioning task failed")??;

    for kind in &report.created {
        tracing::info!(kind = kind.label(), "created");
    }
    println!("Setup completed successfully!");
    Ok(())
}

async fn run_train_setup(config: &AppConfig, service_url: &str) -> Result<()> {
    let request = TrainSetupRequest {
        project_id: config.project.project_id.clone(),
        dataset_id: config.bigquery.dataset_id.clone(),
        table_list: config.bigquery.table_list.clone(),
    };
    match training::train_setup(&reqwest::Client::new(), service_url, &request).await {
        TrainSetupOutcome::Started(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        TrainSetupOutcome::Failed(message) => Err(anyhow::anyhow!(message)),
    }
}
