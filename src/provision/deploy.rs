//! Cloud Run deployment profile.

use crate::config::AppConfig;
use crate::runner::CommandSpec;

/// Fixed resource profile of the deployed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployProfile {
    pub cpu: u32,
    pub memory: &'static str,
    pub port: u16,
    pub min_instances: u32,
    pub execution_environment: &'static str,
    pub volume_name: &'static str,
    /// Where the vector store's bucket is mounted inside the container.
    pub mount_path: &'static str,
}

impl Default for DeployProfile {
    fn default() -> Self {
        Self {
            cpu: 2,
            memory: "2Gi",
            port: 8084,
            min_instances: 1,
            execution_environment: "gen2",
            volume_name: "v_chromadb",
            mount_path: "/chroma_data",
        }
    }
}

impl DeployProfile {
    pub fn command(
        &self,
        config: &AppConfig,
        service_account_email: &str,
        source_dir: &str,
    ) -> CommandSpec {
        CommandSpec::new("gcloud")
            .args(["beta", "run", "deploy", config.cloud_run.app_name.as_str()])
            .args(["--region", config.project.region_id.as_str()])
            .args(["--source", source_dir])
            .args(["--execution-environment", self.execution_environment])
            .arg(format!(
                "--add-volume=name={},type=cloud-storage,bucket={}",
                self.volume_name, config.cloud_run.data_bucket
            ))
            .arg(format!(
                "--add-volume-mount=volume={},mount-path={}",
                self.volume_name, self.mount_path
            ))
            .arg(format!("--service-account={service_account_email}"))
            .args(["--port".to_string(), self.port.to_string()])
            .arg(format!("--cpu={}", self.cpu))
            .arg(format!("--memory={}", self.memory))
            .arg(format!("--service-min-instances={}", self.min_instances))
            .arg(format!("--min-instances={}", self.min_instances))
            .arg(format!("--project={}", config.project.project_id))
            .arg("--format=value(status.url)")
    }
}
