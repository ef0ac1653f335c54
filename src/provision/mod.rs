//! Cloud provisioning and deployment.
//!
//! Steps run strictly in order through a [`CommandRunner`]. The first failing
//! command aborts the run; resources created up to that point are left in
//! place. Existence checks are check-then-act, so a resource created by
//! someone else between the check and the create surfaces as a create
//! failure.

mod deploy;
mod resources;

pub use deploy::DeployProfile;
pub use resources::{resource_exists, ResourceKind};

use crate::config::{persist_api_key, AppConfig, ConfigError};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use std::fmt;
use std::path::PathBuf;

const REQUIRED_SERVICES: [&str; 11] = [
    "cloudresourcemanager.googleapis.com",
    "serviceusage.googleapis.com",
    "bigquery.googleapis.com",
    "run.googleapis.com",
    "iam.googleapis.com",
    "cloudapis.googleapis.com",
    "cloudbuild.googleapis.com",
    "aiplatform.googleapis.com",
    "storage.googleapis.com",
    "generativelanguage.googleapis.com",
    "secretmanager.googleapis.com",
];

const SERVICE_ACCOUNT_ROLES: [&str; 6] = [
    "roles/bigquery.admin",
    "roles/run.invoker",
    "roles/iam.serviceAccountTokenCreator",
    "roles/aiplatform.user",
    "roles/storage.admin",
    "roles/secretmanager.admin",
];

/// Granted to both the Cloud Build and the default compute identities.
const BUILD_ROLES: [&str; 2] = ["roles/storage.admin", "roles/artifactregistry.admin"];

/// Repository `gcloud run deploy --source` pushes images to.
pub const ARTIFACT_REPOSITORY: &str = "cloud-run-source-deploy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SetProject,
    EnableServices,
    ServiceAccount,
    ServiceAccountEmail,
    GrantServiceAccountRoles,
    ProjectNumber,
    GrantBuildRoles,
    GrantComputeRoles,
    ArtifactRepository,
    StorageBucket,
    ApiKey,
    Deploy,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::SetProject => "set project",
            Step::EnableServices => "enable services",
            Step::ServiceAccount => "create service account",
            Step::ServiceAccountEmail => "resolve service account email",
            Step::GrantServiceAccountRoles => "grant service account roles",
            Step::ProjectNumber => "resolve project number",
            Step::GrantBuildRoles => "grant Cloud Build roles",
            Step::GrantComputeRoles => "grant compute roles",
            Step::ArtifactRepository => "create artifact repository",
            Step::StorageBucket => "create storage bucket",
            Step::ApiKey => "create API key",
            Step::Deploy => "deploy",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{step} failed: `{command}` exited with {status}: {stderr}")]
    CommandFailed {
        step: Step,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{step} failed: could not launch `{command}`: {source}")]
    Spawn {
        step: Step,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} failed: `{command}` printed nothing")]
    EmptyOutput { step: Step, command: String },

    #[error("create API key failed: unexpected response: {0}")]
    ApiKeyResponse(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Rewritten with the new API key.
    pub config_path: PathBuf,
    /// Directory deployed with `--source`.
    pub source_dir: String,
    pub api_key_display_name: String,
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub service_account_email: String,
    pub created: Vec<ResourceKind>,
    pub deploy_output: String,
}

pub struct Provisioner<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    config: &'a AppConfig,
    options: &'a ProvisionOptions,
    profile: DeployProfile,
}

impl<'a, R: CommandRunner + ?Sized> Provisioner<'a, R> {
    pub fn new(runner: &'a R, config: &'a AppConfig, options: &'a ProvisionOptions) -> Self {
        Self {
            runner,
            config,
            options,
            profile: DeployProfile::default(),
        }
    }

    pub fn run(&self) -> Result<ProvisionReport, ProvisionError> {
        let project_id = self.config.project.project_id.as_str();
        let region_id = self.config.project.region_id.as_str();
        let account_name = self.config.cloud_run.service_account_name.as_str();
        let bucket = self.config.cloud_run.data_bucket.as_str();
        let mut created = Vec::new();

        tracing::info!(project_id, "setting project");
        self.exec(
            Step::SetProject,
            gcloud(["config", "set", "project", project_id]),
        )?;

        tracing::info!(count = REQUIRED_SERVICES.len(), "enabling required services");
        self.exec(
            Step::EnableServices,
            gcloud(["services", "enable"]).args(REQUIRED_SERVICES),
        )?;

        let create_account = gcloud(["iam", "service-accounts", "create", account_name])
            .arg(format!("--project={project_id}"));
        if self.ensure(
            Step::ServiceAccount,
            ResourceKind::ServiceAccount,
            account_name,
            create_account,
        )? {
            created.push(ResourceKind::ServiceAccount);
        }

        let email = self.capture(
            Step::ServiceAccountEmail,
            gcloud(["iam", "service-accounts", "list"])
                .arg(format!("--filter=email:{account_name}"))
                .arg(format!("--project={project_id}"))
                .arg("--format=value(email)"),
        )?;
        tracing::info!(%email, "resolved service account");

        let member = format!("serviceAccount:{email}");
        for role in SERVICE_ACCOUNT_ROLES {
            tracing::info!(role, "granting role to service account");
            self.exec(
                Step::GrantServiceAccountRoles,
                grant(project_id, &member, role).arg("--condition=None"),
            )?;
        }

        let project_number = self.capture(
            Step::ProjectNumber,
            gcloud(["projects", "describe", project_id]).arg("--format=value(projectNumber)"),
        )?;

        let build_member = format!("serviceAccount:{project_number}@cloudbuild.gserviceaccount.com");
        for role in BUILD_ROLES {
            tracing::info!(role, "granting role to Cloud Build service account");
            self.exec(Step::GrantBuildRoles, grant(project_id, &build_member, role))?;
        }

        let compute_member =
            format!("serviceAccount:{project_number}-compute@developer.gserviceaccount.com");
        for role in BUILD_ROLES {
            tracing::info!(role, "granting role to default compute service account");
            self.exec(Step::GrantComputeRoles, grant(project_id, &compute_member, role))?;
        }

        let create_repository = gcloud(["artifacts", "repositories", "create", ARTIFACT_REPOSITORY])
            .arg("--repository-format=docker")
            .arg(format!("--location={region_id}"))
            .args(["--immutable-tags", "--async"]);
        if self.ensure(
            Step::ArtifactRepository,
            ResourceKind::ArtifactRepository,
            ARTIFACT_REPOSITORY,
            create_repository,
        )? {
            created.push(ResourceKind::ArtifactRepository);
        }

        let create_bucket = gcloud(["storage", "buckets", "create"])
            .arg(format!("gs://{bucket}"))
            .arg(format!("--project={project_id}"))
            .arg(format!("--location={region_id}"));
        if self.ensure(
            Step::StorageBucket,
            ResourceKind::StorageBucket,
            bucket,
            create_bucket,
        )? {
            created.push(ResourceKind::StorageBucket);
        }

        tracing::info!("creating API key");
        let output = self.exec(
            Step::ApiKey,
            gcloud(["beta", "services", "api-keys", "create"])
                .arg(format!(
                    "--display-name={}",
                    self.options.api_key_display_name
                ))
                .arg("--format=json"),
        )?;
        let api_key = parse_api_key(&output.stdout)?;
        persist_api_key(&self.options.config_path, &api_key)?;
        tracing::info!(path = %self.options.config_path.display(), "stored API key");

        tracing::info!(app = %self.config.cloud_run.app_name, "deploying application");
        let output = self.exec(
            Step::Deploy,
            self.profile
                .command(self.config, &email, &self.options.source_dir),
        )?;
        let deploy_output = output.stdout.trim().to_string();
        tracing::debug!(output = %deploy_output, "deploy finished");

        Ok(ProvisionReport {
            service_account_email: email,
            created,
            deploy_output,
        })
    }

    fn exec(&self, step: Step, cmd: CommandSpec) -> Result<CommandOutput, ProvisionError> {
        let output = self.runner.run(&cmd).map_err(|source| {
            tracing::error!(%step, command = %cmd, error = %source, "could not launch command");
            ProvisionError::Spawn {
                step,
                command: cmd.to_string(),
                source,
            }
        })?;
        if !output.success() {
            let status = output
                .code
                .map(|c| format!("code {c}"))
                .unwrap_or_else(|| "a signal".to_string());
            tracing::error!(%step, command = %cmd, %status, stderr = %output.stderr.trim(), "command failed");
            return Err(ProvisionError::CommandFailed {
                step,
                command: cmd.to_string(),
                status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run `cmd` and return its trimmed stdout, which must not be empty.
    fn capture(&self, step: Step, cmd: CommandSpec) -> Result<String, ProvisionError> {
        let output = self.exec(step, cmd.clone())?;
        let value = output.stdout.trim();
        if value.is_empty() {
            return Err(ProvisionError::EmptyOutput {
                step,
                command: cmd.to_string(),
            });
        }
        Ok(value.to_string())
    }

    /// Create the resource unless a listing already shows it. Returns true if
    /// a create command was issued.
    fn ensure(
        &self,
        step: Step,
        kind: ResourceKind,
        name: &str,
        create: CommandSpec,
    ) -> Result<bool, ProvisionError> {
        let project_id = self.config.project.project_id.as_str();
        let exists = resource_exists(self.runner, kind, name, project_id).map_err(|source| {
            ProvisionError::Spawn {
                step,
                command: resources::list_command(kind, name, project_id).to_string(),
                source,
            }
        })?;
        if exists {
            tracing::info!(kind = kind.label(), name, "already exists, skipping creation");
            return Ok(false);
        }
        tracing::info!(kind = kind.label(), name, "not found, creating");
        self.exec(step, create)?;
        Ok(true)
    }
}

fn gcloud<const N: usize>(args: [&str; N]) -> CommandSpec {
    CommandSpec::new("gcloud").args(args)
}

fn grant(project_id: &str, member: &str, role: &str) -> CommandSpec {
    gcloud(["projects", "add-iam-policy-binding", project_id])
        .arg(format!("--member={member}"))
        .arg(format!("--role={role}"))
        .arg("--quiet")
}

/// Pull `.response.keyString` out of the api-keys create response.
fn parse_api_key(stdout: &str) -> Result<String, ProvisionError> {
    let value: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| ProvisionError::ApiKeyResponse(e.to_string()))?;
    value
        .pointer("/response/keyString")
        .and_then(serde_json::Value::as_str)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProvisionError::ApiKeyResponse("missing response.keyString".to_string()))
}
