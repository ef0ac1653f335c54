//! Existence checks for the resources provisioning creates on demand.

use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Marker gcloud prints when a filtered listing matched nothing.
const EMPTY_LISTING: &str = "Listed 0 items";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ServiceAccount,
    ArtifactRepository,
    StorageBucket,
}

impl ResourceKind {
    /// gcloud command group that lists this kind of resource.
    fn command_group(self) -> &'static [&'static str] {
        match self {
            ResourceKind::ServiceAccount => &["iam", "service-accounts"],
            ResourceKind::ArtifactRepository => &["artifacts", "repositories"],
            ResourceKind::StorageBucket => &["storage", "buckets"],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::ServiceAccount => "service account",
            ResourceKind::ArtifactRepository => "artifact repository",
            ResourceKind::StorageBucket => "storage bucket",
        }
    }
}

pub fn list_command(kind: ResourceKind, name: &str, project_id: &str) -> CommandSpec {
    CommandSpec::new("gcloud")
        .args(kind.command_group().iter().copied())
        .arg("list")
        .arg(format!("--filter=name:{name}"))
        .args(["--project", project_id])
}

/// A listing proves existence only if it names the resource and is not the
/// empty-result banner. The exit status is not consulted.
pub fn listing_contains(output: &CommandOutput, name: &str) -> bool {
    output.stdout.contains(name)
        && !output.stdout.contains(EMPTY_LISTING)
        && !output.stderr.contains(EMPTY_LISTING)
}

/// Query the provider for `name`. Nothing is cached between calls.
pub fn resource_exists<R: CommandRunner + ?Sized>(
    runner: &R,
    kind: ResourceKind,
    name: &str,
    project_id: &str,
) -> std::io::Result<bool> {
    let output = runner.run(&list_command(kind, name, project_id))?;
    Ok(listing_contains(&output, name))
}
