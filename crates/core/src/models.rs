//! Domain models passed to the external collaborators.

/// Tag keys used on pipeline resources. The tag set is the only state shared
/// between invocations: it is written at creation time and read back when an
/// execution state change needs to find its pull request.
pub mod tag_keys {
    pub const PR_BRANCH: &str = "pr_branch";
    pub const PR_ID: &str = "pr_id";
    pub const REPO_NAME: &str = "repo_name";
    pub const BEFORE_COMMIT: &str = "before_commit";
    pub const AFTER_COMMIT: &str = "after_commit";
    /// Written by the restart path when the source branch moves. Distinct
    /// from [`BEFORE_COMMIT`]; the comment path keeps reading the
    /// creation-time pair.
    pub const BEFORE: &str = "before";
    /// Restart-path counterpart of [`AFTER_COMMIT`].
    pub const AFTER: &str = "after";
}

/// Execution events forwarded to the notification target by the rule created
/// alongside each pipeline.
pub const EXECUTION_EVENT_TYPE_IDS: [&str; 3] = [
    "codepipeline-pipeline-pipeline-execution-failed",
    "codepipeline-pipeline-pipeline-execution-canceled",
    "codepipeline-pipeline-pipeline-execution-started",
];

/// Key-value annotation attached to an external resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Declarative description of a per-PR pipeline, rendered into the provider's
/// native descriptor by the service implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub name: String,
    pub role_arn: String,
    pub artifact_bucket: String,
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSpec {
    /// Source stage bound to a branch. Polling is always disabled; runs are
    /// started explicitly when the pull request changes.
    Source { repository: String, branch: String },
    /// Test stage bound to a pre-existing build project.
    Test { build_project: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRuleSpec {
    pub name: String,
    pub event_type_ids: Vec<String>,
    /// ARN of the pipeline the rule watches.
    pub resource_arn: String,
    /// SNS topic the rule forwards events to.
    pub target_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestComment {
    pub pull_request_id: String,
    pub repository_name: String,
    pub before_commit_id: String,
    pub after_commit_id: String,
    pub content: String,
}

/// Outcome of deleting an external resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The resource was already gone; treated as success.
    AlreadyAbsent,
}
