use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub aws: AwsConfig,
    pub pipeline: PipelineConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Shared secret for verifying inbound notification signatures.
    /// When unset, requests are accepted without verification.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AwsConfig {
    pub region: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Service role assumed by the pipeline and its actions.
    pub role_arn: String,
    /// S3 bucket used as the pipeline artifact store.
    pub artifact_bucket: String,
    /// Pipelines are named `{name_prefix}-pr-{pull request id}`.
    pub name_prefix: String,
    /// Pre-existing CodeBuild project run by the Test stage.
    pub build_project: String,
    /// CodeCommit repository bound to the Source stage.
    pub repository: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// SNS topic that receives pipeline execution events.
    pub target_arn: String,
}

impl Config {
    pub fn pipeline_name(&self, pull_request_id: &str) -> String {
        format!("{}-pr-{}", self.pipeline.name_prefix, pull_request_id)
    }

    pub fn pipeline_arn(&self, pipeline_name: &str) -> String {
        format!(
            "arn:aws:codepipeline:{}:{}:{}",
            self.aws.region, self.aws.account_id, pipeline_name
        )
    }

    pub fn notification_rule_name(&self, pipeline_name: &str) -> String {
        format!("{pipeline_name}-events")
    }
}
