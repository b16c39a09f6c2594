//! Seams for the external collaborators. The router only ever talks to these
//! traits; production wires in the AWS-backed implementations.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    DeleteOutcome, NotificationRuleSpec, PipelineSpec, PullRequestComment, Tag,
};

/// Operations against the CI pipeline provider.
#[async_trait]
pub trait PipelineService: Send + Sync {
    async fn create_pipeline(&self, spec: &PipelineSpec, tags: &[Tag]) -> Result<()>;

    /// Merge tags onto an existing resource. Keys not present in `tags` are
    /// left untouched.
    async fn tag_resource(&self, resource_arn: &str, tags: &[Tag]) -> Result<()>;

    async fn start_pipeline_execution(&self, name: &str) -> Result<()>;

    async fn delete_pipeline(&self, name: &str) -> Result<DeleteOutcome>;

    async fn list_tags_for_resource(&self, resource_arn: &str) -> Result<Vec<Tag>>;
}

/// Operations against the notification rule service.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Returns the ARN of the created rule.
    async fn create_notification_rule(&self, spec: &NotificationRuleSpec) -> Result<String>;

    async fn delete_notification_rule(&self, rule_arn: &str) -> Result<DeleteOutcome>;
}

/// Operations against the version-control service.
#[async_trait]
pub trait SourceControlService: Send + Sync {
    async fn post_pull_request_comment(&self, comment: &PullRequestComment) -> Result<()>;
}

/// Handles to the external collaborators, shared across request handlers.
#[derive(Clone)]
pub struct CiServices {
    pub pipelines: Arc<dyn PipelineService>,
    pub notifications: Arc<dyn NotificationService>,
    pub source_control: Arc<dyn SourceControlService>,
}
