//! AWS-backed implementations of the collaborator traits: CodePipeline for
//! pipelines, CodeStar Notifications for rules, CodeCommit for PR comments.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_codepipeline::{
    error::{ProvideErrorMetadata, SdkError},
    types::{
        ActionCategory, ActionDeclaration, ActionOwner, ActionTypeId, ArtifactStore,
        ArtifactStoreType, InputArtifact, OutputArtifact, PipelineDeclaration, StageDeclaration,
        Tag as PipelineTag,
    },
};
use aws_sdk_codestarnotifications::types::{DetailType, NotificationRuleStatus, Target};
use pr_ci_core::{
    ci::{CiServices, NotificationService, PipelineService, SourceControlService},
    config::AwsConfig,
    models::{DeleteOutcome, NotificationRuleSpec, PipelineSpec, PullRequestComment, StageSpec, Tag},
};

/// Name of the artifact handed from the Source stage to the Test stage.
const SOURCE_ARTIFACT: &str = "repo";

/// Build all three service clients against a shared AWS config.
pub async fn connect(config: &AwsConfig) -> CiServices {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;
    tracing::debug!(region = %config.region, "Loaded AWS configuration");
    CiServices {
        pipelines: Arc::new(CodePipelineService {
            client: aws_sdk_codepipeline::Client::new(&sdk_config),
        }),
        notifications: Arc::new(CodeStarNotificationService {
            client: aws_sdk_codestarnotifications::Client::new(&sdk_config),
        }),
        source_control: Arc::new(CodeCommitService {
            client: aws_sdk_codecommit::Client::new(&sdk_config),
        }),
    }
}

fn is_not_found<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> bool {
    matches!(err.code(), Some("ResourceNotFoundException" | "PipelineNotFoundException"))
}

pub struct CodePipelineService {
    client: aws_sdk_codepipeline::Client,
}

fn render_stage(stage: &StageSpec, role_arn: &str) -> Result<StageDeclaration> {
    let (name, action) = match stage {
        StageSpec::Source { repository, branch } => (
            "Source",
            ActionDeclaration::builder()
                .name("Source")
                .action_type_id(
                    ActionTypeId::builder()
                        .category(ActionCategory::Source)
                        .owner(ActionOwner::Aws)
                        .provider("CodeCommit")
                        .version("1")
                        .build()?,
                )
                .configuration("RepositoryName", repository.clone())
                .configuration("BranchName", branch.clone())
                // Runs are started explicitly; never poll the repository.
                .configuration("PollForSourceChanges", "false")
                .output_artifacts(OutputArtifact::builder().name(SOURCE_ARTIFACT).build()?)
                .role_arn(role_arn)
                .build()?,
        ),
        StageSpec::Test { build_project } => (
            "Test",
            ActionDeclaration::builder()
                .name("Test")
                .action_type_id(
                    ActionTypeId::builder()
                        .category(ActionCategory::Test)
                        .owner(ActionOwner::Aws)
                        .provider("CodeBuild")
                        .version("1")
                        .build()?,
                )
                .configuration("ProjectName", build_project.clone())
                .input_artifacts(InputArtifact::builder().name(SOURCE_ARTIFACT).build()?)
                .role_arn(role_arn)
                .build()?,
        ),
    };
    Ok(StageDeclaration::builder().name(name).actions(action).build()?)
}

#[async_trait]
impl PipelineService for CodePipelineService {
    async fn create_pipeline(&self, spec: &PipelineSpec, tags: &[Tag]) -> Result<()> {
        let mut declaration = PipelineDeclaration::builder()
            .name(&spec.name)
            .role_arn(&spec.role_arn)
            .artifact_store(
                ArtifactStore::builder()
                    .r#type(ArtifactStoreType::S3)
                    .location(&spec.artifact_bucket)
                    .build()?,
            );
        for stage in &spec.stages {
            declaration = declaration.stages(render_stage(stage, &spec.role_arn)?);
        }
        let mut request = self.client.create_pipeline().pipeline(declaration.build()?);
        for tag in tags {
            request = request
                .tags(PipelineTag::builder().key(&tag.key).value(&tag.value).build()?);
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to create pipeline {}", spec.name))?;
        Ok(())
    }

    async fn tag_resource(&self, resource_arn: &str, tags: &[Tag]) -> Result<()> {
        let mut request = self.client.tag_resource().resource_arn(resource_arn);
        for tag in tags {
            request = request
                .tags(PipelineTag::builder().key(&tag.key).value(&tag.value).build()?);
        }
        request.send().await.with_context(|| format!("Failed to tag {resource_arn}"))?;
        Ok(())
    }

    async fn start_pipeline_execution(&self, name: &str) -> Result<()> {
        self.client
            .start_pipeline_execution()
            .name(name)
            .send()
            .await
            .with_context(|| format!("Failed to start pipeline {name}"))?;
        Ok(())
    }

    async fn delete_pipeline(&self, name: &str) -> Result<DeleteOutcome> {
        match self.client.delete_pipeline().name(name).send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(err) if is_not_found(&err) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(err) => Err(err).with_context(|| format!("Failed to delete pipeline {name}")),
        }
    }

    async fn list_tags_for_resource(&self, resource_arn: &str) -> Result<Vec<Tag>> {
        let output = self
            .client
            .list_tags_for_resource()
            .resource_arn(resource_arn)
            .send()
            .await
            .with_context(|| format!("Failed to list tags for {resource_arn}"))?;
        Ok(output
            .tags()
            .iter()
            .map(|tag| Tag::new(tag.key(), tag.value()))
            .collect())
    }
}

pub struct CodeStarNotificationService {
    client: aws_sdk_codestarnotifications::Client,
}

#[async_trait]
impl NotificationService for CodeStarNotificationService {
    async fn create_notification_rule(&self, spec: &NotificationRuleSpec) -> Result<String> {
        let mut request = self
            .client
            .create_notification_rule()
            .name(&spec.name)
            .resource(&spec.resource_arn)
            .targets(
                Target::builder().target_type("SNS").target_address(&spec.target_arn).build(),
            )
            .detail_type(DetailType::Basic)
            .status(NotificationRuleStatus::Enabled);
        for event_type_id in &spec.event_type_ids {
            request = request.event_type_ids(event_type_id);
        }
        let output = request
            .send()
            .await
            .with_context(|| format!("Failed to create notification rule {}", spec.name))?;
        output
            .arn()
            .map(str::to_owned)
            .with_context(|| format!("Notification rule {} response has no ARN", spec.name))
    }

    async fn delete_notification_rule(&self, rule_arn: &str) -> Result<DeleteOutcome> {
        match self.client.delete_notification_rule().arn(rule_arn).send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(err) if is_not_found(&err) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to delete notification rule {rule_arn}"))
            }
        }
    }
}

pub struct CodeCommitService {
    client: aws_sdk_codecommit::Client,
}

#[async_trait]
impl SourceControlService for CodeCommitService {
    async fn post_pull_request_comment(&self, comment: &PullRequestComment) -> Result<()> {
        self.client
            .post_comment_for_pull_request()
            .pull_request_id(&comment.pull_request_id)
            .repository_name(&comment.repository_name)
            .before_commit_id(&comment.before_commit_id)
            .after_commit_id(&comment.after_commit_id)
            .content(&comment.content)
            .send()
            .await
            .with_context(|| {
                format!("Failed to comment on pull request {}", comment.pull_request_id)
            })?;
        Ok(())
    }
}
