//! The event router: maps decoded change notifications onto pipeline
//! lifecycle actions.
//!
//! There is no in-process state machine. The lifecycle (create, any number of
//! restarts and status comments, then delete) exists only across the external
//! pipeline resource and its tags, driven entirely by inbound notifications.

use std::collections::HashMap;

use anyhow::{Context, Result};
use pr_ci_core::{
    ci::CiServices,
    config::Config,
    events::{
        CLOSED_STATUS, ChangeNotification, PipelineExecutionDetail, PullRequestDetail,
        PullRequestEvent,
    },
    models::{
        EXECUTION_EVENT_TYPE_IDS, DeleteOutcome, NotificationRuleSpec, PipelineSpec,
        PullRequestComment, StageSpec, Tag, tag_keys,
    },
    util::branch_from_ref,
};

/// What a notification resolved to, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Restarted,
    Deleted,
    Commented,
    Ignored,
}

pub async fn route_notification(
    config: &Config,
    ci: &CiServices,
    notification: ChangeNotification,
) -> Result<Outcome> {
    match notification {
        ChangeNotification::PullRequest(detail) => route_pull_request(config, ci, &detail).await,
        ChangeNotification::PipelineExecution(detail) => {
            post_status_comment(config, ci, &detail).await
        }
        ChangeNotification::Other(detail_type) => {
            tracing::debug!("Ignoring notification with detail type {detail_type:?}");
            Ok(Outcome::Ignored)
        }
    }
}

async fn route_pull_request(
    config: &Config,
    ci: &CiServices,
    detail: &PullRequestDetail,
) -> Result<Outcome> {
    match detail.event {
        PullRequestEvent::Created => create_pipeline(config, ci, detail).await,
        PullRequestEvent::SourceBranchUpdated => restart_pipeline(config, ci, detail).await,
        PullRequestEvent::MergeStatusUpdated => delete_pipeline(config, ci, detail).await,
        PullRequestEvent::Other if detail.pull_request_status == CLOSED_STATUS => {
            delete_pipeline(config, ci, detail).await
        }
        PullRequestEvent::Other => {
            tracing::debug!(
                "Ignoring pull request {} notification with unrecognized event",
                detail.pull_request_id
            );
            Ok(Outcome::Ignored)
        }
    }
}

/// Provision a dedicated pipeline for a new pull request, plus a notification
/// rule forwarding its execution events back to us. The Source stage never
/// polls, so creation does not start a run.
async fn create_pipeline(
    config: &Config,
    ci: &CiServices,
    detail: &PullRequestDetail,
) -> Result<Outcome> {
    let repository =
        detail.repository_names.first().context("Pull request names no repositories")?;
    let branch = branch_from_ref(&detail.source_reference);
    let name = config.pipeline_name(&detail.pull_request_id);

    let spec = PipelineSpec {
        name: name.clone(),
        role_arn: config.pipeline.role_arn.clone(),
        artifact_bucket: config.pipeline.artifact_bucket.clone(),
        stages: vec![
            StageSpec::Source {
                repository: config.pipeline.repository.clone(),
                branch: branch.to_owned(),
            },
            StageSpec::Test { build_project: config.pipeline.build_project.clone() },
        ],
    };
    // The tag set carries everything a later execution event needs to find
    // its pull request again.
    let tags = vec![
        Tag::new(tag_keys::PR_BRANCH, branch),
        Tag::new(tag_keys::PR_ID, &detail.pull_request_id),
        Tag::new(tag_keys::REPO_NAME, repository),
        Tag::new(tag_keys::BEFORE_COMMIT, &detail.destination_commit),
        Tag::new(tag_keys::AFTER_COMMIT, &detail.source_commit),
    ];
    ci.pipelines.create_pipeline(&spec, &tags).await?;

    let rule = NotificationRuleSpec {
        name: config.notification_rule_name(&name),
        event_type_ids: EXECUTION_EVENT_TYPE_IDS.iter().map(|id| id.to_string()).collect(),
        resource_arn: config.pipeline_arn(&name),
        target_arn: config.notifications.target_arn.clone(),
    };
    let rule_arn = ci.notifications.create_notification_rule(&rule).await?;
    tracing::info!(
        pipeline = %name,
        rule = %rule_arn,
        "Created pipeline for pull request {}",
        detail.pull_request_id
    );
    Ok(Outcome::Created)
}

/// The commits that identify the pull request have moved; record the new pair
/// on the resource, then start another run. Tag before start, never the
/// reverse.
async fn restart_pipeline(
    config: &Config,
    ci: &CiServices,
    detail: &PullRequestDetail,
) -> Result<Outcome> {
    let name = config.pipeline_name(&detail.pull_request_id);
    let tags = vec![
        Tag::new(tag_keys::BEFORE, &detail.destination_commit),
        Tag::new(tag_keys::AFTER, &detail.source_commit),
    ];
    ci.pipelines.tag_resource(&config.pipeline_arn(&name), &tags).await?;
    ci.pipelines.start_pipeline_execution(&name).await?;
    tracing::info!(
        pipeline = %name,
        "Restarted pipeline for pull request {}",
        detail.pull_request_id
    );
    Ok(Outcome::Restarted)
}

/// The pull request is merged or closed; the pipeline is no longer needed.
async fn delete_pipeline(
    config: &Config,
    ci: &CiServices,
    detail: &PullRequestDetail,
) -> Result<Outcome> {
    let name = config.pipeline_name(&detail.pull_request_id);
    // TODO: delete the notification rule as well once rule ARNs are recorded
    // at creation time; rules currently outlive their pipeline.
    match ci.pipelines.delete_pipeline(&name).await? {
        DeleteOutcome::Deleted => {
            tracing::info!(
                pipeline = %name,
                "Deleted pipeline for pull request {}",
                detail.pull_request_id
            );
        }
        DeleteOutcome::AlreadyAbsent => {
            tracing::warn!(pipeline = %name, "Pipeline was already gone");
        }
    }
    Ok(Outcome::Deleted)
}

/// An execution changed state: read the pull request context back off the
/// pipeline's tags and post a status comment.
async fn post_status_comment(
    config: &Config,
    ci: &CiServices,
    detail: &PipelineExecutionDetail,
) -> Result<Outcome> {
    let resource_arn = config.pipeline_arn(&detail.pipeline);
    let tags = ci.pipelines.list_tags_for_resource(&resource_arn).await?;
    let tags: HashMap<String, String> =
        tags.into_iter().map(|tag| (tag.key, tag.value)).collect();
    let tag = |key: &str| {
        tags.get(key)
            .cloned()
            .with_context(|| format!("Pipeline {} is missing the {key} tag", detail.pipeline))
    };
    // Comments anchor to the commit pair written at creation time; restarts
    // record refreshed commits under separate keys.
    let comment = PullRequestComment {
        pull_request_id: tag(tag_keys::PR_ID)?,
        repository_name: tag(tag_keys::REPO_NAME)?,
        before_commit_id: tag(tag_keys::BEFORE_COMMIT)?,
        after_commit_id: tag(tag_keys::AFTER_COMMIT)?,
        content: format!("Pipeline Status: {}", detail.state),
    };
    ci.source_control.post_pull_request_comment(&comment).await?;
    tracing::info!(
        pipeline = %detail.pipeline,
        "Posted {} status to pull request {}",
        detail.state,
        comment.pull_request_id
    );
    Ok(Outcome::Commented)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use pr_ci_core::config::{
        AwsConfig, NotificationConfig, PipelineConfig, ServerConfig,
    };

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        CreatePipeline(PipelineSpec, Vec<Tag>),
        TagResource(String, Vec<Tag>),
        StartExecution(String),
        DeletePipeline(String),
        ListTags(String),
        CreateRule(NotificationRuleSpec),
        PostComment(PullRequestComment),
    }

    /// Records every collaborator call, in order, across all three services.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        listed_tags: Vec<Tag>,
    }

    impl Recorder {
        fn record(&self, call: Call) { self.calls.lock().unwrap().push(call); }

        fn calls(&self) -> Vec<Call> { self.calls.lock().unwrap().clone() }
    }

    #[async_trait]
    impl pr_ci_core::ci::PipelineService for Recorder {
        async fn create_pipeline(&self, spec: &PipelineSpec, tags: &[Tag]) -> Result<()> {
            self.record(Call::CreatePipeline(spec.clone(), tags.to_vec()));
            Ok(())
        }

        async fn tag_resource(&self, resource_arn: &str, tags: &[Tag]) -> Result<()> {
            self.record(Call::TagResource(resource_arn.to_owned(), tags.to_vec()));
            Ok(())
        }

        async fn start_pipeline_execution(&self, name: &str) -> Result<()> {
            self.record(Call::StartExecution(name.to_owned()));
            Ok(())
        }

        async fn delete_pipeline(&self, name: &str) -> Result<DeleteOutcome> {
            self.record(Call::DeletePipeline(name.to_owned()));
            Ok(DeleteOutcome::Deleted)
        }

        async fn list_tags_for_resource(&self, resource_arn: &str) -> Result<Vec<Tag>> {
            self.record(Call::ListTags(resource_arn.to_owned()));
            Ok(self.listed_tags.clone())
        }
    }

    #[async_trait]
    impl pr_ci_core::ci::NotificationService for Recorder {
        async fn create_notification_rule(&self, spec: &NotificationRuleSpec) -> Result<String> {
            self.record(Call::CreateRule(spec.clone()));
            Ok(format!("arn:aws:codestar-notifications:::notificationrule/{}", spec.name))
        }

        async fn delete_notification_rule(&self, _rule_arn: &str) -> Result<DeleteOutcome> {
            panic!("rule deletion is never routed");
        }
    }

    #[async_trait]
    impl pr_ci_core::ci::SourceControlService for Recorder {
        async fn post_pull_request_comment(&self, comment: &PullRequestComment) -> Result<()> {
            self.record(Call::PostComment(comment.clone()));
            Ok(())
        }
    }

    fn services(recorder: &Arc<Recorder>) -> CiServices {
        CiServices {
            pipelines: recorder.clone(),
            notifications: recorder.clone(),
            source_control: recorder.clone(),
        }
    }

    fn config() -> Config {
        Config {
            server: ServerConfig { port: 3000, webhook_secret: None },
            aws: AwsConfig {
                region: "us-east-1".to_string(),
                account_id: "123456789012".to_string(),
            },
            pipeline: PipelineConfig {
                role_arn: "arn:aws:iam::123456789012:role/pr-ci".to_string(),
                artifact_bucket: "pr-ci-artifacts".to_string(),
                name_prefix: "pr-ci".to_string(),
                build_project: "pr-ci-tests".to_string(),
                repository: "widgets".to_string(),
            },
            notifications: NotificationConfig {
                target_arn: "arn:aws:sns:us-east-1:123456789012:pr-ci-events".to_string(),
            },
        }
    }

    fn pull_request_detail(event: PullRequestEvent, status: &str) -> PullRequestDetail {
        PullRequestDetail {
            pull_request_status: status.to_string(),
            event,
            source_reference: "refs/heads/feature/foo".to_string(),
            pull_request_id: "42".to_string(),
            repository_names: vec!["widgets".to_string()],
            destination_commit: "aaa111".to_string(),
            source_commit: "bbb222".to_string(),
        }
    }

    #[tokio::test]
    async fn test_created_provisions_pipeline_then_rule() {
        let recorder = Arc::new(Recorder::default());
        let detail = pull_request_detail(PullRequestEvent::Created, "Open");
        let outcome = route_notification(
            &config(),
            &services(&recorder),
            ChangeNotification::PullRequest(detail),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Created);

        let expected_spec = PipelineSpec {
            name: "pr-ci-pr-42".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/pr-ci".to_string(),
            artifact_bucket: "pr-ci-artifacts".to_string(),
            stages: vec![
                StageSpec::Source {
                    repository: "widgets".to_string(),
                    branch: "foo".to_string(),
                },
                StageSpec::Test { build_project: "pr-ci-tests".to_string() },
            ],
        };
        let expected_tags = vec![
            Tag::new("pr_branch", "foo"),
            Tag::new("pr_id", "42"),
            Tag::new("repo_name", "widgets"),
            Tag::new("before_commit", "aaa111"),
            Tag::new("after_commit", "bbb222"),
        ];
        let expected_rule = NotificationRuleSpec {
            name: "pr-ci-pr-42-events".to_string(),
            event_type_ids: vec![
                "codepipeline-pipeline-pipeline-execution-failed".to_string(),
                "codepipeline-pipeline-pipeline-execution-canceled".to_string(),
                "codepipeline-pipeline-pipeline-execution-started".to_string(),
            ],
            resource_arn: "arn:aws:codepipeline:us-east-1:123456789012:pr-ci-pr-42".to_string(),
            target_arn: "arn:aws:sns:us-east-1:123456789012:pr-ci-events".to_string(),
        };
        assert_eq!(
            recorder.calls(),
            [
                Call::CreatePipeline(expected_spec, expected_tags),
                Call::CreateRule(expected_rule),
            ]
        );
    }

    #[tokio::test]
    async fn test_source_update_tags_then_restarts() {
        let recorder = Arc::new(Recorder::default());
        let detail = pull_request_detail(PullRequestEvent::SourceBranchUpdated, "Open");
        let outcome = route_notification(
            &config(),
            &services(&recorder),
            ChangeNotification::PullRequest(detail),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Restarted);
        assert_eq!(
            recorder.calls(),
            [
                Call::TagResource(
                    "arn:aws:codepipeline:us-east-1:123456789012:pr-ci-pr-42".to_string(),
                    vec![Tag::new("before", "aaa111"), Tag::new("after", "bbb222")],
                ),
                Call::StartExecution("pr-ci-pr-42".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_merge_status_update_deletes_pipeline() {
        let recorder = Arc::new(Recorder::default());
        let detail = pull_request_detail(PullRequestEvent::MergeStatusUpdated, "Open");
        let outcome = route_notification(
            &config(),
            &services(&recorder),
            ChangeNotification::PullRequest(detail),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Deleted);
        assert_eq!(recorder.calls(), [Call::DeletePipeline("pr-ci-pr-42".to_string())]);
    }

    #[tokio::test]
    async fn test_closed_status_deletes_pipeline() {
        let recorder = Arc::new(Recorder::default());
        let detail = pull_request_detail(PullRequestEvent::Other, "Closed");
        let outcome = route_notification(
            &config(),
            &services(&recorder),
            ChangeNotification::PullRequest(detail),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Deleted);
        assert_eq!(recorder.calls(), [Call::DeletePipeline("pr-ci-pr-42".to_string())]);
    }

    #[tokio::test]
    async fn test_execution_state_posts_status_comment() {
        let recorder = Arc::new(Recorder {
            listed_tags: vec![
                Tag::new("pr_branch", "foo"),
                Tag::new("pr_id", "42"),
                Tag::new("repo_name", "widgets"),
                Tag::new("before_commit", "aaa111"),
                Tag::new("after_commit", "bbb222"),
            ],
            ..Default::default()
        });
        let detail = PipelineExecutionDetail {
            state: "FAILED".to_string(),
            pipeline: "pr-ci-pr-42".to_string(),
        };
        let outcome = route_notification(
            &config(),
            &services(&recorder),
            ChangeNotification::PipelineExecution(detail),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Commented);
        assert_eq!(
            recorder.calls(),
            [
                Call::ListTags(
                    "arn:aws:codepipeline:us-east-1:123456789012:pr-ci-pr-42".to_string()
                ),
                Call::PostComment(PullRequestComment {
                    pull_request_id: "42".to_string(),
                    repository_name: "widgets".to_string(),
                    before_commit_id: "aaa111".to_string(),
                    after_commit_id: "bbb222".to_string(),
                    content: "Pipeline Status: FAILED".to_string(),
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_tag_fails_comment() {
        let recorder = Arc::new(Recorder {
            listed_tags: vec![Tag::new("pr_id", "42")],
            ..Default::default()
        });
        let detail = PipelineExecutionDetail {
            state: "STARTED".to_string(),
            pipeline: "pr-ci-pr-42".to_string(),
        };
        let err = route_notification(
            &config(),
            &services(&recorder),
            ChangeNotification::PipelineExecution(detail),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("repo_name"));
        // The tag lookup happened, but no comment went out.
        assert_eq!(
            recorder.calls(),
            [Call::ListTags(
                "arn:aws:codepipeline:us-east-1:123456789012:pr-ci-pr-42".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_unrecognized_detail_type_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let outcome = route_notification(
            &config(),
            &services(&recorder),
            ChangeNotification::Other("CodeCommit Repository State Change".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_open_pr_event_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let detail = pull_request_detail(PullRequestEvent::Other, "Open");
        let outcome = route_notification(
            &config(),
            &services(&recorder),
            ChangeNotification::PullRequest(detail),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(recorder.calls().is_empty());
    }
}
