//! Inbound notification shapes.
//!
//! Notifications arrive wrapped in an SNS delivery envelope. The payload is a
//! change notification with a `detailType` discriminator and a `detail` body
//! whose shape depends on the discriminator. The payload is decoded exactly
//! once, at the boundary, into [`ChangeNotification`]; a shape mismatch fails
//! with a descriptive error, while an unrecognized discriminator is carried
//! through as [`ChangeNotification::Other`] for the router to skip.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

pub const PULL_REQUEST_DETAIL_TYPE: &str = "CodeCommit Pull Request State Change";
pub const PIPELINE_EXECUTION_DETAIL_TYPE: &str = "CodePipeline Pipeline Execution State Change";

/// Pull request status value that triggers pipeline teardown.
pub const CLOSED_STATUS: &str = "Closed";

#[derive(Debug, Clone, Deserialize)]
pub struct SnsEnvelope {
    #[serde(rename = "Records")]
    pub records: Vec<SnsRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnsRecord {
    #[serde(rename = "Sns")]
    pub sns: SnsDelivery,
}

/// A single SNS delivery. The message is either a JSON-encoded string or an
/// already-decoded object; both are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct SnsDelivery {
    #[serde(rename = "Message")]
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotification {
    PullRequest(PullRequestDetail),
    PipelineExecution(PipelineExecutionDetail),
    /// Unrecognized detail type; routed as a no-op.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestDetail {
    pub pull_request_status: String,
    pub event: PullRequestEvent,
    /// Ref path such as `refs/heads/feature/foo`; the trailing segment is the
    /// branch name.
    pub source_reference: String,
    pub pull_request_id: String,
    /// Ordered; only the first entry is used.
    pub repository_names: Vec<String>,
    pub destination_commit: String,
    pub source_commit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PullRequestEvent {
    #[serde(rename = "pullRequestCreated")]
    Created,
    #[serde(rename = "pullRequestSourceBranchUpdated")]
    SourceBranchUpdated,
    #[serde(rename = "pullRequestMergeStatusUpdated")]
    MergeStatusUpdated,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecutionDetail {
    /// Execution status string, e.g. `STARTED`, `FAILED`, `CANCELED`.
    pub state: String,
    /// Name of the pipeline the execution belongs to.
    pub pipeline: String,
}

#[derive(Deserialize)]
struct RawNotification {
    #[serde(rename = "detailType")]
    detail_type: String,
    detail: Value,
}

impl ChangeNotification {
    /// Decode a notification message, parsing it first if it arrived as a
    /// JSON-encoded string.
    pub fn decode(message: &Value) -> Result<Self> {
        let raw: RawNotification = match message {
            Value::String(text) => {
                serde_json::from_str(text).context("Failed to parse notification message")?
            }
            value => serde_json::from_value(value.clone())
                .context("Failed to parse notification message")?,
        };
        match raw.detail_type.as_str() {
            PULL_REQUEST_DETAIL_TYPE => Ok(Self::PullRequest(
                serde_json::from_value(raw.detail).context("Invalid pull request detail")?,
            )),
            PIPELINE_EXECUTION_DETAIL_TYPE => Ok(Self::PipelineExecution(
                serde_json::from_value(raw.detail).context("Invalid pipeline execution detail")?,
            )),
            _ => Ok(Self::Other(raw.detail_type)),
        }
    }

    /// Decode the first record of an SNS envelope.
    pub fn from_envelope(envelope: &SnsEnvelope) -> Result<Self> {
        let record =
            envelope.records.first().context("Notification envelope contains no records")?;
        Self::decode(&record.sns.message)
    }
}
