//! resource_read_batch tool implementation.
//!
//! Resolves several reads concurrently, e.g. every panel of a dashboard.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use versync_core::{Resource, SyncOutcome};

use crate::error::ServerError;
use crate::platform::Platform;
use crate::tools::json_success;
use crate::tools::resource_read::ResourceReadParams;

const MAX_REQUESTS: usize = 32;

/// Input parameters for resource_read_batch tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResourceReadBatchParams {
    /// Reads to perform, each with its own client version (1-32).
    pub requests: Vec<ResourceReadParams>,
}

/// Batch item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    /// New payload and version.
    Fresh,
    /// The caller's copy is current.
    NotModified,
    /// The read failed.
    Failed,
}

/// Individual batch result item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub resource: Resource,
    pub status: BatchItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch summary statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: u32,
    pub fresh: u32,
    pub not_modified: u32,
    pub failed: u32,
}

/// Output structure for resource_read_batch tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadBatchOutput {
    /// Results in input order.
    pub results: Vec<BatchItem>,
    pub summary: BatchSummary,
}

/// Implementation of the resource_read_batch tool.
pub async fn read_batch_impl(
    platform: &Platform, params: ResourceReadBatchParams,
) -> Result<CallToolResult, McpError> {
    if params.requests.is_empty() {
        return Err(ServerError::InvalidInput("requests cannot be empty".into()).into());
    }
    if params.requests.len() > MAX_REQUESTS {
        return Err(ServerError::InvalidInput(format!("at most {MAX_REQUESTS} requests per batch")).into());
    }

    let requests: Vec<(Resource, Option<String>)> = params
        .requests
        .into_iter()
        .map(|r| (r.resource, r.client_version))
        .collect();
    let outcomes = platform.read_batch(&requests).await;

    let mut summary = BatchSummary::default();
    let results: Vec<BatchItem> = requests
        .into_iter()
        .zip(outcomes)
        .map(|((resource, _), outcome)| {
            summary.total += 1;
            match outcome {
                Ok(outcome) => {
                    let status = if outcome.is_not_modified() {
                        summary.not_modified += 1;
                        BatchItemStatus::NotModified
                    } else {
                        summary.fresh += 1;
                        BatchItemStatus::Fresh
                    };
                    BatchItem { resource, status, outcome: Some(outcome), error: None }
                }
                Err(e) => {
                    summary.failed += 1;
                    BatchItem { resource, status: BatchItemStatus::Failed, outcome: None, error: Some(e.to_string()) }
                }
            }
        })
        .collect();

    json_success(&ResourceReadBatchOutput { results, summary })
}
