//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use crate::catalog::RecordWrite;
use crate::platform::Platform;
use crate::tools::{
    cache::{CacheInvalidateParams, invalidate_impl, purge_impl},
    record_write::write_impl,
    resource_read::{ResourceReadParams, read_impl},
    resource_read_batch::{ResourceReadBatchParams, read_batch_impl},
    version_get::{VersionGetParams, version_impl},
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for versync.
#[derive(Clone)]
pub struct VersyncServer {
    platform: Platform,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl VersyncServer {
    /// Create a new server handler over an opened platform.
    pub fn new(platform: Platform) -> Self {
        Self { platform, tool_router: Self::tool_router() }
    }

    /// Version-stamped read of one resource.
    ///
    /// Returns `{"status":"not-modified","version":..}` when `client_version`
    /// is current, otherwise `{"data":..,"version":..}`.
    #[tool(
        description = "Read a resource. Pass the version you hold as client_version; returns {status:'not-modified',version} if it is current, else {data,version}."
    )]
    async fn resource_read(&self, params: Parameters<ResourceReadParams>) -> Result<CallToolResult, McpError> {
        read_impl(&self.platform, params.0).await
    }

    #[tool(description = "Read several resources concurrently (1-32), each with its own client_version. Results keep input order.")]
    async fn resource_read_batch(
        &self, params: Parameters<ResourceReadBatchParams>,
    ) -> Result<CallToolResult, McpError> {
        read_batch_impl(&self.platform, params.0).await
    }

    /// Create, update or delete a record, then invalidate every resource
    /// derived from it.
    #[tool(
        description = "Create, update or delete a record (course, lesson, enrollment, user, chat_thread, chat_message). Returns {status,message} and the invalidation report."
    )]
    async fn record_write(&self, params: Parameters<RecordWrite>) -> Result<CallToolResult, McpError> {
        write_impl(&self.platform, params.0).await
    }

    #[tool(description = "Get the current version of a registry key or of a resource's key.")]
    async fn version_get(&self, params: Parameters<VersionGetParams>) -> Result<CallToolResult, McpError> {
        version_impl(&self.platform, params.0).await
    }

    #[tool(description = "Bump version keys and delete cached payloads by key or by resource. Returns the cascade report.")]
    async fn cache_invalidate(&self, params: Parameters<CacheInvalidateParams>) -> Result<CallToolResult, McpError> {
        invalidate_impl(&self.platform, params.0).await
    }

    #[tool(description = "Delete cached payloads whose TTL has expired. Returns the number deleted.")]
    async fn cache_purge(&self) -> Result<CallToolResult, McpError> {
        purge_impl(&self.platform).await
    }
}

impl ServerHandler for VersyncServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "versync".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
