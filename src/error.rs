//! Error types for the DOM MCP server.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// DOM MCP server errors.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON-RPC protocol error.
    #[error("JSON-RPC error: {code} - {message}")]
    JsonRpc {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
        /// Additional data.
        data: Option<serde_json::Value>,
    },

    /// No tool with this name is declared on the page.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// No resource matches this URI.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Invalid parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The page reported a failure while executing a tool.
    #[error("tool {tool} failed: {message}")]
    ToolExecution {
        /// Tool name.
        tool: String,
        /// Message reported by the page.
        message: String,
    },

    /// The model collaborator was unreachable or answered with garbage.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message would break the tool-call correlation of the conversation.
    #[error("conversation invariant violated: {0}")]
    ConversationInvariant(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::JsonRpc { code, .. } => *code,
            Error::ToolNotFound(_) => codes::METHOD_NOT_FOUND,
            Error::ResourceNotFound(_) => codes::RESOURCE_NOT_FOUND,
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::ToolExecution { .. } => -32000, // Server error
            Error::Transport(_) => -32001,
            Error::ConversationInvariant(_) => codes::INVALID_REQUEST,
            Error::Config(_) => -32003,
            Error::Serialization(_) => codes::PARSE_ERROR,
            Error::Io(_) => codes::INTERNAL_ERROR,
            Error::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Whether this is one of the NotFound errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ToolNotFound(_) | Error::ResourceNotFound(_))
    }

    /// Convert to JSON-RPC error response.
    pub fn to_json_rpc_error(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Parse error.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// MCP resource not found.
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
}
