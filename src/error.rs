use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Language model rate limited the request: {message}")]
    UpstreamRateLimited { message: String },

    #[error("Language model request failed: {message}")]
    UpstreamTransport { message: String },

    #[error("Invalid SQL query: {message}")]
    InvalidSqlQuery { message: String },

    #[error("Query execution failed: {message}")]
    QueryExecutionFailed { message: String },

    #[error("Failed to load dataset '{source_name}': {message}")]
    DatasetLoad {
        source_name: String,
        message: String,
    },

    #[error("Invalid archive: {message}")]
    Archive { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("DataFusion error: {0}")]
    DataFusionError(#[from] datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] datafusion::arrow::error::ArrowError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("gRPC transport error: {0}")]
    GrpcError(#[from] tonic::transport::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

/// Coarse classification the pipeline matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    Transport,
    Execution,
    DatasetLoad,
    Other,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::UpstreamRateLimited { .. } => ErrorKind::RateLimited,
            AnalysisError::UpstreamTransport { .. } => ErrorKind::Transport,
            AnalysisError::InvalidSqlQuery { .. }
            | AnalysisError::QueryExecutionFailed { .. }
            | AnalysisError::DataFusionError(_)
            | AnalysisError::ArrowError(_) => ErrorKind::Execution,
            AnalysisError::DatasetLoad { .. } | AnalysisError::Archive { .. } => {
                ErrorKind::DatasetLoad
            }
            _ => ErrorKind::Other,
        }
    }

    /// The text shown to the user in place of an answer.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::RateLimited => {
                "The language model is receiving too many requests right now. Please try again in a moment."
                    .to_string()
            }
            ErrorKind::Transport => {
                "Sorry, the language model could not be reached or returned an unusable response. Please try again."
                    .to_string()
            }
            ErrorKind::Execution => format!(
                "Sorry, the query generated for your question could not be executed ({}). Try rephrasing the question.",
                self
            ),
            ErrorKind::DatasetLoad => format!("Sorry, the uploaded data could not be loaded: {}", self),
            ErrorKind::Other => format!("Sorry, something went wrong: {}", self),
        }
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(err: std::io::Error) -> Self {
        AnalysisError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            AnalysisError::UpstreamRateLimited {
                message: err.to_string(),
            }
        } else {
            AnalysisError::UpstreamTransport {
                message: err.to_string(),
            }
        }
    }
}

impl From<diesel::result::Error> for AnalysisError {
    fn from(err: diesel::result::Error) -> Self {
        AnalysisError::Database {
            message: err.to_string(),
        }
    }
}

impl From<AnalysisError> for tonic::Status {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::SessionNotFound { .. } => tonic::Status::not_found(err.to_string()),
            AnalysisError::Archive { .. } | AnalysisError::DatasetLoad { .. } => {
                tonic::Status::invalid_argument(err.to_string())
            }
            AnalysisError::UpstreamRateLimited { .. } => {
                tonic::Status::resource_exhausted(err.user_message())
            }
            AnalysisError::UpstreamTransport { .. } => tonic::Status::unavailable(err.to_string()),
            AnalysisError::ConfigError { .. } => tonic::Status::invalid_argument(err.to_string()),
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}
