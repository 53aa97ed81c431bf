//! Error types for Mail Assist.

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail provider authentication errors. Not recoverable without the user.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No stored credential and client secret file not found at {path}")]
    MissingClientSecret { path: String },

    #[error("Invalid credential file {path}: {reason}")]
    InvalidCredential { path: String, reason: String },

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Authorization flow failed: {0}")]
    GrantFailed(String),

    #[error("Failed to persist credential to {path}: {reason}")]
    PersistFailed { path: String, reason: String },

    #[error("Failed to resolve mailbox profile: {0}")]
    Profile(String),
}

/// Network / provider call failures against the mail provider.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("Failed to build outgoing message: {0}")]
    Compose(String),
}

/// Message decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message {message_id} has no payload")]
    MissingPayload { message_id: String },
}

/// Generation provider errors. Callers get these as `Err`, never as text.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API key for provider {provider} is not configured")]
    MissingApiKey { provider: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Pipeline orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("A fetch batch is already in progress")]
    AlreadyRunning,

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Listing unread messages failed: {0}")]
    Listing(TransportError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Document session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(String),

    #[error("No document loaded. Please upload and summarize first.")]
    NoDocument,

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Worker pool errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker pool is saturated ({capacity} tasks running)")]
    Saturated { capacity: usize },

    #[error("Worker pool has been shut down")]
    ShutDown,

    #[error("Task {label} was cancelled before completing")]
    Cancelled { label: String },
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;
