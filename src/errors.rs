use crate::state::{Role, UpdateStatus};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    // Kubernetes
    #[error("Kubernetes error {0}")]
    Kube(#[from] kube::Error),
    #[error("Node {0} not found")]
    NodeNotFound(String),
    #[error("Write to node {0} kept conflicting with concurrent updates")]
    Conflict(String),
    #[error("Failed to delete pod {namespace}/{name}: {source}")]
    DeleteWorkload {
        namespace: String,
        name: String,
        source: Box<Error>,
    },

    // Update protocol
    #[error("Protocol violation: {role} may not move update-status from {from} to {to}")]
    ProtocolViolation {
        role: Role,
        from: UpdateStatus,
        to: UpdateStatus,
    },
    #[error("Invalid update-status value: {0:?}")]
    InvalidUpdateStatus(String),

    // Host
    #[error("update_engine error: {0}")]
    UpdateEngine(String),
    #[error("Update signal source closed before firing")]
    SubscriptionClosed,
    #[error("Command {0:?} failed: {1}")]
    CommandError(Vec<String>, String),
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Error parsing value: {0}")]
    ParseHumanize(#[from] humanize_rs::ParseError),

    // Tracing
    #[error("Trace exporter error {0}")]
    Trace(#[from] opentelemetry::trace::TraceError),
    #[error("Failed to install tracing subscriber {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),

    // Custom/generic
    #[error("Timed out waiting for operation: {0}")]
    Timeout(String),
}

impl Error {
    /// True for the 409 the API server returns when a `resourceVersion`
    /// precondition no longer holds.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(response)) if response.code == 409)
    }
}
