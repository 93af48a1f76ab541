//! Sandbox error types (§4.5)

use thiserror::Error;

use crate::domain::PluginBindingError;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("worker load exceeded timeout")]
    LoadTimeout,
    #[error("call to '{0}' exceeded timeout")]
    Timeout(String),
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),
    #[error("unknown host API namespace: {0}")]
    UnknownApi(String),
    #[error("plugin not approved: {0}")]
    NotApproved(String),
    #[error("plugin signature mismatch")]
    SignatureMismatch,
    #[error("worker is not in a callable state: {0}")]
    NotCallable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<PluginBindingError> for SandboxError {
    fn from(err: PluginBindingError) -> Self {
        match err {
            PluginBindingError::NotApproved(id, version) => {
                SandboxError::NotApproved(format!("plugin {id} has no approval for version {version}"))
            }
            PluginBindingError::SignatureMismatch(_) => SandboxError::SignatureMismatch,
        }
    }
}
