use std::future::Future;

use thiserror::Error;

/// An external command exited with a non-zero code or could not be launched at all.
#[derive(Debug, Clone, Error)]
#[error("{message} (exit code: {exit_code:?})\nStderr: {stderr}\nStdout: {stdout}")]
pub struct CommandExecutionFailure {
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was not started or was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandExecutionFailure {
    pub fn new(
        message: impl Into<String>,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            message: message.into(),
            stdout,
            stderr,
            exit_code,
        }
    }
}

#[derive(Debug, Error)]
pub enum TardisError {
    #[error(transparent)]
    CommandExecutionFailure(#[from] CommandExecutionFailure),
    #[error("Resource status update of drone {drone_uuid} failed: {source}")]
    ResourceStatusUpdateFailed {
        drone_uuid: String,
        source: CommandExecutionFailure,
    },
    #[error("Machine type {0} is not configured")]
    UnknownMachineType(String),
    #[error("Resource {resource} of machine type {machine_type} is not supported")]
    UnsupportedResource {
        machine_type: String,
        resource: String,
    },
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Error: {0:#}")]
    GenericError(anyhow::Error),
}

impl TardisError {
    /// Kinds that the exception classifier lets through unchanged.
    fn is_recognized(&self) -> bool {
        matches!(
            self,
            TardisError::ResourceStatusUpdateFailed { .. } | TardisError::GenericError(_)
        )
    }
}

impl From<anyhow::Error> for TardisError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error)
    }
}

impl From<toml::de::Error> for TardisError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(TardisError::GenericError(anyhow::anyhow!(message)))
}

/// Runs `operation` and classifies its failure.
///
/// Recognized kinds (a failed status update, or an error that is already generic) are
/// returned as they are, anything else is wrapped into [`TardisError::GenericError`].
/// Everything owned by `operation` is dropped before this function returns, whichever way
/// the operation ends.
pub async fn handle_exceptions<T, E, F>(operation: F) -> crate::Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let error: anyhow::Error = match operation.await {
        Ok(value) => return Ok(value),
        Err(error) => error.into(),
    };
    match error.downcast::<TardisError>() {
        Ok(error) if error.is_recognized() => Err(error),
        Ok(error) => Err(TardisError::GenericError(error.into())),
        Err(error) => Err(TardisError::GenericError(error)),
    }
}
