use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(kube::Error),

    /// Optimistic concurrency conflict (HTTP 409) reported by the API server.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Remote API error during {operation}: {reason}")]
    RemoteApiError { operation: String, reason: String },

    #[error("Service not found: {namespace}/{name}")]
    ServiceNotFound { namespace: String, name: String },

    #[error("No ready pod found for service {namespace}/{name}")]
    NoReadyPod { namespace: String, name: String },

    #[error("Port {port} not found on {namespace}/{name}")]
    PortNotFound {
        namespace: String,
        name: String,
        port: String,
    },

    #[error("Tunnel error: {0}")]
    TunnelError(String),

    #[error("Tunnel establishment cancelled for {0}")]
    TunnelCancelled(String),

    #[error("Secret {secret} is missing key {key}")]
    MissingSecretKey { secret: String, key: String },

    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Setup verification failed: {0}")]
    SetupVerificationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref ae) if ae.code == 409 => Error::Conflict(err.to_string()),
            err => Error::KubeError(err),
        }
    }
}

impl Error {
    /// Conflicts resolve themselves on the next observed change of the object.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Determine if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_)
                | Error::Conflict(_)
                | Error::HttpError(_)
                | Error::RemoteApiError { .. }
                | Error::NoReadyPod { .. }
                | Error::TunnelError(_)
                | Error::TunnelCancelled(_)
                | Error::IoError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_retryable_and_detected() {
        let err = Error::Conflict("the object has been modified".into());
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn setup_verification_needs_attention() {
        let err = Error::SetupVerificationError("still pending".into());
        assert!(!err.is_conflict());
        assert!(!err.is_retryable());
    }
}
