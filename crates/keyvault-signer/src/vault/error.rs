use reqwest::StatusCode;

/// Failures reported by a vault client.
///
/// Kinds stay distinguishable so callers can tell missing objects,
/// authorization problems and transient outages apart.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("{resource} was not found: {message}")]
    NotFound { resource: String, message: String },
    #[error("request for {resource} was not authenticated: {message}")]
    Unauthorized { resource: String, message: String },
    #[error("access to {resource} is forbidden: {message}")]
    Forbidden { resource: String, message: String },
    #[error("vault unavailable ({status}) for {resource}: {message}")]
    Unavailable {
        resource: String,
        status: u16,
        message: String,
    },
    #[error("vault rejected request for {resource} ({status}): {message}")]
    Rejected {
        resource: String,
        status: u16,
        message: String,
    },
    #[error("request to vault failed")]
    Transport(#[source] reqwest::Error),
    #[error("vault returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid vault configuration: {0}")]
    Configuration(String),
    #[error("failed to obtain vault credential: {0}")]
    Credential(String),
}

impl VaultError {
    pub(crate) fn from_status(status: StatusCode, resource: &str, message: String) -> Self {
        let resource = resource.to_string();
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized { resource, message },
            StatusCode::FORBIDDEN => Self::Forbidden { resource, message },
            StatusCode::NOT_FOUND => Self::NotFound { resource, message },
            StatusCode::TOO_MANY_REQUESTS => Self::Unavailable {
                resource,
                status: status.as_u16(),
                message,
            },
            status if status.is_server_error() => Self::Unavailable {
                resource,
                status: status.as_u16(),
                message,
            },
            status => Self::Rejected {
                resource,
                status: status.as_u16(),
                message,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Forbidden { .. })
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Transport(_))
    }
}
