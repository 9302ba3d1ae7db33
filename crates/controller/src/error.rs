use opdisco_kubehub::KindError;
use thiserror::Error;

/// Failures talking to the resource store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic concurrency check failed.
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict { kind: String, name: String, message: String },

    #[error("kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Classify a kube client error for an object of `kind` named `name`.
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound { kind: kind.to_string(), name: name.to_string() },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists { kind: kind.to_string(), name: name.to_string() }
            }
            kube::Error::Api(ae) if ae.code == 409 => {
                Self::Conflict { kind: kind.to_string(), name: name.to_string(), message: ae.message }
            }
            other => Self::Kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
    pub fn is_already_exists(&self) -> bool { matches!(self, Self::AlreadyExists { .. }) }
}

/// Why a reconcile did not complete.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("fetching Operator {name}: {source}")]
    Fetch { name: String, #[source] source: StoreError },

    #[error("resolving component kinds: {0}")]
    Kinds(#[from] KindError),

    #[error("listing {kind} components: {source}")]
    List { kind: String, #[source] source: StoreError },

    /// Decorating the Operator or refreshing its components failed.
    #[error("decorating Operator: {0}")]
    Decoration(#[from] opdisco_decorators::Error),

    #[error("updating Operator {name} status: {source}")]
    Write { name: String, #[source] source: StoreError },
}

impl ReconcileError {
    /// Store and kind resolution failures may clear up on their own; a
    /// decoration failure will repeat until the inputs change.
    pub fn is_retryable(&self) -> bool { !matches!(self, Self::Decoration(_)) }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Kinds(_) => "kinds",
            Self::List { .. } => "list",
            Self::Decoration(_) => "decoration",
            Self::Write { .. } => "write",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "boom".into(), reason: reason.into(), code })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(StoreError::from_kube(api_err(404, "NotFound"), "Operator", "foo").is_not_found());
        assert!(StoreError::from_kube(api_err(409, "AlreadyExists"), "Operator", "foo").is_already_exists());
        assert!(matches!(StoreError::from_kube(api_err(409, "Conflict"), "Operator", "foo"), StoreError::Conflict { .. }));
        assert!(matches!(StoreError::from_kube(api_err(500, "InternalError"), "Operator", "foo"), StoreError::Kube(_)));
    }

    #[test]
    fn decoration_failures_are_terminal() {
        let e = ReconcileError::Decoration(opdisco_decorators::Error::invalid_state("empty name field"));
        assert!(!e.is_retryable());
        let e = ReconcileError::Write { name: "foo".into(), source: StoreError::Other("down".into()) };
        assert!(e.is_retryable());
        assert_eq!(e.reason(), "write");
    }
}
