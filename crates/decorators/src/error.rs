//! Decorator errors.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The decorated Operator cannot produce a component label key (empty name).
    #[error("cannot generate component label key: {0}")]
    InvalidState(String),

    #[error("cannot create new Operator: {0}")]
    InvalidArgument(String),

    #[error("cannot create new Component: {0}")]
    InvalidComponent(String),

    /// A component handed to an Operator does not carry its component label.
    #[error("cannot add component {component} to Operator {operator}: component labels not selected by {selector}")]
    OwnershipViolation { component: String, operator: String, selector: String },

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    /// `status.conditions` of a component could not be decoded.
    #[error("cannot decode component conditions: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_state(msg: impl Into<String>) -> Self { Self::InvalidState(msg.into()) }
    pub fn invalid_argument(msg: impl Into<String>) -> Self { Self::InvalidArgument(msg.into()) }
    pub fn invalid_component(msg: impl Into<String>) -> Self { Self::InvalidComponent(msg.into()) }
    pub fn invalid_selector(msg: impl Into<String>) -> Self { Self::InvalidSelector(msg.into()) }

    /// True for failures caused by objects not carrying the expected label.
    pub fn is_ownership_violation(&self) -> bool { matches!(self, Self::OwnershipViolation { .. }) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
