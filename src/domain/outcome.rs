//! Attempt outcome types.
//!
//! What happened to one request attempt. Only a transport failure ends the
//! diagnostic loop; any HTTP status counts as a completed exchange.

use http::StatusCode;

use crate::transport::{TransportError, TransportErrorKind};

/// Classification of one executor invocation.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A response arrived and its body was drained
    Completed { status: StatusCode },
    /// The request could not be completed at the network/TLS/framing layer
    TransportFailure(TransportError),
    /// The request could not be built; nothing was sent
    SetupFailure(String),
}

impl AttemptOutcome {
    pub fn completed(status: StatusCode) -> Self {
        Self::Completed { status }
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Completed { status } => Some(*status),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::TransportFailure(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// Short label used in logs and artifacts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::TransportFailure(_) => "transport_failure",
            Self::SetupFailure(_) => "setup_failure",
        }
    }
}
