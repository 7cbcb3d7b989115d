//! Error types
//!
//! Three kinds of failure reach callers:
//!
//! * [`ConfigurationError`] - the request or a chain template cannot describe a valid
//!   graph (unsupported SEID, rate, variant, unresolved role).
//! * [`PlatformError`] - the DSP framework, stream transport or packetiser refused an
//!   operation.
//! * [`KymeraError`] - wraps both, plus session level conflicts.
//!
//! Deferrals (lock held, pre-start delay pending) are not errors and never show up here.

use crate::KymeraState;
use crate::chain::{EndpointRole, OperatorRole};

/// Request or template cannot be turned into a valid chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigurationError {
    /// Stream endpoint id is not known
    #[error("unsupported stream endpoint {0}")]
    UnsupportedSeid(u8),
    /// Sample rate is not supported by the requested use case
    #[error("unsupported sample rate {0}")]
    UnsupportedRate(u32),
    /// Stream endpoint cannot be used for the requested operation
    #[error("stream endpoint cannot be used here")]
    WrongSeidRole,
    /// Template operator did not resolve to an instance
    #[error("operator {0:?} missing from chain")]
    MissingOperator(OperatorRole),
    /// Required endpoint left unconnected
    #[error("endpoint {0:?} not connected")]
    UnconnectedEndpoint(EndpointRole),
    /// Endpoint role is not declared by the chain template
    #[error("endpoint {0:?} not part of chain")]
    UnknownEndpoint(EndpointRole),
    /// Chain was built without forwarding support
    #[error("chain does not support forwarding")]
    ForwardingUnavailable,
    /// Request needs a media endpoint that was not supplied
    #[error("media endpoint missing")]
    MissingMediaEndpoint,
    /// Template role identifiers are not unique
    #[error("duplicate role in template")]
    DuplicateRole,
    /// Template has more operators or endpoints than a chain can hold
    #[error("template too large")]
    TemplateTooLarge,
}

/// Failure reported by the platform collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlatformError {
    /// Chain creation failed
    #[error("chain creation failed")]
    ChainCreate,
    /// Stream or chain connection failed
    #[error("connection failed")]
    Connect,
    /// Chain start failed
    #[error("chain start failed")]
    Start,
    /// Operator rejected a message or query
    #[error("operator message rejected")]
    OperatorMessage,
    /// Stream endpoint configuration failed
    #[error("stream configuration failed")]
    Configure,
    /// Hardware or file endpoint is not available
    #[error("endpoint unavailable")]
    Unavailable,
    /// Packetiser transform could not be created
    #[error("packetiser failed")]
    Packetiser,
    /// DSP clock or power mode change failed
    #[error("power mode change failed")]
    PowerMode,
}

/// Errors returned by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KymeraError {
    /// Invalid request or template
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// Platform collaborator failure
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    /// Shared output/SCO chain slot is already in use
    #[error("shared chain slot occupied")]
    SlotOccupied,
    /// Request not valid in the current state
    #[error("invalid state {0:?}")]
    InvalidState(KymeraState),
    /// Operation needs a chain that does not exist
    #[error("no active chain")]
    NoChain,
    /// Deferred message queue is full
    #[error("message queue full")]
    QueueFull,
    /// Processor answered with a response of the wrong kind
    #[error("unexpected response")]
    UnexpectedResponse,
}
