//! Error taxonomy for the Projection session core.
//!
//! Errors are grouped by the boundary they occur at (transport codec,
//! pointer/patch construction, routing, screen dispatch, invariants,
//! bridge I/O). Each variant that may surface on the wire maps to a stable
//! protocol code via [`ProjectionError::wire_code`]; invariant violations
//! are programmer errors and must never reach the renderer.

use thiserror::Error;

/// Which side of the transport a frame was traveling on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Renderer → core (capped at 64 KiB).
    Inbound,
    /// Core → renderer (capped at 1 MiB).
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// Primary error type for Projection session-core operations.
#[derive(Error, Debug)]
pub enum ProjectionError {
    // === Transport codec ===
    /// Frame payload exceeds the directional size cap.
    #[error("{direction} frame too large: {len} > {max}")]
    FrameTooLarge {
        direction: Direction,
        len: usize,
        max: usize,
    },

    /// Inbound bytes are not well-formed JSON.
    #[error("envelope decode failed: {detail}")]
    DecodeError { detail: String },

    /// Decoded JSON is not a recognizable envelope mapping.
    #[error("invalid envelope: {detail}")]
    InvalidEnvelope { detail: String },

    /// Outbound envelope could not be serialized.
    #[error("envelope encode failed: {detail}")]
    EncodeError { detail: String },

    // === Pointer & patch ops ===
    /// Pointer string does not start with `/` and is not empty.
    #[error("invalid JSON pointer `{pointer}`")]
    InvalidPointer { pointer: String },

    /// Pointer token contains a bare `~` or an unknown `~X` escape.
    #[error("invalid pointer escape in token `{token}`")]
    InvalidEscape { token: String },

    // === Routing ===
    /// Route name is not present in the route table.
    #[error("no such route: {name}")]
    UnknownRoute { name: String },

    /// A router requires at least one route definition.
    #[error("route table is empty")]
    EmptyRouteTable,

    /// Route table carries a duplicate name, path, or key.
    #[error("duplicate route {field}: {value}")]
    DuplicateRoute {
        field: &'static str,
        value: String,
    },

    /// Navigation would cross a screen-session boundary.
    #[error("navigation from boundary `{from}` to boundary `{to}` is blocked")]
    BoundaryViolation { from: String, to: String },

    /// `back` on a single-entry navigation stack.
    #[error("navigation stack has no entry to pop")]
    NavUnderflow,

    // === Screen dispatch ===
    /// Route references a screen id with no registered implementation.
    #[error("screen `{screen}` is not registered")]
    ScreenNotRegistered { screen: String },

    /// The mount hook failed; session start cannot proceed.
    #[error("mount failed for screen `{screen}`: {detail}")]
    MountFailed { screen: String, detail: String },

    /// A screen hook reported a fault. Dispatch policy decides whether this
    /// is swallowed (event/params/info) or becomes the error VM (render).
    #[error("screen hook fault: {detail}")]
    ScreenFault { detail: String },

    // === Invariants ===
    /// An outbound revision would not advance by exactly one.
    #[error("revision regression: current {current}, attempted {attempted}")]
    RevRegression { current: u64, attempted: u64 },

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),

    // === Bridge ===
    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The renderer child process could not be restarted within budget.
    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl ProjectionError {
    /// Stable code carried in a protocol `error` envelope.
    pub const fn wire_code(&self) -> &'static str {
        match self {
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::DecodeError { .. } => "decode_error",
            Self::InvalidEnvelope { .. } => "invalid_envelope",
            Self::EncodeError { .. } => "encode_error",
            Self::UnknownRoute { .. } => "unknown_route",
            Self::BoundaryViolation { .. } => "navigation_blocked",
            Self::Io(_) | Self::ReconnectExhausted { .. } => "transport_error",
            _ => "internal_error",
        }
    }

    /// Whether the bridge must force a resync after reporting this error.
    ///
    /// The reference renderer re-issues `ready` for exactly these decode-side
    /// codes; the bridge mirrors the list so a resync happens even when the
    /// renderer's own `ready` never arrives.
    pub const fn forces_resync(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge {
                direction: Direction::Inbound,
                ..
            } | Self::DecodeError { .. }
                | Self::InvalidEnvelope { .. }
        )
    }

    /// Whether this is a contract breach rather than a runtime condition.
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPointer { .. }
                | Self::InvalidEscape { .. }
                | Self::RevRegression { .. }
                | Self::Internal(_)
        )
    }

    /// Create a decode error.
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::DecodeError {
            detail: detail.into(),
        }
    }

    /// Create an invalid-envelope error.
    pub fn invalid_envelope(detail: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            detail: detail.into(),
        }
    }

    /// Create an encode error.
    pub fn encode(detail: impl Into<String>) -> Self {
        Self::EncodeError {
            detail: detail.into(),
        }
    }

    /// Create a screen-hook fault.
    pub fn screen_fault(detail: impl Into<String>) -> Self {
        Self::ScreenFault {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}

/// Result type alias using [`ProjectionError`].
pub type Result<T> = std::result::Result<T, ProjectionError>;
