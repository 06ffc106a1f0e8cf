use std::borrow::Cow;
use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport could not be opened.
    Connection,
    /// The transport opened but session negotiation failed.
    Handshake,
    /// The peer sent something that violates the protocol.
    Protocol,
    /// The peer answered a request with a JSON-RPC error.
    Rpc,
    /// The session or transport has been closed.
    Closed,
    /// The operation is not valid in the current state.
    InvalidState,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection error"),
            ErrorKind::Handshake => write!(f, "handshake error"),
            ErrorKind::Protocol => write!(f, "protocol error"),
            ErrorKind::Rpc => write!(f, "rpc error"),
            ErrorKind::Closed => write!(f, "session closed"),
            ErrorKind::InvalidState => write!(f, "invalid state"),
        }
    }
}

/// Describes an MCP client error.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

impl Error {
    #[inline]
    fn with_kind(kind: ErrorKind) -> Self {
        Self { kind, reason: None }
    }

    /// Creates a new error with the `Connection` kind.
    #[inline]
    pub fn connection() -> Self {
        Self::with_kind(ErrorKind::Connection)
    }

    /// Creates a new error with the `Handshake` kind.
    #[inline]
    pub fn handshake() -> Self {
        Self::with_kind(ErrorKind::Handshake)
    }

    /// Creates a new error with the `Protocol` kind.
    #[inline]
    pub fn protocol() -> Self {
        Self::with_kind(ErrorKind::Protocol)
    }

    /// Creates a new error with the `Rpc` kind.
    #[inline]
    pub fn rpc() -> Self {
        Self::with_kind(ErrorKind::Rpc)
    }

    /// Creates a new error with the `Closed` kind.
    #[inline]
    pub fn closed() -> Self {
        Self::with_kind(ErrorKind::Closed)
    }

    /// Creates a new error with the `InvalidState` kind.
    #[inline]
    pub fn invalid_state() -> Self {
        Self::with_kind(ErrorKind::InvalidState)
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Re-labels the error with another kind, keeping the reason.
    #[inline]
    pub fn into_kind(self, kind: ErrorKind) -> Self {
        Self {
            kind,
            reason: self.reason,
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}
