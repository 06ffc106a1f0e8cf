use std::fmt;

use crate::connector::{Connector, SseConnector};
use crate::error::{Error, ErrorKind};
use crate::session::Session;
use crate::transport::Transport;

/// Where a [`SessionHandle`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleStatus {
    /// `connect` has not been called yet.
    Unconnected,
    /// Both the transport and the session are live.
    Connected,
    /// Everything has been released. Terminal.
    Closed,
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleStatus::Unconnected => write!(f, "unconnected"),
            HandleStatus::Connected => write!(f, "connected"),
            HandleStatus::Closed => write!(f, "closed"),
        }
    }
}

enum State<S, T> {
    Unconnected,
    // Fields drop in declaration order, so the session goes first.
    Connected { session: S, transport: T },
    Closed,
}

/// Owns one transport and the session negotiated on it.
///
/// The session never outlives the transport: [`cleanup`] closes the
/// session before the transport, and dropping a connected handle releases
/// them in the same order.
///
/// ```no_run
/// # async fn run() -> Result<(), toolwire_mcp::Error> {
/// use toolwire_mcp::SessionHandle;
///
/// let mut handle = SessionHandle::new();
/// handle.connect("http://0.0.0.0:8000/sse").await?;
/// if let Some(session) = handle.session() {
///     let tools = session.peer().list_tools().await?;
///     println!("{} tools", tools.len());
/// }
/// handle.cleanup().await;
/// # Ok(())
/// # }
/// ```
///
/// [`cleanup`]: SessionHandle::cleanup
pub struct SessionHandle<C: Connector = SseConnector> {
    connector: C,
    state: State<C::Session, C::Transport>,
}

impl SessionHandle {
    /// Creates an unconnected handle using the default SSE connector.
    #[inline]
    pub fn new() -> Self {
        Self::with_connector(SseConnector::default())
    }
}

impl Default for SessionHandle {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> SessionHandle<C> {
    /// Creates an unconnected handle using `connector`.
    #[inline]
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            state: State::Unconnected,
        }
    }

    /// Opens a transport to `endpoint` and negotiates a session on it.
    ///
    /// Fails with [`ErrorKind::Connection`] when the transport cannot be
    /// opened, in which case negotiation is never attempted, and with
    /// [`ErrorKind::Handshake`] when negotiation fails, in which case the
    /// transport is closed before returning. Either failure leaves the
    /// handle closed. Calling this on a handle that is not
    /// [`HandleStatus::Unconnected`] fails with
    /// [`ErrorKind::InvalidState`] and changes nothing.
    pub async fn connect(&mut self, endpoint: &str) -> Result<(), Error> {
        if !matches!(self.state, State::Unconnected) {
            let reason = format!("cannot connect a {} handle", self.status());
            return Err(Error::invalid_state().with_reason(reason));
        }

        info!("connecting to {endpoint}");
        let mut transport = match self.connector.open(endpoint).await {
            Ok(transport) => transport,
            Err(err) => {
                error!("failed to open transport to {endpoint}: {err}");
                self.state = State::Closed;
                return Err(err.into_kind(ErrorKind::Connection));
            }
        };

        let session = match self.connector.negotiate(&mut transport).await {
            Ok(session) => session,
            Err(err) => {
                error!("session negotiation with {endpoint} failed: {err}");
                if let Err(close_err) = transport.close().await {
                    warn!("failed to close transport: {close_err}");
                }
                self.state = State::Closed;
                return Err(err.into_kind(ErrorKind::Handshake));
            }
        };

        self.state = State::Connected { session, transport };
        Ok(())
    }

    /// Releases the session, then the transport.
    ///
    /// Release failures are logged, not returned. The handle is closed
    /// afterwards whatever state it was in, and calling this again does
    /// nothing.
    pub async fn cleanup(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Closed);
        let State::Connected {
            mut session,
            mut transport,
        } = state
        else {
            return;
        };

        if let Err(err) = session.close().await {
            warn!("failed to close session: {err}");
        }
        drop(session);
        if let Err(err) = transport.close().await {
            warn!("failed to close transport: {err}");
        }
        debug!("session handle cleaned up");
    }

    /// Returns the negotiated session while connected.
    #[inline]
    pub fn session(&self) -> Option<&C::Session> {
        match &self.state {
            State::Connected { session, .. } => Some(session),
            _ => None,
        }
    }

    /// Returns the current lifecycle state.
    #[inline]
    pub fn status(&self) -> HandleStatus {
        match self.state {
            State::Unconnected => HandleStatus::Unconnected,
            State::Connected { .. } => HandleStatus::Connected,
            State::Closed => HandleStatus::Closed,
        }
    }
}

impl<C: Connector + fmt::Debug> fmt::Debug for SessionHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("connector", &self.connector)
            .field("status", &self.status())
            .finish()
    }
}
