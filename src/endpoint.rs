//! Lifecycle state shared by connections, sessions and links.
//!
//! Every endpoint composes one [`EndpointState`] record instead of inheriting
//! open/close plumbing. The record tracks the local and remote halves of the
//! open/close handshake together with capabilities, properties and error
//! conditions announced by either side.

use std::{collections::BTreeMap, fmt};

use crate::{
    error::EngineStateError,
    performative::{ErrorCondition, Symbol},
};

/// Local channel number identifying a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u16);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "channel {}", self.0) }
}

/// Local handle of a link within its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkHandle(pub u32);

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Engine-wide address of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId {
    pub session: SessionId,
    pub handle: LinkHandle,
}

impl LinkId {
    #[must_use]
    pub const fn new(session: SessionId, handle: LinkHandle) -> Self { Self { session, handle } }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/handle {}", self.session, self.handle)
    }
}

/// One half of an endpoint's open/close handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpenState {
    #[default]
    Idle,
    Active,
    Closed,
}

/// Session state as seen from one side of the Begin/End exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unmapped,
    Begun,
    Ended,
}

impl From<OpenState> for SessionState {
    fn from(value: OpenState) -> Self {
        match value {
            OpenState::Idle => Self::Unmapped,
            OpenState::Active => Self::Begun,
            OpenState::Closed => Self::Ended,
        }
    }
}

/// Lifecycle events every endpoint can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointEvent {
    LocalOpen,
    LocalClose,
    RemoteOpen,
    RemoteClose,
    /// The parent endpoint closed while this endpoint was still locally open.
    ParentEndpointClosed,
    EngineShutdown,
}

/// Open/close state, capabilities and properties of an endpoint.
#[derive(Clone, Debug, Default)]
pub struct EndpointState {
    local: OpenState,
    remote: OpenState,
    offered_capabilities: Vec<Symbol>,
    desired_capabilities: Vec<Symbol>,
    properties: BTreeMap<Symbol, String>,
    condition: Option<ErrorCondition>,
    remote_offered_capabilities: Vec<Symbol>,
    remote_desired_capabilities: Vec<Symbol>,
    remote_properties: BTreeMap<Symbol, String>,
    remote_condition: Option<ErrorCondition>,
}

/// What the remote announced when it opened the endpoint.
#[derive(Clone, Debug, Default)]
pub struct RemoteOpening {
    pub offered_capabilities: Vec<Symbol>,
    pub desired_capabilities: Vec<Symbol>,
    pub properties: BTreeMap<Symbol, String>,
}

impl EndpointState {
    #[must_use]
    pub const fn local(&self) -> OpenState { self.local }

    #[must_use]
    pub const fn remote(&self) -> OpenState { self.remote }

    #[must_use]
    pub fn is_locally_open(&self) -> bool { self.local == OpenState::Active }

    #[must_use]
    pub fn is_locally_closed(&self) -> bool { self.local == OpenState::Closed }

    #[must_use]
    pub fn is_remotely_open(&self) -> bool { self.remote == OpenState::Active }

    #[must_use]
    pub fn is_remotely_closed(&self) -> bool { self.remote == OpenState::Closed }

    #[must_use]
    pub fn offered_capabilities(&self) -> &[Symbol] { &self.offered_capabilities }

    #[must_use]
    pub fn desired_capabilities(&self) -> &[Symbol] { &self.desired_capabilities }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<Symbol, String> { &self.properties }

    #[must_use]
    pub fn condition(&self) -> Option<&ErrorCondition> { self.condition.as_ref() }

    #[must_use]
    pub fn remote_offered_capabilities(&self) -> &[Symbol] { &self.remote_offered_capabilities }

    #[must_use]
    pub fn remote_desired_capabilities(&self) -> &[Symbol] { &self.remote_desired_capabilities }

    #[must_use]
    pub fn remote_properties(&self) -> &BTreeMap<Symbol, String> { &self.remote_properties }

    #[must_use]
    pub fn remote_condition(&self) -> Option<&ErrorCondition> { self.remote_condition.as_ref() }

    /// Replace the offered capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the endpoint has been
    /// locally opened.
    pub fn set_offered_capabilities(
        &mut self,
        endpoint: &'static str,
        capabilities: Vec<Symbol>,
    ) -> Result<(), EngineStateError> {
        self.ensure_unopened(endpoint)?;
        self.offered_capabilities = capabilities;
        Ok(())
    }

    /// Replace the desired capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the endpoint has been
    /// locally opened.
    pub fn set_desired_capabilities(
        &mut self,
        endpoint: &'static str,
        capabilities: Vec<Symbol>,
    ) -> Result<(), EngineStateError> {
        self.ensure_unopened(endpoint)?;
        self.desired_capabilities = capabilities;
        Ok(())
    }

    /// Replace the endpoint properties.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the endpoint has been
    /// locally opened.
    pub fn set_properties(
        &mut self,
        endpoint: &'static str,
        properties: BTreeMap<Symbol, String>,
    ) -> Result<(), EngineStateError> {
        self.ensure_unopened(endpoint)?;
        self.properties = properties;
        Ok(())
    }

    /// Record the error condition sent when the endpoint closes.
    pub fn set_condition(&mut self, condition: Option<ErrorCondition>) { self.condition = condition; }

    /// Move the local half to `Active`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] or
    /// [`EngineStateError::Closed`] unless the endpoint is idle.
    pub fn open_locally(&mut self, endpoint: &'static str) -> Result<(), EngineStateError> {
        match self.local {
            OpenState::Idle => {
                self.local = OpenState::Active;
                Ok(())
            }
            OpenState::Active => Err(EngineStateError::AlreadyOpen { endpoint }),
            OpenState::Closed => Err(EngineStateError::Closed { endpoint }),
        }
    }

    /// Move the local half to `Closed`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::Closed`] if already closed.
    pub fn close_locally(&mut self, endpoint: &'static str) -> Result<(), EngineStateError> {
        if self.local == OpenState::Closed {
            return Err(EngineStateError::Closed { endpoint });
        }
        self.local = OpenState::Closed;
        Ok(())
    }

    /// Ensure the local half is active.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::NotOpen`] or [`EngineStateError::Closed`].
    pub fn ensure_locally_open(&self, endpoint: &'static str) -> Result<(), EngineStateError> {
        match self.local {
            OpenState::Active => Ok(()),
            OpenState::Idle => Err(EngineStateError::NotOpen { endpoint }),
            OpenState::Closed => Err(EngineStateError::Closed { endpoint }),
        }
    }

    /// Record that the remote opened the endpoint. Returns `false` when the
    /// remote half was already active.
    pub fn remote_opened(&mut self, opening: RemoteOpening) -> bool {
        if self.remote == OpenState::Active {
            return false;
        }
        self.remote = OpenState::Active;
        self.remote_offered_capabilities = opening.offered_capabilities;
        self.remote_desired_capabilities = opening.desired_capabilities;
        self.remote_properties = opening.properties;
        true
    }

    /// Record that the remote closed the endpoint.
    pub fn remote_closed(&mut self, condition: Option<ErrorCondition>) {
        self.remote = OpenState::Closed;
        self.remote_condition = condition;
    }

    fn ensure_unopened(&self, endpoint: &'static str) -> Result<(), EngineStateError> {
        if self.local == OpenState::Idle {
            Ok(())
        } else {
            Err(EngineStateError::AlreadyOpen { endpoint })
        }
    }
}
