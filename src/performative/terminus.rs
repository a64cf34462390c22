//! Link source and target descriptions.

use super::Symbol;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Source {
    pub address: Option<String>,
    pub capabilities: Vec<Symbol>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetTerminus {
    pub address: Option<String>,
    pub capabilities: Vec<Symbol>,
}

/// Target of a link that carries transaction control messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Coordinator {
    pub capabilities: Vec<Symbol>,
}

/// The target end of a link: an ordinary node or a transaction coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Terminus(TargetTerminus),
    Coordinator(Coordinator),
}

impl Target {
    /// Address of an ordinary terminus.
    #[must_use]
    pub fn address(address: impl Into<String>) -> Self {
        Self::Terminus(TargetTerminus {
            address: Some(address.into()),
            capabilities: Vec::new(),
        })
    }

    /// Whether this target designates a transaction coordinator.
    #[must_use]
    pub const fn is_coordinator(&self) -> bool { matches!(self, Self::Coordinator(_)) }
}
