use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A named platform feature a brick may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Network,
    Prompting,
    Clipboard,
    Dom,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Network => "network",
            Capability::Prompting => "prompting",
            Capability::Clipboard => "clipboard",
            Capability::Dom => "dom",
        };
        f.write_str(name)
    }
}

/// Answers "is capability X available on this host".
pub trait CapabilityProvider: Send + Sync {
    fn is_available(&self, capability: Capability) -> bool;
}

/// A provider backed by a fixed set of capabilities.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    available: HashSet<Capability>,
}

impl StaticCapabilities {
    pub fn new(available: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            available: available.into_iter().collect(),
        }
    }

    /// No capability is available.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self::new([
            Capability::Network,
            Capability::Prompting,
            Capability::Clipboard,
            Capability::Dom,
        ])
    }
}

impl CapabilityProvider for StaticCapabilities {
    fn is_available(&self, capability: Capability) -> bool {
        self.available.contains(&capability)
    }
}
