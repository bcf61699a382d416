//! Abstract-to-logical endpoint resolution.
//!
//! Deployments bind stable `abstract://` names to concrete logical
//! endpoints through configuration. The map is validated when loaded:
//! entries that do not resolve to a logical endpoint are logged and
//! skipped rather than failing startup.

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::warn;

use super::{Endpoint, EndpointError};

/// Name → logical endpoint bindings for the `abstract://` scheme.
#[derive(Debug, Default, Clone)]
pub struct AbstractMap {
    entries: HashMap<String, Endpoint>,
}

impl AbstractMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load bindings from `(name, uri)` pairs.
    ///
    /// Invalid entries are skipped with a warning; loading never fails.
    pub fn load<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut map = Self::new();
        for (name, uri) in pairs {
            if let Err(err) = map.insert(name, uri) {
                warn!(name, uri, %err, "skipping invalid abstract mapping");
            }
        }
        map
    }

    /// Bind `name` to a logical endpoint URI.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotLogical`] if the URI resolves to a
    /// physical endpoint, or the parse error for a malformed URI.
    pub fn insert(&mut self, name: &str, uri: &str) -> Result<(), EndpointError> {
        let ep = Endpoint::parse_with_map(uri, self)?;
        if !ep.is_logical() {
            return Err(EndpointError::NotLogical);
        }
        self.entries.insert(name.trim().to_ascii_lowercase(), ep);
        Ok(())
    }

    /// Look up a binding. `name` is matched case-insensitively.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Endpoint> {
        self.entries.get(name).cloned()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map has no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static INSTALLED: Lazy<RwLock<AbstractMap>> = Lazy::new(|| RwLock::new(AbstractMap::new()));

/// Install `map` as the process-wide abstract map used by bare
/// [`Endpoint::parse`] calls.
///
/// This is an opt-in convenience for processes that run a single router:
/// the map is one mutable global, so a second install replaces the first
/// for every bare parse in the process. Routers never touch it — each
/// resolves against its own configured map via
/// [`Endpoint::parse_with`](super::Endpoint::parse_with); use that form
/// anywhere isolation matters.
pub fn install(map: AbstractMap) {
    *INSTALLED.write() = map;
}

pub(super) fn with_installed<R>(f: impl FnOnce(&AbstractMap) -> R) -> R {
    f(&INSTALLED.read())
}
