//! Message-type registry.
//!
//! Maps wire type IDs to decode factories. Each router owns one registry;
//! there is no process-global instance. Types register under their
//! declared wire ID or under a pinned ID so renamed types stay
//! wire-compatible across deployments.

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use tracing::debug;

use meshway_core::error::PayloadError;
use meshway_core::message::{MsgPayload, PlainMsg, StaticPayload};

use crate::system::{AdvertiseMsg, KeepAliveMsg, PropertyMsg, ReceiptMsg, SessionCancelMsg, TextMsg};

type Factory = Box<dyn Fn(&[u8]) -> Result<Box<dyn MsgPayload>, PayloadError> + Send + Sync>;

/// Thread-safe wire-type → factory registry.
pub struct TypeRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    factories: HashMap<String, Factory>,
    ignored: HashSet<String>,
}

impl TypeRegistry {
    /// A registry pre-loaded with the built-in system message types.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register::<PlainMsg>();
        registry.register::<ReceiptMsg>();
        registry.register::<KeepAliveMsg>();
        registry.register::<SessionCancelMsg>();
        registry.register::<AdvertiseMsg>();
        registry.register::<TextMsg>();
        registry.register::<PropertyMsg>();
        registry
    }

    /// A registry with no registrations at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register `T` under its declared wire type ID.
    pub fn register<T: StaticPayload + 'static>(&self) {
        self.register_as::<T>(T::WIRE_TYPE);
    }

    /// Register `T` under a pinned ID.
    ///
    /// Re-registering an ID replaces the previous factory. IDs marked
    /// ignored are skipped.
    pub fn register_as<T: StaticPayload + 'static>(&self, id: &str) {
        let mut inner = self.inner.write();
        if inner.ignored.contains(id) {
            debug!(id, "skipping registration of ignored message type");
            return;
        }
        if inner.factories.contains_key(id) {
            debug!(id, "replacing existing message type registration");
        }
        inner.factories.insert(
            id.to_string(),
            Box::new(|payload| {
                T::decode_payload(payload).map(|p| Box::new(p) as Box<dyn MsgPayload>)
            }),
        );
    }

    /// Mark an ID as ignored: future registrations of it are skipped and
    /// inbound frames carrying it decode as envelopes.
    pub fn ignore(&self, id: &str) {
        let mut inner = self.inner.write();
        inner.factories.remove(id);
        inner.ignored.insert(id.to_string());
    }

    /// Whether `id` has a registered factory.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().factories.contains_key(id)
    }

    /// Decode a payload. `None` means the type is unknown here and the
    /// caller should fall back to an envelope.
    pub fn decode(
        &self,
        id: &str,
        payload: &[u8],
    ) -> Option<Result<Box<dyn MsgPayload>, PayloadError>> {
        let inner = self.inner.read();
        inner.factories.get(id).map(|factory| factory(payload))
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().factories.len()
    }

    /// Whether the registry has no registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().factories.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
