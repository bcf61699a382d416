//! Handler records and target registration.
//!
//! Handlers are registered explicitly (there is no attribute scanning): a
//! [`Handler`] couples a callback with the wire type it accepts, optional
//! session settings, and an optional dynamic scope. A [`HandlerSet`]
//! groups the handlers of one target object so they can be added and
//! removed together; [`EndpointMunger`]s rewrite scoped endpoints at
//! registration time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use meshway_core::endpoint::{Endpoint, EndpointError};
use meshway_core::message::{Msg, StaticPayload};
use meshway_core::routes::DEFAULT_KEY;

use crate::context::HandlerCtx;
use crate::error::RouterError;

/// Handler callback: one message in, nothing out. Replies go through the
/// request context on [`HandlerCtx`].
pub type HandlerFn = Arc<dyn Fn(Msg, HandlerCtx) + Send + Sync>;

static NEXT_TARGET: AtomicU64 = AtomicU64::new(1);

/// Identifies the target object a handler belongs to. Handlers registered
/// through one [`HandlerSet`] share a target ID and are removed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

impl TargetId {
    /// Allocate a fresh target ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TARGET.fetch_add(1, Ordering::Relaxed))
    }
}

/// Session behavior declared by a handler.
#[derive(Debug, Clone)]
pub struct SessionHandlerInfo {
    /// Cache the reply and replay it for retried opens.
    pub idempotent: bool,
    /// Keep-alive emission interval. Must be non-zero.
    pub keep_alive: Duration,
    /// Inactivity window before the session is terminated.
    /// Defaults to twice the keep-alive.
    pub session_timeout: Duration,
    /// The handler replies after returning, via a kept request context.
    pub is_async: bool,
    /// Hard ceiling on async session lifetime. `None` = unbounded.
    pub max_async_keep_alive: Option<Duration>,
    /// Session implementation selector, opaque to the router.
    pub session_type: String,
    /// Free-form parameters for the session implementation.
    pub custom_params: Option<String>,
}

impl SessionHandlerInfo {
    /// Create session settings with the given keep-alive interval.
    ///
    /// # Errors
    ///
    /// `keep_alive` must be non-zero.
    pub fn new(keep_alive: Duration) -> Result<Self, RouterError> {
        if keep_alive.is_zero() {
            return Err(RouterError::SessionConfig(
                "keep-alive must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            idempotent: false,
            keep_alive,
            session_timeout: keep_alive * 2,
            is_async: false,
            max_async_keep_alive: None,
            session_type: "query".to_string(),
            custom_params: None,
        })
    }

    /// Override the session timeout.
    ///
    /// # Errors
    ///
    /// The timeout must be at least the keep-alive interval.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, RouterError> {
        if timeout < self.keep_alive {
            return Err(RouterError::SessionConfig(
                "session timeout must be >= keep-alive".to_string(),
            ));
        }
        self.session_timeout = timeout;
        Ok(self)
    }

    /// Enable the idempotence cache.
    #[must_use]
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Mark the handler as replying asynchronously after it returns.
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Cap the lifetime of async sessions.
    #[must_use]
    pub fn with_max_async_keep_alive(mut self, ceiling: Option<Duration>) -> Self {
        self.max_async_keep_alive = ceiling;
        self
    }

    /// Select a session implementation.
    #[must_use]
    pub fn with_session_type(mut self, session_type: &str) -> Self {
        self.session_type = session_type.to_string();
        self
    }

    /// Attach free-form session parameters.
    #[must_use]
    pub fn with_custom_params(mut self, params: &str) -> Self {
        self.custom_params = Some(params.to_string());
        self
    }
}

/// A registered message handler.
#[derive(Clone)]
pub struct Handler {
    pub(crate) target: TargetId,
    pub(crate) name: String,
    pub(crate) accepts: String,
    pub(crate) func: HandlerFn,
    pub(crate) session: Option<SessionHandlerInfo>,
    pub(crate) scope: Option<String>,
}

impl Handler {
    /// A handler for the given payload type.
    pub fn for_type<P: StaticPayload>(
        f: impl Fn(Msg, HandlerCtx) + Send + Sync + 'static,
    ) -> Self {
        Self::for_wire_type(P::WIRE_TYPE, f)
    }

    /// A handler keyed on an explicit wire type ID.
    pub fn for_wire_type(id: &str, f: impl Fn(Msg, HandlerCtx) + Send + Sync + 'static) -> Self {
        Self {
            target: TargetId::next(),
            name: id.to_string(),
            accepts: id.to_string(),
            func: Arc::new(f),
            session: None,
            scope: None,
        }
    }

    /// A handler accepting any message type its routes don't claim.
    pub fn default_handler(f: impl Fn(Msg, HandlerCtx) + Send + Sync + 'static) -> Self {
        let mut handler = Self::for_wire_type(DEFAULT_KEY, f);
        handler.name = "default".to_string();
        handler
    }

    /// Attach session settings.
    #[must_use]
    pub fn with_session(mut self, info: SessionHandlerInfo) -> Self {
        self.session = Some(info);
        self
    }

    /// Declare a dynamic scope; the endpoint is rewritten by the matching
    /// munger at registration time.
    #[must_use]
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    /// Name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// The wire type this handler accepts, or the default sentinel.
    #[must_use]
    pub fn accepts(&self) -> &str {
        &self.accepts
    }

    /// The owning target.
    #[must_use]
    pub fn target_id(&self) -> TargetId {
        self.target
    }

    /// Whether the declared type accepts a message of `wire_type`.
    pub(crate) fn accepts_msg(&self, wire_type: &str) -> bool {
        self.accepts == DEFAULT_KEY || self.accepts == wire_type
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("target", &self.target)
            .field("name", &self.name)
            .field("accepts", &self.accepts)
            .field("session", &self.session.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Rewrites handler endpoints declared with a dynamic scope.
pub trait EndpointMunger: Send + Sync {
    /// The scope name this munger serves.
    fn scope(&self) -> &str;

    /// Compute the effective endpoint for a scoped handler.
    fn munge(&self, declared: &Endpoint, handler: &Handler) -> Result<Endpoint, EndpointError>;
}

/// Standard munger: appends an instance segment to the declared endpoint,
/// so N instances of one service each get their own address under a
/// shared prefix (`logical://svc/workers` → `logical://svc/workers/w3`).
pub struct InstanceMunger {
    scope: String,
    instance: String,
}

impl InstanceMunger {
    #[must_use]
    pub fn new(scope: &str, instance: &str) -> Self {
        Self {
            scope: scope.to_string(),
            instance: instance.to_string(),
        }
    }
}

impl EndpointMunger for InstanceMunger {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn munge(&self, declared: &Endpoint, _handler: &Handler) -> Result<Endpoint, EndpointError> {
        declared.child(&self.instance)
    }
}

#[derive(Debug)]
pub(crate) enum TargetEntry {
    Physical(Handler),
    Logical {
        endpoint: Endpoint,
        is_default: bool,
        handler: Handler,
    },
}

/// The handlers of one target object, registered and removed as a unit.
#[derive(Debug)]
pub struct HandlerSet {
    pub(crate) target: TargetId,
    pub(crate) group: Option<Uuid>,
    pub(crate) entries: Vec<TargetEntry>,
}

impl HandlerSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            target: TargetId::next(),
            group: None,
            entries: Vec::new(),
        }
    }

    /// Share a route with other targets in the same group.
    #[must_use]
    pub fn group(mut self, id: Uuid) -> Self {
        self.group = Some(id);
        self
    }

    /// Add a physical handler (keyed by message type only).
    #[must_use]
    pub fn physical(mut self, mut handler: Handler) -> Self {
        handler.target = self.target;
        self.entries.push(TargetEntry::Physical(handler));
        self
    }

    /// Add a logical handler at `endpoint`, keyed by its message type.
    #[must_use]
    pub fn logical(mut self, endpoint: Endpoint, mut handler: Handler) -> Self {
        handler.target = self.target;
        self.entries.push(TargetEntry::Logical {
            endpoint,
            is_default: false,
            handler,
        });
        self
    }

    /// Add a logical default handler at `endpoint`.
    #[must_use]
    pub fn logical_default(mut self, endpoint: Endpoint, mut handler: Handler) -> Self {
        handler.target = self.target;
        self.entries.push(TargetEntry::Logical {
            endpoint,
            is_default: true,
            handler,
        });
        self
    }

    /// The target ID shared by every handler in the set.
    #[must_use]
    pub fn target_id(&self) -> TargetId {
        self.target
    }
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self::new()
    }
}
