//! Request contexts for server-side sessions.
//!
//! A [`RequestContext`] captures everything a handler needs to answer a
//! request later: the requester's endpoint, the session ID, and the
//! request's extension headers. Exactly one of `reply`, `cancel`, or
//! `abort` completes the transaction; a context dropped without
//! completion cancels it so the client never hangs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use uuid::Uuid;

use meshway_core::endpoint::Endpoint;
use meshway_core::flags;
use meshway_core::message::{ExtHeader, Msg};
use meshway_wire::SessionCancelMsg;

use crate::error::RouterError;
use crate::router::{MsgRouter, RouterInner};

/// Per-invocation context handed to every handler.
pub struct HandlerCtx {
    router: MsgRouter,
    request: Option<RequestContext>,
}

impl HandlerCtx {
    pub(crate) fn new(router: MsgRouter, request: Option<RequestContext>) -> Self {
        Self { router, request }
    }

    /// The router that dispatched the message.
    #[must_use]
    pub fn router(&self) -> &MsgRouter {
        &self.router
    }

    /// The pending request, when the message opened a session.
    #[must_use]
    pub fn request(&self) -> Option<&RequestContext> {
        self.request.as_ref()
    }

    /// Take the request context out, e.g. to answer after the handler
    /// returns. Leaves `None` behind.
    pub fn take_request(&mut self) -> Option<RequestContext> {
        self.request.take()
    }

    /// Answer the pending request.
    ///
    /// # Errors
    ///
    /// [`RouterError::TransactionCompleted`] when there is no pending
    /// request or it was already completed.
    pub fn reply(&mut self, msg: Msg) -> Result<(), RouterError> {
        match self.take_request() {
            Some(request) => request.reply(msg),
            None => Err(RouterError::TransactionCompleted),
        }
    }
}

/// The server side of one request/reply transaction.
pub struct RequestContext {
    router: Weak<RouterInner>,
    from_ep: Option<Endpoint>,
    session_id: Uuid,
    ext_headers: Vec<ExtHeader>,
    completed: Arc<AtomicBool>,
}

impl RequestContext {
    pub(crate) fn new(
        router: Weak<RouterInner>,
        from_ep: Option<Endpoint>,
        session_id: Uuid,
        ext_headers: Vec<ExtHeader>,
        completed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            router,
            from_ep,
            session_id,
            ext_headers,
            completed,
        }
    }

    /// The requester's endpoint.
    #[must_use]
    pub fn from_ep(&self) -> Option<&Endpoint> {
        self.from_ep.as_ref()
    }

    /// The session this transaction belongs to.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Extension headers snapshot from the request.
    #[must_use]
    pub fn ext_headers(&self) -> &[ExtHeader] {
        &self.ext_headers
    }

    /// Whether the transaction has been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn complete(&self) -> Result<(), RouterError> {
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RouterError::TransactionCompleted)
    }

    /// Send `reply` back to the requester and close the transaction.
    pub fn reply(self, mut reply: Msg) -> Result<(), RouterError> {
        self.complete()?;
        let inner = self.router.upgrade().ok_or(RouterError::NotRunning)?;

        reply.set_to(self.from_ep.clone());
        reply.set_session_id(self.session_id);
        reply.set_flag(flags::SERVER_SESSION | flags::KEEP_SESSION_ID);

        inner.sessions.complete_server(self.session_id, Some(reply.clone()));
        inner.send_internal(reply)
    }

    /// Deliver a synthetic cancellation to the requester and close the
    /// transaction.
    pub fn cancel(self) -> Result<(), RouterError> {
        self.complete()?;
        let inner = self.router.upgrade().ok_or(RouterError::NotRunning)?;
        inner.sessions.retire(self.session_id);
        send_cancel(&inner, self.from_ep.clone(), self.session_id, "cancelled by server")
    }

    /// Close the transaction silently: no message reaches the requester.
    pub fn abort(self) -> Result<(), RouterError> {
        self.complete()?;
        if let Some(inner) = self.router.upgrade() {
            inner.sessions.retire(self.session_id);
        }
        Ok(())
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        // A context discarded without reply/cancel/abort cancels the
        // transaction so the waiting client is released.
        if !self.completed.swap(true, Ordering::AcqRel) {
            if let Some(inner) = self.router.upgrade() {
                inner.sessions.retire(self.session_id);
                let _ = send_cancel(
                    &inner,
                    self.from_ep.take(),
                    self.session_id,
                    "request context dropped without completion",
                );
            }
        }
    }
}

fn send_cancel(
    inner: &Arc<RouterInner>,
    to: Option<Endpoint>,
    session_id: Uuid,
    reason: &str,
) -> Result<(), RouterError> {
    let mut cancel = Msg::from_payload(SessionCancelMsg::new(reason));
    cancel.set_to(to);
    cancel.set_session_id(session_id);
    cancel.set_flag(flags::SERVER_SESSION);
    inner.send_internal(cancel)
}
