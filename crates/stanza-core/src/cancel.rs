//! Cooperative cancellation
//!
//! [`ExecContext`] is handed to every function invocation. It combines a
//! hierarchical [`CancelToken`], an optional deadline and the typed
//! [`Services`] (collaborators) available to functions.
//!
//! Work is bounded by racing it against [`ExecContext::done`] (see [`race`]);
//! long-running loops poll [`ExecContext::err`] on every iteration (see
//! [`poll_until`]).

use crate::error::Error;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Why a context finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    /// Cancelled explicitly (by the caller or a parent)
    Cancelled,
    /// Deadline expired
    DeadlineExceeded,
}

impl Done {
    /// Convert into an engine error, with a specific message for timeouts
    #[must_use]
    pub fn into_error(self, operation: &str, timeout_message: &str) -> Error {
        match self {
            Self::Cancelled => Error::Cancelled,
            Self::DeadlineExceeded => Error::timeout(operation, timeout_message),
        }
    }
}

impl From<Done> for Error {
    fn from(done: Done) -> Self {
        done.into_error("context", "context deadline exceeded")
    }
}

/// Hierarchical cancellation token
///
/// Cancelling a token cancels every child derived from it; cancelling a child
/// never affects its parent.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl CancelToken {
    /// Create a new root token
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Derive a child token
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut children = self.inner.children.lock();
        if self.is_cancelled() {
            child.cancel();
        } else {
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Cancel this token and all of its children
    pub fn cancel(&self) {
        // flag must be set before the children lock is taken, see `child`
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.notify.notify_waiters();
        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            Self { inner: child }.cancel();
        }
    }

    /// Check if cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Typed collaborators made available to functions
///
/// Values are looked up by type; trait objects are stored as `Arc<dyn Trait>`.
#[derive(Default)]
pub struct Services {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Services {
    /// Create empty services
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a collaborator, replacing any previous value of the same type
    pub fn insert<T: Any + Send + Sync + Clone>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Builder-style insert
    #[must_use]
    pub fn with<T: Any + Send + Sync + Clone>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Get a collaborator by type
    #[must_use]
    pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Number of registered collaborators
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no collaborators are registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Cancellable, optionally deadline-bound execution context
#[derive(Debug, Clone)]
pub struct ExecContext {
    token: CancelToken,
    deadline: Option<Instant>,
    services: Arc<Services>,
}

impl ExecContext {
    /// Create a root context without services
    #[must_use]
    pub fn new() -> Self {
        Self::with_services(Services::new())
    }

    /// Create a root context carrying collaborators
    #[must_use]
    pub fn with_services(services: Services) -> Self {
        Self {
            token: CancelToken::new(),
            deadline: None,
            services: Arc::new(services),
        }
    }

    /// Derive a child context sharing deadline and services
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child(),
            deadline: self.deadline,
            services: Arc::clone(&self.services),
        }
    }

    /// Derive a child context that expires after `timeout`
    ///
    /// The child's deadline never extends past the parent's.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let at = Instant::now() + timeout;
        let mut child = self.child();
        child.deadline = Some(self.deadline.map_or(at, |d| d.min(at)));
        child
    }

    /// Cancel this context and every context derived from it
    #[inline]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancellation token of this context
    #[inline]
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Deadline, if bounded
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Collaborators available to functions
    #[inline]
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Look up a collaborator, failing when it was not configured
    ///
    /// # Errors
    /// [`Error::OperationFailure`] naming the missing collaborator
    pub fn service<T: Any + Send + Sync + Clone>(&self, what: &str) -> Result<T, Error> {
        self.services.get::<T>().ok_or_else(|| {
            Error::operation(
                format!("Failed to get {what}"),
                format!("no {what} configured for this run"),
            )
        })
    }

    /// Non-blocking check: why the context is finished, if it is
    #[must_use]
    pub fn err(&self) -> Option<Done> {
        if self.token.is_cancelled() {
            Some(Done::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Done::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Fail fast if the context is finished
    ///
    /// # Errors
    /// [`Error::Cancelled`] or a generic deadline [`Error::OperationTimeout`]
    #[inline]
    pub fn check(&self) -> Result<(), Error> {
        match self.err() {
            Some(done) => Err(done.into()),
            None => Ok(()),
        }
    }

    /// Resolve when the context is cancelled or its deadline passes
    pub async fn done(&self) -> Done {
        let expiry = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => Done::Cancelled,
            () = expiry => Done::DeadlineExceeded,
        }
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Race `work` against the context
///
/// Returns `Err(done)` if the context finished first; in that case the
/// context is cancelled so that anything derived from it stops too, and the
/// in-flight future is dropped.
pub async fn race<T, Fut>(ctx: &ExecContext, work: Fut) -> Result<T, Done>
where
    Fut: Future<Output = T>,
{
    tokio::select! {
        out = work => Ok(out),
        done = ctx.done() => {
            ctx.cancel();
            Err(done)
        }
    }
}

/// Poll `check` until it reports readiness
///
/// The context is consulted before every attempt and while sleeping between
/// attempts, so the loop exits as soon as the context finishes.
///
/// # Errors
/// - Whatever `check` returns
/// - [`Error::Cancelled`] / [`Error::OperationTimeout`] when the context ends
pub async fn poll_until<F, Fut>(ctx: &ExecContext, interval: Duration, mut check: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    loop {
        ctx.check()?;
        if check().await? {
            return Ok(());
        }
        tokio::select! {
            done = ctx.done() => return Err(done.into()),
            () = tokio::time::sleep(interval) => {}
        }
    }
}
