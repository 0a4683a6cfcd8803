//! Per-request context.
//!
//! A context is created by the outermost filter of each handler graph and
//! released when the request completes, on every path: success, error,
//! timeout, client disconnect or panic. Releasing it cancels its token, which
//! is the single cancellation signal every inner stage observes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::security::user::UserInfo;

#[derive(Debug, Clone)]
pub struct RequestContext {
    id: Uuid,
    user: Option<UserInfo>,
    cancellation: CancellationToken,
    started: Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            user: None,
            cancellation: CancellationToken::new(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Set once authentication succeeds.
    pub fn user(&self) -> Option<&UserInfo> {
        self.user.as_ref()
    }

    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = Some(user);
        self
    }

    /// A handle on the request's cancellation signal.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Lookup of the contexts of in-flight requests.
#[derive(Debug, Default)]
pub struct RequestContextMapper {
    contexts: DashMap<Uuid, RequestContext>,
}

impl RequestContextMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<RequestContext> {
        self.contexts.get(&id).map(|entry| entry.value().clone())
    }

    /// Replace a bound context. Returns false when the request already completed.
    pub fn update(&self, context: &RequestContext) -> bool {
        match self.contexts.get_mut(&context.id) {
            Some(mut entry) => {
                *entry = context.clone();
                true
            }
            None => false,
        }
    }

    /// Track `context` until the returned guard is dropped.
    pub fn bind(self: &Arc<Self>, context: RequestContext) -> ContextGuard {
        let guard = ContextGuard {
            mapper: Arc::clone(self),
            id: context.id,
            cancellation: context.cancellation.clone(),
        };
        self.contexts.insert(context.id, context);
        guard
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Releases a bound context: unregisters it and cancels its token.
#[derive(Debug)]
pub struct ContextGuard {
    mapper: Arc<RequestContextMapper>,
    id: Uuid,
    cancellation: CancellationToken,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.mapper.contexts.remove(&self.id);
        self.cancellation.cancel();
    }
}
