//! Scheduling contexts
//!
//! A [`SchedulingContext`] identifies the cooperative scheduling unit a scan
//! runs in (normally one tokio runtime per job). Transport resources such as
//! the HTTP connection pool are bound to the context that created them: hyper
//! drives pooled connections from background tasks on that runtime, so a pool
//! must never be reused once its runtime is gone.
//!
//! The context is ambient: [`SchedulingContext::scope`] installs it for a
//! future, and [`SchedulingContext::current`] reads it back from inside that
//! future. Tasks spawned from within a scope do not inherit it automatically;
//! the orchestrator re-installs it on every probe task it spawns.
//!
//! Callers that never install a context share the implicit one of their
//! runtime, see [`SchedulingContext::for_runtime`].

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::runtime::{Handle, Id as RuntimeId};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Implicit contexts, one per live runtime
static RUNTIME_CONTEXTS: Lazy<Mutex<HashMap<RuntimeId, ContextWatch>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

tokio::task_local! {
    static CURRENT: SchedulingContext;
}

/// Identity of a scheduling context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Debug)]
struct Liveness;

/// Handle to one scheduling context; clones share identity and liveness
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    id: ContextId,
    alive: Arc<Liveness>,
}

impl SchedulingContext {
    /// Create a context with a fresh identity
    pub fn new() -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            alive: Arc::new(Liveness),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The context installed for the running task, if any
    pub fn current() -> Option<SchedulingContext> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    /// The implicit context of the runtime driving the caller
    ///
    /// Every call on the same runtime returns the same context. A task parked
    /// on that runtime holds it, so the context ends when the runtime shuts
    /// down and a later runtime gets a fresh one. `None` outside a runtime.
    pub fn for_runtime() -> Option<SchedulingContext> {
        let handle = Handle::try_current().ok()?;
        let runtime_id = handle.id();

        let mut contexts = RUNTIME_CONTEXTS
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(ctx) = contexts.get(&runtime_id).and_then(ContextWatch::upgrade) {
            return Some(ctx);
        }

        contexts.retain(|_, watch| !watch.has_ended());
        let ctx = SchedulingContext::new();
        contexts.insert(runtime_id, ctx.watch());

        let held = ctx.clone();
        handle.spawn(async move {
            let _held = held;
            futures::future::pending::<()>().await
        });
        log::debug!("Runtime {} bound to {}", runtime_id, ctx.id());

        Some(ctx)
    }

    /// Run `fut` with this context installed
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// Weak marker that stops resolving once every clone is dropped
    pub fn watch(&self) -> ContextWatch {
        ContextWatch {
            id: self.id,
            alive: Arc::downgrade(&self.alive),
        }
    }
}

impl Default for SchedulingContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning observer of a context, kept next to resources bound to it
#[derive(Debug, Clone)]
pub struct ContextWatch {
    id: ContextId,
    alive: Weak<Liveness>,
}

impl ContextWatch {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// True once every handle to the watched context has been dropped
    pub fn has_ended(&self) -> bool {
        self.alive.strong_count() == 0
    }

    /// Handle to the watched context while it is still alive
    pub fn upgrade(&self) -> Option<SchedulingContext> {
        self.alive.upgrade().map(|alive| SchedulingContext { id: self.id, alive })
    }

    /// Whether resources bound to the watched context may serve `ctx`
    pub fn is_current(&self, ctx: &SchedulingContext) -> bool {
        self.id == ctx.id && !self.has_ended()
    }
}
