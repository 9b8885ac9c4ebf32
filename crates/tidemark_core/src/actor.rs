//! Actor and clock seams consumed by audit stamping.
//!
//! # Responsibility
//! - Resolve the acting principal's name for provenance fields.
//! - Provide the wall clock used for audit timestamps.
//!
//! # Invariants
//! - A missing or blank principal resolves to [`ANONYMOUS_ACTOR`].
//! - Timestamps are epoch milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Actor name used when no principal is available.
pub const ANONYMOUS_ACTOR: &str = "Anonymous";

/// Accessor for the identity performing the current operation.
pub trait PrincipalAccessor: Send + Sync {
    fn current_actor_name(&self) -> Option<String>;
}

/// Principal accessor that never resolves a principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousPrincipal;

impl PrincipalAccessor for AnonymousPrincipal {
    fn current_actor_name(&self) -> Option<String> {
        None
    }
}

/// Principal accessor bound to one fixed actor name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPrincipal {
    name: String,
}

impl FixedPrincipal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PrincipalAccessor for FixedPrincipal {
    fn current_actor_name(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// Resolves the actor name, falling back to [`ANONYMOUS_ACTOR`].
pub fn resolve_actor_name(principal: &dyn PrincipalAccessor) -> String {
    principal
        .current_actor_name()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| ANONYMOUS_ACTOR.to_string())
}

/// Time source for audit stamps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as i64)
    }
}

/// Clock frozen at one instant; used for replay and deterministic checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0
    }
}
