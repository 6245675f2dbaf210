// SPDX-License-Identifier: MIT OR Apache-2.0
//! Routes started commands to their registered handler functions.

use crate::cmd::HandlerCmd;
use execsim_pattern::{Pattern, WILDCARD};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// A command handler: receives a view of the started command and returns
/// an exit status. `0` means success; any nonzero value is reported as a
/// generic exit-status failure by `wait`.
pub type CmdHandler = Arc<dyn Fn(HandlerCmd) -> BoxFuture<'static, i32> + Send + Sync>;

/// Wrap an async closure as a [`CmdHandler`].
pub fn handler<F, Fut>(f: F) -> CmdHandler
where
    F: Fn(HandlerCmd) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = i32> + Send + 'static,
{
    Arc::new(move |cmd| Box::pin(f(cmd)))
}

struct MuxEntry {
    pattern: Pattern,
    handler: CmdHandler,
}

/// An ordered list of (pattern, handler) registrations.
///
/// Insertion order is match priority; registrations are never de-duplicated.
/// Read-only after construction and shared across all commands built from
/// the same runtime.
#[derive(Default)]
pub struct Mux {
    entries: Vec<MuxEntry>,
}

impl Mux {
    /// A mux with no registrations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registration. Earlier registrations win on overlap.
    pub fn handle(&mut self, pattern: Pattern, handler: CmdHandler) {
        self.entries.push(MuxEntry { pattern, handler });
    }

    /// Build a mux from a flat name→handler mapping.
    ///
    /// Map iteration order is unspecified, so a `"*"`-keyed entry is always
    /// relocated to the end where it cannot shadow a specific name.
    #[must_use]
    pub fn from_handlers(handlers: HashMap<String, CmdHandler>) -> Self {
        let mut mux = Self::new();
        let mut wildcard = None;
        for (name, handler) in handlers {
            if name == WILDCARD {
                wildcard = Some(handler);
            } else {
                mux.handle(Pattern::name(name), handler);
            }
        }
        if let Some(handler) = wildcard {
            mux.handle(Pattern::any(), handler);
        }
        mux
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walk the registrations in order and return the first handler whose
    /// pattern matches the invocation.
    pub(crate) fn find_handler(&self, path: &str, args: &[String]) -> Option<CmdHandler> {
        for entry in &self.entries {
            if entry.pattern.matches(path, args) {
                debug!(target: "execsim.mux", path, pattern = ?entry.pattern, "matched handler");
                return Some(entry.handler.clone());
            }
        }
        None
    }
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<&Pattern> = self.entries.iter().map(|e| &e.pattern).collect();
        f.debug_struct("Mux").field("patterns", &patterns).finish()
    }
}
