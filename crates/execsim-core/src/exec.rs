// SPDX-License-Identifier: MIT OR Apache-2.0
//! The runtime: builds simulated commands and resolves command names
//! against a registered binary allow-list.

use crate::cancel::CancelToken;
use crate::cmd::SimCmd;
use crate::error::ExecError;
use crate::mux::{CmdHandler, Mux};
use execsim_pattern::{WILDCARD, base_name};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A deterministic, in-process substitute for an OS shell.
///
/// Holds the handler router, the binary allow-list used for path
/// resolution, and the runtime-wide default environment. Immutable after
/// construction; commands built from it share the router via `Arc` and may
/// run concurrently.
#[derive(Debug)]
pub struct SimExec {
    mux: Arc<Mux>,
    bins: Vec<String>,
    envs: Arc<BTreeMap<String, String>>,
}

impl SimExec {
    /// Build a runtime around a configured router. The binary allow-list
    /// and default environment start empty.
    #[must_use]
    pub fn new(mux: Mux) -> Self {
        Self {
            mux: Arc::new(mux),
            bins: Vec::new(),
            envs: Arc::new(BTreeMap::new()),
        }
    }

    /// Build a runtime from a flat name→handler mapping.
    ///
    /// Equivalent to a router holding only exact-name patterns and at most
    /// one wildcard. The map keys double as the binary allow-list, so every
    /// mapped name resolves.
    #[must_use]
    pub fn from_handlers(handlers: HashMap<String, CmdHandler>) -> Self {
        let bins: Vec<String> = handlers.keys().cloned().collect();
        Self::new(Mux::from_handlers(handlers)).with_bins(bins)
    }

    /// Replace the binary allow-list. Entries may be bare names or
    /// separator-qualified paths; `"*"` makes every name resolvable.
    #[must_use]
    pub fn with_bins<I, S>(mut self, bins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bins = bins.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the runtime-wide default environment.
    #[must_use]
    pub fn with_envs(mut self, envs: BTreeMap<String, String>) -> Self {
        self.envs = Arc::new(envs);
        self
    }

    /// Resolve a requested name against the registered binaries.
    ///
    /// A separator-qualified name must equal a registered entry exactly
    /// (or the list must contain `"*"`). A bare name is matched against
    /// the base name of every registered entry in order, first match
    /// winning; with no match but a `"*"` entry, the bare name itself is
    /// the resolution. Never touches the filesystem.
    ///
    /// # Errors
    ///
    /// `NoSuchFile` for an unmatched qualified name, `NotFound` for an
    /// unmatched bare name; both carry the requested name.
    pub fn look_path(&self, file: &str) -> Result<String, ExecError> {
        if file.contains('/') {
            if self.bins.iter().any(|bin| bin == file) || self.has_wildcard() {
                return Ok(file.to_string());
            }
            return Err(ExecError::NoSuchFile { name: file.into() });
        }

        for bin in &self.bins {
            if bin != WILDCARD && base_name(bin) == file {
                return Ok(bin.clone());
            }
        }
        if self.has_wildcard() {
            return Ok(file.to_string());
        }
        Err(ExecError::NotFound { name: file.into() })
    }

    /// Build a simulated command for `name` with the given arguments.
    ///
    /// The requested name lands in the argument vector's program slot. A
    /// bare name is resolved immediately: success replaces the command's
    /// path, failure records a resolution error that `start` will surface.
    /// Separator-qualified names are taken verbatim.
    pub fn command<I, S>(&self, name: &str, args: I) -> SimCmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build_command(name, args, None)
    }

    /// Like [`command`](Self::command), with a cancel token attached. The
    /// token's deadline (or an explicit `cancel`) races the handler once
    /// the command starts.
    pub fn command_with_cancel<I, S>(&self, cancel: CancelToken, name: &str, args: I) -> SimCmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build_command(name, args, Some(cancel))
    }

    fn build_command<I, S>(&self, name: &str, args: I, cancel: Option<CancelToken>) -> SimCmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full_args = vec![name.to_string()];
        full_args.extend(args.into_iter().map(Into::into));

        let mut path = name.to_string();
        let mut lookup_err = None;
        if base_name(name) == name {
            match self.look_path(name) {
                Ok(resolved) => path = resolved,
                Err(err) => lookup_err = Some(err),
            }
        }

        SimCmd::new(
            self.mux.clone(),
            self.envs.clone(),
            path,
            full_args,
            lookup_err,
            cancel,
        )
    }

    /// The runtime-wide default environment, `NAME=VALUE`, sorted.
    #[must_use]
    pub fn environ(&self) -> Vec<String> {
        crate::cmd::fmt_env(&self.envs)
    }

    fn has_wildcard(&self) -> bool {
        self.bins.iter().any(|bin| bin == WILDCARD)
    }
}
