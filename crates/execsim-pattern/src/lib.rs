//! execsim-pattern
#![deny(unsafe_code)]
//!
//! Pattern values that decide whether a command invocation (resolved path
//! plus argument vector) matches a handler registration.

/// The command string that matches every invocation.
pub const WILDCARD: &str = "*";

/// Return the last `/`-separated segment of `path`.
///
/// Works on plain strings rather than [`std::path::Path`] because resolved
/// command identifiers are opaque and never touch the filesystem.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// A matcher for command invocations.
///
/// Patterns are immutable values. Matching is always case-sensitive and
/// never does partial or substring comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matches every invocation, including those with zero arguments.
    Any,
    /// Matches when the base name of the pattern command equals the base
    /// name of the invocation's resolved path.
    Name(String),
    /// Like [`Pattern::Name`], but additionally requires every listed
    /// argument to appear somewhere in the invocation's arguments
    /// (excluding the program-name slot). Order is irrelevant and extra
    /// invocation arguments are permitted.
    NameArgs {
        /// Command string; `"*"` matches any command name.
        cmd: String,
        /// Arguments that must all be present in the invocation.
        args: Vec<String>,
    },
}

impl Pattern {
    /// Pattern that matches all invocations.
    #[must_use]
    pub fn any() -> Self {
        Self::Any
    }

    /// Pattern matching a command by name. A name of `"*"` is equivalent
    /// to [`Pattern::any`].
    pub fn name(cmd: impl Into<String>) -> Self {
        let cmd = cmd.into();
        if cmd == WILDCARD {
            Self::Any
        } else {
            Self::Name(cmd)
        }
    }

    /// Pattern matching a command by name plus a required argument set.
    pub fn with_args<I, S>(cmd: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::NameArgs {
            cmd: cmd.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Decide whether an invocation matches this pattern.
    ///
    /// `path` is the resolved command identifier; `args` is the full
    /// argument vector with the program name in slot 0.
    #[must_use]
    pub fn matches(&self, path: &str, args: &[String]) -> bool {
        match self {
            Self::Any => true,
            Self::Name(cmd) => name_matches(cmd, path),
            Self::NameArgs { cmd, args: required } => {
                name_matches(cmd, path)
                    && required
                        .iter()
                        .all(|req| args.iter().skip(1).any(|got| got == req))
            }
        }
    }
}

fn name_matches(cmd: &str, path: &str) -> bool {
    cmd == WILDCARD || base_name(cmd) == base_name(path)
}
