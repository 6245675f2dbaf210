//! execsim-core
#![deny(unsafe_code)]
//!
//! A deterministic, in-process substitute for external-process execution.
//!
//! Code that shells out to subprocesses can be unit-tested against this
//! runtime without touching a real OS shell: commands resolve through an
//! in-memory binary allow-list, dispatch through a pattern [`Mux`] to
//! registered in-process handlers, and reproduce the observable lifecycle
//! contract of a real process — start, concurrent execution, cancellation,
//! wait, exit-code propagation, piped I/O.
//!
//! ```no_run
//! use execsim_core::{handler, Mux, Pattern, SimExec};
//! use std::io::Write;
//!
//! # async fn demo() -> Result<(), execsim_core::ExecError> {
//! let mut mux = Mux::new();
//! mux.handle(
//!     Pattern::with_args("git", ["status"]),
//!     handler(|cmd| async move {
//!         let _ = cmd.stdout().write_all(b"clean\n");
//!         0
//!     }),
//! );
//!
//! let exec = SimExec::new(mux).with_bins(["/usr/bin/git"]);
//! let mut cmd = exec.command("git", ["status"]);
//! let out = cmd.combined_output().await?;
//! assert_eq!(out, b"clean\n");
//! # Ok(())
//! # }
//! ```

mod cancel;
mod cmd;
mod error;
mod exec;
mod io;
mod mux;

pub use cancel::{CancelReason, CancelToken};
pub use cmd::{HandlerCmd, PID_MAX, ProcessHandle, ProcessState, SimCmd};
pub use error::ExecError;
pub use exec::SimExec;
pub use io::IoChannel;
pub use mux::{CmdHandler, Mux, handler};

pub use execsim_pattern::{Pattern, WILDCARD, base_name};
