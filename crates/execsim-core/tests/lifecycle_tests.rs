// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the simulated command lifecycle.

use execsim_core::{CmdHandler, ExecError, Mux, Pattern, SimExec, handler};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn exec_with(pattern: Pattern, h: execsim_core::CmdHandler) -> SimExec {
    let mut mux = Mux::new();
    mux.handle(pattern, h);
    SimExec::new(mux).with_bins(["*"])
}

fn succeed() -> execsim_core::CmdHandler {
    handler(|_| async { 0 })
}

// ─── start ──────────────────────────────────────────────────────────

#[tokio::test]
async fn start_runs_the_matched_handler() {
    let exec = exec_with(
        Pattern::name("test"),
        handler(|cmd| async move {
            let _ = cmd.stdout().write_all(b"test was run");
            0
        }),
    );

    let mut cmd = exec.command("test", Vec::<String>::new());
    let mut out = cmd.stdout_pipe().expect("install stdout pipe");
    cmd.start().expect("start");
    assert!(cmd.handle().is_some());
    assert_ne!(cmd.handle().unwrap().pid(), 0);

    cmd.wait().await.expect("wait");
    let mut got = String::new();
    out.read_to_string(&mut got).unwrap();
    assert_eq!(got, "test was run");
}

#[tokio::test]
async fn start_twice_reports_already_started_and_keeps_the_handle() {
    let exec = exec_with(Pattern::name("test"), succeed());
    let mut cmd = exec.command("test", Vec::<String>::new());

    cmd.start().expect("first start");
    let first = cmd.handle().expect("handle after start");

    assert_eq!(cmd.start(), Err(ExecError::AlreadyStarted));
    assert_eq!(cmd.handle(), Some(first));

    cmd.wait().await.expect("wait");
}

#[tokio::test]
async fn start_with_empty_path_reports_no_command() {
    let exec = exec_with(Pattern::any(), succeed());
    let mut cmd = exec.command("", Vec::<String>::new());
    assert_eq!(cmd.start(), Err(ExecError::NoCommand));
    assert!(cmd.handle().is_none());
}

#[tokio::test]
async fn start_surfaces_the_recorded_resolution_error() {
    let exec = SimExec::new(Mux::new()).with_bins(["ls"]);
    let mut cmd = exec.command("git", ["status"]);

    assert!(matches!(
        cmd.lookup_err(),
        Some(ExecError::NotFound { .. })
    ));
    assert_eq!(
        cmd.start(),
        Err(ExecError::NotFound { name: "git".into() })
    );
    assert!(cmd.handle().is_none());
}

// ─── wait ───────────────────────────────────────────────────────────

#[tokio::test]
async fn wait_before_start_reports_not_started() {
    let exec = exec_with(Pattern::name("test"), succeed());
    let mut cmd = exec.command("test", Vec::<String>::new());
    assert_eq!(cmd.wait().await, Err(ExecError::NotStarted));
}

#[tokio::test]
async fn double_wait_fails_and_preserves_the_first_state() {
    let exec = exec_with(Pattern::name("test"), succeed());
    let mut cmd = exec.command("test", Vec::<String>::new());

    cmd.run().await.expect("run");
    let state = cmd.state().expect("state after wait");
    assert!(state.success());

    assert_eq!(cmd.wait().await, Err(ExecError::WaitAlreadyCalled));
    assert_eq!(cmd.state(), Some(state));
}

#[tokio::test]
async fn nonzero_handler_status_becomes_an_exit_status_error() {
    let exec = exec_with(Pattern::name("fail"), handler(|_| async { 3 }));
    let mut cmd = exec.command("fail", Vec::<String>::new());

    assert_eq!(cmd.run().await, Err(ExecError::exit_status(3)));
    let state = cmd.state().expect("state recorded");
    assert_eq!(state.code(), Some(3));
    assert!(!state.success());
}

#[tokio::test]
async fn unmatched_command_starts_but_wait_reports_exit_status_one() {
    let ran = Arc::new(AtomicBool::new(false));
    let saw = ran.clone();
    let exec = exec_with(
        Pattern::name("other"),
        handler(move |_| {
            let saw = saw.clone();
            async move {
                saw.store(true, Ordering::SeqCst);
                0
            }
        }),
    );

    let mut cmd = exec.command("test", Vec::<String>::new());
    cmd.start().expect("start succeeds with no handler");
    assert!(cmd.handle().is_some());

    assert_eq!(cmd.wait().await, Err(ExecError::exit_status(1)));
    assert!(!ran.load(Ordering::SeqCst), "no handler may run");
}

// ─── run ────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_short_circuits_on_start_failure() {
    let exec = SimExec::new(Mux::new()).with_bins(["ls"]);
    let mut cmd = exec.command("git", Vec::<String>::new());
    assert_eq!(
        cmd.run().await,
        Err(ExecError::NotFound { name: "git".into() })
    );
    assert!(cmd.state().is_none());
}

#[tokio::test]
async fn handler_sees_the_invocation_identity() {
    let exec = exec_with(
        Pattern::name("deploy"),
        handler(|cmd| async move {
            if cmd.path() != "deploy" {
                return 1;
            }
            if cmd.args() != ["deploy", "--env", "prod"] {
                return 2;
            }
            if cmd.dir() != Some("/work") {
                return 3;
            }
            if !cmd.environ().contains(&"REGION=us-east-1".to_string()) {
                return 4;
            }
            0
        }),
    );

    let mut cmd = exec.command("deploy", ["--env", "prod"]);
    cmd.set_dir("/work");
    cmd.set_env(["REGION=us-east-1"]);
    cmd.run().await.expect("handler saw expected identity");
}

// ─── construction from a flat mapping ───────────────────────────────

#[tokio::test]
async fn from_handlers_routes_and_resolves_mapped_names() {
    let mut handlers: HashMap<String, CmdHandler> = HashMap::new();
    handlers.insert("git".into(), handler(|_| async { 0 }));
    handlers.insert("*".into(), handler(|_| async { 7 }));
    let exec = SimExec::from_handlers(handlers);

    // The specific name wins over the wildcard even though map iteration
    // order is unspecified.
    let mut git = exec.command("git", Vec::<String>::new());
    git.run().await.expect("git maps to the zero-status handler");

    // The wildcard key doubles as a wildcard binary, so unmapped names
    // still resolve and land on the fallback handler.
    let mut other = exec.command("anything", Vec::<String>::new());
    assert_eq!(other.run().await, Err(ExecError::exit_status(7)));
}

// ─── environment ────────────────────────────────────────────────────

#[test]
fn env_round_trips_sorted_and_deduplicated() {
    let exec = SimExec::new(Mux::new()).with_bins(["*"]);
    let mut cmd = exec.command("test", Vec::<String>::new());

    cmd.set_env(["TEST_B=two", "TEST_A=1", "EMPTY=", "DOUBLE=one=1", "BARE"]);
    assert_eq!(
        cmd.env(),
        ["BARE=", "DOUBLE=one=1", "EMPTY=", "TEST_A=1", "TEST_B=two"]
    );

    cmd.set_env(["K=1", "K=2"]);
    assert_eq!(cmd.env(), ["K=2"]);
}

#[test]
fn environ_overlays_overrides_onto_runtime_defaults() {
    let mut envs = std::collections::BTreeMap::new();
    envs.insert("TEST".to_string(), "true".to_string());
    envs.insert("DEBUG".to_string(), "false".to_string());
    envs.insert("EXEC".to_string(), "10".to_string());
    let exec = SimExec::new(Mux::new()).with_bins(["*"]).with_envs(envs);

    let cmd = exec.command("test", Vec::<String>::new());
    assert_eq!(cmd.environ(), ["DEBUG=false", "EXEC=10", "TEST=true"]);
    assert!(cmd.env().is_empty());

    let mut cmd = exec.command("test", Vec::<String>::new());
    cmd.set_env(["TEST=false", "EXEC=15"]);
    assert_eq!(cmd.environ(), ["DEBUG=false", "EXEC=15", "TEST=false"]);
}

// ─── rendering ──────────────────────────────────────────────────────

#[test]
fn display_renders_the_resolved_path_and_args() {
    let exec = SimExec::new(Mux::new()).with_bins(["/usr/bin/git"]);
    let cmd = exec.command("git", ["status", "--short"]);
    assert_eq!(cmd.to_string(), "/usr/bin/git status --short");
}

#[test]
fn display_falls_back_to_raw_args_on_resolution_failure() {
    let exec = SimExec::new(Mux::new()).with_bins(["ls"]);
    let cmd = exec.command("git", ["status"]);
    assert_eq!(cmd.to_string(), "git status");
}
