// oom_exit_test.rs
// The default policy ends the process on heap exhaustion. Each case re-runs
// this test binary as a child that drives the allocator into the fatal path;
// the parent checks the exit status and the stderr diagnostic.

use std::process::{Command, Output};

use tieralloc_core::primary::{OOM_EXIT_CODE, OOM_MESSAGE};
use tieralloc_core::{LimitedHeap, OomPolicy, PoolAllocator, PoolConfig, PrimaryAllocator, RawAlloc};

const CHILD_ENV: &str = "TIERALLOC_OOM_EXIT_CHILD";

fn in_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

fn run_child(test_name: &str) -> Output {
    let exe = std::env::current_exe().expect("test binary path");
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()
        .expect("child test process failed to start")
}

fn assert_terminated(output: &Output) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(
        output.status.code(),
        Some(OOM_EXIT_CODE),
        "unexpected exit status, stderr:\n{stderr}"
    );
    assert!(
        stderr.lines().any(|line| line == OOM_MESSAGE),
        "missing diagnostic, stderr:\n{stderr}"
    );
}

#[test]
fn pool_fatal_path_exits_child() {
    if !in_child() {
        return;
    }
    let mut pool = PoolAllocator::with_heap(LimitedHeap::with_budget(0), PoolConfig::default());
    let _ = pool.allocate(48);
    // Unreachable when the policy terminates; a zero exit fails the parent.
}

#[test]
fn pool_fatal_path_exits_with_status_one() {
    if in_child() {
        return;
    }
    let output = run_child("pool_fatal_path_exits_child");
    assert_terminated(&output);
}

#[test]
fn primary_exhaustion_exits_child() {
    if !in_child() {
        return;
    }
    let mut primary = PrimaryAllocator::new(LimitedHeap::with_budget(0), OomPolicy::default());
    let _ = primary.allocate(4096);
}

#[test]
fn primary_exhaustion_exits_with_status_one() {
    if in_child() {
        return;
    }
    let output = run_child("primary_exhaustion_exits_child");
    assert_terminated(&output);
}

#[test]
fn report_policy_keeps_process_alive() {
    let mut pool = PoolAllocator::with_heap(
        LimitedHeap::with_budget(0),
        PoolConfig::default().with_oom_policy(OomPolicy::Report),
    );
    assert!(pool.allocate(48).unwrap_err().is_out_of_memory());
}
