//! ---
//! rcs_section: "15-testing-qa"
//! rcs_subsection: "tests"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Subsystem-level boot, dispatch, exclusion, and terminate scenarios."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::time::Duration;

use r_rcs_control::{CommandContext, ErrorCode};
use r_rcs_fsm::Command;
use r_rcs_testharness::{AckScript, Harness};

fn ctx(secs: u64) -> CommandContext {
    CommandContext::with_timeout(Duration::from_secs(secs))
}

/// Boot with one dead application: the two healthy children come up, the
/// failed one lands in error, and the subsystem escalates with exactly
/// that name.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn boot_with_one_dead_application() {
    let harness = Harness::new("np02", &[("daq", &["app1", "app2", "app3"])]);
    harness.processes.kill("app3");
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();

    let response = daq.execute(Command::Boot, &ctx(10)).await;
    assert_eq!(response.status_code, ErrorCode::Failed);
    assert_eq!(response.failed, vec!["app3".to_owned()]);

    assert!(daq.errored());
    assert_eq!(daq.state(), "error");
    assert_eq!(daq.child("app1").unwrap().state(), "booted");
    assert_eq!(daq.child("app2").unwrap().state(), "booted");
    let app3 = daq.child("app3").unwrap();
    assert!(app3.errored());
    assert_eq!(app3.state(), "error");
}

/// A launcher that cannot boot at all fails the subsystem before any child
/// exists.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn process_manager_boot_failure_creates_no_children() {
    let harness = Harness::new("np02", &[("daq", &["app1", "app2"])]);
    harness.processes.fail_boot("daq", "ssh connection refused");
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();

    let response = daq.execute(Command::Boot, &ctx(10)).await;
    assert_eq!(response.status_code, ErrorCode::BootFailure);
    assert!(response.error[0].error.contains("ssh connection refused"));
    assert!(daq.errored());
    assert!(daq.children().is_empty());
}

/// A second boot on a subsystem that already owns children is refused
/// deterministically instead of double-launching.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn boot_is_single_flight() {
    let harness = Harness::new("np02", &[("daq", &["app1"])]);
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();

    assert!(daq.execute(Command::Boot, &ctx(10)).await.is_success());
    let second = daq.execute(Command::Boot, &ctx(10)).await;
    assert_eq!(second.status_code, ErrorCode::BootFailure);
    assert!(second.error[0].error.contains("already booted"));
    // the refusal is a rejection, not a failure of the booted subsystem
    assert_eq!(daq.state(), "booted");
}

/// Unordered configure to healthy applications completes well under the
/// deadline and drives every child through its own transition.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unordered_configure_completes_quickly() {
    let harness = Harness::new("np02", &[("daq", &["app1", "app2"])]);
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();
    daq.execute(Command::Boot, &ctx(10)).await;

    let started = tokio::time::Instant::now();
    let response = daq.execute(Command::Configure, &ctx(5)).await;
    let elapsed = started.elapsed();

    assert!(response.is_success());
    assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    assert_eq!(daq.state(), "configured");
    assert_eq!(daq.child("app1").unwrap().state(), "configured");
    assert_eq!(daq.child("app2").unwrap().state(), "configured");
}

/// A silent application fails the whole dispatch at the deadline; the
/// failure report names exactly that application and the deadline is
/// honored to within one poll interval.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_application_times_out_the_dispatch() {
    let harness = Harness::new("np02", &[("daq", &["app1"])]);
    harness
        .channels
        .script("app1", Command::Start, AckScript::Never);
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();
    daq.execute(Command::Boot, &ctx(10)).await;
    daq.execute(Command::Configure, &ctx(5)).await;

    let started = tokio::time::Instant::now();
    let response = daq
        .execute(Command::Start, &CommandContext::with_timeout(Duration::from_secs(2)))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(response.status_code, ErrorCode::Failed);
    assert_eq!(response.failed, vec!["app1".to_owned()]);
    assert_eq!(response.error[0].code, ErrorCode::Timeout);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2400), "took {elapsed:?}");
    assert!(daq.errored());
    assert!(daq.child("app1").unwrap().errored());
}

/// A failure acknowledgement from one application is aggregated without
/// discarding the sibling's real success.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_rejection_is_aggregated() {
    let harness = Harness::new("np02", &[("daq", &["app1", "app2"])]);
    harness.channels.script(
        "app2",
        Command::Configure,
        AckScript::FailAfter(Duration::from_millis(20), "bad schema".to_owned()),
    );
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();
    daq.execute(Command::Boot, &ctx(10)).await;

    let response = daq.execute(Command::Configure, &ctx(5)).await;
    assert_eq!(response.status_code, ErrorCode::Failed);
    assert_eq!(response.failed, vec!["app2".to_owned()]);
    assert!(response.error[0].error.contains("bad schema"));

    assert_eq!(daq.child("app1").unwrap().state(), "configured");
    let app2 = daq.child("app2").unwrap();
    assert!(app2.errored());
    assert!(daq.errored());
}

/// Excluded children are skipped entirely: no command, no aggregation,
/// state untouched.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn excluded_child_is_skipped() {
    let harness = Harness::new("np02", &[("daq", &["app1", "app2", "app3"])]);
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();
    daq.execute(Command::Boot, &ctx(10)).await;
    daq.execute(Command::Configure, &ctx(5)).await;
    daq.execute(Command::Start, &ctx(5)).await;

    top.set_included("daq.app2", false).unwrap();
    let response = daq.execute(Command::Stop, &ctx(5)).await;
    assert!(response.is_success());
    assert_eq!(daq.state(), "configured");

    assert_eq!(daq.child("app1").unwrap().state(), "configured");
    assert_eq!(daq.child("app3").unwrap().state(), "configured");
    let app2 = daq.child("app2").unwrap();
    assert_eq!(app2.state(), "running");
    assert_eq!(
        app2.supervisor().last_sent_command(),
        Some(Command::Start),
        "excluded child must not receive the command"
    );
}

/// Terminate cascades to every child, empties the children list, and stops
/// the listener, channels, and process manager exactly once each.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminate_tears_the_subsystem_down() {
    let harness = Harness::new("np02", &[("daq", &["app1", "app2"])]);
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();
    daq.execute(Command::Boot, &ctx(10)).await;
    let app1 = daq.child("app1").unwrap();

    let response = daq.execute(Command::Terminate, &ctx(10)).await;
    assert!(response.is_success());
    assert_eq!(daq.state(), "none");
    assert!(daq.children().is_empty());
    assert_eq!(app1.state(), "none");

    assert_eq!(harness.channels.stop_count("app1"), 1);
    assert_eq!(harness.channels.stop_count("app2"), 1);
    let manager = harness.processes.manager("daq").unwrap();
    assert_eq!(manager.terminations(), 1);
}

/// Ordered dispatch drives exactly the listed children; applications left
/// out of the sequence never see the command.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ordered_dispatch_follows_the_configured_sequence() {
    let mut harness = Harness::new("np02", &[("daq", &["app1", "app2"])]);
    harness
        .config
        .subsystems
        .get_mut("daq")
        .unwrap()
        .fsm
        .command_order
        .insert("stop".to_owned(), vec!["app2".to_owned()]);
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();
    daq.execute(Command::Boot, &ctx(10)).await;
    daq.execute(Command::Configure, &ctx(5)).await;
    daq.execute(Command::Start, &ctx(5)).await;

    let response = daq.execute(Command::Stop, &ctx(5)).await;
    assert!(response.is_success());
    assert_eq!(daq.child("app2").unwrap().state(), "configured");
    // not in the sequence: never commanded, state untouched
    assert_eq!(daq.child("app1").unwrap().state(), "running");
    assert_eq!(
        daq.child("app1").unwrap().supervisor().last_sent_command(),
        Some(Command::Start)
    );
}

/// An illegal command is rejected without touching state or the error flag.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn illegal_command_is_rejected_without_side_effects() {
    let harness = Harness::new("np02", &[("daq", &["app1"])]);
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();
    daq.execute(Command::Boot, &ctx(10)).await;

    let response = daq.execute(Command::Start, &ctx(5)).await;
    assert_eq!(response.status_code, ErrorCode::InvalidTransition);
    assert_eq!(daq.state(), "booted");
    assert!(!daq.errored());
    assert_eq!(daq.child("app1").unwrap().state(), "booted");
}

/// Errors are sticky until an explicit recovery.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_is_sticky_until_recover() {
    let harness = Harness::new("np02", &[("daq", &["app1", "app2"])]);
    harness.processes.kill("app2");
    let top = harness.top();
    let daq = top.subsystem("daq").unwrap().clone();
    daq.execute(Command::Boot, &ctx(10)).await;
    assert!(daq.errored());

    // further commands obey legality but never clear the flag
    let response = daq.execute(Command::Configure, &ctx(5)).await;
    assert_eq!(response.status_code, ErrorCode::InvalidTransition);
    assert!(daq.errored());

    top.recover("daq.app2").unwrap();
    assert!(!daq.child("app2").unwrap().errored());
    top.recover("daq").unwrap();
    assert!(!daq.errored());
    assert_eq!(daq.state(), "none");
}
