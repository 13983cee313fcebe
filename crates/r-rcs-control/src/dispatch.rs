//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Multicommand dispatch: fan-out, collection, and failure aggregation."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use r_rcs_fsm::Command;

use crate::command::{CommandContext, CommandResponse, ErrorCode, FailureDetail};
use crate::ControlError;

/// Cadence of the collector loop's non-blocking acknowledgement checks.
/// Kept short relative to typical application response latency so overall
/// completion tracks the slowest child, not the poll grid.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One child's resolved acknowledgement, normalized across node kinds.
#[derive(Debug, Clone)]
pub struct AckOutcome {
    /// Whether the child reported success.
    pub success: bool,
    /// Failure classification (`Success` on success).
    pub code: ErrorCode,
    /// Human-readable detail.
    pub detail: String,
}

impl AckOutcome {
    /// Fold a child's aggregate response into an outcome.
    pub fn from_response(response: &CommandResponse) -> Self {
        Self {
            success: response.is_success(),
            code: response.status_code,
            detail: response.summary(),
        }
    }
}

/// A child a multicommand can be fanned out to. Implementations are cheap
/// clone-able handles; application and subsystem nodes both qualify, which
/// is what lets the top node reuse the exact same dispatch loop one level
/// up.
#[async_trait]
pub trait DispatchTarget: Send + Sync {
    /// Child name, unique within the dispatching parent.
    fn target_name(&self) -> String;

    /// Whether the child currently participates in dispatches. Excluded
    /// children are skipped entirely: they receive no command and never
    /// appear in the outstanding set or the failure aggregation.
    fn is_included(&self) -> bool;

    /// Begin the command without waiting for completion (fire-and-forget
    /// at the child level). A failed acknowledgement is *not* an error
    /// here; it surfaces later through [`DispatchTarget::poll_outcome`].
    async fn dispatch_send(&self, command: Command, ctx: &CommandContext)
        -> Result<(), ControlError>;

    /// Non-blocking completion check. `Some` resolves the child and removes
    /// it from the outstanding set; a child reporting failure here has
    /// already routed itself to its error state.
    fn poll_outcome(&self, command: Command) -> Option<AckOutcome>;

    /// Ordered-mode path: send and block until acknowledgement or
    /// `deadline`. Remote failures resolve to a failed outcome; only
    /// timeouts and transport errors surface as `Err`.
    async fn dispatch_send_wait(
        &self,
        command: Command,
        ctx: &CommandContext,
        deadline: Duration,
    ) -> Result<AckOutcome, ControlError>;

    /// Complete the forward transition after a successful acknowledgement.
    fn complete(&self, command: Command);

    /// Record a dispatch-level failure (send error, deadline expiry) on the
    /// child, routing it to its error state.
    fn fail(&self, command: Command, detail: &FailureDetail);
}

/// Fan one command out to `targets` and fold the individual outcomes into
/// the list of failed children (empty on full success).
///
/// With `order` unset every included child is sent the command up front,
/// then a single collector loop polls the outstanding set at
/// [`POLL_INTERVAL`] until it drains or `ctx.timeout` (measured from
/// dispatch start) elapses; no child's completion blocks another's. With
/// `order` set, children are driven strictly one at a time in the listed
/// sequence, each synchronously against the remaining deadline.
///
/// Deadline expiry fails the dispatch as a whole: every still-outstanding
/// child is reported as timed out and routed to error, while children that
/// resolved in time keep their real outcomes.
pub async fn run_multicommand<T: DispatchTarget>(
    parent: &str,
    targets: &[T],
    command: Command,
    ctx: &CommandContext,
    order: Option<&[String]>,
) -> Vec<FailureDetail> {
    match order {
        None => dispatch_unordered(parent, targets, command, ctx).await,
        Some(sequence) => dispatch_ordered(parent, targets, command, ctx, sequence).await,
    }
}

async fn dispatch_unordered<T: DispatchTarget>(
    parent: &str,
    targets: &[T],
    command: Command,
    ctx: &CommandContext,
) -> Vec<FailureDetail> {
    let mut failed: Vec<FailureDetail> = Vec::new();
    let mut outstanding: IndexMap<String, &T> = IndexMap::new();

    // send phase: every included child is issued the command before any
    // completion is awaited
    for target in targets.iter().filter(|t| t.is_included()) {
        let name = target.target_name();
        match target.dispatch_send(command, ctx).await {
            Ok(()) => {
                outstanding.insert(name, target);
            }
            Err(err) => {
                let detail = FailureDetail::from_error(&name, command, &err);
                debug!(parent, node = %name, command = %command, error = %err, "send failed");
                if detail.code != ErrorCode::InvalidTransition {
                    target.fail(command, &detail);
                }
                failed.push(detail);
            }
        }
    }

    let start = Instant::now();
    while !outstanding.is_empty() {
        let mut done: Vec<String> = Vec::new();
        for (name, target) in &outstanding {
            let Some(outcome) = target.poll_outcome(command) else {
                continue;
            };
            done.push(name.clone());
            if outcome.success {
                target.complete(command);
            } else {
                failed.push(FailureDetail {
                    node: name.clone(),
                    command,
                    code: outcome.code,
                    error: outcome.detail,
                });
            }
        }
        for name in done {
            outstanding.shift_remove(&name);
        }
        if outstanding.is_empty() {
            break;
        }
        if start.elapsed() >= ctx.timeout {
            warn!(
                parent,
                command = %command,
                outstanding = ?outstanding.keys().collect::<Vec<_>>(),
                timeout = ?ctx.timeout,
                "multicommand deadline elapsed"
            );
            for (name, target) in &outstanding {
                let detail = FailureDetail {
                    node: name.clone(),
                    command,
                    code: ErrorCode::Timeout,
                    error: format!("no acknowledgement within {:?}", ctx.timeout),
                };
                target.fail(command, &detail);
                failed.push(detail);
            }
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    failed
}

async fn dispatch_ordered<T: DispatchTarget>(
    parent: &str,
    targets: &[T],
    command: Command,
    ctx: &CommandContext,
    sequence: &[String],
) -> Vec<FailureDetail> {
    let mut failed: Vec<FailureDetail> = Vec::new();
    let start = Instant::now();

    for name in sequence {
        let Some(target) = targets.iter().find(|t| &t.target_name() == name) else {
            warn!(parent, node = %name, command = %command, "ordered sequence names unknown child");
            continue;
        };
        if !target.is_included() {
            continue;
        }
        let remaining = ctx.timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            let detail = FailureDetail {
                node: name.clone(),
                command,
                code: ErrorCode::Timeout,
                error: format!("ordered dispatch deadline {:?} already elapsed", ctx.timeout),
            };
            target.fail(command, &detail);
            failed.push(detail);
            continue;
        }
        match target.dispatch_send_wait(command, ctx, remaining).await {
            Ok(outcome) if outcome.success => target.complete(command),
            Ok(outcome) => {
                failed.push(FailureDetail {
                    node: name.clone(),
                    command,
                    code: outcome.code,
                    error: outcome.detail,
                });
            }
            Err(err) => {
                let detail = FailureDetail::from_error(name.clone(), command, &err);
                if detail.code != ErrorCode::InvalidTransition {
                    target.fail(command, &detail);
                }
                failed.push(detail);
            }
        }
    }

    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Script {
        included: bool,
        acks_after_polls: Option<(u32, bool)>,
        sent: Vec<Command>,
        completed: Vec<Command>,
        failures: Vec<FailureDetail>,
        polls: u32,
    }

    #[derive(Debug, Clone)]
    struct FakeChild {
        name: String,
        script: Arc<Mutex<Script>>,
    }

    impl FakeChild {
        fn new(name: &str, acks_after_polls: Option<(u32, bool)>) -> Self {
            Self {
                name: name.to_owned(),
                script: Arc::new(Mutex::new(Script {
                    included: true,
                    acks_after_polls,
                    ..Script::default()
                })),
            }
        }

        fn excluded(name: &str) -> Self {
            let child = Self::new(name, Some((0, true)));
            child.script.lock().included = false;
            child
        }
    }

    #[async_trait]
    impl DispatchTarget for FakeChild {
        fn target_name(&self) -> String {
            self.name.clone()
        }

        fn is_included(&self) -> bool {
            self.script.lock().included
        }

        async fn dispatch_send(
            &self,
            command: Command,
            _ctx: &CommandContext,
        ) -> Result<(), ControlError> {
            self.script.lock().sent.push(command);
            Ok(())
        }

        fn poll_outcome(&self, _command: Command) -> Option<AckOutcome> {
            let mut script = self.script.lock();
            script.polls += 1;
            let (after, success) = script.acks_after_polls?;
            if script.polls <= after {
                return None;
            }
            Some(AckOutcome {
                success,
                code: if success { ErrorCode::Success } else { ErrorCode::Failed },
                detail: "scripted".to_owned(),
            })
        }

        async fn dispatch_send_wait(
            &self,
            command: Command,
            _ctx: &CommandContext,
            _deadline: Duration,
        ) -> Result<AckOutcome, ControlError> {
            let mut script = self.script.lock();
            script.sent.push(command);
            let (_, success) = script.acks_after_polls.unwrap_or((0, true));
            Ok(AckOutcome {
                success,
                code: if success { ErrorCode::Success } else { ErrorCode::Failed },
                detail: "scripted".to_owned(),
            })
        }

        fn complete(&self, command: Command) {
            self.script.lock().completed.push(command);
        }

        fn fail(&self, _command: Command, detail: &FailureDetail) {
            self.script.lock().failures.push(detail.clone());
        }
    }

    #[tokio::test]
    async fn unordered_sends_before_collecting() {
        let children = vec![
            FakeChild::new("a", Some((0, true))),
            FakeChild::new("b", Some((1, true))),
        ];
        let ctx = CommandContext::with_timeout(Duration::from_secs(5));
        let failed =
            run_multicommand("parent", &children, Command::Configure, &ctx, None).await;
        assert!(failed.is_empty());
        for child in &children {
            let script = child.script.lock();
            assert_eq!(script.sent, vec![Command::Configure]);
            assert_eq!(script.completed, vec![Command::Configure]);
        }
    }

    #[tokio::test]
    async fn excluded_children_are_skipped_entirely() {
        let children = vec![
            FakeChild::new("a", Some((0, true))),
            FakeChild::excluded("b"),
        ];
        let ctx = CommandContext::with_timeout(Duration::from_secs(5));
        let failed = run_multicommand("parent", &children, Command::Stop, &ctx, None).await;
        assert!(failed.is_empty());
        let excluded = children[1].script.lock();
        assert!(excluded.sent.is_empty());
        assert_eq!(excluded.polls, 0);
    }

    #[tokio::test]
    async fn timeout_names_exactly_the_silent_child() {
        let children = vec![
            FakeChild::new("fast", Some((0, true))),
            FakeChild::new("silent", None),
        ];
        let ctx = CommandContext::with_timeout(Duration::from_millis(350));
        let started = Instant::now();
        let failed = run_multicommand("parent", &children, Command::Start, &ctx, None).await;
        let elapsed = started.elapsed();

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].node, "silent");
        assert_eq!(failed[0].code, ErrorCode::Timeout);
        // fast child resolved on its real outcome, not a forged one
        assert_eq!(children[0].script.lock().completed, vec![Command::Start]);
        assert_eq!(children[1].script.lock().failures.len(), 1);
        // deadline honored within one poll interval
        assert!(elapsed >= Duration::from_millis(350));
        assert!(elapsed < Duration::from_millis(350) + POLL_INTERVAL * 2);
    }

    #[tokio::test]
    async fn failed_ack_is_recorded_without_dispatch_level_fail() {
        let children = vec![FakeChild::new("bad", Some((0, false)))];
        let ctx = CommandContext::with_timeout(Duration::from_secs(5));
        let failed = run_multicommand("parent", &children, Command::Configure, &ctx, None).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].code, ErrorCode::Failed);
        let script = children[0].script.lock();
        assert!(script.completed.is_empty());
        // the child routed itself to error when it produced the outcome
        assert!(script.failures.is_empty());
    }

    #[tokio::test]
    async fn ordered_mode_respects_the_sequence() {
        let children = vec![
            FakeChild::new("a", Some((0, true))),
            FakeChild::new("b", Some((0, true))),
        ];
        let ctx = CommandContext::with_timeout(Duration::from_secs(5));
        let sequence = vec!["b".to_owned(), "a".to_owned()];
        let failed =
            run_multicommand("parent", &children, Command::Stop, &ctx, Some(&sequence)).await;
        assert!(failed.is_empty());
        assert_eq!(children[0].script.lock().completed, vec![Command::Stop]);
        assert_eq!(children[1].script.lock().completed, vec![Command::Stop]);
    }
}
