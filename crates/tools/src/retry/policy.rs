use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use pagepilot_core::config::RetryConfig;
use pagepilot_core::ActionResult;
use regex::Regex;
use tracing::{debug, info, warn};

use super::blockers::{default_strategies, BlockerHost, BlockerStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retrying cannot help (no tab, error page, routing failure).
    NonRetryable,
    /// The target element was missing; the page may be obstructed.
    NotFound,
    Other,
}

static NON_RETRYABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)no active tab|error page|unknown mcp server|malformed tool name|routing error|not an mcp tool")
        .expect("non-retryable regex is valid")
});

static NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)not found|could not find|couldn't find|no element|unable to find|no such element|no matching element")
        .expect("not-found regex is valid")
});

pub fn classify(message: &str) -> FailureClass {
    if NON_RETRYABLE.is_match(message) {
        FailureClass::NonRetryable
    } else if NOT_FOUND.is_match(message) {
        FailureClass::NotFound
    } else {
        FailureClass::Other
    }
}

type NoAlternate = fn(Vec<String>) -> std::future::Ready<ActionResult>;

#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub result: ActionResult,
    pub attempts: u32,
    /// Number of blocker dismissals applied between the attempts.
    pub dismissed: usize,
}

/// Two-attempt policy: the primary action, then at most one alternate
/// approach, with an optional blocker-dismissal pass in between.
pub struct RetryPolicy {
    host: Option<Arc<dyn BlockerHost>>,
    strategies: Vec<Box<dyn BlockerStrategy>>,
    recovery_pause: Duration,
    blocker_recovery: bool,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            host: None,
            strategies: default_strategies(),
            recovery_pause: config.recovery_pause(),
            blocker_recovery: config.enable_blocker_recovery,
        }
    }

    pub fn with_host(mut self, host: Arc<dyn BlockerHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn BlockerStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Probe the page once and apply every strategy that matches, in order.
    /// Returns the number of dismissals applied.
    pub async fn recover_environment(&self) -> usize {
        let Some(host) = self.host.as_ref().filter(|_| self.blocker_recovery) else {
            return 0;
        };
        let probe = match host.probe().await {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Blocker probe failed");
                return 0;
            }
        };
        if probe.is_empty() {
            return 0;
        }

        let mut applied = 0;
        for strategy in &self.strategies {
            let Some(action) = strategy.detect(&probe) else {
                continue;
            };
            match host.apply(&action).await {
                Ok(()) => {
                    info!(strategy = strategy.name(), ?action, "Dismissed page blocker");
                    applied += 1;
                }
                Err(e) => warn!(strategy = strategy.name(), error = %e, "Blocker dismissal failed"),
            }
        }
        applied
    }

    /// Run `primary`; on failure, classify it and possibly run `alternate`
    /// once with the accumulated error trail.
    pub async fn execute<P, A, AF>(&self, action: &str, primary: P, alternate: Option<A>) -> RetryOutcome
    where
        P: Future<Output = ActionResult>,
        A: FnOnce(Vec<String>) -> AF,
        AF: Future<Output = ActionResult>,
    {
        self.attempt(action, primary, alternate, true).await
    }

    /// Run a call that does not act on the page: no alternate attempt and no
    /// blocker recovery.
    pub async fn execute_remote<P>(&self, action: &str, primary: P) -> RetryOutcome
    where
        P: Future<Output = ActionResult>,
    {
        self.attempt(action, primary, None::<NoAlternate>, false).await
    }

    async fn attempt<P, A, AF>(&self, action: &str, primary: P, alternate: Option<A>, recover: bool) -> RetryOutcome
    where
        P: Future<Output = ActionResult>,
        A: FnOnce(Vec<String>) -> AF,
        AF: Future<Output = ActionResult>,
    {
        let first = primary.await;
        if first.success {
            return RetryOutcome {
                result: first,
                attempts: 1,
                dismissed: 0,
            };
        }

        let mut trail = vec![format!("attempt 1: {}", first.error_text())];
        let class = classify(first.error_text());
        debug!(action, ?class, error = %first.error_text(), "Action failed");

        if class == FailureClass::NonRetryable {
            return RetryOutcome {
                result: first,
                attempts: 1,
                dismissed: 0,
            };
        }

        let mut dismissed = 0;
        if recover && class == FailureClass::NotFound {
            dismissed = self.recover_environment().await;
            if dismissed > 0 {
                trail.push(format!("dismissed {} page blocker(s)", dismissed));
                tokio::time::sleep(self.recovery_pause).await;
            }
        }

        let Some(alternate) = alternate else {
            return RetryOutcome {
                result: failure_with_trail(first, &trail),
                attempts: 1,
                dismissed,
            };
        };

        info!(action, "Trying alternate approach");
        let second = alternate(trail.clone()).await;
        if second.success {
            return RetryOutcome {
                result: second,
                attempts: 2,
                dismissed,
            };
        }
        trail.push(format!("attempt 2: {}", second.error_text()));
        RetryOutcome {
            result: failure_with_trail(second, &trail),
            attempts: 2,
            dismissed,
        }
    }
}

fn failure_with_trail(mut last: ActionResult, trail: &[String]) -> ActionResult {
    let joined = trail.join("; ");
    last.error = Some(joined.clone());
    last.message = format!("{} ({})", last.message, joined);
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::blockers::{DismissAction, PageProbe, ProbeElement};
    use async_trait::async_trait;
    use pagepilot_core::Result;
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct FakeHost {
        probe: PageProbe,
        applied: Mutex<Vec<DismissAction>>,
    }

    #[async_trait]
    impl BlockerHost for FakeHost {
        async fn probe(&self) -> Result<PageProbe> {
            Ok(self.probe.clone())
        }

        async fn apply(&self, action: &DismissAction) -> Result<()> {
            self.applied.lock().unwrap().push(action.clone());
            Ok(())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&RetryConfig::default())
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("No active tab"), FailureClass::NonRetryable);
        assert_eq!(classify("Navigation landed on an error page"), FailureClass::NonRetryable);
        assert_eq!(classify("Routing error: Unknown MCP server: x"), FailureClass::NonRetryable);
        assert_eq!(classify("Button 'Submit' not found"), FailureClass::NotFound);
        assert_eq!(classify("Could not find link"), FailureClass::NotFound);
        assert_eq!(classify("Timeout waiting for page"), FailureClass::Other);
    }

    #[tokio::test]
    async fn test_success_returns_immediately() {
        let outcome = policy()
            .execute("click", async { ActionResult::ok("clicked") }, None::<NoAlternate>)
            .await;
        assert!(outcome.result.success);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_skips_alternate() {
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let outcome = policy()
            .execute(
                "click",
                async { ActionResult::failure("No active tab") },
                Some(move |_trail: Vec<String>| {
                    *flag.lock().unwrap() = true;
                    async { ActionResult::ok("never") }
                }),
            )
            .await;
        assert!(!outcome.result.success);
        assert_eq!(outcome.attempts, 1);
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_dismisses_then_pauses_before_alternate() {
        let host = Arc::new(FakeHost {
            probe: PageProbe {
                buttons: vec![ProbeElement::new("#cookie-accept", "Accept all")],
                ..Default::default()
            },
            applied: Mutex::new(Vec::new()),
        });
        let policy = policy().with_host(host.clone());

        let started = Instant::now();
        let outcome = policy
            .execute(
                "click",
                async { ActionResult::failure("Element not found: #buy") },
                Some(move |trail: Vec<String>| async move {
                    assert!(trail.iter().any(|t| t.contains("dismissed 1")));
                    ActionResult::ok(format!("clicked after {}ms", started.elapsed().as_millis()))
                }),
            )
            .await;

        assert!(outcome.result.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.dismissed, 1);
        assert!(started.elapsed() >= Duration::from_millis(800));
        assert_eq!(
            host.applied.lock().unwrap().as_slice(),
            &[DismissAction::Click { selector: "#cookie-accept".into() }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pause_without_dismissal() {
        let host = Arc::new(FakeHost {
            probe: PageProbe::default(),
            applied: Mutex::new(Vec::new()),
        });
        let started = Instant::now();
        let outcome = policy()
            .with_host(host)
            .execute(
                "click",
                async { ActionResult::failure("no such element") },
                Some(|_trail: Vec<String>| async { ActionResult::ok("ok") }),
            )
            .await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.dismissed, 0);
        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_not_found_leaves_page_alone() {
        let host = Arc::new(FakeHost {
            probe: PageProbe {
                buttons: vec![ProbeElement::new("#cookie-accept", "Accept all")],
                ..Default::default()
            },
            applied: Mutex::new(Vec::new()),
        });
        let started = Instant::now();
        let outcome = policy()
            .with_host(host.clone())
            .execute_remote("mcp_fs1_read_file", async {
                ActionResult::failure("MCP tool \"read_file\" failed: file not found: /tmp/x")
            })
            .await;

        assert!(!outcome.result.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.dismissed, 0);
        assert!(host.applied.lock().unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_millis(800));
        assert!(outcome.result.error.unwrap().contains("attempt 1: MCP tool"));
    }

    #[tokio::test]
    async fn test_both_attempts_fail_reports_trail() {
        let outcome = policy()
            .execute(
                "type_text",
                async { ActionResult::failure("Input rejected") },
                Some(|trail: Vec<String>| async move {
                    assert_eq!(trail.len(), 1);
                    ActionResult::failure("Still rejected")
                }),
            )
            .await;
        assert!(!outcome.result.success);
        assert_eq!(outcome.attempts, 2);
        let err = outcome.result.error.unwrap();
        assert!(err.contains("attempt 1: Input rejected"));
        assert!(err.contains("attempt 2: Still rejected"));
    }

    #[tokio::test]
    async fn test_no_alternate_returns_first_failure() {
        let outcome = policy()
            .execute("scroll", async { ActionResult::failure("Scroll failed") }, None::<NoAlternate>)
            .await;
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.error.unwrap().contains("attempt 1: Scroll failed"));
    }
}
