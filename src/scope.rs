//! Scoped driver execution
//!
//! Brackets a test body with `create_driver` and `cleanup_driver`. Cleanup
//! runs on every way out of the body: success, error, panic and timeout.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::context::TestRunContext;
use crate::driver::TestDriver;
use crate::{Error, Result};

/// Result of a scoped run
#[derive(Debug)]
pub struct ScopeOutcome<T> {
    /// Outcome of driver creation and the test body
    pub result: Result<T>,
    /// Failures while removing the driver; never override `result`
    pub teardown_errors: Vec<Error>,
    /// Wall time from creation to the end of cleanup
    pub duration: Duration,
}

impl<T> ScopeOutcome<T> {
    /// True when the body succeeded and cleanup left nothing behind
    pub fn is_clean(&self) -> bool {
        self.result.is_ok() && self.teardown_errors.is_empty()
    }

    /// Drop teardown errors and keep the body's result
    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// Run `body` against a freshly created driver, then clean the driver up
///
/// `timeout` bounds the body only. A panic in the body is re-raised after
/// cleanup has finished.
pub async fn run_scoped<T, F>(
    driver: &mut dyn TestDriver,
    ctx: &TestRunContext,
    timeout: Duration,
    body: F,
) -> ScopeOutcome<T>
where
    F: for<'a> FnOnce(&'a dyn TestDriver, &'a TestRunContext) -> BoxFuture<'a, Result<T>>,
{
    let start = Instant::now();
    let name = driver.driver_info().name.clone();

    let mut panic = None;
    let result = match driver.create_driver(ctx).await {
        Err(e) => {
            error!(driver = %name, error = %e, "driver creation failed");
            Err(e)
        }
        Ok(()) => {
            let run = tokio::time::timeout(timeout, body(&*driver, ctx));
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::internal_with_context(
                    "scope",
                    format!("test body for driver {} timed out after {:?}", name, timeout),
                )),
                Err(payload) => {
                    error!(driver = %name, "test body panicked");
                    panic = Some(payload);
                    Err(Error::internal_with_context("scope", "test body panicked"))
                }
            }
        }
    };

    let teardown_errors = driver.cleanup_driver().await;
    for e in &teardown_errors {
        warn!(driver = %name, error = %e, "cleanup error");
    }

    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }

    let duration = start.elapsed();
    info!(
        driver = %name,
        ok = result.is_ok(),
        teardown_errors = teardown_errors.len(),
        duration_secs = duration.as_secs_f64(),
        "scoped run finished"
    );
    ScopeOutcome {
        result,
        teardown_errors,
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{LifecycleState, ManifestDriver};
    use crate::node::{FirstNodeSelector, MockNodeInventory, NodeResolver};
    use crate::testing::{api_error, hostpath};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn driver(f: &hostpath::Fixture, nodes: &'static [&'static str]) -> ManifestDriver {
        let mut inventory = MockNodeInventory::new();
        inventory
            .expect_schedulable_nodes()
            .returning(move || Ok(nodes.iter().map(|n| n.to_string()).collect()));
        let resolver = NodeResolver::new(Arc::new(inventory), Arc::new(FirstNodeSelector));
        ManifestDriver::new(f.bundle.clone(), f.materializer.clone(), resolver)
    }

    fn ctx() -> TestRunContext {
        TestRunContext::with_names("csi-5678", "csi-5678")
    }

    // ==========================================================================
    // Story: cleanup runs on every exit path
    // ==========================================================================

    #[tokio::test]
    async fn story_body_sees_a_deployed_driver_and_cleanup_follows() {
        let f = hostpath::fixture();
        let mut driver = driver(&f, &["node-1"]);
        let store = f.store.clone();

        let outcome = run_scoped(&mut driver, &ctx(), TIMEOUT, |d, ctx| {
            async move {
                assert_eq!(d.state(), LifecycleState::Deployed);
                d.as_dynamic_pv()
                    .unwrap()
                    .dynamic_provision_storage_class(ctx, "")
                    .map(|sc| sc.provisioner)
            }
            .boxed()
        })
        .await;

        assert!(outcome.is_clean());
        assert_eq!(outcome.result.unwrap(), "csi-hostpath-csi-5678");
        assert_eq!(driver.state(), LifecycleState::TornDown);
        assert_eq!(store.labelled("csi-5678"), 0);
    }

    #[tokio::test]
    async fn story_failing_body_still_cleans_up() {
        let f = hostpath::fixture();
        let mut driver = driver(&f, &["node-1"]);

        let outcome: ScopeOutcome<()> = run_scoped(&mut driver, &ctx(), TIMEOUT, |_, _| {
            async { Err(Error::internal("assertion failed")) }.boxed()
        })
        .await;

        assert!(matches!(outcome.result, Err(Error::Internal { .. })));
        assert!(outcome.teardown_errors.is_empty());
        assert_eq!(f.store.len(), 0);
    }

    #[tokio::test]
    async fn story_panicking_body_cleans_up_then_panics() {
        let f = hostpath::fixture();
        let mut driver = driver(&f, &["node-1"]);

        let ctx = ctx();
        let run = run_scoped(&mut driver, &ctx, TIMEOUT, |_, _| {
            async { panic!("boom") }.boxed()
        });
        let caught: std::result::Result<ScopeOutcome<()>, _> =
            AssertUnwindSafe(run).catch_unwind().await;

        assert!(caught.is_err());
        assert_eq!(driver.state(), LifecycleState::TornDown);
        assert_eq!(f.store.len(), 0);
    }

    #[tokio::test]
    async fn story_timed_out_body_cleans_up() {
        let f = hostpath::fixture();
        let mut driver = driver(&f, &["node-1"]);

        let outcome: ScopeOutcome<()> =
            run_scoped(&mut driver, &ctx(), Duration::from_millis(50), |_, _| {
                async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
                .boxed()
            })
            .await;

        let err = outcome.result.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(f.store.len(), 0);
    }

    #[tokio::test]
    async fn failed_creation_skips_the_body() {
        let f = hostpath::fixture();
        f.store.fail_create("ServiceAccount/csi-5678/csi-provisioner", api_error(403));
        let mut driver = driver(&f, &["node-1"]);
        let ran = AtomicBool::new(false);

        let outcome: ScopeOutcome<()> = run_scoped(&mut driver, &ctx(), TIMEOUT, |_, _| {
            ran.store(true, Ordering::SeqCst);
            async { Ok(()) }.boxed()
        })
        .await;

        assert!(matches!(outcome.result, Err(Error::Deployment { .. })));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(driver.state(), LifecycleState::TornDown);
        assert_eq!(f.store.len(), 0);
    }

    #[tokio::test]
    async fn teardown_errors_do_not_mask_the_result() {
        let f = hostpath::fixture();
        f.store.fail_delete("ClusterRole/external-provisioner-runner-csi-5678", api_error(500));
        let mut driver = driver(&f, &["node-1"]);

        let outcome = run_scoped(&mut driver, &ctx(), TIMEOUT, |_, _| async { Ok(7) }.boxed()).await;

        assert_eq!(outcome.teardown_errors.len(), 1);
        assert!(!outcome.is_clean());
        assert_eq!(outcome.into_result().unwrap(), 7);
        // Everything else is gone
        assert_eq!(f.store.len(), 1);
    }
}
