//! Shared cluster for a whole test session
//!
//! Spinning up a kind cluster takes tens of seconds, so tests share one.
//! [`session_cluster`] creates the cluster on first use, configured from
//! the environment, and hands every caller the same live handle. A setup
//! failure is cached and surfaced to every dependent test.
//!
//! cargo's test harness has no end-of-session hook, so teardown comes in
//! two forms: [`with_session_cluster`] wraps a block and deletes the
//! cluster afterwards even when the block panics, and
//! [`teardown_session`] deletes it explicitly. The `#[kindling::test]`
//! macro path leans on create being idempotent instead: the cluster stays
//! up and the next run reuses it. Set `KINDLING_KEEP_CLUSTER=1` to make
//! teardown a no-op for debugging.
//!
//! # Example
//!
//! ```ignore
//! #[kindling::test]
//! async fn test_dns_comes_up(cluster: &KindCluster) {
//!     let out = cluster
//!         .kubectl(&["get", "deploy", "coredns", "-n", "kube-system"])
//!         .await
//!         .unwrap();
//!     assert!(out.contains("coredns"));
//! }
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::cluster::KindCluster;
use crate::config::ClusterSettings;
use crate::telemetry;

static SESSION: OnceCell<Result<KindCluster, HarnessError>> = OnceCell::const_new();
static TORN_DOWN: AtomicBool = AtomicBool::new(false);

/// Error type for the session harness
#[derive(Debug, Clone, thiserror::Error)]
pub enum HarnessError {
    #[error("session cluster setup failed: {0}")]
    SetupFailed(String),

    #[error("session cluster teardown failed: {0}")]
    TeardownFailed(String),
}

/// Get the shared session cluster, creating it on first use
///
/// Settings come from [`ClusterSettings::from_env`]; the cluster name
/// defaults to `kindling` and is overridden with `KINDLING_CLUSTER_NAME`.
/// When creation fails, this and every later call return the same setup
/// error.
pub async fn session_cluster() -> Result<&'static KindCluster, HarnessError> {
    let entry = SESSION
        .get_or_init(|| async {
            telemetry::init_logging();
            let settings = ClusterSettings::from_env();
            info!(cluster = %settings.name, "provisioning session cluster");

            let mut cluster = KindCluster::with_settings(settings);
            match cluster.create(None).await {
                Ok(()) => Ok(cluster),
                Err(e) => Err(HarnessError::SetupFailed(e.to_string())),
            }
        })
        .await;

    match entry {
        Ok(cluster) => Ok(cluster),
        Err(e) => Err(e.clone()),
    }
}

/// Delete the session cluster, once
///
/// A no-op when the cluster was never created, was already torn down, or
/// `keep_cluster` is set.
pub async fn teardown_session() -> Result<(), HarnessError> {
    let Some(Ok(cluster)) = SESSION.get() else {
        return Ok(());
    };
    if TORN_DOWN.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    if cluster.settings().keep_cluster {
        info!(cluster = %cluster.name(), "keeping session cluster alive");
        return Ok(());
    }

    cluster
        .delete()
        .await
        .map_err(|e| HarnessError::TeardownFailed(e.to_string()))
}

/// Run a block against the session cluster and tear it down afterwards
///
/// The cluster is deleted whether the block completes or panics; a panic
/// is resumed after teardown so the test still fails.
pub async fn with_session_cluster<F, Fut, T>(f: F) -> Result<T, HarnessError>
where
    F: FnOnce(&'static KindCluster) -> Fut,
    Fut: Future<Output = T>,
{
    let cluster = session_cluster().await?;

    let result = AssertUnwindSafe(f(cluster)).catch_unwind().await;

    match result {
        Ok(value) => {
            teardown_session().await?;
            Ok(value)
        }
        Err(panic) => {
            if let Err(e) = teardown_session().await {
                warn!("teardown after panic failed: {e}");
            }
            std::panic::resume_unwind(panic);
        }
    }
}
