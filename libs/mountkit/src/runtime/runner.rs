//! MountKit runtime runner.
//!
//! Boots once, then serves the composed router through the ingress host
//! until shutdown. Shutdown can be driven by OS signals, an external
//! `CancellationToken`, or an arbitrary future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::contracts::{IngressHost, UnitLoader};
use crate::discovery::DiscoveryConfig;
use crate::fs::FileSystem;
use crate::runtime::shutdown;
use crate::runtime::{BootReport, Collaborators, HostRuntime};

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for running the MountKit runner.
pub struct RunOptions {
    pub discovery: DiscoveryConfig,
    pub loader: Arc<dyn UnitLoader>,
    pub collaborators: Collaborators,
    pub host: Arc<dyn IngressHost>,
    /// Defaults to the real filesystem.
    pub fs: Option<Arc<dyn FileSystem>>,
    pub shutdown: ShutdownOptions,
}

/// Boot, serve until shutdown, and return the boot report.
pub async fn run(opts: RunOptions) -> anyhow::Result<BootReport> {
    // 1. Prepare cancellation token based on shutdown options
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    // 2. Spawn shutdown waiter (Signals / Future)
    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match shutdown::wait_for_shutdown().await {
                    Ok(()) => {
                        tracing::info!("shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    // 3. Boot once
    let mut runtime = HostRuntime::new(opts.discovery, opts.loader, opts.collaborators)
        .with_host(opts.host.clone());
    if let Some(fs) = opts.fs {
        runtime = runtime.with_fs(fs);
    }
    let boot = runtime.boot().await?;

    // 4. Serve until cancelled
    opts.host.serve(cancel).await?;

    Ok(boot.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Unit;
    use crate::discovery::DiscoveredUnit;
    use crate::error::LoadError;
    use crate::fs::MemoryFs;
    use async_trait::async_trait;
    use axum::Router;
    use parking_lot::Mutex;

    struct NoUnits;

    #[async_trait]
    impl UnitLoader for NoUnits {
        async fn load(&self, unit: &DiscoveredUnit) -> Result<Unit, LoadError> {
            Err(LoadError::Unsupported {
                path: unit.resolved_path.clone(),
            })
        }
    }

    #[derive(Default)]
    struct WaitingHost {
        finalized: Mutex<Option<Router>>,
    }

    #[async_trait]
    impl IngressHost for WaitingHost {
        fn rest_prepare(&self, router: Router) -> anyhow::Result<Router> {
            Ok(router)
        }

        fn rest_finalize(&self, router: Router) -> anyhow::Result<Router> {
            *self.finalized.lock() = Some(router.clone());
            Ok(router)
        }

        async fn serve(&self, cancel: CancellationToken) -> anyhow::Result<()> {
            cancel.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_until_future_completes() {
        let host = Arc::new(WaitingHost::default());
        let fs = MemoryFs::new().with_file("/p/src/routes/a.router.yaml", "");

        let report = run(RunOptions {
            discovery: DiscoveryConfig::for_project("/p"),
            loader: Arc::new(NoUnits),
            collaborators: Collaborators::default(),
            host: host.clone(),
            fs: Some(Arc::new(fs)),
            shutdown: ShutdownOptions::Future(Box::pin(async {})),
        })
        .await
        .unwrap();

        assert!(host.finalized.lock().is_some());
        assert_eq!(report.failures.len(), 1);
        assert!(report.mounted.is_empty());
    }

    #[tokio::test]
    async fn external_token_stops_serving() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = run(RunOptions {
            discovery: DiscoveryConfig::for_project("/p"),
            loader: Arc::new(NoUnits),
            collaborators: Collaborators::default(),
            host: Arc::new(WaitingHost::default()),
            fs: Some(Arc::new(MemoryFs::new())),
            shutdown: ShutdownOptions::Token(cancel),
        })
        .await
        .unwrap();
        assert!(report.is_clean());
    }
}
