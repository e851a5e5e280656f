//! MTD rotator entry point.
//!
//! Wires the Kubernetes orchestrator client, the rotation controller,
//! the periodic rotation loop, and the routing proxy together, then
//! serves until SIGTERM/ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use mtd_pool::GenerationLabel;
use mtd_rotator::config::Config;
use mtd_rotator::controller::{run_rotation_loop, RotationController, RotationHook};
use mtd_rotator::orchestrator::KubeOrchestrator;
use mtd_rotator::{decoy, dns::DnsUpdater, proxy};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Best-effort side effects after each promotion.
struct FollowUps {
    dns: Option<DnsUpdater>,
    decoys: u32,
    kube: Arc<KubeOrchestrator>,
}

#[async_trait]
impl RotationHook for FollowUps {
    async fn on_promoted(&self, label: &GenerationLabel, first_address: Option<SocketAddr>) {
        if let (Some(dns), Some(address)) = (&self.dns, first_address) {
            dns.update_record(address.ip()).await;
        }
        decoy::rotate_decoys(&self.kube, self.decoys, label).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to MTD_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting MTD rotator");
    info!(
        listen_addr = %config.listen_addr,
        replicas = config.replicas,
        rotation_interval_secs = config.rotation_interval.as_secs(),
        grace_secs = config.grace_period.as_secs(),
        graceful_rotation = config.graceful_rotation,
        "Configuration loaded"
    );

    let kube = Arc::new(KubeOrchestrator::new(&config));
    let controller = Arc::new(RotationController::new(Arc::clone(&kube), &config));

    // Adopt whatever is already running and stage the first generation.
    controller.bootstrap().await;

    let hook: Arc<dyn RotationHook> = Arc::new(FollowUps {
        dns: config.dns.clone().map(DnsUpdater::new),
        decoys: config.decoys,
        kube: Arc::clone(&kube),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let rotation_handle = tokio::spawn({
        let controller = Arc::clone(&controller);
        let interval = config.rotation_interval;
        let shutdown_rx = shutdown_rx.clone();
        async move {
            run_rotation_loop(controller, interval, Some(hook), shutdown_rx).await;
        }
    });

    let app = proxy::router(controller);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("Proxy shutting down");
            })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Proxy exited normally"),
                Ok(Err(e)) => error!(error = %e, "Proxy error"),
                Err(e) => error!(error = %e, "Proxy task panicked"),
            }
        }
    }

    // Stop the rotation loop; it cancels pending decommission timers on
    // the way out. In-flight cluster calls are abandoned (best effort).
    let _ = shutdown_tx.send(true);
    let _ = rotation_handle.await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
