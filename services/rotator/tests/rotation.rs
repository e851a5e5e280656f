//! End-to-end tests for the rotation loop against the mock orchestrator.
//!
//! These drive the public surface the binary wires together: bootstrap,
//! the periodic loop, selection, and shutdown, with intervals scaled
//! down to milliseconds.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mtd_pool::GenerationLabel;
use mtd_rotator::config::Config;
use mtd_rotator::controller::{run_rotation_loop, RotationController, RotationHook};
use mtd_rotator::orchestrator::MockOrchestrator;
use tokio::sync::watch;

fn test_config(replicas: u32, interval: Duration, grace: Duration) -> Config {
    Config {
        replicas,
        rotation_interval: interval,
        grace_period: grace,
        namespace: "default".to_string(),
        label_selector: "app=webapp".to_string(),
        template_deployment: "webapp".to_string(),
        service_name: "webapp-service".to_string(),
        graceful_rotation: true,
        provision_timeout: Duration::ZERO,
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        app_port: 8080,
        decoys: 0,
        dns: None,
        kube_api_url: "http://127.0.0.1:6443".to_string(),
        kube_token: None,
        log_level: "debug".to_string(),
    }
}

#[derive(Default)]
struct CountingHook {
    promotions: AtomicU64,
    labels: Mutex<Vec<GenerationLabel>>,
}

#[async_trait]
impl RotationHook for CountingHook {
    async fn on_promoted(&self, label: &GenerationLabel, _first_address: Option<SocketAddr>) {
        self.promotions.fetch_add(1, Ordering::SeqCst);
        self.labels.lock().unwrap().push(label.clone());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_periodic_rotation_replaces_pool_identity() {
    let mock = Arc::new(MockOrchestrator::new());
    let initial = GenerationLabel::from_observed("20250101000000000");
    mock.seed_generation(&initial, 2);

    let config = test_config(2, Duration::from_millis(150), Duration::from_millis(50));
    let controller = Arc::new(RotationController::new(Arc::clone(&mock), &config));
    controller.bootstrap().await;

    assert_eq!(controller.active_label(), Some(initial.clone()));
    let first_staged = controller.staging_label().await.expect("staged at bootstrap");

    let hook = Arc::new(CountingHook::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(run_rotation_loop(
        Arc::clone(&controller),
        config.rotation_interval,
        Some(hook.clone() as Arc<dyn RotationHook>),
        shutdown_rx,
    ));

    // Two intervals plus slack: at least one full rotation has run.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let promotions = hook.promotions.load(Ordering::SeqCst);
    assert!(promotions >= 1, "expected at least one promotion, got {promotions}");

    // The pool identity moved off the initial generation.
    let active = controller.active_label().expect("active after rotation");
    assert_ne!(active, initial);
    assert_eq!(hook.labels.lock().unwrap().first(), Some(&first_staged));

    // Selection only ever serves the current active label.
    let snapshot = controller.active_label().unwrap();
    for _ in 0..10 {
        let picked = controller.select_instance().await.unwrap();
        assert!(
            picked.generation_label == snapshot
                || Some(&picked.generation_label) == controller.active_label().as_ref(),
            "selected {} while active was {snapshot}",
            picked.generation_label
        );
    }

    // The initial generation was decommissioned after its grace period.
    assert!(mock.deleted_labels().contains(&initial));

    shutdown_tx.send(true).unwrap();
    loop_handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_loop_recovers_from_provisioning_failure() {
    let mock = Arc::new(MockOrchestrator::new());
    mock.set_fail_create(true);

    let config = test_config(2, Duration::from_millis(100), Duration::ZERO);
    let controller = Arc::new(RotationController::new(Arc::clone(&mock), &config));
    controller.bootstrap().await;

    // Bootstrap provisioning failed; nothing staged.
    assert!(controller.staging_label().await.is_none());

    let hook = Arc::new(CountingHook::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(run_rotation_loop(
        Arc::clone(&controller),
        config.rotation_interval,
        Some(hook.clone() as Arc<dyn RotationHook>),
        shutdown_rx,
    ));

    // Ticks fire but every cycle is a no-op while creation keeps failing.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(hook.promotions.load(Ordering::SeqCst), 0);

    // Once the control plane recovers, the loop re-stages and rotates.
    mock.set_fail_create(false);
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(hook.promotions.load(Ordering::SeqCst) >= 1);
    assert!(controller.active_label().is_some());

    shutdown_tx.send(true).unwrap();
    loop_handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_interrupts_slow_cutover() {
    let mock = Arc::new(MockOrchestrator::new());
    let initial = GenerationLabel::from_observed("20250101000000000");
    mock.seed_generation(&initial, 2);
    // Long enough that the cycle is guaranteed to still be mid-cutover
    // when the shutdown signal arrives.
    mock.set_cutover_delay(Duration::from_secs(30));

    let config = test_config(2, Duration::from_millis(100), Duration::ZERO);
    let controller = Arc::new(RotationController::new(Arc::clone(&mock), &config));
    controller.bootstrap().await;

    let hook = Arc::new(CountingHook::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(run_rotation_loop(
        Arc::clone(&controller),
        config.rotation_interval,
        Some(hook.clone() as Arc<dyn RotationHook>),
        shutdown_rx,
    ));

    // First tick fires at ~100ms and parks inside the slow cutover.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.cutover_calls(), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), loop_handle)
        .await
        .expect("loop must stop without waiting out the cutover")
        .unwrap();

    // The abandoned cycle never completed its promotion.
    assert_eq!(hook.promotions.load(Ordering::SeqCst), 0);
    assert_eq!(controller.active_label(), Some(initial));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_cancels_timers_and_stops_ticks() {
    let mock = Arc::new(MockOrchestrator::new());
    let initial = GenerationLabel::from_observed("20250101000000000");
    mock.seed_generation(&initial, 2);

    // Long grace period: the decommission must still be pending when we
    // shut down, and must never fire afterwards.
    let config = test_config(2, Duration::from_millis(150), Duration::from_secs(60));
    let controller = Arc::new(RotationController::new(Arc::clone(&mock), &config));
    controller.bootstrap().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(run_rotation_loop(
        Arc::clone(&controller),
        config.rotation_interval,
        None,
        shutdown_rx,
    ));

    // One interval plus slack: exactly one rotation has demoted the
    // initial generation.
    tokio::time::sleep(Duration::from_millis(220)).await;
    assert_eq!(controller.pending_labels(), vec![initial.clone()]);

    shutdown_tx.send(true).unwrap();
    loop_handle.await.unwrap();

    assert!(controller.pending_labels().is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(mock.deleted_labels().is_empty());
}
