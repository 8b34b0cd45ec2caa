//! ytsaurus-operator entry point.
//!
//! Starts the health server, waits for the leader lease and then runs the
//! controller until a signal arrives or leadership is lost.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ytsaurus_operator::health::{self, HealthState};
use ytsaurus_operator::{OperatorConfig, run_controller};

const LEASE_NAME: &str = "ytsaurus-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time left for in-flight passes after readiness drops on shutdown.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing() -> Result<(), BoxError> {
    let filter = EnvFilter::from_default_env()
        .add_directive("ytsaurus_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
    Ok(())
}

fn lease_lock(client: &Client, config: &OperatorConfig) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        &config.pod_namespace,
        LeaseLockParams {
            holder_id: config.pod_name.clone(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    )
}

/// Block until this replica holds the lease.
async fn acquire_leadership(lock: &LeaseLock) {
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(lease) if lease.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another replica holds the lease"),
            Err(e) => warn!(error = %e, "Lease acquisition failed"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease forever. Returns the reason once it can no longer be held.
async fn hold_leadership(lock: LeaseLock) -> String {
    let mut ticker = tokio::time::interval(LEASE_RENEW_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match lock.try_acquire_or_renew().await {
            Ok(lease) if lease.acquired_lease => {}
            Ok(_) => return "lease taken by another replica".to_string(),
            Err(e) => return format!("lease renewal failed: {e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing()?;

    let config = OperatorConfig::from_env();
    info!(
        pod = %config.pod_name,
        namespace = %config.pod_namespace,
        watch_namespace = ?config.watch_namespace,
        cluster_domain = %config.cluster_domain,
        reconcile_interval = ?config.reconcile_interval,
        update_poll_interval = ?config.update_poll_interval,
        "Starting ytsaurus-operator"
    );

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());

    // Probes must answer on standby replicas too.
    let health_server = tokio::spawn(health::serve(health_state.clone()));

    info!(lease = LEASE_NAME, "Waiting for leadership");
    acquire_leadership(&lease_lock(&client, &config)).await;
    let leadership = tokio::spawn(hold_leadership(lease_lock(&client, &config)));
    let controller = tokio::spawn(run_controller(client, config, Some(health_state.clone())));

    tokio::select! {
        lost = leadership => {
            match lost {
                Ok(reason) => error!(%reason, "Lost leadership"),
                Err(e) => error!(error = %e, "Lease renewal task panicked"),
            }
            // Restart so the pod re-enters the election.
            #[allow(clippy::exit)]
            std::process::exit(1);
        }
        done = controller => {
            if let Err(e) = done {
                error!(error = %e, "Controller task panicked");
            }
        }
        served = health_server => {
            match served {
                Ok(Err(e)) => error!(error = %e, "Health server failed"),
                Err(e) => error!(error = %e, "Health server task panicked"),
                Ok(Ok(())) => {}
            }
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            health_state.set_ready(false);
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Without signal handlers the operator
/// cannot shut down cleanly, so failing to install them is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let interrupt = async {
        signal::ctrl_c().await.expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
