//! Cluster billing service entry point.

use cluster_billing_service::config::BillingConfig;
use cluster_billing_service::startup::Application;

use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Missing credentials or bad pricing stop here, before any remote call.
    let config = BillingConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service_name = %config.service_name,
        port = config.common.port,
        fleet_api = %config.fleet.url,
        cost_api = %config.cost.url,
        cpu_core_minute = %config.pricing.cpu_core_minute(),
        ram_byte_minute = %config.pricing.ram_byte_minute(),
        schedule_enabled = config.schedule.enabled,
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;
    let shutdown = app.shutdown_token();
    let mut server = tokio::spawn(app.run_until_stopped());

    tokio::select! {
        joined = &mut server => return server_result(joined),
        _ = shutdown_signal() => {
            tracing::info!("Graceful shutdown initiated");
            shutdown.cancel();
        }
    }

    server_result(server.await)?;
    tracing::info!("Service shutdown complete");
    Ok(())
}

fn server_result(joined: Result<std::io::Result<()>, tokio::task::JoinError>) -> std::io::Result<()> {
    match joined {
        Ok(result) => result.map_err(|e| {
            tracing::error!(error = %e, "Application error");
            e
        }),
        Err(e) => {
            tracing::error!(error = %e, "Server task failed");
            Err(std::io::Error::other(e.to_string()))
        }
    }
}
