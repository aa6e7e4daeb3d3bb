//! Thin process entrypoint: wires `SIGINT`/`SIGTERM` to `Manager::close_all`
//! and installs a `tracing-subscriber` filter. Does not parse CLI args or
//! load config files from disk — those remain external collaborators; it
//! builds a `Manager` from defaults plus the handful of environment
//! overrides needed to run it standalone.

use ssh_session_engine::config::{BufferConfig, EngineConfig, SecurityConfig, TimeoutConfig};
use ssh_session_engine::manager::Manager;
use ssh_session_engine::pool::PoolTimeouts;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EngineConfig::default();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration, exiting");
        std::process::exit(1);
    }

    let (manager, mut events) = Manager::new(
        SecurityConfig::default(),
        TimeoutConfig::default(),
        BufferConfig::default(),
        PoolTimeouts::default(),
    );

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(?event, "session event");
        }
    });

    tracing::info!("ssh-session-engine started");
    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, closing all sessions");
    manager.close_all().await;
    std::process::exit(0);
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = sigint.recv().await;
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
