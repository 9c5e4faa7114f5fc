use std::sync::Arc;
use std::time::Duration;

use autoreply::config::AppConfig;
use autoreply::llm::create_provider;
use autoreply::mail::{ImapStore, SmtpMailer};
use autoreply::poller::{Poller, spawn_poller, stop_poller};
use tracing::{error, info};

/// How long an interrupted poller may take to finish its current step.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("📬 autoreply v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Account: {}", config.account);
    eprintln!("   IMAP: {}:{}", config.imap_host, config.imap_port);
    eprintln!("   SMTP: {}:{}", config.smtp_host, config.smtp_port);
    eprintln!("   Model: {}", config.model);
    eprintln!("   Allowed: {}", config.allowed_domains.join(", "));
    eprintln!("   Interval: {}s\n", config.poll_interval.as_secs());

    let llm = create_provider(&config.llm_config())?;
    let mailer = SmtpMailer::new(
        &config.smtp_host,
        config.smtp_port,
        &config.account,
        &config.password,
        &config.account,
    )?;
    let store = ImapStore::new(config.imap_host.clone(), config.imap_port);

    let poller = Arc::new(Poller::new(
        Box::new(store),
        llm,
        Arc::new(mailer),
        config.poller_settings(),
    ));

    let (mut handle, shutdown) = spawn_poller(poller, config.poll_interval);

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        result = &mut handle => {
            match result {
                Ok(()) => error!("Email poller exited unexpectedly"),
                Err(e) => error!("Email poller task failed: {e}"),
            }
            return Err("email poller stopped".into());
        }
    }

    info!("Interrupted, stopping");
    stop_poller(handle, &shutdown, SHUTDOWN_GRACE).await;

    Ok(())
}
