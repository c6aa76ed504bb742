use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use courier_broker::{
    BrokerKind, ConsumerPool, EmailSentEvent, MemoryBroker, build_producer,
};
use courier_server::api::{self, AppState};
use courier_server::config::CourierConfig;
use courier_server::consumers::SmtpConsumerFactory;
use courier_server::telemetry;

/// Courier email dispatch server.
#[derive(Parser, Debug)]
#[command(
    name = "courier-server",
    about = "Queue emails over HTTP and deliver them through SMTP"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "courier.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the number of consumers started at boot.
    #[arg(long)]
    consumers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = CourierConfig::load(Path::new(&cli.config))?;
    telemetry::init(&config.logging);

    info!(
        backend = %config.broker.backend,
        smtp_host = %config.smtp.host,
        smtp_port = config.smtp.port,
        "starting courier-server"
    );

    let memory = (config.broker.backend == BrokerKind::Memory)
        .then(|| MemoryBroker::new(config.broker.memory_capacity));
    let producer = build_producer(&config.broker, memory.as_ref()).await?;

    let factory = SmtpConsumerFactory::new(
        config.broker.clone(),
        config.smtp.clone(),
        memory.clone(),
    );
    let pool = Arc::new(ConsumerPool::new(Arc::new(factory)));
    pool.add_observer(Arc::new(|event: &EmailSentEvent| {
        info!(
            consumer_id = %event.consumer_id,
            subject = %event.subject,
            recipients = event.to.len(),
            "email sent"
        );
    }))
    .await;
    pool.start(cli.consumers.unwrap_or(config.broker.consumers))
        .await?;

    let app = api::router(AppState {
        producer: Arc::clone(&producer),
        pool: Arc::clone(&pool),
    });

    // Resolve the bind address (CLI overrides take precedence).
    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "courier-server listening");

    // Serve with graceful shutdown on SIGINT / SIGTERM.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let consumers finish the message in hand before the sessions close.
    let shutdown_timeout = config.server.shutdown_timeout();
    info!(
        timeout_secs = config.server.shutdown_timeout_seconds,
        consumers = pool.len(),
        "stopping consumers..."
    );
    if tokio::time::timeout(shutdown_timeout, pool.stop_all())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.server.shutdown_timeout_seconds,
            "shutdown timeout exceeded, some deliveries may be lost"
        );
    }

    if let Err(e) = producer.close().await {
        warn!(error = %e, "producer close failed");
    }
    if let Some(memory) = memory {
        memory.close();
    }

    info!("courier-server shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
