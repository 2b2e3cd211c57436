use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fanout_listener::config::Config;
use fanout_listener::contracts::Event;
use fanout_listener::messaging::{subscribe, ChannelProvider, Consumer, EventHandler, HandlerError};
use fanout_listener::metrics::{server::start_metrics_server, Metrics};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Logs every event. A `fail` field in the payload makes the handler fail,
/// which lets the publisher demos exercise each disposition.
struct LoggingHandler;

#[async_trait]
impl EventHandler<Value> for LoggingHandler {
    async fn handle(&self, event: Event<Value>) -> Result<(), HandlerError> {
        let preview: String = event.payload.to_string().chars().take(100).collect();
        info!(event = %event.name, payload_preview = %preview, "Handling event");

        match event.payload.get("fail").and_then(Value::as_str) {
            None => Ok(()),
            Some("transient") => Err(HandlerError::transient("simulated transient failure")),
            Some("permanent") => Err(HandlerError::permanent("simulated permanent failure")),
            Some(reason) => Err(HandlerError::failed(reason)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_panic_handler();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    setup_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        service_name = %config.service_name,
        exchange = %config.exchange_name,
        queue = %config.queue_name,
        "Fanout listener starting"
    );

    let metrics = match Metrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            error!(error = %e, "Failed to create metrics");
            return ExitCode::FAILURE;
        }
    };

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_clone, metrics_port).await {
            error!(error = %e, "Metrics server error");
        }
    });

    let session = match subscribe(&config).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to set up subscription");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(Notify::new());
    let handler: Arc<dyn EventHandler<Value>> = Arc::new(LoggingHandler);
    let consumer = Consumer::new(
        session.subscription,
        config.queue_name.clone(),
        handler,
        shutdown.clone(),
        metrics,
    )
    .with_ack_mode(config.ack_mode);

    let mut consumer_handle = tokio::spawn(consumer.run());

    info!("Ready to process events. To exit press CTRL+C");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received, cleaning up...");
            shutdown.notify_one();

            match tokio::time::timeout(SHUTDOWN_GRACE, &mut consumer_handle).await {
                Ok(Ok(stats)) => info!(?stats, "Consumer drained"),
                Ok(Err(e)) => error!(error = %e, "Consumer task failed"),
                Err(_) => warn!("Consumer shutdown timeout"),
            }
        }
        finished = &mut consumer_handle => {
            match finished {
                Ok(stats) => warn!(?stats, "Subscription closed by broker"),
                Err(e) => error!(error = %e, "Consumer task failed"),
            }
        }
    }

    if let Err(e) = ChannelProvider::close_channel(&session.channel).await {
        warn!(error = %e, "Error closing channel");
    }

    if let Err(e) = session.connection.shutdown().await {
        warn!(error = %e, "Error during shutdown");
    }

    info!("Fanout listener stopped");
    ExitCode::SUCCESS
}

fn setup_logging(rust_log: &str) {
    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|e| {
        eprintln!("Invalid RUST_LOG {:?}, falling back to info: {}", rust_log, e);
        EnvFilter::new("info")
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        eprintln!("PANIC: {} at {}", message, location);
        eprintln!("Thread: {:?}", std::thread::current().name());
    }));
}
