use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::{routing::get, Router};
use futures::future::ready;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal::unix::SignalKind;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use kafka_listener::{config::Config, Listener, MailboxHandle};

fn setup_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")
}

async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}

fn start_server(config: &Config, listener: Listener) -> Result<JoinHandle<()>> {
    let router = Router::new()
        .route("/", get(|| async { "kafka listener" }))
        .route("/_readiness", get(|| async { "ok" }))
        .route(
            "/_liveness",
            get(move || {
                let shutting_down = listener.is_shutting_down();
                async move {
                    if shutting_down {
                        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
                    } else {
                        (StatusCode::OK, "ok")
                    }
                }
            }),
        );

    let router = if config.export_prometheus {
        let recorder_handle = setup_metrics()?;
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    };

    let bind = config.bind_address.clone();

    Ok(tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!(error = ?e, "failed to serve metrics");
        }
    }))
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
    Ok(())
}

/// Writes every payload to stdout and acknowledges it.
async fn print_messages(mut mailbox: MailboxHandle) {
    while let Some(delivery) = mailbox.deliveries.recv().await {
        println!("{}", String::from_utf8_lossy(&delivery.payload));
        if mailbox.outcomes.send(delivery.ok()).await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;

    // Initialize tracing
    let log_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_filter(EnvFilter::from_default_env())
        .boxed();

    tracing_subscriber::registry().with(log_layer).init();

    info!("Starting kafka listener");
    info!("Configuration loaded: {:?}", config);

    let listener =
        Listener::new(config.to_listener_options()).context("Failed to create listener")?;

    let server_handle = start_server(&config, listener.clone())?;
    info!("Started metrics server on {}", config.bind_address);

    let mailbox = listener
        .mailbox()
        .context("Listener mailbox was already taken")?;
    let printer = tokio::spawn(print_messages(mailbox));

    let cancel = CancellationToken::new();
    let mut run = tokio::spawn({
        let listener = listener.clone();
        let cancel = cancel.clone();
        async move { listener.run(cancel).await }
    });

    // Either a signal or the listener stopping on its own ends the process.
    let finished = tokio::select! {
        signal = wait_for_shutdown_signal() => {
            signal?;
            None
        }
        finished = &mut run => Some(finished),
    };

    match tokio::time::timeout(config.shutdown_timeout(), listener.shutdown()).await {
        Ok(Ok(())) => info!("Listener shut down"),
        Ok(Err(e)) => error!(error = ?e, "Listener shutdown failed"),
        Err(_) => {
            error!("Listener shutdown timed out, cancelling");
            cancel.cancel();
        }
    }

    let finished = match finished {
        Some(finished) => finished,
        None => run.await,
    };

    if let Err(e) = printer.await {
        error!(error = ?e, "print loop failed");
    }
    server_handle.abort();

    if let Err(e) = finished.context("Listener task failed")? {
        error!(error = ?e, "Listener stopped on a fatal error");
        return Err(e.into());
    }

    Ok(())
}
