use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use review_sentiment_worker::{
    app::{ComponentRegistry, build_router},
    config::Config,
    observability::{Telemetry, tracing::OtlpSettings},
};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let config = Config::from_env().context("failed to load configuration")?;
    let telemetry = Telemetry::new(OtlpSettings {
        endpoint: config.otel_exporter_endpoint(),
        sampling_ratio: config.otel_sampling_ratio(),
    })
    .context("failed to initialize telemetry")?;
    let bind_addr = config.http_bind();

    let registry = ComponentRegistry::build(config, telemetry)
        .await
        .context("failed to build component registry")?;
    let shutdown = registry.shutdown_token();
    let router = build_router(registry);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))?;

    info!(%bind_addr, "listening");

    let signal_token = shutdown.clone();
    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received; cancelling in-flight batches");
        signal_token.cancel();
    });

    if let Err(error) = serve.await {
        warn!(error = %error, "server exited with error");
    }

    Ok(())
}
