use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider},
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "review-sentiment-worker";

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// OTLPエクスポーターの設定。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OtlpSettings<'a> {
    pub endpoint: Option<&'a str>,
    pub sampling_ratio: f64,
}

impl Default for OtlpSettings<'_> {
    fn default() -> Self {
        Self {
            endpoint: None,
            sampling_ratio: 1.0,
        }
    }
}

/// Tracing サブスクライバを一度だけ初期化する。
///
/// エンドポイントが設定されている場合はOTLPエクスポーターでトレースを送信する。
/// 設定がない、またはエクスポーターの構築に失敗した場合はJSON fmtレイヤーのみ。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init(settings: OtlpSettings<'_>) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();

        let tracer = settings
            .endpoint
            .map(|endpoint| (endpoint, init_tracer(endpoint, settings.sampling_ratio)));

        match tracer {
            Some((endpoint, Ok(tracer))) => {
                let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(otel_layer)
                    .try_init()
                    .map_err(|e: tracing_subscriber::util::TryInitError| {
                        Error::msg(e.to_string())
                    })?;
                info!(
                    otel_enabled = true,
                    endpoint = %endpoint,
                    "Tracing initialized with OpenTelemetry"
                );
            }
            Some((_, Err(e))) => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .try_init()
                    .map_err(|e: tracing_subscriber::util::TryInitError| {
                        Error::msg(e.to_string())
                    })?;
                info!(
                    otel_enabled = false,
                    error = %e,
                    "Tracing initialized without OpenTelemetry (init failed)"
                );
            }
            None => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .try_init()
                    .map_err(|e: tracing_subscriber::util::TryInitError| {
                        Error::msg(e.to_string())
                    })?;
                info!(otel_enabled = false, "Standard tracing initialized");
            }
        }

        Ok::<(), Error>(())
    })?;
    Ok(())
}

/// OTLPエクスポーター経由でOpenTelemetryトレーサーを初期化する。
fn init_tracer(endpoint: &str, sampling_ratio: f64) -> Result<SdkTracer> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(SERVICE_NAME);

    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}
