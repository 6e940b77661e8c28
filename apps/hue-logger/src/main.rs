use anyhow::{Context, Result};
use hue_logger::bridge::{self, HueBridge};
use hue_logger::config::{normalize_base_url, Config};
use hue_logger::mapper::MetricMapper;
use hue_logger::sampler::Sampler;
use hue_logger::writer::InfluxWriter;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hue_logger=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "hue-logger"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn resolve_bridge_url(config: &Config) -> Result<String> {
    if let Some(url) = &config.bridge_url {
        return Ok(url.clone());
    }
    tracing::info!("HUE_BRIDGE_URL not set; discovering bridge");
    let bridges = bridge::discover_bridges(config.request_timeout())
        .await
        .context("unable to find a Hue bridge")?;
    let found = bridges
        .into_iter()
        .next()
        .context("bridge discovery returned no bridges")?;
    tracing::info!(bridge_id = %found.id, address = %found.internal_ip, "found bridge");
    Ok(normalize_base_url(&found.internal_ip))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;
    if let Some(warning) = config.setup_warning.as_deref() {
        tracing::warn!("{warning}");
    }

    let bridge_url = resolve_bridge_url(&config).await?;
    let source = HueBridge::new(&bridge_url, &config.hue_username, config.request_timeout())
        .context("failed to build bridge client")?;
    let sink = InfluxWriter::new(config.influx_settings(), config.request_timeout())
        .context("failed to build InfluxDB client")?;
    let mapper = MetricMapper::new(config.measurement.clone(), config.hue_scale);

    tracing::info!(
        bridge = %source.base_url(),
        influx = %config.influx_url,
        db = %config.influx_db,
        hue_scale = ?config.hue_scale,
        "hue-logger starting"
    );

    let sampler = Sampler::new(source, sink, mapper, config.interval());

    tokio::select! {
        _ = sampler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    opentelemetry::global::shutdown_tracer_provider();
    Ok(())
}
