use anyhow::{bail, Context, Result};
use clap::Parser;
use hue_logger::bridge::{self, SourceError, ERROR_LINK_BUTTON_NOT_PRESSED};
use hue_logger::config::normalize_base_url;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Create a Hue bridge username for hue-logger (press the bridge link button).")]
struct Args {
    /// Bridge address; discovered on the local network when omitted.
    #[arg(long, env = "HUE_BRIDGE_URL")]
    bridge_url: Option<String>,
    #[arg(long, default_value = "hue-logger#host")]
    device_type: String,
    #[arg(long, default_value_t = 30)]
    attempts: u32,
    #[arg(long, default_value_t = 2)]
    wait_secs: u64,
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    let args = Args::parse();
    let timeout = Duration::from_millis(args.timeout_ms);

    let bridge_url = match args.bridge_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => normalize_base_url(url),
        _ => {
            let found = bridge::discover_bridges(timeout)
                .await
                .context("unable to find a Hue bridge")?
                .into_iter()
                .next()
                .context("bridge discovery returned no bridges")?;
            tracing::info!(bridge_id = %found.id, address = %found.internal_ip, "found bridge");
            normalize_base_url(&found.internal_ip)
        }
    };

    tracing::info!(bridge = %bridge_url, "press the link button on the bridge");
    for attempt in 1..=args.attempts.max(1) {
        match bridge::create_user(&bridge_url, &args.device_type, timeout).await {
            Ok(username) => {
                println!("Connected to bridge, set HUE_USERNAME={username}");
                return Ok(());
            }
            Err(SourceError::Bridge { kind, .. }) if kind == ERROR_LINK_BUTTON_NOT_PRESSED => {
                tracing::debug!(attempt, "link button not pressed yet");
            }
            Err(err) => return Err(err).context("error creating user"),
        }
        tokio::time::sleep(Duration::from_secs(args.wait_secs)).await;
    }

    bail!(
        "link button was not pressed after {} attempts",
        args.attempts.max(1)
    )
}
