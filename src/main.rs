use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use actuation_gateway::{
    ApiServerBuilder, Config, EffectScheduler, HighlightTools, SharedTransport, StoreCatalog,
    Theme, TuyaClient,
};

/// Status codes printed by `status` unless `--all` is given
const STATUS_CODES: &[&str] = &["work_mode", "colour_data_v2", "bright_value_v2"];

/// Actuation - MCP gateway driving in-store light effects
#[derive(Parser)]
#[command(name = "actuation", version, about)]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// Show the light-related status of a device
    Status {
        /// Device id
        device_id: String,
        /// Print every status entry
        #[arg(long)]
        all: bool,
    },
    /// Show the functions and specification a device reports
    Inspect {
        /// Device id
        device_id: String,
    },
    /// Run one pulse animation on a device and wait for it to finish
    Pulse {
        /// Device id
        device_id: String,
        /// Theme name (battery, success, default, gaming)
        #[arg(long, default_value = "battery")]
        theme: String,
        /// Animation length in milliseconds
        #[arg(long, default_value = "6000")]
        duration_ms: u64,
        /// Toggle period in milliseconds (defaults to PULSE_PERIOD_MS)
        #[arg(long)]
        period_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,actuation_gateway=info",
        1 => "info,actuation_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Status { device_id, all } => status(&config, &device_id, all).await,
        Command::Inspect { device_id } => inspect(&config, &device_id).await,
        Command::Pulse {
            device_id,
            theme,
            duration_ms,
            period_ms,
        } => {
            let period = period_ms.map_or(config.effects.pulse_period, Duration::from_millis);
            let theme = Theme::resolve(&theme, config.effects.default_theme);
            pulse(&config, &device_id, theme, Duration::from_millis(duration_ms), period).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let tuya = TuyaClient::new(config.require_tuya()?);
    let transport: SharedTransport = Arc::new(tuya);
    let scheduler = Arc::new(EffectScheduler::new(transport.clone()));
    let stores = Arc::new(StoreCatalog::from_dir(config.store_config_dir.clone()));

    tracing::info!(
        port = config.api_server.port,
        provider = %config.light_provider,
        stores = %config.store_config_dir.display(),
        "starting actuation gateway"
    );

    let tools = HighlightTools::new(
        stores,
        scheduler,
        transport,
        config.light_provider,
        config.effects,
    );

    ApiServerBuilder::new(tools)
        .port(config.api_server.port)
        .bearer_token(config.api_server.bearer_token)
        .session_idle_timeout(config.api_server.session_idle_timeout)
        .build()
        .run()
        .await?;

    Ok(())
}

async fn status(config: &Config, device_id: &str, all: bool) -> anyhow::Result<()> {
    let tuya = TuyaClient::new(config.require_tuya()?);
    let entries = tuya.status(device_id).await?;

    for entry in entries
        .iter()
        .filter(|e| all || STATUS_CODES.contains(&e.code.as_str()))
    {
        println!("{}: {}", entry.code, entry.value);
    }
    Ok(())
}

async fn inspect(config: &Config, device_id: &str) -> anyhow::Result<()> {
    let tuya = TuyaClient::new(config.require_tuya()?);

    println!("== functions ==");
    println!("{}", serde_json::to_string_pretty(&tuya.functions(device_id).await?)?);
    println!("\n== specification ==");
    println!("{}", serde_json::to_string_pretty(&tuya.specification(device_id).await?)?);
    Ok(())
}

async fn pulse(
    config: &Config,
    device_id: &str,
    theme: Theme,
    duration: Duration,
    period: Duration,
) -> anyhow::Result<()> {
    let transport: SharedTransport = Arc::new(TuyaClient::new(config.require_tuya()?));
    let scheduler = EffectScheduler::new(transport);

    let job = scheduler.start(device_id, theme, duration, period);
    println!("pulsing {device_id} with {theme} for {duration:?} every {:?}", job.period);

    while scheduler.is_active(device_id) {
        tokio::time::sleep(period).await;
    }
    // Steady command is sent on a detached task after the last tick
    tokio::time::sleep(Duration::from_secs(1)).await;

    println!("done");
    Ok(())
}
