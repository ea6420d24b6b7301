use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use optisage_charts::config::AppConfig;
use optisage_charts::export::export_rows_to_file;
use optisage_charts::loader::DirectorySource;
use optisage_charts::models::{MetricFamily, MetricKey, TimeRange};
use optisage_charts::render::render_section;
use optisage_charts::source::{ApiContext, ApiSource, MetricsSource};
use optisage_charts::utils::{self, fmt_count};
use optisage_charts::view::{ChartController, ChartSession, LoadStatus};

#[derive(Parser)]
#[command(name = "optisage-charts", about = "Product price / sales rank / rating charts", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args)]
struct Target {
    /// Product ASIN
    asin: String,

    /// Marketplace (Keepa domain id); defaults to `session.marketplace_id`
    #[arg(short, long)]
    marketplace: Option<u32>,

    /// 7d, 30d, 90d, 1y, all or current; defaults to `session.range`
    #[arg(short, long)]
    range: Option<TimeRange>,

    /// Read saved payloads from this directory instead of the API
    #[arg(long, value_name = "DIR")]
    from_dir: Option<PathBuf>,

    /// API bearer token
    #[arg(long, env = "OPTISAGE_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Print each chart section as a table
    Chart {
        #[command(flatten)]
        target: Target,

        /// Sections to show in close-up (price, sales_rank, rating)
        #[arg(long, value_delimiter = ',')]
        close_up: Vec<String>,

        /// Metric keys to hide, e.g. list_price,used_price
        #[arg(long, value_delimiter = ',')]
        hide: Vec<String>,
    },

    /// Write the merged rows to CSV
    Export {
        #[command(flatten)]
        target: Target,

        #[arg(short, long, default_value = "metrics.csv")]
        out: PathBuf,
    },

    /// List the supported time ranges
    Ranges,
}

fn parse_section(s: &str) -> Result<MetricFamily> {
    let wanted = s.trim().to_lowercase().replace('-', "_");
    match MetricFamily::ALL.into_iter().find(|f| f.to_string() == wanted) {
        Some(f) => Ok(f),
        None => bail!("unknown section '{}' (expected price, sales_rank or rating)", s),
    }
}

/// Run one fetch cycle for `target` and return the settled session.
async fn load_session<S: MetricsSource + 'static>(
    source: S,
    config: &AppConfig,
    target: &Target,
) -> Result<ChartSession<S>> {
    let marketplace = target.marketplace.unwrap_or(config.session.marketplace_id);
    let range = target.range.unwrap_or(config.session.range);

    let controller = ChartController::new(target.asin.clone(), marketplace, range)
        .with_tolerance(config.chart.match_tolerance())
        .with_close_up_fraction(config.chart.close_up_fraction());
    let mut session = ChartSession::new(Arc::new(source), controller)
        .with_min_transition(Duration::from_millis(config.session.min_transition_ms));

    let _t = utils::Timer::start(format!("Loading {}", session.controller().current_key()));
    session.load();
    session.settle().await;

    match &session.controller().state().status {
        LoadStatus::Failed { message, .. } => bail!("{}", message),
        LoadStatus::Empty => warn!("No history for {}", session.controller().current_key()),
        _ => {}
    }
    Ok(session)
}

fn api_source(config: &AppConfig, target: &Target) -> Result<ApiSource> {
    let mut context = ApiContext::from_config(&config.api);
    if let Some(token) = target.token.clone().filter(|t| !t.trim().is_empty()) {
        context.bearer_token = Some(token);
    }
    Ok(ApiSource::new(&config.api, context)?)
}

fn print_chart<S: MetricsSource + 'static>(
    session: &mut ChartSession<S>,
    close_up: &[String],
    hide: &[String],
) -> Result<()> {
    for section in close_up {
        session.toggle_close_up(parse_section(section)?);
    }
    for key in hide {
        let key = MetricKey::new(key.trim());
        if session.controller().bundle().and_then(|b| b.series(&key)).is_none() {
            warn!("No metric '{}' in this bundle", key);
            continue;
        }
        session.toggle_metric_visibility(&key);
    }

    let controller = session.controller();
    let key = controller.current_key();
    for section in MetricFamily::ALL {
        let Some(view) = controller.section_view(section) else {
            continue;
        };
        let frame = render_section(&view, &key);
        if frame.is_empty() {
            info!("{}: no data", frame.title);
            continue;
        }
        println!("{}", frame.to_table());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "optisage_charts=info,warn",
        1 => "optisage_charts=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Chart { target, close_up, hide } => {
            if let Some(dir) = target.from_dir.clone() {
                let mut session = load_session(DirectorySource::new(dir), &config, &target).await?;
                print_chart(&mut session, &close_up, &hide)?;
            } else {
                let source = api_source(&config, &target)?;
                let mut session = load_session(source, &config, &target).await?;
                print_chart(&mut session, &close_up, &hide)?;
            }
        }

        Command::Export { target, out } => {
            let (rows, keys) = if let Some(dir) = target.from_dir.clone() {
                let session = load_session(DirectorySource::new(dir), &config, &target).await?;
                let c = session.controller();
                (c.rows().to_vec(), c.bundle().map(|b| b.keys()).unwrap_or_default())
            } else {
                let session = load_session(api_source(&config, &target)?, &config, &target).await?;
                let c = session.controller();
                (c.rows().to_vec(), c.bundle().map(|b| b.keys()).unwrap_or_default())
            };
            let n = export_rows_to_file(&rows, &keys, &out)?;
            println!("{} rows × {} metrics → {:?}", fmt_count(n as i64), keys.len(), out);
        }

        Command::Ranges => {
            for range in TimeRange::ALL {
                let marker = if range == config.session.range { " (default)" } else { "" };
                println!("  {:<8} {}{}", range.period(), range.label(), marker);
            }
        }
    }

    Ok(())
}
