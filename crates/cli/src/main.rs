use std::str::FromStr;

use anyhow::{Context, Result};
use carbonfeed_core::{format_timestamp, ConfigDocument, DEFAULT_LOCATION};
use carbonfeed_forecast::HttpForecastClient;
use carbonfeed_kubehub::{ConfigStore, KubeConfigStore, MemoryConfigStore};
use carbonfeed_publish::{RunConfig, RunError, RunReport, Target};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};

const DEFAULT_URL_TEMPLATE: &str = "https://carbon-aware-api.azurewebsites.net/emissions/forecasts/current?location={}";

#[derive(Parser, Debug)]
#[command(name = "carbonfeedctl", version, about = "Publish a grid carbon-intensity forecast into a ConfigMap")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the forecast once and publish it
    Run(RunArgs),
    /// List supported location codes
    Locations,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Grid location code, e.g. "DE" or "US-CAL-CISO"
    #[arg(long, env = "CARBONFEED_LOCATION", default_value = DEFAULT_LOCATION)]
    location: String,
    /// Forecast endpoint; `{}` is replaced by the location code
    #[arg(long = "url-template", env = "CARBONFEED_URL_TEMPLATE", default_value = DEFAULT_URL_TEMPLATE)]
    url_template: String,
    /// Namespace of the target ConfigMap
    #[arg(long = "namespace", env = "CARBONFEED_NAMESPACE", default_value = "kube-system")]
    namespace: String,
    /// Name of the target ConfigMap
    #[arg(long = "name", env = "CARBONFEED_CONFIGMAP", default_value = "carbon-intensity")]
    name: String,
    /// binaryData key the forecast payload is written to
    #[arg(long = "key", env = "CARBONFEED_PAYLOAD_KEY", default_value = "data")]
    payload_key: String,
    /// Publish into an in-memory store and print the document instead of writing to the cluster
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
}

impl RunArgs {
    /// Build the run configuration and reject a bad location or template before any client exists.
    fn prepare(&self) -> Result<RunConfig, RunError> {
        let cfg = self.to_config();
        carbonfeed_publish::validate(&cfg)?;
        Ok(cfg)
    }

    fn to_config(&self) -> RunConfig {
        RunConfig {
            location: self.location.clone(),
            url_template: self.url_template.clone(),
            target: Target {
                namespace: self.namespace.clone(),
                name: self.name.clone(),
                payload_key: self.payload_key.clone(),
            },
        }
    }
}

fn init_tracing() {
    let env = std::env::var("CARBONFEED_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CARBONFEED_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CARBONFEED_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(e) => match e.downcast_ref::<RunError>() {
            Some(run_err) => {
                error!(kind = ?run_err.kind(), error = %run_err, "run failed");
                eprintln!("carbonfeedctl: {}", run_err);
                run_err.exit_code()
            }
            None => {
                error!(error = ?e, "unexpected failure");
                eprintln!("carbonfeedctl: {:#}", e);
                1
            }
        },
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Locations => {
            let locations = carbonfeed_core::catalog();
            match cli.output {
                Output::Human => {
                    println!("CODE          NAME");
                    for l in locations {
                        println!("{:<13} {}", l.code, l.name);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(locations)?),
            }
        }
        Commands::Run(args) => {
            let cfg = args.prepare()?;
            info!(location = %cfg.location, ns = %cfg.target.namespace, name = %cfg.target.name, dry_run = args.dry_run, "run invoked");
            let forecast = HttpForecastClient::new().context("building HTTP client")?;
            let report = if args.dry_run {
                let store = MemoryConfigStore::new();
                execute(&cfg, &forecast, &store).await?
            } else {
                let store = KubeConfigStore::connect().await.map_err(RunError::from)?;
                execute(&cfg, &forecast, &store).await?
            };
            render_report(&report, cli.output, args.dry_run)?;
        }
    }
    Ok(())
}

async fn execute(cfg: &RunConfig, forecast: &HttpForecastClient, store: &dyn ConfigStore) -> Result<RunReport> {
    Ok(carbonfeed_publish::run(cfg, forecast, store).await?)
}

fn render_report(report: &RunReport, output: Output, dry_run: bool) -> Result<()> {
    let doc = &report.outcome.document;
    match output {
        Output::Human => {
            let bound = |ts: &Option<_>| ts.as_ref().map(format_timestamp).unwrap_or_else(|| "-".to_string());
            let action = if dry_run { "would publish" } else if report.outcome.created { "created" } else { "updated" };
            println!(
                "{} {} • {} of {} points for {} ({}) • {} .. {}",
                action,
                doc.key(),
                report.published,
                report.fetched,
                report.location.code,
                report.location.name,
                bound(&report.first_timestamp),
                bound(&report.last_timestamp),
            );
            if dry_run {
                print_document(doc);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

fn print_document(doc: &ConfigDocument) {
    for (k, v) in &doc.metadata {
        println!("  data.{:<20} {}", k, v);
    }
    for (k, v) in &doc.payload {
        println!("  binaryData.{:<14} {}", k, String::from_utf8_lossy(v));
    }
}
