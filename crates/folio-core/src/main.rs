use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use folio_asset::SubstitutionMap;
use folio_core::sim::{run_simulator, SimulatorConfig};
use folio_core::SessionConfig;
use folio_markup::{inline_image_sources, MarkupRewriter};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("folio-sim")
        .version(folio_core::VERSION)
        .about("Folio save-pipeline simulator and markup tools")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded random editing session and check save invariants")
                .arg(
                    Arg::new("steps")
                        .long("steps")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Number of user actions to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability that an inserted image fails its first upload"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Delay added to every backend call"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Session config TOML file"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop at the first violation"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("rewrite")
                .about("Rewrite an HTML file for persistence (no uploads)")
                .arg(
                    Arg::new("input")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("HTML file to rewrite"),
                ),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,folio_core=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let defaults = SimulatorConfig::default();
    let session = match args.get_one::<PathBuf>("config") {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => defaults.session.clone(),
    };
    let failure_rate = args.get_one::<f64>("failure-rate").copied().unwrap_or(0.1);
    if !(0.0..=1.0).contains(&failure_rate) {
        bail!("--failure-rate must be between 0 and 1, got {failure_rate}");
    }

    let config = SimulatorConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
        steps: args.get_one::<u64>("steps").copied().unwrap_or(defaults.steps),
        stop_on_first_violation: args.get_flag("stop-on-violation"),
        upload_failure_rate: failure_rate,
        latency_ms: args.get_one::<u64>("latency-ms").copied().unwrap_or(defaults.latency_ms),
        session,
        ..defaults
    };

    let report = run_simulator(config).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn rewrite(args: &ArgMatches) -> anyhow::Result<bool> {
    let Some(path) = args.get_one::<PathBuf>("input") else {
        bail!("missing input file");
    };
    let markup = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let substitutions = SubstitutionMap::new();
    let rewritten = MarkupRewriter::new(&substitutions).rewrite(&markup);
    println!("{}", rewritten.markup);
    eprintln!(
        "images: {}, alt derived: {}, inline dropped: {}, references dropped: {}",
        rewritten.images, rewritten.alt_derived, rewritten.dropped_inline, rewritten.dropped_references
    );
    Ok(inline_image_sources(&rewritten.markup).is_empty())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("json-logs"));

    let passed = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await?,
        Some(("rewrite", args)) => rewrite(args)?,
        _ => unreachable!("subcommand is required"),
    };
    std::process::exit(i32::from(!passed));
}
