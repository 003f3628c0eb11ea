use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use log::{info, warn};
use std::path::{Path, PathBuf};

use geotrace_core::{
    Config, GeoTraceError,
    network::{lookup_listed, AnalysisPipeline, GeolocationResolver, OutputFormat, PipelineState, StdoutSink},
    worker::AnalysisWorker,
};

const DEFAULT_CONFIG_PATH: &str = "config/default.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("geotrace")
        .version("0.1.0")
        .author("itsbryanman <dev@piranhaswarm.com>")
        .about("Geolocates the public IPv4 endpoints found in packet captures")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("analyze")
                .about("Analyze a pcap or pcapng capture file")
                .arg(
                    Arg::new("pcap")
                        .short('p')
                        .long("pcap")
                        .value_name("FILE")
                        .help("Capture file to analyze")
                )
                .arg(geoip_db_arg())
                .arg(config_arg())
                .arg(format_arg())
                .arg(
                    Arg::new("max-packets")
                        .long("max-packets")
                        .value_name("COUNT")
                        .help("Stop after this many records")
                        .value_parser(clap::value_parser!(usize))
                )
        )
        .subcommand(
            Command::new("lookup")
                .about("Geolocate a list of addresses")
                .arg(
                    Arg::new("ips")
                        .short('i')
                        .long("ips")
                        .value_name("IP_LIST")
                        .help("Comma-separated list of IPv4 addresses")
                        .required(true)
                )
                .arg(geoip_db_arg())
                .arg(config_arg())
                .arg(format_arg())
        )
        .get_matches();

    match matches.subcommand() {
        Some(("analyze", sub_matches)) => {
            let mut config = load_config(sub_matches)?;
            if let Some(pcap) = sub_matches.get_one::<String>("pcap") {
                config.analysis.capture_path = Some(PathBuf::from(pcap));
            }
            if let Some(max) = sub_matches.get_one::<usize>("max-packets") {
                config.capture.max_packets = Some(*max);
            }
            run_analyze_mode(&config).await?;
        }
        Some(("lookup", sub_matches)) => {
            let config = load_config(sub_matches)?;
            let ip_list = sub_matches
                .get_one::<String>("ips")
                .map(String::as_str)
                .unwrap_or_default();
            run_lookup_mode(&config, ip_list)?;
        }
        _ => {
            eprintln!("No subcommand provided. Use --help for usage information.");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn geoip_db_arg() -> Arg {
    Arg::new("geoip-db")
        .short('g')
        .long("geoip-db")
        .value_name("PATH")
        .help("Path to GeoIP2/GeoLite2 City database file")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file path")
}

fn format_arg() -> Arg {
    Arg::new("format")
        .short('f')
        .long("format")
        .value_name("FORMAT")
        .help("Output format")
        .value_parser(["text", "json"])
}

/// Loads the config, starts logging, then applies the shared CLI overrides.
fn load_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let explicit = matches.get_one::<String>("config");
    let config = match explicit {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config {}", path))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::from_file(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load config {}", DEFAULT_CONFIG_PATH))?,
        None => Config::default(),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.logging.level.as_str())).init();
    if explicit.is_none() && !Path::new(DEFAULT_CONFIG_PATH).exists() {
        info!("Config file not found, using defaults");
    }

    let mut config = config;
    if let Some(db) = matches.get_one::<String>("geoip-db") {
        config.analysis.geoip_database_path = Some(PathBuf::from(db));
    }
    if let Some(format) = matches.get_one::<String>("format") {
        config.analysis.output_format = format.parse::<OutputFormat>()?;
    }
    Ok(config)
}

async fn run_analyze_mode(config: &Config) -> anyhow::Result<()> {
    let inputs = config.inputs()?;
    let options = config.pipeline_options()?;

    info!(
        "Starting analysis of {} with {}",
        inputs.capture_path.display(),
        inputs.geoip_database_path.display()
    );
    let pipeline = AnalysisPipeline::open(&inputs.capture_path, &inputs.geoip_database_path, options)?;
    let worker = AnalysisWorker::spawn(pipeline)?;

    let cancel = worker.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping analysis");
            cancel.cancel();
        }
    });

    let lines = worker.lines();
    tokio::task::spawn_blocking(move || {
        for line in lines.iter() {
            println!("{}", line);
        }
    })
    .await
    .map_err(|e| GeoTraceError::Worker(e.to_string()))?;

    let report = tokio::task::spawn_blocking(move || worker.join())
        .await
        .map_err(|e| GeoTraceError::Worker(e.to_string()))??;

    match report.state {
        PipelineState::Cancelled => warn!("Analysis stopped before the end of the capture"),
        _ => info!("Analysis completed."),
    }
    info!(
        "{} results from {} records ({} located)",
        report.summary.emitted(),
        report.summary.records,
        report.summary.located
    );

    Ok(())
}

fn run_lookup_mode(config: &Config, ip_list: &str) -> anyhow::Result<()> {
    let database_path = config.database_path()?;
    let filter = config.private_filter()?;
    let mut resolver = GeolocationResolver::open(&database_path)?;

    let summary = lookup_listed(
        ip_list.split(','),
        &filter,
        &mut resolver,
        config.analysis.output_format,
        &mut StdoutSink,
    );

    info!(
        "Looked up {} addresses: {} located, {} not found, {} malformed",
        summary.records, summary.located, summary.not_found, summary.malformed_skipped
    );

    Ok(())
}
