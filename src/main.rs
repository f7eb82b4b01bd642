use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use colored::*;
use faviscan::{
    config::{DatasetFormat, ScanConfig},
    output::{OutputConfig, OutputFormat, OutputManager},
    utils::Logger,
    worker::{ScanJob, ScanWorker},
};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

fn cli() -> Command {
    Command::new("faviscan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Identify web software by the favicon it serves")
        .arg(
            Arg::new("targets")
                .value_name("TARGET")
                .help("Targets to scan (IP, hostname, or CIDR)")
                .required(true)
                .num_args(1..)
                .index(1),
        )
        .arg(
            Arg::new("ports")
                .short('p')
                .long("ports")
                .value_name("PORTS")
                .help("Comma separated ports (default: 80,443,8080)")
                .value_delimiter(',')
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file (default: ~/.faviscan.toml)"),
        )
        .arg(
            Arg::new("dataset")
                .long("dataset")
                .value_name("FILE")
                .help("Fingerprint dataset XML"),
        )
        .arg(
            Arg::new("dataset-format")
                .long("dataset-format")
                .value_name("FORMAT")
                .help("Dataset layout: auto, favicons or recog")
                .value_parser(["auto", "favicons", "recog"]),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_name("N")
                .help("Simultaneous probes")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("MS")
                .help("Per-attempt timeout in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .value_name("N")
                .help("Retries after the first attempt")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("verify-tls")
                .long("verify-tls")
                .help("Verify TLS certificates")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FORMAT")
                .help("Output format: text or json")
                .default_value("text"),
        )
        .arg(
            Arg::new("output-file")
                .long("output-file")
                .value_name("FILE")
                .help("Write output to a file instead of stdout"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("error, warn, info, debug or trace")
                .default_value("warn"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .help("Emit logs as JSON lines")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue),
        )
}

fn build_config(matches: &clap::ArgMatches) -> anyhow::Result<ScanConfig> {
    let config = match matches.get_one::<String>("config") {
        Some(path) => ScanConfig::from_toml_file(path)?,
        None => ScanConfig::load_default_config()?,
    };
    let mut config = config.apply_env_overrides()?;

    if let Some(path) = matches.get_one::<String>("dataset") {
        config.dataset_path = PathBuf::from(path);
    }
    if let Some(format) = matches.get_one::<String>("dataset-format") {
        config.dataset_format = format.parse::<DatasetFormat>()?;
    }
    if let Some(&concurrency) = matches.get_one::<usize>("concurrency") {
        config = config.with_concurrency(concurrency);
    }
    if let Some(&timeout) = matches.get_one::<u64>("timeout") {
        config = config.with_timeout(timeout);
    }
    if let Some(&retries) = matches.get_one::<u32>("retries") {
        let backoff_ms = config.retry_backoff_ms;
        config = config.with_retries(retries, backoff_ms);
    }
    if matches.get_flag("verify-tls") {
        config.verify_tls = true;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run(matches: &clap::ArgMatches) -> anyhow::Result<bool> {
    let config = build_config(matches)?;

    let format = matches
        .get_one::<String>("output")
        .map(|s| s.parse::<OutputFormat>())
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or_default();
    let output = OutputManager::new(OutputConfig {
        format,
        file: matches.get_one::<String>("output-file").cloned(),
        colored: !matches.get_flag("no-color"),
    });

    let targets: Vec<String> = matches
        .get_many::<String>("targets")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let ports: Option<Vec<u32>> = matches
        .get_many::<u32>("ports")
        .map(|values| values.copied().collect());

    let worker = ScanWorker::new(config).context("invalid configuration")?;
    worker
        .orchestrator()
        .context("failed to initialise scanner")?;

    let job = ScanJob::new(targets, ports);
    let port_count = job
        .ports
        .as_ref()
        .map_or(worker.config().default_ports.len(), Vec::len);
    Logger::log_scan_start(job.targets.len(), port_count);

    let start = Instant::now();
    let report = worker.run_job(&job);
    if let Some(response) = &report.result {
        Logger::log_scan_complete(start.elapsed(), response.results.len(), response.errors.len());
    }

    output
        .write_report(&report)
        .context("failed to write output")?;

    Ok(report.is_done())
}

fn main() {
    let matches = cli().get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .and_then(|s| s.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Warn);
    Logger::init(level, matches.get_flag("log-json"));

    if matches.get_flag("no-color") {
        colored::control::set_override(false);
    }

    match run(&matches) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}
