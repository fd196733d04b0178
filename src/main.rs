//! PALM entry point: CLI wiring, logging and collaborator construction.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, Timelike};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use palm::config::PalmConfig;
use palm::engine::{Engine, EngineOptions};
use palm::io::export::export_csv;
use palm::io::{CsvHistory, JsonFileForecast};
use palm::runner::{Runner, WALL_CLOCK_REPORT_LIMIT};
use palm::site::SimulatedSite;

/// Parsed CLI arguments.
#[derive(Default)]
struct CliArgs {
    config_path: Option<String>,
    preset: Option<String>,
    once: bool,
    test: bool,
    debug: bool,
    simulate: Option<usize>,
    start: Option<NaiveDateTime>,
    forecast: Vec<String>,
    history: Option<String>,
    chart_out: Option<String>,
    telemetry_out: Option<String>,
}

fn print_help() {
    eprintln!("palm: PV Active Load Manager");
    eprintln!();
    eprintln!("Usage: palm [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load configuration from TOML file");
    eprintln!("  --preset <name>          Use a built-in preset (baseline, shoulder, winter)");
    eprintln!("  --once                   Compute and apply the charge target, then exit");
    eprintln!("  --test                   Plan immediately and log writes instead of sending them");
    eprintln!("  --debug                  Verbose logging");
    eprintln!("  --simulate <minutes>     Run against the simulated site on a simulated clock");
    eprintln!("  --start <YYYY-MM-DDTHH:MM>  Simulated start time (default: now)");
    eprintln!("  --forecast <path>        Forecast JSON file, repeat for each array");
    eprintln!("  --history <path>         Prior-day load profiles as CSV, most recent first");
    eprintln!("  --chart-out <path>       Export the last SoC chart to CSV");
    eprintln!("  --telemetry-out <path>   Export per-tick reports to CSV (last 7 days when live)");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the baseline preset is used.");
}

fn value(args: &[String], i: usize, flag: &str, what: &str) -> String {
    match args.get(i) {
        Some(v) => v.clone(),
        None => {
            eprintln!("error: {flag} requires a {what} argument");
            process::exit(1);
        }
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                i += 1;
                cli.config_path = Some(value(&args, i, "--config", "path"));
            }
            "--preset" => {
                i += 1;
                cli.preset = Some(value(&args, i, "--preset", "name"));
            }
            "--once" => cli.once = true,
            "--test" => cli.test = true,
            "--debug" => cli.debug = true,
            "--simulate" => {
                i += 1;
                let v = value(&args, i, "--simulate", "minutes");
                if let Ok(m) = v.parse::<usize>() {
                    cli.simulate = Some(m);
                } else {
                    eprintln!("error: --simulate value \"{v}\" is not a number of minutes");
                    process::exit(1);
                }
            }
            "--start" => {
                i += 1;
                let v = value(&args, i, "--start", "time");
                if let Ok(t) = NaiveDateTime::parse_from_str(&v, "%Y-%m-%dT%H:%M") {
                    cli.start = Some(t);
                } else {
                    eprintln!("error: --start value \"{v}\" is not YYYY-MM-DDTHH:MM");
                    process::exit(1);
                }
            }
            "--forecast" => {
                i += 1;
                cli.forecast.push(value(&args, i, "--forecast", "path"));
            }
            "--history" => {
                i += 1;
                cli.history = Some(value(&args, i, "--history", "path"));
            }
            "--chart-out" => {
                i += 1;
                cli.chart_out = Some(value(&args, i, "--chart-out", "path"));
            }
            "--telemetry-out" => {
                i += 1;
                cli.telemetry_out = Some(value(&args, i, "--telemetry-out", "path"));
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(cli: &CliArgs) -> PalmConfig {
    // --config takes priority, then --preset, then baseline default
    let config = if let Some(ref path) = cli.config_path {
        PalmConfig::from_toml_file(Path::new(path))
    } else if let Some(ref name) = cli.preset {
        PalmConfig::from_preset(name)
    } else {
        Ok(PalmConfig::baseline())
    };
    let config = config.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }
    config
}

async fn run(cli: CliArgs, config: PalmConfig) {
    let site = Arc::new(SimulatedSite::new(&config));
    let mut collab = site.collaborators();
    let slot_minutes = config.forecast.slot_minutes;
    if !cli.forecast.is_empty() {
        let paths = cli.forecast.iter().map(PathBuf::from).collect();
        collab.forecast = Arc::new(JsonFileForecast::new(paths, slot_minutes));
    }
    if let Some(ref path) = cli.history {
        match CsvHistory::from_file(slot_minutes, Path::new(path)) {
            Ok(history) => collab.history = Arc::new(history),
            Err(e) => {
                error!(error = %e, "cannot read load history");
                process::exit(1);
            }
        }
    }

    let options = EngineOptions {
        test: cli.test,
        once: cli.once,
    };
    let engine = Engine::new(&config, collab, options);
    let mut runner = Runner::new(engine, Some(site));

    if let Some(minutes) = cli.simulate {
        let start = cli.start.unwrap_or_else(|| {
            let now = Local::now().naive_local();
            now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now)
        });
        info!(%start, minutes, "simulating");
        runner.run_simulated(start, minutes).await;
    } else {
        runner = runner
            .keep_reports(cli.telemetry_out.is_some())
            .report_limit(Some(WALL_CLOCK_REPORT_LIMIT));
        runner.run_wall_clock(cli.test || cli.once).await;
    }

    let (engine, reports) = runner.into_parts();

    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&reports, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Telemetry written to {path}");
    }

    if let Some(ref path) = cli.chart_out {
        match engine.chart() {
            Some(chart) => {
                if let Err(e) = chart.export_csv(Path::new(path)) {
                    eprintln!("error: failed to write chart: {e}");
                    process::exit(1);
                }
                eprintln!("SoC chart written to {path}");
            }
            None => eprintln!("no SoC chart: no simulated plan was made"),
        }
    }
}

fn main() {
    let cli = parse_args();
    init_logging(cli.debug);
    let config = load_config(&cli);

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });
    rt.block_on(run(cli, config));
}
