//! CLI entry point for loopcast
//!
//! Loads the configuration, starts the stream and the status server, then
//! reads operator commands from stdin until `quit`, end of input or Ctrl-C.

use clap::Parser;
use loopcast::config::{Config, StrategyKind};
use loopcast::startup::run_startup_checks;
use loopcast::status::{spawn_system_metrics_refresher, SYSTEM_METRICS_INTERVAL};
use loopcast::status_server::run_status_server;
use loopcast::telemetry::init_tracing;
use loopcast::{ContinuityController, StreamState};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// loopcast - keep a looping video broadcast on air across track changes
#[derive(Parser, Debug)]
#[command(name = "loopcast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Loop video to start streaming
    #[arg(short, long)]
    source: PathBuf,

    /// Continuity strategy, overrides the configuration file
    #[arg(long, value_parser = parse_strategy)]
    strategy: Option<StrategyKind>,

    /// Skip startup checks (ffmpeg version, alias directory). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn parse_strategy(s: &str) -> Result<StrategyKind, String> {
    StrategyKind::parse(s).ok_or_else(|| format!("unknown strategy '{}' (handover|persistent)", s))
}

/// One line of operator input
#[derive(Debug, Clone, PartialEq, Eq)]
enum OperatorCommand {
    Switch(PathBuf),
    Start(PathBuf),
    Restart,
    Stop { force: bool },
    Status,
    Help,
    Quit,
}

const HELP: &str = "commands: switch <path> | start <path> | restart | stop | stop! | status | help | quit";

/// Parse one input line. Blank lines yield `Ok(None)`.
fn parse_command(line: &str) -> Result<Option<OperatorCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let path_arg = |verb: &str| -> Result<PathBuf, String> {
        if rest.is_empty() {
            Err(format!("'{}' needs a path", verb))
        } else {
            Ok(PathBuf::from(rest))
        }
    };
    let no_args = |command: OperatorCommand| -> Result<Option<OperatorCommand>, String> {
        if rest.is_empty() {
            Ok(Some(command))
        } else {
            Err(format!("'{}' takes no arguments", verb))
        }
    };

    match verb.to_lowercase().as_str() {
        "switch" => Ok(Some(OperatorCommand::Switch(path_arg("switch")?))),
        "start" => Ok(Some(OperatorCommand::Start(path_arg("start")?))),
        "restart" => no_args(OperatorCommand::Restart),
        "stop" => no_args(OperatorCommand::Stop { force: false }),
        "stop!" => no_args(OperatorCommand::Stop { force: true }),
        "status" => no_args(OperatorCommand::Status),
        "help" | "?" => no_args(OperatorCommand::Help),
        "quit" | "exit" => no_args(OperatorCommand::Quit),
        other => Err(format!("unknown command '{}'; {}", other, HELP)),
    }
}

fn load_config(args: &Args) -> Result<Config, String> {
    let mut config = if args.config.exists() {
        Config::load(&args.config).map_err(|e| e.to_string())?
    } else {
        eprintln!(
            "Config file {} not found, using defaults",
            args.config.display()
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };
    if let Some(strategy) = args.strategy {
        config.stream.strategy = strategy;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Run one operator command. Returns false when the session should end.
async fn execute(controller: &ContinuityController, command: OperatorCommand) -> bool {
    let result = match command {
        OperatorCommand::Switch(path) => controller.switch_track(&path).await,
        OperatorCommand::Start(path) => {
            // Error is only left through an explicit stop
            if controller.state().await == StreamState::Error {
                if let Err(e) = controller.stop_stream(true).await {
                    warn!(error = %e, "stop before start failed");
                }
            }
            controller.start_stream(&path).await
        }
        OperatorCommand::Restart => controller.restart_stream().await,
        OperatorCommand::Stop { force } => controller.stop_stream(force).await,
        OperatorCommand::Status => {
            let snapshot = controller.get_status().await;
            match serde_json::to_string_pretty(&snapshot) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to render status: {}", e),
            }
            return true;
        }
        OperatorCommand::Help => {
            println!("{}", HELP);
            return true;
        }
        OperatorCommand::Quit => return false,
    };

    match result {
        Ok(()) => println!("ok ({})", controller.state().await),
        Err(e) => println!("failed: {}", e),
    }
    true
}

async fn operator_loop(controller: &ContinuityController) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read operator input");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(command)) => {
                if !execute(controller, command).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => println!("{}", e),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let _telemetry = init_tracing(&config.stream.log_level);

    if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config) {
        error!(error = %e, "startup checks failed");
        return ExitCode::FAILURE;
    }

    info!(
        config = %args.config.display(),
        strategy = %config.stream.strategy,
        endpoint = %config.stream.endpoint,
        "loopcast starting"
    );

    let bind = config.status.bind.clone();
    let controller = ContinuityController::from_config(config);
    let shutdown = CancellationToken::new();

    let server = {
        let status = controller.status_handle();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(status, &bind, shutdown).await {
                error!(error = %e, "status server failed");
            }
        })
    };
    let refresher = spawn_system_metrics_refresher(
        controller.status_handle(),
        SYSTEM_METRICS_INTERVAL,
        shutdown.clone(),
    );

    let mut exit = ExitCode::SUCCESS;
    match controller.start_stream(&args.source).await {
        Ok(()) => {
            println!("Streaming {} ({})", args.source.display(), HELP);
            operator_loop(&controller).await;
        }
        Err(e) => {
            error!(error = %e, "failed to start stream");
            exit = ExitCode::FAILURE;
        }
    }

    if let Err(e) = controller.stop_stream(false).await {
        error!(error = %e, "stream did not stop cleanly");
        exit = ExitCode::FAILURE;
    }
    shutdown.cancel();
    let _ = server.await;
    let _ = refresher.await;
    info!("loopcast stopped");
    exit
}
