//! SapFlow runner executable
//!
//! Signs into OpenIAP, drives SAP GUI for every order in the input
//! spreadsheet and reports failures.

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use sapflow_core::clients::openiap::Unauthenticated;
use sapflow_core::config::SapTiming;
use sapflow_core::services::{install_panic_hook, panic_message, take_panic_site};
use sapflow_core::{
    get_ad_user, load_config, AppConfig, DataService, DesktopNotifier, DirectoryQuery, ErpBackend,
    ExceptionHandler, MemoryStore, OpenIapClient, OrderRunner, PauseMode, RunOutcome, SapGui, ScriptedBridge,
    UncaughtFailure, VbsBridge,
};
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const INTERRUPTED: u8 = 130;

fn cli() -> Command {
    Command::new("sapflow-runner")
        .version(env!("CARGO_PKG_VERSION"))
        .about("SAP order automation runner")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path (default: configs.json)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Append log output to this file instead of stderr")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("no-pause")
                .long("no-pause")
                .help("Do not wait for Enter between orders")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Use an in-memory store and a scripted SAP GUI; nothing leaves the machine")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("desktop-notify")
                .long("desktop-notify")
                .help("Show a desktop notification when the run ends")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("lookup-user")
                .long("lookup-user")
                .value_name("IDENTITY")
                .help("Print the Active Directory properties of a user and exit")
                .conflicts_with("lookup-email"),
        )
        .arg(
            Arg::new("lookup-email")
                .long("lookup-email")
                .value_name("EMAIL")
                .help("Print the Active Directory properties of the user with this email and exit"),
        )
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();

    if let Err(e) = init_logging(matches.get_one::<PathBuf>("log-file")) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(&matches).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    if let Some(query) = directory_query(matches) {
        let properties = get_ad_user(&query).await.context("Directory lookup failed")?;
        for (name, value) in properties {
            println!("{}: {}", name, value);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = matches.get_one::<PathBuf>("config");
    let config = load_config(config_path.map(PathBuf::as_path)).context("Failed to load configuration")?;
    log::info!(
        "Loaded configuration from {}",
        config_path.map(|p| p.display().to_string()).unwrap_or_else(|| "configs.json".to_string())
    );

    let pause = if matches.get_flag("no-pause") { PauseMode::Disabled } else { PauseMode::Interactive };
    let desktop = matches.get_flag("desktop-notify");

    install_panic_hook();

    if matches.get_flag("dry-run") {
        log::info!("Dry run: using an in-memory store and a scripted SAP GUI");
        let data = Arc::new(dry_run_store(&config));
        let mut sap_app = config.sap_app.clone();
        sap_app.timing = SapTiming::immediate();
        let erp = SapGui::new(ScriptedBridge::permissive(), sap_app);
        return Ok(execute(config, data, erp, pause, desktop).await);
    }

    let client = OpenIapClient::<Unauthenticated>::new(&config.openiap)?;
    let client = match client.signin().await {
        Ok(client) => client,
        Err(e) => {
            log::error!("Failed to connect to OpenIAP: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let erp = SapGui::new(VbsBridge::new(), config.sap_app.clone());
    Ok(execute(config, Arc::new(client), erp, pause, desktop).await)
}

fn directory_query(matches: &ArgMatches) -> Option<DirectoryQuery> {
    if let Some(identity) = matches.get_one::<String>("lookup-user") {
        Some(DirectoryQuery::Identity(identity.clone()))
    } else {
        matches.get_one::<String>("lookup-email").map(|email| DirectoryQuery::Email(email.clone()))
    }
}

/// Memory store holding a placeholder SAP credential that matches the configured query
fn dry_run_store(config: &AppConfig) -> MemoryStore {
    let sap = &config.database.sap;
    let mut document = match &sap.query {
        Value::Object(query) => query.clone(),
        _ => serde_json::Map::new(),
    };
    if let Value::Object(credential) = json!({"platform": "DRY-RUN", "username": "dry-run", "password": "dry-run"}) {
        document.extend(credential);
    }
    MemoryStore::new().with_documents(&sap.collection, vec![Value::Object(document)])
}

/// Run the orders in a task, racing it against Ctrl-C. The data service is closed on every path.
async fn execute<D, E>(config: AppConfig, data: Arc<D>, erp: E, pause: PauseMode, desktop: bool) -> ExitCode
where
    D: DataService + 'static,
    E: ErpBackend + 'static,
{
    let handler = ExceptionHandler::new(&config, data.clone());
    let mut runner = OrderRunner::new(config, data.clone(), erp).with_pause_mode(pause);

    let task = tokio::spawn(async move { runner.run().await });
    let abort = task.abort_handle();

    let code = tokio::select! {
        joined = task => match joined {
            Ok(outcome) => {
                announce(&outcome, desktop).await;
                ExitCode::SUCCESS
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic().as_ref());
                let failure = UncaughtFailure::Panic { message, location: take_panic_site() };
                handler.handle_uncaught(failure, false).await;
                ExitCode::FAILURE
            }
            Err(e) => {
                log::error!("Order runner stopped: {}", e);
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            abort.abort();
            handler.handle_uncaught(UncaughtFailure::Interrupted, false).await;
            ExitCode::from(INTERRUPTED)
        }
    };

    data.close().await;
    code
}

async fn announce(outcome: &RunOutcome, desktop: bool) {
    let message = match outcome {
        RunOutcome::Completed(summary) => {
            format!("Processed {} orders, {} failed", summary.processed, summary.failures.len())
        }
        RunOutcome::InvalidCredentials => "Stopped: invalid SAP credentials".to_string(),
        RunOutcome::RejectedSpreadsheet => "Stopped: the order column must be positive".to_string(),
        RunOutcome::Failed(record) => format!("Failed: {}", record.error_message),
    };
    log::info!("{}", message);

    if desktop {
        DesktopNotifier::new("SapFlow").notify("SapFlow", &message, Duration::from_secs(10)).await;
    }
}
