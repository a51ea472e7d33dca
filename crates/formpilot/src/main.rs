use chrono::Local;
use clap::{Parser, Subcommand};
use formpilot_e::{ChromeConnector, SystemProcessControl};
use formpilot_engine::config::{ConfigLoader, EventConfig};
use formpilot_engine::driver::{FormDriver, FormFillTask};
use formpilot_engine::error::EngineError;
use formpilot_engine::logging::Reporter;
use formpilot_engine::recovery::RecoveryController;
use formpilot_engine::schema::{FORM_FIELDS, FieldValue, FormValues};
use formpilot_engine::session::{SessionManager, SessionSettings};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "formpilot", version, about = "Fill the event registration form in a private browser")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (JSON or YAML). Defaults to $FORMPILOT_CONFIG_PATH, ./config.json, then ~/.formpilot/config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// URL of an external WebDriver server. If not provided, the private chromedriver is launched.
    #[arg(short, long, global = true)]
    webdriver_url: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Open the form and fill it in, recovering from browser loss
    Fill,
    /// Start the private browser on its profile so you can sign in once
    Profile,
    /// Check the config and show the values that would be entered
    Validate,
    /// Stop leftover private browser and driver processes
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Operator lines and diagnostics both go to stderr; stdout carries the validate preview.
    let level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let path = ConfigLoader::resolve_path(args.config.as_deref());
    debug!("Using config {}", path.display());
    let mut config = match ConfigLoader::load_from(&path).await {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", EngineError::from(err).operator_message());
            return Ok(ExitCode::FAILURE);
        }
    };
    if let Some(url) = args.webdriver_url {
        info!("Using external WebDriver at {}", url);
        config.engine.launch.webdriver_url = Some(url);
    }

    let reporter = Reporter::default();
    let code = match args.command {
        Command::Fill => fill(&config, reporter).await,
        Command::Profile => profile(&config, reporter).await,
        Command::Validate => validate(&config, reporter),
        Command::Cleanup => cleanup(&config, reporter).await,
    };
    Ok(code)
}

fn session_manager(config: &EventConfig, reporter: Reporter) -> SessionManager {
    SessionManager::new(
        SessionSettings::from_config(config),
        Arc::new(SystemProcessControl::new()),
        Arc::new(ChromeConnector::new()),
        reporter,
    )
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

fn fail(err: &EngineError) -> ExitCode {
    eprintln!("{}", err.operator_message());
    ExitCode::FAILURE
}

async fn fill(config: &EventConfig, reporter: Reporter) -> ExitCode {
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received; stopping at the next safe point.");
            on_ctrl_c.cancel();
        }
    });

    let values = FormValues::from_config(config, Local::now().date_naive(), &reporter);
    let driver = FormDriver::new(&config.engine, reporter.clone()).with_cancellation(cancel.clone());
    let mut task = FormFillTask::new(driver, values);
    let mut sessions = session_manager(config, reporter.clone());

    let outcome = RecoveryController::from_settings(&config.engine.recovery, reporter)
        .with_cancellation(cancel)
        .run_to_outcome(&mut task, &mut sessions)
        .await;
    exit_code(outcome.exit_code())
}

async fn profile(config: &EventConfig, reporter: Reporter) -> ExitCode {
    let sessions = session_manager(config, reporter.clone());
    match sessions.bootstrap_profile().await {
        Ok(handle) => {
            reporter.ok(format!(
                "Browser started on profile {} (PID {}). Sign in, then close it.",
                sessions.settings().profile_dir.display(),
                handle.pid
            ));
            ExitCode::SUCCESS
        }
        Err(err) => fail(&err),
    }
}

async fn cleanup(config: &EventConfig, reporter: Reporter) -> ExitCode {
    let sessions = session_manager(config, reporter.clone());
    match sessions.terminate_orphans().await {
        Ok(0) => {
            reporter.info("No leftover browser processes found");
            ExitCode::SUCCESS
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => fail(&err),
    }
}

fn validate(config: &EventConfig, reporter: Reporter) -> ExitCode {
    let values = FormValues::from_config(config, Local::now().date_naive(), &reporter);
    println!("form_url: {}", config.form_url);
    println!("reply e-mail: {}", if values.record_reply_email { "on" } else { "off" });
    for spec in &FORM_FIELDS {
        if let Some(value) = values.get(spec.key) {
            println!("{}: {}", spec.label, preview(value));
        }
    }
    reporter.ok("Config is valid");
    ExitCode::SUCCESS
}

fn preview(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) if text.contains('\n') => {
            format!("{} ...", text.lines().next().unwrap_or_default())
        }
        FieldValue::Text(text) | FieldValue::Choice(text) => text.clone(),
        FieldValue::Choices(choices) => format!("[{}]", choices.join(", ")),
        FieldValue::DateTime { date, hour, minute } => {
            format!("{} {}:{}", date.format("%Y-%m-%d"), hour, minute)
        }
    }
}
