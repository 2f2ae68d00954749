//! Autopilot CLI - operator console for portal filing
//!
//! Usage:
//!   autopilot init [PATH]       Write .autopilot/config.toml and an empty ledger
//!   autopilot config [--path]   Show the effective configuration
//!   autopilot run               Open the operator console

use anyhow::{bail, Context, Result};
use autopilot_browser::{ChromeLauncher, Credentials, SessionController};
use autopilot_core::config::AUTOPILOT_DIR;
use autopilot_core::{AutopilotConfig, FilingPeriod};
use autopilot_engine::{
    ActivityLogger, Agent, JsonLedger, JsonNotificationStore, Role, WorkflowRequest,
};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "autopilot")]
#[command(author, version, about = "Operator-supervised filing on the GST portal")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .autopilot/ with a default config and an empty ledger
    Init {
        /// Workspace path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show the effective configuration
    Config {
        /// Only print where the config file lives
        #[arg(long)]
        path: bool,
    },

    /// Open the operator console
    Run {
        /// Portal username (overrides credentials.username)
        #[arg(short, long)]
        username: Option<String>,

        /// Ledger JSON file (overrides stores.ledger_path)
        #[arg(long, value_name = "FILE")]
        ledger: Option<PathBuf>,

        /// Notification store JSON file (overrides stores.notices_path)
        #[arg(long, value_name = "FILE")]
        notices: Option<PathBuf>,

        /// Run the browser without a window
        #[arg(long)]
        headless: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(path).await,
        Commands::Config { path } => cmd_config(path),
        Commands::Run {
            username,
            ledger,
            notices,
            headless,
        } => cmd_run(username, ledger, notices, headless).await,
    }
}

async fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing autopilot in {:?}", path);

    let config_path = AutopilotConfig::write_default(&path).context("Failed to write default config")?;
    let config = AutopilotConfig::default();

    let ledger_path = path.join(&config.stores.ledger_path);
    let mut created_ledger = false;
    if !tokio::fs::try_exists(&ledger_path).await.unwrap_or(false) {
        let empty = serde_json::json!({
            "invoices": [],
            "expenses": []
        });
        tokio::fs::write(&ledger_path, serde_json::to_string_pretty(&empty)?)
            .await
            .context("Failed to write empty ledger")?;
        created_ledger = true;
    }
    tokio::fs::create_dir_all(path.join(&config.browser.screenshot_dir)).await?;

    println!("Initialized autopilot in {:?}", path);
    println!("Created:");
    println!("  {}", config_path.display());
    if created_ledger {
        println!("  {}", ledger_path.display());
    }
    println!("  {}/", path.join(&config.browser.screenshot_dir).display());
    println!(
        "\nSet {} to the portal password before running `autopilot run`.",
        config.credentials.password_env
    );

    Ok(())
}

fn cmd_config(path_only: bool) -> Result<()> {
    let root = Path::new(".");
    let config_path = root.join(AUTOPILOT_DIR).join("config.toml");
    if path_only {
        println!("{}", config_path.display());
        return Ok(());
    }

    let config = AutopilotConfig::load_or_default(root).context("Failed to load configuration")?;
    if !config_path.exists() {
        println!("# {} not found, showing defaults", config_path.display());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn cmd_run(
    username: Option<String>,
    ledger: Option<PathBuf>,
    notices: Option<PathBuf>,
    headless: bool,
) -> Result<()> {
    let root = Path::new(".");
    let mut config = AutopilotConfig::load_or_default(root).context("Failed to load configuration")?;
    if headless {
        config.browser.headless = true;
    }

    let username = username
        .or_else(|| config.credentials.username.clone())
        .context("No portal username: pass --username or set credentials.username")?;
    let ledger_path = ledger.unwrap_or_else(|| config.stores.ledger_path.clone());
    let notices_path = notices.unwrap_or_else(|| config.stores.notices_path.clone());

    let session = SessionController::new(Box::new(ChromeLauncher), &config);
    let mut agent = Agent::new(
        session,
        Arc::new(JsonLedger::new(ledger_path)),
        Arc::new(JsonNotificationStore::new(notices_path)),
    );
    if config.stores.activity_log {
        agent = agent.with_activity_log(ActivityLogger::new(root.join(AUTOPILOT_DIR)));
    }

    let console = Console {
        username,
        password_env: config.credentials.password_env.clone(),
        login_detect: config.timeouts.login_detect(),
    };
    println!("Autopilot console. Type /help for commands.");
    let result = console.run(&mut agent, config.timeouts.reminder()).await;

    agent.stop().await.context("Failed to close the browser session")?;
    print_unread(&mut agent);
    result
}

/// One console line, parsed
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Launch,
    Ack,
    Wait(Option<u64>),
    Notices,
    FileA(FilingPeriod),
    FileB(FilingPeriod),
    Pay(f64),
    Resubmit,
    Status,
    Stop,
    Help,
    Quit,
    /// Free text for the agent
    Say(String),
}

const HELP: &str = "\
Commands:
  /launch                 Open the browser and fill in the login form
  /ack                    Tell the agent you have logged in
  /wait [secs]            Wait for the dashboard to appear
  /notices                Read notices into the notification store
  /file-a <fy> <period>   Prepare GSTR-1, e.g. /file-a 2024-25 March
  /file-b <fy> <period>   Prepare GSTR-3B
  /pay <amount>           Fill a payment challan
  /resubmit               Return to the submit step of the last failed return
  /status                 Show agent and run state
  /stop                   Close the browser and cancel any run
  /quit                   Stop and exit
Anything else is a reply to the agent (yes, no, the one-time code).";

/// Parse a console line. `Ok(None)` for a blank line.
fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(ConsoleCommand::Say(line.to_string())));
    }

    let mut parts = line.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match name {
        "/launch" => ConsoleCommand::Launch,
        "/ack" => ConsoleCommand::Ack,
        "/wait" => match args.first() {
            Some(secs) => ConsoleCommand::Wait(Some(
                secs.parse().with_context(|| format!("'{}' is not a number of seconds", secs))?,
            )),
            None => ConsoleCommand::Wait(None),
        },
        "/notices" => ConsoleCommand::Notices,
        "/file-a" => ConsoleCommand::FileA(parse_period(name, &args)?),
        "/file-b" => ConsoleCommand::FileB(parse_period(name, &args)?),
        "/pay" => {
            let Some(amount) = args.first() else {
                bail!("usage: /pay <amount>");
            };
            let amount = amount
                .trim_start_matches('₹')
                .replace(',', "")
                .parse()
                .with_context(|| format!("'{}' is not an amount", amount))?;
            ConsoleCommand::Pay(amount)
        }
        "/resubmit" => ConsoleCommand::Resubmit,
        "/status" => ConsoleCommand::Status,
        "/stop" => ConsoleCommand::Stop,
        "/help" => ConsoleCommand::Help,
        "/quit" | "/exit" => ConsoleCommand::Quit,
        other => bail!("unknown command {}; /help lists them", other),
    };
    Ok(Some(command))
}

fn parse_period(name: &str, args: &[&str]) -> Result<FilingPeriod> {
    match args {
        [year, period @ ..] if !period.is_empty() => Ok(FilingPeriod::new(*year, period.join(" "))),
        _ => bail!("usage: {} <financial year> <period>", name),
    }
}

struct Console {
    username: String,
    password_env: String,
    login_detect: Duration,
}

impl Console {
    async fn run(&self, agent: &mut Agent, reminder_every: Duration) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut reminder = tokio::time::interval(reminder_every);
        reminder.tick().await;

        loop {
            print_unread(agent);
            print!("> ");
            std::io::stdout().flush()?;

            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read from stdin")? else {
                        break;
                    };
                    reminder.reset();
                    let command = match parse_command(&line) {
                        Ok(Some(command)) => command,
                        Ok(None) => continue,
                        Err(e) => {
                            println!("{}", e);
                            continue;
                        }
                    };
                    if command == ConsoleCommand::Quit {
                        break;
                    }
                    if let Err(e) = self.dispatch(agent, command).await {
                        println!("Error: {}", e);
                    }
                }
                _ = reminder.tick() => {
                    if let Some(notice) = agent.waiting_notice() {
                        println!("\n{}", notice);
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, agent: &mut Agent, command: ConsoleCommand) -> Result<()> {
        match command {
            ConsoleCommand::Launch => {
                let credentials = Credentials::from_env(self.username.clone(), &self.password_env)?;
                agent.launch(&credentials).await?;
            }
            ConsoleCommand::Ack => agent.acknowledge_login().await?,
            ConsoleCommand::Wait(secs) => {
                let timeout = secs.map(Duration::from_secs).unwrap_or(self.login_detect);
                println!("Waiting up to {}s for the dashboard...", timeout.as_secs());
                agent.wait_for_login(timeout).await?;
            }
            ConsoleCommand::Notices => {
                agent.run_workflow(WorkflowRequest::ViewNotices).await?;
            }
            ConsoleCommand::FileA(period) => {
                agent.run_workflow(WorkflowRequest::FileReturnA(period)).await?;
            }
            ConsoleCommand::FileB(period) => {
                agent.run_workflow(WorkflowRequest::FileReturnB(period)).await?;
            }
            ConsoleCommand::Pay(amount) => {
                agent.run_workflow(WorkflowRequest::CreatePayment { amount }).await?;
            }
            ConsoleCommand::Resubmit => {
                agent.resubmit().await?;
            }
            ConsoleCommand::Status => println!("{}", agent.status()),
            ConsoleCommand::Stop => agent.stop().await?,
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Say(text) => agent.handle_operator_message(&text).await?,
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }
}

fn print_unread(agent: &mut Agent) {
    for entry in agent.take_unread() {
        if entry.role == Role::Agent {
            println!("agent: {}", entry.text);
        }
    }
}
