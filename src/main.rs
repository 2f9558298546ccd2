use std::{
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use clap::Parser;
use rust_decimal::Decimal;
use serde::Serialize;
use tollgate::{
    config::TollgateConfig,
    db::DbPool,
    events::EventBus,
    models::{
        BillingEventFilter, BillingStatus, CreatePriceRecord, UpdatePriceRecord, UsageReport,
    },
    observability,
    services::BillingService,
};
use uuid::Uuid;

const DEFAULT_CONFIG_PATH: &str = "tollgate.toml";

/// CLI arguments for tollgate
#[derive(Parser, Debug)]
#[command(version, about = "Usage metering and billing engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./tollgate.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write Prometheus metrics to this file when the command finishes
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Price a usage report and debit the user
    Charge {
        #[arg(short, long)]
        user: Uuid,
        /// JSON usage report (defaults to stdin)
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Add points to a user's balance
    Credit {
        #[arg(short, long)]
        user: Uuid,
        #[arg(short, long)]
        points: i64,
    },
    /// Show a user's balance
    Balance {
        #[arg(short, long)]
        user: Uuid,
    },
    /// List billing events, newest first
    History {
        #[arg(short, long)]
        user: Option<Uuid>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        status: Option<StatusArg>,
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Manage the price catalog
    #[command(subcommand)]
    Price(PriceCommand),
    /// Manage the exchange rate
    #[command(subcommand)]
    Rate(RateCommand),
    /// Manage the profit margin
    #[command(subcommand)]
    Margin(MarginCommand),
    /// Run database migrations and exit
    Migrate,
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum PriceCommand {
    /// Add an operator-set price (per 1000 units)
    Add {
        #[arg(short, long)]
        model: String,
        #[arg(long, default_value = "0")]
        input: Decimal,
        #[arg(long, default_value = "0")]
        output: Decimal,
        /// Charge a flat fee per call instead of per unit
        #[arg(long)]
        fixed_fee: Option<Decimal>,
    },
    /// Change an existing price
    Edit {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        input: Option<Decimal>,
        #[arg(long)]
        output: Option<Decimal>,
        #[arg(long)]
        fixed_fee: Option<Decimal>,
    },
    /// Activate or deactivate a price
    Toggle {
        #[arg(long)]
        id: Uuid,
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
    /// List prices
    List {
        /// Include inactive records
        #[arg(long)]
        all: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
enum RateCommand {
    /// Record a new exchange rate
    Set {
        /// Points per unit of the billing currency
        points_per_unit: Decimal,
        /// When the rate takes effect (defaults to now)
        #[arg(long)]
        effective_at: Option<DateTime<Utc>>,
    },
    /// Show the rate in force and recent history
    Show {
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },
}

#[derive(clap::Subcommand, Debug)]
enum MarginCommand {
    Set { percent: u32 },
    Show,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StatusArg {
    Completed,
    Failed,
}

impl From<StatusArg> for BillingStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Completed => BillingStatus::Completed,
            StatusArg::Failed => BillingStatus::Failed,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Command::Schema { output } = &args.command {
        #[cfg(feature = "json-schema")]
        {
            run_schema_export(output.as_deref());
            return;
        }
        #[cfg(not(feature = "json-schema"))]
        {
            let _ = output;
            eprintln!("Error: JSON schema export requires the 'json-schema' feature");
            std::process::exit(1);
        }
    }

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = match TollgateConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => exit_with(
            format!("Failed to load config from {}", config_path.display()),
            e,
        ),
    };

    let _tracing_guard = match observability::init_tracing(&config.observability) {
        Ok(guard) => guard,
        Err(e) => exit_with("Failed to initialize tracing", e),
    };
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => Arc::new(db),
        Err(e) => exit_with("Failed to open database", e),
    };

    if let Command::Migrate = args.command {
        let result = db.run_migrations().await;
        db.close().await;
        match result {
            Ok(()) => eprintln!("Migrations complete"),
            Err(e) => exit_with("Migration failed", e),
        }
        return;
    }

    let events = Arc::new(EventBus::new());
    let billing = match BillingService::from_config(db.clone(), &config, events).await {
        Ok(billing) => billing,
        Err(e) => {
            db.close().await;
            exit_with("Failed to load price catalog", e)
        }
    };

    let result = run_command(&billing, args.command).await;
    if let Some(path) = &args.metrics_file {
        write_metrics(path);
    }
    db.close().await;

    if let Err(e) = result {
        exit_with(e.context, e.message);
    }
}

/// A failed command, reported after the database is closed.
struct CommandError {
    context: String,
    message: String,
}

fn failed(context: &str, error: impl Display) -> CommandError {
    CommandError {
        context: context.to_string(),
        message: error.to_string(),
    }
}

type CommandResult = Result<(), CommandError>;

async fn run_command(billing: &BillingService, command: Command) -> CommandResult {
    match command {
        Command::Charge { user, report } => {
            let report = read_report(report)?;
            let outcome = billing
                .process(user, report)
                .await
                .map_err(|e| failed("Charge failed", e))?;
            print_json(&outcome)
        }
        Command::Credit { user, points } => {
            let balance = billing
                .ledger()
                .credit(user, points)
                .await
                .map_err(|e| failed("Credit failed", e))?;
            print_json(&balance)
        }
        Command::Balance { user } => {
            let balance = billing
                .ledger()
                .balance(user)
                .await
                .map_err(|e| failed("Failed to read balance", e))?;
            println!("{}", balance);
            Ok(())
        }
        Command::History {
            user,
            model,
            status,
            from,
            to,
            limit,
        } => {
            let filter = BillingEventFilter {
                user_id: user,
                model_name: model,
                status: status.map(BillingStatus::from),
                from,
                to,
                limit: Some(limit),
            };
            let events = billing
                .ledger()
                .history(&filter)
                .await
                .map_err(|e| failed("Failed to read history", e))?;
            print_json(&events)
        }
        Command::Price(command) => run_price_command(billing, command).await,
        Command::Rate(RateCommand::Set {
            points_per_unit,
            effective_at,
        }) => {
            let rate = billing
                .settings()
                .record_exchange_rate(points_per_unit, effective_at)
                .await
                .map_err(|e| failed("Failed to record exchange rate", e))?;
            print_json(&rate)
        }
        Command::Rate(RateCommand::Show { limit }) => {
            let read_failed = "Failed to read exchange rates";
            let current = billing
                .settings()
                .exchange_rate_at(Utc::now())
                .await
                .map_err(|e| failed(read_failed, e))?;
            let history = billing
                .settings()
                .exchange_rate_history(limit)
                .await
                .map_err(|e| failed(read_failed, e))?;
            print_json(&serde_json::json!({
                "current": current,
                "history": history,
            }))
        }
        Command::Margin(MarginCommand::Set { percent }) => {
            billing
                .settings()
                .set_margin_percent(percent)
                .await
                .map_err(|e| failed("Failed to set margin", e))?;
            println!("{}", percent);
            Ok(())
        }
        Command::Margin(MarginCommand::Show) => {
            let margin = billing
                .settings()
                .margin_percent()
                .await
                .map_err(|e| failed("Failed to read margin", e))?;
            println!("{}", margin);
            Ok(())
        }
        Command::Migrate | Command::Schema { .. } => Ok(()),
    }
}

async fn run_price_command(billing: &BillingService, command: PriceCommand) -> CommandResult {
    let catalog = billing.catalog();
    let result = match command {
        PriceCommand::Add {
            model,
            input,
            output,
            fixed_fee,
        } => {
            let record = match fixed_fee {
                Some(fee) => CreatePriceRecord::fixed_fee(model, fee),
                None => CreatePriceRecord::token_metered(model, input, output),
            };
            catalog.create(record).await.map(|r| vec![r])
        }
        PriceCommand::Edit {
            id,
            input,
            output,
            fixed_fee,
        } => {
            let update = UpdatePriceRecord {
                input_unit_price: input,
                output_unit_price: output,
                fixed_fee,
                ..Default::default()
            };
            catalog.update(id, update).await.map(|r| vec![r])
        }
        PriceCommand::Toggle { id, active } => {
            catalog.set_active(id, active).await.map(|r| vec![r])
        }
        PriceCommand::List { all } => catalog.list(all).await,
    };

    let records = result.map_err(|e| failed("Price catalog update failed", e))?;
    print_json(&records)
}

fn read_report(path: Option<PathBuf>) -> Result<UsageReport, CommandError> {
    let contents = match &path {
        Some(path) => std::fs::read_to_string(path),
        None => std::io::read_to_string(std::io::stdin()),
    };
    let contents = contents.map_err(|e| failed("Failed to read usage report", e))?;
    serde_json::from_str(&contents).map_err(|e| failed("Invalid usage report JSON", e))
}

fn print_json<T: Serialize>(value: &T) -> CommandResult {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| failed("Failed to serialize output", e))?;
    println!("{}", json);
    Ok(())
}

/// Write the metrics exposition for a textfile collector. Failures only warn.
fn write_metrics(path: &Path) {
    match observability::metrics::write_textfile(path) {
        Ok(true) => tracing::debug!(path = %path.display(), "Metrics written"),
        Ok(false) => tracing::warn!(
            path = %path.display(),
            "Metrics file not written: metrics are disabled or the 'prometheus' feature is off"
        ),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to write metrics"),
    }
}

fn exit_with(context: impl Display, error: impl Display) -> ! {
    eprintln!("{}: {}", context, error);
    std::process::exit(1);
}

/// Export JSON schema for the configuration file to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<&str>) {
    let content = match TollgateConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => exit_with("Failed to build config schema", e),
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &content) {
                exit_with(format!("Failed to write to {}", path), e);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}
