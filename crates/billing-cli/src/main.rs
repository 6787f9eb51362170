//! Operator CLI for the billing core: schema migration, one-shot job
//! ticks, and pending-customer reconciliation. A `clap::Parser` root
//! command with one `Subcommand` per concern, tracing initialized
//! before anything else runs, narrowed to the three operator actions
//! this service actually needs — no product catalog/order/customer CRUD
//! surface here, that lives in `billing-api`.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use billing_core::engines::CustomerLifecycle;
use billing_core::event_log::EventLog;
use billing_core::jobs::{DunningController, RenewalJob, RetentionJob};
use billing_core::processor::FakeProcessorGateway;
use billing_core::repository::{
    PostgresChargeRepository, PostgresCustomerRepository, PostgresDunningConfigRepository,
    PostgresEventRepository, PostgresIdempotencyRepository, PostgresInvoiceRepository,
    PostgresSubscriptionRepository, PostgresWebhookRepository,
};
use billing_core::webhooks::{WebhookHandlers, WebhookIngress};
use billing_core::{Config, Migrator};

#[derive(Parser)]
#[command(name = "billing-cli")]
#[command(about = "Operator tool for the billing core: migrations, reconciliation, job ticks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file; falls back to `BILLING_CONFIG`/built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the database schema migrator against a store.
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Reconciliation sweeps for stuck local-first rows (SPEC_FULL §4.5).
    Reconcile {
        #[command(subcommand)]
        command: ReconcileCommands,
    },
    /// Run the job supervisor's background loops once, outside their schedule.
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },
    /// Print the resolved configuration.
    Config,
}

#[derive(Subcommand)]
enum DbCommands {
    /// Apply pending migrations to the billing store.
    Migrate,
    /// Apply pending migrations to the GL store.
    MigrateGl,
}

#[derive(Subcommand)]
enum ReconcileCommands {
    /// Retry `status=pending` customers stuck past a threshold.
    PendingCustomers {
        #[arg(long)]
        app_id: String,
        #[arg(long, default_value = "60")]
        older_than_minutes: i64,
    },
}

#[derive(Subcommand)]
enum JobsCommands {
    /// Run dunning advancement, renewal invoicing, retention purge, and
    /// due webhook retries once, for the given tenants.
    Tick {
        #[arg(long, value_delimiter = ',')]
        tenants: Vec<String>,
    },
}

async fn connect(url: &str) -> anyhow::Result<PgPool> {
    Ok(PgPoolOptions::new().max_connections(5).connect(url).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_level))
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Db { command } => match command {
            DbCommands::Migrate => {
                let pool = connect(&config.billing_database.url).await?;
                let applied = Migrator::new(pool).run().await?;
                println!("{} {} migration(s) applied to billing store", "ok:".green().bold(), applied.len());
            }
            DbCommands::MigrateGl => {
                let pool = connect(&config.gl_database.url).await?;
                let applied = Migrator::new(pool).run().await?;
                println!("{} {} migration(s) applied to GL store", "ok:".green().bold(), applied.len());
            }
        },
        Commands::Reconcile { command } => match command {
            ReconcileCommands::PendingCustomers { app_id, older_than_minutes } => {
                let pool = connect(&config.billing_database.url).await?;
                let customers = Arc::new(PostgresCustomerRepository::new(pool.clone()));
                let events = Arc::new(EventLog::new(Arc::new(PostgresEventRepository::new(pool))));
                let gateway = Arc::new(FakeProcessorGateway::new());
                let lifecycle = CustomerLifecycle::new(customers, gateway, events);

                let older_than = chrono::Utc::now() - chrono::Duration::minutes(older_than_minutes);
                let outcomes = lifecycle.reconcile_pending(&app_id, older_than).await?;
                let became_active = outcomes.iter().filter(|o| o.became_active).count();
                println!(
                    "{} reconciled {} pending customer(s), {} became active",
                    "ok:".green().bold(),
                    outcomes.len(),
                    became_active
                );
            }
        },
        Commands::Jobs { command } => match command {
            JobsCommands::Tick { tenants } => {
                let pool = connect(&config.billing_database.url).await?;
                let customers = Arc::new(PostgresCustomerRepository::new(pool.clone()));
                let dunning_config = Arc::new(PostgresDunningConfigRepository::new(pool.clone()));
                let events = Arc::new(EventLog::new(Arc::new(PostgresEventRepository::new(pool.clone()))));
                let dunning = DunningController::new(customers, dunning_config.clone(), events.clone());

                let subscriptions = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
                let invoices = Arc::new(PostgresInvoiceRepository::new(pool.clone()));
                let renewal = RenewalJob::new(subscriptions.clone(), invoices, chrono::Duration::days(config.jobs.renewal_lookahead_days));

                let webhook_repo = Arc::new(PostgresWebhookRepository::new(pool.clone()));
                let idempotency_repo = Arc::new(PostgresIdempotencyRepository::new(pool.clone()));
                let retention = RetentionJob::new(
                    Arc::new(PostgresEventRepository::new(pool.clone())),
                    webhook_repo.clone(),
                    idempotency_repo,
                    chrono::Duration::days(config.jobs.event_retention_days),
                );

                let charge_repo = Arc::new(PostgresChargeRepository::new(pool.clone()));
                let refund_repo = Arc::new(billing_core::repository::PostgresRefundRepository::new(pool.clone()));
                let dispute_repo = Arc::new(billing_core::repository::PostgresDisputeRepository::new(pool.clone()));
                let tenant_config_repo = Arc::new(billing_core::repository::PostgresTenantConfigRepository::new(pool.clone()));
                let handlers = Arc::new(WebhookHandlers::new(
                    subscriptions,
                    Arc::new(PostgresCustomerRepository::new(pool.clone())),
                    charge_repo,
                    refund_repo,
                    dispute_repo,
                    dunning_config,
                    config.dunning.grace_days,
                    events.clone(),
                ));
                let gateway = Arc::new(FakeProcessorGateway::new());
                let webhook_ingress = WebhookIngress::new(webhook_repo, tenant_config_repo, gateway, handlers, events);

                let now = chrono::Utc::now();
                let dunning_report = dunning.run(now).await?;
                let renewal_report = renewal.run(now).await?;
                let retention_report = retention.run(&tenants, now).await?;
                let webhook_retries = webhook_ingress.process_due_retries(now, config.webhooks.batch_size).await?;

                println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                    "dunning": dunning_report,
                    "renewal": renewal_report,
                    "retention": retention_report,
                    "webhook_retries_replayed": webhook_retries,
                }))?);
            }
        },
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
