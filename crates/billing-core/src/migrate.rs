//! Schema migrator for the billing store (SPEC_FULL §1 AMBIENT STACK,
//! billing-cli): a tracked-version table plus idempotent
//! `CREATE TABLE IF NOT EXISTS` statements run in order, rather than a
//! build-time migration-file macro. The statements below are applied at
//! operator discretion via `billing-cli db migrate`.
//!
//! The relational engine itself (which database, which driver) is an
//! explicit non-goal of this crate (SPEC_FULL §1); this module only
//! owns the DDL for the tables `repository::postgres` already queries.

use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// One statement per enum used by `#[sqlx(type_name = "...")]` in
/// `models/*.rs`. Wrapped in `DO $$ ... EXCEPTION WHEN duplicate_object`
/// since Postgres has no `CREATE TYPE IF NOT EXISTS`.
const ENUM_TYPES: &[(&str, &[&str])] = &[
    ("customer_status", &["pending", "active", "failed"]),
    ("payment_method_type", &["card", "ach_debit", "eft_debit"]),
    ("interval_unit", &["day", "week", "month", "year"]),
    ("subscription_status", &["trialing", "active", "past_due", "canceled"]),
    ("charge_type", &["subscription", "one_time", "proration_charge", "proration_credit", "usage"]),
    ("charge_status", &["pending", "succeeded", "failed", "refunded"]),
    ("refund_status", &["pending", "succeeded", "failed"]),
    ("dispute_status", &["needs_response", "under_review", "won", "lost"]),
    ("invoice_status", &["draft", "open", "paid", "void", "uncollectible", "past_due"]),
    ("line_item_type", &["subscription", "usage", "tax", "discount", "fee", "other"]),
    ("webhook_status", &["received", "processing", "processed", "failed"]),
    ("webhook_attempt_status", &["succeeded", "failed", "dead_lettered"]),
    ("event_source", &["api", "webhook", "system", "admin"]),
    ("dunning_action", &["retry_payment", "send_notice", "cancel_subscription"]),
];

fn enum_ddl(name: &str, variants: &[&str]) -> String {
    let list = variants.iter().map(|v| format!("'{v}'")).collect::<Vec<_>>().join(", ");
    format!(
        "DO $$ BEGIN CREATE TYPE {name} AS ENUM ({list}); EXCEPTION WHEN duplicate_object THEN null; END $$;"
    )
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "billing_customers_and_payment_methods",
        sql: r#"
            CREATE TABLE IF NOT EXISTS billing_customers (
                id UUID PRIMARY KEY,
                app_id TEXT NOT NULL,
                external_id TEXT,
                processor_id TEXT,
                status customer_status NOT NULL,
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                default_payment_method_id UUID,
                delinquent_since TIMESTAMPTZ,
                grace_period_end TIMESTAMPTZ,
                dunning_stage INTEGER NOT NULL DEFAULT 0,
                next_retry_at TIMESTAMPTZ,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (app_id, external_id)
            );
            CREATE INDEX IF NOT EXISTS idx_billing_customers_grace ON billing_customers (grace_period_end) WHERE grace_period_end IS NOT NULL;

            CREATE TABLE IF NOT EXISTS billing_payment_methods (
                id UUID PRIMARY KEY,
                app_id TEXT NOT NULL,
                customer_id UUID NOT NULL REFERENCES billing_customers (id) ON DELETE CASCADE,
                processor_id TEXT NOT NULL,
                method_type payment_method_type NOT NULL,
                display_metadata JSONB NOT NULL DEFAULT '{}',
                is_default BOOLEAN NOT NULL DEFAULT false,
                deleted_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
        "#,
    },
    Migration {
        version: 2,
        name: "billing_subscriptions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS billing_subscriptions (
                id UUID PRIMARY KEY,
                app_id TEXT NOT NULL,
                customer_id UUID NOT NULL REFERENCES billing_customers (id) ON DELETE CASCADE,
                processor_id TEXT,
                plan_id TEXT NOT NULL,
                price_cents BIGINT NOT NULL CHECK (price_cents >= 0),
                quantity INTEGER NOT NULL,
                currency TEXT NOT NULL,
                interval_unit interval_unit NOT NULL,
                interval_count INTEGER NOT NULL,
                status subscription_status NOT NULL,
                current_period_start TIMESTAMPTZ NOT NULL,
                current_period_end TIMESTAMPTZ NOT NULL CHECK (current_period_end > current_period_start),
                cancel_at TIMESTAMPTZ,
                canceled_at TIMESTAMPTZ,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_billing_subscriptions_processor_id ON billing_subscriptions (processor_id) WHERE processor_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_billing_subscriptions_renewal ON billing_subscriptions (current_period_end) WHERE status IN ('active', 'past_due');
        "#,
    },
    Migration {
        version: 3,
        name: "billing_charges_and_refunds",
        sql: r#"
            CREATE TABLE IF NOT EXISTS billing_charges (
                id UUID PRIMARY KEY,
                app_id TEXT NOT NULL,
                customer_id UUID NOT NULL REFERENCES billing_customers (id) ON DELETE CASCADE,
                subscription_id UUID REFERENCES billing_subscriptions (id) ON DELETE CASCADE,
                processor_id TEXT,
                charge_type charge_type NOT NULL,
                amount_cents BIGINT NOT NULL,
                currency TEXT NOT NULL,
                status charge_status NOT NULL,
                reason TEXT,
                reference_id TEXT NOT NULL,
                failure_code TEXT,
                failure_message TEXT,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (app_id, reference_id)
            );

            CREATE TABLE IF NOT EXISTS billing_refunds (
                id UUID PRIMARY KEY,
                app_id TEXT NOT NULL,
                charge_id UUID NOT NULL REFERENCES billing_charges (id) ON DELETE CASCADE,
                processor_id TEXT,
                amount_cents BIGINT NOT NULL CHECK (amount_cents > 0),
                status refund_status NOT NULL,
                reason TEXT,
                reference_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (app_id, reference_id)
            );

            CREATE TABLE IF NOT EXISTS billing_disputes (
                id UUID PRIMARY KEY,
                app_id TEXT NOT NULL,
                charge_id UUID NOT NULL REFERENCES billing_charges (id) ON DELETE CASCADE,
                processor_dispute_id TEXT NOT NULL,
                status dispute_status NOT NULL,
                reason TEXT,
                amount_cents BIGINT NOT NULL,
                evidence_due_by TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (app_id, processor_dispute_id)
            );
        "#,
    },
    Migration {
        version: 4,
        name: "billing_invoices",
        sql: r#"
            CREATE TABLE IF NOT EXISTS billing_invoices (
                id UUID PRIMARY KEY,
                app_id TEXT NOT NULL,
                customer_id UUID NOT NULL REFERENCES billing_customers (id) ON DELETE CASCADE,
                subscription_id UUID REFERENCES billing_subscriptions (id) ON DELETE CASCADE,
                status invoice_status NOT NULL,
                amount_cents BIGINT NOT NULL,
                currency TEXT NOT NULL,
                billing_period_start TIMESTAMPTZ,
                billing_period_end TIMESTAMPTZ,
                due_at TIMESTAMPTZ,
                paid_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );

            CREATE TABLE IF NOT EXISTS billing_invoice_line_items (
                id UUID PRIMARY KEY,
                invoice_id UUID NOT NULL REFERENCES billing_invoices (id) ON DELETE CASCADE,
                item_type line_item_type NOT NULL,
                description TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                unit_price_cents BIGINT NOT NULL
            );
        "#,
    },
    Migration {
        version: 5,
        name: "billing_webhooks_and_events",
        sql: r#"
            CREATE TABLE IF NOT EXISTS billing_webhook_events (
                app_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                status webhook_status NOT NULL,
                payload JSONB NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TIMESTAMPTZ,
                next_attempt_at TIMESTAMPTZ,
                dead_at TIMESTAMPTZ,
                error_code TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (app_id, event_id)
            );
            CREATE INDEX IF NOT EXISTS idx_billing_webhook_retry_due ON billing_webhook_events (next_attempt_at)
                WHERE status = 'failed' AND dead_at IS NULL;

            CREATE TABLE IF NOT EXISTS billing_webhook_attempts (
                app_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                status webhook_attempt_status NOT NULL,
                next_attempt_at TIMESTAMPTZ,
                error_code TEXT,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (app_id, event_id, attempt_number)
            );

            CREATE TABLE IF NOT EXISTS billing_events (
                id UUID PRIMARY KEY,
                app_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                source event_source NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_billing_events_entity ON billing_events (app_id, entity_type, entity_id);

            CREATE TABLE IF NOT EXISTS billing_idempotency_keys (
                app_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                response_body JSONB NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (app_id, idempotency_key)
            );
        "#,
    },
    Migration {
        version: 6,
        name: "billing_tenant_and_dunning_config",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tenants (
                app_id TEXT PRIMARY KEY,
                processor_account_id TEXT NOT NULL,
                processor_api_key TEXT NOT NULL,
                webhook_signing_secret TEXT NOT NULL,
                sandbox_mode BOOLEAN NOT NULL DEFAULT true
            );

            CREATE TABLE IF NOT EXISTS dunning_settings (
                app_id TEXT PRIMARY KEY,
                grace_days INTEGER NOT NULL,
                max_retry_attempts INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dunning_stages (
                app_id TEXT NOT NULL,
                stage_number INTEGER NOT NULL,
                wait_days INTEGER NOT NULL,
                action dunning_action NOT NULL,
                PRIMARY KEY (app_id, stage_number)
            );
        "#,
    },
    Migration {
        version: 7,
        name: "gl_ledger",
        sql: r#"
            CREATE TABLE IF NOT EXISTS gl_journal_entries (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source_module TEXT NOT NULL,
                source_event_id TEXT NOT NULL,
                source_subject TEXT NOT NULL,
                posted_at TIMESTAMPTZ NOT NULL,
                currency TEXT NOT NULL,
                description TEXT,
                reference_type TEXT,
                reference_id TEXT,
                reverses_entry_id UUID REFERENCES gl_journal_entries (id),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (tenant_id, source_event_id)
            );

            CREATE TABLE IF NOT EXISTS gl_journal_lines (
                journal_entry_id UUID NOT NULL REFERENCES gl_journal_entries (id) ON DELETE CASCADE,
                line_no INTEGER NOT NULL,
                account_ref TEXT NOT NULL CHECK (account_ref <> ''),
                debit_minor BIGINT NOT NULL DEFAULT 0 CHECK (debit_minor >= 0),
                credit_minor BIGINT NOT NULL DEFAULT 0 CHECK (credit_minor >= 0),
                memo TEXT,
                PRIMARY KEY (journal_entry_id, line_no)
            );
            CREATE INDEX IF NOT EXISTS idx_gl_journal_entries_period ON gl_journal_entries (tenant_id, posted_at);

            CREATE TABLE IF NOT EXISTS gl_accounting_periods (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                period_start TIMESTAMPTZ NOT NULL,
                period_end TIMESTAMPTZ NOT NULL,
                is_closed BOOLEAN NOT NULL DEFAULT false,
                close_requested_at TIMESTAMPTZ,
                closed_at TIMESTAMPTZ,
                closed_by TEXT,
                close_reason TEXT,
                close_hash TEXT,
                CHECK (closed_at IS NULL OR close_hash IS NOT NULL)
            );
            CREATE INDEX IF NOT EXISTS idx_gl_accounting_periods_open ON gl_accounting_periods (tenant_id) WHERE is_closed = false;

            CREATE TABLE IF NOT EXISTS gl_period_summary_snapshots (
                tenant_id TEXT NOT NULL,
                period_id UUID NOT NULL REFERENCES gl_accounting_periods (id) ON DELETE CASCADE,
                currency TEXT NOT NULL,
                journal_count BIGINT NOT NULL,
                line_count BIGINT NOT NULL,
                total_debits_minor BIGINT NOT NULL,
                total_credits_minor BIGINT NOT NULL,
                checksum TEXT,
                PRIMARY KEY (tenant_id, period_id, currency)
            );

            CREATE TABLE IF NOT EXISTS gl_failed_events (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source_event_id TEXT NOT NULL,
                reason_code TEXT NOT NULL,
                reason_message TEXT NOT NULL,
                envelope JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
        "#,
    },
];

/// Hand-rolled migration tracker: a `_migrations` bookkeeping table plus
/// an ordered list of idempotent DDL
/// blocks, applied only if their version hasn't run yet. Used by
/// `billing-cli db migrate` against both the billing store and the GL
/// store (the GL store only needs the `gl_*` statements, but re-running
/// `CREATE TABLE IF NOT EXISTS` against the billing tables on that
/// connection is harmless and kept simple rather than split into two
/// migrator instances).
pub struct Migrator {
    pool: PgPool,
}

impl Migrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn init_migration_table(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS _billing_migrations (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_applied(&self, version: i64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM _billing_migrations WHERE version = $1")
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Runs every pending migration, in version order, inside its own
    /// transaction. Returns the versions actually applied.
    pub async fn run(&self) -> Result<Vec<i64>> {
        self.init_migration_table().await?;

        for (name, variants) in ENUM_TYPES {
            sqlx::query(&enum_ddl(name, variants)).execute(&self.pool).await?;
        }

        let mut applied = Vec::new();
        for migration in MIGRATIONS {
            if self.is_applied(migration.version).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO _billing_migrations (version, name) VALUES ($1, $2)")
                .bind(migration.version)
                .bind(migration.name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!(version = migration.version, name = migration.name, "applied migration");
            applied.push(migration.version);
        }

        Ok(applied)
    }
}
