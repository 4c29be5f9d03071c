use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loyal_ledger::{InsertOrderOutcome, LedgerStore, UpdateOrderOutcome, WithdrawOutcome};
use loyal_schemas::{Order, OrderNumber, OrderStatus, OwnerId, Withdrawal};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Row};
use tracing::debug;

pub const ENV_DB_URL: &str = "LOYAL_DATABASE_URL";

/// Advisory-lock class for per-owner withdrawal serialization
/// (first key of the two-key `pg_advisory_xact_lock`).
const WITHDRAWAL_LOCK_CLASS: i32 = 0x4C59_0001;

/// Connect to Postgres.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Connect to Postgres using LOYAL_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 10).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Insert a NEW order unless the number already exists; report who owns it.
pub async fn insert_order_if_absent(
    pool: &PgPool,
    owner: &OwnerId,
    number: &OrderNumber,
) -> Result<InsertOrderOutcome> {
    let res = sqlx::query(
        r#"
        insert into orders (number, owner_id, status)
        values ($1, $2, 'NEW')
        on conflict (number) do nothing
        "#,
    )
    .bind(number.as_str())
    .bind(owner.as_str())
    .execute(pool)
    .await
    .context("insert_order_if_absent insert failed")?;

    if res.rows_affected() == 1 {
        return Ok(InsertOrderOutcome::Created);
    }

    let existing: Option<String> =
        sqlx::query_scalar("select owner_id from orders where number = $1")
            .bind(number.as_str())
            .fetch_optional(pool)
            .await
            .context("insert_order_if_absent owner lookup failed")?;

    match existing {
        Some(o) if o == owner.as_str() => Ok(InsertOrderOutcome::AlreadyOwnedBySameUser),
        Some(_) => Ok(InsertOrderOutcome::Conflict),
        // Rows are never deleted, so a conflicting insert implies the row exists.
        None => bail!("order {number} vanished between insert and lookup"),
    }
}

pub async fn fetch_orders_for_owner(pool: &PgPool, owner: &OwnerId) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        select number, owner_id, status, accrual, submitted_at_utc
        from orders
        where owner_id = $1
        order by submitted_at_utc asc, number asc
        "#,
    )
    .bind(owner.as_str())
    .fetch_all(pool)
    .await
    .context("fetch_orders_for_owner failed")?;

    rows.iter().map(order_from_row).collect()
}

/// All orders not in a terminal status, oldest first.
pub async fn fetch_orders_needing_reconciliation(pool: &PgPool) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        select number, owner_id, status, accrual, submitted_at_utc
        from orders
        where status not in ('INVALID', 'PROCESSED')
        order by submitted_at_utc asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("fetch_orders_needing_reconciliation failed")?;

    rows.iter().map(order_from_row).collect()
}

/// Update status/accrual of a non-terminal order.
///
/// The `status not in (...)` guard makes the update a no-op on terminal
/// rows, so a duplicate terminal update can never change a balance.
pub async fn update_order_status(
    pool: &PgPool,
    number: &OrderNumber,
    status: OrderStatus,
    accrual: Decimal,
) -> Result<UpdateOrderOutcome> {
    if accrual < Decimal::ZERO {
        bail!("update_order_status: negative accrual {accrual} for order {number}");
    }

    let res = sqlx::query(
        r#"
        update orders
        set status = $2,
            accrual = $3,
            updated_at_utc = now()
        where number = $1
          and status not in ('INVALID', 'PROCESSED')
        "#,
    )
    .bind(number.as_str())
    .bind(status.as_str())
    .bind(accrual)
    .execute(pool)
    .await
    .context("update_order_status update failed")?;

    if res.rows_affected() == 1 {
        return Ok(UpdateOrderOutcome::Applied);
    }

    let (exists,): (bool,) =
        sqlx::query_as("select exists (select 1 from orders where number = $1)")
            .bind(number.as_str())
            .fetch_one(pool)
            .await
            .context("update_order_status existence check failed")?;

    Ok(if exists {
        UpdateOrderOutcome::AlreadyTerminal
    } else {
        UpdateOrderOutcome::UnknownOrder
    })
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let status_s: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status_s)
        .ok_or_else(|| anyhow!("invalid order status in db: {status_s}"))?;

    Ok(Order {
        number: OrderNumber::new(row.try_get::<String, _>("number")?),
        owner: OwnerId::new(row.try_get::<String, _>("owner_id")?),
        status,
        accrual: row.try_get("accrual")?,
        submitted_at_utc: row.try_get("submitted_at_utc")?,
    })
}

// ---------------------------------------------------------------------------
// Balance aggregates
// ---------------------------------------------------------------------------

async fn sum_accrual<'e, E: PgExecutor<'e>>(ex: E, owner: &OwnerId) -> Result<Decimal> {
    let sum: Decimal = sqlx::query_scalar(
        r#"
        select coalesce(sum(accrual), 0)
        from orders
        where owner_id = $1 and status = 'PROCESSED'
        "#,
    )
    .bind(owner.as_str())
    .fetch_one(ex)
    .await
    .context("sum_accrual failed")?;
    Ok(sum)
}

async fn sum_withdrawals<'e, E: PgExecutor<'e>>(ex: E, owner: &OwnerId) -> Result<Decimal> {
    let sum: Decimal = sqlx::query_scalar(
        "select coalesce(sum(amount), 0) from withdrawals where owner_id = $1",
    )
    .bind(owner.as_str())
    .fetch_one(ex)
    .await
    .context("sum_withdrawals failed")?;
    Ok(sum)
}

pub async fn sum_accrual_for_owner(pool: &PgPool, owner: &OwnerId) -> Result<Decimal> {
    sum_accrual(pool, owner).await
}

pub async fn sum_withdrawals_for_owner(pool: &PgPool, owner: &OwnerId) -> Result<Decimal> {
    sum_withdrawals(pool, owner).await
}

// ---------------------------------------------------------------------------
// Withdrawals
// ---------------------------------------------------------------------------

/// Check the balance and insert the withdrawal in one transaction.
///
/// A transaction-scoped advisory lock keyed by owner serializes concurrent
/// withdrawals of the same owner; both sums are read after the lock is held.
/// Any early return drops the transaction, which rolls it back.
pub async fn insert_withdrawal_checked(
    pool: &PgPool,
    owner: &OwnerId,
    order: &OrderNumber,
    amount: Decimal,
) -> Result<WithdrawOutcome> {
    if amount <= Decimal::ZERO {
        bail!("insert_withdrawal_checked: amount must be > 0, got {amount}");
    }

    let mut tx = pool.begin().await.context("withdrawal begin tx failed")?;

    sqlx::query("select pg_advisory_xact_lock($1, hashtext($2))")
        .bind(WITHDRAWAL_LOCK_CLASS)
        .bind(owner.as_str())
        .execute(&mut *tx)
        .await
        .context("withdrawal owner lock failed")?;

    let accrued = sum_accrual(&mut *tx, owner).await?;
    let withdrawn = sum_withdrawals(&mut *tx, owner).await?;
    let current = accrued - withdrawn;

    if current < amount {
        tx.rollback().await.context("withdrawal rollback failed")?;
        debug!(owner = %owner, %current, requested = %amount, "withdrawal refused under lock");
        return Ok(WithdrawOutcome::InsufficientFunds { current });
    }

    let processed_at_utc: DateTime<Utc> = sqlx::query_scalar(
        r#"
        insert into withdrawals (owner_id, order_token, amount)
        values ($1, $2, $3)
        returning processed_at_utc
        "#,
    )
    .bind(owner.as_str())
    .bind(order.as_str())
    .bind(amount)
    .fetch_one(&mut *tx)
    .await
    .context("withdrawal insert failed")?;

    tx.commit().await.context("withdrawal commit failed")?;

    Ok(WithdrawOutcome::Accepted(Withdrawal {
        order: order.clone(),
        owner: owner.clone(),
        amount,
        processed_at_utc,
    }))
}

/// Withdrawals of `owner`, most recent first.
pub async fn fetch_withdrawals_for_owner(pool: &PgPool, owner: &OwnerId) -> Result<Vec<Withdrawal>> {
    let rows = sqlx::query(
        r#"
        select order_token, owner_id, amount, processed_at_utc
        from withdrawals
        where owner_id = $1
        order by processed_at_utc desc, id desc
        "#,
    )
    .bind(owner.as_str())
    .fetch_all(pool)
    .await
    .context("fetch_withdrawals_for_owner failed")?;

    rows.iter()
        .map(|row| {
            Ok(Withdrawal {
                order: OrderNumber::new(row.try_get::<String, _>("order_token")?),
                owner: OwnerId::new(row.try_get::<String, _>("owner_id")?),
                amount: row.try_get("amount")?,
                processed_at_utc: row.try_get("processed_at_utc")?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Postgres-backed [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_order_if_absent(
        &self,
        owner: &OwnerId,
        number: &OrderNumber,
    ) -> Result<InsertOrderOutcome> {
        insert_order_if_absent(&self.pool, owner, number).await
    }

    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<Order>> {
        fetch_orders_for_owner(&self.pool, owner).await
    }

    async fn orders_needing_reconciliation(&self) -> Result<Vec<Order>> {
        fetch_orders_needing_reconciliation(&self.pool).await
    }

    async fn update_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<UpdateOrderOutcome> {
        update_order_status(&self.pool, number, status, accrual).await
    }

    async fn sum_accrual_for_owner(&self, owner: &OwnerId) -> Result<Decimal> {
        sum_accrual_for_owner(&self.pool, owner).await
    }

    async fn sum_withdrawals_for_owner(&self, owner: &OwnerId) -> Result<Decimal> {
        sum_withdrawals_for_owner(&self.pool, owner).await
    }

    async fn insert_withdrawal_checked(
        &self,
        owner: &OwnerId,
        order: &OrderNumber,
        amount: Decimal,
    ) -> Result<WithdrawOutcome> {
        insert_withdrawal_checked(&self.pool, owner, order, amount).await
    }

    async fn withdrawals_for_owner(&self, owner: &OwnerId) -> Result<Vec<Withdrawal>> {
        fetch_withdrawals_for_owner(&self.pool, owner).await
    }
}
