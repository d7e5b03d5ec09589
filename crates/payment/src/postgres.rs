use async_trait::async_trait;
use common::{Money, OrderId, PaymentId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::store::PaymentStore;
use crate::{CardMetadata, Payment, PaymentError, PaymentStatus, RefundId, Result};

const PAYMENT_COLUMNS: &str = "id, order_id, user_id, amount, currency, status, payment_method, \
     card_holder, card_last4, card_expiry, refund_id, created_at, updated_at, deleted_at";

/// PostgreSQL-backed payment store.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        let last4: Option<String> = row.try_get("card_last4")?;
        let card = match last4 {
            Some(last4) => Some(CardMetadata {
                holder: row.try_get::<Option<String>, _>("card_holder")?.unwrap_or_default(),
                last4,
                expiry: row.try_get::<Option<String>, _>("card_expiry")?.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Payment {
            id: PaymentId::new(row.try_get::<String, _>("id")?),
            order_id: OrderId::new(row.try_get::<String, _>("order_id")?),
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            amount: Money::from_cents(row.try_get("amount")?),
            currency: row.try_get("currency")?,
            status: status.parse()?,
            payment_method: row.try_get("payment_method")?,
            card,
            refund_id: row
                .try_get::<Option<String>, _>("refund_id")?
                .map(RefundId::new),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn get_by_order(&self, order_id: &OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE order_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn create(&self, payment: &Payment) -> Result<()> {
        let card = payment.card.as_ref();
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, user_id, amount, currency, status, payment_method,
                                  card_holder, card_last4, card_expiry, refund_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(payment.id.as_str())
        .bind(payment.order_id.as_str())
        .bind(payment.user_id.as_str())
        .bind(payment.amount.cents())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.payment_method)
        .bind(card.map(|c| c.holder.as_str()))
        .bind(card.map(|c| c.last4.as_str()))
        .bind(card.map(|c| c.expiry.as_str()))
        .bind(payment.refund_id.as_ref().map(RefundId::as_str))
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return PaymentError::AlreadyExists(payment.id.clone());
            }
            PaymentError::Database(e)
        })?;
        Ok(())
    }

    async fn transition(
        &self,
        id: &PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        refund_id: Option<&RefundId>,
    ) -> Result<Payment> {
        let row = sqlx::query(&format!(
            "UPDATE payments \
             SET status = $3, refund_id = COALESCE($4, refund_id), updated_at = NOW() \
             WHERE id = $1 AND status = $2 AND deleted_at IS NULL \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(refund_id.map(RefundId::as_str))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_payment(row),
            None => match self.get(id).await? {
                Some(current) => Err(PaymentError::InvalidState {
                    id: id.clone(),
                    expected: from,
                    actual: current.status,
                }),
                None => Err(PaymentError::NotFound(id.clone())),
            },
        }
    }
}
