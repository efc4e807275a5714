use crate::database::error::DatabaseError;
use crate::payments::types::{deserialize_amount, serialize_amount};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Created,
    PendingPayment,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::PendingPayment => "PendingPayment",
            OrderStatus::Paid => "Paid",
            OrderStatus::Failed => "Failed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn to_db_status(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Accepts both the storage form and the API label, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace(['_', '-', ' '], "").as_str() {
            "created" => Some(OrderStatus::Created),
            "pendingpayment" => Some(OrderStatus::PendingPayment),
            "paid" => Some(OrderStatus::Paid),
            "failed" => Some(OrderStatus::Failed),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order as stored by the order service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub user_id: Uuid,
    pub user_email: String,
    pub user_name: String,
    #[serde(
        serialize_with = "serialize_amount",
        deserialize_with = "deserialize_amount"
    )]
    pub total_amount: BigDecimal,
    pub status: OrderStatus,
    pub payment_id: Option<String>,
    pub transaction_id: Option<String>,
    /// Last payment status label received, verbatim
    pub payment_status: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub user_email: String,
    pub user_name: String,
    pub total_amount: BigDecimal,
    pub notes: Option<String>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, DatabaseError>;

    async fn find_all(&self) -> Result<Vec<Order>, DatabaseError>;

    /// Newest first
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError>;

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, DatabaseError>;

    async fn insert(&self, new: NewOrder) -> Result<Order, DatabaseError>;

    /// Persist every mutable field; NotFound if the id is unknown
    async fn save(&self, order: &Order) -> Result<Order, DatabaseError>;

    async fn delete(&self, id: i64) -> Result<bool, DatabaseError>;
}

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: i64,
    user_id: Uuid,
    user_email: String,
    user_name: String,
    total_amount: BigDecimal,
    status: String,
    payment_id: Option<String>,
    transaction_id: Option<String>,
    payment_status: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::parse(&row.status)
            .ok_or_else(|| DatabaseError::decode(format!("unknown order status '{}'", row.status)))?;

        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            user_email: row.user_email,
            user_name: row.user_name,
            total_amount: row.total_amount,
            status,
            payment_id: row.payment_id,
            transaction_id: row.transaction_id,
            payment_status: row.payment_status,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_all(rows: Vec<OrderRow>) -> Result<Vec<Order>, DatabaseError> {
    rows.into_iter().map(Order::try_from).collect()
}

const COLUMNS: &str = "id, user_id, user_email, user_name, total_amount, status, payment_id, \
                       transaction_id, payment_status, notes, created_at, updated_at";

/// Postgres-backed order store
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Order::try_from).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Order>, DatabaseError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders ORDER BY created_at DESC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        decode_all(rows)
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        decode_all(rows)
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, DatabaseError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE status = $1 ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(status.to_db_status())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        decode_all(rows)
    }

    async fn insert(&self, new: NewOrder) -> Result<Order, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (user_id, user_email, user_name, total_amount, status, notes) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {}",
            COLUMNS
        ))
        .bind(new.user_id)
        .bind(&new.user_email)
        .bind(&new.user_name)
        .bind(&new.total_amount)
        .bind(OrderStatus::Created.to_db_status())
        .bind(&new.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Order::try_from(row)
    }

    async fn save(&self, order: &Order) -> Result<Order, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders \
             SET status = $2, payment_id = $3, transaction_id = $4, payment_status = $5, \
                 notes = $6, updated_at = $7 \
             WHERE id = $1 \
             RETURNING {}",
            COLUMNS
        ))
        .bind(order.id)
        .bind(order.status.to_db_status())
        .bind(&order.payment_id)
        .bind(&order.transaction_id)
        .bind(&order.payment_status)
        .bind(&order.notes)
        .bind(order.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => Order::try_from(row),
            None => Err(DatabaseError::not_found("Order", order.id)),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
