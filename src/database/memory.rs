//! Process-local stores used by tests and `SKIP_EXTERNALS` mode

use crate::database::error::DatabaseError;
use crate::database::order_repository::{NewOrder, Order, OrderStatus, OrderStore};
use crate::database::payment_repository::{
    CreateOutcome, NewPayment, Payment, PaymentChange, PaymentStore,
};
use crate::payments::types::{PaymentStatus, ProviderName};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Payments kept in insertion order.
///
/// Check-and-insert runs under one write lock, which gives the same
/// one-active-per-order-and-provider guarantee as the partial unique index.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<Vec<Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Payment> {
        self.payments.read().await.clone()
    }

    async fn latest_where(&self, predicate: impl Fn(&Payment) -> bool) -> Option<Payment> {
        let payments = self.payments.read().await;
        payments
            .iter()
            .filter(|p| predicate(p))
            .max_by_key(|p| p.created_at)
            .cloned()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let payments = self.payments.read().await;
        Ok(payments.iter().find(|p| p.id == id).cloned())
    }

    async fn find_latest_by_order(&self, order_id: i64) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.latest_where(|p| p.order_id == order_id).await)
    }

    async fn find_latest_for_provider(
        &self,
        order_id: i64,
        provider: ProviderName,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .latest_where(|p| p.order_id == order_id && p.provider == provider)
            .await)
    }

    async fn find_active(
        &self,
        order_id: i64,
        provider: ProviderName,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .latest_where(|p| {
                p.order_id == order_id && p.provider == provider && p.status.is_active()
            })
            .await)
    }

    async fn find_by_provider_reference(
        &self,
        provider: ProviderName,
        reference: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .latest_where(|p| {
                p.provider == provider && p.provider_reference.as_deref() == Some(reference)
            })
            .await)
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let payments = self.payments.read().await;
        Ok(payments
            .iter()
            .find(|p| p.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn create_if_no_active(&self, new: NewPayment) -> Result<CreateOutcome, DatabaseError> {
        let mut payments = self.payments.write().await;
        if let Some(existing) = payments
            .iter()
            .rev()
            .find(|p| p.order_id == new.order_id && p.provider == new.provider && p.status.is_active())
        {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }

        let payment = Payment::new(new);
        payments.push(payment.clone());
        Ok(CreateOutcome::Created(payment))
    }

    async fn update(&self, payment: &Payment) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.write().await;
        let stored = payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or_else(|| DatabaseError::not_found("Payment", payment.id))?;

        *stored = payment.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        change: PaymentChange,
    ) -> Result<Option<Payment>, DatabaseError> {
        let mut payments = self.payments.write().await;
        match payments.iter_mut().find(|p| p.id == id) {
            Some(stored) if stored.status == expected => {
                stored.apply(&change);
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<i64, Order>>>,
    next_id: Arc<AtomicI64>,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_newest_first(mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, DatabaseError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Order>, DatabaseError> {
        let orders = self.orders.read().await;
        Ok(Self::sorted_newest_first(orders.values().cloned().collect()))
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        let orders = self.orders.read().await;
        Ok(Self::sorted_newest_first(
            orders
                .values()
                .filter(|o| o.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, DatabaseError> {
        let orders = self.orders.read().await;
        Ok(Self::sorted_newest_first(
            orders
                .values()
                .filter(|o| o.status == status)
                .cloned()
                .collect(),
        ))
    }

    async fn insert(&self, new: NewOrder) -> Result<Order, DatabaseError> {
        let now = Utc::now();
        let order = Order {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: new.user_id,
            user_email: new.user_email,
            user_name: new.user_name,
            total_amount: new.total_amount,
            status: OrderStatus::Created,
            payment_id: None,
            transaction_id: None,
            payment_status: None,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };

        let mut orders = self.orders.write().await;
        orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn save(&self, order: &Order) -> Result<Order, DatabaseError> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id)
            .ok_or_else(|| DatabaseError::not_found("Order", order.id))?;
        *stored = order.clone();
        Ok(stored.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool, DatabaseError> {
        let mut orders = self.orders.write().await;
        Ok(orders.remove(&id).is_some())
    }
}
