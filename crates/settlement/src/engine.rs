//! Settlement engine: checkout initiation and payment confirmation.

use std::time::Instant;

use common::{OrderId, UserId};
use domain::{Order, OrderLine, OrderStatus, PaymentMethod};
use store::{CommerceStore, StoreError};

use crate::error::{Result, SettlementError};
use crate::gateway::{
    CallbackEvent, CheckoutRequest, GatewayError, GatewayRegistry, Initiation, Notification,
    Validation,
};
use crate::ledger::{InventoryLedger, StockDecrement};

/// A started checkout: the order as it stands plus what the client does next.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub order: Order,
    pub initiation: Initiation,
}

/// What a provider callback amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The order is paid (now or by an earlier delivery).
    Settled { order_id: OrderId },

    /// The provider reported a failed payment; the order is failed.
    Declined { order_id: OrderId, reason: String },

    /// Authentic event with nothing to settle.
    Ignored { event_type: String },
}

/// Drives orders from checkout to a terminal state.
///
/// Orders move NONE → PENDING → {PAID, FAILED}, and PENDING → CANCELLED on
/// an explicit user cancel. Everything a confirmed payment changes (stock,
/// order lines, order status, cart, balance) is written in one store
/// transaction.
pub struct SettlementEngine<S>
where
    S: CommerceStore,
{
    store: S,
    gateways: GatewayRegistry,
}

impl<S> SettlementEngine<S>
where
    S: CommerceStore,
{
    /// Creates a new settlement engine.
    pub fn new(store: S, gateways: GatewayRegistry) -> Self {
        Self { store, gateways }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Starts a checkout of the user's cart with the named payment method.
    ///
    /// No order is created when the method is unknown, the cart is empty or
    /// stock is short. Once the order exists, transient gateway failures leave
    /// it pending. Balance payments settle before this returns.
    #[tracing::instrument(skip(self))]
    pub async fn initiate(
        &self,
        user_id: UserId,
        payment_method: &str,
        currency: Option<&str>,
    ) -> Result<Checkout> {
        let (method, gateway) = self.gateways.resolve(payment_method)?;

        let cart = self.store.get_cart(user_id).await?;
        if cart.is_empty() {
            return Err(SettlementError::EmptyCart);
        }
        cart.check_stock()?;

        let customer = self.store.get_customer(user_id).await?;
        let order = Order::pending(user_id, cart.total(), method);
        self.store.insert_order(&order).await?;

        metrics::counter!("checkout_initiated_total", "method" => method.as_str()).increment(1);
        tracing::info!(order_id = %order.id, total = %order.total, "order created");

        let request = CheckoutRequest {
            order: &order,
            cart: &cart,
            customer: customer.as_ref(),
            currency,
        };
        let initiation = match gateway.initiate(request).await {
            Ok(initiation) => initiation,
            Err(GatewayError::InsufficientBalance) => {
                self.fail_pending(order.id, "insufficient_balance").await?;
                return Err(SettlementError::InsufficientBalance);
            }
            Err(err) => {
                tracing::warn!(order_id = %order.id, error = %err, "payment initiation failed, order left pending");
                return Err(err.into());
            }
        };

        if initiation == Initiation::Immediate {
            let order = self.confirm(order.id, Validation::accepted(None)).await?;
            return Ok(Checkout { order, initiation });
        }

        Ok(Checkout { order, initiation })
    }

    /// Applies a provider verdict to a pending order.
    ///
    /// Confirming an order that is already paid, or a provider event that was
    /// already recorded, is a successful no-op.
    #[tracing::instrument(skip(self, validation), fields(accepted = validation.accepted))]
    pub async fn confirm(&self, order_id: OrderId, validation: Validation) -> Result<Order> {
        let start = Instant::now();
        let result = self.apply_validation(order_id, validation).await;
        metrics::histogram!("settlement_duration_seconds").record(start.elapsed().as_secs_f64());

        if let Err(err) = &result {
            metrics::counter!("settlement_failed_total", "reason" => err.reason()).increment(1);
            tracing::warn!(%order_id, error = %err, "settlement did not complete");
        }
        result
    }

    async fn apply_validation(&self, order_id: OrderId, validation: Validation) -> Result<Order> {
        if validation.accepted
            && let Some(event_id) = validation.event_id.as_deref()
            && let Some(recorded) = self.store.find_order_by_payment_event(event_id).await?
        {
            if recorded != order_id {
                tracing::warn!(%order_id, %recorded, event_id, "payment event already recorded on another order");
                return Err(StoreError::DuplicatePaymentEvent(event_id.to_string()).into());
            }
            metrics::counter!("settlement_duplicate_total").increment(1);
            return self.load(recorded).await;
        }

        let order = self.load(order_id).await?;
        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Paid => {
                metrics::counter!("settlement_duplicate_total").increment(1);
                tracing::info!(%order_id, "order already paid");
                return Ok(order);
            }
            OrderStatus::Failed => return Err(SettlementError::AlreadyFailed(order_id)),
            OrderStatus::Cancelled => {
                return Err(SettlementError::InvalidTransition {
                    from: OrderStatus::Cancelled,
                    to: if validation.accepted {
                        OrderStatus::Paid
                    } else {
                        OrderStatus::Failed
                    },
                });
            }
        }

        if !validation.accepted {
            let reason = validation
                .reason
                .unwrap_or_else(|| "Payment validation failed".to_string());
            self.fail_pending(order_id, "payment_rejected").await?;
            return Err(SettlementError::PaymentRejected(reason));
        }

        self.commit_order(&order, validation.event_id).await
    }

    /// Settles a confirmed payment in one transaction.
    ///
    /// Any early return before `commit` drops the transaction, which rolls
    /// back every write made through it.
    async fn commit_order(&self, order: &Order, event_id: Option<String>) -> Result<Order> {
        let mut tx = self.store.begin().await?;

        let locked = tx
            .lock_order(order.id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order.id))?;
        match locked.status {
            OrderStatus::Pending => {}
            OrderStatus::Paid => {
                drop(tx);
                metrics::counter!("settlement_duplicate_total").increment(1);
                return self.load(order.id).await;
            }
            OrderStatus::Failed => return Err(SettlementError::AlreadyFailed(order.id)),
            OrderStatus::Cancelled => {
                return Err(SettlementError::InvalidTransition {
                    from: OrderStatus::Cancelled,
                    to: OrderStatus::Paid,
                });
            }
        }

        let entries = tx.cart_entries(order.user_id).await?;
        if entries.is_empty() {
            drop(tx);
            self.fail_pending(order.id, "empty_cart").await?;
            return Err(SettlementError::EmptyCart);
        }

        let mut ledger = InventoryLedger::lock(tx.as_mut(), &entries).await?;
        if let Err(shortage) = ledger.check(&entries) {
            drop(tx);
            self.fail_pending(order.id, "insufficient_stock").await?;
            return Err(shortage.into());
        }

        tx.mark_paid(order.id, event_id.as_deref()).await?;

        for entry in &entries {
            let Some(product) = ledger.product(entry.product_id).cloned() else {
                drop(tx);
                self.fail_pending(order.id, "insufficient_stock").await?;
                return Err(SettlementError::InsufficientStock {
                    product_name: entry.product_id.to_string(),
                    available: 0,
                });
            };

            let decrement = ledger
                .try_decrement(tx.as_mut(), entry.product_id, entry.quantity)
                .await?;
            if let StockDecrement::Insufficient { available } = decrement {
                drop(tx);
                self.fail_pending(order.id, "insufficient_stock").await?;
                return Err(SettlementError::InsufficientStock {
                    product_name: product.name,
                    available,
                });
            }

            let line = OrderLine::new(product.id, product.name, entry.quantity, product.price)?;
            tx.insert_order_line(order.id, &line).await?;
        }

        if order.payment_method == PaymentMethod::Balance
            && !tx.debit_balance(order.user_id, order.total).await?
        {
            drop(tx);
            self.fail_pending(order.id, "insufficient_balance").await?;
            return Err(SettlementError::InsufficientBalance);
        }

        let cleared = tx.clear_cart(order.user_id).await?;
        tx.commit().await?;

        metrics::counter!("settlement_confirmed_total").increment(1);
        tracing::info!(order_id = %order.id, lines = entries.len(), cleared, "order paid");

        self.load(order.id).await
    }

    /// Verifies, validates and settles a provider callback.
    #[tracing::instrument(skip(self, notification))]
    pub async fn handle_notification(
        &self,
        method: PaymentMethod,
        notification: &Notification,
    ) -> Result<NotificationOutcome> {
        let gateway = self.gateways.get(method)?;

        let payload = match gateway.authenticate(notification) {
            Ok(CallbackEvent::Payment(payload)) => payload,
            Ok(CallbackEvent::Ignored { event_type }) => {
                tracing::info!(%event_type, "notification acknowledged without action");
                return Ok(NotificationOutcome::Ignored { event_type });
            }
            Err(err) => {
                metrics::counter!("payment_notification_rejected_total", "method" => method.as_str())
                    .increment(1);
                tracing::warn!(error = %err, "payment notification rejected");
                return Err(SettlementError::InvalidCallbackSignature);
            }
        };

        let order_id = payload.order_id;
        let validation = gateway.validate(&payload).await?;
        let accepted = validation.accepted;

        match self.confirm(order_id, validation).await {
            Ok(_) => Ok(NotificationOutcome::Settled { order_id }),
            Err(SettlementError::PaymentRejected(reason)) => {
                Ok(NotificationOutcome::Declined { order_id, reason })
            }
            Err(SettlementError::AlreadyFailed(_)) if !accepted => {
                Ok(NotificationOutcome::Declined {
                    order_id,
                    reason: "Order has already failed".to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Cancels one of the user's pending orders.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let order = self.order_for_user(user_id, order_id).await?;
        if !order.status.can_cancel()
            || !self
                .store
                .transition_order(order_id, OrderStatus::Pending, OrderStatus::Cancelled)
                .await?
        {
            let current = self.load(order_id).await?;
            return Err(SettlementError::InvalidTransition {
                from: current.status,
                to: OrderStatus::Cancelled,
            });
        }

        tracing::info!(%order_id, "order cancelled");
        self.load(order_id).await
    }

    /// Returns one of the user's orders. Other users' orders are reported as
    /// not found.
    pub async fn order_for_user(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        match self.store.get_order(order_id).await? {
            Some(order) if order.is_owned_by(user_id) => Ok(order),
            _ => Err(SettlementError::OrderNotFound(order_id)),
        }
    }

    /// Lists the user's orders, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(user_id).await?)
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))
    }

    async fn fail_pending(&self, order_id: OrderId, reason: &'static str) -> Result<()> {
        if self
            .store
            .transition_order(order_id, OrderStatus::Pending, OrderStatus::Failed)
            .await?
        {
            tracing::info!(%order_id, reason, "order failed");
        }
        Ok(())
    }
}
