use crate::{
    config::LedgerConfig,
    db::DbPool,
    entities::{
        shop::{self, Entity as Shop},
        stock_movement::MovementKind,
        stock_transfer::{self, Entity as StockTransfer, TransferStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock_ledger::{apply_movement, begin_unit, AppliedMovement},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Two-phase inter-shop transfer workflow built on the ledger core.
///
/// Initiating debits the source shop and leaves a `pending` record; the
/// goods are in flight until a receive credits the destination (or a
/// cancel credits the source back). Each phase is one atomic unit, so
/// stock can never be created, destroyed, or double-credited by a race or
/// partial failure.
#[derive(Clone)]
pub struct TransferService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    config: LedgerConfig,
}

impl TransferService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: LedgerConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
        }
    }

    /// Debits the source shop and creates the `pending` transfer record in
    /// one atomic unit. An insufficient source level aborts the whole
    /// unit: no movement is logged and no transfer row exists afterwards.
    #[instrument(skip(self, reason, device_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn initiate_transfer(
        &self,
        account_id: Uuid,
        from_shop_id: Uuid,
        to_shop_id: Uuid,
        article_id: Uuid,
        user_id: Uuid,
        qty: i32,
        reason: &str,
        device_id: &str,
    ) -> Result<stock_transfer::Model, ServiceError> {
        if from_shop_id == to_shop_id {
            return Err(ServiceError::ValidationError(
                "source and destination shops must differ".into(),
            ));
        }

        let txn = begin_unit(&self.db_pool, &self.config).await?;

        let result = self
            .initiate_in(
                &txn,
                account_id,
                from_shop_id,
                to_shop_id,
                article_id,
                user_id,
                qty,
                reason,
                device_id,
            )
            .await;

        let (transfer, applied) = match result {
            Ok(ok) => ok,
            Err(e) => {
                txn.rollback().await.ok();
                return Err(e);
            }
        };

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(transfer_id = %transfer.id, qty, "initiated stock transfer");

        self.emit(applied.recorded_event()).await;
        if let Some(alert) = applied.low_stock {
            self.emit(alert).await;
        }
        self.emit(Event::TransferInitiated {
            transfer_id: transfer.id,
            account_id,
            from_shop_id,
            to_shop_id,
            article_id,
            qty,
        })
        .await;

        Ok(transfer)
    }

    #[allow(clippy::too_many_arguments)]
    async fn initiate_in(
        &self,
        txn: &DatabaseTransaction,
        account_id: Uuid,
        from_shop_id: Uuid,
        to_shop_id: Uuid,
        article_id: Uuid,
        user_id: Uuid,
        qty: i32,
        reason: &str,
        device_id: &str,
    ) -> Result<(stock_transfer::Model, AppliedMovement), ServiceError> {
        // Debit first: if the source cannot cover the quantity the whole
        // unit aborts before any transfer record exists.
        let applied = apply_movement(
            txn,
            account_id,
            from_shop_id,
            article_id,
            user_id,
            MovementKind::Out,
            qty,
            &format!("Transfer Out: {}", reason),
            device_id,
        )
        .await?;

        // Destination shop must exist for the tenant before goods are
        // considered in flight towards it.
        Shop::find_by_id(to_shop_id)
            .filter(shop::Column::AccountId.eq(account_id))
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("shop {} not found", to_shop_id)))?;

        let transfer = stock_transfer::ActiveModel {
            account_id: Set(account_id),
            from_shop_id: Set(from_shop_id),
            to_shop_id: Set(to_shop_id),
            article_id: Set(article_id),
            qty: Set(qty),
            status: Set(TransferStatus::Pending.as_str().to_string()),
            initiated_by: Set(user_id),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        Ok((transfer, applied))
    }

    /// Credits the destination shop and marks the transfer `received` in
    /// one atomic unit. A transfer that is not `pending` for this tenant
    /// is rejected, so a duplicate receive can never credit twice.
    #[instrument(skip(self, device_id))]
    pub async fn receive_transfer(
        &self,
        account_id: Uuid,
        transfer_id: Uuid,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<stock_transfer::Model, ServiceError> {
        self.finish_transfer(
            account_id,
            transfer_id,
            user_id,
            device_id,
            TransferStatus::Received,
        )
        .await
    }

    /// Compensating path: credits the quantity back to the source shop and
    /// marks the transfer `cancelled`. Terminal like a receive.
    #[instrument(skip(self, device_id))]
    pub async fn cancel_transfer(
        &self,
        account_id: Uuid,
        transfer_id: Uuid,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<stock_transfer::Model, ServiceError> {
        self.finish_transfer(
            account_id,
            transfer_id,
            user_id,
            device_id,
            TransferStatus::Cancelled,
        )
        .await
    }

    async fn finish_transfer(
        &self,
        account_id: Uuid,
        transfer_id: Uuid,
        user_id: Uuid,
        device_id: &str,
        next: TransferStatus,
    ) -> Result<stock_transfer::Model, ServiceError> {
        let txn = begin_unit(&self.db_pool, &self.config).await?;

        let result = self
            .finish_in(&txn, account_id, transfer_id, user_id, device_id, next)
            .await;

        let (transfer, applied) = match result {
            Ok(ok) => ok,
            Err(e) => {
                txn.rollback().await.ok();
                return Err(e);
            }
        };

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(transfer_id = %transfer.id, status = transfer.status.as_str(), "transfer closed");

        self.emit(applied.recorded_event()).await;
        if let Some(alert) = applied.low_stock {
            self.emit(alert).await;
        }
        match next {
            TransferStatus::Received => {
                self.emit(Event::TransferReceived {
                    transfer_id: transfer.id,
                    account_id,
                    to_shop_id: transfer.to_shop_id,
                    article_id: transfer.article_id,
                    qty: transfer.qty,
                })
                .await;
            }
            TransferStatus::Cancelled => {
                self.emit(Event::TransferCancelled {
                    transfer_id: transfer.id,
                    account_id,
                    from_shop_id: transfer.from_shop_id,
                    article_id: transfer.article_id,
                    qty: transfer.qty,
                })
                .await;
            }
            TransferStatus::Pending => {}
        }

        Ok(transfer)
    }

    async fn finish_in(
        &self,
        txn: &DatabaseTransaction,
        account_id: Uuid,
        transfer_id: Uuid,
        user_id: Uuid,
        device_id: &str,
        next: TransferStatus,
    ) -> Result<(stock_transfer::Model, AppliedMovement), ServiceError> {
        // The status check and the terminal transition share the row lock
        // with the credit, so a concurrent duplicate call serializes
        // behind this unit and then fails the pending check.
        let mut query = StockTransfer::find_by_id(transfer_id)
            .filter(stock_transfer::Column::AccountId.eq(account_id));
        if txn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        let transfer = query
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("transfer {} not found", transfer_id))
            })?;

        let status = transfer.status().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "transfer {} has unknown status '{}'",
                transfer_id, transfer.status
            ))
        })?;
        if !status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransferState(format!(
                "transfer {} is {}, expected pending",
                transfer_id,
                status.as_str()
            )));
        }

        // Received goods land at the destination; a cancellation returns
        // them to the source.
        let (credit_shop_id, credit_reason) = match next {
            TransferStatus::Received => (transfer.to_shop_id, "Transfer In (Received)"),
            TransferStatus::Cancelled => (transfer.from_shop_id, "Transfer Cancelled"),
            TransferStatus::Pending => unreachable!("pending is not a terminal transition"),
        };

        let applied = apply_movement(
            txn,
            account_id,
            credit_shop_id,
            transfer.article_id,
            user_id,
            MovementKind::In,
            transfer.qty,
            credit_reason,
            device_id,
        )
        .await?;

        let mut active: stock_transfer::ActiveModel = transfer.into();
        active.status = Set(next.as_str().to_string());
        active.received_by = Set(Some(user_id));
        active.received_at = Set(Some(Utc::now()));
        let transfer = active.update(txn).await.map_err(ServiceError::db_error)?;

        Ok((transfer, applied))
    }

    /// One transfer by id, tenant-checked.
    #[instrument(skip(self))]
    pub async fn get_transfer(
        &self,
        account_id: Uuid,
        transfer_id: Uuid,
    ) -> Result<stock_transfer::Model, ServiceError> {
        StockTransfer::find_by_id(transfer_id)
            .filter(stock_transfer::Column::AccountId.eq(account_id))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("transfer {} not found", transfer_id)))
    }

    /// Transfers for the tenant, newest first, optionally narrowed by
    /// status. `Pending` is the in-flight inventory scan.
    #[instrument(skip(self))]
    pub async fn list_transfers(
        &self,
        account_id: Uuid,
        status: Option<TransferStatus>,
    ) -> Result<Vec<stock_transfer::Model>, ServiceError> {
        let mut query =
            StockTransfer::find().filter(stock_transfer::Column::AccountId.eq(account_id));
        if let Some(status) = status {
            query = query.filter(stock_transfer::Column::Status.eq(status.as_str()));
        }

        query
            .order_by_desc(stock_transfer::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!("failed to emit transfer event: {}", e);
        }
    }
}
