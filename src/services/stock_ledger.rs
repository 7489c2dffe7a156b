use crate::{
    config::LedgerConfig,
    db::DbPool,
    entities::{
        article::{self, Entity as Article},
        shop::{self, Entity as Shop},
        stock_level::{self, Entity as StockLevel},
        stock_movement::{self, Entity as StockMovement, MovementKind},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// The ledger core.
///
/// Owns the invariant that a stock level quantity always equals the replay
/// sum of the movement log for its (article, shop) key, and that every
/// quantity mutation leaves exactly one immutable movement behind.
#[derive(Clone)]
pub struct StockLedgerService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    config: LedgerConfig,
}

/// Result of applying one movement inside a unit of work, carried out of
/// the transaction so events fire only after commit.
pub(crate) struct AppliedMovement {
    pub movement: stock_movement::Model,
    pub low_stock: Option<Event>,
}

impl AppliedMovement {
    pub(crate) fn recorded_event(&self) -> Event {
        let m = &self.movement;
        Event::MovementRecorded {
            movement_id: m.id,
            account_id: m.account_id,
            shop_id: m.shop_id,
            article_id: m.article_id,
            kind: m.kind().unwrap_or(MovementKind::Adjust),
            qty: m.qty,
            old_value: m.old_value,
            new_value: m.new_value,
        }
    }
}

/// Opens a transaction scope for one ledger operation. On Postgres the
/// configured lock wait budget is applied so a contended stock level key
/// surfaces as a retryable conflict instead of blocking indefinitely.
pub(crate) async fn begin_unit(
    db: &DbPool,
    config: &LedgerConfig,
) -> Result<DatabaseTransaction, ServiceError> {
    let txn = db.begin().await.map_err(ServiceError::db_error)?;
    if txn.get_database_backend() == DbBackend::Postgres {
        txn.execute(Statement::from_string(
            DbBackend::Postgres,
            format!(
                "SET LOCAL lock_timeout = '{}ms'",
                config.lock_wait_timeout.as_millis()
            ),
        ))
        .await
        .map_err(ServiceError::db_error)?;
    }
    Ok(txn)
}

/// Read-modify-write of one stock level key plus its audit record, against
/// a caller-supplied connection so workflows can compose it into their own
/// unit of work.
///
/// The read takes an exclusive row lock on Postgres; SQLite serializes
/// writers at the connection level. A missing stock level row reads as
/// quantity zero.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn apply_movement<C: ConnectionTrait>(
    conn: &C,
    account_id: Uuid,
    shop_id: Uuid,
    article_id: Uuid,
    user_id: Uuid,
    kind: MovementKind,
    qty: i32,
    reason: &str,
    device_id: &str,
) -> Result<AppliedMovement, ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "movement quantity must be positive, got {}",
            qty
        )));
    }
    if kind == MovementKind::Transfer {
        return Err(ServiceError::InvalidOperation(
            "transfer movements are recorded by the transfer workflow as an out/in pair".into(),
        ));
    }

    // Tenant scoping: both ends of the key must belong to the account.
    let article = Article::find_by_id(article_id)
        .filter(article::Column::AccountId.eq(account_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("article {} not found", article_id)))?;

    Shop::find_by_id(shop_id)
        .filter(shop::Column::AccountId.eq(account_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("shop {} not found", shop_id)))?;

    let mut level_query = StockLevel::find_by_id((article_id, shop_id));
    if conn.get_database_backend() == DbBackend::Postgres {
        level_query = level_query.lock_exclusive();
    }
    let existing = level_query.one(conn).await.map_err(ServiceError::db_error)?;

    // Get-or-default: a pair with no activity yet reads as zero.
    let old_value = existing.as_ref().map(|l| l.quantity).unwrap_or(0);

    let new_value = match kind {
        MovementKind::In => old_value.checked_add(qty).ok_or_else(|| {
            ServiceError::InvalidOperation("stock quantity overflow".into())
        })?,
        MovementKind::Out => {
            if old_value < qty {
                return Err(ServiceError::InsufficientStock(format!(
                    "article {} at shop {}: have {}, need {}",
                    article_id, shop_id, old_value, qty
                )));
            }
            old_value - qty
        }
        MovementKind::Adjust => qty,
        MovementKind::Transfer => unreachable!("rejected above"),
    };

    match existing {
        Some(level) => {
            let mut active: stock_level::ActiveModel = level.into();
            active.quantity = Set(new_value);
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }
        None => {
            stock_level::ActiveModel {
                article_id: Set(article_id),
                shop_id: Set(shop_id),
                quantity: Set(new_value),
                ..Default::default()
            }
            .insert(conn)
            .await
            .map_err(ServiceError::db_error)?;
        }
    }

    let movement = stock_movement::ActiveModel {
        account_id: Set(account_id),
        shop_id: Set(shop_id),
        article_id: Set(article_id),
        user_id: Set(user_id),
        kind: Set(kind.as_str().to_string()),
        qty: Set(qty),
        old_value: Set(old_value),
        new_value: Set(new_value),
        reason: Set(reason.to_string()),
        device_id: Set(device_id.to_string()),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    let low_stock = (new_value < article.min_threshold).then(|| Event::LowStock {
        account_id,
        shop_id,
        article_id,
        quantity: new_value,
        min_threshold: article.min_threshold,
    });

    Ok(AppliedMovement {
        movement,
        low_stock,
    })
}

impl StockLedgerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: LedgerConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
        }
    }

    /// Records one stock movement and reconciles the level, atomically.
    ///
    /// `in` adds `qty`, `out` subtracts it (failing with
    /// [`ServiceError::InsufficientStock`] when the level cannot cover it),
    /// `adjust` sets the absolute quantity. The created movement carries
    /// the quantity before and after.
    #[instrument(skip(self, reason, device_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn record_movement(
        &self,
        account_id: Uuid,
        shop_id: Uuid,
        article_id: Uuid,
        user_id: Uuid,
        kind: MovementKind,
        qty: i32,
        reason: &str,
        device_id: &str,
    ) -> Result<stock_movement::Model, ServiceError> {
        let txn = begin_unit(&self.db_pool, &self.config).await?;

        let applied = match apply_movement(
            &txn, account_id, shop_id, article_id, user_id, kind, qty, reason, device_id,
        )
        .await
        {
            Ok(applied) => applied,
            Err(e) => {
                txn.rollback().await.ok();
                return Err(e);
            }
        };

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            movement_id = %applied.movement.id,
            old_value = applied.movement.old_value,
            new_value = applied.movement.new_value,
            "recorded stock movement"
        );

        self.emit(applied.recorded_event()).await;
        if let Some(alert) = applied.low_stock {
            self.emit(alert).await;
        }

        Ok(applied.movement)
    }

    /// Current quantity for one (article, shop) pair; zero when the pair
    /// has no activity yet. Tenant-checked like every other read.
    #[instrument(skip(self))]
    pub async fn get_quantity(
        &self,
        account_id: Uuid,
        article_id: Uuid,
        shop_id: Uuid,
    ) -> Result<i32, ServiceError> {
        let db = self.db_pool.as_ref();

        Article::find_by_id(article_id)
            .filter(article::Column::AccountId.eq(account_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("article {} not found", article_id)))?;

        Shop::find_by_id(shop_id)
            .filter(shop::Column::AccountId.eq(account_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("shop {} not found", shop_id)))?;

        let level = StockLevel::find_by_id((article_id, shop_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(level.map(|l| l.quantity).unwrap_or(0))
    }

    /// Stock levels for one shop, joined with their articles.
    #[instrument(skip(self))]
    pub async fn get_stock_levels(
        &self,
        account_id: Uuid,
        shop_id: Uuid,
    ) -> Result<Vec<(stock_level::Model, article::Model)>, ServiceError> {
        let rows = StockLevel::find()
            .find_also_related(Article)
            .filter(stock_level::Column::ShopId.eq(shop_id))
            .filter(article::Column::AccountId.eq(account_id))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|(level, article)| article.map(|a| (level, a)))
            .collect())
    }

    /// Recent movements for the tenant, newest first, optionally narrowed
    /// to one shop and/or article.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        account_id: Uuid,
        shop_id: Option<Uuid>,
        article_id: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let mut query = StockMovement::find()
            .filter(stock_movement::Column::AccountId.eq(account_id));
        if let Some(shop_id) = shop_id {
            query = query.filter(stock_movement::Column::ShopId.eq(shop_id));
        }
        if let Some(article_id) = article_id {
            query = query.filter(stock_movement::Column::ArticleId.eq(article_id));
        }

        query
            .order_by_desc(stock_movement::Column::CreatedAt)
            .limit(limit)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            // The unit of work is already committed; a full event channel
            // must not fail the operation.
            warn!("failed to emit ledger event: {}", e);
        }
    }
}
