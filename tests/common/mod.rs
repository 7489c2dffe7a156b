#![allow(dead_code)]

use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use stocktrack::{
    config::{AppConfig, LedgerConfig},
    db::{self, DbPool},
    entities::{account, article, shop},
    events::{Event, EventSender},
    services::{stock_ledger::StockLedgerService, transfers::TransferService},
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Test harness backed by an in-memory SQLite database.
///
/// The pool is pinned to a single connection so the one in-memory database
/// is shared by every operation and transactions serialize behind it.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub ledger: StockLedgerService,
    pub transfers: TransferService,
    pub events: mpsc::Receiver<Event>,
}

pub async fn setup() -> TestContext {
    let mut cfg = AppConfig::new("sqlite::memory:", "test");
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("failed to create test database");
    db::run_migrations(&pool).await.expect("migrations failed");

    let db = Arc::new(pool);
    let (tx, rx) = mpsc::channel(1024);
    let sender = EventSender::new(tx);
    let ledger_cfg = LedgerConfig::from(&cfg);

    TestContext {
        db: db.clone(),
        ledger: StockLedgerService::new(db.clone(), sender.clone(), ledger_cfg.clone()),
        transfers: TransferService::new(db, sender, ledger_cfg),
        events: rx,
    }
}

impl TestContext {
    /// Drains every event published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub async fn seed_account(db: &DbPool, company_name: &str) -> account::Model {
    account::ActiveModel {
        company_name: Set(company_name.to_string()),
        status: Set("active".to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("failed to seed account")
}

pub async fn seed_shop(db: &DbPool, account_id: Uuid, name: &str) -> shop::Model {
    shop::ActiveModel {
        account_id: Set(account_id),
        name: Set(name.to_string()),
        location: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("failed to seed shop")
}

pub async fn seed_article(
    db: &DbPool,
    account_id: Uuid,
    name: &str,
    min_threshold: i32,
) -> article::Model {
    article::ActiveModel {
        account_id: Set(account_id),
        sku: Set(format!("TST-{}", &Uuid::new_v4().simple().to_string()[..8])),
        name: Set(name.to_string()),
        description: Set(None),
        category_id: Set(None),
        brand_id: Set(None),
        price: Set(dec!(19.99)),
        min_threshold: Set(min_threshold),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("failed to seed article")
}
