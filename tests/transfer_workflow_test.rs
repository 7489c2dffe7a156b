mod common;

use assert_matches::assert_matches;
use stocktrack::{
    entities::{stock_movement::MovementKind, stock_transfer::TransferStatus},
    ServiceError,
};
use uuid::Uuid;

const DEVICE: &str = "test-device";

struct TransferFixture {
    ctx: common::TestContext,
    account_id: Uuid,
    source_id: Uuid,
    destination_id: Uuid,
    article_id: Uuid,
    user: Uuid,
}

/// Seeds one tenant with two shops and six units at the source shop.
async fn fixture() -> TransferFixture {
    let ctx = common::setup().await;
    let account = common::seed_account(&ctx.db, "Acme Retail").await;
    let source = common::seed_shop(&ctx.db, account.id, "Warehouse").await;
    let destination = common::seed_shop(&ctx.db, account.id, "Storefront").await;
    let article = common::seed_article(&ctx.db, account.id, "Beans", 0).await;
    let user = Uuid::new_v4();

    ctx.ledger
        .record_movement(
            account.id,
            source.id,
            article.id,
            user,
            MovementKind::In,
            6,
            "Delivery",
            DEVICE,
        )
        .await
        .expect("seed movement failed");

    TransferFixture {
        ctx,
        account_id: account.id,
        source_id: source.id,
        destination_id: destination.id,
        article_id: article.id,
        user,
    }
}

#[tokio::test]
async fn initiate_then_receive_moves_stock_exactly_once() {
    let f = fixture().await;

    let transfer = f
        .ctx
        .transfers
        .initiate_transfer(
            f.account_id,
            f.source_id,
            f.destination_id,
            f.article_id,
            f.user,
            5,
            "Restock front",
            DEVICE,
        )
        .await
        .expect("initiate failed");
    assert_eq!(transfer.status(), Some(TransferStatus::Pending));
    assert_eq!(transfer.initiated_by, f.user);
    assert!(transfer.received_by.is_none());

    // Debit applied at initiation; goods are in flight.
    let source_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.source_id)
        .await
        .unwrap();
    assert_eq!(source_qty, 1);
    let destination_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.destination_id)
        .await
        .unwrap();
    assert_eq!(destination_qty, 0);

    let pending = f
        .ctx
        .transfers
        .list_transfers(f.account_id, Some(TransferStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let receiver = Uuid::new_v4();
    let received = f
        .ctx
        .transfers
        .receive_transfer(f.account_id, transfer.id, receiver, DEVICE)
        .await
        .expect("receive failed");
    assert_eq!(received.status(), Some(TransferStatus::Received));
    assert_eq!(received.received_by, Some(receiver));
    assert!(received.received_at.is_some());

    let destination_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.destination_id)
        .await
        .unwrap();
    assert_eq!(destination_qty, 5);

    // Duplicate receive (e.g. a network retry) must not credit twice.
    let err = f
        .ctx
        .transfers
        .receive_transfer(f.account_id, transfer.id, receiver, DEVICE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransferState(_));
    let destination_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.destination_id)
        .await
        .unwrap();
    assert_eq!(destination_qty, 5);
}

#[tokio::test]
async fn failed_debit_leaves_no_transfer_behind() {
    let f = fixture().await;

    let err = f
        .ctx
        .transfers
        .initiate_transfer(
            f.account_id,
            f.source_id,
            f.destination_id,
            f.article_id,
            f.user,
            10,
            "Too much",
            DEVICE,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // Nothing persisted: no transfer row, no extra movement, level intact.
    let transfers = f.ctx.transfers.list_transfers(f.account_id, None).await.unwrap();
    assert!(transfers.is_empty());
    let movements = f
        .ctx
        .ledger
        .list_movements(f.account_id, None, None, 10)
        .await
        .unwrap();
    assert_eq!(movements.len(), 1); // the seed delivery only
    let source_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.source_id)
        .await
        .unwrap();
    assert_eq!(source_qty, 6);
}

#[tokio::test]
async fn transfer_to_unknown_shop_rolls_back_the_debit() {
    let f = fixture().await;

    let err = f
        .ctx
        .transfers
        .initiate_transfer(
            f.account_id,
            f.source_id,
            Uuid::new_v4(),
            f.article_id,
            f.user,
            2,
            "Ghost shop",
            DEVICE,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let source_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.source_id)
        .await
        .unwrap();
    assert_eq!(source_qty, 6);
    let movements = f
        .ctx
        .ledger
        .list_movements(f.account_id, None, None, 10)
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
}

#[tokio::test]
async fn transfer_between_the_same_shop_is_rejected() {
    let f = fixture().await;

    let err = f
        .ctx
        .transfers
        .initiate_transfer(
            f.account_id,
            f.source_id,
            f.source_id,
            f.article_id,
            f.user,
            1,
            "Loop",
            DEVICE,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn cancel_returns_the_quantity_to_the_source() {
    let f = fixture().await;

    let transfer = f
        .ctx
        .transfers
        .initiate_transfer(
            f.account_id,
            f.source_id,
            f.destination_id,
            f.article_id,
            f.user,
            4,
            "Changed our minds",
            DEVICE,
        )
        .await
        .unwrap();
    let source_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.source_id)
        .await
        .unwrap();
    assert_eq!(source_qty, 2);

    let cancelled = f
        .ctx
        .transfers
        .cancel_transfer(f.account_id, transfer.id, f.user, DEVICE)
        .await
        .expect("cancel failed");
    assert_eq!(cancelled.status(), Some(TransferStatus::Cancelled));

    let source_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.source_id)
        .await
        .unwrap();
    assert_eq!(source_qty, 6);
    let destination_qty = f
        .ctx
        .ledger
        .get_quantity(f.account_id, f.article_id, f.destination_id)
        .await
        .unwrap();
    assert_eq!(destination_qty, 0);

    // Terminal: neither receive nor a second cancel may follow.
    let err = f
        .ctx
        .transfers
        .receive_transfer(f.account_id, transfer.id, f.user, DEVICE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransferState(_));
    let err = f
        .ctx
        .transfers
        .cancel_transfer(f.account_id, transfer.id, f.user, DEVICE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransferState(_));
}

#[tokio::test]
async fn receiving_an_unknown_transfer_fails() {
    let f = fixture().await;

    let err = f
        .ctx
        .transfers
        .receive_transfer(f.account_id, Uuid::new_v4(), f.user, DEVICE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
