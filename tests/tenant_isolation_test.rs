mod common;

use assert_matches::assert_matches;
use stocktrack::{entities::stock_movement::MovementKind, ServiceError};
use uuid::Uuid;

const DEVICE: &str = "test-device";

/// Two tenants with one shop and one article each.
struct TwoTenants {
    ctx: common::TestContext,
    account_a: Uuid,
    shop_a: Uuid,
    article_a: Uuid,
    account_b: Uuid,
    shop_b: Uuid,
    article_b: Uuid,
}

async fn two_tenants() -> TwoTenants {
    let ctx = common::setup().await;
    let a = common::seed_account(&ctx.db, "Tenant A").await;
    let shop_a = common::seed_shop(&ctx.db, a.id, "A Shop").await;
    let article_a = common::seed_article(&ctx.db, a.id, "A Beans", 0).await;
    let b = common::seed_account(&ctx.db, "Tenant B").await;
    let shop_b = common::seed_shop(&ctx.db, b.id, "B Shop").await;
    let article_b = common::seed_article(&ctx.db, b.id, "B Beans", 0).await;

    TwoTenants {
        ctx,
        account_a: a.id,
        shop_a: shop_a.id,
        article_a: article_a.id,
        account_b: b.id,
        shop_b: shop_b.id,
        article_b: article_b.id,
    }
}

#[tokio::test]
async fn movements_never_touch_a_foreign_tenants_rows() {
    let t = two_tenants().await;
    let user = Uuid::new_v4();

    // A foreign article id fails even when the shop is ours.
    let err = t
        .ctx
        .ledger
        .record_movement(
            t.account_a,
            t.shop_a,
            t.article_b,
            user,
            MovementKind::In,
            5,
            "Sneaky",
            DEVICE,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    // A foreign shop id fails even when the article is ours.
    let err = t
        .ctx
        .ledger
        .record_movement(
            t.account_a,
            t.shop_b,
            t.article_a,
            user,
            MovementKind::In,
            5,
            "Sneaky",
            DEVICE,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    // Tenant B sees none of it, and its own stock is untouched.
    let qty = t
        .ctx
        .ledger
        .get_quantity(t.account_b, t.article_b, t.shop_b)
        .await
        .unwrap();
    assert_eq!(qty, 0);
    let movements = t
        .ctx
        .ledger
        .list_movements(t.account_b, None, None, 10)
        .await
        .unwrap();
    assert!(movements.is_empty());
}

#[tokio::test]
async fn quantity_reads_are_tenant_checked() {
    let t = two_tenants().await;

    let err = t
        .ctx
        .ledger
        .get_quantity(t.account_a, t.article_b, t.shop_b)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn a_foreign_tenant_cannot_receive_or_cancel_a_transfer() {
    let t = two_tenants().await;
    let user = Uuid::new_v4();

    // Tenant A stocks a second shop and starts a transfer.
    let shop_a2 = common::seed_shop(&t.ctx.db, t.account_a, "A Shop 2").await;
    t.ctx
        .ledger
        .record_movement(
            t.account_a,
            t.shop_a,
            t.article_a,
            user,
            MovementKind::In,
            8,
            "Delivery",
            DEVICE,
        )
        .await
        .unwrap();
    let transfer = t
        .ctx
        .transfers
        .initiate_transfer(
            t.account_a,
            t.shop_a,
            shop_a2.id,
            t.article_a,
            user,
            3,
            "Rebalance",
            DEVICE,
        )
        .await
        .unwrap();

    // Tenant B probing A's transfer id sees NotFound, not A's data.
    let err = t
        .ctx
        .transfers
        .receive_transfer(t.account_b, transfer.id, user, DEVICE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
    let err = t
        .ctx
        .transfers
        .cancel_transfer(t.account_b, transfer.id, user, DEVICE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    // The transfer is still pending and receivable by its owner.
    let still_pending = t
        .ctx
        .transfers
        .get_transfer(t.account_a, transfer.id)
        .await
        .unwrap();
    assert_eq!(still_pending.status, "pending");

    t.ctx
        .transfers
        .receive_transfer(t.account_a, transfer.id, user, DEVICE)
        .await
        .expect("owner receive failed");
    let qty = t
        .ctx
        .ledger
        .get_quantity(t.account_a, t.article_a, shop_a2.id)
        .await
        .unwrap();
    assert_eq!(qty, 3);
}

#[tokio::test]
async fn listings_are_partitioned_by_tenant() {
    let t = two_tenants().await;
    let user = Uuid::new_v4();

    t.ctx
        .ledger
        .record_movement(
            t.account_a,
            t.shop_a,
            t.article_a,
            user,
            MovementKind::In,
            5,
            "Delivery",
            DEVICE,
        )
        .await
        .unwrap();
    t.ctx
        .ledger
        .record_movement(
            t.account_b,
            t.shop_b,
            t.article_b,
            user,
            MovementKind::In,
            9,
            "Delivery",
            DEVICE,
        )
        .await
        .unwrap();

    let a_movements = t
        .ctx
        .ledger
        .list_movements(t.account_a, None, None, 10)
        .await
        .unwrap();
    assert_eq!(a_movements.len(), 1);
    assert_eq!(a_movements[0].account_id, t.account_a);

    let b_levels = t.ctx.ledger.get_stock_levels(t.account_b, t.shop_b).await.unwrap();
    assert_eq!(b_levels.len(), 1);
    assert_eq!(b_levels[0].0.quantity, 9);

    let a_transfers = t.ctx.transfers.list_transfers(t.account_a, None).await.unwrap();
    assert!(a_transfers.is_empty());
}
