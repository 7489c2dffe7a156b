use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_accounts_table::Migration),
            Box::new(m20240101_000002_create_shops_table::Migration),
            Box::new(m20240101_000003_create_catalogue_tables::Migration),
            Box::new(m20240101_000004_create_stock_levels_table::Migration),
            Box::new(m20240101_000005_create_stock_movements_table::Migration),
            Box::new(m20240101_000006_create_stock_transfers_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_accounts_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_accounts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Accounts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Accounts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Accounts::CompanyName).string().not_null())
                        .col(
                            ColumnDef::new(Accounts::Status)
                                .string()
                                .not_null()
                                .default("trial"),
                        )
                        .col(
                            ColumnDef::new(Accounts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Accounts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Accounts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Accounts {
        Table,
        Id,
        CompanyName,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_shops_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_shops_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Shops::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Shops::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Shops::AccountId).uuid().not_null())
                        .col(ColumnDef::new(Shops::Name).string().not_null())
                        .col(ColumnDef::new(Shops::Location).string().null())
                        .col(
                            ColumnDef::new(Shops::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Shops::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shops_account_id")
                        .table(Shops::Table)
                        .col(Shops::AccountId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Shops::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Shops {
        Table,
        Id,
        AccountId,
        Name,
        Location,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_catalogue_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_catalogue_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Categories::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Categories::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Categories::AccountId).uuid().not_null())
                        .col(ColumnDef::new(Categories::Name).string().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Brands::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Brands::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Brands::AccountId).uuid().not_null())
                        .col(ColumnDef::new(Brands::Name).string().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Articles::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Articles::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Articles::AccountId).uuid().not_null())
                        .col(ColumnDef::new(Articles::Sku).string().not_null())
                        .col(ColumnDef::new(Articles::Name).string().not_null())
                        .col(ColumnDef::new(Articles::Description).string().null())
                        .col(ColumnDef::new(Articles::CategoryId).uuid().null())
                        .col(ColumnDef::new(Articles::BrandId).uuid().null())
                        .col(
                            ColumnDef::new(Articles::Price)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Articles::MinThreshold)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Articles::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Articles::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_articles_account_id")
                        .table(Articles::Table)
                        .col(Articles::AccountId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_articles_account_sku")
                        .table(Articles::Table)
                        .col(Articles::AccountId)
                        .col(Articles::Sku)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Articles::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Brands::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Categories::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Categories {
        Table,
        Id,
        AccountId,
        Name,
    }

    #[derive(DeriveIden)]
    pub(super) enum Brands {
        Table,
        Id,
        AccountId,
        Name,
    }

    #[derive(DeriveIden)]
    pub(super) enum Articles {
        Table,
        Id,
        AccountId,
        Sku,
        Name,
        Description,
        CategoryId,
        BrandId,
        Price,
        MinThreshold,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_stock_levels_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_stock_levels_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLevels::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(StockLevels::ArticleId).uuid().not_null())
                        .col(ColumnDef::new(StockLevels::ShopId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockLevels::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockLevels::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(StockLevels::ArticleId)
                                .col(StockLevels::ShopId),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_levels_shop_id")
                        .table(StockLevels::Table)
                        .col(StockLevels::ShopId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockLevels::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockLevels {
        Table,
        ArticleId,
        ShopId,
        Quantity,
        UpdatedAt,
    }
}

mod m20240101_000005_create_stock_movements_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::AccountId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::ShopId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::ArticleId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::UserId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::Kind).string().not_null())
                        .col(ColumnDef::new(StockMovements::Qty).integer().not_null())
                        .col(
                            ColumnDef::new(StockMovements::OldValue)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::NewValue)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::Reason)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(StockMovements::DeviceId)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // The audit log is always read tenant-first, newest-first
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_account_created_at")
                        .table(StockMovements::Table)
                        .col(StockMovements::AccountId)
                        .col(StockMovements::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_article_shop")
                        .table(StockMovements::Table)
                        .col(StockMovements::ArticleId)
                        .col(StockMovements::ShopId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockMovements {
        Table,
        Id,
        AccountId,
        ShopId,
        ArticleId,
        UserId,
        Kind,
        Qty,
        OldValue,
        NewValue,
        Reason,
        DeviceId,
        CreatedAt,
    }
}

mod m20240101_000006_create_stock_transfers_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_stock_transfers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockTransfers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockTransfers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransfers::AccountId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockTransfers::FromShopId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransfers::ToShopId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockTransfers::ArticleId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransfers::Qty).integer().not_null())
                        .col(
                            ColumnDef::new(StockTransfers::Status)
                                .string()
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::InitiatedBy)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransfers::ReceivedBy).uuid().null())
                        .col(
                            ColumnDef::new(StockTransfers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::ReceivedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Pending transfers are the in-flight inventory scan
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_transfers_account_status")
                        .table(StockTransfers::Table)
                        .col(StockTransfers::AccountId)
                        .col(StockTransfers::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockTransfers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockTransfers {
        Table,
        Id,
        AccountId,
        FromShopId,
        ToShopId,
        ArticleId,
        Qty,
        Status,
        InitiatedBy,
        ReceivedBy,
        CreatedAt,
        ReceivedAt,
    }
}
