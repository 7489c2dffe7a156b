use crate::{
    db::DbPool,
    entities::{
        article::{self, Entity as Article},
        brand::{self, Entity as Brand},
        category::{self, Entity as Category},
        shop::{self, Entity as Shop},
        stock_level::{self, Entity as StockLevel},
    },
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QuerySelect, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Attempts made to find an unused generated sku before giving up
const SKU_GENERATION_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Validate)]
pub struct NewArticle {
    /// Explicit sku; generated as `ART-XXXXX` when absent
    #[validate(length(min = 1, max = 64))]
    pub sku: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub min_threshold: i32,
}

/// Attribute changes for an existing article; `None` leaves a field as is.
/// Identity (id, account, sku) never changes.
#[derive(Debug, Clone, Default)]
pub struct ArticleChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub price: Option<Decimal>,
    pub min_threshold: Option<i32>,
}

/// An article with its quantity summed across all of the tenant's shops.
#[derive(Debug, Clone)]
pub struct ArticleWithStock {
    pub article: article::Model,
    pub total_stock: i64,
}

/// Tenant-scoped article catalogue.
#[derive(Clone)]
pub struct ArticleService {
    db_pool: Arc<DbPool>,
}

impl ArticleService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, input))]
    pub async fn create_article(
        &self,
        account_id: Uuid,
        input: NewArticle,
    ) -> Result<article::Model, ServiceError> {
        input.validate()?;

        let sku = match input.sku {
            Some(sku) => sku,
            None => self.generate_sku(account_id).await?,
        };

        let article = article::ActiveModel {
            account_id: Set(account_id),
            sku: Set(sku),
            name: Set(input.name),
            description: Set(input.description),
            category_id: Set(input.category_id),
            brand_id: Set(input.brand_id),
            price: Set(input.price),
            min_threshold: Set(input.min_threshold),
            ..Default::default()
        }
        .insert(self.db_pool.as_ref())
        .await
        .map_err(ServiceError::db_error)?;

        info!(article_id = %article.id, sku = %article.sku, "created article");

        Ok(article)
    }

    /// Generates an unused `ART-XXXXX` sku for the tenant. Retries a few
    /// times against collisions before reporting failure.
    async fn generate_sku(&self, account_id: Uuid) -> Result<String, ServiceError> {
        for _ in 0..SKU_GENERATION_ATTEMPTS {
            let bytes = *Uuid::new_v4().as_bytes();
            let random_part = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % 100_000;
            let sku = format!("ART-{:05}", random_part);

            let taken = Article::find()
                .filter(article::Column::AccountId.eq(account_id))
                .filter(article::Column::Sku.eq(&sku))
                .count(self.db_pool.as_ref())
                .await
                .map_err(ServiceError::db_error)?;
            if taken == 0 {
                return Ok(sku);
            }
        }

        Err(ServiceError::InternalError(
            "could not generate a unique sku after several attempts".into(),
        ))
    }

    #[instrument(skip(self))]
    pub async fn get_article(
        &self,
        account_id: Uuid,
        article_id: Uuid,
    ) -> Result<article::Model, ServiceError> {
        Article::find_by_id(article_id)
            .filter(article::Column::AccountId.eq(account_id))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("article {} not found", article_id)))
    }

    /// All articles of the tenant, each with its stock summed across shops.
    #[instrument(skip(self))]
    pub async fn list_articles(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<ArticleWithStock>, ServiceError> {
        let db = self.db_pool.as_ref();

        let articles = Article::find()
            .filter(article::Column::AccountId.eq(account_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        if articles.is_empty() {
            return Ok(Vec::new());
        }

        #[derive(FromQueryResult)]
        struct StockSum {
            article_id: Uuid,
            total: Option<i64>,
        }

        let ids: Vec<Uuid> = articles.iter().map(|a| a.id).collect();
        let sums = StockLevel::find()
            .select_only()
            .column(stock_level::Column::ArticleId)
            .column_as(stock_level::Column::Quantity.sum(), "total")
            .filter(stock_level::Column::ArticleId.is_in(ids))
            .group_by(stock_level::Column::ArticleId)
            .into_model::<StockSum>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let totals: HashMap<Uuid, i64> = sums
            .into_iter()
            .map(|s| (s.article_id, s.total.unwrap_or(0)))
            .collect();

        Ok(articles
            .into_iter()
            .map(|article| {
                let total_stock = totals.get(&article.id).copied().unwrap_or(0);
                ArticleWithStock {
                    article,
                    total_stock,
                }
            })
            .collect())
    }

    #[instrument(skip(self, changes))]
    pub async fn update_article(
        &self,
        account_id: Uuid,
        article_id: Uuid,
        changes: ArticleChanges,
    ) -> Result<article::Model, ServiceError> {
        let article = self.get_article(account_id, article_id).await?;

        let mut active: article::ActiveModel = article.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(description) = changes.description {
            active.description = Set(Some(description));
        }
        if let Some(category_id) = changes.category_id {
            active.category_id = Set(Some(category_id));
        }
        if let Some(brand_id) = changes.brand_id {
            active.brand_id = Set(Some(brand_id));
        }
        if let Some(price) = changes.price {
            active.price = Set(price);
        }
        if let Some(min_threshold) = changes.min_threshold {
            if min_threshold < 0 {
                return Err(ServiceError::ValidationError(
                    "min_threshold cannot be negative".into(),
                ));
            }
            active.min_threshold = Set(min_threshold);
        }

        active
            .update(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn create_category(
        &self,
        account_id: Uuid,
        name: &str,
    ) -> Result<category::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "category name cannot be empty".into(),
            ));
        }

        category::ActiveModel {
            account_id: Set(account_id),
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(self.db_pool.as_ref())
        .await
        .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn list_categories(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<category::Model>, ServiceError> {
        Category::find()
            .filter(category::Column::AccountId.eq(account_id))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn create_brand(
        &self,
        account_id: Uuid,
        name: &str,
    ) -> Result<brand::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "brand name cannot be empty".into(),
            ));
        }

        brand::ActiveModel {
            account_id: Set(account_id),
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(self.db_pool.as_ref())
        .await
        .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn list_brands(&self, account_id: Uuid) -> Result<Vec<brand::Model>, ServiceError> {
        Brand::find()
            .filter(brand::Column::AccountId.eq(account_id))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}

/// Tenant-scoped shop registry.
#[derive(Clone)]
pub struct ShopService {
    db_pool: Arc<DbPool>,
}

impl ShopService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn create_shop(
        &self,
        account_id: Uuid,
        name: &str,
        location: Option<&str>,
    ) -> Result<shop::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "shop name cannot be empty".into(),
            ));
        }

        let shop = shop::ActiveModel {
            account_id: Set(account_id),
            name: Set(name.to_string()),
            location: Set(location.map(str::to_string)),
            ..Default::default()
        }
        .insert(self.db_pool.as_ref())
        .await
        .map_err(ServiceError::db_error)?;

        info!(shop_id = %shop.id, "created shop");

        Ok(shop)
    }

    #[instrument(skip(self))]
    pub async fn get_shop(
        &self,
        account_id: Uuid,
        shop_id: Uuid,
    ) -> Result<shop::Model, ServiceError> {
        Shop::find_by_id(shop_id)
            .filter(shop::Column::AccountId.eq(account_id))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("shop {} not found", shop_id)))
    }

    #[instrument(skip(self))]
    pub async fn list_shops(&self, account_id: Uuid) -> Result<Vec<shop::Model>, ServiceError> {
        Shop::find()
            .filter(shop::Column::AccountId.eq(account_id))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}
