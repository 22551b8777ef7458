use sqlx::Row;

use mitsumori_core::domain::estimate::TaxCategory;
use mitsumori_core::domain::product::{next_category_code, Category, CategoryId, Product, ProductId};

use super::{conflict_on_unique, decode_error, ProductRepository, RepositoryError};
use crate::DbPool;

const PRODUCT_COLUMNS: &str = "id, sku, name, unit_price, cost, unit, tax_category, category_id,
    business_division, is_active";

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let tax_category: String = row.try_get("tax_category").map_err(decode_error)?;
    let category_id: Option<i64> = row.try_get("category_id").map_err(decode_error)?;

    Ok(Product {
        id: ProductId(row.try_get("id").map_err(decode_error)?),
        sku: row.try_get("sku").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        unit_price: row.try_get("unit_price").map_err(decode_error)?,
        cost: row.try_get("cost").map_err(decode_error)?,
        unit: row.try_get("unit").map_err(decode_error)?,
        tax_category: TaxCategory::parse_lenient(&tax_category),
        category_id: category_id.map(CategoryId),
        business_division: row.try_get("business_division").map_err(decode_error)?,
        is_active: row.try_get("is_active").map_err(decode_error)?,
    })
}

fn row_to_category(row: &sqlx::sqlite::SqliteRow) -> Result<Category, RepositoryError> {
    Ok(Category {
        id: CategoryId(row.try_get("id").map_err(decode_error)?),
        code: row.try_get("code").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        business_division: row.try_get("business_division").map_err(decode_error)?,
    })
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn list_products(&self, include_inactive: bool) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM product WHERE (?1 = 1 OR is_active = 1) ORDER BY sku"
        ))
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_product).collect()
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE sku = ?"))
            .bind(sku.trim())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn insert_product(&self, product: Product) -> Result<Product, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO product (sku, name, unit_price, cost, unit, tax_category, category_id,
                business_division, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.unit_price)
        .bind(product.cost)
        .bind(&product.unit)
        .bind(product.tax_category.as_str())
        .bind(product.category_id.map(|id| id.0))
        .bind(&product.business_division)
        .bind(product.is_active)
        .execute(&self.pool)
        .await
        .map_err(|error| conflict_on_unique(error, "product", product.sku.clone()))?;

        Ok(Product { id: ProductId(result.last_insert_rowid()), ..product })
    }

    async fn update_product(&self, product: &Product) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE product SET sku = ?, name = ?, unit_price = ?, cost = ?, unit = ?,
                tax_category = ?, category_id = ?, business_division = ?, is_active = ?
             WHERE id = ?",
        )
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.unit_price)
        .bind(product.cost)
        .bind(&product.unit)
        .bind(product.tax_category.as_str())
        .bind(product.category_id.map(|id| id.0))
        .bind(&product.business_division)
        .bind(product.is_active)
        .bind(product.id.0)
        .execute(&self.pool)
        .await
        .map_err(|error| conflict_on_unique(error, "product", product.sku.clone()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "product", id: product.id.0.to_string() });
        }
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError> {
        let rows = sqlx::query("SELECT id, code, name, business_division FROM category ORDER BY code")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_category).collect()
    }

    async fn create_category(
        &self,
        name: &str,
        business_division: Option<&str>,
    ) -> Result<Category, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let codes: Vec<String> = sqlx::query("SELECT code FROM category")
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("code").map_err(decode_error))
            .collect::<Result<_, _>>()?;
        let code = next_category_code(codes.iter().map(String::as_str));

        let result = sqlx::query("INSERT INTO category (code, name, business_division) VALUES (?, ?, ?)")
            .bind(&code)
            .bind(name.trim())
            .bind(business_division)
            .execute(&mut *tx)
            .await
            .map_err(|error| conflict_on_unique(error, "category", code.clone()))?;

        tx.commit().await?;

        Ok(Category {
            id: CategoryId(result.last_insert_rowid()),
            code,
            name: name.trim().to_string(),
            business_division: business_division.map(str::to_string),
        })
    }
}
