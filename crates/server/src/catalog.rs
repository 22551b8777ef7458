use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use mitsumori_core::{Category, CategoryId, Product, ProductId, TaxCategory};
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::context::RequestContext;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct ProductListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProductPayload {
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit_price: i64,
    #[serde(default)]
    pub cost: i64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub tax_category: TaxCategory,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub business_division: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl ProductPayload {
    fn into_product(self, id: ProductId) -> Result<Product, ApiError> {
        let sku = self.sku.trim().to_string();
        if sku.is_empty() {
            return Err(ApiError::invalid("sku", "sku is required"));
        }
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::invalid("name", "name is required"));
        }
        if self.unit_price < 0 {
            return Err(ApiError::invalid("unit_price", "unit_price must not be negative"));
        }
        if self.cost < 0 {
            return Err(ApiError::invalid("cost", "cost must not be negative"));
        }

        Ok(Product {
            id,
            sku,
            name,
            unit_price: self.unit_price,
            cost: self.cost,
            unit: self.unit.trim().to_string(),
            tax_category: self.tax_category,
            category_id: self.category_id.map(CategoryId),
            business_division: self
                .business_division
                .map(|division| division.trim().to_string())
                .filter(|division| !division.is_empty()),
            is_active: self.is_active,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CategoryPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub business_division: Option<String>,
}

/// Categories the product claims must exist.
async fn ensure_category(state: &AppState, product: &Product) -> Result<(), ApiError> {
    let Some(category_id) = product.category_id else {
        return Ok(());
    };
    let categories = state.products.list_categories().await?;
    if categories.iter().any(|category| category.id == category_id) {
        Ok(())
    } else {
        Err(ApiError::invalid("category_id", format!("category `{}` does not exist", category_id.0)))
    }
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.products.list_products(query.include_inactive).await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, ApiError> {
    state
        .products
        .find_product(ProductId(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("product `{id}` not found")))
}

pub async fn create_product(
    State(state): State<AppState>,
    context: RequestContext,
    Json(payload): Json<ProductPayload>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = payload.into_product(ProductId(0))?;
    ensure_category(&state, &product).await?;
    if state.products.find_by_sku(&product.sku).await?.is_some() {
        return Err(ApiError::conflict(format!("sku `{}` is already registered", product.sku))
            .with_correlation_id(&context.correlation_id));
    }

    let stored = state.products.insert_product(product).await?;
    info!(
        event_name = "catalog.product.created",
        correlation_id = %context.correlation_id,
        product_id = stored.id.0,
        sku = %stored.sku,
        "product created"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn update_product(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<i64>,
    Json(payload): Json<ProductPayload>,
) -> Result<Json<Product>, ApiError> {
    if state.products.find_product(ProductId(id)).await?.is_none() {
        return Err(ApiError::not_found(format!("product `{id}` not found")));
    }
    let product = payload.into_product(ProductId(id))?;
    ensure_category(&state, &product).await?;

    state
        .products
        .update_product(&product)
        .await
        .map_err(|error| ApiError::from(error).with_correlation_id(&context.correlation_id))?;
    info!(
        event_name = "catalog.product.updated",
        correlation_id = %context.correlation_id,
        product_id = id,
        "product updated"
    );
    Ok(Json(product))
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.products.list_categories().await?))
}

pub async fn create_category(
    State(state): State<AppState>,
    context: RequestContext,
    Json(payload): Json<CategoryPayload>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::invalid("name", "name is required"));
    }
    let division =
        payload.business_division.as_deref().map(str::trim).filter(|division| !division.is_empty());

    let category = state.products.create_category(name, division).await?;
    info!(
        event_name = "catalog.category.created",
        correlation_id = %context.correlation_id,
        category_code = %category.code,
        "category created"
    );
    Ok((StatusCode::CREATED, Json(category)))
}
