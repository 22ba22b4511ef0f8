//! Shopping list endpoints.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub name: String,
}

pub async fn list_items(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "items": state.kitchen.shopping_list() }))
}

/// `201` with the new item, or `200` with `added: false` when an existing
/// entry already covers the name.
pub async fn add_item(state: web::Data<AppState>, body: web::Json<AddItemRequest>) -> AppResult<HttpResponse> {
    Ok(match state.kitchen.add_item(&body.name)? {
        Some(item) => HttpResponse::Created().json(json!({ "added": true, "item": item })),
        None => HttpResponse::Ok().json(json!({ "added": false, "items": state.kitchen.shopping_list() })),
    })
}

pub async fn add_from_recipe(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let added = state.kitchen.add_missing_from_recipe(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(json!({
        "added": added,
        "items": state.kitchen.shopping_list()
    })))
}

pub async fn toggle_item(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let item = state.kitchen.toggle_purchased(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(item))
}

pub async fn remove_item(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    state.kitchen.remove_item(&path.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

/// Look up nearby stores for an item, biased to the stored location if any.
///
/// A failed lookup shows up as no stores. A missing API key is still an error.
pub async fn find_stores(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let item = state.kitchen.item(&path.into_inner())?;
    let stores = match state
        .gemini
        .find_nearby_stores(&item.name, state.kitchen.location())
        .await
    {
        Ok(stores) => stores,
        Err(AppError::Upstream(reason)) => {
            warn!(item = %item.name, %reason, "Store lookup failed, showing no stores");
            Vec::new()
        }
        Err(other) => return Err(other),
    };
    state.kitchen.record_stores(&item.name, stores.clone());
    Ok(HttpResponse::Ok().json(json!({ "item": item.name, "stores": stores })))
}
