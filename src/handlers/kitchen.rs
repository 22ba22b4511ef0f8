//! # Kitchen Endpoints
//!
//! Scanning, recipes and the cooking session.
//!
//! ## Available Endpoints:
//! - `GET /kitchen` - full kitchen state
//! - `POST /kitchen/view` - switch view
//! - `POST /scan` - upload a fridge photo (multipart field `image`)
//! - `PUT /ingredients` - replace the detected ingredients
//! - `POST /restrictions/{restriction}/toggle` - add/remove a dietary filter
//! - `GET /recipes`, `POST /recipes/generate`, `GET /recipes/{id}`
//! - `GET /recipes/{id}/reviews?order=highest|lowest`
//! - `POST /recipes/{id}/cook`, `POST /cooking/step`, `POST /cooking/speak`
//! - `PUT /location`, `DELETE /location`

use crate::error::{AppError, AppResult};
use crate::kitchen::model::{DietaryRestriction, GeoPoint, ReviewOrder, View};
use crate::state::AppState;
use crate::voice::tools::{CookingAction, ToolBridge};
use actix_web::{web, HttpResponse};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct ViewRequest {
    pub view: View,
}

#[derive(Debug, Deserialize)]
pub struct IngredientsRequest {
    pub ingredients: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewsQuery {
    #[serde(default)]
    pub order: ReviewOrder,
}

#[derive(Debug, Deserialize)]
pub struct CookingStepRequest {
    pub action: CookingAction,
}

pub async fn get_kitchen(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.kitchen.snapshot())
}

/// Cooking can only be entered through `POST /recipes/{id}/cook`.
pub async fn set_view(state: web::Data<AppState>, body: web::Json<ViewRequest>) -> AppResult<HttpResponse> {
    let view = body.into_inner().view;
    if view == View::Cooking && state.kitchen.current_instruction().is_none() {
        return Err(AppError::ValidationError(
            "Select a recipe to start cooking first".to_string(),
        ));
    }
    state.kitchen.navigate(view);
    Ok(HttpResponse::Ok().json(json!({ "view": view })))
}

/// Analyze an uploaded fridge photo and move on to recipes.
///
/// ## Request:
/// Multipart form data with the JPEG in a field named `image`.
pub async fn scan_fridge(
    state: web::Data<AppState>,
    mut payload: actix_multipart::Multipart,
) -> AppResult<HttpResponse> {
    use actix_multipart::Field;
    use futures_util::stream::StreamExt;

    let max_bytes = state.get_config().performance.max_upload_bytes;
    let mut image: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field = item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;
        if field.name() != Some("image") {
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::ValidationError(format!(
                    "Image too large (max: {} bytes)",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        image = Some(bytes);
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::ValidationError("No image provided".to_string()))?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&image);
    let ingredients = state.gemini.analyze_fridge_image(&encoded).await?;
    info!(bytes = image.len(), detected = ingredients.len(), "Fridge photo analyzed");
    state.kitchen.set_ingredients(ingredients);

    Ok(HttpResponse::Ok().json(json!({
        "ingredients": state.kitchen.ingredients(),
        "view": state.kitchen.view()
    })))
}

pub async fn set_ingredients(
    state: web::Data<AppState>,
    body: web::Json<IngredientsRequest>,
) -> AppResult<HttpResponse> {
    state.kitchen.set_ingredients(body.into_inner().ingredients);
    Ok(HttpResponse::Ok().json(json!({ "ingredients": state.kitchen.ingredients() })))
}

pub async fn toggle_restriction(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let restriction: DietaryRestriction = path.into_inner().parse().map_err(AppError::ValidationError)?;
    let restrictions = state.kitchen.toggle_restriction(restriction);
    Ok(HttpResponse::Ok().json(json!({ "restrictions": restrictions })))
}

pub async fn list_recipes(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "recipes": state.kitchen.recipes() }))
}

/// Regenerate recipes from the current ingredients and restrictions.
///
/// `409` if the ingredients or restrictions change before the recipes arrive.
pub async fn generate_recipes(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let request = state.kitchen.recipe_request();
    let recipes = state
        .gemini
        .generate_recipes(&request.ingredients, &request.restrictions)
        .await?;
    state.kitchen.store_generated_recipes(request.generation, recipes.clone())?;
    Ok(HttpResponse::Ok().json(json!({ "recipes": recipes })))
}

/// One recipe, with each ingredient flagged as available or missing.
pub async fn get_recipe(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let recipe_id = path.into_inner();
    let recipe = state
        .kitchen
        .recipe(&recipe_id)
        .ok_or_else(|| AppError::NotFound(format!("Recipe {} not found", recipe_id)))?;
    let availability: Vec<_> = recipe
        .ingredients
        .iter()
        .map(|ing| json!({ "name": ing.name, "missing": state.kitchen.is_ingredient_missing(&ing.name) }))
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "recipe": recipe, "availability": availability })))
}

pub async fn get_reviews(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ReviewsQuery>,
) -> AppResult<HttpResponse> {
    let reviews = state.kitchen.sorted_reviews(&path.into_inner(), query.order)?;
    Ok(HttpResponse::Ok().json(json!({ "order": query.order, "reviews": reviews })))
}

pub async fn start_cooking(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let recipe = state.kitchen.start_cooking(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(json!({
        "recipe_id": recipe.id,
        "step": 0,
        "instruction": recipe.instructions.first()
    })))
}

/// Same step rules and replies as the voice `cookingControl` command.
pub async fn cooking_step(
    state: web::Data<AppState>,
    body: web::Json<CookingStepRequest>,
) -> AppResult<HttpResponse> {
    let bridge = ToolBridge::new(state.kitchen.clone());
    let message = bridge.cooking_control(body.action);
    let snapshot = state.kitchen.snapshot();
    Ok(HttpResponse::Ok().json(json!({
        "action": body.action,
        "result": message,
        "view": snapshot.view,
        "step": snapshot.active_step
    })))
}

/// Read the current step aloud. Returns the synthesized audio.
pub async fn speak_step(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let snapshot = state.kitchen.snapshot();
    let instruction = state
        .kitchen
        .current_instruction()
        .ok_or_else(|| AppError::ValidationError("No recipe is being cooked".to_string()))?;
    let text = format!("Step {}: {}", snapshot.active_step + 1, instruction);

    let audio = state.gemini.speak(&text).await?;
    if audio.is_none() {
        warn!("No speech returned for cooking step");
    }
    Ok(HttpResponse::Ok().json(json!({ "text": text, "audio": audio })))
}

pub async fn set_location(state: web::Data<AppState>, body: web::Json<GeoPoint>) -> AppResult<HttpResponse> {
    let point = body.into_inner();
    if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::ValidationError(format!(
            "Invalid coordinates {}, {}",
            point.lat, point.lng
        )));
    }
    state.kitchen.set_location(Some(point));
    Ok(HttpResponse::Ok().json(json!({ "location": point })))
}

pub async fn clear_location(state: web::Data<AppState>) -> HttpResponse {
    state.kitchen.set_location(None);
    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure_api;
    use crate::kitchen::model::{Ingredient, Recipe, Review};
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::Value;

    fn recipe(id: &str) -> Recipe {
        Recipe {
            id: id.to_string(),
            title: "Shakshuka".to_string(),
            description: String::new(),
            ingredients: vec![
                Ingredient {
                    name: "Eggs".to_string(),
                    category: "Dairy".to_string(),
                    amount: Some("4".to_string()),
                },
                Ingredient {
                    name: "Cumin".to_string(),
                    category: "Spice".to_string(),
                    amount: None,
                },
            ],
            instructions: vec!["Heat oil".to_string(), "Add tomatoes".to_string(), "Crack eggs".to_string()],
            difficulty: "Easy".to_string(),
            prep_time: "25 min".to_string(),
            calories: 350.0,
            dietary_info: vec!["Vegetarian".to_string()],
            image_prompt: String::new(),
            nutritional_facts: Default::default(),
            reviews: vec![
                Review { user: "a".to_string(), rating: 3.0, comment: "ok".to_string() },
                Review { user: "b".to_string(), rating: 5.0, comment: "great".to_string() },
            ],
        }
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .service(web::scope("/api/v1").configure(configure_api)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_cooking_flow_over_http() {
        let (state, _backend) = test_state();
        state.kitchen.set_ingredients(vec!["eggs".to_string()]);
        state.kitchen.set_recipes(vec![recipe("r1")]);
        let app = app!(state);

        let req = test::TestRequest::post().uri("/api/v1/recipes/r1/cook").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["instruction"], "Heat oil");

        let req = test::TestRequest::post()
            .uri("/api/v1/cooking/step")
            .set_json(json!({"action": "next"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["result"], "Moving to next step: Add tomatoes");
        assert_eq!(body["step"], 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/cooking/step")
            .set_json(json!({"action": "finish"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["view"], "recipes");
    }

    #[actix_web::test]
    async fn test_unknown_recipe_is_not_found() {
        let (state, _backend) = test_state();
        let app = app!(state);
        let req = test::TestRequest::post().uri("/api/v1/recipes/nope/cook").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_reviews_and_availability() {
        let (state, _backend) = test_state();
        state.kitchen.set_ingredients(vec!["eggs".to_string()]);
        state.kitchen.set_recipes(vec![recipe("r1")]);
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/v1/recipes/r1/reviews?order=lowest").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["reviews"][0]["rating"], 3.0);

        let req = test::TestRequest::get().uri("/api/v1/recipes/r1").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["availability"][0]["missing"], false);
        assert_eq!(body["availability"][1]["missing"], true);
    }

    #[actix_web::test]
    async fn test_view_and_restrictions() {
        let (state, _backend) = test_state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/kitchen/view")
            .set_json(json!({"view": "cooking"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/kitchen/view")
            .set_json(json!({"view": "shopping"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(state.kitchen.view(), View::Shopping);

        let req = test::TestRequest::post()
            .uri("/api/v1/restrictions/gluten-free/toggle")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["restrictions"], json!(["Gluten-Free"]));

        let req = test::TestRequest::post().uri("/api/v1/restrictions/carnivore/toggle").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_generate_without_ingredients_is_empty() {
        let (state, _backend) = test_state();
        let app = app!(state);
        let req = test::TestRequest::post().uri("/api/v1/recipes/generate").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["recipes"], json!([]));
    }

    #[actix_web::test]
    async fn test_location_validation() {
        let (state, _backend) = test_state();
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/v1/location")
            .set_json(json!({"lat": 120.0, "lng": 0.0}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::put()
            .uri("/api/v1/location")
            .set_json(json!({"lat": 52.5, "lng": 13.4}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(state.kitchen.location(), Some(GeoPoint { lat: 52.5, lng: 13.4 }));

        let req = test::TestRequest::delete().uri("/api/v1/location").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.kitchen.location(), None);
    }

    #[actix_web::test]
    async fn test_speak_requires_cooking() {
        let (state, _backend) = test_state();
        let app = app!(state);
        let req = test::TestRequest::post().uri("/api/v1/cooking/speak").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
