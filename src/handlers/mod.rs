pub mod config;
pub mod kitchen;
pub mod shopping;
pub mod voice;

pub use config::*;

use crate::health;
use actix_web::web;

/// Every `/api/v1` route. Shared by `main` and the handler tests.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .route("/metrics", web::get().to(health::detailed_metrics))
        .route("/config", web::get().to(get_config))
        .route("/config", web::put().to(update_config))
        // Kitchen
        .route("/kitchen", web::get().to(kitchen::get_kitchen))
        .route("/kitchen/view", web::post().to(kitchen::set_view))
        .route("/scan", web::post().to(kitchen::scan_fridge))
        .route("/ingredients", web::put().to(kitchen::set_ingredients))
        .route("/restrictions/{restriction}/toggle", web::post().to(kitchen::toggle_restriction))
        .route("/recipes", web::get().to(kitchen::list_recipes))
        .route("/recipes/generate", web::post().to(kitchen::generate_recipes))
        .route("/recipes/{id}", web::get().to(kitchen::get_recipe))
        .route("/recipes/{id}/reviews", web::get().to(kitchen::get_reviews))
        .route("/recipes/{id}/cook", web::post().to(kitchen::start_cooking))
        .route("/cooking/step", web::post().to(kitchen::cooking_step))
        .route("/cooking/speak", web::post().to(kitchen::speak_step))
        .route("/location", web::put().to(kitchen::set_location))
        .route("/location", web::delete().to(kitchen::clear_location))
        // Shopping
        .route("/shopping", web::get().to(shopping::list_items))
        .route("/shopping", web::post().to(shopping::add_item))
        .route("/shopping/from-recipe/{id}", web::post().to(shopping::add_from_recipe))
        .route("/shopping/{id}/toggle", web::post().to(shopping::toggle_item))
        .route("/shopping/{id}/stores", web::post().to(shopping::find_stores))
        .route("/shopping/{id}", web::delete().to(shopping::remove_item))
        // Voice
        .route("/voice/start", web::post().to(voice::start_voice))
        .route("/voice/stop", web::post().to(voice::stop_voice))
        .route("/voice/status", web::get().to(voice::voice_status));
}
