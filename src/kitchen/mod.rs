//! # Kitchen Domain
//!
//! Recipes, ingredients, the cooking session and the shopping list.
//!
//! - **model**: serde records (recipes, reviews, shopping items, views)
//! - **store**: the shared, event-publishing application state

pub mod model;
pub mod store;

pub use store::KitchenStore;
