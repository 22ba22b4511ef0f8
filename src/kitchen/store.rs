//! # Kitchen Store
//!
//! Server-side home of the application state the UI renders: detected
//! ingredients, dietary filters, generated recipes, the cooking session and
//! the shopping list.
//!
//! ## Thread Safety:
//! One `parking_lot::RwLock` guards the whole state. Every mutation takes the
//! write lock, applies the change, collects the events to publish and
//! releases the lock before publishing.
//!
//! The store also serves as the voice core's view-state accessor
//! ([`ViewStateAccess`]), so voice commands and HTTP requests change the same
//! state and produce the same events.

use crate::error::{AppError, AppResult};
use crate::events::{EventBus, UiEvent};
use crate::kitchen::model::{
    DietaryRestriction, GeoPoint, Recipe, Review, ReviewOrder, ShoppingItem, StoreLocation, View,
};
use crate::voice::tools::{ViewAction, ViewSnapshot, ViewStateAccess};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KitchenState {
    pub view: View,
    pub ingredients: Vec<String>,
    pub restrictions: Vec<DietaryRestriction>,
    pub recipes: Vec<Recipe>,
    pub selected_recipe: Option<Recipe>,
    pub active_step: usize,
    pub shopping_list: Vec<ShoppingItem>,
    pub store_results: HashMap<String, Vec<StoreLocation>>,
    pub location: Option<GeoPoint>,
    /// Bumped whenever ingredients or restrictions change
    #[serde(skip)]
    pub recipe_inputs: u64,
}

/// Inputs for one recipe generation, tagged with the input generation they were read at.
#[derive(Debug, Clone)]
pub struct RecipeRequest {
    pub ingredients: Vec<String>,
    pub restrictions: Vec<DietaryRestriction>,
    pub generation: u64,
}

pub struct KitchenStore {
    state: RwLock<KitchenState>,
    events: EventBus,
}

/// 9-character lowercase base-36 id.
fn short_id() -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut value = Uuid::new_v4().as_u128();
    let mut id = String::with_capacity(9);
    for _ in 0..9 {
        id.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    id
}

/// Case-insensitive substring match in either direction.
fn names_overlap(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

fn missing_from(ingredients: &[String], name: &str) -> bool {
    ingredients.is_empty() || !ingredients.iter().any(|detected| names_overlap(detected, name))
}

fn already_listed(list: &[ShoppingItem], name: &str) -> bool {
    let needle = name.to_lowercase();
    list.iter().any(|item| item.name.to_lowercase().contains(&needle))
}

impl KitchenStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: RwLock::new(KitchenState::default()),
            events,
        }
    }

    fn publish_all(&self, events: Vec<UiEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    pub fn snapshot(&self) -> KitchenState {
        self.state.read().clone()
    }

    pub fn view(&self) -> View {
        self.state.read().view
    }

    pub fn ingredients(&self) -> Vec<String> {
        self.state.read().ingredients.clone()
    }

    pub fn restrictions(&self) -> Vec<DietaryRestriction> {
        self.state.read().restrictions.clone()
    }

    pub fn recipes(&self) -> Vec<Recipe> {
        self.state.read().recipes.clone()
    }

    pub fn recipe(&self, id: &str) -> Option<Recipe> {
        self.state.read().recipes.iter().find(|r| r.id == id).cloned()
    }

    pub fn location(&self) -> Option<GeoPoint> {
        self.state.read().location
    }

    pub fn shopping_list(&self) -> Vec<ShoppingItem> {
        self.state.read().shopping_list.clone()
    }

    /// Replace the detected ingredients and move to the recipes view.
    /// Previously generated recipes no longer apply and are cleared.
    pub fn set_ingredients(&self, ingredients: Vec<String>) {
        let ingredients: Vec<String> = ingredients
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        {
            let mut state = self.state.write();
            state.ingredients = ingredients.clone();
            state.recipes.clear();
            state.recipe_inputs += 1;
            state.view = View::Recipes;
        }
        info!(count = ingredients.len(), "Ingredients updated");
        self.publish_all(vec![
            UiEvent::IngredientsUpdated { ingredients },
            UiEvent::RecipesUpdated { count: 0 },
            UiEvent::ViewChanged { view: View::Recipes },
        ]);
    }

    /// Add or remove a restriction. Returns the new list.
    pub fn toggle_restriction(&self, restriction: DietaryRestriction) -> Vec<DietaryRestriction> {
        let restrictions = {
            let mut state = self.state.write();
            if let Some(pos) = state.restrictions.iter().position(|r| *r == restriction) {
                state.restrictions.remove(pos);
            } else {
                state.restrictions.push(restriction);
            }
            state.recipes.clear();
            state.recipe_inputs += 1;
            state.restrictions.clone()
        };
        debug!(%restriction, active = restrictions.len(), "Restriction toggled");
        self.publish_all(vec![
            UiEvent::RestrictionsUpdated {
                restrictions: restrictions.clone(),
            },
            UiEvent::RecipesUpdated { count: 0 },
        ]);
        restrictions
    }

    pub fn recipe_request(&self) -> RecipeRequest {
        let state = self.state.read();
        RecipeRequest {
            ingredients: state.ingredients.clone(),
            restrictions: state.restrictions.clone(),
            generation: state.recipe_inputs,
        }
    }

    /// Store recipes generated from `generation`'s inputs.
    ///
    /// Fails with `Conflict` if ingredients or restrictions changed since the
    /// request was taken; the current (cleared) recipe list is kept.
    pub fn store_generated_recipes(&self, generation: u64, recipes: Vec<Recipe>) -> AppResult<()> {
        let count = recipes.len();
        {
            let mut state = self.state.write();
            if state.recipe_inputs != generation {
                debug!(generation, current = state.recipe_inputs, "Discarding recipes for outdated inputs");
                return Err(AppError::Conflict(
                    "ingredients or restrictions changed while recipes were being generated".to_string(),
                ));
            }
            state.recipes = recipes;
        }
        info!(count, "Recipes updated");
        self.events.publish(UiEvent::RecipesUpdated { count });
        Ok(())
    }

    pub fn set_recipes(&self, recipes: Vec<Recipe>) {
        let count = recipes.len();
        self.state.write().recipes = recipes;
        info!(count, "Recipes updated");
        self.events.publish(UiEvent::RecipesUpdated { count });
    }

    /// Select a recipe, rewind to its first step and open the cooking view.
    pub fn start_cooking(&self, recipe_id: &str) -> AppResult<Recipe> {
        let recipe = {
            let mut state = self.state.write();
            let recipe = state
                .recipes
                .iter()
                .find(|r| r.id == recipe_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Recipe {} not found", recipe_id)))?;
            state.selected_recipe = Some(recipe.clone());
            state.active_step = 0;
            state.view = View::Cooking;
            recipe
        };
        info!(recipe_id, title = %recipe.title, "Cooking started");
        self.publish_all(vec![
            UiEvent::CookingStarted {
                recipe_id: recipe.id.clone(),
                title: recipe.title.clone(),
            },
            UiEvent::StepChanged {
                step: 0,
                instruction: recipe.instructions.first().cloned(),
            },
            UiEvent::ViewChanged { view: View::Cooking },
        ]);
        Ok(recipe)
    }

    pub fn navigate(&self, view: View) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.view != view;
            state.view = view;
            changed
        };
        if changed {
            debug!(%view, "View changed");
            self.events.publish(UiEvent::ViewChanged { view });
        }
    }

    /// Jump to step `step` of the selected recipe.
    ///
    /// ## Errors:
    /// - `ValidationError` with no recipe selected or when `step` is past the last instruction
    pub fn set_step(&self, step: usize) -> AppResult<String> {
        let instruction = {
            let mut state = self.state.write();
            let instruction = {
                let recipe = state
                    .selected_recipe
                    .as_ref()
                    .ok_or_else(|| AppError::ValidationError("No recipe is being cooked".to_string()))?;
                recipe.instructions.get(step).cloned().ok_or_else(|| {
                    AppError::ValidationError(format!(
                        "Step {} is out of range (recipe has {} steps)",
                        step,
                        recipe.instructions.len()
                    ))
                })?
            };
            state.active_step = step;
            instruction
        };
        self.events.publish(UiEvent::StepChanged {
            step,
            instruction: Some(instruction.clone()),
        });
        Ok(instruction)
    }

    pub fn finish_cooking(&self) {
        info!("Cooking finished");
        self.navigate(View::Recipes);
    }

    /// Instruction text at the active step, if a recipe is being cooked.
    pub fn current_instruction(&self) -> Option<String> {
        let state = self.state.read();
        state
            .selected_recipe
            .as_ref()
            .and_then(|recipe| recipe.instructions.get(state.active_step).cloned())
    }

    /// True when nothing was detected, or no detected ingredient overlaps `name`.
    pub fn is_ingredient_missing(&self, name: &str) -> bool {
        missing_from(&self.state.read().ingredients, name)
    }

    pub fn sorted_reviews(&self, recipe_id: &str, order: ReviewOrder) -> AppResult<Vec<Review>> {
        let mut reviews = self
            .recipe(recipe_id)
            .ok_or_else(|| AppError::NotFound(format!("Recipe {} not found", recipe_id)))?
            .reviews;
        match order {
            ReviewOrder::Highest => reviews.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
            ReviewOrder::Lowest => reviews.sort_by(|a, b| a.rating.total_cmp(&b.rating)),
        }
        Ok(reviews)
    }

    /// Add an item unless an existing entry already contains its name.
    /// Returns `None` when skipped.
    pub fn add_item(&self, name: &str) -> AppResult<Option<ShoppingItem>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError("Item name cannot be empty".to_string()));
        }
        let (item, items) = {
            let mut state = self.state.write();
            if already_listed(&state.shopping_list, name) {
                return Ok(None);
            }
            let item = ShoppingItem {
                id: short_id(),
                name: name.to_string(),
                purchased: false,
                store_location: None,
            };
            state.shopping_list.push(item.clone());
            (item, state.shopping_list.clone())
        };
        debug!(item_id = %item.id, name = %item.name, "Shopping item added");
        self.events.publish(UiEvent::ShoppingListUpdated { items });
        Ok(Some(item))
    }

    /// Add every ingredient of the recipe that is missing from the fridge and
    /// not already on the list, as `"{amount} {name}"`.
    pub fn add_missing_from_recipe(&self, recipe_id: &str) -> AppResult<Vec<ShoppingItem>> {
        let (added, items) = {
            let mut state = self.state.write();
            let recipe = state
                .recipes
                .iter()
                .chain(state.selected_recipe.iter())
                .find(|r| r.id == recipe_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Recipe {} not found", recipe_id)))?;

            let added: Vec<ShoppingItem> = recipe
                .ingredients
                .iter()
                .filter(|ing| missing_from(&state.ingredients, &ing.name))
                .filter(|ing| !already_listed(&state.shopping_list, &ing.name))
                .map(|ing| ShoppingItem {
                    id: short_id(),
                    name: format!("{} {}", ing.amount.as_deref().unwrap_or(""), ing.name)
                        .trim()
                        .to_string(),
                    purchased: false,
                    store_location: None,
                })
                .collect();
            state.shopping_list.extend(added.iter().cloned());
            (added, state.shopping_list.clone())
        };
        if !added.is_empty() {
            info!(recipe_id, added = added.len(), "Missing ingredients added to shopping list");
            self.events.publish(UiEvent::ShoppingListUpdated { items });
        }
        Ok(added)
    }

    pub fn toggle_purchased(&self, item_id: &str) -> AppResult<ShoppingItem> {
        let (item, items) = {
            let mut state = self.state.write();
            let item = state
                .shopping_list
                .iter_mut()
                .find(|item| item.id == item_id)
                .ok_or_else(|| AppError::NotFound(format!("Shopping item {} not found", item_id)))?;
            item.purchased = !item.purchased;
            let item = item.clone();
            (item, state.shopping_list.clone())
        };
        self.events.publish(UiEvent::ShoppingListUpdated { items });
        Ok(item)
    }

    pub fn remove_item(&self, item_id: &str) -> AppResult<()> {
        let items = {
            let mut state = self.state.write();
            let before = state.shopping_list.len();
            state.shopping_list.retain(|item| item.id != item_id);
            if state.shopping_list.len() == before {
                return Err(AppError::NotFound(format!("Shopping item {} not found", item_id)));
            }
            state.shopping_list.clone()
        };
        self.events.publish(UiEvent::ShoppingListUpdated { items });
        Ok(())
    }

    pub fn item(&self, item_id: &str) -> AppResult<ShoppingItem> {
        self.state
            .read()
            .shopping_list
            .iter()
            .find(|item| item.id == item_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Shopping item {} not found", item_id)))
    }

    /// Remember store lookup results for an item name.
    pub fn record_stores(&self, item: &str, stores: Vec<StoreLocation>) {
        self.state
            .write()
            .store_results
            .insert(item.to_string(), stores.clone());
        self.events.publish(UiEvent::StoresFound {
            item: item.to_string(),
            stores,
        });
    }

    /// Set or clear the user's location. A missing location only means store
    /// lookups are not geo-biased.
    pub fn set_location(&self, location: Option<GeoPoint>) {
        self.state.write().location = location;
        self.events.publish(UiEvent::LocationUpdated { location });
    }
}

impl ViewStateAccess for KitchenStore {
    fn snapshot(&self) -> ViewSnapshot {
        let state = self.state.read();
        ViewSnapshot {
            view: state.view,
            recipe: state.selected_recipe.clone(),
            step: state.active_step,
        }
    }

    fn dispatch(&self, action: ViewAction) -> AppResult<()> {
        match action {
            ViewAction::Navigate(view) => self.navigate(view),
            ViewAction::SetStep(step) => {
                self.set_step(step)?;
            }
            ViewAction::FinishCooking => self.finish_cooking(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kitchen::model::{Ingredient, NutritionalFacts};
    use crate::voice::tools::{CookingAction, ToolBridge, NOT_POSSIBLE};
    use std::sync::Arc;

    fn recipe(id: &str, steps: usize) -> Recipe {
        Recipe {
            id: id.to_string(),
            title: format!("Recipe {}", id),
            description: String::new(),
            ingredients: vec![
                Ingredient {
                    name: "Eggs".to_string(),
                    category: "Dairy".to_string(),
                    amount: Some("2".to_string()),
                },
                Ingredient {
                    name: "Spinach".to_string(),
                    category: "Produce".to_string(),
                    amount: None,
                },
                Ingredient {
                    name: "Feta".to_string(),
                    category: "Dairy".to_string(),
                    amount: Some("50g".to_string()),
                },
            ],
            instructions: (1..=steps).map(|i| format!("Do thing {}", i)).collect(),
            difficulty: "Easy".to_string(),
            prep_time: "15 min".to_string(),
            calories: 320.0,
            dietary_info: vec!["Vegetarian".to_string()],
            image_prompt: String::new(),
            nutritional_facts: NutritionalFacts::default(),
            reviews: vec![
                Review { user: "a".into(), rating: 3.0, comment: "ok".into() },
                Review { user: "b".into(), rating: 5.0, comment: "great".into() },
                Review { user: "c".into(), rating: 1.0, comment: "bad".into() },
            ],
        }
    }

    fn store() -> KitchenStore {
        KitchenStore::new(EventBus::new(64))
    }

    #[test]
    fn test_recipes_for_outdated_inputs_are_discarded() {
        let store = store();
        store.set_ingredients(vec!["eggs".to_string()]);

        let request = store.recipe_request();
        assert_eq!(request.ingredients, vec!["eggs".to_string()]);
        store.set_ingredients(vec!["rice".to_string()]);
        let err = store.store_generated_recipes(request.generation, vec![recipe("r1", 3)]).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(store.recipes().is_empty());

        let request = store.recipe_request();
        store.toggle_restriction(DietaryRestriction::Vegan);
        assert!(store.store_generated_recipes(request.generation, vec![recipe("r1", 3)]).is_err());

        let request = store.recipe_request();
        store.store_generated_recipes(request.generation, vec![recipe("r1", 3)]).unwrap();
        assert_eq!(store.recipes().len(), 1);
    }

    #[test]
    fn test_set_ingredients_moves_to_recipes() {
        let store = store();
        store.set_recipes(vec![recipe("r1", 3)]);
        store.set_ingredients(vec![" eggs ".into(), "".into(), "milk".into()]);
        let state = store.snapshot();
        assert_eq!(state.view, View::Recipes);
        assert_eq!(state.ingredients, vec!["eggs", "milk"]);
        assert!(state.recipes.is_empty());
    }

    #[test]
    fn test_toggle_restriction_clears_recipes() {
        let store = store();
        store.set_recipes(vec![recipe("r1", 3)]);
        assert_eq!(store.toggle_restriction(DietaryRestriction::Vegan), vec![DietaryRestriction::Vegan]);
        assert!(store.recipes().is_empty());
        assert!(store.toggle_restriction(DietaryRestriction::Vegan).is_empty());
    }

    #[test]
    fn test_start_cooking_and_step_bounds() {
        let store = store();
        store.set_recipes(vec![recipe("r1", 5)]);
        assert!(matches!(store.start_cooking("nope"), Err(AppError::NotFound(_))));

        store.start_cooking("r1").unwrap();
        assert_eq!(store.view(), View::Cooking);
        assert_eq!(store.set_step(4).unwrap(), "Do thing 5");
        assert!(store.set_step(5).is_err());
        assert_eq!(store.current_instruction().as_deref(), Some("Do thing 5"));
    }

    #[test]
    fn test_voice_bridge_drives_store() {
        let store = Arc::new(store());
        store.set_recipes(vec![recipe("r1", 5)]);
        store.start_cooking("r1").unwrap();
        let bridge = ToolBridge::new(store.clone());

        assert_eq!(bridge.cooking_control(CookingAction::Previous), NOT_POSSIBLE);
        assert_eq!(bridge.cooking_control(CookingAction::Next), "Moving to next step: Do thing 2");
        assert_eq!(ViewStateAccess::snapshot(store.as_ref()).step, 1);

        bridge.navigate_to(View::Shopping);
        assert_eq!(store.view(), View::Shopping);
        assert_eq!(ViewStateAccess::snapshot(store.as_ref()).step, 1);
    }

    #[test]
    fn test_ingredient_matching() {
        let store = store();
        assert!(store.is_ingredient_missing("eggs"));
        store.set_ingredients(vec!["Large Eggs".into(), "milk".into()]);
        assert!(!store.is_ingredient_missing("eggs"));
        assert!(!store.is_ingredient_missing("Whole Milk"));
        assert!(store.is_ingredient_missing("Spinach"));
    }

    #[test]
    fn test_sorted_reviews() {
        let store = store();
        store.set_recipes(vec![recipe("r1", 1)]);
        let highest: Vec<f64> = store.sorted_reviews("r1", ReviewOrder::Highest).unwrap().iter().map(|r| r.rating).collect();
        assert_eq!(highest, vec![5.0, 3.0, 1.0]);
        let lowest: Vec<f64> = store.sorted_reviews("r1", ReviewOrder::Lowest).unwrap().iter().map(|r| r.rating).collect();
        assert_eq!(lowest, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_shopping_list_dedup_and_missing() {
        let store = store();
        store.set_ingredients(vec!["eggs".into()]);
        store.set_recipes(vec![recipe("r1", 2)]);

        let added = store.add_item("2 Spinach bunches").unwrap();
        assert!(added.is_some());
        assert_eq!(added.unwrap().id.len(), 9);
        assert!(store.add_item("spinach").unwrap().is_none());

        let added = store.add_missing_from_recipe("r1").unwrap();
        let names: Vec<String> = added.into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["50g Feta"]);
        assert_eq!(store.shopping_list().len(), 2);
    }

    #[test]
    fn test_toggle_and_remove_items() {
        let store = store();
        let item = store.add_item("Bread").unwrap().unwrap();
        assert!(store.toggle_purchased(&item.id).unwrap().purchased);
        assert!(!store.toggle_purchased(&item.id).unwrap().purchased);
        store.remove_item(&item.id).unwrap();
        assert!(matches!(store.remove_item(&item.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_events_are_published() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let store = KitchenStore::new(bus);
        store.navigate(View::Shopping);
        store.record_stores("milk", vec![]);
        assert_eq!(rx.try_recv().unwrap(), UiEvent::ViewChanged { view: View::Shopping });
        assert!(matches!(rx.try_recv().unwrap(), UiEvent::StoresFound { item, .. } if item == "milk"));
    }
}
