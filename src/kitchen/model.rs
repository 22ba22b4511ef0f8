//! Domain records shared by the kitchen store, the remote collaborators and
//! the HTTP layer. Field names serialize in camelCase, matching what the
//! recipe generator returns and what the UI consumes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which screen the UI is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Scan,
    Recipes,
    Cooking,
    Shopping,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            View::Scan => "scan",
            View::Recipes => "recipes",
            View::Cooking => "cooking",
            View::Shopping => "shopping",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(View::Scan),
            "recipes" => Ok(View::Recipes),
            "cooking" => Ok(View::Cooking),
            "shopping" => Ok(View::Shopping),
            other => Err(format!("unknown view '{}'", other)),
        }
    }
}

/// Dietary filters offered to the recipe generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DietaryRestriction {
    Vegetarian,
    Vegan,
    Keto,
    Paleo,
    #[serde(rename = "Gluten-Free")]
    GlutenFree,
    #[serde(rename = "Dairy-Free")]
    DairyFree,
}

impl DietaryRestriction {
    pub const ALL: [DietaryRestriction; 6] = [
        DietaryRestriction::Vegetarian,
        DietaryRestriction::Vegan,
        DietaryRestriction::Keto,
        DietaryRestriction::Paleo,
        DietaryRestriction::GlutenFree,
        DietaryRestriction::DairyFree,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DietaryRestriction::Vegetarian => "Vegetarian",
            DietaryRestriction::Vegan => "Vegan",
            DietaryRestriction::Keto => "Keto",
            DietaryRestriction::Paleo => "Paleo",
            DietaryRestriction::GlutenFree => "Gluten-Free",
            DietaryRestriction::DairyFree => "Dairy-Free",
        }
    }
}

impl fmt::Display for DietaryRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accepts the display label in any case, with `-`, `_` or nothing between words.
impl FromStr for DietaryRestriction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        DietaryRestriction::ALL
            .into_iter()
            .find(|r| r.label().replace('-', "").to_ascii_lowercase() == normalized)
            .ok_or_else(|| format!("unknown dietary restriction '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub user: String,
    pub rating: f64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NutritionalFacts {
    #[serde(default)]
    pub protein: String,
    #[serde(default)]
    pub carbs: String,
    #[serde(default)]
    pub fat: String,
    #[serde(default)]
    pub fiber: String,
}

/// A generated recipe.
///
/// `difficulty` and `dietary_info` stay free-form strings: the generator is
/// asked for `Easy|Medium|Hard` and the restriction labels, but one odd value
/// must not throw away the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub prep_time: String,
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub dietary_info: Vec<String>,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub nutritional_facts: NutritionalFacts,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
    pub id: String,
    pub name: String,
    pub purchased: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLocation {
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOrder {
    #[default]
    Highest,
    Lowest,
}
