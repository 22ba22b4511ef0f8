//! # Generative Language REST Client
//!
//! One `generateContent` call per operation:
//!
//! | operation              | model            | response handling                    |
//! |------------------------|------------------|--------------------------------------|
//! | `analyze_fridge_image` | `vision_model`   | comma-split text                     |
//! | `generate_recipes`     | `recipe_model`   | JSON array under a response schema   |
//! | `find_nearby_stores`   | `maps_model`     | maps grounding chunks, at most three |
//! | `speak`                | `tts_model`      | inline base64 PCM16 at 24 kHz        |
//!
//! Response parsing lives in free functions so it can be tested without a
//! network.

use crate::config::GeminiConfig;
use crate::error::{AppError, AppResult, VoiceError};
use crate::kitchen::model::{DietaryRestriction, GeoPoint, Recipe, StoreLocation};
use anyhow::{anyhow, Context};
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const FRIDGE_PROMPT: &str = "List every visible food ingredient in this fridge photo as a simple \
comma-separated list. Be thorough but only list real food items.";

/// Maximum number of stores returned for one item.
pub const MAX_STORES: usize = 3;

/// Sample rate of the speech payload returned by `speak`.
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

/// Synthesized speech as returned by the TTS model.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechAudio {
    /// base64 PCM16 mono
    pub data: String,
    pub sample_rate: u32,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: Arc<RwLock<GeminiConfig>>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("culinary-voice-backend/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// Swap in new settings (API key, models). The request timeout is fixed
    /// at construction.
    pub fn update_config(&self, config: GeminiConfig) {
        *self.config.write() = config;
    }

    pub fn has_api_key(&self) -> bool {
        !self.config.read().api_key.trim().is_empty()
    }

    /// List the food items visible in a fridge photo.
    #[instrument(skip(self, image_base64), fields(image_len = image_base64.len()))]
    pub async fn analyze_fridge_image(&self, image_base64: &str) -> AppResult<Vec<String>> {
        let model = self.config.read().vision_model.clone();
        let body = json!({
            "contents": [{
                "parts": [
                    { "inlineData": { "data": image_base64, "mimeType": "image/jpeg" } },
                    { "text": FRIDGE_PROMPT }
                ]
            }]
        });
        let response = self.generate_content(&model, &body).await?;
        let ingredients = parse_ingredient_list(&response_text(&response));
        info!(count = ingredients.len(), "Ingredients detected");
        Ok(ingredients)
    }

    /// Ask for five recipes that use the detected ingredients.
    ///
    /// Returns an empty list without calling out when there are no
    /// ingredients. A malformed response is logged and also yields an empty
    /// list.
    #[instrument(skip(self, ingredients), fields(ingredients = ingredients.len()))]
    pub async fn generate_recipes(
        &self,
        ingredients: &[String],
        restrictions: &[DietaryRestriction],
    ) -> AppResult<Vec<Recipe>> {
        if ingredients.is_empty() {
            debug!("No ingredients, skipping recipe generation");
            return Ok(Vec::new());
        }
        let model = self.config.read().recipe_model.clone();
        let body = json!({
            "contents": [{ "parts": [{ "text": recipe_prompt(ingredients, restrictions) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": recipe_schema(),
            }
        });
        let response = self.generate_content(&model, &body).await?;
        match parse_recipes(&response_text(&response)) {
            Ok(recipes) => {
                info!(count = recipes.len(), "Recipes generated");
                Ok(recipes)
            }
            Err(e) => {
                error!(error = %e, "Failed to parse recipes JSON");
                Ok(Vec::new())
            }
        }
    }

    /// Find up to three stores selling `item`, near `location` when known.
    #[instrument(skip(self))]
    pub async fn find_nearby_stores(&self, item: &str, location: Option<GeoPoint>) -> AppResult<Vec<StoreLocation>> {
        let model = self.config.read().maps_model.clone();
        let mut body = json!({
            "contents": [{ "parts": [{
                "text": format!("Find 3 nearby grocery stores or supermarkets where I can buy {}.", item)
            }] }],
            "tools": [{ "googleMaps": {} }],
        });
        if let Some(point) = location {
            body["toolConfig"] = json!({
                "retrievalConfig": { "latLng": { "latitude": point.lat, "longitude": point.lng } }
            });
        }
        let response = self.generate_content(&model, &body).await?;
        let stores = parse_store_chunks(&response);
        info!(item, count = stores.len(), "Stores found");
        Ok(stores)
    }

    /// Synthesize `text`. `None` when the model returned no audio.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn speak(&self, text: &str) -> AppResult<Option<SpeechAudio>> {
        let (model, voice) = {
            let config = self.config.read();
            (config.tts_model.clone(), config.tts_voice.clone())
        };
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        });
        let response = self.generate_content(&model, &body).await?;
        let audio = extract_inline_audio(&response).map(|data| SpeechAudio {
            data,
            sample_rate: SPEECH_SAMPLE_RATE,
        });
        if audio.is_none() {
            warn!("Speech response carried no audio");
        }
        Ok(audio)
    }

    async fn generate_content(&self, model: &str, body: &Value) -> AppResult<Value> {
        let (base_url, api_key) = {
            let config = self.config.read();
            (config.base_url.clone(), config.api_key.clone())
        };
        if api_key.trim().is_empty() {
            return Err(AppError::ConfigError(
                "no API key configured (set GEMINI_API_KEY or gemini.api_key)".to_string(),
            ));
        }

        self.post_generate(&base_url, model, api_key.trim(), body)
            .await
            .map_err(|e| {
                error!(model, error = %e, "generateContent failed");
                AppError::Upstream(format!("{:#}", e))
            })
    }

    async fn post_generate(&self, base_url: &str, model: &str, api_key: &str, body: &Value) -> anyhow::Result<Value> {
        let url = generate_url(base_url, model);
        let started = std::time::Instant::now();
        let resp = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP {} from {}: {}", status, model, error_preview(&text)));
        }

        let value: Value = resp.json().await.context("decoding generateContent response")?;
        debug!(model, elapsed_ms = started.elapsed().as_millis() as u64, "generateContent ok");
        Ok(value)
    }
}

/// First characters of an error body, cut on a character boundary.
fn error_preview(text: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 300;
    text.trim().chars().take(MAX_PREVIEW_CHARS).collect()
}

pub fn generate_url(base_url: &str, model: &str) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    format!("{}/v1beta/models/{}:generateContent", base_url.trim_end_matches('/'), model)
}

/// Concatenated text parts of the first candidate.
pub fn response_text(response: &Value) -> String {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

pub fn parse_ingredient_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the recipe array. Blank text counts as an empty array.
pub fn parse_recipes(text: &str) -> Result<Vec<Recipe>, VoiceError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text).map_err(|e| VoiceError::ParseError(e.to_string()))
}

pub fn parse_store_chunks(response: &Value) -> Vec<StoreLocation> {
    let Some(chunks) = response
        .pointer("/candidates/0/groundingMetadata/groundingChunks")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    chunks
        .iter()
        .take(MAX_STORES)
        .map(|chunk| {
            let maps = chunk.get("maps");
            let field = |name: &str| maps.and_then(|m| m.get(name)).and_then(Value::as_str).filter(|s| !s.is_empty());
            StoreLocation {
                name: field("title").unwrap_or("Store").to_string(),
                address: String::new(),
                uri: field("uri").unwrap_or("#").to_string(),
            }
        })
        .collect()
}

pub fn extract_inline_audio(response: &Value) -> Option<String> {
    response
        .pointer("/candidates/0/content/parts/0/inlineData/data")
        .and_then(Value::as_str)
        .filter(|data| !data.is_empty())
        .map(str::to_string)
}

fn recipe_prompt(ingredients: &[String], restrictions: &[DietaryRestriction]) -> String {
    let restrictions = restrictions.iter().map(|r| r.label()).collect::<Vec<_>>().join(", ");
    format!(
        "Generate 5 creative recipes using some or all of these ingredients: {}. \
         Filter for these dietary restrictions: {}. \
         Include detailed step-by-step instructions, calculated nutritional facts (per serving), \
         and 3 realistic simulated user reviews for each recipe.",
        ingredients.join(", "),
        restrictions
    )
}

fn recipe_schema() -> Value {
    let string = json!({ "type": "STRING" });
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": string,
                "title": string,
                "description": string,
                "ingredients": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": { "name": string, "category": string, "amount": string },
                        "required": ["name"]
                    }
                },
                "instructions": { "type": "ARRAY", "items": string },
                "difficulty": string,
                "prepTime": string,
                "calories": { "type": "NUMBER" },
                "dietaryInfo": { "type": "ARRAY", "items": string },
                "imagePrompt": string,
                "nutritionalFacts": {
                    "type": "OBJECT",
                    "properties": { "protein": string, "carbs": string, "fat": string, "fiber": string },
                    "required": ["protein", "carbs", "fat", "fiber"]
                },
                "reviews": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": { "user": string, "rating": { "type": "NUMBER" }, "comment": string },
                        "required": ["user", "rating", "comment"]
                    }
                }
            },
            "required": [
                "id", "title", "description", "ingredients", "instructions", "difficulty",
                "prepTime", "calories", "dietaryInfo", "imagePrompt", "nutritionalFacts", "reviews"
            ]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpResponse, HttpServer};

    fn config(base_url: &str, api_key: &str) -> GeminiConfig {
        let mut config = crate::config::AppConfig::default().gemini;
        config.base_url = base_url.to_string();
        config.api_key = api_key.to_string();
        config
    }

    #[test]
    fn test_generate_url() {
        assert_eq!(
            generate_url("https://host/", "models/gemini-2.5-flash"),
            "https://host/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_parse_ingredient_list() {
        assert_eq!(
            parse_ingredient_list(" eggs, milk ,, spinach ,"),
            vec!["eggs".to_string(), "milk".to_string(), "spinach".to_string()]
        );
        assert!(parse_ingredient_list("  ").is_empty());
    }

    #[test]
    fn test_parse_recipes() {
        let text = r#"[{"id":"r1","title":"Omelette","instructions":["Whisk","Cook"],
            "prepTime":"10 min","calories":320,"reviews":[{"user":"a","rating":4.5,"comment":"nice"}]}]"#;
        let recipes = parse_recipes(text).unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].prep_time, "10 min");
        assert_eq!(recipes[0].reviews[0].rating, 4.5);

        assert!(parse_recipes("").unwrap().is_empty());
        assert!(matches!(parse_recipes("not json"), Err(VoiceError::ParseError(_))));
    }

    #[test]
    fn test_parse_store_chunks_defaults_and_cap() {
        let response = json!({"candidates": [{"groundingMetadata": {"groundingChunks": [
            {"maps": {"title": "Fresh Mart", "uri": "https://maps/1"}},
            {"maps": {}},
            {"web": {"uri": "https://example"}},
            {"maps": {"title": "Fourth"}}
        ]}}]});
        let stores = parse_store_chunks(&response);
        assert_eq!(stores.len(), MAX_STORES);
        assert_eq!(stores[0].name, "Fresh Mart");
        assert_eq!(stores[1].name, "Store");
        assert_eq!(stores[1].uri, "#");
        assert_eq!(stores[2].address, "");
        assert!(parse_store_chunks(&json!({})).is_empty());
    }

    #[test]
    fn test_extract_inline_audio() {
        let response = json!({"candidates": [{"content": {"parts": [{"inlineData": {"data": "AAA="}}]}}]});
        assert_eq!(extract_inline_audio(&response).as_deref(), Some("AAA="));
        assert_eq!(extract_inline_audio(&json!({"candidates": []})), None);
    }

    #[test]
    fn test_recipe_prompt_uses_labels() {
        let prompt = recipe_prompt(
            &["eggs".to_string(), "milk".to_string()],
            &[DietaryRestriction::GlutenFree, DietaryRestriction::Vegan],
        );
        assert!(prompt.contains("eggs, milk"));
        assert!(prompt.contains("Gluten-Free, Vegan"));
    }

    #[test]
    fn test_error_preview_cuts_on_char_boundary() {
        let body = format!("{}é tail", "a".repeat(299));
        let preview = error_preview(&body);
        assert_eq!(preview.chars().count(), 300);
        assert!(preview.ends_with('é'));
        assert_eq!(error_preview("  short  "), "short");
    }

    #[actix_web::test]
    async fn test_multibyte_error_body_is_upstream_error() {
        let server = HttpServer::new(|| {
            App::new().route(
                "/v1beta/models/{call}",
                web::post().to(|| async { HttpResponse::InternalServerError().body(format!("{}é", "a".repeat(299))) }),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        let client = GeminiClient::new(config(&format!("http://{}", addr), "test-key")).unwrap();
        let err = client.analyze_fridge_image("AAAA").await.unwrap_err();
        assert!(matches!(&err, AppError::Upstream(reason) if reason.contains("500")));
    }

    #[actix_web::test]
    async fn test_missing_api_key_is_config_error() {
        let client = GeminiClient::new(config("http://127.0.0.1:9", "")).unwrap();
        assert!(!client.has_api_key());
        let err = client.analyze_fridge_image("AAAA").await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[actix_web::test]
    async fn test_empty_ingredients_short_circuit() {
        let client = GeminiClient::new(config("http://127.0.0.1:9", "")).unwrap();
        assert!(client.generate_recipes(&[], &[]).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_round_trip_against_local_server() {
        let server = HttpServer::new(|| {
            App::new().route(
                "/v1beta/models/{call}",
                web::post().to(|body: web::Json<Value>| async move {
                    let text = if body.pointer("/generationConfig/responseSchema").is_some() {
                        "not json".to_string()
                    } else {
                        "tomatoes, basil".to_string()
                    };
                    HttpResponse::Ok().json(json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}))
                }),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        let client = GeminiClient::new(config(&format!("http://{}", addr), "test-key")).unwrap();
        let ingredients = client.analyze_fridge_image("AAAA").await.unwrap();
        assert_eq!(ingredients, vec!["tomatoes".to_string(), "basil".to_string()]);

        // Unparseable recipe JSON degrades to an empty list.
        let recipes = client.generate_recipes(&ingredients, &[]).await.unwrap();
        assert!(recipes.is_empty());
    }
}
