//! # Live Session Wire Protocol
//!
//! JSON messages exchanged with the bidirectional streaming voice service.
//!
//! ## Client → server:
//! ```json
//! {"setup": {"model": "models/...", "generationConfig": {...}, "systemInstruction": {...}, "tools": [...]}}
//! {"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}]}}
//! {"toolResponse": {"functionResponses": [{"id": "...", "name": "...", "response": {"result": "..."}}]}}
//! ```
//!
//! ## Server → client:
//! Every server message is an object with one or more of `setupComplete`,
//! `serverContent`, `toolCall`, `toolCallCancellation` and `goAway`.
//! [`ServerMessage::into_events`] flattens it into [`ServerEvent`]s in the
//! order the session handles them: tool calls, then audio, then interruption.

use crate::audio::capture::EncodedFrame;
use crate::error::VoiceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Messages the session sends upstream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, VoiceError> {
        serde_json::to_string(self)
            .map_err(|e| VoiceError::ConnectionError(format!("failed to encode outbound message: {}", e)))
    }

    /// Answer for a single tool invocation.
    pub fn tool_result(id: &str, name: &str, result: &str) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: id.to_string(),
                name: name.to_string(),
                response: FunctionResult {
                    result: result.to_string(),
                },
            }],
        })
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::RealtimeInput(_) => "realtime_input",
            ClientMessage::ToolResponse(_) => "tool_response",
        }
    }
}

impl From<EncodedFrame> for ClientMessage {
    fn from(frame: EncodedFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: pcm_mime_type(frame.sample_rate),
                data: frame.data,
            }],
        })
    }
}

/// `audio/pcm;rate=16000` style MIME type for mono PCM16.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<Tool>,
}

impl Setup {
    /// Session configuration: audio replies in `voice`, the given behaviour
    /// instruction and tool vocabulary.
    pub fn new(model: &str, voice: &str, instruction: &str, tools: Vec<Tool>) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part::text(instruction)],
            },
            tools,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub parameters: Schema,
}

/// OpenAPI-style schema subset used by function declarations.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Schema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl Schema {
    /// Object with a single required string-enum property.
    pub fn single_enum_object(description: &str, property: &str, property_description: &str, values: &[&str]) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            property.to_string(),
            Schema {
                kind: "STRING".to_string(),
                description: Some(property_description.to_string()),
                properties: None,
                enum_values: Some(values.iter().map(|v| v.to_string()).collect()),
                required: None,
            },
        );
        Schema {
            kind: "OBJECT".to_string(),
            description: Some(description.to_string()),
            properties: Some(properties),
            enum_values: None,
            required: Some(vec![property.to_string()]),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: FunctionResult,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionResult {
    pub result: String,
}

/// One function call requested by the model. Answered exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

impl ToolInvocation {
    /// Read one entry of `functionCalls`, field by field.
    ///
    /// Missing or mistyped fields become empty values, so a bad entry still
    /// reaches the tool bridge (and gets its "not possible" answer) instead
    /// of taking its siblings down with it.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let text = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Self {
            id: text("id"),
            name: text("name"),
            args: value.get("args").cloned().unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Raw server message. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Kept raw; entries are read one at a time by [`ToolInvocation::from_value`]
    #[serde(default)]
    pub function_calls: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// What the session reacts to, one message at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    ToolCalls(Vec<ToolInvocation>),
    /// base64 PCM16 chunk at the output rate
    Audio(String),
    Interrupted,
    TurnComplete,
    ToolCallsCancelled(Vec<String>),
    GoAway(Option<String>),
}

impl ServerMessage {
    /// Parse one text or binary frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self, VoiceError> {
        serde_json::from_slice(payload)
            .map_err(|e| VoiceError::DecodeError(format!("malformed server message: {}", e)))
    }

    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }
        if let Some(call) = self.tool_call {
            let calls: Vec<ToolInvocation> = match &call.function_calls {
                serde_json::Value::Array(entries) => entries.iter().map(ToolInvocation::from_value).collect(),
                serde_json::Value::Null => Vec::new(),
                other => vec![ToolInvocation::from_value(other)],
            };
            if !calls.is_empty() {
                events.push(ServerEvent::ToolCalls(calls));
            }
        }
        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(ServerEvent::ToolCallsCancelled(cancellation.ids));
        }
        if let Some(content) = self.server_content {
            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for part in parts {
                if let Some(blob) = part.inline_data {
                    if !blob.data.is_empty() {
                        events.push(ServerEvent::Audio(blob.data));
                    }
                }
            }
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
        }
        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway(go_away.time_left));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let tools = vec![Tool {
            function_declarations: vec![FunctionDeclaration {
                name: "navigateTo".to_string(),
                parameters: Schema::single_enum_object("Navigate.", "view", "Target.", &["scan", "recipes"]),
            }],
        }];
        let message = ClientMessage::Setup(Setup::new("gemini-live", "Zephyr", "Be brief.", tools));
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(value["setup"]["model"], "models/gemini-live");
        assert_eq!(value["setup"]["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(value["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
        let params = &value["setup"]["tools"][0]["functionDeclarations"][0]["parameters"];
        assert_eq!(params["type"], "OBJECT");
        assert_eq!(params["required"], json!(["view"]));
        assert_eq!(params["properties"]["view"]["enum"], json!(["scan", "recipes"]));
    }

    #[test]
    fn test_realtime_input_from_frame() {
        let message = ClientMessage::from(EncodedFrame {
            data: "AAA=".to_string(),
            sample_rate: 16_000,
        });
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAA="}]}})
        );
    }

    #[test]
    fn test_tool_response_shape() {
        let message = ClientMessage::tool_result("call-1", "navigateTo", "Navigated to scan");
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"toolResponse": {"functionResponses": [
                {"id": "call-1", "name": "navigateTo", "response": {"result": "Navigated to scan"}}
            ]}})
        );
    }

    #[test]
    fn test_server_message_event_order() {
        let payload = json!({
            "toolCall": {"functionCalls": [{"id": "a", "name": "cookingControl", "args": {"action": "next"}}]},
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQI="}}, {"text": "hi"}]},
                "interrupted": true
            }
        });
        let events = ServerMessage::parse(payload.to_string().as_bytes()).unwrap().into_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ServerEvent::ToolCalls(calls) if calls[0].args["action"] == "next"));
        assert_eq!(events[1], ServerEvent::Audio("AQI=".to_string()));
        assert_eq!(events[2], ServerEvent::Interrupted);
    }

    #[test]
    fn test_setup_complete_and_go_away() {
        let events = ServerMessage::parse(br#"{"setupComplete": {}}"#).unwrap().into_events();
        assert_eq!(events, vec![ServerEvent::SetupComplete]);

        let events = ServerMessage::parse(br#"{"goAway": {"timeLeft": "10s"}}"#).unwrap().into_events();
        assert_eq!(events, vec![ServerEvent::GoAway(Some("10s".to_string()))]);
    }

    #[test]
    fn test_bad_function_call_keeps_its_siblings() {
        let payload = json!({
            "toolCall": {"functionCalls": [
                {"id": "fc-1", "name": "navigateTo", "args": {"view": "shopping"}},
                {"id": "fc-2", "args": {"view": "scan"}},
                {"id": "fc-3", "name": 7}
            ]},
            "serverContent": {"interrupted": true}
        });
        let events = ServerMessage::parse(payload.to_string().as_bytes()).unwrap().into_events();
        assert_eq!(events.len(), 2);
        let ServerEvent::ToolCalls(calls) = &events[0] else {
            panic!("expected tool calls, got {:?}", events[0]);
        };
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].name, "navigateTo");
        assert_eq!(calls[1].id, "fc-2");
        assert_eq!(calls[1].name, "");
        assert_eq!(calls[2].name, "");
        assert_eq!(calls[2].args, serde_json::Value::Null);
        assert_eq!(events[1], ServerEvent::Interrupted);
    }

    #[test]
    fn test_malformed_payload_is_decode_error() {
        assert!(matches!(ServerMessage::parse(b"{not json"), Err(VoiceError::DecodeError(_))));
    }
}
