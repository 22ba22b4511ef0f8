//! # UI Events
//!
//! Everything the UI needs to re-render is published on one broadcast
//! channel: kitchen state changes and the voice indicator. `/ws/events`
//! subscribers receive each event as a JSON text frame tagged by `type`.
//!
//! Publishing never fails: with no subscribers the event is simply dropped.

use crate::kitchen::model::{DietaryRestriction, GeoPoint, ShoppingItem, StoreLocation, View};
use serde::Serialize;
use tokio::sync::broadcast;

/// The single active/inactive voice indicator, plus the start-failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStatus {
    Active,
    Inactive,
    FailedToStart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    ViewChanged {
        view: View,
    },
    IngredientsUpdated {
        ingredients: Vec<String>,
    },
    RestrictionsUpdated {
        restrictions: Vec<DietaryRestriction>,
    },
    RecipesUpdated {
        count: usize,
    },
    CookingStarted {
        recipe_id: String,
        title: String,
    },
    StepChanged {
        step: usize,
        instruction: Option<String>,
    },
    ShoppingListUpdated {
        items: Vec<ShoppingItem>,
    },
    StoresFound {
        item: String,
        stores: Vec<StoreLocation>,
    },
    LocationUpdated {
        location: Option<GeoPoint>,
    },
    VoiceStatus {
        status: VoiceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

/// Sending half shared by everyone that publishes.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UiEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: UiEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(UiEvent::VoiceStatus {
            status: VoiceStatus::FailedToStart,
            detail: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "voice_status", "status": "failed_to_start"}));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(UiEvent::RecipesUpdated { count: 0 });
        let mut rx = bus.subscribe();
        bus.publish(UiEvent::ViewChanged { view: View::Shopping });
        assert_eq!(rx.try_recv().unwrap(), UiEvent::ViewChanged { view: View::Shopping });
    }
}
