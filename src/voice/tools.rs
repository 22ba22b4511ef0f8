//! # Tool Dispatch Bridge
//!
//! Executes the model's function calls against live application state.
//!
//! The bridge never caches view, recipe or step. It reads them through
//! [`ViewStateAccess::snapshot`] at the moment a call arrives and changes
//! them only through [`ViewStateAccess::dispatch`]. Every invocation,
//! recognised or not, yields exactly one result string keyed by its id.
//!
//! ## Vocabulary:
//! - `navigateTo(view: scan|recipes|shopping)`
//! - `cookingControl(action: next|previous|repeat|finish)`

use crate::error::AppResult;
use crate::kitchen::model::{Recipe, View};
use crate::voice::protocol::{FunctionDeclaration, Schema, Tool, ToolInvocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

pub const NAVIGATE_TO: &str = "navigateTo";
pub const COOKING_CONTROL: &str = "cookingControl";

/// Views the assistant may navigate to. Cooking is entered only by picking a recipe.
pub const NAVIGABLE_VIEWS: [View; 3] = [View::Scan, View::Recipes, View::Shopping];

pub const NOT_POSSIBLE: &str = "Action not possible at this stage.";
pub const START_COOKING_FIRST: &str = "Please select a recipe and start cooking first.";
pub const COOKING_FINISHED: &str = "Cooking finished! Returning to recipes.";

/// What the bridge sees of the application at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub view: View,
    pub recipe: Option<Recipe>,
    pub step: usize,
}

/// State changes the bridge may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewAction {
    Navigate(View),
    SetStep(usize),
    FinishCooking,
}

/// Injected read accessor plus dispatch function over application view state.
pub trait ViewStateAccess: Send + Sync {
    fn snapshot(&self) -> ViewSnapshot;

    /// Apply `action`. Out-of-range steps are rejected, never clamped.
    fn dispatch(&self, action: ViewAction) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookingAction {
    Next,
    Previous,
    Repeat,
    Finish,
}

impl CookingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookingAction::Next => "next",
            CookingAction::Previous => "previous",
            CookingAction::Repeat => "repeat",
            CookingAction::Finish => "finish",
        }
    }
}

impl fmt::Display for CookingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CookingAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "next" => Ok(CookingAction::Next),
            "previous" => Ok(CookingAction::Previous),
            "repeat" => Ok(CookingAction::Repeat),
            "finish" => Ok(CookingAction::Finish),
            other => Err(format!("unknown cooking action '{}'", other)),
        }
    }
}

/// A function call with its arguments checked against the vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCommand {
    NavigateTo(View),
    CookingControl(CookingAction),
    /// Known name, unusable arguments
    InvalidArguments { name: String, reason: String },
    Unknown(String),
}

impl ToolCommand {
    pub fn parse(invocation: &ToolInvocation) -> Self {
        let string_arg = |key: &str| invocation.args.get(key).and_then(|v| v.as_str());
        match invocation.name.as_str() {
            NAVIGATE_TO => match string_arg("view").map(str::parse::<View>) {
                Some(Ok(view)) if NAVIGABLE_VIEWS.contains(&view) => ToolCommand::NavigateTo(view),
                Some(Ok(view)) => ToolCommand::InvalidArguments {
                    name: invocation.name.clone(),
                    reason: format!("view '{}' cannot be navigated to", view),
                },
                Some(Err(reason)) => ToolCommand::InvalidArguments {
                    name: invocation.name.clone(),
                    reason,
                },
                None => ToolCommand::InvalidArguments {
                    name: invocation.name.clone(),
                    reason: "missing 'view' argument".to_string(),
                },
            },
            COOKING_CONTROL => match string_arg("action").map(str::parse::<CookingAction>) {
                Some(Ok(action)) => ToolCommand::CookingControl(action),
                Some(Err(reason)) => ToolCommand::InvalidArguments {
                    name: invocation.name.clone(),
                    reason,
                },
                None => ToolCommand::InvalidArguments {
                    name: invocation.name.clone(),
                    reason: "missing 'action' argument".to_string(),
                },
            },
            other => ToolCommand::Unknown(other.to_string()),
        }
    }
}

/// The answer to one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub result: String,
}

/// Function declarations advertised in the session setup.
pub fn declarations() -> Vec<Tool> {
    vec![Tool {
        function_declarations: vec![
            FunctionDeclaration {
                name: NAVIGATE_TO.to_string(),
                parameters: Schema::single_enum_object(
                    "Navigate the user to a specific section of the app.",
                    "view",
                    "The target view name.",
                    &["scan", "recipes", "shopping"],
                ),
            },
            FunctionDeclaration {
                name: COOKING_CONTROL.to_string(),
                parameters: Schema::single_enum_object(
                    "Control the step-by-step cooking process.",
                    "action",
                    "The cooking navigation action.",
                    &["next", "previous", "repeat", "finish"],
                ),
            },
        ],
    }]
}

/// Runs tool calls against the injected view state.
#[derive(Clone)]
pub struct ToolBridge {
    view_state: Arc<dyn ViewStateAccess>,
}

impl ToolBridge {
    pub fn new(view_state: Arc<dyn ViewStateAccess>) -> Self {
        Self { view_state }
    }

    /// Execute one invocation. The state change (if any) has happened by the
    /// time this returns, so the caller can send the result right away.
    pub fn handle(&self, invocation: &ToolInvocation) -> ToolResult {
        let command = ToolCommand::parse(invocation);
        debug!(id = %invocation.id, name = %invocation.name, ?command, "Dispatching tool call");

        let result = match command {
            ToolCommand::NavigateTo(view) => self.navigate_to(view),
            ToolCommand::CookingControl(action) => self.cooking_control(action),
            ToolCommand::InvalidArguments { name, reason } => {
                info!(tool = %name, %reason, "Rejected tool call arguments");
                NOT_POSSIBLE.to_string()
            }
            ToolCommand::Unknown(name) if name.is_empty() => {
                info!(id = %invocation.id, "Tool call without a name");
                format!("Unnamed command. {}", NOT_POSSIBLE)
            }
            ToolCommand::Unknown(name) => {
                info!(tool = %name, "Unknown tool requested");
                format!("Unknown command {}. {}", name, NOT_POSSIBLE)
            }
        };

        ToolResult {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            result,
        }
    }

    pub fn navigate_to(&self, view: View) -> String {
        match self.view_state.dispatch(ViewAction::Navigate(view)) {
            Ok(()) => format!("Navigated to {}", view),
            Err(_) => NOT_POSSIBLE.to_string(),
        }
    }

    /// Step navigation with the same rules for voice and for the HTTP API.
    pub fn cooking_control(&self, action: CookingAction) -> String {
        let ViewSnapshot { view, recipe, step } = self.view_state.snapshot();
        let recipe = match recipe {
            Some(recipe) if view == View::Cooking => recipe,
            _ => return START_COOKING_FIRST.to_string(),
        };
        let steps = &recipe.instructions;

        match action {
            CookingAction::Next if step + 1 < steps.len() => {
                self.apply(ViewAction::SetStep(step + 1), || {
                    format!("Moving to next step: {}", steps[step + 1])
                })
            }
            CookingAction::Previous if step > 0 && step - 1 < steps.len() => {
                self.apply(ViewAction::SetStep(step - 1), || {
                    format!("Going back to step {}: {}", step, steps[step - 1])
                })
            }
            CookingAction::Repeat => match steps.get(step) {
                Some(text) => format!("Repeating step {}: {}", step + 1, text),
                None => NOT_POSSIBLE.to_string(),
            },
            CookingAction::Finish => self.apply(ViewAction::FinishCooking, || COOKING_FINISHED.to_string()),
            _ => NOT_POSSIBLE.to_string(),
        }
    }

    fn apply(&self, action: ViewAction, describe: impl FnOnce() -> String) -> String {
        match self.view_state.dispatch(action) {
            Ok(()) => describe(),
            Err(e) => {
                debug!(?action, error = %e, "View state rejected tool action");
                NOT_POSSIBLE.to_string()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AppError;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Minimal in-memory view state.
    pub(crate) struct FakeViewState {
        pub state: Mutex<ViewSnapshot>,
        pub dispatched: Mutex<Vec<ViewAction>>,
    }

    impl FakeViewState {
        pub(crate) fn new(view: View, steps: usize, step: usize) -> Arc<Self> {
            let recipe = (steps > 0).then(|| Recipe {
                id: "r1".to_string(),
                title: "Test".to_string(),
                description: String::new(),
                ingredients: vec![],
                instructions: (1..=steps).map(|i| format!("Step {}", i)).collect(),
                difficulty: "Easy".to_string(),
                prep_time: "5 min".to_string(),
                calories: 100.0,
                dietary_info: vec![],
                image_prompt: String::new(),
                nutritional_facts: Default::default(),
                reviews: vec![],
            });
            Arc::new(Self {
                state: Mutex::new(ViewSnapshot { view, recipe, step }),
                dispatched: Mutex::new(Vec::new()),
            })
        }
    }

    impl ViewStateAccess for FakeViewState {
        fn snapshot(&self) -> ViewSnapshot {
            self.state.lock().clone()
        }

        fn dispatch(&self, action: ViewAction) -> AppResult<()> {
            self.dispatched.lock().push(action);
            let mut state = self.state.lock();
            match action {
                ViewAction::Navigate(view) => state.view = view,
                ViewAction::FinishCooking => state.view = View::Recipes,
                ViewAction::SetStep(step) => {
                    let len = state.recipe.as_ref().map(|r| r.instructions.len()).unwrap_or(0);
                    if step >= len {
                        return Err(AppError::ValidationError("step out of range".to_string()));
                    }
                    state.step = step;
                }
            }
            Ok(())
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolInvocation {
        ToolInvocation {
            id: "call-7".to_string(),
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn test_next_and_previous_respect_bounds() {
        let state = FakeViewState::new(View::Cooking, 5, 4);
        let bridge = ToolBridge::new(state.clone());

        let result = bridge.handle(&call(COOKING_CONTROL, json!({"action": "next"})));
        assert_eq!(result.result, NOT_POSSIBLE);
        assert_eq!(state.snapshot().step, 4);

        state.state.lock().step = 0;
        let result = bridge.handle(&call(COOKING_CONTROL, json!({"action": "previous"})));
        assert_eq!(result.result, NOT_POSSIBLE);
        assert_eq!(state.snapshot().step, 0);
        assert!(state.dispatched.lock().is_empty());
    }

    #[test]
    fn test_step_navigation_results() {
        let state = FakeViewState::new(View::Cooking, 3, 0);
        let bridge = ToolBridge::new(state.clone());

        assert_eq!(bridge.cooking_control(CookingAction::Next), "Moving to next step: Step 2");
        assert_eq!(bridge.cooking_control(CookingAction::Repeat), "Repeating step 2: Step 2");
        assert_eq!(bridge.cooking_control(CookingAction::Previous), "Going back to step 1: Step 1");
        assert_eq!(state.snapshot().step, 0);
        assert_eq!(bridge.cooking_control(CookingAction::Finish), COOKING_FINISHED);
        assert_eq!(state.snapshot().view, View::Recipes);
    }

    #[test]
    fn test_cooking_control_outside_cooking_view() {
        let state = FakeViewState::new(View::Shopping, 5, 2);
        let bridge = ToolBridge::new(state.clone());
        let result = bridge.handle(&call(COOKING_CONTROL, json!({"action": "next"})));
        assert_eq!(result.result, START_COOKING_FIRST);
        assert_eq!(state.snapshot().step, 2);

        let no_recipe = FakeViewState::new(View::Cooking, 0, 0);
        assert_eq!(ToolBridge::new(no_recipe).cooking_control(CookingAction::Repeat), START_COOKING_FIRST);
    }

    #[test]
    fn test_navigation() {
        let state = FakeViewState::new(View::Scan, 0, 0);
        let bridge = ToolBridge::new(state.clone());
        let result = bridge.handle(&call(NAVIGATE_TO, json!({"view": "shopping"})));
        assert_eq!(result.id, "call-7");
        assert_eq!(result.result, "Navigated to shopping");
        assert_eq!(state.snapshot().view, View::Shopping);

        let result = bridge.handle(&call(NAVIGATE_TO, json!({"view": "cooking"})));
        assert_eq!(result.result, NOT_POSSIBLE);
        assert_eq!(state.snapshot().view, View::Shopping);
    }

    #[test]
    fn test_unknown_and_malformed_calls_still_answer() {
        let state = FakeViewState::new(View::Scan, 0, 0);
        let bridge = ToolBridge::new(state.clone());

        let result = bridge.handle(&call("setTimer", json!({"minutes": 5})));
        assert_eq!(result.name, "setTimer");
        assert!(result.result.contains(NOT_POSSIBLE));

        let result = bridge.handle(&call(COOKING_CONTROL, json!({})));
        assert_eq!(result.result, NOT_POSSIBLE);

        let unnamed = ToolInvocation::from_value(&json!({"id": "call-8", "args": {"view": "scan"}}));
        let result = bridge.handle(&unnamed);
        assert_eq!(result.id, "call-8");
        assert!(result.result.ends_with(NOT_POSSIBLE));
        assert!(state.dispatched.lock().is_empty());
    }

    #[test]
    fn test_declarations_match_vocabulary() {
        let tools = declarations();
        let names: Vec<&str> = tools[0].function_declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![NAVIGATE_TO, COOKING_CONTROL]);
        let value = serde_json::to_value(&tools[0].function_declarations[1].parameters).unwrap();
        assert_eq!(value["properties"]["action"]["enum"], json!(["next", "previous", "repeat", "finish"]));
    }
}
