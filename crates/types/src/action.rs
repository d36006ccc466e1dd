//! Strongly typed action records shared by document loaders, the engine, and hosts.
//!
//! An action list is a flat, ordered sequence. Structured control flow is encoded with
//! begin/end marker actions (`BLOCK_IF_BEGIN` … `BLOCK_IF_END`, `BLOCK_WHILE_BEGIN` …
//! `BLOCK_WHILE_END`) rather than nesting, so the list can be authored, stored, and
//! checkpointed as plain data.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default per-action timeout passed through to executors, in milliseconds.
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 30_000;

/// Closed set of action kinds understood by the interpreter.
///
/// Flow-control kinds are interpreted by the engine itself. `SET_VARIABLE`, `INCREMENT`,
/// and `LOG` are leaf actions that only touch the execution context, so the engine
/// handles them internally as well. Every other kind is delegated to an action executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Navigate,
    Refresh,
    GoBack,
    GoForward,
    Click,
    DoubleClick,
    RightClick,
    Hover,
    TypeText,
    ClearInput,
    SelectOption,
    PressKey,
    Scroll,
    UploadFile,
    DownloadFile,
    Screenshot,
    ExtractText,
    ExtractAttribute,
    ExecuteScript,
    SwitchFrame,
    SwitchWindow,
    Wait,
    WaitForElement,
    CheckElementExists,
    CheckElementVisible,
    CheckText,
    CheckUrl,
    SetVariable,
    Increment,
    Log,
    BlockIfBegin,
    BlockElif,
    BlockElse,
    BlockIfEnd,
    BlockWhileBegin,
    BlockWhileEnd,
    Break,
    Continue,
    Stop,
}

impl ActionKind {
    /// Returns `true` for kinds that alter the instruction pointer or run state.
    pub fn is_flow_control(self) -> bool {
        matches!(
            self,
            Self::BlockIfBegin
                | Self::BlockElif
                | Self::BlockElse
                | Self::BlockIfEnd
                | Self::BlockWhileBegin
                | Self::BlockWhileEnd
                | Self::Break
                | Self::Continue
                | Self::Stop
        )
    }

    /// Returns `true` for check-style kinds whose result feeds `check_passed` / `check_failed`.
    pub fn is_check(self) -> bool {
        matches!(
            self,
            Self::CheckElementExists | Self::CheckElementVisible | Self::CheckText | Self::CheckUrl
        )
    }

    /// Returns `true` for leaf kinds the engine resolves without calling an executor.
    pub fn is_internal(self) -> bool {
        matches!(self, Self::SetVariable | Self::Increment | Self::Log)
    }

    /// Wire name of the kind (for example, `BLOCK_IF_BEGIN`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigate => "NAVIGATE",
            Self::Refresh => "REFRESH",
            Self::GoBack => "GO_BACK",
            Self::GoForward => "GO_FORWARD",
            Self::Click => "CLICK",
            Self::DoubleClick => "DOUBLE_CLICK",
            Self::RightClick => "RIGHT_CLICK",
            Self::Hover => "HOVER",
            Self::TypeText => "TYPE_TEXT",
            Self::ClearInput => "CLEAR_INPUT",
            Self::SelectOption => "SELECT_OPTION",
            Self::PressKey => "PRESS_KEY",
            Self::Scroll => "SCROLL",
            Self::UploadFile => "UPLOAD_FILE",
            Self::DownloadFile => "DOWNLOAD_FILE",
            Self::Screenshot => "SCREENSHOT",
            Self::ExtractText => "EXTRACT_TEXT",
            Self::ExtractAttribute => "EXTRACT_ATTRIBUTE",
            Self::ExecuteScript => "EXECUTE_SCRIPT",
            Self::SwitchFrame => "SWITCH_FRAME",
            Self::SwitchWindow => "SWITCH_WINDOW",
            Self::Wait => "WAIT",
            Self::WaitForElement => "WAIT_FOR_ELEMENT",
            Self::CheckElementExists => "CHECK_ELEMENT_EXISTS",
            Self::CheckElementVisible => "CHECK_ELEMENT_VISIBLE",
            Self::CheckText => "CHECK_TEXT",
            Self::CheckUrl => "CHECK_URL",
            Self::SetVariable => "SET_VARIABLE",
            Self::Increment => "INCREMENT",
            Self::Log => "LOG",
            Self::BlockIfBegin => "BLOCK_IF_BEGIN",
            Self::BlockElif => "BLOCK_ELIF",
            Self::BlockElse => "BLOCK_ELSE",
            Self::BlockIfEnd => "BLOCK_IF_END",
            Self::BlockWhileBegin => "BLOCK_WHILE_BEGIN",
            Self::BlockWhileEnd => "BLOCK_WHILE_END",
            Self::Break => "BREAK",
            Self::Continue => "CONTINUE",
            Self::Stop => "STOP",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declarative step of a run.
///
/// Actions are created once by a loader and are read-only while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// What the step does.
    pub kind: ActionKind,
    /// Opaque locator (selector, URL, variable name); meaningless to the engine.
    #[serde(default)]
    pub target: Option<String>,
    /// Executor-specific value. Strings inside are variable-substituted before dispatch.
    #[serde(default)]
    pub payload: Option<JsonValue>,
    /// Timeout handed to the executor, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Human-readable label, also used as the output key when present.
    #[serde(default)]
    pub label: Option<String>,
    /// Condition text for `BLOCK_IF_BEGIN`, `BLOCK_ELIF`, and `BLOCK_WHILE_BEGIN`.
    #[serde(default)]
    pub condition: Option<String>,
    /// Variable that receives the executor's output value.
    #[serde(default)]
    pub store_as: Option<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_ACTION_TIMEOUT_MS
}

impl Action {
    /// Creates a bare action of the given kind.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            target: None,
            payload: None,
            timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            label: None,
            condition: None,
            store_as: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<JsonValue>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn storing_as(mut self, variable: impl Into<String>) -> Self {
        self.store_as = Some(variable.into());
        self
    }

    /// `SET_VARIABLE name = value`.
    pub fn set_variable(name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(ActionKind::SetVariable).with_target(name).with_payload(value)
    }

    /// `INCREMENT name by amount`.
    pub fn increment(name: impl Into<String>, amount: impl Into<JsonValue>) -> Self {
        Self::new(ActionKind::Increment).with_target(name).with_payload(amount)
    }

    pub fn if_begin(condition: impl Into<String>) -> Self {
        Self::new(ActionKind::BlockIfBegin).with_condition(condition)
    }

    pub fn elif(condition: impl Into<String>) -> Self {
        Self::new(ActionKind::BlockElif).with_condition(condition)
    }

    pub fn while_begin(condition: impl Into<String>) -> Self {
        Self::new(ActionKind::BlockWhileBegin).with_condition(condition)
    }

    /// Raw condition text, taken from `condition` or a string `payload`.
    pub fn condition_text(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .or_else(|| self.payload.as_ref().and_then(JsonValue::as_str))
    }

    /// Key under which this action's output is logged.
    pub fn output_key(&self, index: usize) -> String {
        match &self.label {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => format!("{}:{}", index, self.kind),
        }
    }
}

impl From<ActionKind> for Action {
    fn from(kind: ActionKind) -> Self {
        Self::new(kind)
    }
}
