use std::time::Duration;

use serde_json::Value;
use stepwise_types::{Action, ActionKind};
use tracing::debug;

use super::{ActionExecutor, ActionOutput, ExecutorError};

/// Longest `WAIT` the echo executor honours, regardless of the requested duration.
const MAX_ECHO_WAIT_MS: u64 = 1_000;

/// An executor that returns a synthetic JSON payload describing the action it was given.
///
/// This allows dry runs and tests without a browser driver. Check-style actions pass
/// unless their payload is literally `false`. `WAIT` sleeps for the payload's number of
/// milliseconds, capped by the action timeout and [`MAX_ECHO_WAIT_MS`]. Kinds the engine
/// resolves itself are rejected as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoExecutor;

#[async_trait::async_trait]
impl ActionExecutor for EchoExecutor {
    async fn execute(&self, action: &Action, target: Option<&str>, payload: Option<&Value>) -> Result<ActionOutput, ExecutorError> {
        debug!(
            kind = %action.kind,
            has_target = target.is_some(),
            has_payload = payload.is_some(),
            "echo executor handling action"
        );

        if action.kind.is_flow_control() || action.kind.is_internal() {
            return Err(ExecutorError::Unsupported(action.kind));
        }

        if action.kind == ActionKind::Wait {
            let requested = payload.and_then(Value::as_u64).unwrap_or(0);
            let capped = requested.min(action.timeout_ms).min(MAX_ECHO_WAIT_MS);
            tokio::time::sleep(Duration::from_millis(capped)).await;
        }

        let mut object = serde_json::Map::new();
        object.insert("kind".into(), Value::String(action.kind.to_string()));
        if let Some(target) = target {
            object.insert("target".into(), Value::String(target.to_string()));
        }
        if let Some(payload) = payload {
            object.insert("payload".into(), payload.clone());
        }
        let value = Value::Object(object);

        if action.kind.is_check() {
            let passed = !matches!(payload, Some(Value::Bool(false)));
            return Ok(ActionOutput::check(passed, value));
        }
        Ok(ActionOutput::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn echoes_substituted_inputs() {
        let action = Action::new(ActionKind::Click).with_target("#submit");
        let output = EchoExecutor.execute(&action, Some("#submit"), None).await.unwrap();
        assert_eq!(output.value, json!({"kind": "CLICK", "target": "#submit"}));
        assert_eq!(output.passed, None);
    }

    #[tokio::test]
    async fn checks_pass_unless_payload_is_false() {
        let action = Action::new(ActionKind::CheckElementExists);
        let passed = EchoExecutor.execute(&action, Some(".banner"), None).await.unwrap();
        assert_eq!(passed.passed, Some(true));

        let failed = EchoExecutor
            .execute(&action, Some(".banner"), Some(&json!(false)))
            .await
            .unwrap();
        assert_eq!(failed.passed, Some(false));
    }

    #[tokio::test]
    async fn engine_resolved_kinds_are_unsupported() {
        for kind in [ActionKind::BlockWhileBegin, ActionKind::Stop, ActionKind::SetVariable, ActionKind::Log] {
            let error = EchoExecutor.execute(&Action::new(kind), None, None).await.unwrap_err();
            assert!(matches!(error, ExecutorError::Unsupported(rejected) if rejected == kind));
        }
    }

    #[tokio::test]
    async fn wait_is_capped_by_timeout() {
        let action = Action::new(ActionKind::Wait).with_timeout_ms(5);
        let started = std::time::Instant::now();
        EchoExecutor.execute(&action, None, Some(&json!(60_000))).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(MAX_ECHO_WAIT_MS));
    }
}
