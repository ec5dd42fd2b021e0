//! Completion dispatcher.
//!
//! Turns one chunk (or one conversation sample) into a single completion
//! request and parses the structured response into a typed result. The
//! dispatcher never retries; failures go back to the caller.

use crate::analysis::{StageKind, StageMetadata, StageOutput};
use crate::completion::CompletionProvider;
use crate::cost::{CostTracker, Pricing};
use crate::error::DispatchError;
use crate::prompts::PromptLibrary;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A raw structured payload with its bookkeeping.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub payload: Value,
    pub metadata: StageMetadata,
}

/// Sends prompts to the completion capability and records their cost.
#[derive(Clone)]
pub struct Dispatcher {
    provider: Arc<dyn CompletionProvider>,
    prompts: Arc<dyn PromptLibrary>,
    pricing: Pricing,
    costs: Arc<CostTracker>,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        prompts: Arc<dyn PromptLibrary>,
        pricing: Pricing,
        costs: Arc<CostTracker>,
    ) -> Self {
        Self {
            provider,
            prompts,
            pricing,
            costs,
        }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn prompts(&self) -> &dyn PromptLibrary {
        self.prompts.as_ref()
    }

    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    /// Run one chunk of a stage and parse the result.
    ///
    /// Missing payload fields take the payload type's defaults; a payload
    /// that is not an object, or whose fields have the wrong shape, is a
    /// [`DispatchError::MalformedPayload`].
    pub async fn dispatch<P: DeserializeOwned>(
        &self,
        kind: StageKind,
        content: &str,
        context: Option<&str>,
    ) -> Result<StageOutput<P>, DispatchError> {
        let prompt = self.prompts.stage_prompt(kind, content, context);
        let schema = self.prompts.stage_schema(kind);
        let dispatched = self.send(kind.name(), &prompt, schema).await?;
        let payload = parse_payload(kind.name(), dispatched.payload)?;
        Ok(StageOutput::new(payload, dispatched.metadata))
    }

    /// Send an already-rendered prompt and return the raw payload.
    pub async fn send(
        &self,
        stage: &'static str,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<Dispatched, DispatchError> {
        let started = Instant::now();
        debug!("Dispatching {} request ({} chars)", stage, prompt.len());

        let completion = self
            .provider
            .complete(prompt, schema_hint)
            .await
            .map_err(|source| DispatchError::Completion { stage, source })?;

        let cost_usd = self.pricing.estimate(completion.tokens_used);
        self.costs.add_cost(cost_usd);

        let metadata = StageMetadata {
            analyzed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            model: completion.model,
            tokens_used: completion.tokens_used,
            cost_usd,
        };

        debug!(
            "{} request finished in {}ms ({} tokens)",
            stage, metadata.duration_ms, metadata.tokens_used
        );

        Ok(Dispatched {
            payload: completion.payload,
            metadata,
        })
    }
}

/// Parse a structured payload into `P`, defaulting missing fields.
pub fn parse_payload<P: DeserializeOwned>(stage: &'static str, payload: Value) -> Result<P, DispatchError> {
    if !payload.is_object() {
        return Err(DispatchError::MalformedPayload {
            stage,
            reason: format!("expected a JSON object, got {}", json_kind(&payload)),
        });
    }
    serde_json::from_value(payload).map_err(|e| DispatchError::MalformedPayload {
        stage,
        reason: e.to_string(),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AttachmentFindings, RiskFindings, SafetyFindings};
    use crate::completion::scripted::ScriptedProvider;
    use crate::error::CompletionError;
    use crate::models::{AttachmentStyle, RiskLevel, Severity};
    use crate::prompts::DefaultPrompts;
    use serde_json::json;

    fn dispatcher(provider: ScriptedProvider, costs: Arc<CostTracker>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(provider),
            Arc::new(DefaultPrompts),
            Pricing::new(1.0),
            costs,
        )
    }

    #[tokio::test]
    async fn test_dispatch_parses_payload_and_records_cost() {
        let costs = Arc::new(CostTracker::default());
        let provider = ScriptedProvider::new(Ok(json!({
            "risk_level": "Orange",
            "summary": "pushy about meeting"
        })));
        let dispatcher = dispatcher(provider, costs.clone());

        let output: StageOutput<SafetyFindings> = dispatcher
            .dispatch(StageKind::Safety, "transcript", None)
            .await
            .unwrap();

        assert_eq!(output.payload.risk_level, RiskLevel::Orange);
        assert!(output.payload.flags.is_empty());
        assert!(!output.escalate);
        assert_eq!(output.metadata.tokens_used, 100);
        assert!((output.metadata.cost_usd - 0.1).abs() < 1e-9);
        assert!((costs.total_cost() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let provider = ScriptedProvider::new(Ok(json!(["not", "an", "object"])));
        let dispatcher = dispatcher(provider, Arc::new(CostTracker::default()));

        let result: Result<StageOutput<SafetyFindings>, _> =
            dispatcher.dispatch(StageKind::Safety, "transcript", None).await;

        assert!(matches!(result, Err(DispatchError::MalformedPayload { .. })));
    }

    #[tokio::test]
    async fn test_wrong_field_type_is_an_error() {
        let provider = ScriptedProvider::new(Ok(json!({"risk_level": "purple"})));
        let dispatcher = dispatcher(provider, Arc::new(CostTracker::default()));

        let result: Result<StageOutput<SafetyFindings>, _> =
            dispatcher.dispatch(StageKind::Safety, "transcript", None).await;

        assert!(matches!(result, Err(DispatchError::MalformedPayload { .. })));
    }

    #[test]
    fn test_absent_optional_labels_read_as_none() {
        for absent in ["null", "none", "None", ""] {
            let risk: RiskFindings =
                parse_payload("risk", json!({"coercive_control": absent})).unwrap();
            assert_eq!(risk.coercive_control, None);

            let attachment: AttachmentFindings =
                parse_payload("attachment", json!({"secondary_style": absent})).unwrap();
            assert_eq!(attachment.secondary_style, None);
        }

        let risk: RiskFindings = parse_payload("risk", json!({"coercive_control": null})).unwrap();
        assert_eq!(risk.coercive_control, None);
        let risk: RiskFindings = parse_payload("risk", json!({})).unwrap();
        assert_eq!(risk.coercive_control, None);

        let risk: RiskFindings =
            parse_payload("risk", json!({"coercive_control": "High"})).unwrap();
        assert_eq!(risk.coercive_control, Some(Severity::High));
        let attachment: AttachmentFindings =
            parse_payload("attachment", json!({"secondary_style": "anxious"})).unwrap();
        assert_eq!(attachment.secondary_style, Some(AttachmentStyle::Anxious));

        let result: Result<RiskFindings, _> =
            parse_payload("risk", json!({"coercive_control": "extreme"}));
        assert!(matches!(result, Err(DispatchError::MalformedPayload { .. })));
    }

    #[tokio::test]
    async fn test_transport_failure_propagates_without_retry() {
        let provider = Arc::new(ScriptedProvider::new(Err(CompletionError::Timeout(30))));
        let dispatcher = Dispatcher::new(
            provider.clone(),
            Arc::new(DefaultPrompts),
            Pricing::default(),
            Arc::new(CostTracker::default()),
        );

        let result: Result<StageOutput<SafetyFindings>, _> =
            dispatcher.dispatch(StageKind::Safety, "transcript", None).await;

        let err = result.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(provider.calls(), 1);
    }
}
