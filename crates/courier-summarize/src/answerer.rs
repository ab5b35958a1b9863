use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::Level;

use courier_observability::{emit_event, AuditEntry, AuditSink, ObservabilityEvent, ProcessKind};
use courier_providers::{ChatMessage, ProviderRegistry};

use crate::reducer::ChunkAnswerer;

pub const MAIL_SYSTEM_PROMPT: &str = "You are an assistant that answers questions about the user's recent emails based only on the snippets provided.";

/// Answers mail questions through the provider registry, one chat call per
/// piece of text.
pub struct ProviderAnswerer {
    registry: ProviderRegistry,
    audit: Arc<dyn AuditSink>,
    provider_id: Option<String>,
    model_id: Option<String>,
    process: ProcessKind,
}

impl ProviderAnswerer {
    pub fn new(registry: ProviderRegistry, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            registry,
            audit,
            provider_id: None,
            model_id: None,
            process: ProcessKind::Cli,
        }
    }

    pub fn with_provider(mut self, provider_id: Option<String>) -> Self {
        self.provider_id = provider_id;
        self
    }

    pub fn with_model(mut self, model_id: Option<String>) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn for_process(mut self, process: ProcessKind) -> Self {
        self.process = process;
        self
    }

    pub fn messages(question: &str, text: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(MAIL_SYSTEM_PROMPT),
            ChatMessage::user(format!("Emails:\n{text}\n\nQuestion: {question}")),
        ]
    }
}

#[async_trait]
impl ChunkAnswerer for ProviderAnswerer {
    async fn answer(&self, question: &str, text: &str) -> anyhow::Result<String> {
        let messages = Self::messages(question, text);
        let result = self
            .registry
            .complete_for_provider(
                self.provider_id.as_deref(),
                &messages,
                self.model_id.as_deref(),
            )
            .await;

        let request = json!({ "question": question });
        match result {
            Ok(answer) => {
                let answer = answer.trim().to_string();
                self.audit.record(AuditEntry::redacted(
                    "llm_chat",
                    &request,
                    &Value::String(answer.clone()),
                ));
                emit_event(
                    Level::INFO,
                    self.process,
                    ObservabilityEvent {
                        event: "llm.answer",
                        component: "summarize",
                        provider_id: self.provider_id.as_deref(),
                        model_id: self.model_id.as_deref(),
                        status: Some("ok"),
                        ..Default::default()
                    },
                );
                Ok(answer)
            }
            Err(err) => {
                let detail = err.to_string();
                self.audit.record(AuditEntry::redacted(
                    "llm_chat",
                    &request,
                    &json!({ "error": detail }),
                ));
                emit_event(
                    Level::WARN,
                    self.process,
                    ObservabilityEvent {
                        event: "llm.answer",
                        component: "summarize",
                        provider_id: self.provider_id.as_deref(),
                        model_id: self.model_id.as_deref(),
                        status: Some("failed"),
                        error_code: Some("answering"),
                        detail: Some(&detail),
                        ..Default::default()
                    },
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_observability::MemoryAuditSink;
    use courier_providers::LocalEchoProvider;

    #[tokio::test]
    async fn echo_provider_answers_and_audits_the_question() {
        let registry = ProviderRegistry::from_providers(vec![Arc::new(LocalEchoProvider)], None);
        let audit = Arc::new(MemoryAuditSink::default());
        let answerer = ProviderAnswerer::new(registry, audit.clone());
        let answer = answerer
            .answer("who wrote?", "From: a\nSubject: Hi")
            .await
            .expect("answer");
        assert!(answer.starts_with("Echo: Emails:\nFrom: a"));
        assert!(answer.ends_with("Question: who wrote?"));
        let entry = audit.entries().pop().expect("audited");
        assert_eq!(entry.name, "llm_chat");
        assert_eq!(entry.request, json!({"question": "who wrote?"}));
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error_and_still_audited() {
        let registry = ProviderRegistry::from_providers(vec![Arc::new(LocalEchoProvider)], None);
        let audit = Arc::new(MemoryAuditSink::default());
        let answerer =
            ProviderAnswerer::new(registry, audit.clone()).with_provider(Some("nope".to_string()));
        let err = answerer.answer("q", "t").await.expect_err("unknown provider");
        assert!(err.to_string().contains("provider `nope` is not configured"));
        assert_eq!(audit.names(), vec!["llm_chat".to_string()]);
    }

    #[test]
    fn prompt_layout() {
        let messages = ProviderAnswerer::messages("What's new?", "block");
        assert_eq!(messages[0].content, MAIL_SYSTEM_PROMPT);
        assert_eq!(messages[1].content, "Emails:\nblock\n\nQuestion: What's new?");
    }
}
