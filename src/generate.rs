//! Answer generation: prompt, provider call under retry, parse.

use std::sync::Arc;

use crate::error::GenerationError;
use crate::llm::CompletionProvider;
use crate::models::{Chunk, DialogTurn, StructuredAnswer};
use crate::prompt::{build_messages, parse_completion};
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn CompletionProvider>,
    retry: RetryPolicy,
}

impl Generator {
    pub fn new(provider: Arc<dyn CompletionProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Generate an answer for `query`.
    ///
    /// An empty `context` still results in a provider call so the model
    /// can apply its refusal rule.
    ///
    /// # Errors
    ///
    /// [`GenerationError::Exhausted`] once the retry budget is spent or the
    /// provider fails permanently.
    pub async fn generate(
        &self,
        query: &str,
        context: &[Chunk],
        history: &[DialogTurn],
    ) -> Result<StructuredAnswer, GenerationError> {
        let messages = build_messages(query, context, history);
        let label = format!("{} completion", self.provider.name());

        let completion = self
            .retry
            .run(&label, || self.provider.complete(&messages))
            .await?;

        let answer = parse_completion(&completion);
        if answer.tier.is_fallback() {
            tracing::info!(
                provider = self.provider.name(),
                tier = ?answer.tier,
                "structured output missing, used fallback parser"
            );
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::llm::{Completion, Message, Role};
    use crate::models::ParseTier;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedProvider {
        failures_before_success: u32,
        calls: AtomicU32,
        response: Completion,
        last_messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[Message]) -> Result<Completion, ProviderError> {
            *self.last_messages.lock().unwrap() = messages.to_vec();
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                return Err(ProviderError::Status {
                    provider: "scripted".into(),
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(self.response.clone())
        }
    }

    fn scripted(failures: u32, response: Completion) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            failures_before_success: failures,
            calls: AtomicU32::new(0),
            response,
            last_messages: Mutex::new(Vec::new()),
        })
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(5))
            .with_max_backoff(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_retries_then_parses() {
        let provider = scripted(
            2,
            Completion::Structured {
                rationale: "r".into(),
                answer: "a".into(),
                raw: String::new(),
            },
        );
        let gen = Generator::new(provider.clone(), fast_retry());
        assert_eq!(gen.provider_name(), "scripted");
        let answer = gen.generate("q", &[], &[]).await.unwrap();
        assert_eq!(answer.answer, "a");
        assert_eq!(answer.tier, ParseTier::Native);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_context_still_calls_provider() {
        let provider = scripted(0, Completion::Raw(crate::prompt::REFUSAL.into()));
        let gen = Generator::new(provider.clone(), fast_retry());
        let answer = gen.generate("what is the weather?", &[], &[]).await.unwrap();
        assert_eq!(answer.answer, crate::prompt::REFUSAL);
        assert_eq!(answer.tier, ParseTier::RawText);

        let sent = provider.last_messages.lock().unwrap().clone();
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_error() {
        let provider = scripted(u32::MAX, Completion::Raw(String::new()));
        let gen = Generator::new(provider.clone(), fast_retry());
        let err = gen.generate("q", &[], &[]).await.unwrap_err();
        let GenerationError::Exhausted(failure) = err;
        assert!(failure.attempts > 1);
    }
}
