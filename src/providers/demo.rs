use super::*;
use async_trait::async_trait;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::sleep;

/// Offline provider with canned, keyword-selected replies
pub struct DemoProvider {
    responses: Vec<(&'static str, &'static str)>,
    latency: Duration,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self {
            responses: vec![
                ("explain", "This code declares a value and binds it to a name. It has no side effects beyond the assignment."),
                ("fix", "Here is a corrected version:\n\n```\nconst x = 1;\n```\n\nThe declaration now uses an explicit keyword."),
                ("generate", "```\nfunction sortNumbers(values) {\n  return [...values].sort((a, b) => a - b);\n}\n```"),
                ("analy", "The code is small and readable. Consider adding type information and a descriptive name."),
                ("hello", "Hello! I'm DevPilot running in demo mode. Configure a real provider for full answers."),
            ],
            latency: Duration::from_millis(300),
        }
    }

    /// Replace the simulated thinking time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn find_response(&self, input: &str) -> String {
        let input_lower = input.to_lowercase();

        // Look for keyword matches
        for (keyword, response) in &self.responses {
            if input_lower.contains(keyword) {
                return response.to_string();
            }
        }

        format!(
            "I'm running in demo mode with limited capabilities. Your message: \"{}\"",
            input
        )
    }

    fn last_user_message(request: &CompletionRequest) -> &str {
        request.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for DemoProvider {
    fn name(&self) -> &str {
        "demo"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let user_message = Self::last_user_message(&request);
        let response = self.find_response(user_message);

        // Simulate some thinking time
        sleep(self.latency).await;

        let prompt_tokens = self.estimate_tokens(user_message);
        let completion_tokens = self.estimate_tokens(&response);

        Ok(CompletionResponse {
            content: response,
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    async fn stream_complete(&self, request: CompletionRequest) -> Result<ResponseStream> {
        let response = self.find_response(Self::last_user_message(&request));
        let latency = self.latency / 10;

        // Split into words for streaming
        let words: Vec<String> = response
            .split_whitespace()
            .map(|w| format!("{} ", w))
            .collect();

        let stream = stream::iter(words)
            .then(move |word| async move {
                sleep(latency).await;
                Ok::<_, anyhow::Error>(StreamingResponse {
                    delta: word,
                    finish_reason: None,
                })
            })
            .chain(stream::once(async {
                Ok::<_, anyhow::Error>(StreamingResponse {
                    delta: String::new(),
                    finish_reason: Some("stop".to_string()),
                })
            }));

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::system("sys"), Message::user(text)],
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_keyword_reply_and_usage() {
        let provider = DemoProvider::new().with_latency(Duration::ZERO);
        let response = provider.complete(request("Please explain this")).await.unwrap();

        assert!(response.content.starts_with("This code declares"));
        let usage = response.usage.unwrap();
        assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
    }

    #[tokio::test]
    async fn test_stream_ends_with_stop() {
        let provider = DemoProvider::new().with_latency(Duration::ZERO);
        let chunks: Vec<StreamingResponse> = provider
            .stream_complete(request("hello"))
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        let last = chunks.last().unwrap();
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
        let text: String = chunks.iter().map(|c| c.delta.as_str()).collect();
        assert!(text.starts_with("Hello! "));
    }
}
