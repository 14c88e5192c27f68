use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{Summary, SummarizerGateway};
use crate::error::SummarizationError;
use crate::models::truncate_chars;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a financial compliance analyst covering Hong Kong regulators.

Summarize the regulatory announcement you are given for compliance officers:
- State what was announced and by whom
- Name the affected firms, products or licence types
- List obligations, deadlines and effective dates
- Note enforcement outcomes such as fines, bans or reprimands

Write plain prose without headings. Do not speculate beyond the text.
Answer in the language of the announcement."#;

/// Summarizer backed by any OpenAI-compatible chat completions endpoint
/// (OpenRouter by default)
pub struct OpenAiCompatibleSummarizer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompatibleSummarizer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    fn build_user_prompt(&self, text: &str, max_length: Option<usize>) -> String {
        match max_length {
            Some(max) => format!(
                "Summarize the following announcement in at most {max} characters.\n\n{text}"
            ),
            None => format!("Summarize the following announcement.\n\n{text}"),
        }
    }
}

#[async_trait]
impl SummarizerGateway for OpenAiCompatibleSummarizer {
    #[instrument(skip(self, text), fields(model = %self.model, input_chars = text.chars().count()))]
    async fn summarize(&self, text: &str, max_length: Option<usize>) -> Result<Summary, SummarizationError> {
        if text.trim().is_empty() {
            return Err(SummarizationError::permanent("empty input"));
        }

        let user_prompt = self.build_user_prompt(text, max_length);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
        };

        debug!("Sending request to chat completions endpoint");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SummarizationError::from_status(status.as_u16(), &error_text));
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| SummarizationError::permanent(format!("unparseable response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(SummarizationError::permanent("empty summary"));
        }

        let text = match max_length {
            Some(max) => truncate_chars(&content, max).to_string(),
            None => content,
        };

        info!(summary_chars = text.chars().count(), "Summary generated");

        Ok(Summary { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summarizer(server: &MockServer) -> OpenAiCompatibleSummarizer {
        OpenAiCompatibleSummarizer::new("test-key".to_string())
            .with_base_url(&format!("{}/api/v1/", server.uri()))
            .with_model("test/model")
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "gen-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    #[tokio::test]
    async fn test_summarize_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "model": "test/model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  The SFC issued guidance.  ")))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer(&server).summarize("Full announcement text", None).await.unwrap();
        assert_eq!(summary.text, "The SFC issued guidance.");
    }

    #[tokio::test]
    async fn test_summary_is_capped_at_max_length() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("證監會發出通函要求持牌法團")))
            .mount(&server)
            .await;

        let summary = summarizer(&server).summarize("text", Some(3)).await.unwrap();
        assert_eq!(summary.text, "證監會");
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = summarizer(&server).summarize("text", None).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_auth_failure_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let err = summarizer(&server).summarize("text", None).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_empty_and_malformed_responses_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;
        let err = summarizer(&server).summarize("text", None).await.unwrap_err();
        assert_eq!(err, SummarizationError::permanent("empty summary"));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;
        let err = summarizer(&server).summarize("text", None).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_blank_input_never_calls_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("x")))
            .expect(0)
            .mount(&server)
            .await;

        let err = summarizer(&server).summarize("   ", None).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
