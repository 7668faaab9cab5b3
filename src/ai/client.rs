//! OpenAI-compatible client: chat completions, training file uploads and
//! fine-tuning jobs.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::with_timeout;

/// Chat completions client for any OpenAI-compatible endpoint
#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

/// A file accepted by the provider's files endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub bytes: u64,
}

#[derive(Serialize)]
struct FineTuneRequest<'a> {
    training_file: &'a str,
    model: &'a str,
    suffix: &'a str,
}

/// Fine-tuning job as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FineTuneJob {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub model: String,
    /// Set once the job has succeeded
    #[serde(default)]
    pub fine_tuned_model: Option<String>,
    #[serde(default)]
    pub training_file: String,
}

impl CompletionClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Completion {
                status: None,
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            max_tokens,
            timeout,
        })
    }

    /// Send a system + user prompt pair and return the first choice.
    pub async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let chat_response: ChatResponse = self
            .send(
                "chat completion",
                self.client
                    .post(format!("{}/chat/completions", self.base_url))
                    .json(&request),
            )
            .await?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Completion {
                status: None,
                message: "no response content".to_string(),
            })?;

        Ok(Completion {
            content,
            model: self.model.clone(),
            usage: chat_response.usage.unwrap_or_default(),
        })
    }

    /// Upload a JSON-lines training set with purpose `fine-tune`.
    pub async fn upload_training_file(
        &self,
        filename: &str,
        contents: Vec<u8>,
    ) -> Result<UploadedFile> {
        let part = Part::bytes(contents)
            .file_name(filename.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| Error::Completion {
                status: None,
                message: e.to_string(),
            })?;
        let form = Form::new().text("purpose", "fine-tune").part("file", part);

        self.send(
            "training file upload",
            self.client
                .post(format!("{}/files", self.base_url))
                .multipart(form),
        )
        .await
    }

    /// Start a fine-tuning job on an uploaded training file.
    pub async fn create_fine_tune(
        &self,
        training_file: &str,
        base_model: &str,
        suffix: &str,
    ) -> Result<FineTuneJob> {
        let request = FineTuneRequest {
            training_file,
            model: base_model,
            suffix,
        };

        self.send(
            "fine-tune creation",
            self.client
                .post(format!("{}/fine_tuning/jobs", self.base_url))
                .json(&request),
        )
        .await
    }

    pub async fn get_fine_tune(&self, job_id: &str) -> Result<FineTuneJob> {
        self.send(
            "fine-tune lookup",
            self.client
                .get(format!("{}/fine_tuning/jobs/{}", self.base_url, job_id)),
        )
        .await
    }

    /// Authenticate, send and decode, bounded by the client timeout.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        let exchange = async {
            let response = request
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| match Error::transport(operation, self.timeout, e) {
                    Error::Transport { message, .. } => Error::Completion {
                        status: None,
                        message,
                    },
                    other => other,
                })?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(Error::Completion {
                    status: Some(status.as_u16()),
                    message: error_text,
                });
            }

            response
                .json::<T>()
                .await
                .map_err(|e| Error::InvalidResponse {
                    operation,
                    message: e.to_string(),
                })
        };

        with_timeout(operation, self.timeout, exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{
        body_partial_json, body_string_contains, header, header_regex, method, path,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CompletionClient {
        CompletionClient::new(
            &format!("{}/v1", server.uri()),
            "sk-test",
            "gpt-3.5-turbo",
            0.7,
            500,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_returns_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-3.5-turbo",
                "max_tokens": 500,
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hello" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "  Hi there  " } }],
                "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = client(&server).complete("be brief", "hello").await.unwrap();

        assert_eq!(completion.content, "  Hi there  ");
        assert_eq!(completion.model, "gpt-3.5-turbo");
        assert_eq!(
            completion.usage,
            Usage {
                prompt_tokens: 12,
                completion_tokens: 3
            }
        );
    }

    #[tokio::test]
    async fn test_provider_error_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client(&server).complete("s", "u").await.unwrap_err();

        assert!(matches!(err, Error::Completion { status: Some(429), .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let err = client(&server).complete("s", "u").await.unwrap_err();
        assert!(matches!(err, Error::Completion { status: None, .. }));
    }

    #[tokio::test]
    async fn test_upload_training_file_is_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/files"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(header_regex("content-type", "^multipart/form-data; boundary="))
            .and(body_string_contains("name=\"purpose\""))
            .and(body_string_contains("fine-tune"))
            .and(body_string_contains("filename=\"training.jsonl\""))
            .and(body_string_contains(r#"{"messages":[]}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "file-abc123",
                "object": "file",
                "bytes": 16,
                "filename": "training.jsonl",
                "purpose": "fine-tune"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = client(&server)
            .upload_training_file("training.jsonl", br#"{"messages":[]}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(file.id, "file-abc123");
        assert_eq!(file.filename, "training.jsonl");
        assert_eq!(file.bytes, 16);
    }

    #[tokio::test]
    async fn test_create_and_get_fine_tune() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/fine_tuning/jobs"))
            .and(body_partial_json(serde_json::json!({
                "training_file": "file-abc123",
                "model": "gpt-3.5-turbo",
                "suffix": "b2b-sales-email-replies"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "ftjob-1",
                "object": "fine_tuning.job",
                "status": "validating_files",
                "model": "gpt-3.5-turbo",
                "fine_tuned_model": null,
                "training_file": "file-abc123"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/fine_tuning/jobs/ftjob-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "ftjob-1",
                "status": "succeeded",
                "model": "gpt-3.5-turbo",
                "fine_tuned_model": "ft:gpt-3.5-turbo:contoso:b2b-sales-email-replies:abc",
                "training_file": "file-abc123"
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let job = client
            .create_fine_tune("file-abc123", "gpt-3.5-turbo", "b2b-sales-email-replies")
            .await
            .unwrap();
        assert_eq!(job.id, "ftjob-1");
        assert_eq!(job.status, "validating_files");
        assert!(job.fine_tuned_model.is_none());

        let job = client.get_fine_tune("ftjob-1").await.unwrap();
        assert_eq!(job.status, "succeeded");
        assert_eq!(
            job.fine_tuned_model.as_deref(),
            Some("ft:gpt-3.5-turbo:contoso:b2b-sales-email-replies:abc")
        );
    }

    #[tokio::test]
    async fn test_rejected_upload_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/files"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid file format"))
            .mount(&server)
            .await;

        let err = client(&server)
            .upload_training_file("training.jsonl", b"not jsonl".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Completion { status: Some(400), ref message } if message == "invalid file format"));
        assert!(!err.is_retriable());
    }
}
