use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::stream::{NdjsonDecoder, StreamItem};
use crate::transcript::ChatMessage;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Ollama request failed with status: {0}. Make sure Ollama is running with: ollama serve")]
    Status(StatusCode),
    #[error("Ollama error: {0}")]
    Server(String),
}

/// Which generation API to stream from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Generate,
    #[default]
    Chat,
}

/// A model as listed by `GET /api/tags`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub model: String,
}

impl ModelDescriptor {
    /// Identifier to send in generation requests
    pub fn id(&self) -> &str {
        &self.model
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    models: Vec<ModelDescriptor>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Everything needed to start one streamed generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRequest {
    Generate { model: String, prompt: String },
    Chat { model: String, messages: Vec<ChatMessage> },
}

impl GenerationRequest {
    pub fn model(&self) -> &str {
        match self {
            GenerationRequest::Generate { model, .. } | GenerationRequest::Chat { model, .. } => model,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub fragments: usize,
    /// The server sent its `done` line before closing
    pub completed: bool,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ClientError> {
        let response = self.client.get(self.url("/api/tags")).send().await?;

        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }

        let models_response: ModelsResponse = response.json().await?;
        let models = models_response
            .models
            .into_iter()
            .map(|mut m| {
                // older servers only send `name`
                if m.model.is_empty() {
                    m.model = m.name.clone();
                }
                m
            })
            .collect::<Vec<_>>();

        info!("listed {} models from {}", models.len(), self.base_url);
        Ok(models)
    }

    /// Whether the server answers at all.
    pub async fn probe(&self) -> bool {
        match self
            .client
            .get(self.url("/api/version"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("probe of {} failed: {}", self.base_url, e);
                false
            }
        }
    }

    /// Stream a generation, calling `on_fragment` with each piece of text as it
    /// arrives. Returns once the server sends its final line or closes the body.
    pub async fn stream<F>(
        &self,
        request: &GenerationRequest,
        mut on_fragment: F,
    ) -> Result<StreamOutcome, ClientError>
    where
        F: FnMut(String),
    {
        let builder = match request {
            GenerationRequest::Generate { model, prompt } => {
                self.client.post(self.url("/api/generate")).json(&GenerateBody {
                    model,
                    prompt,
                    stream: true,
                })
            }
            GenerationRequest::Chat { model, messages } => {
                self.client.post(self.url("/api/chat")).json(&ChatBody {
                    model,
                    messages,
                    stream: true,
                })
            }
        };

        let mut response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => ClientError::Server(body.error),
                Err(_) => ClientError::Status(status),
            });
        }

        let mut decoder = NdjsonDecoder::new();
        let mut outcome = StreamOutcome::default();

        'read: while let Some(chunk) = response.chunk().await? {
            for item in decoder.push(&chunk) {
                if apply_item(item, &mut outcome, &mut on_fragment)? {
                    break 'read;
                }
            }
        }

        if !outcome.completed {
            for item in decoder.finish() {
                if apply_item(item, &mut outcome, &mut on_fragment)? {
                    break;
                }
            }
        }

        if decoder.skipped() > 0 {
            warn!("skipped {} malformed stream lines", decoder.skipped());
        }
        if !outcome.completed {
            warn!("stream from {} closed without a done line", request.model());
        }

        Ok(outcome)
    }
}

/// Returns Ok(true) once the stream is complete.
fn apply_item<F>(
    item: StreamItem,
    outcome: &mut StreamOutcome,
    on_fragment: &mut F,
) -> Result<bool, ClientError>
where
    F: FnMut(String),
{
    match item {
        StreamItem::Fragment(text) => {
            outcome.fragments += 1;
            on_fragment(text);
            Ok(false)
        }
        StreamItem::Done => {
            outcome.completed = true;
            Ok(true)
        }
        StreamItem::ServerError(message) => Err(ClientError::Server(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ChatRole;
    use crate::test_server::{serve_once, split_body};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_list_models() {
        let body = r#"{"models":[{"name":"llama3.2:latest","model":"llama3.2:latest","size":1},{"name":"old:7b"}]}"#;
        let (base_url, _rx) = serve_once("200 OK", vec![body.as_bytes().to_vec()]).await;

        let models = OllamaClient::new(&base_url).list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id(), "llama3.2:latest");
        assert_eq!(models[1].name, "old:7b");
        assert_eq!(models[1].id(), "old:7b");
    }

    #[tokio::test]
    async fn test_list_models_bad_status() {
        let (base_url, _rx) = serve_once("500 Internal Server Error", vec![b"oops".to_vec()]).await;

        let err = OllamaClient::new(&base_url).list_models().await.unwrap_err();
        assert!(matches!(err, ClientError::Status(s) if s == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_generate_stream_split_across_reads() {
        let body = concat!(
            "{\"response\":\"Hello\",\"done\":false}\n",
            "{\"response\":\" wörld\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        );
        // cut inside a JSON object and inside the two-byte 'ö'
        let o_umlaut = body.find('ö').unwrap();
        let pieces = split_body(body, &[10, o_umlaut + 1, body.len() - 3]);
        let (base_url, rx) = serve_once("200 OK", pieces).await;

        let request = GenerationRequest::Generate {
            model: "llama3.2".to_string(),
            prompt: "hi".to_string(),
        };
        let mut text = String::new();
        let outcome = OllamaClient::new(&base_url)
            .stream(&request, |fragment| text.push_str(&fragment))
            .await
            .unwrap();

        assert_eq!(text, "Hello wörld");
        assert!(outcome.completed);
        assert_eq!(outcome.fragments, 2);

        let raw_request = rx.await.unwrap();
        assert!(raw_request.starts_with("POST /api/generate "));
        assert!(raw_request.contains("\"stream\":true"));
        assert!(raw_request.contains("\"prompt\":\"hi\""));
    }

    #[tokio::test]
    async fn test_chat_stream_skips_malformed_line() {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"A\"},\"done\":false}\n",
            "{garbage\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"B\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        let (base_url, rx) = serve_once("200 OK", split_body(body, &[30, 70])).await;

        let request = GenerationRequest::Chat {
            model: "llama3.2".to_string(),
            messages: vec![ChatMessage::new(ChatRole::User, "hi")],
        };
        let mut fragments = Vec::new();
        let outcome = OllamaClient::new(&base_url)
            .stream(&request, |fragment| fragments.push(fragment))
            .await
            .unwrap();

        assert_eq!(fragments, vec!["A".to_string(), "B".to_string()]);
        assert!(outcome.completed);

        let raw_request = rx.await.unwrap();
        assert!(raw_request.starts_with("POST /api/chat "));
        assert!(raw_request.contains(r#""messages":[{"role":"user","content":"hi"}]"#));
    }

    #[tokio::test]
    async fn test_stream_without_done_line() {
        let body = "{\"response\":\"partial\"}";
        let (base_url, _rx) = serve_once("200 OK", vec![body.as_bytes().to_vec()]).await;

        let request = GenerationRequest::Generate {
            model: "m".to_string(),
            prompt: "p".to_string(),
        };
        let mut text = String::new();
        let outcome = OllamaClient::new(&base_url)
            .stream(&request, |fragment| text.push_str(&fragment))
            .await
            .unwrap();

        assert_eq!(text, "partial");
        assert!(!outcome.completed);
    }

    #[tokio::test]
    async fn test_stream_error_line() {
        let body = "{\"response\":\"x\"}\n{\"error\":\"out of memory\"}\n";
        let (base_url, _rx) = serve_once("200 OK", vec![body.as_bytes().to_vec()]).await;

        let request = GenerationRequest::Generate {
            model: "m".to_string(),
            prompt: "p".to_string(),
        };
        let err = OllamaClient::new(&base_url)
            .stream(&request, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Server(ref m) if m == "out of memory"));
    }

    #[tokio::test]
    async fn test_stream_error_status_with_body() {
        let body = r#"{"error":"model 'nope' not found"}"#;
        let (base_url, _rx) = serve_once("404 Not Found", vec![body.as_bytes().to_vec()]).await;

        let request = GenerationRequest::Generate {
            model: "nope".to_string(),
            prompt: "p".to_string(),
        };
        let err = OllamaClient::new(&base_url)
            .stream(&request, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Server(ref m) if m.contains("not found")));
    }

    #[tokio::test]
    async fn test_probe() {
        let (base_url, _rx) = serve_once("200 OK", vec![br#"{"version":"0.5.1"}"#.to_vec()]).await;
        assert!(OllamaClient::new(&base_url).probe().await);

        // nothing listens on a port we bound and released
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!OllamaClient::new(&format!("http://{}", addr)).probe().await);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/");
        assert_eq!(client.base_url(), "http://localhost:11434");
    }
}
