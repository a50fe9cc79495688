//! Model invocation.
//!
//! Two backends implement [`ModelClient`]:
//! - [`HttpModelClient`] posts to the Anthropic Messages API and retries
//!   timeouts, connection failures, 429 and 5xx with exponential backoff
//! - [`ClaudeCliClient`] pipes the prompt into the `claude` CLI

use crate::errors::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Retry configuration
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
pub const BACKOFF_MULTIPLIER: u32 = 2; // Exponential backoff

/// Sends a prompt to a model and returns its text response.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str, model_id: &str) -> Result<String, ModelError>;
}

/// Delay before retry number `retry_count` (1-based).
pub fn backoff_delay(initial: Duration, retry_count: u32) -> Duration {
    let factor = BACKOFF_MULTIPLIER.saturating_pow(retry_count.saturating_sub(1));
    initial.saturating_mul(factor)
}

async fn wait_before_retry(initial: Duration, retry_count: u32, max_retries: u32, reason: &str) {
    let delay = backoff_delay(initial, retry_count);
    tracing::warn!(
        retry = retry_count,
        max_retries,
        delay_ms = delay.as_millis() as u64,
        reason,
        "Retrying model request"
    );
    tokio::time::sleep(delay).await;
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Anthropic Messages API client.
pub struct HttpModelClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    max_output_tokens: u32,
    max_retries: u32,
    initial_backoff: Duration,
}

impl HttpModelClient {
    pub fn new(
        api_url: &str,
        api_key: &str,
        request_timeout: Duration,
        max_output_tokens: u32,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            max_output_tokens,
            max_retries,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    async fn wait(&self, retry_count: u32, reason: &str) {
        wait_before_retry(self.initial_backoff, retry_count, self.max_retries, reason).await;
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, prompt: &str, model_id: &str) -> Result<String, ModelError> {
        let body = MessagesRequest {
            model: model_id,
            max_tokens: self.max_output_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };
        let mut retry_count = 0;

        loop {
            let response = match self
                .client
                .post(&self.api_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < self.max_retries {
                        retry_count += 1;
                        self.wait(retry_count, "network").await;
                        continue;
                    }
                    return Err(ModelError::Network(err.to_string()));
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < self.max_retries {
                        retry_count += 1;
                        self.wait(retry_count, "network").await;
                        continue;
                    }
                    return Err(ModelError::Network(err.to_string()));
                }
            };

            if status.is_success() {
                let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
                    ModelError::Server {
                        status: status.as_u16(),
                        message: format!("Unreadable response body: {}", e),
                    }
                })?;
                let reply: String = parsed
                    .content
                    .into_iter()
                    .filter(|b| b.kind == "text")
                    .map(|b| b.text)
                    .collect::<Vec<_>>()
                    .join("\n");
                return Ok(reply);
            }

            let code = status.as_u16();
            if (code == 429 || status.is_server_error()) && retry_count < self.max_retries {
                retry_count += 1;
                self.wait(retry_count, "server").await;
                continue;
            }

            let message = error_message(&text);
            return Err(match code {
                401 | 403 => ModelError::Auth {
                    status: code,
                    message,
                },
                429 | 500..=599 => ModelError::Server {
                    status: code,
                    message,
                },
                _ => ModelError::Client {
                    status: code,
                    message,
                },
            });
        }
    }
}

/// Pull `error.message` out of an API error body, or clip the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| crate::util::truncate_chars(body.trim(), 200))
}

/// Runs `claude --print` with the prompt on stdin.
///
/// Spawn failures and non-zero exits that do not look like login problems
/// are retried with the same backoff as the HTTP client.
pub struct ClaudeCliClient {
    claude_cmd: String,
    project_dir: std::path::PathBuf,
    timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
}

impl ClaudeCliClient {
    pub fn new(
        claude_cmd: &str,
        project_dir: std::path::PathBuf,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            claude_cmd: claude_cmd.to_string(),
            project_dir,
            timeout,
            max_retries,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    async fn invoke(&self, prompt: &str, model_id: &str) -> Result<String, ModelError> {
        let mut child = Command::new(&self.claude_cmd)
            .arg("--print")
            .arg("--model")
            .arg(model_id)
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModelError::Client {
                status: 0,
                message: format!("Failed to spawn {}: {}", self.claude_cmd, e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ModelError::Network(format!("Failed to write prompt: {}", e)))?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ModelError::Network(e.to_string()))?,
            Err(_) => {
                return Err(ModelError::Network(format!(
                    "{} timed out after {} seconds",
                    self.claude_cmd,
                    self.timeout.as_secs()
                )));
            }
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let status = output.status.code().unwrap_or(-1).clamp(0, u16::MAX as i32) as u16;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let lower = stderr.to_lowercase();
        if lower.contains("api key") || lower.contains("login") || lower.contains("unauthorized") {
            Err(ModelError::Auth {
                status,
                message: stderr,
            })
        } else {
            Err(ModelError::Server {
                status,
                message: stderr,
            })
        }
    }
}

#[async_trait]
impl ModelClient for ClaudeCliClient {
    async fn complete(&self, prompt: &str, model_id: &str) -> Result<String, ModelError> {
        let mut retry_count = 0;
        loop {
            match self.invoke(prompt, model_id).await {
                Err(err) if err.is_retryable() && retry_count < self.max_retries => {
                    retry_count += 1;
                    tracing::debug!(error = %err, "claude CLI call failed");
                    wait_before_retry(self.initial_backoff, retry_count, self.max_retries, "cli").await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Script {
        hits: AtomicUsize,
        /// Status returned for each hit; the last entry repeats.
        statuses: Vec<u16>,
    }

    async fn handler(State(script): State<Arc<Script>>, headers: HeaderMap) -> (StatusCode, String) {
        let hit = script.hits.fetch_add(1, Ordering::SeqCst);
        let code = script.statuses[hit.min(script.statuses.len() - 1)];
        if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
            return (StatusCode::UNAUTHORIZED, "missing key".into());
        }
        let body = if code == 200 {
            r#"{"content": [{"type": "text", "text": "patched"}]}"#.to_string()
        } else {
            format!(r#"{{"error": {{"type": "x", "message": "status {}"}}}}"#, code)
        };
        (StatusCode::from_u16(code).unwrap(), body)
    }

    async fn serve(statuses: Vec<u16>) -> (String, Arc<Script>) {
        let script = Arc::new(Script {
            hits: AtomicUsize::new(0),
            statuses,
        });
        let app = Router::new()
            .route("/v1/messages", post(handler))
            .with_state(script.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1/messages", addr), script)
    }

    fn client(url: &str, key: &str) -> HttpModelClient {
        HttpModelClient::new(url, key, Duration::from_secs(5), 1024, 3)
            .unwrap()
            .with_initial_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_success() {
        let (url, script) = serve(vec![200]).await;
        let reply = client(&url, "test-key").complete("fix it", "m").await.unwrap();
        assert_eq!(reply, "patched");
        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (url, script) = serve(vec![503, 429, 200]).await;
        let reply = client(&url, "test-key").complete("fix it", "m").await.unwrap();
        assert_eq!(reply, "patched");
        assert_eq!(script.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (url, script) = serve(vec![500]).await;
        let err = client(&url, "test-key").complete("fix it", "m").await.unwrap_err();
        assert!(matches!(err, ModelError::Server { status: 500, .. }));
        assert!(err.is_retryable());
        assert_eq!(script.hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let (url, script) = serve(vec![200]).await;
        let err = client(&url, "wrong").complete("fix it", "m").await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let (url, script) = serve(vec![400]).await;
        let err = client(&url, "test-key").complete("fix it", "m").await.unwrap_err();
        match err {
            ModelError::Client { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "status 400");
            }
            other => panic!("expected client error, got {other:?}"),
        }
        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(&format!("http://{}/v1/messages", addr), "k")
            .complete("p", "m")
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Network(_)));
    }

    #[test]
    fn test_backoff_delay() {
        let initial = Duration::from_millis(INITIAL_BACKOFF_MS);
        assert_eq!(backoff_delay(initial, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(initial, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(initial, 3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_claude_cli_backend() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\necho \"reply for $3\"\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let client = ClaudeCliClient::new(
            &script.to_string_lossy(),
            dir.path().to_path_buf(),
            Duration::from_secs(10),
            0,
        );
        let reply = client.complete("prompt", "claude-sonnet-4").await.unwrap();
        assert_eq!(reply.trim(), "reply for claude-sonnet-4");

        let missing = ClaudeCliClient::new("/nonexistent/claude", dir.path().to_path_buf(), Duration::from_secs(1), 3);
        assert!(missing.complete("p", "m").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_claude_cli_transient_failure_is_retried() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("flaky-claude");
        // Fails on the first call, succeeds once the marker exists.
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\nif [ -f called ]; then echo recovered; exit 0; fi\ntouch called\necho 'overloaded' >&2\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = ClaudeCliClient::new(
            &script.to_string_lossy(),
            dir.path().to_path_buf(),
            Duration::from_secs(10),
            2,
        )
        .with_initial_backoff(Duration::from_millis(5));
        let reply = client.complete("prompt", "m").await.unwrap();
        assert_eq!(reply.trim(), "recovered");

        std::fs::remove_file(dir.path().join("called")).unwrap();
        let no_retries = ClaudeCliClient::new(
            &script.to_string_lossy(),
            dir.path().to_path_buf(),
            Duration::from_secs(10),
            0,
        );
        let err = no_retries.complete("prompt", "m").await.unwrap_err();
        assert!(matches!(err, ModelError::Server { status: 1, .. }));
    }
}
