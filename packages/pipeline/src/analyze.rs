// ABOUTME: LLM-backed vulnerability analysis over rendered recon reports
// ABOUTME: Tolerant of malformed model output, degrades to zero findings

use pentra_models::Finding;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Recon reports can run long; the prompt keeps only this many characters.
const MAX_REPORT_CHARS: usize = 16_000;

const SYSTEM_PROMPT: &str = "You are a penetration testing assistant. Given raw \
reconnaissance tool output, identify likely vulnerabilities. Respond with a JSON \
array only, no prose. Each element: {\"type\": string, \"endpoint\": string, \
\"param\": string or null, \"severity\": one of info|low|medium|high|critical, \
\"description\": string}.";

const PATCH_SYSTEM_PROMPT: &str = "You are a security engineer. Given a confirmed \
vulnerability, produce a minimal source patch. Respond with JSON only: \
{\"file_path\": string, \"content\": string, \"summary\": string}.";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Analyzer API key is missing or a placeholder")]
    NoApiKey,

    #[error("Failed to build analyzer HTTP client: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
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
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// A proposed fix for one vulnerability.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PatchSuggestion {
    pub file_path: String,
    pub content: String,
    #[serde(default)]
    pub summary: String,
}

/// Vulnerability analyzer backed by an OpenAI-compatible chat endpoint.
///
/// The model sits behind an HTTP boundary and routinely returns imperfect
/// output; every failure mode here degrades to "no findings" rather than
/// sinking the run. Partial recon data in, best-effort findings out.
pub struct VulnAnalyzer {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl VulnAnalyzer {
    pub fn new(api_key: String, api_url: Option<String>, model: Option<String>) -> Result<Self> {
        if pentra_sandbox::config::is_placeholder(&api_key) {
            return Err(AnalyzerError::NoApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AnalyzerError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            api_url: api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Analyze a rendered recon report. Never fails: transport errors, API
    /// errors, and unparseable model output all collapse to an empty list
    /// so the pipeline keeps whatever it already has.
    pub async fn analyze(&self, report: &str) -> Vec<Finding> {
        if report.trim().is_empty() {
            return Vec::new();
        }

        let prompt = format!(
            "Reconnaissance output:\n\n{}",
            clamp(report, MAX_REPORT_CHARS)
        );

        let Some(text) = self.chat(SYSTEM_PROMPT, &prompt).await else {
            return Vec::new();
        };

        let json_text = strip_fences(&text);
        match serde_json::from_str::<Vec<Finding>>(json_text) {
            Ok(findings) => {
                info!(count = findings.len(), "Analyzer returned findings");
                findings
            }
            Err(e) => {
                warn!(
                    "Analyzer output was not a findings array: {}. Snippet: {}",
                    e,
                    clamp(json_text, 300)
                );
                Vec::new()
            }
        }
    }

    /// Ask for a minimal patch for one confirmed vulnerability. Same
    /// degradation rules as `analyze`: any failure means no suggestion.
    pub async fn suggest_patch(
        &self,
        vuln_type: &str,
        endpoint: &str,
        param: Option<&str>,
        description: Option<&str>,
    ) -> Option<PatchSuggestion> {
        let prompt = format!(
            "Vulnerability: {}\nEndpoint: {}\nParameter: {}\nDetails: {}",
            vuln_type,
            endpoint,
            param.unwrap_or("n/a"),
            description.unwrap_or("none")
        );

        let text = self.chat(PATCH_SYSTEM_PROMPT, &prompt).await?;
        let json_text = strip_fences(&text);
        match serde_json::from_str::<PatchSuggestion>(json_text) {
            Ok(suggestion) if !suggestion.file_path.is_empty() => Some(suggestion),
            Ok(_) => {
                warn!("Patch suggestion had no file path, discarding");
                None
            }
            Err(e) => {
                warn!("Patch suggestion was not valid JSON: {}", e);
                None
            }
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Option<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: DEFAULT_TEMPERATURE,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let url = format!("{}/chat/completions", self.api_url);
        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Analyzer request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Analyzer API returned {}: {}", status, clamp(&body, 300));
            return None;
        }

        let parsed: ChatResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Malformed analyzer response: {}", e);
                return None;
            }
        };

        parsed.choices.into_iter().next().map(|c| c.message.content)
    }
}

/// Strip markdown code fences if present (```json ... ```).
fn strip_fences(text: &str) -> &str {
    let cleaned = text.trim();
    if !cleaned.starts_with("```") {
        return cleaned;
    }
    let start = cleaned.find('\n').map(|i| i + 1).unwrap_or(0);
    let end = cleaned[start..]
        .rfind("```")
        .map(|i| i + start)
        .unwrap_or(cleaned.len());
    cleaned[start..end].trim()
}

fn clamp(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pentra_models::Severity;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn analyzer_for(server: &MockServer) -> VulnAnalyzer {
        VulnAnalyzer::new(
            "sk-test-key".to_string(),
            Some(server.uri()),
            Some("test-model".to_string()),
        )
        .unwrap()
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    #[test]
    fn placeholder_key_is_rejected() {
        assert!(matches!(
            VulnAnalyzer::new("your-api-key-here".to_string(), None, None),
            Err(AnalyzerError::NoApiKey)
        ));
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_fences("[]"), "[]");
        assert_eq!(strip_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[tokio::test]
    async fn parses_findings_from_fenced_json() {
        let server = MockServer::start().await;
        let content = "```json\n[{\"type\": \"SQLi\", \"endpoint\": \"/login.php\", \
                       \"param\": \"username\", \"severity\": \"high\", \
                       \"description\": \"error-based\"}]\n```";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(content)))
            .mount(&server)
            .await;

        let findings = analyzer_for(&server).analyze("## port_scan\n80/tcp open").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].vuln_type, "SQLi");
        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings[0].is_sqli());
    }

    #[tokio::test]
    async fn unparseable_output_yields_no_findings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body("I could not find any vulnerabilities, sorry!")),
            )
            .mount(&server)
            .await;

        let findings = analyzer_for(&server).analyze("recon text").await;
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn api_error_yields_no_findings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let findings = analyzer_for(&server).analyze("recon text").await;
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn empty_report_skips_the_call() {
        let server = MockServer::start().await;
        // No mock mounted: a request would 404 and log, but none is made.
        let findings = analyzer_for(&server).analyze("   ").await;
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn patch_suggestion_round_trip() {
        let server = MockServer::start().await;
        let content = "```json\n{\"file_path\": \"app/login.php\", \
                       \"content\": \"<?php // fixed\", \
                       \"summary\": \"parameterized query\"}\n```";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(content)))
            .mount(&server)
            .await;

        let suggestion = analyzer_for(&server)
            .suggest_patch("SQLi", "/login.php", Some("username"), None)
            .await
            .unwrap();
        assert_eq!(suggestion.file_path, "app/login.php");
        assert_eq!(suggestion.summary, "parameterized query");
    }
}
