//! Theme generation with an LLM.
//!
//! Sends one prompt per cluster to an OpenAI-compatible chat endpoint,
//! parses the `{"themes": [...]}` replies and stores the collected themes as
//! the survey's description document.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use microdata_types::{ClusterId, EnrichmentArtifact, LlmSettings};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ThemesError;
use crate::prompts::{build_prompts, sort_by_token_count_desc, ChatMessage, DEFAULT_THEME_SYSTEM_MESSAGE};
use crate::storage::ThemeStorage;
use crate::tokens::TokenCounter;

/// Chat completion backend.
#[async_trait]
pub trait ThemeClient: Send + Sync {
    /// Model identifier recorded in descriptions.
    fn model(&self) -> &str;

    /// Complete a conversation and return the assistant's text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ThemesError>;
}

/// Configuration for [`ApiThemeClient`].
#[derive(Debug, Clone)]
pub struct ApiThemeClientConfig {
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,

    pub model: String,

    pub api_key: SecretString,

    pub timeout: Duration,

    /// Maximum attempts per completion
    pub max_retries: u32,

    /// First retry delay
    pub initial_interval: Duration,
}

impl ApiThemeClientConfig {
    /// Create config for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            api_key: SecretString::from(api_key.into()),
            timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
        }
    }

    /// Build from settings; an API key is required.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, ThemesError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ThemesError::Config("llm.api_key is required for theme generation".to_string())
            })?;
        Ok(Self {
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: SecretString::from(api_key),
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
            initial_interval: Duration::from_millis(500),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

enum RequestError {
    /// Worth retrying (network, rate limit, server error)
    Transient(String),
    Fatal(String),
}

/// OpenAI-compatible chat completion client.
pub struct ApiThemeClient {
    client: Client,
    config: ApiThemeClientConfig,
}

impl ApiThemeClient {
    pub fn new(config: ApiThemeClientConfig) -> Result<Self, ThemesError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ThemesError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn make_request(&self, messages: &[ChatMessage]) -> Result<String, RequestError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            response_format: ResponseFormat,
        }

        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            format_type: &'static str,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            content: Option<String>,
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| RequestError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(RequestError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RequestError::Fatal(format!("HTTP {}: {}", status, body)));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| RequestError::Fatal(format!("invalid completion body: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RequestError::Fatal("no choices in response".to_string()))
    }
}

#[async_trait]
impl ThemeClient for ApiThemeClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ThemesError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_interval)
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .build();

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, model = %self.config.model, "Calling chat completion API");

            match self.make_request(messages).await {
                Ok(text) => return Ok(text),
                Err(RequestError::Fatal(msg)) => return Err(ThemesError::Llm(msg)),
                Err(RequestError::Transient(msg)) => {
                    if attempts >= self.config.max_retries.max(1) {
                        error!(error = %msg, attempts, "Max retries exceeded");
                        return Err(ThemesError::Llm(msg));
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %msg,
                                retry_in_ms = duration.as_millis(),
                                "API call failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(error = %msg, "Backoff exhausted");
                            return Err(ThemesError::Llm(msg));
                        }
                    }
                }
            }
        }
    }
}

/// One theme named by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    #[serde(alias = "name", alias = "title")]
    pub theme: String,

    #[serde(default)]
    pub description: String,

    /// Labels the model placed under this theme
    #[serde(default, alias = "variables")]
    pub labels: Vec<String>,
}

/// Themes generated for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterThemes {
    pub cluster_id: ClusterId,
    pub token_count: usize,
    pub themes: Vec<Theme>,
}

/// The description document of one survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeDescription {
    pub idno: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,

    /// In ascending cluster id order
    pub clusters: Vec<ClusterThemes>,
}

impl ThemeDescription {
    /// All themes across clusters.
    pub fn themes(&self) -> impl Iterator<Item = &Theme> {
        self.clusters.iter().flat_map(|c| c.themes.iter())
    }
}

/// Parse a completion into themes.
///
/// Accepts a `{"themes": [...]}` object, optionally wrapped in a markdown
/// code block or surrounded by prose, or a bare array of themes.
pub fn parse_theme_response(text: &str) -> Result<Vec<Theme>, ThemesError> {
    #[derive(Deserialize)]
    struct Envelope {
        themes: Vec<Theme>,
    }

    let body = code_block(text).unwrap_or_else(|| text.trim());
    if body.starts_with('[') {
        if let Ok(themes) = serde_json::from_str::<Vec<Theme>>(body) {
            return Ok(themes);
        }
    }
    if let Ok(envelope) = serde_json::from_str::<Envelope>(outer_object(body)) {
        return Ok(envelope.themes);
    }

    let preview: String = text.chars().take(120).collect();
    Err(ThemesError::Parse(format!("no themes object in response: {preview:?}")))
}

/// Contents of the first markdown code block, if any.
fn code_block(text: &str) -> Option<&str> {
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let rest = &text[start + fence.len()..];
            if let Some(end) = rest.find("```") {
                return Some(rest[..end].trim());
            }
        }
    }
    None
}

/// Span from the first `{` to the last `}`.
fn outer_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Generates and stores theme descriptions from cluster artifacts.
pub struct ThemeGenerator {
    client: Arc<dyn ThemeClient>,
    counter: Arc<dyn TokenCounter>,
    storage: ThemeStorage,
    system_message: String,
}

impl ThemeGenerator {
    pub fn new(
        client: Arc<dyn ThemeClient>,
        counter: Arc<dyn TokenCounter>,
        storage: ThemeStorage,
    ) -> Self {
        Self {
            client,
            counter,
            storage,
            system_message: DEFAULT_THEME_SYSTEM_MESSAGE.to_string(),
        }
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = system_message.into();
        self
    }

    /// Name the themes of every cluster in `artifact` and persist the result.
    ///
    /// Prompts are sent largest first. Any failed cluster fails the run and
    /// nothing is written.
    #[instrument(skip(self, artifact), fields(clusters = artifact.cluster_count()))]
    pub async fn describe(
        &self,
        idno: &str,
        artifact: &EnrichmentArtifact,
    ) -> Result<ThemeDescription, ThemesError> {
        let mut prompts = build_prompts(artifact, &self.system_message, self.counter.as_ref());
        sort_by_token_count_desc(&mut prompts);

        let mut clusters = Vec::with_capacity(prompts.len());
        for prompt in &prompts {
            debug!(cluster = %prompt.cluster_id, tokens = prompt.token_count, "Requesting themes");
            let reply = self.client.complete(&prompt.messages).await?;
            let themes = parse_theme_response(&reply)?;
            clusters.push(ClusterThemes {
                cluster_id: prompt.cluster_id,
                token_count: prompt.token_count,
                themes,
            });
        }
        clusters.sort_by_key(|c| c.cluster_id);

        let description = ThemeDescription {
            idno: idno.to_string(),
            model: self.client.model().to_string(),
            generated_at: Utc::now(),
            clusters,
        };
        self.storage.save_description(&description)?;

        info!(
            idno,
            themes = description.themes().count(),
            "Theme description stored"
        );
        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microdata_types::{ClusterAssignment, LabelGroup};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    /// Replies with one theme named after the first label; records payloads.
    #[derive(Default)]
    struct EchoClient {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ThemeClient for EchoClient {
        fn model(&self) -> &str {
            "echo"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ThemesError> {
            let payload = messages[1].content.clone();
            self.seen.lock().unwrap().push(payload.clone());
            let first = payload.trim_start_matches("!!").split("!!").next().unwrap_or("");
            Ok(json!({"themes": [{"theme": first, "description": "d", "labels": [first]}]}).to_string())
        }
    }

    struct GarbageClient;

    #[async_trait]
    impl ThemeClient for GarbageClient {
        fn model(&self) -> &str {
            "garbage"
        }

        async fn complete(&self, _: &[ChatMessage]) -> Result<String, ThemesError> {
            Ok("I cannot help with that.".to_string())
        }
    }

    fn artifact() -> EnrichmentArtifact {
        let group = |labels: &[&str]| -> LabelGroup {
            labels.iter().map(|l| (l.to_string(), vec![l.to_string()])).collect()
        };
        let mut cluster = ClusterAssignment::new();
        cluster.insert(ClusterId(0), group(&["Age"]));
        cluster.insert(ClusterId(1), group(&["Crop area", "Crop yield"]));
        EnrichmentArtifact::new("S1", 5, "!!", cluster)
    }

    fn test_config(base_url: String) -> ApiThemeClientConfig {
        ApiThemeClientConfig {
            initial_interval: Duration::from_millis(1),
            ..ApiThemeClientConfig::openai("sk-test", "gpt-3.5-turbo").with_base_url(base_url)
        }
    }

    #[test]
    fn test_parse_plain_object() {
        let themes = parse_theme_response(
            r#"{"themes": [{"theme": "Demographics", "description": "Who", "labels": ["Age"]}]}"#,
        )
        .unwrap();
        assert_eq!(themes.len(), 1);
        assert_eq!(themes[0].theme, "Demographics");
        assert_eq!(themes[0].labels, vec!["Age"]);
    }

    #[test]
    fn test_parse_code_block_and_aliases() {
        let text = "Here you go:\n```json\n{\"themes\": [{\"name\": \"Agriculture\"}]}\n```\nThanks";
        let themes = parse_theme_response(text).unwrap();
        assert_eq!(themes[0].theme, "Agriculture");
        assert!(themes[0].description.is_empty());
    }

    #[test]
    fn test_parse_bare_array() {
        let themes = parse_theme_response(r#"[{"theme": "Housing"}, {"theme": "Water"}]"#).unwrap();
        assert_eq!(themes.len(), 2);
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(
            parse_theme_response("no json here"),
            Err(ThemesError::Parse(_))
        ));
        assert!(matches!(
            parse_theme_response(r#"{"topics": []}"#),
            Err(ThemesError::Parse(_))
        ));
    }

    #[test]
    fn test_config_requires_api_key() {
        let settings = LlmSettings {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: None,
            timeout_secs: 60,
            max_retries: 3,
        };
        assert!(matches!(
            ApiThemeClientConfig::from_settings(&settings),
            Err(ThemesError::Config(_))
        ));

        let with_key = LlmSettings {
            api_key: Some("sk".to_string()),
            ..settings
        };
        let config = ApiThemeClientConfig::from_settings(&with_key).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.api_key.expose_secret(), "sk");
    }

    #[tokio::test]
    async fn test_api_client_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"themes\": []}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiThemeClient::new(test_config(server.uri())).unwrap();
        let reply = client
            .complete(&[ChatMessage::system("s"), ChatMessage::user("u")])
            .await
            .unwrap();
        assert_eq!(reply, "{\"themes\": []}");
    }

    #[tokio::test]
    async fn test_api_client_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let client = ApiThemeClient::new(test_config(server.uri())).unwrap();
        assert_eq!(client.complete(&[ChatMessage::user("u")]).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_api_client_does_not_retry_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiThemeClient::new(test_config(server.uri())).unwrap();
        let err = client.complete(&[ChatMessage::user("u")]).await.unwrap_err();
        assert!(matches!(err, ThemesError::Llm(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_describe_sends_largest_first_and_persists() {
        let temp = TempDir::new().unwrap();
        let storage = ThemeStorage::new(temp.path().join("vars"), temp.path().join("desc"));
        let client = Arc::new(EchoClient::default());
        let generator = ThemeGenerator::new(client.clone(), Arc::new(CharCounter), storage.clone())
            .with_system_message("sys");

        let description = generator.describe("S1", &artifact()).await.unwrap();

        let seen = client.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["!!Crop area!!Crop yield", "!!Age"]);

        let ids: Vec<u32> = description.clusters.iter().map(|c| c.cluster_id.0).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(description.clusters[1].themes[0].theme, "Crop area");
        assert_eq!(description.model, "echo");

        assert_eq!(storage.load_description("S1").unwrap(), Some(description));
    }

    #[tokio::test]
    async fn test_describe_parse_failure_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let storage = ThemeStorage::new(temp.path().join("vars"), temp.path().join("desc"));
        let generator = ThemeGenerator::new(Arc::new(GarbageClient), Arc::new(CharCounter), storage.clone());

        let err = generator.describe("S1", &artifact()).await.unwrap_err();
        assert!(matches!(err, ThemesError::Parse(_)));
        assert!(storage.load_description("S1").unwrap().is_none());
    }
}
