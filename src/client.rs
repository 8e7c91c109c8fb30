use crate::decoder::{decode_body, ACCEPTED_ENCODINGS};
use crate::error::{Error, Result};
use crate::formatter::RESPONSE_PREFIX;
use crate::profile::ModelConfig;

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::{
    header::{ACCEPT_ENCODING, CONTENT_ENCODING},
    Client, RequestBuilder, Response,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
pub const TOKEN_ENV_VAR: &str = "REPLICATE_API_TOKEN";

const POLL_INTERVAL: Duration = Duration::from_millis(1000);
const MAX_POLLS: u32 = 300;

/// Something that turns a prompt into reply text. Failures are reported in the
/// returned text so callers can display the reply unconditionally.
pub trait AiBackend: Send + Sync {
    fn send(&self, prompt: String) -> BoxFuture<'static, String>;
}

pub trait BackendFactory: Send + Sync {
    fn connect(&self, config: &ModelConfig, token: Option<&str>) -> Result<Arc<dyn AiBackend>>;
}

/// A backend plus the context file queued for the next prompt.
pub struct AiClient {
    backend: Arc<dyn AiBackend>,
    model_name: String,
    context: Option<String>,
}

impl Debug for AiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiClient")
            .field("model_name", &self.model_name)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

impl AiClient {
    pub fn new(backend: Arc<dyn AiBackend>, model_name: impl Into<String>) -> Self {
        AiClient {
            backend,
            model_name: model_name.into(),
            context: None,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn set_context(&mut self, content: impl Into<String>) {
        let content = content.into();
        self.context = if content.is_empty() {
            None
        } else {
            Some(content)
        };
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Builds the final prompt. The context applies to this call only.
    pub fn compose_prompt(&mut self, user_prompt: &str) -> String {
        match self.context.take() {
            Some(context) => format!(
                "Based on the following file content:\n\n---\n{context}\n---\n\nNow, please do the following: {user_prompt}"
            ),
            None => user_prompt.to_string(),
        }
    }

    pub fn send_prompt(&mut self, user_prompt: &str) -> BoxFuture<'static, String> {
        let prompt = self.compose_prompt(user_prompt);
        tracing::info!(model = %self.model_name, chars = prompt.chars().count(), "sending prompt");
        self.backend.send(prompt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelTarget {
    Official { owner: String, name: String },
    Version(String),
}

impl ModelTarget {
    fn parse(id: &str) -> Result<Self> {
        if let Some((_, version)) = id.split_once(':') {
            if !version.is_empty() {
                return Ok(ModelTarget::Version(version.to_string()));
            }
        }
        match id.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(ModelTarget::Official {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "Model id '{id}' must look like 'owner/name' or 'owner/name:version'."
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
    #[serde(default)]
    urls: PredictionUrls,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "succeeded" | "failed" | "canceled" | "aborted"
        )
    }

    fn into_text(self) -> Result<String> {
        match self.status.as_str() {
            "succeeded" => Ok(output_text(&self.output)),
            status => Err(Error::Client(format!(
                "prediction {status}: {}",
                value_text(&self.error)
            ))),
        }
    }
}

/// Streaming models return a list of tokens, others a single string.
fn output_text(output: &Value) -> String {
    match output {
        Value::Array(parts) => parts.iter().map(value_text).collect(),
        other => value_text(other),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replicate prediction client. Cheap to clone; clones share the connection
/// pool.
#[derive(Clone)]
pub struct ReplicateClient {
    client: Client,
    api_base: String,
    token: String,
    target: ModelTarget,
    input_key: String,
}

impl Debug for ReplicateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateClient")
            .field("api_base", &self.api_base)
            .field("target", &self.target)
            .field("input_key", &self.input_key)
            .finish()
    }
}

impl ReplicateClient {
    pub fn new(api_base: &str, token: &str, config: &ModelConfig) -> Result<Self> {
        let target = ModelTarget::parse(&config.id)?;
        let client = Client::builder()
            .user_agent(concat!("granite-shell/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Could not build HTTP client: {e}")))?;

        Ok(ReplicateClient {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            target,
            input_key: config.input_key.clone(),
        })
    }

    fn prediction_url(&self) -> String {
        match &self.target {
            ModelTarget::Official { owner, name } => {
                format!("{}/models/{owner}/{name}/predictions", self.api_base)
            }
            ModelTarget::Version(_) => format!("{}/predictions", self.api_base),
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut input = serde_json::Map::new();
        input.insert(self.input_key.clone(), Value::String(prompt.to_string()));
        match &self.target {
            ModelTarget::Official { .. } => json!({ "input": input }),
            ModelTarget::Version(version) => json!({ "version": version, "input": input }),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header(ACCEPT_ENCODING, ACCEPTED_ENCODINGS)
    }

    pub async fn predict(&self, prompt: &str) -> Result<String> {
        let url = self.prediction_url();
        tracing::debug!(%url, "creating prediction");
        let req = self
            .authorized(self.client.post(&url))
            .header("Prefer", "wait")
            .json(&self.request_body(prompt));
        let mut prediction = read_prediction(req.send().await?).await?;

        let mut polls = 0;
        while !prediction.is_terminal() {
            if polls >= MAX_POLLS {
                return Err(Error::Client(format!(
                    "prediction still '{}' after {MAX_POLLS} polls",
                    prediction.status
                )));
            }
            let Some(get_url) = prediction.urls.get.take() else {
                return Err(Error::Client(format!(
                    "prediction is '{}' but has no polling URL",
                    prediction.status
                )));
            };
            tokio::time::sleep(POLL_INTERVAL).await;
            tracing::debug!(status = %prediction.status, polls, "polling prediction");
            prediction = read_prediction(self.authorized(self.client.get(&get_url)).send().await?).await?;
            polls += 1;
        }

        prediction.into_text()
    }
}

async fn read_prediction(res: Response) -> Result<Prediction> {
    let status = res.status();
    let encoding = res
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = decode_body(res.bytes().await?, encoding.as_deref())?;

    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").map(value_text))
            .unwrap_or(body);
        return Err(Error::Client(format!("HTTP {status}: {detail}")));
    }
    Ok(serde_json::from_str(&body)?)
}

impl AiBackend for ReplicateClient {
    fn send(&self, prompt: String) -> BoxFuture<'static, String> {
        let this = self.clone();
        async move {
            match this.predict(&prompt).await {
                Ok(text) => format!("{RESPONSE_PREFIX}{}", text.trim()),
                Err(e) => {
                    tracing::warn!(error = %e, "replicate request failed");
                    format!(
                        "Error communicating with Replicate API. The model may be incompatible or another issue occurred. \nDetails: {e}"
                    )
                }
            }
        }
        .boxed()
    }
}

#[derive(Debug, Clone)]
pub struct ReplicateFactory {
    api_base: String,
}

impl ReplicateFactory {
    pub fn new(api_base: impl Into<String>) -> Self {
        ReplicateFactory {
            api_base: api_base.into(),
        }
    }
}

impl Default for ReplicateFactory {
    fn default() -> Self {
        ReplicateFactory::new(DEFAULT_API_BASE)
    }
}

impl BackendFactory for ReplicateFactory {
    fn connect(&self, config: &ModelConfig, token: Option<&str>) -> Result<Arc<dyn AiBackend>> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => {
                return Err(Error::Config(format!(
                    "Please set the {TOKEN_ENV_VAR} environment variable."
                )))
            }
        };
        if config.id.trim().is_empty() {
            return Err(Error::Config(
                "Model configuration is missing the 'id' field.".to_string(),
            ));
        }
        let client = ReplicateClient::new(&self.api_base, token, config)?;
        tracing::info!(model = %config.id, "replicate client ready");
        Ok(Arc::new(client))
    }
}
