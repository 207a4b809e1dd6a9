//! Structured syllabus extraction through an OpenAI-compatible chat endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::InferenceConfig;
use crate::error::{ExtractionError, InferenceError, ServiceError, ServiceResult};
use crate::ingestion::Chunk;
use crate::syllabus::SyllabusExtraction;

/// Keys whose values must be integers in the extraction schema
const INTEGER_KEYS: &[&str] = &["unit_number", "topic_number", "hours", "total_credits", "year"];

/// Keys whose values must be strings in the extraction schema
const STRING_KEYS: &[&str] = &[
    "subject_name",
    "subject_code",
    "title",
    "description",
    "raw_text",
    "authors",
    "publisher",
    "edition",
    "isbn",
    "book_type",
];

/// Turns the text of one chunk into a partial syllabus tree.
#[async_trait]
pub trait ChunkExtractor: Send + Sync {
    async fn extract(
        &self,
        chunk: &Chunk,
        text: &str,
        total_pages: usize,
    ) -> Result<SyllabusExtraction, ExtractionError>;
}

/// Chat-completions client
pub struct InferenceClient {
    client: Client,
    config: InferenceConfig,
    schema: String,
}

impl InferenceClient {
    /// Create a client whose idle pool covers `concurrency` simultaneous requests.
    pub fn new(config: InferenceConfig, concurrency: usize) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host.max(concurrency))
            .build()
            .map_err(|e| {
                ServiceError::Extraction(
                    InferenceError::Connection {
                        url: config.base_url.clone(),
                        source: e,
                    }
                    .into(),
                )
            })?;

        let schema = serde_json::to_string(&schemars::schema_for!(SyllabusExtraction)).map_err(|e| {
            ServiceError::Internal {
                message: format!("Failed to render extraction schema: {}", e),
            }
        })?;

        Ok(Self {
            client,
            config,
            schema,
        })
    }

    /// Check if the inference service is reachable
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        match self.client.get(&url).bearer_auth(&self.config.api_key).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Inference health check failed");
                false
            }
        }
    }

    async fn complete(&self, system: String, user: String) -> Result<String, InferenceError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: 0.0,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(InferenceError::Http { status, message });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse { source: e })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(InferenceError::EmptyResponse)
    }

    fn system_prompt(&self) -> String {
        format!(
            "Extract the syllabus content of these pages as JSON matching this schema:\n{}\n\n\
             Rules:\n\
             1. subject_code is the full code including any elective index, e.g. \"MCA 303 (1)\".\n\
             2. subject_name is the subject name without an \"Elective -I/II\" prefix.\n\
             3. Keep unit titles short: a few words naming the unit, never the full unit text.\n\
             4. raw_text is the exact unit text from the page.\n\
             5. topics are the individual topic names of the unit, one per entry.\n\
             6. If a page continues a subject whose header is on an earlier page, use \
             subject_code \"CONTINUATION\" and subject_name \"CONTINUATION_PAGE\".\n\
             Output only the JSON object.",
            self.schema
        )
    }
}

#[async_trait]
impl ChunkExtractor for InferenceClient {
    async fn extract(
        &self,
        chunk: &Chunk,
        text: &str,
        total_pages: usize,
    ) -> Result<SyllabusExtraction, ExtractionError> {
        let user = format!(
            "Pages {}-{} of {}. Parse this syllabus:\n\n{}",
            chunk.start_page, chunk.end_page, total_pages, text
        );

        let content = self
            .complete(self.system_prompt(), user)
            .await
            .map_err(|e| match e {
                InferenceError::Connection { source, .. } if source.is_timeout() => {
                    ExtractionError::timeout(self.config.request_timeout())
                }
                other => other.into(),
            })?;

        let extraction = parse_extraction(&content)?;
        debug!(
            chunk = chunk.number,
            subjects = extraction.subjects.len(),
            "Chunk extracted"
        );
        Ok(extraction)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self {
            role: "system".to_string(),
            content,
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Parse model output into a partial tree.
///
/// Markdown fences and surrounding prose are ignored, nulls are dropped and numeric
/// fields given as strings are coerced before deserializing.
pub fn parse_extraction(content: &str) -> Result<SyllabusExtraction, InferenceError> {
    let json = extract_json_object(content).ok_or_else(|| InferenceError::Schema {
        message: "no JSON object in response".to_string(),
    })?;

    let mut value: Value = serde_json::from_str(json).map_err(|e| InferenceError::Schema {
        message: e.to_string(),
    })?;
    normalize_value(&mut value);

    if !value.get("subjects").is_some_and(Value::is_array) {
        return Err(InferenceError::Schema {
            message: "missing subjects array".to_string(),
        });
    }

    serde_json::from_value(value).map_err(|e| InferenceError::Schema {
        message: e.to_string(),
    })
}

/// The span from the first `{` to the last `}`, after stripping markdown fences.
fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (start < end).then(|| &unfenced[start..=end])
}

fn normalize_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for (key, v) in map.iter_mut() {
                if INTEGER_KEYS.contains(&key.as_str()) {
                    coerce_integer(v);
                } else if STRING_KEYS.contains(&key.as_str()) {
                    coerce_string(v);
                } else if key == "is_textbook" {
                    coerce_bool(v);
                }
                normalize_value(v);
            }
            // Values that could not be coerced fall back to their defaults
            map.retain(|key, v| {
                !(INTEGER_KEYS.contains(&key.as_str()) && !v.is_u64())
                    && !(STRING_KEYS.contains(&key.as_str()) && !v.is_string())
                    && !(key == "is_textbook" && !v.is_boolean())
            });
        }
        Value::Array(items) => {
            items.retain(|v| !v.is_null());
            items.iter_mut().for_each(normalize_value);
        }
        _ => {}
    }
}

fn coerce_integer(value: &mut Value) {
    let coerced = match value {
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u64>().ok()
        }
        Value::Number(n) if !n.is_u64() => n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64),
        _ => return,
    };
    if let Some(n) = coerced {
        *value = Value::from(n);
    }
}

fn coerce_string(value: &mut Value) {
    let coerced = match value {
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => return,
    };
    *value = Value::String(coerced);
}

fn coerce_bool(value: &mut Value) {
    let coerced = match value {
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => true,
            "false" | "no" | "0" => false,
            _ => return,
        },
        Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        _ => return,
    };
    *value = Value::Bool(coerced);
}
