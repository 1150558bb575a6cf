// Model Backend Adapter
// Narrow boundary between the model detector and a language-model service:
// {category, chunk text, catalog subset} -> candidate mentions.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::models::{Category, PrefixFamily, ShortcutEntry};
use crate::services::config_store::ProviderConfig;
use crate::services::providers::{ChatParams, ProviderClient};

use super::error::DetectionError;

/// One structured request: a single category over a single chunk
#[derive(Debug, Clone)]
pub struct BackendRequest<'a> {
    pub category: Category,
    pub chunk_text: &'a str,
    pub entries: Vec<&'a ShortcutEntry>,
    pub families: Vec<&'a PrefixFamily>,
    pub loose_mode: bool,
}

/// A mention proposed by the backend, not yet trusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub code: String,
    pub matched_text: String,
    pub location_hint: Option<String>,
}

#[async_trait]
pub trait DetectionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn find_candidates(&self, request: &BackendRequest<'_>) -> Result<Vec<Candidate>, DetectionError>;
}

const SYSTEM_PROMPT: &str = r#"You are an expert Wikipedia policy analyst reading a talk page discussion.

You will be asked for POLICIES, GUIDELINES or ESSAYS separately. Report only shortcuts from the list given for the requested category; skip anything that belongs to another category.

Rules:
1. Scan every line, quote, footnote and nested reply.
2. Report every occurrence separately. A shortcut written twice is two mentions.
3. Report aliases under their canonical code (WP:UNDUE -> WP:NPOV, WP:NOR -> WP:OR, WP:NPA -> WP:PA).
4. "quote" must be copied verbatim from the discussion text: the shortcut itself or the exact words that refer to it. Never paraphrase, never invent quotes.
5. "NOT" used as an ordinary word is not WP:NOT.

Answer with a JSON object only:
{"mentions": [{"code": "WP:NPOV", "quote": "WP:UNDUE", "location": "second reply"}]}
If nothing is mentioned answer {"mentions": []}."#;

const LOOSE_MODE_RULES: &str = r#"LOOSE INTERPRETATION is enabled. Also report mentions written without the prefix or as phrases, for example:
- "UNDUE", "undue weight" -> WP:NPOV
- "original research" -> WP:OR
- "fails verification", "verifiability" -> WP:V
- "reliable sources" -> WP:RS
- "not notable", "notability" -> WP:N
The quote must still be copied verbatim from the text."#;

const STRICT_MODE_RULES: &str =
    "Report only explicit shortcuts (with their WP: or MOS: prefix) as written in the text.";

/// Build the user prompt for one (chunk, category) request
pub fn build_user_prompt(request: &BackendRequest<'_>) -> String {
    let mut prompt = format!(
        "Identify Wikipedia {} mentioned in the discussion below.\n\nKnown {}:\n",
        request.category.plural(),
        request.category.plural()
    );
    for entry in &request.entries {
        let aliases: Vec<&str> = entry
            .aliases
            .iter()
            .map(|a| a.as_str())
            .filter(|a| *a != entry.code)
            .collect();
        if aliases.is_empty() {
            prompt.push_str(&format!("- {}\n", entry.code));
        } else {
            prompt.push_str(&format!("- {} (aliases: {})\n", entry.code, aliases.join(", ")));
        }
    }
    for family in &request.families {
        prompt.push_str(&format!(
            "- any {}<NAME> shortcut (report it as written, e.g. {}EXAMPLE)\n",
            family.prefix, family.prefix
        ));
    }
    prompt.push('\n');
    prompt.push_str(if request.loose_mode {
        LOOSE_MODE_RULES
    } else {
        STRICT_MODE_RULES
    });
    prompt.push_str("\n\n=== DISCUSSION TEXT TO ANALYZE ===\n");
    prompt.push_str(request.chunk_text);
    prompt
}

#[derive(Debug, Deserialize)]
struct MentionsReply {
    #[serde(default)]
    mentions: Vec<RawMention>,
}

#[derive(Debug, Deserialize)]
struct RawMention {
    #[serde(default)]
    code: String,
    #[serde(default, alias = "matched_text", alias = "matchedText", alias = "text")]
    quote: String,
    #[serde(default, alias = "location_hint", alias = "locationHint")]
    location: Option<String>,
}

/// Extract the JSON payload from a reply that may carry surrounding prose
fn extract_json(content: &str) -> Result<&str, DetectionError> {
    let content = content.trim();
    if content.starts_with('{') || content.starts_with('[') {
        return Ok(content);
    }
    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if end > start => Ok(&content[start..=end]),
        _ => Err(DetectionError::BackendMalformedResponse(
            "no JSON in response".to_string(),
        )),
    }
}

/// Parse a backend reply into candidates
pub fn parse_candidates(content: &str) -> Result<Vec<Candidate>, DetectionError> {
    let json = extract_json(content)?;
    let raw: Vec<RawMention> = if json.starts_with('[') {
        serde_json::from_str::<Vec<RawMention>>(json)
    } else {
        serde_json::from_str::<MentionsReply>(json).map(|r| r.mentions)
    }
    .map_err(|e| DetectionError::BackendMalformedResponse(e.to_string()))?;

    Ok(raw
        .into_iter()
        .filter_map(|m| {
            let code = normalize_code(&m.code)?;
            let quote = m.quote.trim().to_string();
            let matched_text = if quote.is_empty() { code.clone() } else { quote };
            Some(Candidate {
                code,
                matched_text,
                location_hint: m.location.filter(|l| !l.trim().is_empty()),
            })
        })
        .collect())
}

/// `WP:NPOV (UNDUE)` -> `WP:NPOV`
fn normalize_code(raw: &str) -> Option<String> {
    let token = raw.split_whitespace().next()?;
    let token = token.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | ';' | '(' | ')' | '[' | ']'));
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// OpenAI-compatible chat-completions backend
pub struct OpenAiBackend {
    client: ProviderClient,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: i32,
}

impl OpenAiBackend {
    pub fn new(client: ProviderClient, api_key: impl Into<String>, config: &ProviderConfig) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl DetectionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn find_candidates(&self, request: &BackendRequest<'_>) -> Result<Vec<Candidate>, DetectionError> {
        let user = build_user_prompt(request);
        let params = ChatParams {
            model: &self.model,
            system: SYSTEM_PROMPT,
            user: &user,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            json_output: true,
        };

        let result = self.client.call_chat(&self.api_key, &params).await?;
        let candidates = parse_candidates(&result.content)?;
        debug!(
            "[BACKEND] category={} candidates={} latency_ms={}",
            request.category,
            candidates.len(),
            result.latency_ms
        );
        Ok(candidates)
    }
}
