//! Generic HTTP provider for OpenAI-compatible `/chat/completions` APIs.
//!
//! One adapter covers every backend in the registry; per-provider quirks
//! (model prefixing, parameter overrides, endpoints) come from the spec.
//! The API key lives in a `SecureString` and is written into the
//! Authorization header only at request time — it never appears in logs or
//! in the request structs that get serialized.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crewgate_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, LlmResponse, StreamChunk,
    ToolCall, ToolDefinition,
};
use crewgate_security::SecureString;

use crate::registry::{
    apply_model_overrides, match_provider, resolve_model_name, ProviderConfig, ProviderSpec,
};
use crate::traits::{LlmProvider, LlmRequestConfig};

pub struct HttpProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: SecureString,
    default_model: String,
    extra_headers: HeaderMap,
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("provider", &self.spec.display_name)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig, spec: &'static ProviderSpec, model: &str) -> Self {
        let api_base = config
            .api_base
            .clone()
            .or_else(|| spec.default_api_base.map(String::from))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                match (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(val)) => {
                        extra_headers.insert(name, val);
                    }
                    _ => warn!(header = %key, "invalid extra header, skipping"),
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        HttpProvider {
            client,
            api_base,
            api_key: SecureString::new(config.api_key.clone()),
            default_model: model.to_string(),
            extra_headers,
            spec,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
        stream: bool,
    ) -> ChatCompletionRequest {
        let temperature = apply_model_overrides(model, self.spec, config.temperature);
        ChatCompletionRequest {
            model: resolve_model_name(model, self.spec),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature,
            stream: stream.then_some(true),
        }
    }

    async fn post(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response, String> {
        let result = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.api_key.get())
            .headers(self.extra_headers.clone())
            .json(body)
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                error!(provider = self.spec.display_name, error = %e, "HTTP request failed");
                return Err(format!("Error calling LLM: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(provider = self.spec.display_name, status = %status, "API error");
            return Err(format!("Error calling LLM: {status} — {body}"));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse {
        let request = self.build_request(messages, tools, model, config, false);
        debug!(
            provider = self.spec.display_name,
            model = %request.model,
            messages = messages.len(),
            "calling LLM"
        );

        let response = match self.post(&request).await {
            Ok(r) => r,
            Err(msg) => return LlmResponse::error(msg),
        };

        match response.json::<ChatCompletionResponse>().await {
            Ok(chat_resp) => {
                let llm: LlmResponse = chat_resp.into();
                debug!(
                    provider = self.spec.display_name,
                    tool_calls = llm.tool_calls.len(),
                    finish_reason = llm.finish_reason.as_deref().unwrap_or("?"),
                    "LLM response received"
                );
                llm
            }
            Err(e) => {
                error!(provider = self.spec.display_name, error = %e, "failed to parse response");
                LlmResponse::error(format!("Error parsing LLM response: {e}"))
            }
        }
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> mpsc::Receiver<StreamChunk> {
        let (tx, rx) = mpsc::channel(32);
        let request = self.build_request(messages, tools, model, config, true);

        let response = match self.post(&request).await {
            Ok(r) => r,
            Err(msg) => {
                let _ = tx
                    .send(StreamChunk {
                        delta: msg,
                        finish_reason: Some("error".into()),
                        tool_calls: Vec::new(),
                    })
                    .await;
                return rx;
            }
        };

        let provider = self.spec.display_name;
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            let mut assembler = ToolCallAssembler::default();
            let mut finish_reason: Option<String> = None;

            while let Some(item) = body.next().await {
                let bytes = match item {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(provider = provider, error = %e, "stream interrupted");
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        continue;
                    }
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };

                    let choice = &event["choices"][0];
                    if let Some(reason) = choice["finish_reason"].as_str() {
                        finish_reason = Some(reason.to_string());
                    }
                    let delta = &choice["delta"];
                    assembler.absorb(delta);
                    if let Some(content) = delta["content"].as_str() {
                        if !content.is_empty() {
                            let _ = tx
                                .send(StreamChunk {
                                    delta: content.to_string(),
                                    finish_reason: None,
                                    tool_calls: Vec::new(),
                                })
                                .await;
                        }
                    }
                }
            }

            // Terminal chunk: finish reason plus any assembled tool calls.
            let _ = tx
                .send(StreamChunk {
                    delta: String::new(),
                    finish_reason: finish_reason.or_else(|| Some("stop".into())),
                    tool_calls: assembler.finish(),
                })
                .await;
        });

        rx
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }
}

// ─────────────────────────────────────────────
// Streaming tool-call assembly
// ─────────────────────────────────────────────

/// Accumulates tool-call fragments across stream deltas, keyed by index.
#[derive(Default)]
struct ToolCallAssembler {
    calls: Vec<(String, String, String)>, // (id, name, arguments)
}

impl ToolCallAssembler {
    fn absorb(&mut self, delta: &serde_json::Value) {
        let Some(fragments) = delta["tool_calls"].as_array() else {
            return;
        };
        for frag in fragments {
            let index = frag["index"].as_u64().unwrap_or(0) as usize;
            while self.calls.len() <= index {
                self.calls.push((String::new(), String::new(), String::new()));
            }
            let slot = &mut self.calls[index];
            if let Some(id) = frag["id"].as_str() {
                slot.0.push_str(id);
            }
            if let Some(name) = frag["function"]["name"].as_str() {
                slot.1.push_str(name);
            }
            if let Some(args) = frag["function"]["arguments"].as_str() {
                slot.2.push_str(args);
            }
        }
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter(|(id, name, _)| !id.is_empty() && !name.is_empty())
            .map(|(id, name, args)| ToolCall::new(id, name, args))
            .collect()
    }
}

// ─────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────

/// Match a model to a configured provider and build the adapter for it.
pub fn create_provider(
    model: &str,
    providers: &std::collections::HashMap<String, ProviderConfig>,
) -> anyhow::Result<HttpProvider> {
    let (config, spec) = match_provider(model, providers).ok_or_else(|| {
        anyhow::anyhow!(
            "No configured provider found for model '{model}'. \
             Set the appropriate API key (e.g. ANTHROPIC_API_KEY, OPENROUTER_API_KEY)."
        )
    })?;

    debug!(provider = spec.display_name, model = model, "creating LLM provider");
    Ok(HttpProvider::new(config, spec, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::find_by_name;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.map(String::from),
            extra_headers: None,
        }
    }

    #[test]
    fn test_completions_url() {
        let spec = find_by_name("openai").unwrap();
        for base in ["https://api.openai.com/v1", "https://api.openai.com/v1/"] {
            let provider = HttpProvider::new(&make_config("key", Some(base)), spec, "gpt-4o");
            assert_eq!(
                provider.completions_url(),
                "https://api.openai.com/v1/chat/completions"
            );
        }
    }

    #[test]
    fn test_gateway_default_base() {
        let spec = find_by_name("openrouter").unwrap();
        let provider = HttpProvider::new(&make_config("sk-or-x", None), spec, "llama-3");
        assert_eq!(provider.api_base, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn test_debug_never_shows_key() {
        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("sk-supersecret", None), spec, "gpt-4o");
        let debug = format!("{provider:?}");
        assert!(!debug.contains("supersecret"));
    }

    #[test]
    fn test_temperature_dropped_for_reasoning_models() {
        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("key", None), spec, "o1-preview");
        let request = provider.build_request(
            &[ChatMessage::user("x")],
            None,
            "o1-preview",
            &LlmRequestConfig::default(),
            false,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_chat_success_with_bearer_auth() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-test",
                "choices": [{
                    "message": { "content": "Hello there.", "tool_calls": null },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
            })))
            .mount(&mock_server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let provider =
            HttpProvider::new(&make_config("test-key-123", Some(&mock_server.uri())), spec, "gpt-4o");

        let resp = provider
            .chat(&[ChatMessage::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default())
            .await;

        assert_eq!(resp.content.as_deref(), Some("Hello there."));
        assert!(!resp.transport_error);
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_chat_tool_calls() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-tools",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": { "name": "web_search", "arguments": "{\"query\":\"rust\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": null
            })))
            .mount(&mock_server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("key", Some(&mock_server.uri())), spec, "gpt-4o");

        let tool = ToolDefinition::new(
            "web_search",
            "Search the web",
            serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        );
        let resp = provider
            .chat(
                &[ChatMessage::user("search rust")],
                Some(&[tool]),
                "gpt-4o",
                &LlmRequestConfig::default(),
            )
            .await;

        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].id, "call_abc");
    }

    #[tokio::test]
    async fn test_chat_api_error_surfaces() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&mock_server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("key", Some(&mock_server.uri())), spec, "gpt-4o");
        let resp = provider
            .chat(&[ChatMessage::user("x")], None, "gpt-4o", &LlmRequestConfig::default())
            .await;

        assert!(resp.transport_error);
        assert!(resp.content.unwrap().contains("429"));
    }

    #[tokio::test]
    async fn test_chat_network_error_surfaces() {
        let spec = find_by_name("openai").unwrap();
        let provider =
            HttpProvider::new(&make_config("key", Some("http://127.0.0.1:1")), spec, "gpt-4o");
        let resp = provider
            .chat(&[ChatMessage::user("x")], None, "gpt-4o", &LlmRequestConfig::default())
            .await;
        assert!(resp.transport_error);
    }

    #[tokio::test]
    async fn test_model_prefix_in_request_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek/deepseek-chat",
                "max_tokens": 4096
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-x",
                "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }],
                "usage": null
            })))
            .mount(&mock_server)
            .await;

        let spec = find_by_name("deepseek").unwrap();
        let provider =
            HttpProvider::new(&make_config("ds", Some(&mock_server.uri())), spec, "deepseek-chat");
        let resp = provider
            .chat(&[ChatMessage::user("t")], None, "deepseek-chat", &LlmRequestConfig::default())
            .await;
        assert_eq!(resp.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_stream_chat_deltas_and_terminal_chunk() {
        let mock_server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body),
            )
            .mount(&mock_server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("key", Some(&mock_server.uri())), spec, "gpt-4o");
        let mut rx = provider
            .stream_chat(&[ChatMessage::user("hi")], None, "gpt-4o", &LlmRequestConfig::default())
            .await;

        let mut text = String::new();
        let mut terminal = None;
        while let Some(chunk) = rx.recv().await {
            text.push_str(&chunk.delta);
            if chunk.finish_reason.is_some() {
                terminal = Some(chunk);
            }
        }
        assert_eq!(text, "Hello");
        assert_eq!(terminal.unwrap().finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_stream_chat_assembles_tool_calls() {
        let mock_server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"exec\",\"arguments\":\"{\\\"com\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"mand\\\":\\\"ls\\\"}\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body),
            )
            .mount(&mock_server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("key", Some(&mock_server.uri())), spec, "gpt-4o");
        let mut rx = provider
            .stream_chat(&[ChatMessage::user("ls")], None, "gpt-4o", &LlmRequestConfig::default())
            .await;

        let mut terminal = None;
        while let Some(chunk) = rx.recv().await {
            if chunk.finish_reason.is_some() {
                terminal = Some(chunk);
            }
        }
        let terminal = terminal.unwrap();
        assert_eq!(terminal.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(terminal.tool_calls.len(), 1);
        assert_eq!(terminal.tool_calls[0].function.name, "exec");
        assert_eq!(terminal.tool_calls[0].function.arguments, r#"{"command":"ls"}"#);
    }

    #[test]
    fn test_create_provider() {
        let mut providers = HashMap::new();
        providers.insert("anthropic".to_string(), make_config("sk-ant-1", None));
        let provider = create_provider("claude-sonnet-4-20250514", &providers).unwrap();
        assert_eq!(provider.display_name(), "Anthropic");

        let empty = HashMap::new();
        assert!(create_provider("claude-3", &empty).is_err());
    }
}
