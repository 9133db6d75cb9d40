// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROVEDOR OPENAI-COMPATÍVEL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Implementação real da porta LLM sobre um endpoint chat/completions.
// Ordem de fallback da saída estruturada:
//   1. response_format json_schema nativo
//   2. completion livre + extração manual de JSON
//   3. reparo tolerante
//   4. dialeto leniente
//   5. re-ask com schema destilado (campos achatados)
//   6. falha de validação
//
// Política de transporte: backoff exponencial (250ms/500ms/1s ±20%),
// máximo 3 tentativas; 429 respeita Retry-After; 5xx retenta; outros 4xx
// falham sem retry.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::extract;
use super::{
    transport_backoff, ChatMessage, GenerateOpts, LlmError, LlmPort, LlmReply, SchemaSpec,
    MAX_TRANSPORT_ATTEMPTS,
};
use crate::utils::RateBucket;

/// Porta LLM para APIs compatíveis com OpenAI chat/completions
pub struct OpenAiPort {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    /// Bucket compartilhado entre sessões do mesmo vendor
    bucket: Arc<RateBucket>,
}

impl OpenAiPort {
    /// Cria uma porta apontando para api.openai.com
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1".into())
    }

    /// Cria uma porta com endpoint customizado (proxies, vLLM, etc)
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .pool_max_idle_per_host(8)
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            base_url,
            bucket: Arc::new(RateBucket::new(10, 2.0)),
        }
    }

    /// Compartilha um rate bucket entre portas (limite por vendor)
    pub fn with_rate_bucket(mut self, bucket: Arc<RateBucket>) -> Self {
        self.bucket = bucket;
        self
    }

    /// Executa uma chamada chat/completions com a política de transporte.
    ///
    /// Retorna o texto da completion e os tokens reportados pela API.
    async fn call_completion(
        &self,
        body: Value,
        opts: &GenerateOpts,
        tokens_so_far: u64,
    ) -> Result<(String, u64), LlmError> {
        let mut tokens_used = tokens_so_far;
        let mut last_detail = String::new();

        for attempt in 0..MAX_TRANSPORT_ATTEMPTS {
            if !self.bucket.acquire(&opts.cancel).await {
                return Err(LlmError::Cancelled);
            }

            let request = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .timeout(opts.timeout);

            let response = tokio::select! {
                _ = opts.cancel.cancelled() => return Err(LlmError::Cancelled),
                r = request.send() => r,
            };

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.as_u16() == 429 {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| transport_backoff(attempt));
                        log::warn!("🚦 LLM 429, aguardando {:?}", retry_after);
                        last_detail = "rate limited (429)".into();
                        tokio::select! {
                            _ = opts.cancel.cancelled() => return Err(LlmError::Cancelled),
                            _ = tokio::time::sleep(retry_after) => continue,
                        }
                    }

                    if status.is_server_error() {
                        last_detail = format!("server error ({})", status);
                        log::warn!("🔁 LLM {}, tentativa {}", status, attempt + 1);
                        tokio::select! {
                            _ = opts.cancel.cancelled() => return Err(LlmError::Cancelled),
                            _ = tokio::time::sleep(transport_backoff(attempt)) => continue,
                        }
                    }

                    if status.is_client_error() {
                        let detail = resp.text().await.unwrap_or_default();
                        return Err(LlmError::Client {
                            status: status.as_u16(),
                            detail: crate::utils::preview(&detail, 300),
                            tokens_used,
                        });
                    }

                    let payload: Value = resp.json().await.map_err(|e| LlmError::Transport {
                        detail: format!("invalid response body: {}", e),
                        tokens_used,
                    })?;

                    tokens_used += payload["usage"]["total_tokens"].as_u64().unwrap_or(0);

                    let content = payload["choices"][0]["message"]["content"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();

                    return Ok((content, tokens_used));
                }
                Err(e) if e.is_timeout() => {
                    return Err(LlmError::Timeout {
                        ms: opts.timeout.as_millis() as u64,
                        tokens_used,
                    });
                }
                Err(e) => {
                    last_detail = e.to_string();
                    log::warn!("🔁 LLM erro de rede, tentativa {}: {}", attempt + 1, e);
                    tokio::select! {
                        _ = opts.cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(transport_backoff(attempt)) => continue,
                    }
                }
            }
        }

        Err(LlmError::Transport {
            detail: last_detail,
            tokens_used,
        })
    }

    fn messages_payload(&self, system: &str, messages: &[ChatMessage]) -> Vec<Value> {
        let mut payload = vec![json!({"role": "system", "content": system})];
        payload.extend(
            messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content})),
        );
        payload
    }
}

#[async_trait]
impl LlmPort for OpenAiPort {
    async fn generate_object(
        &self,
        schema: &SchemaSpec,
        system: &str,
        messages: &[ChatMessage],
        opts: &GenerateOpts,
    ) -> Result<LlmReply, LlmError> {
        let payload_messages = self.messages_payload(system, messages);

        // 1. Saída estruturada nativa do vendor
        let native_body = json!({
            "model": self.model,
            "temperature": opts.temperature,
            "messages": payload_messages.clone(),
            "response_format": {
                "type": "json_schema",
                "json_schema": {"name": schema.name, "schema": schema.schema, "strict": false},
            },
        });

        let (text, mut tokens_used) = self.call_completion(native_body, opts, 0).await?;

        if let Some(object) = extract::parse_strict(&text).filter(Value::is_object) {
            if validate_shape(&schema.schema, &object).is_ok() {
                return Ok(LlmReply {
                    object,
                    tokens_used,
                });
            }
        }

        // 2-4. Completion livre + extração manual (reparo e leniente inclusos)
        let free_body = json!({
            "model": self.model,
            "temperature": opts.temperature,
            "messages": payload_messages,
        });

        let (free_text, t) = self.call_completion(free_body, opts, tokens_used).await?;
        tokens_used = t;

        if let Some(object) = extract::extract_object(&free_text) {
            if validate_shape(&schema.schema, &object).is_ok() {
                return Ok(LlmReply {
                    object,
                    tokens_used,
                });
            }
        }

        // 5. Re-ask com schema destilado
        if let Some(distilled) = &schema.distilled {
            let distilled_system = format!(
                "{}\n\nReturn ONLY a flat JSON object with these keys:\n{}",
                system,
                serde_json::to_string_pretty(distilled).unwrap_or_default()
            );
            let distilled_body = json!({
                "model": self.model,
                "temperature": opts.temperature,
                "messages": self.messages_payload(&distilled_system, messages),
            });

            let (distilled_text, t) = self
                .call_completion(distilled_body, opts, tokens_used)
                .await?;
            tokens_used = t;

            if let Some(object) = extract::extract_object(&distilled_text) {
                return Ok(LlmReply {
                    object,
                    tokens_used,
                });
            }
        }

        Err(LlmError::Validation {
            detail: format!("schema {} not satisfied by any fallback", schema.name),
            tokens_used,
        })
    }
}

/// Validação estrutural rasa: objeto com os campos `required` presentes e
/// com os tipos primitivos declarados em `properties`.
///
/// Não é um validador JSON-Schema completo; cobre o que os schemas de ação
/// e avaliação deste crate declaram.
pub fn validate_shape(schema: &Value, value: &Value) -> Result<(), String> {
    let Some(object) = value.as_object() else {
        return Err("value is not an object".into());
    };

    if let Some(required) = schema["required"].as_array() {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required field: {}", key));
            }
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (key, prop) in properties {
            let Some(field) = object.get(key) else {
                continue;
            };
            let Some(expected) = prop["type"].as_str() else {
                continue;
            };
            let matches = match expected {
                "string" => field.is_string(),
                "array" => field.is_array(),
                "object" => field.is_object(),
                "boolean" => field.is_boolean(),
                "number" => field.is_number(),
                "integer" => field.is_i64() || field.is_u64(),
                _ => true,
            };
            if !matches && !field.is_null() {
                return Err(format!("field {} is not a {}", key, expected));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_shape_required() {
        let schema = json!({
            "type": "object",
            "properties": {"action": {"type": "string"}},
            "required": ["action"],
        });

        assert!(validate_shape(&schema, &json!({"action": "search"})).is_ok());
        assert!(validate_shape(&schema, &json!({"other": 1})).is_err());
        assert!(validate_shape(&schema, &json!("not an object")).is_err());
    }

    #[test]
    fn test_validate_shape_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "queries": {"type": "array"},
                "pass": {"type": "boolean"},
            },
        });

        assert!(validate_shape(&schema, &json!({"queries": ["a"], "pass": true})).is_ok());
        assert!(validate_shape(&schema, &json!({"queries": "not-array"})).is_err());
        // Campos ausentes não obrigatórios passam
        assert!(validate_shape(&schema, &json!({})).is_ok());
    }
}
