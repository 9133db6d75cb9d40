// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PORTA LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Geração de objetos estruturados validados contra um schema. O contrato
// central: uso de tokens é SEMPRE reportado, inclusive em falha, porque o
// budget da sessão depende disso. Retries de parse são separados dos
// retries de transporte (backoff exponencial com jitter).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod extract;
mod openai;

pub use openai::OpenAiPort;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Timeout padrão por chamada LLM
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// Tentativas máximas de transporte (backoff 250ms, 500ms, 1s)
pub const MAX_TRANSPORT_ATTEMPTS: u32 = 3;

/// Mensagem de chat enviada ao modelo
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// Especificação de schema para saída estruturada.
///
/// `distilled` é a variante achatada (campos primitivos no topo) usada como
/// último recurso quando o modelo não consegue produzir a forma aninhada.
#[derive(Debug, Clone)]
pub struct SchemaSpec {
    /// Identificador do schema (ex: "agent-action", "evaluator-strict")
    pub name: String,
    /// Schema JSON completo
    pub schema: Value,
    /// Variante achatada para o fallback final
    pub distilled: Option<Value>,
}

impl SchemaSpec {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            distilled: None,
        }
    }

    pub fn with_distilled(mut self, distilled: Value) -> Self {
        self.distilled = Some(distilled);
        self
    }
}

/// Opções por chamada
#[derive(Debug, Clone)]
pub struct GenerateOpts {
    /// Temperatura do modelo
    pub temperature: f32,
    /// Timeout desta chamada (distinto do deadline da sessão)
    pub timeout: Duration,
    /// Sinal de cancelamento da sessão
    pub cancel: CancellationToken,
}

impl Default for GenerateOpts {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            timeout: DEFAULT_LLM_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

/// Objeto gerado + contagem de tokens da chamada
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub object: Value,
    pub tokens_used: u64,
}

/// Erros da porta LLM.
///
/// Toda variante (exceto cancelamento) carrega os tokens consumidos até a
/// falha, para que o controller mantenha o budget correto.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// Saída falhou em todos os fallbacks de parse/validação
    #[error("validation failed after all fallbacks: {detail}")]
    Validation { detail: String, tokens_used: u64 },

    /// Rede / 5xx / 429 esgotou o budget de retry
    #[error("transport error: {detail}")]
    Transport { detail: String, tokens_used: u64 },

    /// 4xx diferente de 429 (não retentável)
    #[error("client error ({status}): {detail}")]
    Client {
        status: u16,
        detail: String,
        tokens_used: u64,
    },

    /// Timeout da chamada
    #[error("llm call timed out after {ms}ms")]
    Timeout { ms: u64, tokens_used: u64 },

    /// Cancelamento observado durante a chamada
    #[error("llm call cancelled")]
    Cancelled,
}

impl LlmError {
    /// Tokens consumidos até a falha
    pub fn tokens_used(&self) -> u64 {
        match self {
            Self::Validation { tokens_used, .. }
            | Self::Transport { tokens_used, .. }
            | Self::Client { tokens_used, .. }
            | Self::Timeout { tokens_used, .. } => *tokens_used,
            Self::Cancelled => 0,
        }
    }

    /// Se o erro é de cancelamento
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Porta de geração estruturada.
///
/// Implementações reais encadeiam: JSON-schema nativo do vendor → completion
/// livre com extração manual → reparo → dialeto leniente → schema destilado
/// → falha de validação.
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Gera um objeto validável contra `schema`
    async fn generate_object(
        &self,
        schema: &SchemaSpec,
        system: &str,
        messages: &[ChatMessage],
        opts: &GenerateOpts,
    ) -> Result<LlmReply, LlmError>;
}

/// Delay de backoff para a tentativa `attempt` (0-based): 250ms, 500ms, 1s,
/// com jitter de ±20%.
pub(crate) fn transport_backoff(attempt: u32) -> Duration {
    let base_ms = 250u64.saturating_mul(1 << attempt.min(2));
    let jitter = rand::thread_rng().gen_range(-0.2f64..=0.2f64);
    let ms = (base_ms as f64 * (1.0 + jitter)).max(1.0) as u64;
    Duration::from_millis(ms)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IMPLEMENTAÇÃO MOCK PARA TESTES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Porta mock com roteiro de respostas.
///
/// Cada chamada consome a próxima entrada do roteiro, na ordem. Roteiro
/// esgotado produz erro de validação (simulando um modelo que parou de
/// cooperar). Determinística por construção: mesma sequência de chamadas,
/// mesmas respostas.
pub struct MockLlmPort {
    script: Mutex<VecDeque<Result<Value, String>>>,
    tokens_per_call: u64,
    calls: AtomicUsize,
    /// Se true, roteiro esgotado repete a última resposta em vez de falhar
    repeat_last: bool,
    last: Mutex<Option<Result<Value, String>>>,
}

impl MockLlmPort {
    /// Cria com um roteiro de respostas bem-sucedidas
    pub fn with_script(responses: Vec<Value>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            tokens_per_call: 100,
            calls: AtomicUsize::new(0),
            repeat_last: false,
            last: Mutex::new(None),
        }
    }

    /// Cria com um roteiro misto (Ok = objeto, Err = falha de validação)
    pub fn with_outcomes(outcomes: Vec<Result<Value, String>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            tokens_per_call: 100,
            calls: AtomicUsize::new(0),
            repeat_last: false,
            last: Mutex::new(None),
        }
    }

    /// Porta que sempre falha na validação (LLM adversarial)
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            tokens_per_call: 100,
            calls: AtomicUsize::new(0),
            repeat_last: false,
            last: Mutex::new(None),
        }
    }

    /// Define tokens reportados por chamada
    pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    /// Roteiro esgotado repete a última resposta
    pub fn with_repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Total de chamadas recebidas
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmPort for MockLlmPort {
    async fn generate_object(
        &self,
        schema: &SchemaSpec,
        _system: &str,
        _messages: &[ChatMessage],
        opts: &GenerateOpts,
    ) -> Result<LlmReply, LlmError> {
        if opts.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.pop_front()
        };

        let outcome = match next {
            Some(outcome) => {
                if self.repeat_last {
                    *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome.clone());
                }
                outcome
            }
            None => {
                if self.repeat_last {
                    let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
                    match last.clone() {
                        Some(outcome) => outcome,
                        None => Err(format!("mock script exhausted for {}", schema.name)),
                    }
                } else {
                    Err(format!("mock script exhausted for {}", schema.name))
                }
            }
        };

        match outcome {
            Ok(object) => Ok(LlmReply {
                object,
                tokens_used: self.tokens_per_call,
            }),
            Err(detail) => Err(LlmError::Validation {
                detail,
                tokens_used: self.tokens_per_call,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> SchemaSpec {
        SchemaSpec::new("test", json!({"type": "object"}))
    }

    #[tokio::test]
    async fn test_mock_script_order() {
        let port = MockLlmPort::with_script(vec![json!({"n": 1}), json!({"n": 2})]);
        let opts = GenerateOpts::default();

        let first = port.generate_object(&spec(), "s", &[], &opts).await.unwrap();
        let second = port.generate_object(&spec(), "s", &[], &opts).await.unwrap();
        assert_eq!(first.object["n"], json!(1));
        assert_eq!(second.object["n"], json!(2));
        assert_eq!(port.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_exhausted_fails_with_tokens() {
        let port = MockLlmPort::with_script(vec![]).with_tokens_per_call(42);
        let opts = GenerateOpts::default();

        let err = port.generate_object(&spec(), "s", &[], &opts).await.unwrap_err();
        assert_eq!(err.tokens_used(), 42);
    }

    #[tokio::test]
    async fn test_mock_cancelled() {
        let port = MockLlmPort::with_script(vec![json!({})]);
        let opts = GenerateOpts {
            cancel: {
                let token = CancellationToken::new();
                token.cancel();
                token
            },
            ..Default::default()
        };

        let err = port.generate_object(&spec(), "s", &[], &opts).await.unwrap_err();
        assert!(err.is_cancelled());
        // Cancelamento não consome o roteiro
        assert_eq!(port.call_count(), 0);
    }

    #[test]
    fn test_backoff_bounds() {
        for attempt in 0..3 {
            let delay = transport_backoff(attempt).as_millis() as u64;
            let base = 250 * (1 << attempt);
            // jitter de ±20%, com folga de 1ms para arredondamento
            assert!(delay + 1 >= base * 4 / 5, "delay {} below jitter floor", delay);
            assert!(delay <= base * 6 / 5 + 1, "delay {} above jitter ceiling", delay);
        }
    }
}
