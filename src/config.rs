// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CONFIGURAÇÃO
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Carga em camadas: defaults <- arquivo JSON (SONDA_CONFIG) <- ambiente.
// O struct validado é o único que o controller enxerga. Erros aqui abortam
// a criação da sessão - configuração não é retentável.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::agent::sandbox::{BoaCodeRunner, CodeRunner};
use crate::agent::ResearchRequest;
use crate::llm::{LlmPort, MockLlmPort, OpenAiPort};
use crate::search::{FetchPort, HttpFetchPort, JinaSearchPort, MockSearchPort, SearchPort};

/// Erros de configuração - não retentáveis
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file error: {0}")]
    Io(String),

    #[error("config file parse error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing required setting: {0}")]
    Missing(String),
}

/// Overrides parciais vindos do arquivo JSON
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    token_budget: Option<u64>,
    max_steps: Option<usize>,
    max_duration_ms: Option<u64>,
    max_bad_attempts: Option<u32>,
    llm_provider: Option<String>,
    search_provider: Option<String>,
    model: Option<String>,
    openai_base_url: Option<String>,
    language_code: Option<String>,
    tool_models: Option<HashMap<String, String>>,
    respect_robots: Option<bool>,
}

/// Configuração do runtime Tokio
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Número fixo de worker threads; None usa min(cores, max_threads)
    pub worker_threads: Option<usize>,
    /// Teto do cálculo dinâmico
    pub max_threads: usize,
    /// Blocking threads máximas
    pub max_blocking_threads: usize,
    /// Nome das threads
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_threads: 16,
            max_blocking_threads: 512,
            thread_name: "sonda".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Worker threads efetivas: fixo ou min(cores, max_threads)
    pub fn effective_worker_threads(&self) -> usize {
        if let Some(threads) = self.worker_threads {
            threads
        } else {
            std::cmp::min(num_cpus::get(), self.max_threads)
        }
    }
}

/// Configuração validada da aplicação
#[derive(Debug, Clone)]
pub struct Config {
    /// Budget de tokens por sessão
    pub token_budget: u64,
    /// Limite de passos por sessão
    pub max_steps: usize,
    /// Duração máxima por sessão (ms)
    pub max_duration_ms: u64,
    /// Tentativas por dimensão de avaliação
    pub max_bad_attempts: u32,
    /// Provedor LLM: "openai" ou "mock"
    pub llm_provider: String,
    /// Provedor de busca: "jina" ou "mock"
    pub search_provider: String,
    /// Modelo padrão
    pub model: String,
    /// Seleção de modelo por tool (opcional): "evaluator" -> modelo
    pub tool_models: HashMap<String, String>,
    /// API key OpenAI
    pub openai_api_key: Option<String>,
    /// Endpoint OpenAI customizado
    pub openai_base_url: Option<String>,
    /// API key Jina
    pub jina_api_key: Option<String>,
    /// Idioma das respostas
    pub language_code: Option<String>,
    /// Se o fetch deve respeitar robots.txt
    pub respect_robots: bool,
    /// Runtime Tokio
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_budget: crate::agent::budget::DEFAULT_TOKEN_BUDGET,
            max_steps: 20,
            max_duration_ms: 5 * 60 * 1000,
            max_bad_attempts: 3,
            llm_provider: "mock".to_string(),
            search_provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            tool_models: HashMap::new(),
            openai_api_key: None,
            openai_base_url: None,
            jina_api_key: None,
            language_code: None,
            respect_robots: false,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Carga completa em camadas: defaults <- arquivo <- ambiente
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SONDA_CONFIG") {
            config.apply_file(&path)?;
        }

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Aplica overrides do arquivo JSON
    fn apply_file(&mut self, path: &str) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let file: FileConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if let Some(v) = file.token_budget {
            self.token_budget = v;
        }
        if let Some(v) = file.max_steps {
            self.max_steps = v;
        }
        if let Some(v) = file.max_duration_ms {
            self.max_duration_ms = v;
        }
        if let Some(v) = file.max_bad_attempts {
            self.max_bad_attempts = v;
        }
        if let Some(v) = file.llm_provider {
            self.llm_provider = v;
        }
        if let Some(v) = file.search_provider {
            self.search_provider = v;
        }
        if let Some(v) = file.model {
            self.model = v;
        }
        if let Some(v) = file.openai_base_url {
            self.openai_base_url = Some(v);
        }
        if let Some(v) = file.language_code {
            self.language_code = Some(v);
        }
        if let Some(v) = file.tool_models {
            self.tool_models = v;
        }
        if let Some(v) = file.respect_robots {
            self.respect_robots = v;
        }

        log::info!("📦 Config carregada de {}", path);
        Ok(())
    }

    /// Aplica overrides do ambiente (última camada, vence as demais)
    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse::<u64>("TOKEN_BUDGET")? {
            self.token_budget = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_STEPS")? {
            self.max_steps = v;
        }
        if let Some(v) = env_parse::<u64>("MAX_DURATION_MS")? {
            self.max_duration_ms = v;
        }
        if let Some(v) = env_parse::<u32>("MAX_BAD_ATTEMPTS")? {
            self.max_bad_attempts = v;
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm_provider = v.to_lowercase();
        }
        if let Ok(v) = std::env::var("SEARCH_PROVIDER") {
            self.search_provider = v.to_lowercase();
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
            self.openai_base_url = Some(v);
        }
        if let Ok(v) = std::env::var("OPENAI_MODEL") {
            self.model = v;
        }
        if let Ok(v) = std::env::var("JINA_API_KEY") {
            self.jina_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("RESPONSE_LANGUAGE") {
            self.language_code = Some(v);
        }
        if let Ok(v) = std::env::var("RESPECT_ROBOTS") {
            self.respect_robots = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env_parse::<usize>("TOKIO_THREADS")? {
            self.runtime.worker_threads = Some(v);
        }
        if let Some(v) = env_parse::<usize>("TOKIO_MAX_THREADS")? {
            self.runtime.max_threads = v;
        }
        if let Some(v) = env_parse::<usize>("TOKIO_MAX_BLOCKING")? {
            self.runtime.max_blocking_threads = v;
        }
        Ok(())
    }

    /// Valida o conjunto final
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_budget == 0 {
            return Err(ConfigError::Invalid("TOKEN_BUDGET must be > 0".into()));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("MAX_STEPS must be > 0".into()));
        }
        if self.max_duration_ms == 0 {
            return Err(ConfigError::Invalid("MAX_DURATION_MS must be > 0".into()));
        }

        match self.llm_provider.as_str() {
            "mock" => {}
            "openai" => {
                if self.openai_api_key.is_none() {
                    return Err(ConfigError::Missing("OPENAI_API_KEY".into()));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown LLM_PROVIDER '{}'",
                    other
                )));
            }
        }

        match self.search_provider.as_str() {
            "mock" => {}
            "jina" => {
                if self.jina_api_key.is_none() {
                    return Err(ConfigError::Missing("JINA_API_KEY".into()));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown SEARCH_PROVIDER '{}'",
                    other
                )));
            }
        }

        Ok(())
    }

    /// Request com os defaults desta configuração
    pub fn request_for(&self, question: impl Into<String>) -> ResearchRequest {
        ResearchRequest {
            question: question.into(),
            token_budget: self.token_budget,
            max_bad_attempts: self.max_bad_attempts,
            max_steps: self.max_steps,
            max_duration_ms: self.max_duration_ms,
            language_code: self.language_code.clone(),
            search_provider: Some(self.search_provider.clone()),
            ..Default::default()
        }
    }

    /// Instancia a porta LLM do provedor configurado
    pub fn build_llm_port(&self) -> Arc<dyn LlmPort> {
        match self.llm_provider.as_str() {
            "openai" => {
                let key = self.openai_api_key.clone().unwrap_or_default();
                let port = match &self.openai_base_url {
                    Some(base) => OpenAiPort::with_base_url(key, self.model.clone(), base.clone()),
                    None => OpenAiPort::new(key, self.model.clone()),
                };
                Arc::new(port)
            }
            // Mock de demonstração: responde direto no primeiro passo
            _ => Arc::new(MockLlmPort::with_script(vec![
                serde_json::json!({
                    "needs_definitive": true,
                    "needs_freshness": false,
                    "needs_plurality": false,
                    "needs_completeness": false,
                }),
                serde_json::json!({
                    "action": "answer",
                    "think": "mock provider, answering directly",
                    "answer": "This is a mock answer. Set LLM_PROVIDER=openai (and OPENAI_API_KEY) for real research.",
                    "references": [],
                }),
            ])),
        }
    }

    /// Instancia a porta de busca do provedor configurado
    pub fn build_search_port(&self) -> Arc<dyn SearchPort> {
        match self.search_provider.as_str() {
            "jina" => Arc::new(JinaSearchPort::new(
                self.jina_api_key.clone().unwrap_or_default(),
            )),
            _ => Arc::new(MockSearchPort::new()),
        }
    }

    /// Instancia a porta de leitura de páginas
    pub fn build_fetch_port(&self) -> Arc<dyn FetchPort> {
        Arc::new(HttpFetchPort::new().with_robots(self.respect_robots))
    }

    /// Instancia o runner de código
    pub fn build_code_runner(&self) -> Arc<dyn CodeRunner> {
        Arc::new(BoaCodeRunner::new())
    }
}

/// Parse opcional de variável de ambiente numérica
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{}='{}' is not a valid value", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Cria o runtime Tokio com a configuração fornecida
pub fn create_tokio_runtime(config: &RuntimeConfig) -> std::io::Result<tokio::runtime::Runtime> {
    let worker_threads = config.effective_worker_threads();

    log::info!(
        "🚀 Runtime Tokio: {} workers, {} blocking max",
        worker_threads,
        config.max_blocking_threads
    );

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .max_blocking_threads(config.max_blocking_threads)
        .thread_name(&config.thread_name)
        .enable_all()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_openai_requires_key() {
        let config = Config {
            llm_provider: "openai".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        let config = Config {
            llm_provider: "openai".into(),
            openai_api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = Config {
            llm_provider: "martian".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let config = Config {
            token_budget: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_for_carries_limits() {
        let config = Config {
            token_budget: 12345,
            max_steps: 7,
            max_bad_attempts: 2,
            ..Default::default()
        };
        let request = config.request_for("q?");
        assert_eq!(request.token_budget, 12345);
        assert_eq!(request.max_steps, 7);
        assert_eq!(request.max_bad_attempts, 2);
    }

    #[test]
    fn test_effective_worker_threads() {
        let mut runtime = RuntimeConfig::default();
        runtime.worker_threads = Some(4);
        assert_eq!(runtime.effective_worker_threads(), 4);

        runtime.worker_threads = None;
        assert_eq!(
            runtime.effective_worker_threads(),
            std::cmp::min(num_cpus::get(), 16)
        );
    }
}
