// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PORTAS DE BUSCA E LEITURA
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// SearchPort: busca SERP. FetchPort: leitura de página com extração de
// texto (Readability, fallback html2text) e truncamento. Ambas as portas
// recebem timeout próprio e o cancel token da sessão.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::types::{FetchedPage, SearchHit, SerpQuery};
use crate::utils::{clean_text, truncate_bytes};

/// Timeout padrão de busca
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout padrão de leitura de página
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Limite padrão de bytes de texto extraído por página
pub const DEFAULT_MAX_FETCH_BYTES: usize = 64 * 1024;

/// Opções por chamada de tool
#[derive(Debug, Clone)]
pub struct ToolCallOpts {
    /// Timeout desta chamada
    pub timeout: Duration,
    /// Sinal de cancelamento da sessão
    pub cancel: CancellationToken,
    /// Código de idioma para a busca (ex: "pt")
    pub language: Option<String>,
    /// Se resultados com imagem são aceitos
    pub with_images: bool,
}

impl Default for ToolCallOpts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SEARCH_TIMEOUT,
            cancel: CancellationToken::new(),
            language: None,
            with_images: false,
        }
    }
}

/// Erros do cliente de busca
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("search API error: {0}")]
    Api(String),

    #[error("search rate limit exceeded")]
    RateLimit,

    #[error("network error: {0}")]
    Network(String),

    #[error("search timed out after {0}ms")]
    Timeout(u64),

    #[error("search cancelled")]
    Cancelled,
}

/// Erros da leitura de páginas
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("http status {0}")]
    Status(u16),

    #[error("content extraction failed: {0}")]
    Extraction(String),

    #[error("disallowed by robots.txt")]
    RobotsDisallowed,

    #[error("fetch timed out after {0}ms")]
    Timeout(u64),

    #[error("fetch cancelled")]
    Cancelled,
}

/// Porta de busca SERP
#[async_trait]
pub trait SearchPort: Send + Sync {
    /// Executa uma busca e retorna os hits na ordem do provedor
    async fn query(
        &self,
        query: &SerpQuery,
        opts: &ToolCallOpts,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

/// Porta de leitura de páginas
#[async_trait]
pub trait FetchPort: Send + Sync {
    /// Busca uma URL e retorna o texto extraído (sem HTML, truncado)
    async fn fetch(&self, url: &str, opts: &ToolCallOpts) -> Result<FetchedPage, FetchError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IMPLEMENTAÇÃO JINA SEARCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cliente de busca via Jina (s.jina.ai)
pub struct JinaSearchPort {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl JinaSearchPort {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .pool_max_idle_per_host(8)
                .build()
                .unwrap_or_default(),
            api_key,
            endpoint: "https://s.jina.ai".into(),
        }
    }

    /// Endpoint customizado (testes e proxies)
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[async_trait]
impl SearchPort for JinaSearchPort {
    async fn query(
        &self,
        query: &SerpQuery,
        opts: &ToolCallOpts,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let mut url = format!("{}/?q={}", self.endpoint, urlencoding::encode(&query.q));
        if let Some(tbs) = &query.tbs {
            url.push_str(&format!("&tbs={}", urlencoding::encode(tbs)));
        }
        if let Some(lang) = &opts.language {
            url.push_str(&format!("&hl={}", urlencoding::encode(lang)));
        }

        let request = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .header("X-Respond-With", "no-content")
            .timeout(opts.timeout);

        let response = tokio::select! {
            _ = opts.cancel.cancelled() => return Err(SearchError::Cancelled),
            r = request.send() => r,
        };

        let response = response.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout(opts.timeout.as_millis() as u64)
            } else {
                SearchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SearchError::RateLimit);
        }
        if !status.is_success() {
            return Err(SearchError::Api(format!("status {}", status)));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SearchError::Api(format!("invalid body: {}", e)))?;

        let hits = payload["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let url = item["url"].as_str()?.to_string();
                        Some(SearchHit {
                            url,
                            title: item["title"].as_str().unwrap_or_default().to_string(),
                            snippet: item["description"].as_str().unwrap_or_default().to_string(),
                            published_at: item["date"].as_str().map(String::from),
                            rerank_score: item["relevance_score"]
                                .as_f64()
                                .map(|s| s as f32),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(hits)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IMPLEMENTAÇÃO HTTP FETCH (Readability + html2text)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Leitor de páginas: GET + extração Readability, fallback html2text.
pub struct HttpFetchPort {
    client: reqwest::Client,
    max_fetch_bytes: usize,
    respect_robots: bool,
    /// Cache de regras Disallow por host (só consultado com respect_robots)
    robots_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl HttpFetchPort {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .pool_max_idle_per_host(8)
                .user_agent("sonda-research/0.1")
                .build()
                .unwrap_or_default(),
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
            respect_robots: false,
            robots_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Limite de bytes de texto extraído
    pub fn with_max_fetch_bytes(mut self, max: usize) -> Self {
        self.max_fetch_bytes = max.max(1024);
        self
    }

    /// Habilita checagem de robots.txt
    pub fn with_robots(mut self, respect: bool) -> Self {
        self.respect_robots = respect;
        self
    }

    /// Consulta (com cache) as regras `Disallow` do host para User-agent *
    async fn robots_disallows(&self, parsed: &url::Url, opts: &ToolCallOpts) -> Vec<String> {
        let host = parsed.host_str().unwrap_or_default().to_string();

        {
            let cache = self.robots_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(rules) = cache.get(&host) {
                return rules.clone();
            }
        }

        let robots_url = format!(
            "{}://{}/robots.txt",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        );

        let body = tokio::select! {
            _ = opts.cancel.cancelled() => None,
            r = self
                .client
                .get(&robots_url)
                .timeout(Duration::from_secs(5))
                .send() => r.ok(),
        };

        let rules = match body {
            Some(resp) if resp.status().is_success() => {
                let text = resp.text().await.unwrap_or_default();
                parse_robots_disallows(&text)
            }
            _ => Vec::new(),
        };

        let mut cache = self.robots_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(host, rules.clone());
        rules
    }
}

impl Default for HttpFetchPort {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchPort for HttpFetchPort {
    async fn fetch(&self, url: &str, opts: &ToolCallOpts) -> Result<FetchedPage, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        if self.respect_robots {
            let disallows = self.robots_disallows(&parsed, opts).await;
            let path = parsed.path();
            if disallows.iter().any(|rule| path.starts_with(rule.as_str())) {
                return Err(FetchError::RobotsDisallowed);
            }
        }

        let request = self.client.get(url).timeout(opts.timeout);

        let response = tokio::select! {
            _ = opts.cancel.cancelled() => return Err(FetchError::Cancelled),
            r = request.send() => r,
        };

        let response = response.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(opts.timeout.as_millis() as u64)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = response.url().to_string();

        let html = tokio::select! {
            _ = opts.cancel.cancelled() => return Err(FetchError::Cancelled),
            r = response.text() => r.map_err(|e| FetchError::Network(e.to_string()))?,
        };

        let (title, text) = extract_text(&html, &final_url)?;
        let truncated = truncate_bytes(&text, self.max_fetch_bytes).to_string();

        Ok(FetchedPage {
            content_text: truncated,
            title,
            published_at: None,
            final_url,
        })
    }
}

/// Extrai (título, texto) de um HTML: Readability primeiro, html2text depois.
fn extract_text(html: &str, url: &str) -> Result<(Option<String>, String), FetchError> {
    let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

    if let Ok(product) = readability::extractor::extract(&mut html.as_bytes(), &parsed) {
        let text = clean_text(&product.text);
        if !text.is_empty() {
            let title = if product.title.is_empty() {
                None
            } else {
                Some(product.title)
            };
            return Ok((title, text));
        }
    }

    let fallback = html2text::from_read(html.as_bytes(), 100);
    let text = clean_text(&fallback);

    if text.is_empty() {
        return Err(FetchError::Extraction("no text content".into()));
    }

    Ok((None, text))
}

/// Extrai os prefixos `Disallow` da seção `User-agent: *`
fn parse_robots_disallows(robots: &str) -> Vec<String> {
    let mut rules = Vec::new();
    let mut applies = false;

    for line in robots.lines() {
        let line = line.trim();
        if let Some(agent) = line.strip_prefix("User-agent:") {
            applies = agent.trim() == "*";
        } else if applies {
            if let Some(path) = line.strip_prefix("Disallow:") {
                let path = path.trim();
                if !path.is_empty() {
                    rules.push(path.to_string());
                }
            }
        }
    }

    rules
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IMPLEMENTAÇÕES MOCK PARA TESTES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Porta de busca mock: sempre retorna os mesmos hits
#[derive(Debug, Default)]
pub struct MockSearchPort {
    hits: Vec<SearchHit>,
    fail: bool,
}

impl MockSearchPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self { hits, fail: false }
    }

    /// Porta que sempre falha (simula API fora do ar)
    pub fn failing() -> Self {
        Self {
            hits: vec![],
            fail: true,
        }
    }
}

#[async_trait]
impl SearchPort for MockSearchPort {
    async fn query(
        &self,
        _query: &SerpQuery,
        opts: &ToolCallOpts,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if opts.cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        if self.fail {
            return Err(SearchError::Api("mock failure".into()));
        }
        Ok(self.hits.clone())
    }
}

/// Porta de leitura mock com páginas roteirizadas por URL.
///
/// `delay` permite simular leituras lentas para testes de cancelamento.
#[derive(Debug, Default)]
pub struct MockFetchPort {
    pages: HashMap<String, FetchedPage>,
    delay: Option<Duration>,
}

impl MockFetchPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra uma página para a URL
    pub fn with_page(mut self, url: &str, text: &str, title: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                content_text: text.to_string(),
                title: Some(title.to_string()),
                published_at: None,
                final_url: url.to_string(),
            },
        );
        self
    }

    /// Atraso artificial antes de responder
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl FetchPort for MockFetchPort {
    async fn fetch(&self, url: &str, opts: &ToolCallOpts) -> Result<FetchedPage, FetchError> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = opts.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if opts.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status(404))
    }
}
