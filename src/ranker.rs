// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// URL RANKER
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Deduplica, pontua e ordena URLs candidatas. Chaveado por URL canônica:
// fragmentos removidos, host minúsculo, trailing slash normalizado,
// parâmetros de tracking descartados.
//
// Score = freq·w1 + hostname·w2 + path·w3 + rerank·w4 − penalidade de host.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::HashMap;

use crate::types::{SearchHit, Url};

/// Parâmetros de query descartados na canonicalização
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "ref",
    "ref_src",
    "igshid",
    "mc_cid",
    "mc_eid",
];

/// Falhas no mesmo host antes de rebaixá-lo no ranking
const HOST_DEMOTION_THRESHOLD: u32 = 2;

/// Estado de visita de uma URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    /// Descoberta mas nunca selecionada
    Unseen,
    /// Selecionada para leitura no step atual
    Queued,
    /// Lida com sucesso (conteúdo disponível)
    Visited,
    /// Leitura falhou
    Failed,
}

/// Registro de uma URL candidata
#[derive(Debug, Clone)]
pub struct UrlRecord {
    /// URL canônica
    pub url: Url,
    /// Título reportado pela busca ou pela leitura
    pub title: String,
    /// Snippet da busca
    pub snippet: String,
    /// Step em que a URL foi descoberta
    pub source_step: usize,
    /// Estado de visita
    pub visit_state: VisitState,
    /// Frequência: quantas buscas retornaram esta URL
    pub frequency: u32,
    /// Score de rerank do provedor (máximo observado)
    pub rerank_score: f32,
    /// Último erro de leitura (se houver)
    pub last_error: Option<String>,
    /// Conteúdo extraído (possivelmente truncado), quando visitada
    pub content: Option<String>,
}

/// Pesos do score final
#[derive(Debug, Clone)]
pub struct RankerWeights {
    pub frequency: f32,
    pub hostname: f32,
    pub path: f32,
    pub rerank: f32,
    pub bad_host_penalty: f32,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self {
            frequency: 1.0,
            hostname: 2.0,
            path: 1.0,
            rerank: 3.0,
            bad_host_penalty: 10.0,
        }
    }
}

/// Ranker de URLs da sessão.
///
/// Único escritor: o controller. A ordem de inserção é preservada para que
/// empates no score sejam resolvidos deterministicamente.
#[derive(Debug, Clone)]
pub struct UrlRanker {
    records: HashMap<String, UrlRecord>,
    /// Ordem de inserção (desempate determinístico)
    insertion_order: Vec<String>,
    weights: RankerWeights,
    boost_hostnames: Vec<String>,
    bad_hostnames: Vec<String>,
    only_hostnames: Vec<String>,
    /// Falhas acumuladas por host (para rebaixamento)
    host_failures: HashMap<String, u32>,
}

impl UrlRanker {
    /// Cria um ranker com pesos padrão
    pub fn new() -> Self {
        Self::with_weights(RankerWeights::default())
    }

    /// Cria um ranker com pesos customizados
    pub fn with_weights(weights: RankerWeights) -> Self {
        Self {
            records: HashMap::new(),
            insertion_order: Vec::new(),
            weights,
            boost_hostnames: Vec::new(),
            bad_hostnames: Vec::new(),
            only_hostnames: Vec::new(),
            host_failures: HashMap::new(),
        }
    }

    /// Define as listas de hosts do caller (boost / bad / only)
    pub fn with_host_lists(
        mut self,
        boost: Vec<String>,
        bad: Vec<String>,
        only: Vec<String>,
    ) -> Self {
        self.boost_hostnames = boost.into_iter().map(|h| h.to_lowercase()).collect();
        self.bad_hostnames = bad.into_iter().map(|h| h.to_lowercase()).collect();
        self.only_hostnames = only.into_iter().map(|h| h.to_lowercase()).collect();
        self
    }

    /// Mescla resultados de busca no ranker.
    ///
    /// URLs repetidas têm a frequência incrementada e o melhor rerank score
    /// preservado. Com `only_hostnames` não vazio, hosts fora da lista são
    /// descartados.
    pub fn merge(&mut self, hits: &[SearchHit], source_step: usize) -> usize {
        let mut added = 0;

        for hit in hits {
            let Some(canonical) = canonicalize_url(&hit.url) else {
                continue;
            };
            let Some(host) = hostname_of(&canonical) else {
                continue;
            };

            if !self.only_hostnames.is_empty()
                && !self.only_hostnames.iter().any(|h| host_matches(&host, h))
            {
                continue;
            }

            match self.records.get_mut(&canonical) {
                Some(record) => {
                    record.frequency += 1;
                    if let Some(score) = hit.rerank_score {
                        record.rerank_score = record.rerank_score.max(score);
                    }
                    if record.snippet.is_empty() {
                        record.snippet = hit.snippet.clone();
                    }
                }
                None => {
                    self.records.insert(
                        canonical.clone(),
                        UrlRecord {
                            url: canonical.clone(),
                            title: hit.title.clone(),
                            snippet: hit.snippet.clone(),
                            source_step,
                            visit_state: VisitState::Unseen,
                            frequency: 1,
                            rerank_score: hit.rerank_score.unwrap_or(0.0),
                            last_error: None,
                            content: None,
                        },
                    );
                    self.insertion_order.push(canonical);
                    added += 1;
                }
            }
        }

        added
    }

    /// Score final de um registro
    pub fn score(&self, record: &UrlRecord) -> f32 {
        let host = hostname_of(&record.url).unwrap_or_default();

        let hostname_boost = if self.boost_hostnames.iter().any(|h| host_matches(&host, h)) {
            1.5
        } else if TRUSTED_HOSTS.iter().any(|h| host_matches(&host, h)) {
            1.2
        } else {
            1.0
        };

        let is_bad_host = self.bad_hostnames.iter().any(|h| host_matches(&host, h));
        let is_demoted = self
            .host_failures
            .get(&host)
            .map(|n| *n >= HOST_DEMOTION_THRESHOLD)
            .unwrap_or(false);

        let penalty = if is_bad_host || is_demoted {
            self.weights.bad_host_penalty
        } else {
            0.0
        };

        record.frequency as f32 * self.weights.frequency
            + hostname_boost * self.weights.hostname
            + path_boost(&record.url) * self.weights.path
            + record.rerank_score * self.weights.rerank
            - penalty
    }

    /// Retorna as top-k URLs ainda não visitadas, ordenadas por score.
    ///
    /// Empates são resolvidos pela ordem de inserção, de modo que execuções
    /// com entradas idênticas produzem a mesma seleção.
    pub fn sort_select_urls(&self, k: usize) -> Vec<&UrlRecord> {
        let mut candidates: Vec<(usize, &UrlRecord)> = self
            .insertion_order
            .iter()
            .enumerate()
            .filter_map(|(idx, url)| self.records.get(url).map(|r| (idx, r)))
            .filter(|(_, r)| matches!(r.visit_state, VisitState::Unseen | VisitState::Queued))
            .collect();

        candidates.sort_by(|(ia, a), (ib, b)| {
            let sa = self.score(a);
            let sb = self.score(b);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });

        candidates.into_iter().take(k).map(|(_, r)| r).collect()
    }

    /// Marca uma URL como enfileirada para leitura
    pub fn mark_queued(&mut self, url: &str) {
        if let Some(canonical) = canonicalize_url(url) {
            if let Some(record) = self.records.get_mut(&canonical) {
                if record.visit_state == VisitState::Unseen {
                    record.visit_state = VisitState::Queued;
                }
            }
        }
    }

    /// Marca uma URL como visitada, armazenando conteúdo e título.
    ///
    /// URLs desconhecidas (ex: fornecidas diretamente pelo LLM sem busca
    /// prévia) são registradas na hora.
    pub fn mark_visited(&mut self, url: &str, title: Option<&str>, content: &str, step: usize) {
        let Some(canonical) = canonicalize_url(url) else {
            return;
        };

        let record = self.ensure_record(&canonical, step);
        record.visit_state = VisitState::Visited;
        record.content = Some(content.to_string());
        record.last_error = None;
        if let Some(t) = title {
            if !t.is_empty() {
                record.title = t.to_string();
            }
        }
    }

    /// Marca uma URL como falha e acumula a falha do host
    pub fn mark_failed(&mut self, url: &str, error: &str, step: usize) {
        let Some(canonical) = canonicalize_url(url) else {
            return;
        };

        if let Some(host) = hostname_of(&canonical) {
            let count = self.host_failures.entry(host.clone()).or_insert(0);
            *count += 1;
            if *count == HOST_DEMOTION_THRESHOLD {
                log::debug!("⬇️ Host {} rebaixado após {} falhas", host, count);
            }
        }

        let record = self.ensure_record(&canonical, step);
        record.visit_state = VisitState::Failed;
        record.last_error = Some(error.to_string());
    }

    fn ensure_record(&mut self, canonical: &str, step: usize) -> &mut UrlRecord {
        use std::collections::hash_map::Entry;

        match self.records.entry(canonical.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.insertion_order.push(canonical.to_string());
                entry.insert(UrlRecord {
                    url: canonical.to_string(),
                    title: String::new(),
                    snippet: String::new(),
                    source_step: step,
                    visit_state: VisitState::Unseen,
                    frequency: 1,
                    rerank_score: 0.0,
                    last_error: None,
                    content: None,
                })
            }
        }
    }

    /// Consulta o estado de visita de uma URL
    pub fn visit_state(&self, url: &str) -> Option<VisitState> {
        canonicalize_url(url).and_then(|c| self.records.get(&c).map(|r| r.visit_state))
    }

    /// URLs já visitadas ou com falha (não devem ser relidas)
    pub fn is_spent(&self, url: &str) -> bool {
        matches!(
            self.visit_state(url),
            Some(VisitState::Visited) | Some(VisitState::Failed)
        )
    }

    /// URLs em um estado específico, em ordem de inserção
    pub fn urls_in_state(&self, state: VisitState) -> Vec<Url> {
        self.insertion_order
            .iter()
            .filter_map(|u| self.records.get(u))
            .filter(|r| r.visit_state == state)
            .map(|r| r.url.clone())
            .collect()
    }

    /// Todas as URLs conhecidas, em ordem de inserção
    pub fn all_urls(&self) -> Vec<Url> {
        self.insertion_order.clone()
    }

    /// URLs cuja leitura foi tentada (visitadas + falhas)
    pub fn attempted_urls(&self) -> Vec<Url> {
        self.insertion_order
            .iter()
            .filter_map(|u| self.records.get(u))
            .filter(|r| matches!(r.visit_state, VisitState::Visited | VisitState::Failed))
            .map(|r| r.url.clone())
            .collect()
    }

    /// Acessa um registro pela URL
    pub fn get(&self, url: &str) -> Option<&UrlRecord> {
        canonicalize_url(url).and_then(|c| self.records.get(&c))
    }

    /// Quantidade de URLs conhecidas
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Se não há URLs registradas
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Quantidade de URLs disponíveis para leitura
    pub fn available(&self) -> usize {
        self.records
            .values()
            .filter(|r| matches!(r.visit_state, VisitState::Unseen | VisitState::Queued))
            .count()
    }
}

impl Default for UrlRanker {
    fn default() -> Self {
        Self::new()
    }
}

/// Hosts com boost embutido (documentação e fontes primárias)
const TRUSTED_HOSTS: &[&str] = &[
    "wikipedia.org",
    "arxiv.org",
    "github.com",
    "stackoverflow.com",
    "docs.rs",
    "rust-lang.org",
];

/// Canonicaliza uma URL: remove fragmento, minúsculas no host, descarta
/// parâmetros de tracking e normaliza trailing slash.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let mut parsed = url::Url::parse(raw).ok()?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    parsed.set_fragment(None);

    let host = parsed.host_str()?.to_lowercase();
    parsed.set_host(Some(&host)).ok()?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    urlencoding::encode(k).into_owned()
                } else {
                    format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    let mut result = parsed.to_string();

    // Normaliza trailing slash em paths não-raiz
    if result.ends_with('/') && parsed.path() != "/" && parsed.query().is_none() {
        result.pop();
    }

    Some(result)
}

/// Extrai o hostname (minúsculo) de uma URL
pub fn hostname_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Testa se `host` é igual a `pattern` ou subdomínio dele
fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

/// Boost baseado no path da URL
fn path_boost(url: &str) -> f32 {
    if url.contains("/docs/")
        || url.contains("/documentation/")
        || url.contains("/guide/")
        || url.contains("/tutorial/")
    {
        1.3
    } else if url.contains("/blog/") || url.contains("/news/") {
        1.1
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.into(),
            title: "t".into(),
            snippet: "s".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_canonicalize_strips_fragment_and_tracking() {
        let canonical =
            canonicalize_url("https://Example.COM/Page/?utm_source=x&id=3#section").unwrap();
        assert_eq!(canonical, "https://example.com/Page/?id=3");
    }

    #[test]
    fn test_canonicalize_trailing_slash() {
        assert_eq!(
            canonicalize_url("https://example.com/docs/").unwrap(),
            "https://example.com/docs"
        );
        // Raiz mantém a barra
        assert_eq!(
            canonicalize_url("https://example.com/").unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn test_canonicalize_rejects_non_http() {
        assert!(canonicalize_url("ftp://example.com/x").is_none());
        assert!(canonicalize_url("not a url").is_none());
    }

    #[test]
    fn test_merge_dedup_increments_frequency() {
        let mut ranker = UrlRanker::new();
        ranker.merge(&[hit("https://example.com/a")], 0);
        ranker.merge(&[hit("https://example.com/a#frag")], 1);

        assert_eq!(ranker.len(), 1);
        let record = ranker.get("https://example.com/a").unwrap();
        assert_eq!(record.frequency, 2);
        assert_eq!(record.source_step, 0);
    }

    #[test]
    fn test_only_hostnames_gate() {
        let mut ranker =
            UrlRanker::new().with_host_lists(vec![], vec![], vec!["example.com".into()]);
        ranker.merge(&[hit("https://example.com/a"), hit("https://other.com/b")], 0);

        assert_eq!(ranker.len(), 1);
        assert!(ranker.get("https://example.com/a").is_some());
    }

    #[test]
    fn test_bad_hostname_penalty() {
        let mut ranker =
            UrlRanker::new().with_host_lists(vec![], vec!["spam.com".into()], vec![]);
        ranker.merge(&[hit("https://spam.com/x"), hit("https://ok.com/x")], 0);

        let spam = ranker.get("https://spam.com/x").unwrap();
        let ok = ranker.get("https://ok.com/x").unwrap();
        assert!(ranker.score(spam) < ranker.score(ok));
    }

    #[test]
    fn test_sort_select_excludes_visited() {
        let mut ranker = UrlRanker::new();
        ranker.merge(&[hit("https://a.com/1"), hit("https://b.com/2")], 0);
        ranker.mark_visited("https://a.com/1", Some("A"), "content", 1);

        let selected = ranker.sort_select_urls(5);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].url, "https://b.com/2");
    }

    #[test]
    fn test_host_demotion_after_failures() {
        let mut ranker = UrlRanker::new();
        ranker.merge(
            &[
                hit("https://flaky.com/1"),
                hit("https://flaky.com/2"),
                hit("https://flaky.com/3"),
                hit("https://solid.com/1"),
            ],
            0,
        );

        ranker.mark_failed("https://flaky.com/1", "timeout", 1);
        ranker.mark_failed("https://flaky.com/2", "timeout", 2);

        let flaky = ranker.get("https://flaky.com/3").unwrap();
        let solid = ranker.get("https://solid.com/1").unwrap();
        assert!(ranker.score(flaky) < ranker.score(solid));
    }

    #[test]
    fn test_deterministic_tie_break() {
        let mut ranker = UrlRanker::new();
        ranker.merge(
            &[hit("https://x.com/1"), hit("https://y.com/1"), hit("https://z.com/1")],
            0,
        );

        let first: Vec<_> = ranker.sort_select_urls(3).iter().map(|r| r.url.clone()).collect();
        let second: Vec<_> = ranker.sort_select_urls(3).iter().map(|r| r.url.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], "https://x.com/1");
    }

    #[test]
    fn test_mark_visited_unknown_url_registers() {
        let mut ranker = UrlRanker::new();
        ranker.mark_visited("https://direct.com/page", Some("Direct"), "text", 2);

        assert_eq!(ranker.len(), 1);
        assert_eq!(
            ranker.visit_state("https://direct.com/page"),
            Some(VisitState::Visited)
        );
        assert_eq!(ranker.attempted_urls().len(), 1);
    }
}
