// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STEP EXECUTOR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Um handler por tipo de ação. Handlers não mutam o estado do controller:
// recebem referências de leitura e devolvem um StepDelta com os efeitos
// declarados. Fan-outs paralelos coletam resultados em ordem de entrada
// (join_all), independente da ordem de conclusão.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::agent::sandbox::{CodeRunner, SandboxLimits};
use crate::agent::{CandidateAnswer, DiaryEntry, SessionContext, StepDelta, VisitOutcome};
use crate::knowledge::KnowledgeStore;
use crate::llm::{ChatMessage, GenerateOpts, LlmPort};
use crate::ranker::UrlRanker;
use crate::schema;
use crate::search::{FetchPort, SearchPort, ToolCallOpts, DEFAULT_FETCH_TIMEOUT, DEFAULT_SEARCH_TIMEOUT};
use crate::types::{KnowledgeItem, KnowledgeType, Reference, SerpQuery, Url};
use crate::utils::preview;

/// Configuração do executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Máximo de queries por passo de busca
    pub max_queries_per_step: usize,
    /// Máximo de URLs lidas por passo
    pub max_urls_per_step: usize,
    /// Máximo de sub-perguntas adicionadas por reflexão
    pub max_gaps_per_step: usize,
    /// Tamanho da fila de gaps que desabilita reflect
    pub gap_queue_soft_bound: usize,
    /// Timeout de busca
    pub search_timeout: Duration,
    /// Timeout de leitura de página
    pub fetch_timeout: Duration,
    /// Limites do sandbox de código
    pub sandbox_limits: SandboxLimits,
    /// Idioma das buscas
    pub search_language: Option<String>,
    /// Se resultados com imagem são aceitos
    pub with_images: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_queries_per_step: 5,
            max_urls_per_step: 5,
            max_gaps_per_step: 2,
            gap_queue_soft_bound: 8,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            sandbox_limits: SandboxLimits::default(),
            search_language: None,
            with_images: false,
        }
    }
}

/// Executor de ações do agente
pub struct StepExecutor {
    llm: Arc<dyn LlmPort>,
    search: Arc<dyn SearchPort>,
    fetch: Arc<dyn FetchPort>,
    runner: Arc<dyn CodeRunner>,
    config: ExecutorConfig,
}

impl StepExecutor {
    /// Cria o executor com as portas fornecidas
    pub fn new(
        llm: Arc<dyn LlmPort>,
        search: Arc<dyn SearchPort>,
        fetch: Arc<dyn FetchPort>,
        runner: Arc<dyn CodeRunner>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            llm,
            search,
            fetch,
            runner,
            config,
        }
    }

    fn tool_opts(&self, timeout: Duration, cancel: &CancellationToken) -> ToolCallOpts {
        ToolCallOpts {
            timeout,
            cancel: cancel.clone(),
            language: self.config.search_language.clone(),
            with_images: self.config.with_images,
        }
    }

    /// Handler de search: reescreve queries, deduplica, executa em paralelo
    /// e devolve os hits para o ranker. Reabilita answer.
    pub async fn handle_search(
        &self,
        queries: Vec<SerpQuery>,
        think: String,
        ctx: &SessionContext,
        cancel: &CancellationToken,
    ) -> StepDelta {
        let mut delta = StepDelta {
            enable_answer: true,
            ..Default::default()
        };

        // Reescrita opcional via LLM; em falha usa as queries originais
        let (rewritten, rewrite_tokens) = self.rewrite_queries(&queries, ctx, cancel).await;
        delta.tokens_used += rewrite_tokens;

        // Dedup contra queries já executadas e entre si
        let mut unique: Vec<SerpQuery> = Vec::new();
        for query in rewritten {
            let dup_session = ctx.is_duplicate_query(&query.q);
            let dup_step = unique
                .iter()
                .any(|u| crate::utils::jaccard_similarity(&u.q, &query.q) >= 0.9);
            if !dup_session && !dup_step && !query.q.trim().is_empty() {
                unique.push(query);
            }
        }
        unique.truncate(self.config.max_queries_per_step);

        if unique.is_empty() {
            log::warn!("🔍 Todas as queries eram duplicadas, nada a buscar");
            delta.diary = Some(DiaryEntry::Search {
                queries: vec![],
                urls_found: 0,
                think,
            });
            return delta;
        }

        log::info!("🔍 Executando {} buscas em paralelo", unique.len());

        let opts = self.tool_opts(self.config.search_timeout, cancel);
        let futures: Vec<_> = unique
            .iter()
            .map(|query| self.search.query(query, &opts))
            .collect();

        // Coleta em ordem de entrada, não de conclusão
        let results = join_all(futures).await;

        let mut success_count = 0;
        let mut error_count = 0;
        for result in results {
            match result {
                Ok(hits) => {
                    delta.url_candidates.extend(hits);
                    success_count += 1;
                }
                Err(e) => {
                    log::warn!("❌ Busca falhou: {}", e);
                    error_count += 1;
                }
            }
        }

        log::info!(
            "🔍 Busca concluída: {} hits | ✅ {} ok | ❌ {} erros",
            delta.url_candidates.len(),
            success_count,
            error_count
        );

        delta.executed_queries = unique.iter().map(|q| q.q.clone()).collect();
        delta.tool_failed = success_count == 0;
        delta.tool_succeeded = success_count > 0;
        delta.diary = Some(DiaryEntry::Search {
            queries: unique,
            urls_found: delta.url_candidates.len(),
            think,
        });

        delta
    }

    /// Reescreve/expande queries com o LLM. Não-fatal: em qualquer falha
    /// devolve as queries originais.
    async fn rewrite_queries(
        &self,
        queries: &[SerpQuery],
        ctx: &SessionContext,
        cancel: &CancellationToken,
    ) -> (Vec<SerpQuery>, u64) {
        let spec = schema::query_rewriter_schema();
        let system = "You are a search query optimizer. Rewrite the given queries into \
                      effective web search keywords. Keep the set small and diverse; \
                      do not invent topics beyond the research question.";
        let user = format!(
            "Research question: {}\n\nQueries to rewrite:\n{}",
            ctx.original_question(),
            queries
                .iter()
                .map(|q| format!("- {}", q.q))
                .collect::<Vec<_>>()
                .join("\n")
        );

        let opts = GenerateOpts {
            cancel: cancel.clone(),
            ..Default::default()
        };
        let messages = [ChatMessage::user(user)];

        match self.llm.generate_object(&spec, system, &messages, &opts).await {
            Ok(reply) => {
                let rewritten = schema::parse_rewritten_queries(&reply.object);
                if rewritten.is_empty() {
                    (queries.to_vec(), reply.tokens_used)
                } else {
                    log::debug!(
                        "✏️ Queries reescritas: {:?}",
                        rewritten.iter().map(|q| &q.q).collect::<Vec<_>>()
                    );
                    (rewritten, reply.tokens_used)
                }
            }
            Err(e) => {
                log::debug!("✏️ Reescrita de queries falhou ({}), usando originais", e);
                (queries.to_vec(), e.tokens_used())
            }
        }
    }

    /// Handler de visit: lê URLs novas em paralelo com timeout, devolve
    /// conteúdo como conhecimento e marca visitas no delta. Reabilita answer.
    pub async fn handle_visit(
        &self,
        urls: Vec<Url>,
        think: String,
        current_question: &str,
        ranker: &UrlRanker,
        cancel: &CancellationToken,
    ) -> StepDelta {
        let mut delta = StepDelta {
            enable_answer: true,
            ..Default::default()
        };

        // Filtra URLs já gastas (visitadas ou com falha)
        let mut to_read: Vec<Url> = urls
            .into_iter()
            .filter(|u| !ranker.is_spent(u))
            .collect();

        // LLM só escolheu URLs repetidas: cai para as top do ranker
        if to_read.is_empty() {
            to_read = ranker
                .sort_select_urls(self.config.max_urls_per_step)
                .into_iter()
                .map(|r| r.url.clone())
                .collect();
            if !to_read.is_empty() {
                log::info!("🔄 URLs do LLM já gastas; usando top-{} do ranker", to_read.len());
            }
        }

        to_read.truncate(self.config.max_urls_per_step);

        if to_read.is_empty() {
            log::warn!("⚠️ Nenhuma URL disponível para visitar");
            delta.diary = Some(DiaryEntry::Visit {
                urls: vec![],
                success_count: 0,
                think,
            });
            return delta;
        }

        log::info!("📖 Lendo {} URLs em paralelo", to_read.len());

        let opts = self.tool_opts(self.config.fetch_timeout, cancel);
        let futures: Vec<_> = to_read
            .iter()
            .map(|url| {
                let opts = opts.clone();
                async move {
                    // Timeout externo cobre portas que não honrem o interno
                    match tokio::time::timeout(
                        opts.timeout + Duration::from_secs(1),
                        self.fetch.fetch(url, &opts),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(crate::search::FetchError::Timeout(
                            opts.timeout.as_millis() as u64,
                        )),
                    }
                }
            })
            .collect();

        let results = join_all(futures).await;

        let mut success_count = 0;
        let mut cancelled = false;
        for (url, result) in to_read.iter().zip(results) {
            match result {
                Ok(page) => {
                    success_count += 1;
                    delta.knowledge.push(
                        KnowledgeItem::new(
                            current_question,
                            page.content_text.clone(),
                            KnowledgeType::Url,
                        )
                        .with_references(vec![Reference {
                            url: url.clone(),
                            title: page.title.clone().unwrap_or_default(),
                            published_at: page.published_at.clone(),
                            ..Default::default()
                        }]),
                    );
                    delta.visits.push(VisitOutcome {
                        url: url.clone(),
                        result: Ok((page.title, page.content_text)),
                    });
                }
                Err(crate::search::FetchError::Cancelled) => {
                    // Cancelamento não marca a URL como falha
                    cancelled = true;
                }
                Err(e) => {
                    log::warn!("❌ Falha ao ler {}: {}", url, e);
                    delta.visits.push(VisitOutcome {
                        url: url.clone(),
                        result: Err(e.to_string()),
                    });
                }
            }
        }

        log::info!(
            "📖 Leitura concluída: ✅ {} ok | ❌ {} falhas",
            success_count,
            to_read.len() - success_count
        );

        delta.tool_failed = success_count == 0 && !cancelled;
        delta.tool_succeeded = success_count > 0;
        delta.diary = Some(DiaryEntry::Visit {
            urls: to_read,
            success_count,
            think,
        });

        delta
    }

    /// Handler de reflect: deduplica sub-perguntas contra a fila existente
    /// e limita adições por passo. Sem I/O.
    pub fn handle_reflect(
        &self,
        questions: Vec<String>,
        think: String,
        ctx: &SessionContext,
    ) -> StepDelta {
        let mut delta = StepDelta::default();

        let mut accepted: Vec<String> = Vec::new();
        for question in questions {
            if accepted.len() >= self.config.max_gaps_per_step {
                break;
            }
            let dup_queue = ctx
                .gaps()
                .iter()
                .any(|g| crate::utils::jaccard_similarity(g, &question) >= super::context::GAP_SIMILARITY_THRESHOLD);
            let dup_step = accepted
                .iter()
                .any(|a| crate::utils::jaccard_similarity(a, &question) >= super::context::GAP_SIMILARITY_THRESHOLD);
            if !dup_queue && !dup_step && !question.trim().is_empty() {
                accepted.push(question);
            }
        }

        log::info!("🤔 Reflexão: {} sub-perguntas aceitas", accepted.len());

        // Fila saturada desabilita reflect no próximo passo
        if ctx.gaps().len() + accepted.len() > self.config.gap_queue_soft_bound {
            delta.disable_reflect = true;
        }

        delta.new_gaps = accepted.clone();
        delta.diary = Some(DiaryEntry::Reflect {
            questions: accepted,
            think,
        });

        delta
    }

    /// Handler de code: executa o programa no sandbox com o snapshot de
    /// conhecimento e registra a saída como conhecimento.
    pub async fn handle_code(
        &self,
        program: String,
        think: String,
        knowledge: &KnowledgeStore,
        cancel: &CancellationToken,
    ) -> StepDelta {
        let mut delta = StepDelta::default();

        log::info!("🖥️ Executando código em sandbox ({} bytes)", program.len());

        match self
            .runner
            .run(&program, knowledge.recent(), &self.config.sandbox_limits, cancel)
            .await
        {
            Ok(outcome) => {
                if outcome.exit_ok {
                    log::info!("✅ Código executado: {}", preview(&outcome.stdout, 120));
                    delta.knowledge.push(KnowledgeItem::new(
                        format!("Code result: {}", preview(&program, 80)),
                        outcome.stdout,
                        KnowledgeType::SideInfo,
                    ));
                    delta.tool_succeeded = true;
                } else {
                    log::warn!("❌ Código falhou: {}", preview(&outcome.stderr, 120));
                    delta.knowledge.push(KnowledgeItem::new(
                        format!("Code failed: {}", preview(&program, 80)),
                        outcome.stderr,
                        KnowledgeType::SideInfo,
                    ));
                }
                delta.diary = Some(DiaryEntry::Code {
                    program,
                    success: delta.tool_succeeded,
                    think,
                });
            }
            Err(e) => {
                log::warn!("💥 Sandbox: {}", e);
                delta.tool_failed = !matches!(e, crate::agent::sandbox::SandboxError::Cancelled);
                delta.diary = Some(DiaryEntry::Code {
                    program,
                    success: false,
                    think,
                });
            }
        }

        delta
    }

    /// Handler de answer: empacota a candidata; o controller roteia ao
    /// avaliador (ou ao caminho trivial do primeiro passo).
    pub fn handle_answer(
        &self,
        answer: String,
        references: Vec<Reference>,
        _think: String,
    ) -> StepDelta {
        StepDelta {
            candidate: Some(CandidateAnswer { answer, references }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::sandbox::MockCodeRunner;
    use crate::llm::MockLlmPort;
    use crate::search::{MockFetchPort, MockSearchPort};
    use crate::types::SearchHit;

    fn executor_with(
        llm: MockLlmPort,
        search: MockSearchPort,
        fetch: MockFetchPort,
    ) -> StepExecutor {
        StepExecutor::new(
            Arc::new(llm),
            Arc::new(search),
            Arc::new(fetch),
            Arc::new(MockCodeRunner::with_output("42")),
            ExecutorConfig::default(),
        )
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.into(),
            title: "t".into(),
            snippet: "s".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_search_merges_hits_and_enables_answer() {
        let executor = executor_with(
            MockLlmPort::failing(), // reescrita falha -> usa originais
            MockSearchPort::with_hits(vec![hit("https://a.com/1")]),
            MockFetchPort::new(),
        );
        let ctx = SessionContext::new("q");

        let delta = executor
            .handle_search(
                vec![SerpQuery::text("rust book")],
                "t".into(),
                &ctx,
                &CancellationToken::new(),
            )
            .await;

        assert!(delta.enable_answer);
        assert!(delta.tool_succeeded);
        assert!(!delta.tool_failed);
        assert_eq!(delta.url_candidates.len(), 1);
        assert_eq!(delta.executed_queries, vec!["rust book".to_string()]);
    }

    #[tokio::test]
    async fn test_search_all_failures_is_tool_failure() {
        let executor = executor_with(
            MockLlmPort::failing(),
            MockSearchPort::failing(),
            MockFetchPort::new(),
        );
        let ctx = SessionContext::new("q");

        let delta = executor
            .handle_search(
                vec![SerpQuery::text("x")],
                "t".into(),
                &ctx,
                &CancellationToken::new(),
            )
            .await;

        assert!(delta.tool_failed);
        assert!(delta.url_candidates.is_empty());
    }

    #[tokio::test]
    async fn test_search_skips_duplicate_queries() {
        let executor = executor_with(
            MockLlmPort::failing(),
            MockSearchPort::with_hits(vec![]),
            MockFetchPort::new(),
        );
        let mut ctx = SessionContext::new("q");
        ctx.record_executed_queries(vec!["rust book author".to_string()]);

        let delta = executor
            .handle_search(
                vec![SerpQuery::text("rust book author")],
                "t".into(),
                &ctx,
                &CancellationToken::new(),
            )
            .await;

        // Nada executado: a única query era duplicata
        assert!(delta.executed_queries.is_empty());
        assert!(!delta.tool_failed);
    }

    #[tokio::test]
    async fn test_visit_reads_and_records_knowledge() {
        let executor = executor_with(
            MockLlmPort::failing(),
            MockSearchPort::new(),
            MockFetchPort::new().with_page("https://a.com/1", "page text", "Page"),
        );
        let ranker = UrlRanker::new();

        let delta = executor
            .handle_visit(
                vec!["https://a.com/1".into()],
                "t".into(),
                "q",
                &ranker,
                &CancellationToken::new(),
            )
            .await;

        assert!(delta.enable_answer);
        assert!(delta.tool_succeeded);
        assert_eq!(delta.knowledge.len(), 1);
        assert_eq!(delta.knowledge[0].item_type, KnowledgeType::Url);
        assert_eq!(delta.visits.len(), 1);
        assert!(delta.visits[0].result.is_ok());
    }

    #[tokio::test]
    async fn test_visit_falls_back_to_ranker_when_spent() {
        let mut ranker = UrlRanker::new();
        ranker.merge(&[hit("https://a.com/1"), hit("https://b.com/2")], 0);
        ranker.mark_visited("https://a.com/1", Some("A"), "text", 0);

        let executor = executor_with(
            MockLlmPort::failing(),
            MockSearchPort::new(),
            MockFetchPort::new().with_page("https://b.com/2", "content b", "B"),
        );

        // LLM pediu só a URL já visitada
        let delta = executor
            .handle_visit(
                vec!["https://a.com/1".into()],
                "t".into(),
                "q",
                &ranker,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(delta.visits.len(), 1);
        assert_eq!(delta.visits[0].url, "https://b.com/2");
    }

    #[test]
    fn test_reflect_caps_and_dedups() {
        let executor = executor_with(
            MockLlmPort::failing(),
            MockSearchPort::new(),
            MockFetchPort::new(),
        );
        let ctx = SessionContext::new("who wrote the rust book?");

        let delta = executor.handle_reflect(
            vec![
                "who wrote the rust book".into(),          // dup da original
                "when was rust first released".into(),     // ok
                "what is the rust foundation".into(),      // ok
                "how is rust governed by committees".into(), // excede o cap
            ],
            "t".into(),
            &ctx,
        );

        assert_eq!(delta.new_gaps.len(), 2);
        assert_eq!(delta.new_gaps[0], "when was rust first released");
    }

    #[tokio::test]
    async fn test_code_records_output() {
        let executor = executor_with(
            MockLlmPort::failing(),
            MockSearchPort::new(),
            MockFetchPort::new(),
        );
        let knowledge = KnowledgeStore::new();

        let delta = executor
            .handle_code(
                "6 * 7".into(),
                "t".into(),
                &knowledge,
                &CancellationToken::new(),
            )
            .await;

        assert!(delta.tool_succeeded);
        assert_eq!(delta.knowledge.len(), 1);
        assert_eq!(delta.knowledge[0].answer, "42");
        assert_eq!(delta.knowledge[0].item_type, KnowledgeType::SideInfo);
    }

    #[test]
    fn test_answer_produces_candidate() {
        let executor = executor_with(
            MockLlmPort::failing(),
            MockSearchPort::new(),
            MockFetchPort::new(),
        );

        let delta = executor.handle_answer("final".into(), vec![], "t".into());
        assert_eq!(delta.candidate.as_ref().map(|c| c.answer.as_str()), Some("final"));
    }
}
