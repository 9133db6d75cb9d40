// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RESEARCH LOOP CONTROLLER
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// O loop externo com gates de terminação. A cada iteração, NESTA ordem:
//   1. cancelamento            -> Cancelled
//   2. >= 85% do budget tokens -> BeastMode
//   3. limite de passos        -> BeastMode
//   4. deadline                -> BeastMode
//   5. falhas de tool seguidas -> BeastMode
//   6. nenhuma ação permitida  -> BeastMode
//
// Transições terminais (Done/Failed/Cancelled) são as únicas saídas.
// Beast Mode não é recuperação opcional: é a tentativa final garantida,
// uma única chamada com tools proibidos, e termina a sessão seja qual for
// o veredito.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod actions;
pub mod budget;
mod context;
mod executor;
mod permissions;
/// Execução isolada de código via Boa Engine (sem rede, sem filesystem).
pub mod sandbox;
mod state;

pub use actions::*;
pub use budget::BudgetClock;
pub use context::{SessionContext, GAP_SIMILARITY_THRESHOLD};
pub use executor::{ExecutorConfig, StepExecutor};
pub use permissions::ActionPermissions;
pub use state::*;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::evaluation::{analyze_failure, EvaluationDimension, Evaluator, RequirementSet};
use crate::knowledge::KnowledgeStore;
use crate::llm::{ChatMessage, GenerateOpts, LlmPort};
use crate::ranker::{canonicalize_url, UrlRanker, VisitState};
use crate::schema;
use crate::search::{FetchPort, SearchPort};
use crate::types::{KnowledgeItem, KnowledgeType, Language, Reference};
use crate::utils::{preview, ActionTimer, TimingStats};
use sandbox::CodeRunner;

/// URLs coletadas a partir das quais search é desabilitado
const MAX_URLS_BEFORE_DISABLE_SEARCH: usize = 50;

/// URLs candidatas mostradas no prompt
const MAX_URLS_IN_PROMPT: usize = 10;

/// Agente de pesquisa: uma sessão, um controller, um único escritor.
pub struct ResearchAgent {
    state: ControllerState,
    ctx: SessionContext,
    knowledge: KnowledgeStore,
    ranker: UrlRanker,
    budget: BudgetClock,
    executor: StepExecutor,
    evaluator: Evaluator,
    llm: Arc<dyn LlmPort>,
    request: ResearchRequest,
    cancel: CancellationToken,
    /// Multiset de requisitos da pergunta original
    requirements: RequirementSet,
    requirements_ready: bool,
    /// Answer proibido por exatamente um passo após reprovação
    answer_cooldown: bool,
    reflect_disabled: bool,
    /// Code desabilitado após cada tentativa de resposta
    code_disabled: bool,
    /// Melhor candidata até aqui (terminação graciosa)
    best_candidate: Option<CandidateAnswer>,
    action_counts: ActionCounts,
    tool_failure_total: usize,
    timing: TimingStats,
    language: Language,
    session_id: Uuid,
}

impl ResearchAgent {
    /// Cria a sessão. Request inválido aborta aqui (erro de configuração).
    pub fn new(
        llm: Arc<dyn LlmPort>,
        search: Arc<dyn SearchPort>,
        fetch: Arc<dyn FetchPort>,
        runner: Arc<dyn CodeRunner>,
        request: ResearchRequest,
    ) -> Result<Self, AgentError> {
        request.validate()?;

        let language = request
            .language_code
            .as_deref()
            .map(Language::from_code)
            .unwrap_or_default();

        let mut executor_config = ExecutorConfig {
            search_language: request.search_language_code.clone(),
            with_images: request.with_images,
            ..Default::default()
        };
        // stepTimeoutMs do caller vale para todas as chamadas de tool
        if request.step_timeout_ms > 0 {
            let step_timeout = Duration::from_millis(request.step_timeout_ms);
            executor_config.search_timeout = step_timeout;
            executor_config.fetch_timeout = step_timeout;
        }

        let budget = BudgetClock::new(
            request.token_budget,
            request.max_steps,
            Duration::from_millis(request.max_duration_ms),
        );

        let ranker = UrlRanker::new().with_host_lists(
            request.boost_hostnames.clone(),
            request.bad_hostnames.clone(),
            request.only_hostnames.clone(),
        );

        let session_id = Uuid::new_v4();
        log::info!(
            "🧭 Sessão {} criada: \"{}\" (budget {} tokens, {} passos)",
            session_id,
            preview(&request.question, 80),
            request.token_budget,
            request.max_steps,
        );

        Ok(Self {
            state: ControllerState::Idle,
            ctx: SessionContext::new(request.question.clone()),
            knowledge: KnowledgeStore::new(),
            ranker,
            budget,
            executor: StepExecutor::new(
                llm.clone(),
                search,
                fetch,
                runner,
                executor_config,
            ),
            evaluator: Evaluator::new(llm.clone()),
            llm,
            request,
            cancel: CancellationToken::new(),
            requirements: RequirementSet::empty(),
            requirements_ready: false,
            answer_cooldown: false,
            reflect_disabled: false,
            code_disabled: false,
            best_candidate: None,
            action_counts: ActionCounts::default(),
            tool_failure_total: 0,
            timing: TimingStats::new(),
            language,
            session_id,
        })
    }

    /// Token de cancelamento da sessão (para o caller abortar)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Estado atual (observabilidade)
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Executa a pesquisa até um estado terminal.
    ///
    /// Só cancelamento escapa como Err; qualquer outro caminho termina em
    /// um ResearchResult (Done ou Failed).
    pub async fn research(mut self) -> Result<ResearchResult, AgentError> {
        self.state = ControllerState::Deciding;

        while !self.state.is_terminal() {
            // Gate #1: cancelamento
            if self.cancel.is_cancelled() {
                self.state = ControllerState::Cancelled {
                    reason: "cancelled by caller".into(),
                };
                continue;
            }

            // Gates #2-#6: qualquer um dispara a tentativa final
            if let Some(trigger) = self.beast_trigger() {
                log::warn!("⚠️ Gate disparado ({}), entrando em Beast Mode", trigger);
                self.state = ControllerState::BeastMode;
                self.run_beast_mode().await;
                continue;
            }

            self.step().await;
        }

        if let ControllerState::Cancelled { reason } = &self.state {
            log::info!("🛑 Sessão {} cancelada: {}", self.session_id, reason);
            return Err(AgentError::Cancelled(reason.clone()));
        }
        Ok(self.build_result())
    }

    /// Verifica os gates #2-#6, na ordem. Retorna o motivo disparado.
    fn beast_trigger(&self) -> Option<&'static str> {
        if self.budget.over_beast_threshold() {
            Some("token budget")
        } else if self.budget.step_limit_exceeded() {
            Some("step limit")
        } else if self.budget.deadline_exceeded() {
            Some("deadline")
        } else if self.budget.failures_exceeded() {
            Some("consecutive tool failures")
        } else if !self.current_permissions().has_any_allowed() {
            Some("no action permitted")
        } else {
            None
        }
    }

    /// Permissões do passo atual, moduladas pelo contexto
    fn current_permissions(&self) -> ActionPermissions {
        let mut perms = ActionPermissions::all_enabled();

        if self.answer_cooldown {
            perms.answer = false;
        }
        if self.code_disabled {
            perms.code = false;
        }
        if self.reflect_disabled {
            perms.reflect = false;
        }
        if self.ranker.available() == 0 {
            perms.visit = false;
        }
        if self.ranker.len() >= MAX_URLS_BEFORE_DISABLE_SEARCH {
            perms.search = false;
        }

        perms
    }

    /// Executa uma iteração completa do loop
    async fn step(&mut self) {
        // Passos são estritamente crescentes; tick antes de qualquer efeito
        self.budget.tick_step();
        let total_step = self.budget.total_step_count();
        let cooldown_was_active = self.answer_cooldown;

        // 1. Seleção round-robin da pergunta
        let current_question = self.ctx.current_question(total_step - 1).to_string();

        // 2. Primeiro encontro com a original: popular requisitos
        if self.ctx.is_original(&current_question) && !self.requirements_ready {
            self.populate_requirements().await;
            if self.cancel.is_cancelled() {
                return;
            }
        }

        // 3. Schema restrito às permissões
        let permissions = self.current_permissions();
        let action_schema = schema::action_schema(&permissions);

        // 4. Prompt com diário + conhecimento recente + URLs rankeadas + hints
        let prompt = self.build_prompt(&permissions, &current_question);

        log::info!(
            "📍 Step {} ({} no ciclo) | Pergunta: {} | {}",
            total_step,
            self.budget.step_count(),
            preview(&current_question, 60),
            permissions,
        );

        // 5. Decisão validada do LLM
        let opts = self.llm_opts();
        let messages = [ChatMessage::user(prompt.user)];
        let llm_timer = ActionTimer::start("decide_action");
        let reply = self
            .llm
            .generate_object(&action_schema, &prompt.system, &messages, &opts)
            .await;
        self.timing.add_llm_time(llm_timer.stop());

        let action = match reply {
            Ok(reply) => {
                self.budget.record_tokens(reply.tokens_used);
                match schema::parse_action(&reply.object, &permissions) {
                    Ok(action) => action,
                    Err(e) => {
                        log::warn!("⚠️ Ação inválida do LLM: {}", e);
                        self.note_tool_failure();
                        self.end_step(cooldown_was_active);
                        return;
                    }
                }
            }
            Err(e) if e.is_cancelled() => {
                self.state = ControllerState::Cancelled {
                    reason: "cancelled by caller".into(),
                };
                return;
            }
            Err(e) => {
                self.budget.record_tokens(e.tokens_used());
                log::warn!("⚠️ Decisão do LLM falhou: {}", e);
                self.note_tool_failure();
                self.end_step(cooldown_was_active);
                return;
            }
        };

        log::info!(
            "🎯 Ação: {} | Think: {}",
            action.name(),
            preview(action.think(), 120)
        );

        // 6. Despacho ao executor; o delta volta para o único escritor
        match action {
            AgentAction::Search { queries, think } => {
                self.state = ControllerState::Searching {
                    queries: queries.clone(),
                };
                self.action_counts.search += 1;
                let timer = ActionTimer::start("search");
                let delta = self
                    .executor
                    .handle_search(queries, think, &self.ctx, &self.cancel)
                    .await;
                self.timing.add_search_time(timer.stop());
                self.apply_delta(delta, total_step);
            }
            AgentAction::Visit { urls, think } => {
                self.state = ControllerState::Fetching { urls: urls.clone() };
                self.action_counts.visit += 1;
                let timer = ActionTimer::start("visit");
                let delta = self
                    .executor
                    .handle_visit(urls, think, &current_question, &self.ranker, &self.cancel)
                    .await;
                self.timing.add_fetch_time(timer.stop());
                self.apply_delta(delta, total_step);
            }
            AgentAction::Reflect { questions, think } => {
                self.state = ControllerState::Reflecting {
                    questions: questions.clone(),
                };
                self.action_counts.reflect += 1;
                let delta = self.executor.handle_reflect(questions, think, &self.ctx);
                self.apply_delta(delta, total_step);
            }
            AgentAction::Code { program, think } => {
                self.state = ControllerState::Coding {
                    program: program.clone(),
                };
                self.action_counts.code += 1;
                let delta = self
                    .executor
                    .handle_code(program, think, &self.knowledge, &self.cancel)
                    .await;
                self.apply_delta(delta, total_step);
            }
            AgentAction::Answer {
                answer,
                references,
                think,
            } => {
                self.action_counts.answer += 1;
                let delta = self.executor.handle_answer(answer, references, think);
                if let Some(candidate) = delta.candidate {
                    self.handle_candidate(candidate, &current_question, total_step)
                        .await;
                }
            }
        }

        if !self.state.is_terminal() {
            self.state = ControllerState::Deciding;
        }
        self.end_step(cooldown_was_active);
    }

    /// Fecha o passo: o cooldown de answer nunca dura mais de um passo
    fn end_step(&mut self, cooldown_was_active: bool) {
        if cooldown_was_active {
            self.answer_cooldown = false;
        }
    }

    fn note_tool_failure(&mut self) {
        self.budget.record_tool_failure();
        self.tool_failure_total += 1;
    }

    /// Popula o multiset de requisitos da pergunta original.
    ///
    /// A falha da consulta conta como falha de tool (o fallback heurístico
    /// popula mesmo assim - os requisitos ficam prontos de qualquer forma).
    async fn populate_requirements(&mut self) {
        let opts = self.llm_opts();
        let question = self.ctx.original_question().to_string();
        let (dimensions, tokens, via_llm) =
            self.evaluator.determine_dimensions(&question, &opts).await;

        self.budget.record_tokens(tokens);
        if via_llm {
            self.budget.clear_tool_failures();
        } else if !self.cancel.is_cancelled() {
            self.note_tool_failure();
        }
        self.requirements =
            RequirementSet::for_original(&dimensions, self.request.max_bad_attempts);
        self.requirements_ready = true;

        log::info!(
            "📋 Requisitos de avaliação: [{}] x{} tentativas",
            self.requirements
                .dimensions_in_order()
                .iter()
                .map(|d| d.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.request.max_bad_attempts,
        );
    }

    /// Aplica um delta de passo - o único ponto de escrita de estado
    fn apply_delta(&mut self, delta: StepDelta, total_step: usize) {
        self.budget.record_tokens(delta.tokens_used);

        if delta.tool_failed {
            self.note_tool_failure();
        }
        if delta.tool_succeeded {
            self.budget.clear_tool_failures();
        }

        if !delta.url_candidates.is_empty() {
            let added = self.ranker.merge(&delta.url_candidates, total_step);
            log::debug!("🔗 {} URLs novas no ranker", added);
        }

        for visit in delta.visits {
            match visit.result {
                Ok((title, content)) => {
                    self.ranker
                        .mark_visited(&visit.url, title.as_deref(), &content, total_step);
                }
                Err(error) => {
                    self.ranker.mark_failed(&visit.url, &error, total_step);
                }
            }
        }

        for item in delta.knowledge {
            self.knowledge.push(item);
        }

        for gap in delta.new_gaps {
            if self.ctx.push_gap(gap.clone()) {
                log::debug!("➕ Gap question: {}", preview(&gap, 60));
            }
        }

        self.ctx.record_executed_queries(delta.executed_queries);

        if delta.enable_answer {
            self.answer_cooldown = false;
        }
        if delta.disable_reflect {
            self.reflect_disabled = true;
        }

        if let Some(entry) = delta.diary {
            self.ctx.push_diary(entry, total_step);
        }
    }

    /// Roteia uma resposta candidata: caminho trivial, resposta de gap, ou
    /// avaliação multidimensional da original.
    async fn handle_candidate(
        &mut self,
        candidate: CandidateAnswer,
        current_question: &str,
        total_step: usize,
    ) {
        // Code fica desabilitado depois de qualquer tentativa de resposta
        self.code_disabled = true;

        // Resposta direta trivial: passo 1, caminho permitido pelo caller
        if total_step == 1 && !self.request.no_direct_answer {
            log::info!("✅ Resposta trivial direta no passo 1");
            self.state = ControllerState::Done {
                answer: candidate.answer.clone(),
                references: self.finalize_references(candidate.references),
            };
            return;
        }

        // Respostas de gap questions viram conhecimento e o loop segue
        if !self.ctx.is_original(current_question) {
            log::info!("📝 Gap respondido: {}", preview(current_question, 60));
            self.knowledge.push(
                KnowledgeItem::new(
                    current_question,
                    candidate.answer.clone(),
                    KnowledgeType::Qa,
                )
                .with_references(candidate.references),
            );
            return;
        }

        // Melhor candidata até aqui (para a terminação graciosa)
        self.best_candidate = Some(candidate.clone());

        self.state = ControllerState::Evaluating {
            candidate: preview(&candidate.answer, 80),
        };

        let opts = self.llm_opts();
        let eval_timer = ActionTimer::start("evaluate");
        let report = self
            .evaluator
            .evaluate(
                current_question,
                &candidate.answer,
                &candidate.references,
                &self.knowledge,
                &self.requirements,
                &opts,
            )
            .await;
        self.timing.add_eval_time(eval_timer.stop());

        self.budget.record_tokens(report.tokens_used);
        if report.had_error {
            self.note_tool_failure();
        } else {
            self.budget.clear_tool_failures();
        }

        if report.passed {
            log::info!("✅ Resposta aprovada em todas as dimensões");
            self.state = ControllerState::Done {
                answer: candidate.answer,
                references: self.finalize_references(candidate.references),
            };
            return;
        }

        let failed_dimension = report
            .failed_dimension
            .unwrap_or(EvaluationDimension::Strict);
        let reason = report.failure_reason().unwrap_or_else(|| "rejected".into());

        log::info!("❌ Reprovada em {}: {}", failed_dimension, preview(&reason, 100));

        // Exatamente um decremento por passo, só na primeira dimensão reprovada
        self.requirements = self.requirements.decrement(failed_dimension);

        // Requisitos esgotados: desistir graciosamente com a melhor resposta
        if self.requirements.is_empty() {
            log::warn!("🏳️ Requisitos esgotados, entregando a melhor resposta");
            let best = self
                .best_candidate
                .take()
                .unwrap_or(CandidateAnswer {
                    answer: candidate.answer,
                    references: candidate.references,
                });
            self.state = ControllerState::Done {
                answer: best.answer,
                references: self.finalize_references(best.references),
            };
            return;
        }

        if let Some(plan) = report.improvement_plan() {
            self.ctx.push_improvement_hint(plan);
        }

        self.replan(candidate, failed_dimension, reason, total_step).await;
    }

    /// Replanejamento após reprovação: diagnóstico, diário limpo, ciclo
    /// zerado e answer em cooldown por um passo. Conhecimento e budget
    /// são preservados.
    async fn replan(
        &mut self,
        candidate: CandidateAnswer,
        dimension: EvaluationDimension,
        reason: String,
        total_step: usize,
    ) {
        // A falha entra no diário ANTES da análise (o analisador lê o ciclo
        // inteiro, inclusive a resposta rejeitada)
        self.ctx.push_diary(
            DiaryEntry::FailedAnswer {
                answer: candidate.answer.clone(),
                dimension,
                reason: reason.clone(),
            },
            total_step,
        );

        let opts = self.llm_opts();
        let analysis = analyze_failure(
            &*self.llm,
            self.ctx.diary(),
            self.ctx.original_question(),
            &candidate.answer,
            &reason,
            &opts,
        )
        .await;

        match analysis {
            Ok(analysis) => {
                self.budget.record_tokens(analysis.tokens_used);
                self.ctx.push_improvement_hint(analysis.improvement.clone());
                // O aprendizado sobrevive ao reset do diário
                self.knowledge.push(KnowledgeItem::new(
                    self.ctx.original_question(),
                    analysis.as_knowledge_text(),
                    KnowledgeType::ErrorAnalysis,
                ));
                self.state = ControllerState::Replanning {
                    analysis: preview(&analysis.blame, 80),
                };
            }
            Err(e) => {
                // Só cancelamento chega aqui; o analisador absorve o resto
                self.budget.record_tokens(e.tokens_used());
            }
        }

        self.ctx.clear_diary();
        self.budget.reset_step_count();
        self.answer_cooldown = true;

        log::info!("🔄 Replanejamento: diário limpo, ciclo zerado, answer em cooldown");
    }

    /// Tentativa final forçada: uma chamada, tools proibidos, termina a
    /// sessão com Done ou Failed seja qual for o resultado.
    async fn run_beast_mode(&mut self) {
        log::warn!(
            "🦁 Beast Mode: {} itens de conhecimento, {} tokens restantes",
            self.knowledge.len(),
            self.budget.remaining_budget(),
        );

        let spec = schema::beast_mode_schema();
        let system = format!(
            "You MUST provide a final answer now. Searching, reading, reflecting and \
             code execution are no longer available. Synthesize the best possible \
             answer from the knowledge you have accumulated. Be pragmatic and direct. \
             {}",
            self.language.llm_instruction(),
        );
        let user = format!(
            "Question: {}\n\nKnowledge collected:\n{}\n\n{}Provide your best answer with references.",
            self.ctx.original_question(),
            self.knowledge.format_for_prompt(),
            if self.ctx.improvement_hints().is_empty() {
                String::new()
            } else {
                format!(
                    "Guidance from previous failed attempts:\n{}\n\n",
                    self.ctx.improvement_hints().join("\n")
                )
            },
        );

        let opts = GenerateOpts {
            temperature: 0.7,
            ..self.llm_opts()
        };
        let messages = [ChatMessage::user(user)];

        match self.llm.generate_object(&spec, &system, &messages, &opts).await {
            Ok(reply) => {
                self.budget.record_tokens(reply.tokens_used);
                match schema::parse_beast_answer(&reply.object) {
                    Ok((answer, references)) => {
                        log::info!("🦁 Beast Mode produziu resposta final");
                        self.state = ControllerState::Done {
                            answer,
                            references: self.finalize_references(references),
                        };
                    }
                    Err(e) => {
                        log::error!("🦁 Beast Mode sem resposta parseável: {}", e);
                        self.state = ControllerState::Failed {
                            reason: "could not synthesize answer".into(),
                        };
                    }
                }
            }
            Err(e) if e.is_cancelled() => {
                self.state = ControllerState::Cancelled {
                    reason: "cancelled by caller".into(),
                };
            }
            Err(e) => {
                self.budget.record_tokens(e.tokens_used());
                log::error!("🦁 Beast Mode falhou: {}", e);
                self.state = ControllerState::Failed {
                    reason: "could not synthesize answer".into(),
                };
            }
        }
    }

    fn llm_opts(&self) -> GenerateOpts {
        let timeout = if self.request.step_timeout_ms > 0 {
            Duration::from_millis(self.request.step_timeout_ms)
        } else {
            crate::llm::DEFAULT_LLM_TIMEOUT
        };
        GenerateOpts {
            temperature: 0.2,
            timeout,
            cancel: self.cancel.clone(),
        }
    }

    /// Monta o prompt de decisão do passo
    fn build_prompt(
        &self,
        permissions: &ActionPermissions,
        current_question: &str,
    ) -> AgentPrompt {
        let available: Vec<String> = self
            .ranker
            .sort_select_urls(MAX_URLS_IN_PROMPT)
            .into_iter()
            .map(|r| {
                if r.title.is_empty() {
                    format!("- {}", r.url)
                } else {
                    format!("- {} ({})", r.url, r.title)
                }
            })
            .collect();

        let urls_section = if available.is_empty() {
            "No unvisited URLs available.".to_string()
        } else {
            format!(
                "Available URLs to visit (pick different ones each time!):\n{}",
                available.join("\n")
            )
        };

        let user = format!(
            "Current question: {}\n\n{}\n\nAlready visited {} URLs.\n\nKnowledge so far:\n{}\n\nYour previous steps:\n{}",
            current_question,
            urls_section,
            self.ranker.attempted_urls().len(),
            self.knowledge.format_for_prompt(),
            self.ctx.format_diary(),
        );

        AgentPrompt {
            system: self.build_system_prompt(permissions),
            user,
        }
    }

    fn build_system_prompt(&self, permissions: &ActionPermissions) -> String {
        let mut prompt = format!(
            "You are a research agent. Your goal is to find accurate, citation-backed \
             information efficiently.\n\n{}\n\nCRITICAL RULES:\n\
             1. NEVER visit the same URL twice - pick DIFFERENT URLs each time\n\
             2. After visiting 3-5 different URLs, try to ANSWER the question\n\
             3. If you already have enough information, use the answer action immediately\n\
             4. Only search when the current URLs are insufficient\n\nAvailable actions:\n",
            self.language.llm_instruction(),
        );

        if permissions.search {
            prompt.push_str("- search: web search with one or more queries\n");
        }
        if permissions.visit {
            prompt.push_str("- visit: read URLs from the available list\n");
        }
        if permissions.reflect {
            prompt.push_str("- reflect: identify gap sub-questions (use sparingly)\n");
        }
        if permissions.code {
            prompt.push_str("- code: run JavaScript over the collected knowledge\n");
        }
        if permissions.answer {
            prompt.push_str("- answer: provide the final answer with references\n");
        }

        if self.budget.step_count() >= 5 {
            prompt.push_str("\n🔴 You have taken many steps this cycle. Consider answering now.\n");
        }

        if !self.ctx.improvement_hints().is_empty() {
            prompt.push_str("\n## IMPROVEMENT HINTS (from previous rejected attempts):\n");
            for (i, hint) in self.ctx.improvement_hints().iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, hint));
            }
        }

        prompt
    }

    /// Deduplica, filtra e limita as referências finais
    fn finalize_references(&self, references: Vec<Reference>) -> Vec<Reference> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for mut reference in references {
            let Some(canonical) = canonicalize_url(&reference.url) else {
                continue;
            };
            if !seen.insert(canonical.clone()) {
                continue;
            }
            if let Some(score) = reference.relevance_score {
                if score < self.request.min_relevance_score {
                    continue;
                }
            }
            if reference.title.is_empty() {
                if let Some(record) = self.ranker.get(&canonical) {
                    reference.title = record.title.clone();
                }
            }
            reference.url = canonical;
            out.push(reference);
            if out.len() >= self.request.max_references {
                break;
            }
        }

        // Sem referências do LLM: cai para as URLs efetivamente lidas
        if out.is_empty() {
            for url in self
                .ranker
                .urls_in_state(VisitState::Visited)
                .into_iter()
                .take(self.request.max_references)
            {
                let title = self
                    .ranker
                    .get(&url)
                    .map(|r| r.title.clone())
                    .unwrap_or_default();
                out.push(Reference {
                    url,
                    title,
                    ..Default::default()
                });
            }
        }

        out
    }

    /// Constrói o resultado final a partir do estado terminal
    fn build_result(self) -> ResearchResult {
        let metrics = ResearchMetrics {
            total_steps: self.budget.total_step_count(),
            tokens_used: self.budget.tokens_used(),
            duration_ms: self.budget.elapsed_ms(),
            action_counts: self.action_counts,
            tool_failure_count: self.tool_failure_total,
        };

        log::info!(
            "📊 Sessão {} encerrada em '{}': {} passos, {} tokens, {} falhas de tool",
            self.session_id,
            self.state.name(),
            metrics.total_steps,
            metrics.tokens_used,
            metrics.tool_failure_count,
        );
        log::debug!("⏱️  {}", self.timing.summary());

        let mut all_urls = self.ranker.all_urls();
        all_urls.truncate(self.request.max_returned_urls);

        let visited_urls = self.ranker.attempted_urls();
        let read_urls = self.ranker.urls_in_state(VisitState::Visited);
        // O multiset vazio marca a saída graciosa com a melhor resposta
        let exhausted = self.requirements_ready && self.requirements.is_empty();

        match self.state {
            ControllerState::Done { answer, references } => ResearchResult {
                answer: Some(answer),
                is_final: true,
                is_best: exhausted,
                references,
                visited_urls,
                read_urls,
                all_urls,
                knowledge: self.knowledge.all().to_vec(),
                error: None,
                metrics,
            },
            ControllerState::Failed { reason } => ResearchResult {
                answer: None,
                is_final: false,
                is_best: false,
                references: vec![],
                visited_urls,
                read_urls,
                all_urls,
                knowledge: self.knowledge.all().to_vec(),
                error: Some(reason),
                metrics,
            },
            other => unreachable!("build_result in non-terminal state {}", other.name()),
        }
    }
}
