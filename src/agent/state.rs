// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ESTADOS DO CONTROLLER
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::Serialize;

use crate::agent::DiaryEntry;
use crate::types::{KnowledgeItem, Reference, SearchHit, SerpQuery, Url};

/// Estado do controller - transições explícitas.
///
/// As transições terminais (Done, Failed, Cancelled) são as ÚNICAS saídas
/// do loop: qualquer outra condição passa primeiro por BeastMode.
#[derive(Debug, Clone)]
pub enum ControllerState {
    /// Sessão criada, loop ainda não começou
    Idle,

    /// Montando prompt/schema e aguardando decisão do LLM
    Deciding,

    /// Executando buscas
    Searching {
        /// Queries em execução
        queries: Vec<SerpQuery>,
    },

    /// Lendo URLs
    Fetching {
        /// URLs em leitura
        urls: Vec<Url>,
    },

    /// Processando reflexão
    Reflecting {
        /// Sub-perguntas propostas
        questions: Vec<String>,
    },

    /// Executando código em sandbox
    Coding {
        /// Programa em execução
        program: String,
    },

    /// Avaliando uma resposta candidata
    Evaluating {
        /// Resposta sob avaliação
        candidate: String,
    },

    /// Replanejando após reprovação do avaliador
    Replanning {
        /// Diagnóstico da falha
        analysis: String,
    },

    /// Tentativa final forçada de resposta
    BeastMode,

    /// Terminal: resposta aceita
    Done {
        /// Resposta final
        answer: String,
        /// Referências utilizadas
        references: Vec<Reference>,
    },

    /// Terminal: sem resposta possível
    Failed {
        /// Motivo da falha
        reason: String,
    },

    /// Terminal: cancelado pelo caller
    Cancelled {
        /// Motivo do cancelamento
        reason: String,
    },
}

impl ControllerState {
    /// Verifica se o estado é terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerState::Done { .. }
                | ControllerState::Failed { .. }
                | ControllerState::Cancelled { .. }
        )
    }

    /// Nome do estado para logging
    pub fn name(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Deciding => "deciding",
            ControllerState::Searching { .. } => "searching",
            ControllerState::Fetching { .. } => "fetching",
            ControllerState::Reflecting { .. } => "reflecting",
            ControllerState::Coding { .. } => "coding",
            ControllerState::Evaluating { .. } => "evaluating",
            ControllerState::Replanning { .. } => "replanning",
            ControllerState::BeastMode => "beast-mode",
            ControllerState::Done { .. } => "done",
            ControllerState::Failed { .. } => "failed",
            ControllerState::Cancelled { .. } => "cancelled",
        }
    }
}

/// Erros que escapam para o caller.
///
/// Todo o resto (vendor, validação, timeout, budget) é absorvido pelo
/// controller e termina em Done/Failed dentro do ResearchResult.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// Request inválido (aborta a criação da sessão)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cancelamento iniciado pelo caller
    #[error("research cancelled: {0}")]
    Cancelled(String),
}

/// Request de pesquisa - a interface de invocação do controller
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    /// Pergunta em linguagem natural
    pub question: String,
    /// Budget de tokens da sessão
    pub token_budget: u64,
    /// Tentativas por dimensão de avaliação
    pub max_bad_attempts: u32,
    /// Limite de passos totais
    pub max_steps: usize,
    /// Duração máxima da sessão (ms)
    pub max_duration_ms: u64,
    /// Timeout por chamada de tool (ms); 0 usa os defaults por tool
    pub step_timeout_ms: u64,
    /// Proíbe resposta direta no primeiro passo
    pub no_direct_answer: bool,
    /// Hosts com boost de score
    pub boost_hostnames: Vec<String>,
    /// Hosts penalizados
    pub bad_hostnames: Vec<String>,
    /// Se não vazio, só estes hosts entram no ranker
    pub only_hostnames: Vec<String>,
    /// Máximo de URLs no resultado final
    pub max_returned_urls: usize,
    /// Máximo de referências na resposta
    pub max_references: usize,
    /// Score mínimo de relevância de uma referência
    pub min_relevance_score: f32,
    /// Idioma da resposta (código ISO)
    pub language_code: Option<String>,
    /// Idioma das buscas (código ISO)
    pub search_language_code: Option<String>,
    /// Provedor de busca pedido pelo caller; interpretado pelo adaptador
    /// que constrói as portas, nunca pelo controller
    pub search_provider: Option<String>,
    /// Se resultados com imagens são aceitos
    pub with_images: bool,
}

impl Default for ResearchRequest {
    fn default() -> Self {
        Self {
            question: String::new(),
            token_budget: crate::agent::budget::DEFAULT_TOKEN_BUDGET,
            max_bad_attempts: 3,
            max_steps: 20,
            max_duration_ms: 5 * 60 * 1000,
            step_timeout_ms: 0,
            no_direct_answer: false,
            boost_hostnames: Vec::new(),
            bad_hostnames: Vec::new(),
            only_hostnames: Vec::new(),
            max_returned_urls: 50,
            max_references: 10,
            min_relevance_score: 0.0,
            language_code: None,
            search_language_code: None,
            search_provider: None,
            with_images: false,
        }
    }
}

impl ResearchRequest {
    /// Request com defaults para uma pergunta
    pub fn for_question(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// Valida o request antes de criar a sessão
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.question.trim().is_empty() {
            return Err(AgentError::InvalidRequest("question is empty".into()));
        }
        if self.token_budget == 0 {
            return Err(AgentError::InvalidRequest("token_budget is zero".into()));
        }
        if self.max_steps == 0 {
            return Err(AgentError::InvalidRequest("max_steps is zero".into()));
        }
        if self.max_duration_ms == 0 {
            return Err(AgentError::InvalidRequest("max_duration_ms is zero".into()));
        }
        Ok(())
    }
}

/// Contagem de ações executadas por tipo
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub search: usize,
    pub visit: usize,
    pub reflect: usize,
    pub code: usize,
    pub answer: usize,
}

/// Métricas finais da sessão
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResearchMetrics {
    /// Passos totais executados
    pub total_steps: usize,
    /// Tokens consumidos
    pub tokens_used: u64,
    /// Duração da sessão em ms
    pub duration_ms: u64,
    /// Ações por tipo
    pub action_counts: ActionCounts,
    /// Falhas de tool na sessão
    pub tool_failure_count: usize,
}

/// Resultado final completo de uma sessão de pesquisa
#[derive(Debug, Clone)]
pub struct ResearchResult {
    /// Resposta final (None só em Failed)
    pub answer: Option<String>,
    /// Se a resposta passou pelo caminho normal (trivial ou avaliada)
    pub is_final: bool,
    /// Se a resposta é a melhor-possível após esgotar os requisitos
    pub is_best: bool,
    /// Referências citadas
    pub references: Vec<Reference>,
    /// URLs cuja leitura foi tentada
    pub visited_urls: Vec<Url>,
    /// URLs lidas com sucesso
    pub read_urls: Vec<Url>,
    /// Todas as URLs coletadas
    pub all_urls: Vec<Url>,
    /// Conhecimento acumulado na sessão
    pub knowledge: Vec<KnowledgeItem>,
    /// Motivo da falha (quando answer é None)
    pub error: Option<String>,
    /// Métricas da sessão
    pub metrics: ResearchMetrics,
}

impl ResearchResult {
    /// Se a sessão produziu alguma resposta
    pub fn has_answer(&self) -> bool {
        self.answer.is_some()
    }
}

/// Resposta candidata produzida por uma ação answer
#[derive(Debug, Clone)]
pub struct CandidateAnswer {
    pub answer: String,
    pub references: Vec<Reference>,
}

/// Resultado da leitura de uma URL no handler de visit
#[derive(Debug, Clone)]
pub struct VisitOutcome {
    /// URL tentada
    pub url: Url,
    /// Conteúdo extraído (título, texto) ou erro
    pub result: Result<(Option<String>, String), String>,
}

/// Delta de estado produzido por um handler do Step Executor.
///
/// Handlers não mutam o controller: declaram aqui seus efeitos e o
/// controller (único escritor) aplica tudo em ordem de passo.
#[derive(Debug, Default)]
pub struct StepDelta {
    /// Entrada de diário do passo
    pub diary: Option<DiaryEntry>,
    /// Itens de conhecimento novos
    pub knowledge: Vec<KnowledgeItem>,
    /// Hits de busca a mesclar no ranker
    pub url_candidates: Vec<SearchHit>,
    /// Resultados de leitura a aplicar no ranker
    pub visits: Vec<VisitOutcome>,
    /// Sub-perguntas novas para a fila de gaps
    pub new_gaps: Vec<String>,
    /// Queries executadas (para dedup futura)
    pub executed_queries: Vec<String>,
    /// Reabilita answer no próximo passo
    pub enable_answer: bool,
    /// Desabilita reflect (fila de gaps saturada)
    pub disable_reflect: bool,
    /// Tokens consumidos pelo passo
    pub tokens_used: u64,
    /// Falha de tool neste passo
    pub tool_failed: bool,
    /// Tool executou com sucesso (zera a sequência de falhas)
    pub tool_succeeded: bool,
    /// Resposta candidata (ação answer) - o controller roteia ao avaliador
    pub candidate: Option<CandidateAnswer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ControllerState::Done {
            answer: "a".into(),
            references: vec![],
        }
        .is_terminal());
        assert!(ControllerState::Failed { reason: "r".into() }.is_terminal());
        assert!(ControllerState::Cancelled { reason: "r".into() }.is_terminal());

        assert!(!ControllerState::Idle.is_terminal());
        assert!(!ControllerState::BeastMode.is_terminal());
        assert!(!ControllerState::Deciding.is_terminal());
    }

    #[test]
    fn test_request_validation() {
        assert!(ResearchRequest::for_question("valid?").validate().is_ok());
        assert!(ResearchRequest::for_question("  ").validate().is_err());

        let mut request = ResearchRequest::for_question("q");
        request.token_budget = 0;
        assert!(request.validate().is_err());

        let mut request = ResearchRequest::for_question("q");
        request.max_steps = 0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ControllerState::BeastMode.name(), "beast-mode");
        assert_eq!(
            ControllerState::Searching { queries: vec![] }.name(),
            "searching"
        );
    }
}
