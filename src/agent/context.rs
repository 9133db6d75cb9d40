// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CONTEXTO DA SESSÃO
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Estado mutável da sessão fora do knowledge/ranker: fila de perguntas
// (original + gaps), diário narrativo, hints de melhoria e a fila de
// dedup de queries. Só o controller escreve aqui.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::agent::DiaryEntry;
use crate::utils::jaccard_similarity;

/// Similaridade acima da qual uma sub-pergunta é considerada duplicata
pub const GAP_SIMILARITY_THRESHOLD: f32 = 0.75;

/// Contexto mutável da sessão
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Pergunta original (imutável, sempre presente na fila)
    original_question: String,
    /// Fila de perguntas: original + gaps descobertos por reflexão
    gaps: Vec<String>,
    /// Diário narrativo (resetável no replanejamento)
    diary: Vec<DiaryEntry>,
    /// Passos (globais) em que cada entrada do diário foi registrada
    diary_steps: Vec<usize>,
    /// Hints de melhoria vindos do avaliador e do analisador de erros
    improvement_hints: Vec<String>,
    /// Queries já executadas (dedup entre passos)
    executed_queries: Vec<String>,
}

impl SessionContext {
    /// Cria o contexto com a pergunta original já na fila
    pub fn new(original_question: impl Into<String>) -> Self {
        let original = original_question.into();
        Self {
            gaps: vec![original.clone()],
            original_question: original,
            diary: Vec::new(),
            diary_steps: Vec::new(),
            improvement_hints: Vec::new(),
            executed_queries: Vec::new(),
        }
    }

    /// Pergunta original
    pub fn original_question(&self) -> &str {
        &self.original_question
    }

    /// Seleção round-robin: gaps[total_step mod |gaps|]
    pub fn current_question(&self, total_step: usize) -> &str {
        let idx = total_step % self.gaps.len();
        &self.gaps[idx]
    }

    /// Se a pergunta é a original
    pub fn is_original(&self, question: &str) -> bool {
        question == self.original_question
    }

    /// Fila de perguntas
    pub fn gaps(&self) -> &[String] {
        &self.gaps
    }

    /// Adiciona uma sub-pergunta se não for duplicata (similaridade).
    ///
    /// Retorna true se entrou na fila.
    pub fn push_gap(&mut self, question: String) -> bool {
        let duplicate = self
            .gaps
            .iter()
            .any(|g| jaccard_similarity(g, &question) >= GAP_SIMILARITY_THRESHOLD);
        if duplicate || question.trim().is_empty() {
            return false;
        }
        self.gaps.push(question);
        true
    }

    /// Registra uma entrada no diário
    pub fn push_diary(&mut self, entry: DiaryEntry, total_step: usize) {
        self.diary.push(entry);
        self.diary_steps.push(total_step);
    }

    /// Entradas do diário
    pub fn diary(&self) -> &[DiaryEntry] {
        &self.diary
    }

    /// Limpa a narrativa (replanejamento). O conhecimento NÃO passa por aqui.
    pub fn clear_diary(&mut self) {
        self.diary.clear();
        self.diary_steps.clear();
    }

    /// Formata o diário para o prompt
    pub fn format_diary(&self) -> String {
        if self.diary.is_empty() {
            return "This is your first step.".to_string();
        }
        self.diary
            .iter()
            .zip(self.diary_steps.iter())
            .map(|(entry, step)| entry.format(*step))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Adiciona um hint de melhoria (sem duplicar)
    pub fn push_improvement_hint(&mut self, hint: String) {
        if !hint.trim().is_empty() && !self.improvement_hints.contains(&hint) {
            self.improvement_hints.push(hint);
        }
    }

    /// Hints acumulados
    pub fn improvement_hints(&self) -> &[String] {
        &self.improvement_hints
    }

    /// Registra queries executadas
    pub fn record_executed_queries(&mut self, queries: impl IntoIterator<Item = String>) {
        self.executed_queries.extend(queries);
    }

    /// Se uma query é duplicata (similaridade) de alguma já executada
    pub fn is_duplicate_query(&self, query: &str) -> bool {
        self.executed_queries
            .iter()
            .any(|q| jaccard_similarity(q, query) >= GAP_SIMILARITY_THRESHOLD)
    }
}
