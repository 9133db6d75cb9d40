// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// KNOWLEDGE STORE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Log append-only de conhecimento da sessão. O store inteiro sobrevive
// a resets de replanejamento (só o diário é limpo); para o prompt do LLM
// apenas uma janela com os itens mais recentes é apresentada.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::types::{KnowledgeItem, KnowledgeType};
use crate::utils::preview;

/// Janela padrão de itens apresentados ao LLM
pub const DEFAULT_PROMPT_WINDOW: usize = 100;

/// Store append-only de conhecimento.
///
/// Invariantes:
/// - itens nunca são removidos nem editados durante a sessão;
/// - `recent()` expõe no máximo `prompt_window` itens (os últimos);
/// - `all()` retém tudo para a construção do resultado final.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    items: Vec<KnowledgeItem>,
    prompt_window: usize,
}

impl KnowledgeStore {
    /// Cria um store vazio com a janela padrão
    pub fn new() -> Self {
        Self::with_window(DEFAULT_PROMPT_WINDOW)
    }

    /// Cria um store com janela customizada
    pub fn with_window(prompt_window: usize) -> Self {
        Self {
            items: Vec::new(),
            prompt_window: prompt_window.max(1),
        }
    }

    /// Adiciona um item ao log.
    ///
    /// Itens idênticos (mesma pergunta e resposta) são ignorados para não
    /// inflar o prompt com repetições do mesmo conteúdo.
    pub fn push(&mut self, item: KnowledgeItem) {
        let duplicate = self
            .items
            .iter()
            .any(|k| k.question == item.question && k.answer == item.answer);
        if !duplicate {
            self.items.push(item);
        }
    }

    /// Janela recente apresentada ao LLM (últimos `prompt_window` itens)
    pub fn recent(&self) -> &[KnowledgeItem] {
        let start = self.items.len().saturating_sub(self.prompt_window);
        &self.items[start..]
    }

    /// Todos os itens acumulados na sessão
    pub fn all(&self) -> &[KnowledgeItem] {
        &self.items
    }

    /// Quantidade total de itens
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Se o store está vazio
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Conta itens de um tipo específico
    pub fn count_of(&self, item_type: KnowledgeType) -> usize {
        self.items.iter().filter(|k| k.item_type == item_type).count()
    }

    /// Formata a janela recente para inclusão no prompt
    pub fn format_for_prompt(&self) -> String {
        if self.is_empty() {
            return "No knowledge collected yet.".to_string();
        }

        self.recent()
            .iter()
            .enumerate()
            .map(|(i, k)| {
                format!(
                    "{}. [{}] Q: {}\n   A: {}",
                    i + 1,
                    k.item_type.as_str(),
                    k.question,
                    preview(&k.answer, 800),
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}
