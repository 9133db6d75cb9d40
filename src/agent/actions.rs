// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AÇÕES DO AGENTE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::evaluation::EvaluationDimension;
use crate::types::{Reference, SerpQuery, Url};

/// Cada ação carrega seus próprios dados - impossível ter ação "Search" sem queries.
///
/// Este enum implementa o padrão de dados associados: o compilador garante
/// que cada ação tem tudo que precisa para sua execução.
#[derive(Debug, Clone)]
pub enum AgentAction {
    /// Buscar informações na web
    Search {
        /// Queries de busca
        queries: Vec<SerpQuery>,
        /// Raciocínio do agente para esta ação
        think: String,
    },

    /// Visitar URLs e extrair conteúdo
    Visit {
        /// URLs a serem lidas (limitado por passo)
        urls: Vec<Url>,
        /// Raciocínio do agente para esta ação
        think: String,
    },

    /// Gerar perguntas de gap-closing
    Reflect {
        /// Novas perguntas identificadas
        questions: Vec<String>,
        /// Raciocínio do agente para esta ação
        think: String,
    },

    /// Executar código para processamento de dados
    ///
    /// O programa roda em sandbox isolado (sem rede, sem filesystem) com o
    /// snapshot de conhecimento disponível como input.
    Code {
        /// Programa JavaScript a executar
        program: String,
        /// Raciocínio do agente para esta ação
        think: String,
    },

    /// Fornecer a resposta final
    ///
    /// Passa pelo avaliador multidimensional, exceto no caminho de resposta
    /// trivial direta do primeiro passo.
    Answer {
        /// Resposta proposta
        answer: String,
        /// Referências citadas
        references: Vec<Reference>,
        /// Raciocínio do agente para esta ação
        think: String,
    },
}

impl AgentAction {
    /// Retorna o nome da ação como string
    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::Search { .. } => "search",
            AgentAction::Visit { .. } => "visit",
            AgentAction::Reflect { .. } => "reflect",
            AgentAction::Code { .. } => "code",
            AgentAction::Answer { .. } => "answer",
        }
    }

    /// Retorna o raciocínio (think) da ação
    pub fn think(&self) -> &str {
        match self {
            AgentAction::Search { think, .. } => think,
            AgentAction::Visit { think, .. } => think,
            AgentAction::Reflect { think, .. } => think,
            AgentAction::Code { think, .. } => think,
            AgentAction::Answer { think, .. } => think,
        }
    }

    /// Verifica se é uma ação de resposta
    pub fn is_answer(&self) -> bool {
        matches!(self, AgentAction::Answer { .. })
    }
}

/// Entrada do diário do agente.
///
/// O diário é a narrativa em primeira pessoa dos passos anteriores, usada
/// só na construção de prompts. Ele é resetável: numa falha de avaliação a
/// narrativa é limpa, mas o conhecimento acumulado sobrevive.
#[derive(Debug, Clone)]
pub enum DiaryEntry {
    /// Registro de uma busca executada
    Search {
        /// Queries executadas
        queries: Vec<SerpQuery>,
        /// URLs únicas novas encontradas
        urls_found: usize,
        /// Raciocínio do agente
        think: String,
    },

    /// Registro de URLs visitadas
    Visit {
        /// URLs lidas (com sucesso ou não)
        urls: Vec<Url>,
        /// Quantas leituras tiveram sucesso
        success_count: usize,
        /// Raciocínio do agente
        think: String,
    },

    /// Registro de uma reflexão
    Reflect {
        /// Perguntas novas adicionadas à fila
        questions: Vec<String>,
        /// Raciocínio do agente
        think: String,
    },

    /// Registro de código executado
    Code {
        /// Programa executado (truncado para o prompt)
        program: String,
        /// Se a execução terminou sem erro
        success: bool,
        /// Raciocínio do agente
        think: String,
    },

    /// Registro de uma resposta reprovada pelo avaliador
    FailedAnswer {
        /// Resposta rejeitada
        answer: String,
        /// Dimensão que reprovou
        dimension: EvaluationDimension,
        /// Motivo da reprovação
        reason: String,
    },
}

impl DiaryEntry {
    /// Formata a entrada em primeira pessoa para o prompt.
    ///
    /// O formato narrativo ("At step N, you took...") é o que o LLM recebe
    /// como memória dos passos anteriores.
    pub fn format(&self, step: usize) -> String {
        match self {
            DiaryEntry::Search {
                queries,
                urls_found,
                think,
            } => {
                let keywords: Vec<_> = queries.iter().map(|q| q.q.as_str()).collect();
                format!(
                    "At step {}, you took the **search** action and looked for: {}.\n\
                     You found {} new URLs and added them to your URL list to **visit** later.\n\
                     Think: {}",
                    step,
                    keywords.join(", "),
                    urls_found,
                    think
                )
            }
            DiaryEntry::Visit {
                urls,
                success_count,
                think,
            } => {
                format!(
                    "At step {}, you took the **visit** action and read {} URLs ({} succeeded):\n{}\n\
                     The content was added to your knowledge.\n\
                     Think: {}",
                    step,
                    urls.len(),
                    success_count,
                    urls.iter()
                        .take(3)
                        .map(|u| format!("- {}", u))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    think
                )
            }
            DiaryEntry::Reflect { questions, think } => {
                format!(
                    "At step {}, you took the **reflect** action and identified {} gap questions:\n{}\n\
                     Think: {}",
                    step,
                    questions.len(),
                    questions
                        .iter()
                        .take(3)
                        .map(|q| format!("- {}", q))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    think
                )
            }
            DiaryEntry::Code {
                program,
                success,
                think,
            } => {
                format!(
                    "At step {}, you took the **code** action ({}):\n{}\n\
                     Think: {}",
                    step,
                    if *success { "succeeded" } else { "failed" },
                    crate::utils::preview(program, 150),
                    think
                )
            }
            DiaryEntry::FailedAnswer {
                answer,
                dimension,
                reason,
            } => {
                format!(
                    "At step {}, you took the **answer** action but the evaluator rejected it:\n\
                     Answer (truncated): {}\n\
                     Failed dimension: {}\n\
                     Reason: {}",
                    step,
                    crate::utils::preview(answer, 200),
                    dimension.as_str(),
                    reason
                )
            }
        }
    }
}

/// Prompt montado para o LLM decidir a próxima ação
#[derive(Debug, Clone)]
pub struct AgentPrompt {
    /// Prompt de sistema
    pub system: String,
    /// Prompt do usuário (pergunta + contexto)
    pub user: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        let search = AgentAction::Search {
            queries: vec![],
            think: "t".into(),
        };
        assert_eq!(search.name(), "search");

        let answer = AgentAction::Answer {
            answer: "a".into(),
            references: vec![],
            think: "t".into(),
        };
        assert_eq!(answer.name(), "answer");
        assert!(answer.is_answer());
        assert!(!search.is_answer());
    }

    #[test]
    fn test_diary_first_person_format() {
        let entry = DiaryEntry::Search {
            queries: vec![SerpQuery::text("rust book author")],
            urls_found: 7,
            think: "need the author".into(),
        };
        let formatted = entry.format(3);

        assert!(formatted.contains("At step 3"));
        assert!(formatted.contains("**search**"));
        assert!(formatted.contains("rust book author"));
        assert!(formatted.contains("7 new URLs"));
    }

    #[test]
    fn test_diary_failed_answer_format() {
        let entry = DiaryEntry::FailedAnswer {
            answer: "too vague".into(),
            dimension: EvaluationDimension::Strict,
            reason: "lacks depth".into(),
        };
        let formatted = entry.format(5);
        assert!(formatted.contains("rejected"));
        assert!(formatted.contains("strict"));
    }
}
