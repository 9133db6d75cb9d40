// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SONDA - AGENTE DE PESQUISA ITERATIVA
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Este crate implementa um agente de pesquisa com loop limitado e
// cancelável:
//
// 1. Research Loop Controller
//    - Seis gates de terminação avaliados a cada iteração
//    - Estados explícitos e type-safe; terminais são as únicas saídas
//    - Beast Mode: tentativa final garantida com tools proibidos
//
// 2. Avaliação Multidimensional
//    - 6 dimensões: definitive, freshness, plurality, attribution,
//      completeness, strict
//    - Multiset de tentativas restantes por dimensão; esgotamento é
//      terminação graciosa com a melhor resposta
//
// 3. Portas plugáveis
//    - LLM (saída estruturada com cadeia de fallback), busca, leitura de
//      páginas e sandbox de código
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod agent;
pub mod config;
pub mod evaluation;
pub mod knowledge;
pub mod llm;
pub mod ranker;
pub mod schema;
pub mod search;
#[cfg(feature = "server")]
pub mod server;
pub mod types;
pub mod utils;

// Re-exports principais
pub use agent::{
    ActionPermissions, AgentAction, AgentError, ControllerState, ResearchAgent, ResearchRequest,
    ResearchResult,
};
pub use evaluation::{EvaluationDimension, Evaluator, RequirementSet};
pub use knowledge::KnowledgeStore;
pub use ranker::UrlRanker;
pub use types::*;

/// Versão da biblioteca
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude com imports comuns
pub mod prelude {
    pub use crate::agent::{
        ActionPermissions, AgentAction, AgentError, ControllerState, ResearchAgent,
        ResearchRequest, ResearchResult,
    };
    pub use crate::config::Config;
    pub use crate::evaluation::{EvaluationDimension, Evaluator, RequirementSet};
    pub use crate::knowledge::KnowledgeStore;
    pub use crate::ranker::UrlRanker;
    pub use crate::types::*;
}
