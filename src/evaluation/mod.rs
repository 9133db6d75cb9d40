// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SISTEMA DE AVALIAÇÃO MULTIDIMENSIONAL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod analyzer;
mod pipeline;

pub use analyzer::{analyze_failure, ErrorAnalysis};
pub use pipeline::{DimensionVerdict, EvalReport, Evaluator};

use std::collections::BTreeMap;

/// Dimensões de avaliação - enum fechado, sem dimensões "inventadas" pelo LLM.
///
/// Cada dimensão mede uma qualidade diferente da resposta:
/// - Definitive: confiante, sem hedging excessivo
/// - Freshness: informação recente o suficiente
/// - Plurality: se pediu N itens, tem N itens
/// - Attribution: afirmações amparadas pelas fontes citadas
/// - Completeness: todos os aspectos da pergunta cobertos
/// - Strict: avaliação brutal - profundidade e insight reais
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvaluationDimension {
    Definitive,
    Freshness,
    Plurality,
    Attribution,
    Completeness,
    Strict,
}

impl EvaluationDimension {
    /// Ordem fixa de processamento do pipeline.
    ///
    /// A ordem é estável entre execuções para que runs idênticos reprovem
    /// na mesma dimensão.
    pub const ORDER: [EvaluationDimension; 6] = [
        Self::Definitive,
        Self::Freshness,
        Self::Plurality,
        Self::Attribution,
        Self::Completeness,
        Self::Strict,
    ];

    /// Retorna o nome da dimensão como string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definitive => "definitive",
            Self::Freshness => "freshness",
            Self::Plurality => "plurality",
            Self::Attribution => "attribution",
            Self::Completeness => "completeness",
            Self::Strict => "strict",
        }
    }

    /// Parse a partir do nome (saída do LLM)
    pub fn from_str_loose(name: &str) -> Option<Self> {
        match name.to_lowercase().trim() {
            "definitive" => Some(Self::Definitive),
            "freshness" => Some(Self::Freshness),
            "plurality" => Some(Self::Plurality),
            "attribution" => Some(Self::Attribution),
            "completeness" => Some(Self::Completeness),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

impl std::fmt::Display for EvaluationDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Multiset de requisitos de avaliação: tentativas restantes por dimensão.
///
/// Populado uma vez para a pergunta original; vazio para gap questions.
/// Decrementos produzem um NOVO multiset (o anterior não é mutado) - isso
/// mantém a contabilidade de tentativas explícita a cada passo. O conjunto
/// ficar vazio é um sinal terminal: desistir graciosamente com a melhor
/// resposta até aqui.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementSet {
    remaining: BTreeMap<EvaluationDimension, u32>,
}

impl RequirementSet {
    /// Conjunto vazio (gap questions)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Popula os requisitos da pergunta original.
    ///
    /// `strict` entra sempre, com `max_bad_attempts` tentativas; as demais
    /// dimensões determinadas pelo LLM entram com o mesmo limite.
    pub fn for_original(dimensions: &[EvaluationDimension], max_bad_attempts: u32) -> Self {
        let attempts = max_bad_attempts.max(1);
        let mut remaining = BTreeMap::new();

        for dim in dimensions {
            remaining.insert(*dim, attempts);
        }
        remaining.insert(EvaluationDimension::Strict, attempts);

        Self { remaining }
    }

    /// Se não há mais nenhum requisito (sinal terminal)
    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Se a dimensão ainda é exigida
    pub fn contains(&self, dim: EvaluationDimension) -> bool {
        self.remaining.contains_key(&dim)
    }

    /// Tentativas restantes de uma dimensão
    pub fn attempts_left(&self, dim: EvaluationDimension) -> u32 {
        self.remaining.get(&dim).copied().unwrap_or(0)
    }

    /// Dimensões ainda exigidas, na ordem fixa de processamento
    pub fn dimensions_in_order(&self) -> Vec<EvaluationDimension> {
        EvaluationDimension::ORDER
            .iter()
            .copied()
            .filter(|d| self.contains(*d))
            .collect()
    }

    /// Retorna um novo multiset com uma tentativa a menos na dimensão.
    ///
    /// Ao chegar a zero a dimensão é removida. Exatamente um decremento por
    /// passo: quando duas dimensões falhariam juntas, só a primeira conta.
    #[must_use]
    pub fn decrement(&self, dim: EvaluationDimension) -> Self {
        let mut remaining = self.remaining.clone();
        match remaining.get(&dim).copied() {
            Some(n) if n <= 1 => {
                remaining.remove(&dim);
            }
            Some(n) => {
                remaining.insert(dim, n - 1);
            }
            None => {}
        }
        Self { remaining }
    }

    /// Total de tentativas restantes somando todas as dimensões
    pub fn total_attempts(&self) -> u32 {
        self.remaining.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_original_always_includes_strict() {
        let set = RequirementSet::for_original(&[EvaluationDimension::Freshness], 3);
        assert!(set.contains(EvaluationDimension::Strict));
        assert!(set.contains(EvaluationDimension::Freshness));
        assert_eq!(set.attempts_left(EvaluationDimension::Strict), 3);
    }

    #[test]
    fn test_decrement_produces_new_set() {
        let set = RequirementSet::for_original(&[], 2);
        let after = set.decrement(EvaluationDimension::Strict);

        // O original não mudou
        assert_eq!(set.attempts_left(EvaluationDimension::Strict), 2);
        assert_eq!(after.attempts_left(EvaluationDimension::Strict), 1);
    }

    #[test]
    fn test_decrement_to_zero_removes_dimension() {
        let set = RequirementSet::for_original(&[], 1);
        assert!(!set.is_empty());

        let after = set.decrement(EvaluationDimension::Strict);
        assert!(!after.contains(EvaluationDimension::Strict));
        assert!(after.is_empty());
    }

    #[test]
    fn test_decrement_unknown_dimension_noop() {
        let set = RequirementSet::for_original(&[], 2);
        let after = set.decrement(EvaluationDimension::Plurality);
        assert_eq!(after, set);
    }

    #[test]
    fn test_dimensions_in_fixed_order() {
        let set = RequirementSet::for_original(
            &[
                EvaluationDimension::Completeness,
                EvaluationDimension::Freshness,
            ],
            2,
        );

        let order = set.dimensions_in_order();
        assert_eq!(
            order,
            vec![
                EvaluationDimension::Freshness,
                EvaluationDimension::Completeness,
                EvaluationDimension::Strict,
            ]
        );
    }

    #[test]
    fn test_empty_for_gap_questions() {
        let set = RequirementSet::empty();
        assert!(set.is_empty());
        assert_eq!(set.total_attempts(), 0);
    }

    #[test]
    fn test_dimension_from_str() {
        assert_eq!(
            EvaluationDimension::from_str_loose("Freshness"),
            Some(EvaluationDimension::Freshness)
        );
        assert_eq!(EvaluationDimension::from_str_loose("nonsense"), None);
    }
}
