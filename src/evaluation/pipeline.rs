// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PIPELINE DE AVALIAÇÃO
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Avalia uma resposta candidata contra as dimensões ainda exigidas, na
// ordem fixa, com falha rápida: a primeira dimensão reprovada encerra o
// pipeline (e é a única decrementada no multiset).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::{EvaluationDimension, RequirementSet};
use crate::knowledge::KnowledgeStore;
use crate::llm::{ChatMessage, GenerateOpts, LlmPort, SchemaSpec};
use crate::types::Reference;
use crate::utils::preview;

static PLURALITY_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(top|best|list|lista)\s+\d+|\b\d+\s+(examples?|items?|exemplos?|itens)\b")
        .unwrap_or_else(|e| panic!("{e}"))
});

static FRESHNESS_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(20\d\d|latest|recent|current|today|now|atual|recente|hoje)\b")
        .unwrap_or_else(|e| panic!("{e}"))
});

static ATTRIBUTION_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(according to|source|cite|quote|fonte|segundo)\b")
        .unwrap_or_else(|e| panic!("{e}"))
});

/// Veredito de uma dimensão
#[derive(Debug, Clone)]
pub struct DimensionVerdict {
    /// Dimensão avaliada
    pub dimension: EvaluationDimension,
    /// Se a resposta passou
    pub pass: bool,
    /// Raciocínio do avaliador
    pub reasoning: String,
    /// Plano de melhoria (quando reprovada)
    pub improvement_plan: Option<String>,
}

/// Resultado do pipeline para uma resposta candidata
#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    /// Se todas as dimensões exigidas passaram
    pub passed: bool,
    /// Vereditos na ordem de execução (para no primeiro reprovado)
    pub verdicts: Vec<DimensionVerdict>,
    /// Dimensão onde parou (se reprovou)
    pub failed_dimension: Option<EvaluationDimension>,
    /// Se alguma chamada de avaliação falhou tecnicamente (conta como
    /// falha de tool para o controller)
    pub had_error: bool,
    /// Tokens consumidos por todas as chamadas do pipeline
    pub tokens_used: u64,
}

impl EvalReport {
    /// Motivo da reprovação (se houver)
    pub fn failure_reason(&self) -> Option<String> {
        self.verdicts
            .last()
            .filter(|v| !v.pass)
            .map(|v| format!("{}: {}", v.dimension, v.reasoning))
    }

    /// Plano de melhoria da dimensão reprovada
    pub fn improvement_plan(&self) -> Option<String> {
        self.verdicts
            .last()
            .filter(|v| !v.pass)
            .and_then(|v| v.improvement_plan.clone())
    }
}

/// Avaliador multidimensional de respostas
pub struct Evaluator {
    llm: Arc<dyn LlmPort>,
}

impl Evaluator {
    /// Cria um avaliador com a porta LLM fornecida
    pub fn new(llm: Arc<dyn LlmPort>) -> Self {
        Self { llm }
    }

    /// Determina as dimensões exigidas pela pergunta original.
    ///
    /// Consulta o LLM; em falha, cai para a heurística local (o terceiro
    /// elemento reporta se a chamada falhou - o controller contabiliza a
    /// falha de tool). `strict` não entra aqui - o RequirementSet adiciona
    /// sempre.
    pub async fn determine_dimensions(
        &self,
        question: &str,
        opts: &GenerateOpts,
    ) -> (Vec<EvaluationDimension>, u64, bool) {
        let schema = SchemaSpec::new(
            "question-evaluation",
            json!({
                "type": "object",
                "properties": {
                    "needs_definitive": {"type": "boolean"},
                    "needs_freshness": {"type": "boolean"},
                    "needs_plurality": {"type": "boolean"},
                    "needs_attribution": {"type": "boolean"},
                    "needs_completeness": {"type": "boolean"},
                    "reasoning": {"type": "string"},
                },
                "required": [
                    "needs_definitive",
                    "needs_freshness",
                    "needs_plurality",
                    "needs_completeness"
                ],
            }),
        );

        let system = "Analyze the question and decide which evaluation dimensions apply:\n\
                      - definitive: does it have a clear factual answer?\n\
                      - freshness: is time-sensitive information relevant?\n\
                      - plurality: does it ask for multiple items/examples?\n\
                      - attribution: does it require claims backed by cited sources?\n\
                      - completeness: does it have multiple sub-questions or aspects?";

        let messages = [ChatMessage::user(format!("Question: {}", question))];

        match self.llm.generate_object(&schema, system, &messages, opts).await {
            Ok(reply) => {
                let mut dims = Vec::new();
                let flags = [
                    ("needs_definitive", EvaluationDimension::Definitive),
                    ("needs_freshness", EvaluationDimension::Freshness),
                    ("needs_plurality", EvaluationDimension::Plurality),
                    ("needs_attribution", EvaluationDimension::Attribution),
                    ("needs_completeness", EvaluationDimension::Completeness),
                ];
                for (key, dim) in flags {
                    if reply.object[key].as_bool().unwrap_or(false) {
                        dims.push(dim);
                    }
                }
                // Nenhuma dimensão aplicável é válido: strict cobre sozinho
                (dims, reply.tokens_used, true)
            }
            Err(e) => {
                log::warn!("⚠️ determine_dimensions falhou, usando heurística: {}", e);
                (heuristic_dimensions(question), e.tokens_used(), false)
            }
        }
    }

    /// Avalia a resposta contra as dimensões exigidas, na ordem fixa.
    ///
    /// Para na primeira reprovação. Erro técnico numa dimensão também
    /// interrompe, com `had_error` marcado.
    pub async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        references: &[Reference],
        knowledge: &KnowledgeStore,
        requirements: &RequirementSet,
        opts: &GenerateOpts,
    ) -> EvalReport {
        let mut report = EvalReport {
            passed: true,
            ..Default::default()
        };

        for dimension in requirements.dimensions_in_order() {
            let (system, user) = dimension_prompt(dimension, question, answer, references, knowledge);
            let schema = verdict_schema(dimension);
            let messages = [ChatMessage::user(user)];

            match self.llm.generate_object(&schema, &system, &messages, opts).await {
                Ok(reply) => {
                    report.tokens_used += reply.tokens_used;

                    let pass = reply.object["pass"].as_bool().unwrap_or(false);
                    let verdict = DimensionVerdict {
                        dimension,
                        pass,
                        reasoning: reply.object["reasoning"]
                            .as_str()
                            .unwrap_or("no reasoning provided")
                            .to_string(),
                        improvement_plan: reply.object["improvement_plan"]
                            .as_str()
                            .filter(|s| !s.trim().is_empty())
                            .map(String::from),
                    };

                    let stop = !verdict.pass;
                    report.verdicts.push(verdict);

                    if stop {
                        report.passed = false;
                        report.failed_dimension = Some(dimension);
                        return report;
                    }
                }
                Err(e) => {
                    report.tokens_used += e.tokens_used();
                    report.passed = false;
                    report.had_error = true;
                    report.failed_dimension = Some(dimension);
                    report.verdicts.push(DimensionVerdict {
                        dimension,
                        pass: false,
                        reasoning: format!("evaluation error: {}", e),
                        improvement_plan: None,
                    });
                    return report;
                }
            }
        }

        report
    }
}

/// Heurística local para quando o LLM não responde
fn heuristic_dimensions(question: &str) -> Vec<EvaluationDimension> {
    let mut dims = vec![EvaluationDimension::Definitive];

    if FRESHNESS_HINT.is_match(question) {
        dims.push(EvaluationDimension::Freshness);
    }
    if PLURALITY_HINT.is_match(question) {
        dims.push(EvaluationDimension::Plurality);
    }
    if ATTRIBUTION_HINT.is_match(question) {
        dims.push(EvaluationDimension::Attribution);
    }
    if question.matches('?').count() > 1 || question.contains(" and ") {
        dims.push(EvaluationDimension::Completeness);
    }

    dims
}

/// Schema de veredito por dimensão: {pass, reasoning, improvement_plan?}
fn verdict_schema(dimension: EvaluationDimension) -> SchemaSpec {
    SchemaSpec::new(
        format!("evaluator-{}", dimension.as_str()),
        json!({
            "type": "object",
            "properties": {
                "pass": {"type": "boolean"},
                "reasoning": {"type": "string"},
                "improvement_plan": {"type": "string"},
            },
            "required": ["pass", "reasoning"],
        }),
    )
}

/// Prompts por dimensão (system, user)
fn dimension_prompt(
    dimension: EvaluationDimension,
    question: &str,
    answer: &str,
    references: &[Reference],
    knowledge: &KnowledgeStore,
) -> (String, String) {
    let user = format!("Question: {}\n\nAnswer to evaluate:\n{}", question, answer);

    let system = match dimension {
        EvaluationDimension::Definitive => "You are an evaluator checking if an answer is DEFINITIVE.\n\
             A definitive answer:\n\
             - States facts confidently without excessive hedging\n\
             - Does not lean on \"I think\", \"maybe\", \"probably\", \"might be\"\n\
             - Provides concrete information rather than vague generalities\n\n\
             Respond with pass (boolean), reasoning (string) and, if failed, improvement_plan (string)."
            .to_string(),

        EvaluationDimension::Freshness => "You are evaluating if an answer contains sufficiently RECENT information.\n\
             Check if:\n\
             1. The answer mentions dates/timeframes that are recent enough for the topic\n\
             2. The information reflects current state (not outdated)\n\n\
             Respond with pass (boolean), reasoning (string) and, if failed, improvement_plan (string)."
            .to_string(),

        EvaluationDimension::Plurality => "Count the number of distinct items/examples in the answer.\n\
             If the question asks for a specific number (e.g., \"5 examples\", \"top 10\"),\n\
             verify the answer provides at least that many.\n\n\
             Respond with pass (boolean), reasoning (string) and, if failed, improvement_plan (string)."
            .to_string(),

        EvaluationDimension::Attribution => {
            let refs = if references.is_empty() {
                "(no references provided)".to_string()
            } else {
                references
                    .iter()
                    .map(|r| {
                        format!(
                            "- {} | quote: {}",
                            r.url,
                            r.exact_quote.as_deref().unwrap_or("(none)")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            format!(
                "You are evaluating ATTRIBUTION: every factual claim must be supported\n\
                 by the cited references, and quotes must plausibly come from the sources.\n\
                 An answer with claims but no supporting references FAILS.\n\n\
                 References provided:\n{}\n\n\
                 Respond with pass (boolean), reasoning (string) and, if failed, improvement_plan (string).",
                refs
            )
        }

        EvaluationDimension::Completeness => "Evaluate if the answer addresses ALL aspects of the question.\n\
             First identify the aspects/sub-questions, then check each one is\n\
             adequately addressed.\n\n\
             Respond with pass (boolean), reasoning (string) and, if failed, improvement_plan (string)."
            .to_string(),

        EvaluationDimension::Strict => {
            let summary = knowledge
                .recent()
                .iter()
                .take(5)
                .map(|k| format!("- {}: {}", k.question, preview(&k.answer, 100)))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "You are a BRUTAL evaluator. Your job is to REJECT mediocre answers.\n\
                 An answer ONLY passes if it demonstrates:\n\
                 1. DEPTH: goes beyond surface-level information\n\
                 2. SPECIFICITY: concrete examples, numbers, or evidence\n\
                 3. ACCURACY: no factual errors or misleading statements\n\
                 If the answer is just \"good enough\", it FAILS.\n\n\
                 Knowledge base used:\n{}\n\n\
                 Respond with pass (boolean), reasoning (string) and improvement_plan\n\
                 (string) with specific, actionable guidance when it fails.",
                summary
            )
        }
    };

    (system, user)
}
