// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ANÁLISE DE ERROS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Quando o avaliador reprova uma resposta, o diário daquele ciclo é
// analisado antes de ser limpo. O resultado vira um item de conhecimento
// do tipo error-analysis: a narrativa morre, o aprendizado sobrevive.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde_json::json;

use crate::agent::DiaryEntry;
use crate::llm::{ChatMessage, GenerateOpts, LlmError, LlmPort, SchemaSpec};
use crate::utils::preview;

/// Resultado da análise de uma tentativa reprovada
#[derive(Debug, Clone)]
pub struct ErrorAnalysis {
    /// Resumo cronológico das ações tomadas
    pub recap: String,
    /// Identificação específica do que deu errado
    pub blame: String,
    /// Sugestão acionável de melhoria
    pub improvement: String,
    /// Tokens consumidos pela análise
    pub tokens_used: u64,
}

impl ErrorAnalysis {
    /// Formata a análise como texto de conhecimento
    pub fn as_knowledge_text(&self) -> String {
        format!(
            "Recap: {}\nBlame: {}\nImprovement: {}",
            self.recap, self.blame, self.improvement
        )
    }
}

/// Analisa o diário de uma tentativa reprovada.
///
/// Em falha do LLM retorna uma análise mínima construída localmente - o
/// item de conhecimento é gerado de qualquer forma, porque o replanejamento
/// depende dele para não repetir o mesmo caminho.
pub async fn analyze_failure(
    llm: &dyn LlmPort,
    diary: &[DiaryEntry],
    original_question: &str,
    failed_answer: &str,
    failure_reason: &str,
    opts: &GenerateOpts,
) -> Result<ErrorAnalysis, LlmError> {
    let schema = SchemaSpec::new(
        "error-analysis",
        json!({
            "type": "object",
            "properties": {
                "recap": {"type": "string"},
                "blame": {"type": "string"},
                "improvement": {"type": "string"},
            },
            "required": ["recap", "blame", "improvement"],
        }),
    );

    let system = "You are an expert at analyzing search and reasoning processes.\n\
                  Analyze the sequence of steps and identify what went wrong.\n\
                  - recap: summarize key actions chronologically, highlight repetitive patterns\n\
                  - blame: point to the specific steps or patterns that led to the rejected answer\n\
                  - improvement: actionable suggestions that could lead to a better outcome";

    let user = format!(
        "Original question: {}\n\n{}\n\nRejected answer (truncated): {}\n\nEvaluator verdict: {}",
        original_question,
        format_diary(diary),
        preview(failed_answer, 300),
        failure_reason,
    );

    let messages = [ChatMessage::user(user)];

    match llm.generate_object(&schema, system, &messages, opts).await {
        Ok(reply) => Ok(ErrorAnalysis {
            recap: reply.object["recap"].as_str().unwrap_or_default().to_string(),
            blame: reply.object["blame"].as_str().unwrap_or_default().to_string(),
            improvement: reply.object["improvement"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            tokens_used: reply.tokens_used,
        }),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            log::warn!("🔬 Análise via LLM falhou, gerando análise local: {}", e);
            Ok(ErrorAnalysis {
                recap: format!("{} steps taken before the rejected answer", diary.len()),
                blame: failure_reason.to_string(),
                improvement: "Gather different sources before answering again".to_string(),
                tokens_used: e.tokens_used(),
            })
        }
    }
}

/// Formata o diário no envelope <steps> usado no prompt de análise
fn format_diary(diary: &[DiaryEntry]) -> String {
    let mut output = String::from("<steps>\n\n");
    for (i, entry) in diary.iter().enumerate() {
        output.push_str(&entry.format(i + 1));
        output.push_str("\n\n");
    }
    output.push_str("</steps>");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmPort;
    use crate::types::SerpQuery;

    fn diary() -> Vec<DiaryEntry> {
        vec![DiaryEntry::Search {
            queries: vec![SerpQuery::text("rust book")],
            urls_found: 4,
            think: "looking".into(),
        }]
    }

    #[tokio::test]
    async fn test_analyze_via_llm() {
        let llm = MockLlmPort::with_script(vec![json!({
            "recap": "searched once",
            "blame": "answered too early",
            "improvement": "visit the found urls first",
        })]);

        let analysis = analyze_failure(
            &llm,
            &diary(),
            "who wrote the rust book?",
            "someone",
            "strict: lacks evidence",
            &GenerateOpts::default(),
        )
        .await
        .unwrap();

        assert_eq!(analysis.blame, "answered too early");
        assert!(analysis.as_knowledge_text().contains("Recap:"));
    }

    #[tokio::test]
    async fn test_analyze_falls_back_locally() {
        let llm = MockLlmPort::failing().with_tokens_per_call(9);

        let analysis = analyze_failure(
            &llm,
            &diary(),
            "q",
            "a",
            "freshness: outdated",
            &GenerateOpts::default(),
        )
        .await
        .unwrap();

        assert_eq!(analysis.blame, "freshness: outdated");
        assert_eq!(analysis.tokens_used, 9);
    }

    #[test]
    fn test_format_diary_envelope() {
        let formatted = format_diary(&diary());
        assert!(formatted.starts_with("<steps>"));
        assert!(formatted.ends_with("</steps>"));
        assert!(formatted.contains("At step 1"));
    }
}
