//! # Invariantes do loop de pesquisa
//!
//! Propriedades quantificadas, testadas contra roteiros arbitrários de
//! saída do LLM (inclusive lixo):
//! - Terminação: toda execução termina dentro dos limites
//! - Respeito ao budget: o consumo não ultrapassa o threshold mais o custo
//!   de uma iteração em andamento e do beast mode
//! - Determinismo: roteiros idênticos produzem resultados idênticos

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use sonda::agent::sandbox::MockCodeRunner;
use sonda::agent::{ResearchAgent, ResearchRequest};
use sonda::llm::MockLlmPort;
use sonda::search::{MockFetchPort, MockSearchPort};
use sonda::types::SearchHit;

/// Tokens reportados por chamada do mock
const TOKENS_PER_CALL: u64 = 200;

/// Máximo de chamadas LLM que uma iteração em andamento mais o beast mode
/// podem consumir depois que o gate de budget já passaria a disparar
/// (determine + decide + rewriter + 6 avaliações + análise + beast).
const MAX_CALLS_PAST_THRESHOLD: u64 = 11;

fn arb_outcome() -> impl Strategy<Value = Result<serde_json::Value, String>> {
    prop_oneof![
        Just(Ok(
            json!({"action": "answer", "think": "t", "answer": "an answer", "references": []})
        )),
        Just(Ok(
            json!({"action": "search", "think": "t", "queries": ["some query terms"]})
        )),
        Just(Ok(
            json!({"action": "visit", "think": "t", "urls": ["https://known.example.com/page"]})
        )),
        Just(Ok(
            json!({"action": "reflect", "think": "t", "questions": ["an unrelated follow up topic"]})
        )),
        Just(Ok(json!({"action": "code", "think": "t", "program": "1 + 1"}))),
        Just(Ok(json!({"pass": true, "reasoning": "fine"}))),
        Just(Ok(json!({"pass": false, "reasoning": "rejected"}))),
        Just(Ok(json!({"completely": "unrelated shape"}))),
        Just(Ok(json!({"answer": "a bare beast-mode style answer"}))),
        Just(Err("unparseable bytes".to_string())),
    ]
}

fn build_agent(
    outcomes: Vec<Result<serde_json::Value, String>>,
    token_budget: u64,
    max_steps: usize,
) -> (ResearchAgent, Arc<MockLlmPort>) {
    let llm = Arc::new(MockLlmPort::with_outcomes(outcomes).with_tokens_per_call(TOKENS_PER_CALL));

    let search = MockSearchPort::with_hits(vec![SearchHit {
        url: "https://known.example.com/page".into(),
        title: "Known".into(),
        snippet: "snippet".into(),
        ..Default::default()
    }]);

    let fetch = MockFetchPort::new().with_page("https://known.example.com/page", "page text", "Known");

    let mut request = ResearchRequest::for_question("does this loop always terminate?");
    request.token_budget = token_budget;
    request.max_steps = max_steps;
    request.max_duration_ms = 5_000;

    let agent = ResearchAgent::new(
        llm.clone(),
        Arc::new(search),
        Arc::new(fetch),
        Arc::new(MockCodeRunner::with_output("2")),
        request,
    )
    .expect("valid request");

    (agent, llm)
}

fn run_to_completion(
    outcomes: Vec<Result<serde_json::Value, String>>,
    token_budget: u64,
    max_steps: usize,
) -> sonda::agent::ResearchResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    runtime.block_on(async move {
        let (agent, _llm) = build_agent(outcomes, token_budget, max_steps);
        tokio::time::timeout(Duration::from_secs(20), agent.research())
            .await
            .expect("research must terminate within the wall-clock bound")
            .expect("no cancellation was requested")
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Terminação: qualquer roteiro (inclusive adversarial) termina em um
    /// estado terminal sem estourar o limite de passos.
    #[test]
    fn research_always_terminates(
        outcomes in prop::collection::vec(arb_outcome(), 0..30),
        token_budget in 2_000u64..60_000,
        max_steps in 1usize..8,
    ) {
        let result = run_to_completion(outcomes, token_budget, max_steps);

        prop_assert!(result.metrics.total_steps <= max_steps);
        // Terminal: ou tem resposta, ou tem motivo de falha
        prop_assert!(result.answer.is_some() || result.error.is_some());
    }

    /// Respeito ao budget: o consumo total fica limitado pelo threshold de
    /// beast mode mais o custo da iteração em andamento e da tentativa final.
    #[test]
    fn token_budget_is_respected(
        outcomes in prop::collection::vec(arb_outcome(), 0..30),
        token_budget in 2_000u64..60_000,
    ) {
        let result = run_to_completion(outcomes, token_budget, 6);

        let threshold = (token_budget as f64 * 0.85) as u64;
        let ceiling = threshold + MAX_CALLS_PAST_THRESHOLD * TOKENS_PER_CALL;
        prop_assert!(
            result.metrics.tokens_used <= ceiling,
            "used {} tokens, ceiling {}",
            result.metrics.tokens_used,
            ceiling
        );
    }

    /// Determinismo: dois runs com o mesmo roteiro produzem o mesmo
    /// resultado (módulo métricas de relógio).
    #[test]
    fn identical_scripts_produce_identical_results(
        outcomes in prop::collection::vec(arb_outcome(), 0..25),
        max_steps in 1usize..8,
    ) {
        let first = run_to_completion(outcomes.clone(), 30_000, max_steps);
        let second = run_to_completion(outcomes, 30_000, max_steps);

        prop_assert_eq!(first.answer, second.answer);
        prop_assert_eq!(first.error, second.error);
        prop_assert_eq!(first.is_best, second.is_best);
        prop_assert_eq!(first.metrics.total_steps, second.metrics.total_steps);
        prop_assert_eq!(first.metrics.tokens_used, second.metrics.tokens_used);
        prop_assert_eq!(first.metrics.action_counts, second.metrics.action_counts);
        prop_assert_eq!(first.all_urls, second.all_urls);
        prop_assert_eq!(first.read_urls, second.read_urls);
        prop_assert_eq!(first.visited_urls, second.visited_urls);
    }
}

/// O multiset de requisitos esgotado nunca re-entra no loop de decisão:
/// três reprovações consecutivas de strict saem com Done{is_best}.
#[test]
fn requirement_exhaustion_is_terminal() {
    let no_dims = json!({
        "needs_definitive": false,
        "needs_freshness": false,
        "needs_plurality": false,
        "needs_attribution": false,
        "needs_completeness": false,
    });

    let mut outcomes: Vec<Result<serde_json::Value, String>> = vec![Ok(no_dims)];
    for round in 0..3 {
        // tentativa de resposta
        outcomes.push(Ok(json!({
            "action": "answer", "think": "t",
            "answer": format!("candidate {}", round), "references": [],
        })));
        // strict reprova
        outcomes.push(Ok(json!({"pass": false, "reasoning": "rejected"})));
        if round < 2 {
            // análise + passo de cooldown; a pergunta refletida é quase
            // idêntica à original, então é descartada como duplicata e a
            // fila de gaps não muda (a seleção round-robin fica estável)
            outcomes.push(Ok(json!({"recap": "r", "blame": "b", "improvement": "i"})));
            outcomes.push(Ok(json!({
                "action": "reflect", "think": "t",
                "questions": [format!("a question with strict only requirements {}", round)],
            })));
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    let result = runtime.block_on(async move {
        let llm = Arc::new(MockLlmPort::with_outcomes(outcomes).with_tokens_per_call(TOKENS_PER_CALL));

        // no_direct_answer: a primeira resposta não sai pelo caminho trivial
        let mut request = ResearchRequest::for_question("a question with strict only requirements");
        request.no_direct_answer = true;
        request.max_bad_attempts = 3;

        let agent = ResearchAgent::new(
            llm,
            Arc::new(MockSearchPort::new()),
            Arc::new(MockFetchPort::new()),
            Arc::new(MockCodeRunner::with_output("2")),
            request,
        )
        .expect("valid request");

        agent.research().await.expect("not cancelled")
    });

    assert!(result.is_best, "exhausted requirements must yield is_best");
    assert_eq!(result.answer.as_deref(), Some("candidate 2"));
    assert!(result.error.is_none());
}
