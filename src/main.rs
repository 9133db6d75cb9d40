// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SONDA CLI
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// CLI para execução do agente de pesquisa.
//
// Uso:
//   sonda-cli "Quem escreveu o livro do Rust?"
//   sonda-cli --budget 500000 --steps 30 "pergunta complexa"
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use sonda::config::{create_tokio_runtime, Config};
use sonda::prelude::*;

fn main() -> anyhow::Result<()> {
    // .env antes de tudo (API keys, budget, provedores)
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let parsed = match parse_args(&args) {
        Some(parsed) => parsed,
        None => {
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    let config = Config::load()?;
    let runtime = create_tokio_runtime(&config.runtime)?;

    runtime.block_on(run(config, parsed))
}

struct CliArgs {
    question: String,
    budget: Option<u64>,
    steps: Option<usize>,
    timeout_ms: Option<u64>,
}

fn parse_args(args: &[String]) -> Option<CliArgs> {
    let mut budget = None;
    let mut steps = None;
    let mut timeout_ms = None;
    let mut rest = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--budget" => {
                budget = args.get(i + 1)?.parse().ok();
                i += 2;
            }
            "--steps" => {
                steps = args.get(i + 1)?.parse().ok();
                i += 2;
            }
            "--timeout" => {
                timeout_ms = args.get(i + 1)?.parse().ok();
                i += 2;
            }
            other => {
                rest.push(other.to_string());
                i += 1;
            }
        }
    }

    if rest.is_empty() {
        return None;
    }

    Some(CliArgs {
        question: rest.join(" "),
        budget,
        steps,
        timeout_ms,
    })
}

fn print_usage(program: &str) {
    eprintln!("Sonda CLI v{}", sonda::VERSION);
    eprintln!();
    eprintln!("Uso: {} [opções] <pergunta>", program);
    eprintln!();
    eprintln!("Opções:");
    eprintln!("  --budget <tokens>  Budget máximo de tokens (padrão: 1000000)");
    eprintln!("  --steps <n>        Limite de passos (padrão: 20)");
    eprintln!("  --timeout <ms>     Duração máxima da sessão em ms");
    eprintln!();
    eprintln!("Exemplo:");
    eprintln!("  {} \"Quem escreveu o livro do Rust?\"", program);
}

async fn run(config: Config, args: CliArgs) -> anyhow::Result<()> {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(" SONDA v{}", sonda::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Pergunta: {}", args.question);
    println!();

    let mut request = config.request_for(&args.question);
    if let Some(budget) = args.budget {
        request.token_budget = budget;
    }
    if let Some(steps) = args.steps {
        request.max_steps = steps;
    }
    if let Some(timeout) = args.timeout_ms {
        request.max_duration_ms = timeout;
    }

    let agent = ResearchAgent::new(
        config.build_llm_port(),
        config.build_search_port(),
        config.build_fetch_port(),
        config.build_code_runner(),
        request,
    )?;

    // Ctrl-C cancela a sessão cooperativamente
    let cancel = agent.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("🛑 Ctrl-C recebido, cancelando sessão");
            cancel.cancel();
        }
    });

    match agent.research().await {
        Ok(result) => {
            print_result(&result);
            Ok(())
        }
        Err(AgentError::Cancelled(reason)) => {
            println!();
            println!("✋ Pesquisa cancelada: {}", reason);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_result(result: &ResearchResult) {
    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(" RESULTADO");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    match &result.answer {
        Some(answer) => {
            if result.is_best {
                println!("[Melhor resposta disponível - requisitos de avaliação esgotados]");
                println!();
            }
            println!("Resposta:");
            println!("{}", answer);
            println!();

            if !result.references.is_empty() {
                println!("Referências:");
                for reference in &result.references {
                    if reference.title.is_empty() {
                        println!("  - {}", reference.url);
                    } else {
                        println!("  - {} ({})", reference.title, reference.url);
                    }
                }
                println!();
            }
        }
        None => {
            println!("✗ Pesquisa falhou: {}", result.error.as_deref().unwrap_or("unknown"));
            println!();
        }
    }

    let metrics = &result.metrics;
    println!("Métricas:");
    println!("  Passos: {}", metrics.total_steps);
    println!("  Tokens: {}", metrics.tokens_used);
    println!("  Duração: {}ms", metrics.duration_ms);
    println!(
        "  Ações: {} search | {} visit | {} reflect | {} code | {} answer",
        metrics.action_counts.search,
        metrics.action_counts.visit,
        metrics.action_counts.reflect,
        metrics.action_counts.code,
        metrics.action_counts.answer,
    );
    println!("  Falhas de tool: {}", metrics.tool_failure_count);
    println!(
        "  URLs: {} coletadas | {} visitadas | {} lidas",
        result.all_urls.len(),
        result.visited_urls.len(),
        result.read_urls.len(),
    );
}
