// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SANDBOX DE CÓDIGO
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Execução isolada de JavaScript via Boa Engine. O interpretador não tem
// hooks de host instalados: sem rede, sem filesystem. Limites de loop e
// recursão fazem as vezes de teto de CPU; um timeout externo cobre o
// wall-clock.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::time::Duration;

use async_trait::async_trait;
use boa_engine::{Context, Source};
use tokio_util::sync::CancellationToken;

use crate::types::KnowledgeItem;

/// Limites de execução de um programa
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Teto de wall-clock
    pub wall_clock: Duration,
    /// Iterações máximas de loop (proxy de CPU no interpretador)
    pub loop_iterations: u64,
    /// Profundidade máxima de recursão
    pub recursion_depth: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            wall_clock: Duration::from_secs(5),
            loop_iterations: 5_000_000,
            recursion_depth: 256,
        }
    }
}

/// Resultado de uma execução de código
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    /// Saída do programa (valor da última expressão)
    pub stdout: String,
    /// Mensagem de erro do interpretador (se houver)
    pub stderr: String,
    /// Se a execução terminou sem erro
    pub exit_ok: bool,
}

/// Erros do runner
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("code execution timed out after {0}ms")]
    Timeout(u64),

    #[error("code execution cancelled")]
    Cancelled,

    #[error("sandbox internal error: {0}")]
    Internal(String),
}

/// Porta de execução de código
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Executa `program` com o snapshot de conhecimento como input
    async fn run(
        &self,
        program: &str,
        inputs: &[KnowledgeItem],
        limits: &SandboxLimits,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, SandboxError>;
}

/// Runner JavaScript via Boa Engine
#[derive(Debug, Default)]
pub struct BoaCodeRunner;

impl BoaCodeRunner {
    pub fn new() -> Self {
        Self
    }

    /// Prepara o fonte: injeta o conhecimento como `knowledge` global
    fn build_source(program: &str, inputs: &[KnowledgeItem]) -> String {
        let knowledge_json = serde_json::to_string(
            &inputs
                .iter()
                .map(|k| {
                    serde_json::json!({
                        "question": k.question,
                        "answer": k.answer,
                        "type": k.item_type.as_str(),
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".into());

        format!("const knowledge = {};\n{}", knowledge_json, program)
    }

    /// Executa sincronamente dentro do interpretador
    fn eval_blocking(source: String, limits: &SandboxLimits) -> SandboxOutcome {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(limits.loop_iterations);
        context
            .runtime_limits_mut()
            .set_recursion_limit(limits.recursion_depth);

        match context.eval(Source::from_bytes(source.as_bytes())) {
            Ok(value) => {
                let stdout = value
                    .to_string(&mut context)
                    .map(|s| s.to_std_string_escaped())
                    .unwrap_or_default();
                SandboxOutcome {
                    stdout,
                    stderr: String::new(),
                    exit_ok: true,
                }
            }
            Err(e) => SandboxOutcome {
                stdout: String::new(),
                stderr: e.to_string(),
                exit_ok: false,
            },
        }
    }
}

#[async_trait]
impl CodeRunner for BoaCodeRunner {
    async fn run(
        &self,
        program: &str,
        inputs: &[KnowledgeItem],
        limits: &SandboxLimits,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, SandboxError> {
        let source = Self::build_source(program, inputs);
        let limits_clone = limits.clone();

        let task = tokio::task::spawn_blocking(move || Self::eval_blocking(source, &limits_clone));

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            result = tokio::time::timeout(limits.wall_clock, task) => result,
        };

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(join_err)) => Err(SandboxError::Internal(join_err.to_string())),
            Err(_) => Err(SandboxError::Timeout(limits.wall_clock.as_millis() as u64)),
        }
    }
}

/// Runner mock com saída fixa
#[derive(Debug, Default)]
pub struct MockCodeRunner {
    pub output: String,
}

impl MockCodeRunner {
    pub fn with_output(output: &str) -> Self {
        Self {
            output: output.to_string(),
        }
    }
}

#[async_trait]
impl CodeRunner for MockCodeRunner {
    async fn run(
        &self,
        _program: &str,
        _inputs: &[KnowledgeItem],
        _limits: &SandboxLimits,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        Ok(SandboxOutcome {
            stdout: self.output.clone(),
            stderr: String::new(),
            exit_ok: true,
        })
    }
}
