// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BUDGET & CLOCK
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Contabilidade de tokens, passos e tempo da sessão. Invariantes:
// - tokens_used é monotônico não-decrescente;
// - total_step_count nunca reseta; step_count reseta só no replanejamento;
// - o loop regular para em beast_threshold (85%) do budget de tokens,
//   reservando o restante para a tentativa final de resposta.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::time::{Duration, Instant};

/// Budget padrão: 1 milhão de tokens
pub const DEFAULT_TOKEN_BUDGET: u64 = 1_000_000;

/// Fração do budget que dispara o Beast Mode
pub const DEFAULT_BEAST_THRESHOLD: f64 = 0.85;

/// Relógio e contadores de budget da sessão
#[derive(Debug, Clone)]
pub struct BudgetClock {
    token_budget: u64,
    tokens_used: u64,
    step_limit: usize,
    step_count: usize,
    total_step_count: usize,
    start: Instant,
    deadline: Instant,
    beast_threshold: f64,
    failure_limit: usize,
    consecutive_tool_failures: usize,
}

impl BudgetClock {
    /// Cria o relógio da sessão
    pub fn new(token_budget: u64, step_limit: usize, max_duration: Duration) -> Self {
        let start = Instant::now();
        Self {
            token_budget: token_budget.max(1),
            tokens_used: 0,
            step_limit: step_limit.max(1),
            step_count: 0,
            total_step_count: 0,
            start,
            deadline: start + max_duration,
            beast_threshold: DEFAULT_BEAST_THRESHOLD,
            failure_limit: 5,
            consecutive_tool_failures: 0,
        }
    }

    /// Ajusta o threshold do Beast Mode (fração 0-1)
    pub fn with_beast_threshold(mut self, threshold: f64) -> Self {
        self.beast_threshold = threshold.clamp(0.1, 1.0);
        self
    }

    /// Ajusta o limite de falhas consecutivas de tool
    pub fn with_failure_limit(mut self, limit: usize) -> Self {
        self.failure_limit = limit.max(1);
        self
    }

    /// Registra consumo de tokens (monotônico)
    pub fn record_tokens(&mut self, n: u64) {
        self.tokens_used = self.tokens_used.saturating_add(n);
        log::debug!(
            "🎟️ Tokens: +{} = {} ({:.1}% do budget)",
            n,
            self.tokens_used,
            self.budget_used_fraction() * 100.0
        );
    }

    /// Avança um passo: incrementa step_count e total_step_count
    pub fn tick_step(&mut self) {
        self.step_count += 1;
        self.total_step_count += 1;
    }

    /// Reset do contador de passos do ciclo (replanejamento).
    ///
    /// total_step_count nunca volta atrás.
    pub fn reset_step_count(&mut self) {
        self.step_count = 0;
    }

    /// Tokens utilizados até agora
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    /// Budget total de tokens
    pub fn token_budget(&self) -> u64 {
        self.token_budget
    }

    /// Tokens restantes
    pub fn remaining_budget(&self) -> u64 {
        self.token_budget.saturating_sub(self.tokens_used)
    }

    /// Fração do budget utilizada (0.0 - 1.0+)
    pub fn budget_used_fraction(&self) -> f64 {
        self.tokens_used as f64 / self.token_budget as f64
    }

    /// Gate #2: uso de tokens atingiu o threshold do Beast Mode
    pub fn over_beast_threshold(&self) -> bool {
        self.budget_used_fraction() >= self.beast_threshold
    }

    /// Gate #3: total de passos atingiu o limite
    pub fn step_limit_exceeded(&self) -> bool {
        self.total_step_count >= self.step_limit
    }

    /// Gate #4: deadline da sessão passou
    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Passos do ciclo atual (reseta no replanejamento)
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Passos totais da sessão (nunca reseta)
    pub fn total_step_count(&self) -> usize {
        self.total_step_count
    }

    /// Limite de passos
    pub fn step_limit(&self) -> usize {
        self.step_limit
    }

    /// Registra uma falha de tool
    pub fn record_tool_failure(&mut self) {
        self.consecutive_tool_failures += 1;
    }

    /// Zera a sequência de falhas (após um tool bem-sucedido)
    pub fn clear_tool_failures(&mut self) {
        self.consecutive_tool_failures = 0;
    }

    /// Gate #5: sequência de falhas de tool atingiu o limite
    pub fn failures_exceeded(&self) -> bool {
        self.consecutive_tool_failures >= self.failure_limit
    }

    /// Falhas consecutivas atuais
    pub fn consecutive_tool_failures(&self) -> usize {
        self.consecutive_tool_failures
    }

    /// Tempo decorrido da sessão em ms
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> BudgetClock {
        BudgetClock::new(1000, 10, Duration::from_secs(60))
    }

    #[test]
    fn test_tokens_monotone() {
        let mut clock = clock();
        clock.record_tokens(100);
        clock.record_tokens(50);
        assert_eq!(clock.tokens_used(), 150);
        assert_eq!(clock.remaining_budget(), 850);
    }

    #[test]
    fn test_beast_threshold() {
        let mut clock = clock();
        clock.record_tokens(800);
        assert!(!clock.over_beast_threshold()); // 80%

        clock.record_tokens(50);
        assert!(clock.over_beast_threshold()); // 85%
    }

    #[test]
    fn test_step_counters() {
        let mut clock = clock();
        clock.tick_step();
        clock.tick_step();
        clock.tick_step();
        assert_eq!(clock.step_count(), 3);
        assert_eq!(clock.total_step_count(), 3);

        clock.reset_step_count();
        assert_eq!(clock.step_count(), 0);
        assert_eq!(clock.total_step_count(), 3); // nunca reseta

        clock.tick_step();
        assert_eq!(clock.total_step_count(), 4);
    }

    #[test]
    fn test_step_limit() {
        let mut clock = BudgetClock::new(1000, 2, Duration::from_secs(60));
        assert!(!clock.step_limit_exceeded());
        clock.tick_step();
        clock.tick_step();
        assert!(clock.step_limit_exceeded());
    }

    #[test]
    fn test_deadline() {
        let clock = BudgetClock::new(1000, 10, Duration::from_millis(0));
        assert!(clock.deadline_exceeded());

        let clock = BudgetClock::new(1000, 10, Duration::from_secs(60));
        assert!(!clock.deadline_exceeded());
    }

    #[test]
    fn test_tool_failures() {
        let mut clock = clock().with_failure_limit(2);
        assert!(!clock.failures_exceeded());

        clock.record_tool_failure();
        clock.record_tool_failure();
        assert!(clock.failures_exceeded());

        clock.clear_tool_failures();
        assert!(!clock.failures_exceeded());
    }
}
