// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TIMING UTILITIES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::time::{Duration, Instant};

/// Timer para medir duração de operações
pub struct ActionTimer {
    start: Instant,
    action_name: String,
}

impl ActionTimer {
    /// Inicia um novo timer para uma ação
    pub fn start(action_name: &str) -> Self {
        Self {
            start: Instant::now(),
            action_name: action_name.to_string(),
        }
    }

    /// Retorna o tempo decorrido em milissegundos
    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    /// Retorna o tempo decorrido como Duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Para o timer e loga o tempo decorrido
    pub fn stop_and_log(self) -> u128 {
        let elapsed = self.elapsed_ms();
        log::debug!("⏱️  {} completado em {}ms", self.action_name, elapsed);
        elapsed
    }

    /// Para o timer e retorna o tempo sem logar
    pub fn stop(self) -> u128 {
        self.elapsed_ms()
    }
}

/// Estatísticas agregadas de tempo por categoria de operação
#[derive(Debug, Clone, Default)]
pub struct TimingStats {
    /// Tempos de busca (ms)
    pub search_times: Vec<u128>,
    /// Tempos de leitura de URL (ms)
    pub fetch_times: Vec<u128>,
    /// Tempos de LLM (ms)
    pub llm_times: Vec<u128>,
    /// Tempos de avaliação (ms)
    pub eval_times: Vec<u128>,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_search_time(&mut self, ms: u128) {
        self.search_times.push(ms);
    }

    pub fn add_fetch_time(&mut self, ms: u128) {
        self.fetch_times.push(ms);
    }

    pub fn add_llm_time(&mut self, ms: u128) {
        self.llm_times.push(ms);
    }

    pub fn add_eval_time(&mut self, ms: u128) {
        self.eval_times.push(ms);
    }

    fn avg(times: &[u128]) -> f64 {
        if times.is_empty() {
            0.0
        } else {
            times.iter().sum::<u128>() as f64 / times.len() as f64
        }
    }

    /// Formata um resumo das estatísticas
    pub fn summary(&self) -> String {
        format!(
            "Timing: search {}x (avg {:.0}ms) | fetch {}x (avg {:.0}ms) | llm {}x (avg {:.0}ms) | eval {}x (avg {:.0}ms)",
            self.search_times.len(),
            Self::avg(&self.search_times),
            self.fetch_times.len(),
            Self::avg(&self.fetch_times),
            self.llm_times.len(),
            Self::avg(&self.llm_times),
            self.eval_times.len(),
            Self::avg(&self.eval_times),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_action_timer() {
        let timer = ActionTimer::start("test");
        sleep(Duration::from_millis(10));
        let elapsed = timer.stop();
        assert!(elapsed >= 10);
    }

    #[test]
    fn test_timing_stats() {
        let mut stats = TimingStats::new();
        stats.add_search_time(100);
        stats.add_search_time(200);
        stats.add_fetch_time(50);

        assert_eq!(TimingStats::avg(&stats.search_times), 150.0);
        assert!(stats.summary().contains("search 2x"));
    }
}
