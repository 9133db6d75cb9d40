// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RATE LIMITING POR VENDOR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Token bucket compartilhado entre sessões. A espera por um slot é
// uma suspensão cancelável: o cancel token da sessão interrompe o wait.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Bucket de tokens para limitar chamadas a um vendor.
///
/// Capacidade `capacity` reabastecida a `refill_per_sec` tokens por segundo.
/// `acquire` consome um token, esperando o refill quando o bucket está vazio.
pub struct RateBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// Cria um bucket cheio
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_sec,
        }
    }

    /// Tenta consumir um token; retorna quanto falta esperar se não houver.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// Consome um token, esperando o refill se necessário.
    ///
    /// Retorna `false` se o cancelamento foi observado durante a espera.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            match self.try_take() {
                Ok(()) => return true,
                Err(wait) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_under_capacity() {
        let bucket = RateBucket::new(2, 100.0);
        let cancel = CancellationToken::new();

        assert!(bucket.acquire(&cancel).await);
        assert!(bucket.acquire(&cancel).await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let bucket = RateBucket::new(1, 50.0);
        let cancel = CancellationToken::new();

        assert!(bucket.acquire(&cancel).await);
        // Bucket vazio: o próximo acquire espera ~20ms pelo refill
        let start = Instant::now();
        assert!(bucket.acquire(&cancel).await);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_acquire_cancelled() {
        let bucket = RateBucket::new(1, 0.001); // refill praticamente nulo
        let cancel = CancellationToken::new();

        assert!(bucket.acquire(&cancel).await);

        cancel.cancel();
        assert!(!bucket.acquire(&cancel).await);
    }
}
