use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter: at most `max_requests` calls per `window`. Callers
/// over the limit wait until the oldest call leaves the window.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn throttle(&self) {
        let mut requests = self.requests.lock().await;
        let now = Instant::now();
        while requests
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            requests.pop_front();
        }

        if requests.len() >= self.max_requests {
            if let Some(oldest) = requests.pop_front() {
                let wait = self.window.saturating_sub(now.duration_since(oldest));
                tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
                tokio::time::sleep(wait).await;
            }
        }

        requests.push_back(Instant::now());
    }

    pub async fn reset(&self) {
        self.requests.lock().await.clear();
    }
}
