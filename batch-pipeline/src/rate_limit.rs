use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::trace;

struct WindowState {
    window_start: Instant,
    issued: u32,
}

/// Fixed-window rate limiter: at most `per_interval` permits per interval,
/// shared by every worker. Callers over the budget suspend until the next
/// window opens; nothing spins.
pub struct RateLimiter {
    per_interval: u32,
    interval: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(per_interval: u32, interval: Duration) -> Self {
        Self {
            per_interval: per_interval.max(1),
            interval,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                issued: 0,
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.window_start) >= self.interval {
                    state.window_start = now;
                    state.issued = 0;
                }
                if state.issued < self.per_interval {
                    state.issued += 1;
                    return;
                }
                state.window_start + self.interval
            };
            trace!("rate window exhausted, waiting for the next one");
            sleep_until(wake_at).await;
        }
    }
}
