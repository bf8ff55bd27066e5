//! 重试策略与熔断器
//!
//! - RetryPolicy：指数退避，单次等待有上限
//! - CircuitBreaker：Closed → 连续失败达阈值 → Open → 超时后 HalfOpen → 连续成功达阈值 → Closed

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 第 attempt 次重试前的等待（attempt 从 0 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// 各状态连同它需要的计数一起存放，状态切换即整体替换
#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { successes: u32 },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    phase: Mutex<Phase>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            phase: Mutex::new(Phase::Closed { failures: 0 }),
            config,
        }
    }

    // 状态机内每次替换都是完整的，锁中毒后照常使用内部值
    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Phase {
        Phase::Open {
            until: Instant::now() + self.config.open_timeout,
        }
    }

    pub fn state(&self) -> CircuitState {
        match *self.phase() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Open 到期后转为 HalfOpen 放行试探请求
    pub fn is_allowed(&self) -> bool {
        let mut phase = self.phase();
        match *phase {
            Phase::Open { until } if Instant::now() >= until => {
                *phase = Phase::HalfOpen { successes: 0 };
                true
            }
            Phase::Open { .. } => false,
            Phase::Closed { .. } | Phase::HalfOpen { .. } => true,
        }
    }

    pub fn record_success(&self) {
        let mut phase = self.phase();
        *phase = match *phase {
            Phase::HalfOpen { successes } if successes + 1 < self.config.success_threshold => Phase::HalfOpen {
                successes: successes + 1,
            },
            Phase::HalfOpen { .. } | Phase::Closed { .. } => Phase::Closed { failures: 0 },
            open @ Phase::Open { .. } => open,
        };
    }

    pub fn record_failure(&self) {
        let mut phase = self.phase();
        *phase = match *phase {
            Phase::Closed { failures } if failures + 1 < self.config.failure_threshold => Phase::Closed {
                failures: failures + 1,
            },
            // 达到阈值，或 HalfOpen 下任一失败
            _ => self.open(),
        };
    }

    pub fn reset(&self) {
        *self.phase() = Phase::Closed { failures: 0 };
    }
}
