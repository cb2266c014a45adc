//! Cooperative pacing for tight dispatch loops.
//!
//! A `Pacer` sleeps briefly after every `loop_limit` ticks so a large
//! event fan-out does not starve other tasks on the runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pacing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingPolicy {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Ticks between pauses (default: 100)
    #[serde(default = "default_loop_limit")]
    pub loop_limit: u32,

    /// Pause length in milliseconds (default: 10)
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_loop_limit() -> u32 {
    100
}
fn default_pause_ms() -> u64 {
    10
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            loop_limit: default_loop_limit(),
            pause_ms: default_pause_ms(),
        }
    }
}

impl PacingPolicy {
    /// Policy that never pauses
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    /// Fresh tick counter for one loop
    pub fn pacer(&self) -> Pacer {
        Pacer {
            policy: self.clone(),
            ticks: 0,
            pauses: 0,
        }
    }
}

/// Tick counter bound to a policy
#[derive(Debug, Clone)]
pub struct Pacer {
    policy: PacingPolicy,
    ticks: u32,
    pauses: u32,
}

impl Pacer {
    /// Count one iteration, pausing when the limit is reached
    pub async fn tick(&mut self) {
        if !self.policy.enabled || self.policy.loop_limit == 0 {
            return;
        }

        self.ticks += 1;
        if self.ticks >= self.policy.loop_limit {
            self.ticks = 0;
            self.pauses += 1;
            tokio::time::sleep(self.policy.pause()).await;
        }
    }

    /// Number of pauses taken so far
    pub fn pauses(&self) -> u32 {
        self.pauses
    }
}
