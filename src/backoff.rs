// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The backoff policy for retried upload attempts.

use std::time::Duration;

/// Exponential backoff with additive jitter.
///
/// The delay before attempt `n` (1-based) is `initial * 2^n` plus a random
/// amount in `[0, jitter)`. The defaults follow the service guidance of one
/// second doubling per attempt, with up to one second of jitter.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    jitter: Duration,
}

impl std::default::Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            jitter: Duration::from_millis(1000),
        }
    }
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, jitter: Duration) -> Self {
        Self { initial, jitter }
    }

    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial
            .checked_mul(1_u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .unwrap_or(Duration::MAX);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter = rand::Rng::random_range(&mut rand::rng(), Duration::ZERO..self.jitter);
        base.saturating_add(jitter)
    }
}
