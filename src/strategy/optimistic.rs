/*
 * Copyright (C) 2026 Fastly, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Optimistic concurrency control.
//!
//! Read the record with its conflict token, compute the new count, and write
//! it only if the token is unchanged. A write that affects no rows lost the
//! race and the whole read-check-write is tried again, up to a fixed number
//! of attempts with exponential backoff in between.
//!
//! The store advances the token on every write, so the writer only ever
//! compares it. Bumping it on both sides would make every write look stale.

use super::{first_record, pause, DeductError, Outcome, SessionStrategy, Strategy};
use crate::record::TokenKind;
use crate::store::{Assignment, Filter, MemoryStore, Session};
use log::{debug, warn};
use std::cmp;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            backoff_base: Duration::from_micros(50),
            backoff_max: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);

        cmp::min(self.backoff_base.saturating_mul(factor), self.backoff_max)
    }
}

pub struct Optimistic {
    store: Arc<MemoryStore>,
    product_code: String,
    token: TokenKind,
    retry: RetryPolicy,
}

impl Optimistic {
    pub fn new(store: Arc<MemoryStore>, product_code: &str, token: TokenKind) -> Self {
        Self {
            store,
            product_code: product_code.to_string(),
            token,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;

        self
    }
}

impl Strategy for Optimistic {
    fn deduct(&self) -> Result<Outcome, DeductError> {
        self.deduct_in(&mut self.store.autocommit())
    }
}

impl SessionStrategy for Optimistic {
    /// Under a repeatable-read transaction every retry rereads the same
    /// snapshot, so a conflict there can only end in `Contention`.
    fn deduct_in(&self, session: &mut dyn Session) -> Result<Outcome, DeductError> {
        let max_attempts = cmp::max(self.retry.max_attempts, 1);

        for attempt in 1..=max_attempts {
            let records = session.find_by_product(&self.product_code)?;
            let record = first_record(records, &self.product_code)?;

            if record.count == 0 {
                return Ok(Outcome::Exhausted);
            }

            let token = record.token(self.token);
            let filter = Filter::id(record.id).token(token);

            if session.update(&filter, Assignment::SetCount(record.count - 1))? > 0 {
                debug!(
                    "record {} deducted at {}, remaining {}",
                    record.id,
                    token,
                    record.count - 1
                );

                return Ok(Outcome::Deducted);
            }

            debug!(
                "record {} changed since {}, attempt {}/{}",
                record.id, token, attempt, max_attempts
            );

            if attempt < max_attempts {
                pause(self.retry.backoff(attempt));
            }
        }

        warn!(
            "product {} still contended after {} attempts",
            self.product_code, max_attempts
        );

        Err(DeductError::Contention {
            attempts: max_attempts,
        })
    }
}
