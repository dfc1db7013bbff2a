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

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("stock counter exhausted")]
pub struct CounterError;

/// Process-local stock count shared between threads. Counter is backed by an
/// AtomicU64, so individual loads and stores never tear, but `get` followed
/// by `set` is not atomic as a whole: that gap is where lost updates happen.
pub struct StockCounter(AtomicU64);

impl StockCounter {
    pub fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }

    /// Compare-and-swap decrement. Fails without modifying the counter if
    /// fewer than `amount` units remain.
    pub fn dec(&self, amount: u64) -> Result<u64, CounterError> {
        loop {
            let value = self.0.load(Ordering::SeqCst);

            if amount > value {
                return Err(CounterError);
            }

            if self
                .0
                .compare_exchange(value, value - amount, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(value - amount);
            }
        }
    }
}
