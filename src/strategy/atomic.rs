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

use super::{DeductError, Outcome, SessionStrategy, Strategy};
use crate::counter::StockCounter;
use crate::store::{Assignment, Filter, MemoryStore, Session};
use log::debug;
use std::sync::Arc;

/// `UPDATE stock SET count = count - 1 WHERE product_code = ? AND count > 0`.
///
/// The store checks and decrements under its own row lock in one statement,
/// so no application lock and no retry is needed.
pub struct AtomicUpdate {
    store: Arc<MemoryStore>,
    product_code: String,
}

impl AtomicUpdate {
    pub fn new(store: Arc<MemoryStore>, product_code: &str) -> Self {
        Self {
            store,
            product_code: product_code.to_string(),
        }
    }

    /// Returns the affected row count. Zero means no stock left or no such
    /// product.
    pub fn decrement(&self, session: &mut dyn Session) -> Result<usize, DeductError> {
        let filter = Filter::product(&self.product_code).count_above(0).limit(1);

        Ok(session.update(&filter, Assignment::Decrement(1))?)
    }
}

impl Strategy for AtomicUpdate {
    fn deduct(&self) -> Result<Outcome, DeductError> {
        self.deduct_in(&mut self.store.autocommit())
    }
}

impl SessionStrategy for AtomicUpdate {
    fn deduct_in(&self, session: &mut dyn Session) -> Result<Outcome, DeductError> {
        match self.decrement(session)? {
            0 => Ok(Outcome::Exhausted),
            _ => {
                debug!("product {} deducted", self.product_code);

                Ok(Outcome::Deducted)
            }
        }
    }
}

/// Compare-and-swap decrement of the process-local counter.
pub struct MirrorAtomic {
    counter: Arc<StockCounter>,
}

impl MirrorAtomic {
    pub fn new(counter: Arc<StockCounter>) -> Self {
        Self { counter }
    }
}

impl Strategy for MirrorAtomic {
    fn deduct(&self) -> Result<Outcome, DeductError> {
        match self.counter.dec(1) {
            Ok(remaining) => {
                debug!("mirror deducted, remaining {}", remaining);

                Ok(Outcome::Deducted)
            }
            Err(_) => Ok(Outcome::Exhausted),
        }
    }
}
