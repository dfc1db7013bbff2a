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

//! Stock deduction strategies.
//!
//! Every strategy has the same read-check-write shape: read the current
//! count, stop if nothing is left, otherwise commit a decrement. They differ
//! only in how the check and the write are kept together relative to other
//! callers.

pub mod atomic;
pub mod exclusive;
pub mod optimistic;
pub mod pessimistic;
pub mod unguarded;

use crate::counter::StockCounter;
use crate::record::StockRecord;
use crate::store::{Assignment, Filter, MemoryStore, Session, StoreError};
use log::debug;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// One unit was taken.
    Deducted,

    /// Nothing left to take. Not an error.
    Exhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum DeductError {
    #[error("conditional write lost the race {attempts} times in a row")]
    Contention { attempts: u32 },

    #[error("lock wait timeout after {waited:?}")]
    LockTimeout { waited: Duration },

    #[error("no stock record for product {0}")]
    UnknownProduct(String),

    #[error(transparent)]
    Store(StoreError),
}

impl DeductError {
    /// Whether trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. } | Self::LockTimeout { .. })
    }
}

impl From<StoreError> for DeductError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockWaitTimeout { waited } => Self::LockTimeout { waited },
            e => Self::Store(e),
        }
    }
}

pub trait Strategy: Send + Sync {
    fn deduct(&self) -> Result<Outcome, DeductError>;
}

/// A strategy whose store access can be bound to a caller-provided session,
/// so that it can run inside a transaction opened by someone else.
pub trait SessionStrategy: Strategy {
    fn deduct_in(&self, session: &mut dyn Session) -> Result<Outcome, DeductError>;
}

/// Where the count lives.
#[derive(Clone)]
pub enum Target {
    /// Process-local counter. Sessions do not apply to it.
    Mirror(Arc<StockCounter>),

    /// First record of a product in the store.
    Store {
        store: Arc<MemoryStore>,
        product_code: String,
    },
}

impl Target {
    pub fn store(store: Arc<MemoryStore>, product_code: &str) -> Self {
        Self::Store {
            store,
            product_code: product_code.to_string(),
        }
    }

    /// Plain read, check, then an unconditional write of the computed value.
    /// Nothing here keeps the three steps together.
    pub(crate) fn read_check_write(
        &self,
        session: Option<&mut dyn Session>,
        think_time: Duration,
    ) -> Result<Outcome, DeductError> {
        match self {
            Self::Mirror(counter) => {
                let count = counter.get();

                if count == 0 {
                    return Ok(Outcome::Exhausted);
                }

                pause(think_time);

                counter.set(count - 1);

                debug!("mirror deducted, remaining {}", count - 1);

                Ok(Outcome::Deducted)
            }
            Self::Store {
                store,
                product_code,
            } => match session {
                Some(session) => store_read_check_write(session, product_code, think_time),
                None => store_read_check_write(&mut store.autocommit(), product_code, think_time),
            },
        }
    }
}

fn store_read_check_write(
    session: &mut dyn Session,
    product_code: &str,
    think_time: Duration,
) -> Result<Outcome, DeductError> {
    let record = first_record(session.find_by_product(product_code)?, product_code)?;

    if record.count == 0 {
        return Ok(Outcome::Exhausted);
    }

    pause(think_time);

    let remaining = record.count - 1;

    let affected = session.update(&Filter::id(record.id), Assignment::SetCount(remaining))?;

    if affected == 0 {
        return Err(DeductError::UnknownProduct(product_code.to_string()));
    }

    debug!("record {} deducted, remaining {}", record.id, remaining);

    Ok(Outcome::Deducted)
}

// the first record in id order wins. a warehouse selection policy would go here
pub(crate) fn first_record(
    records: Vec<StockRecord>,
    product_code: &str,
) -> Result<StockRecord, DeductError> {
    records
        .into_iter()
        .next()
        .ok_or_else(|| DeductError::UnknownProduct(product_code.to_string()))
}

// simulated work between read and write. a zero pause still yields
pub(crate) fn pause(d: Duration) {
    if d.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(d);
    }
}
