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

//! Runs a strategy inside an explicit transaction at a chosen isolation level.
//!
//! An in-process lock inside the wrapped strategy is released before the
//! transaction commits. Under `RepeatableRead` the next caller reads the
//! snapshot taken when its own transaction began, which may predate the
//! previous caller's commit, so decrements are lost even though the critical
//! section is serialized. `ReadUncommitted` lets the next caller see the
//! pending write and restores exactness, at the price of dirty reads.
//! `Serializable` also restores it by turning the read into a locking read.

use crate::store::{Isolation, MemoryStore, Transaction};
use crate::strategy::{DeductError, Outcome, SessionStrategy, Strategy};
use log::trace;
use std::sync::Arc;

pub struct Transactional<S> {
    store: Arc<MemoryStore>,
    inner: S,
    isolation: Isolation,
}

impl<S: SessionStrategy> Transactional<S> {
    pub fn new(store: Arc<MemoryStore>, inner: S, isolation: Isolation) -> Self {
        Self {
            store,
            inner,
            isolation,
        }
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    pub fn begin(&self) -> Result<Transaction<'_>, DeductError> {
        Ok(self.store.begin(self.isolation)?)
    }

    /// Runs the wrapped strategy in `tx` and commits. On error `tx` is rolled
    /// back.
    pub fn run_in(&self, mut tx: Transaction<'_>) -> Result<Outcome, DeductError> {
        let outcome = self.inner.deduct_in(&mut tx)?;

        tx.commit()?;

        trace!("committed {:?} at {:?}", outcome, self.isolation);

        Ok(outcome)
    }
}

impl<S: SessionStrategy> Strategy for Transactional<S> {
    fn deduct(&self) -> Result<Outcome, DeductError> {
        let tx = self.begin()?;

        self.run_in(tx)
    }
}
