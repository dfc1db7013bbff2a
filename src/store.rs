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

//! In-memory stand-in for the relational store holding stock records.
//!
//! The store provides just enough of a transactional database for the
//! strategies to be meaningful: exclusive row locks held until transaction
//! end, bounded lock waits, conditional updates reporting affected rows, and
//! four isolation levels for plain reads. Every committed write advances both
//! conflict tokens of a row, so callers only ever compare tokens and never
//! write them.

use crate::record::{ConcurrencyToken, StockRecord};
use log::{debug, trace};
use serde::Deserialize;
use slab::Slab;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,

    #[error("lock wait timeout exceeded after {waited:?}")]
    LockWaitTimeout { waited: Duration },

    #[error("check constraint failed: count of record {id} would become negative")]
    CheckViolation { id: u64 },
}

/// Visibility of other transactions' writes to plain (non-locking) reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// Reads see writes of transactions that have not committed yet. Dirty
    /// reads are possible: a value read may be rolled back later.
    ReadUncommitted,

    /// Reads see the newest committed version.
    ReadCommitted,

    /// Reads see the versions committed before the transaction began.
    RepeatableRead,

    /// Reads lock the rows they return, like `SELECT ... FOR UPDATE`.
    Serializable,
}

impl Isolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "read-uncommitted",
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Id(u64),
    Product(String),
}

/// Row selection and predicate of a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    key: Key,
    count_above: Option<u64>,
    token: Option<ConcurrencyToken>,
    limit: Option<usize>,
}

impl Filter {
    pub fn id(id: u64) -> Self {
        Self::new(Key::Id(id))
    }

    pub fn product(product_code: &str) -> Self {
        Self::new(Key::Product(product_code.to_string()))
    }

    fn new(key: Key) -> Self {
        Self {
            key,
            count_above: None,
            token: None,
            limit: None,
        }
    }

    pub fn count_above(mut self, n: u64) -> Self {
        self.count_above = Some(n);

        self
    }

    pub fn token(mut self, token: ConcurrencyToken) -> Self {
        self.token = Some(token);

        self
    }

    /// Stop after this many rows were updated, in ascending id order.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);

        self
    }

    fn selects(&self, r: &StockRecord) -> bool {
        match &self.key {
            Key::Id(id) => r.id == *id,
            Key::Product(code) => r.product_code == *code,
        }
    }

    fn accepts(&self, r: &StockRecord) -> bool {
        if let Some(n) = self.count_above {
            if r.count <= n {
                return false;
            }
        }

        if let Some(token) = &self.token {
            if !r.matches(token) {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// `count = count - n`, computed by the store on the current row.
    Decrement(u64),

    /// `count = n`, computed by the caller from an earlier read.
    SetCount(u64),
}

impl Assignment {
    fn apply(&self, count: u64) -> Option<u64> {
        match self {
            Self::Decrement(n) => count.checked_sub(*n),
            Self::SetCount(n) => Some(*n),
        }
    }
}

/// The operations a strategy may issue, either as auto-committed statements
/// or inside a transaction.
pub trait Session {
    /// Plain read of every record of a product, ordered by id.
    fn find_by_product(&mut self, product_code: &str) -> Result<Vec<StockRecord>, StoreError>;

    fn get(&mut self, id: u64) -> Result<Option<StockRecord>, StoreError>;

    /// Locking read. Rows are locked in id order and stay locked until the
    /// enclosing transaction ends (or the statement, in auto-commit).
    fn find_for_update(&mut self, product_code: &str) -> Result<Vec<StockRecord>, StoreError>;

    /// Returns the number of rows affected.
    fn update(&mut self, filter: &Filter, assignment: Assignment) -> Result<usize, StoreError>;
}

type TxId = u64;

struct Version {
    seq: u64,
    record: StockRecord,
}

struct Row {
    head: Version,
    older: Vec<Version>,
    pending: Option<(TxId, StockRecord)>,
    owner: Option<TxId>,
}

impl Row {
    fn current(&self, tx: TxId) -> &StockRecord {
        match &self.pending {
            Some((owner, record)) if *owner == tx => record,
            _ => &self.head.record,
        }
    }

    fn as_of(&self, seq: u64) -> Option<&StockRecord> {
        if self.head.seq <= seq {
            return Some(&self.head.record);
        }

        self.older
            .iter()
            .rev()
            .find(|v| v.seq <= seq)
            .map(|v| &v.record)
    }

    fn install(&mut self, seq: u64, record: StockRecord) {
        let prev = std::mem::replace(&mut self.head, Version { seq, record });
        self.older.push(prev);
    }

    // drop versions no snapshot at or after horizon can see
    fn prune(&mut self, horizon: Option<u64>) {
        let h = match horizon {
            Some(h) if self.head.seq > h => h,
            _ => {
                self.older.clear();
                return;
            }
        };

        if let Some(pos) = self.older.iter().rposition(|v| v.seq <= h) {
            self.older.drain(..pos);
        }
    }
}

struct TxState {
    isolation: Isolation,
    snapshot: u64,
}

#[derive(Clone, Copy)]
enum Reader {
    Auto,
    Tx(TxId),
}

struct StoreInner {
    available: bool,
    rows: Slab<Row>,
    seq: u64,
    next_tx: TxId,
    active: HashMap<TxId, TxState>,
    clock: OffsetDateTime,
}

impl StoreInner {
    fn next_tx(&mut self) -> TxId {
        self.next_tx += 1;

        self.next_tx
    }

    // strictly increasing, so timestamp tokens never repeat
    fn tick(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();

        self.clock = if now > self.clock {
            now
        } else {
            self.clock + time::Duration::microseconds(1)
        };

        self.clock
    }

    fn isolation(&self, reader: Reader) -> Option<Isolation> {
        match reader {
            Reader::Auto => None,
            Reader::Tx(id) => self.active.get(&id).map(|s| s.isolation),
        }
    }

    fn visible(&self, reader: Reader, row: &Row) -> Option<StockRecord> {
        let id = match reader {
            Reader::Auto => return Some(row.head.record.clone()),
            Reader::Tx(id) => id,
        };

        if let Some((owner, record)) = &row.pending {
            if *owner == id {
                return Some(record.clone());
            }
        }

        let state = match self.active.get(&id) {
            Some(state) => state,
            None => return Some(row.head.record.clone()),
        };

        match state.isolation {
            Isolation::ReadUncommitted => match &row.pending {
                Some((_, record)) => Some(record.clone()),
                None => Some(row.head.record.clone()),
            },
            Isolation::RepeatableRead => row.as_of(state.snapshot).cloned(),
            Isolation::ReadCommitted | Isolation::Serializable => Some(row.head.record.clone()),
        }
    }

    fn keys_where<F>(&self, f: F) -> Vec<usize>
    where
        F: Fn(&StockRecord) -> bool,
    {
        self.rows
            .iter()
            .filter(|(_, row)| f(&row.head.record))
            .map(|(key, _)| key)
            .collect()
    }

    fn write(
        &mut self,
        key: usize,
        tx: TxId,
        filter: &Filter,
        assignment: Assignment,
    ) -> Result<bool, StoreError> {
        let current = self.rows[key].current(tx).clone();

        if !filter.accepts(&current) {
            return Ok(false);
        }

        let count = assignment
            .apply(current.count)
            .ok_or(StoreError::CheckViolation { id: current.id })?;

        let modified_at = self.tick();

        let record = StockRecord {
            count,
            version: current.version + 1,
            modified_at,
            ..current
        };

        self.rows[key].pending = Some((tx, record));

        Ok(true)
    }

    fn finish(&mut self, tx: TxId, commit: bool) {
        self.active.remove(&tx);

        if commit {
            self.seq += 1;
        }

        let seq = self.seq;

        let horizon = self
            .active
            .values()
            .filter(|s| s.isolation == Isolation::RepeatableRead)
            .map(|s| s.snapshot)
            .min();

        for (_, row) in self.rows.iter_mut() {
            match row.pending.take() {
                Some((owner, record)) if owner == tx => {
                    if commit {
                        row.install(seq, record);
                        row.prune(horizon);
                    }
                }
                other => row.pending = other,
            }

            if row.owner == Some(tx) {
                row.owner = None;
            }
        }
    }
}

pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    cond: Condvar,
    lock_wait_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_WAIT_TIMEOUT)
    }
}

impl MemoryStore {
    pub fn new(lock_wait_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                available: true,
                rows: Slab::new(),
                seq: 0,
                next_tx: 0,
                active: HashMap::new(),
                clock: OffsetDateTime::UNIX_EPOCH,
            }),
            cond: Condvar::new(),
            lock_wait_timeout,
        }
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        self.lock_wait_timeout
    }

    /// Inserts a committed record and returns its id.
    pub fn seed(&self, product_code: &str, warehouse: &str, count: u64) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;

        inner.seq += 1;
        let seq = inner.seq;
        let modified_at = inner.tick();

        let entry = inner.rows.vacant_entry();
        let id = entry.key() as u64 + 1;

        entry.insert(Row {
            head: Version {
                seq,
                record: StockRecord {
                    id,
                    product_code: product_code.to_string(),
                    warehouse: warehouse.to_string(),
                    count,
                    version: 0,
                    modified_at,
                },
            },
            older: Vec::new(),
            pending: None,
            owner: None,
        });

        debug!(
            "seeded record {} product={} warehouse={} count={}",
            id, product_code, warehouse, count
        );

        Ok(id)
    }

    /// While unavailable, every operation fails with `StoreError::Unavailable`.
    /// Waiters give up immediately.
    pub fn set_available(&self, available: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.available = available;

        self.cond.notify_all();
    }

    pub fn open_transactions(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        inner.active.len()
    }

    pub fn autocommit(&self) -> AutoCommit<'_> {
        AutoCommit { store: self }
    }

    pub fn begin(&self, isolation: Isolation) -> Result<Transaction<'_>, StoreError> {
        let mut inner = self.lock()?;

        let id = inner.next_tx();
        let snapshot = inner.seq;

        inner.active.insert(
            id,
            TxState {
                isolation,
                snapshot,
            },
        );

        trace!("tx {} begin {:?} snapshot={}", id, isolation, snapshot);

        Ok(Transaction {
            store: self,
            id,
            isolation,
            open: true,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if !inner.available {
            return Err(StoreError::Unavailable);
        }

        Ok(inner)
    }

    fn acquire_row<'a>(
        &self,
        mut inner: MutexGuard<'a, StoreInner>,
        tx: TxId,
        key: usize,
        start: Instant,
    ) -> (MutexGuard<'a, StoreInner>, Result<(), StoreError>) {
        loop {
            match inner.rows[key].owner {
                Some(owner) if owner != tx => {}
                _ => {
                    inner.rows[key].owner = Some(tx);

                    return (inner, Ok(()));
                }
            }

            let waited = start.elapsed();

            if waited >= self.lock_wait_timeout {
                return (inner, Err(StoreError::LockWaitTimeout { waited }));
            }

            inner = match self
                .cond
                .wait_timeout(inner, self.lock_wait_timeout - waited)
            {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };

            if !inner.available {
                return (inner, Err(StoreError::Unavailable));
            }
        }
    }

    fn lock_rows<'a>(
        &self,
        mut inner: MutexGuard<'a, StoreInner>,
        tx: TxId,
        keys: &[usize],
    ) -> (MutexGuard<'a, StoreInner>, Result<(), StoreError>) {
        let start = Instant::now();

        for &key in keys {
            let (guard, ret) = self.acquire_row(inner, tx, key, start);
            inner = guard;

            if ret.is_err() {
                return (inner, ret);
            }
        }

        (inner, Ok(()))
    }

    fn statement(&self, inner: &mut StoreInner, reader: Reader) -> (TxId, bool) {
        match reader {
            Reader::Tx(id) => (id, false),
            Reader::Auto => (inner.next_tx(), true),
        }
    }

    fn end_statement(&self, inner: &mut StoreInner, tx: TxId, commit: bool) {
        inner.finish(tx, commit);

        self.cond.notify_all();
    }

    fn find(&self, reader: Reader, product_code: &str) -> Result<Vec<StockRecord>, StoreError> {
        let inner = self.lock()?;

        if inner.isolation(reader) == Some(Isolation::Serializable) {
            drop(inner);

            return self.find_locked(reader, product_code);
        }

        Ok(inner
            .rows
            .iter()
            .filter(|(_, row)| row.head.record.product_code == product_code)
            .filter_map(|(_, row)| inner.visible(reader, row))
            .collect())
    }

    fn get(&self, reader: Reader, id: u64) -> Result<Option<StockRecord>, StoreError> {
        let mut inner = self.lock()?;

        let key = match id.checked_sub(1) {
            Some(k) if inner.rows.contains(k as usize) => k as usize,
            _ => return Ok(None),
        };

        if inner.isolation(reader) != Some(Isolation::Serializable) {
            return Ok(inner.visible(reader, &inner.rows[key]));
        }

        let (tx, _) = self.statement(&mut inner, reader);

        let (inner, ret) = self.lock_rows(inner, tx, &[key]);
        ret?;

        Ok(Some(inner.rows[key].current(tx).clone()))
    }

    fn find_locked(
        &self,
        reader: Reader,
        product_code: &str,
    ) -> Result<Vec<StockRecord>, StoreError> {
        let mut inner = self.lock()?;

        let (tx, auto) = self.statement(&mut inner, reader);
        let keys = inner.keys_where(|r| r.product_code == product_code);

        let (mut inner, ret) = self.lock_rows(inner, tx, &keys);

        let out = ret.map(|()| {
            keys.iter()
                .map(|&key| inner.rows[key].current(tx).clone())
                .collect()
        });

        if auto {
            self.end_statement(&mut inner, tx, false);
        }

        out
    }

    fn update(
        &self,
        reader: Reader,
        filter: &Filter,
        assignment: Assignment,
    ) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;

        let (tx, auto) = self.statement(&mut inner, reader);
        let keys = inner.keys_where(|r| filter.selects(r));

        let start = Instant::now();
        let mut affected = 0;
        let mut ret = Ok(());

        for key in keys {
            if let Some(limit) = filter.limit {
                if affected >= limit {
                    break;
                }
            }

            let (guard, r) = self.acquire_row(inner, tx, key, start);
            inner = guard;

            if let Err(e) = r {
                ret = Err(e);
                break;
            }

            match inner.write(key, tx, filter, assignment) {
                Ok(true) => affected += 1,
                Ok(false) => {}
                Err(e) => {
                    ret = Err(e);
                    break;
                }
            }
        }

        if auto {
            self.end_statement(&mut inner, tx, ret.is_ok());
        }

        trace!("update {:?} {:?} affected={}", filter, assignment, affected);

        ret.map(|()| affected)
    }

    fn commit(&self, tx: TxId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if !inner.available {
            self.end_statement(&mut inner, tx, false);

            return Err(StoreError::Unavailable);
        }

        self.end_statement(&mut inner, tx, true);

        trace!("tx {} commit", tx);

        Ok(())
    }

    fn rollback(&self, tx: TxId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        self.end_statement(&mut inner, tx, false);

        trace!("tx {} rollback", tx);
    }
}

/// Each operation runs as its own statement and commits immediately.
pub struct AutoCommit<'a> {
    store: &'a MemoryStore,
}

impl Session for AutoCommit<'_> {
    fn find_by_product(&mut self, product_code: &str) -> Result<Vec<StockRecord>, StoreError> {
        self.store.find(Reader::Auto, product_code)
    }

    fn get(&mut self, id: u64) -> Result<Option<StockRecord>, StoreError> {
        self.store.get(Reader::Auto, id)
    }

    fn find_for_update(&mut self, product_code: &str) -> Result<Vec<StockRecord>, StoreError> {
        self.store.find_locked(Reader::Auto, product_code)
    }

    fn update(&mut self, filter: &Filter, assignment: Assignment) -> Result<usize, StoreError> {
        self.store.update(Reader::Auto, filter, assignment)
    }
}

/// An open transaction. Dropping it without committing rolls it back and
/// releases its row locks.
pub struct Transaction<'a> {
    store: &'a MemoryStore,
    id: TxId,
    isolation: Isolation,
    open: bool,
}

impl Transaction<'_> {
    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// If the store is unavailable the transaction is rolled back instead.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.open = false;

        self.store.commit(self.id)
    }

    pub fn rollback(mut self) {
        self.open = false;

        self.store.rollback(self.id);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            self.store.rollback(self.id);
        }
    }
}

impl Session for Transaction<'_> {
    fn find_by_product(&mut self, product_code: &str) -> Result<Vec<StockRecord>, StoreError> {
        self.store.find(Reader::Tx(self.id), product_code)
    }

    fn get(&mut self, id: u64) -> Result<Option<StockRecord>, StoreError> {
        self.store.get(Reader::Tx(self.id), id)
    }

    fn find_for_update(&mut self, product_code: &str) -> Result<Vec<StockRecord>, StoreError> {
        self.store.find_locked(Reader::Tx(self.id), product_code)
    }

    fn update(&mut self, filter: &Filter, assignment: Assignment) -> Result<usize, StoreError> {
        self.store.update(Reader::Tx(self.id), filter, assignment)
    }
}
