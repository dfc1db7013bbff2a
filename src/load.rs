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

//! Concurrent load driver.

use crate::catalogue::{Catalogue, StrategyKind};
use crate::store::StoreError;
use crate::strategy::{DeductError, Outcome};
use log::{debug, info};
use serde::Serialize;
use std::panic;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    calls: u64,
    deducted: u64,
    exhausted: u64,
    contention: u64,
    lock_timeouts: u64,
    failures: u64,
}

impl Tally {
    fn add(&mut self, other: &Tally) {
        self.calls += other.calls;
        self.deducted += other.deducted;
        self.exhausted += other.exhausted;
        self.contention += other.contention;
        self.lock_timeouts += other.lock_timeouts;
        self.failures += other.failures;
    }

    fn record(&mut self, ret: Result<Outcome, DeductError>) {
        self.calls += 1;

        match ret {
            Ok(Outcome::Deducted) => self.deducted += 1,
            Ok(Outcome::Exhausted) => self.exhausted += 1,
            Err(DeductError::Contention { .. }) => self.contention += 1,
            Err(DeductError::LockTimeout { .. }) => self.lock_timeouts += 1,
            Err(e) => {
                debug!("deduct failed: {}", e);

                self.failures += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub strategy: StrategyKind,
    pub calls: u64,
    pub deducted: u64,
    pub exhausted: u64,
    pub contention: u64,
    pub lock_timeouts: u64,
    pub failures: u64,
    pub initial: u64,
    pub remaining: u64,
    pub elapsed_us: u64,
}

impl Report {
    /// Successful deductions the count does not reflect.
    pub fn lost_updates(&self) -> u64 {
        let consumed = self.initial.saturating_sub(self.remaining);

        self.deducted.saturating_sub(consumed)
    }

    /// Units handed out beyond what was in stock.
    pub fn oversold(&self) -> u64 {
        self.deducted.saturating_sub(self.initial)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us)
    }

    /// Calls per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();

        if secs > 0.0 {
            self.calls as f64 / secs
        } else {
            0.0
        }
    }
}

/// Runs `callers` threads, released together, each taking its own service
/// instance and calling it `iterations` times.
pub fn run(
    catalogue: &Catalogue,
    kind: StrategyKind,
    callers: usize,
    iterations: usize,
) -> Result<Report, StoreError> {
    let initial = catalogue.remaining(kind)?;

    info!(
        "running {} with {} callers x {} iterations, initial count {}",
        kind, callers, iterations, initial
    );

    let barrier = Barrier::new(callers);

    let start = Instant::now();

    let tallies: Vec<Tally> = thread::scope(|s| {
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                s.spawn(|| {
                    let service = catalogue.service(kind);

                    barrier.wait();

                    let mut tally = Tally::default();

                    for _ in 0..iterations {
                        tally.record(service.deduct());
                    }

                    tally
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    });

    let elapsed = start.elapsed();

    let mut total = Tally::default();
    for t in &tallies {
        total.add(t);
    }

    let report = Report {
        strategy: kind,
        calls: total.calls,
        deducted: total.deducted,
        exhausted: total.exhausted,
        contention: total.contention,
        lock_timeouts: total.lock_timeouts,
        failures: total.failures,
        initial,
        remaining: catalogue.remaining(kind)?,
        elapsed_us: elapsed.as_micros() as u64,
    };

    info!(
        "{} done: deducted={} remaining={} lost={} oversold={}",
        kind,
        report.deducted,
        report.remaining,
        report.lost_updates(),
        report.oversold()
    );

    Ok(report)
}
