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

use criterion::{criterion_group, criterion_main, Criterion};
use stockguard::catalogue::{Catalogue, StrategyKind};
use stockguard::config::Settings;
use stockguard::load;

fn criterion_benchmark(c: &mut Criterion) {
    let mut settings = Settings::default();
    settings.stock.initial_count = u64::MAX / 2;

    for kind in StrategyKind::ALL {
        let catalogue = Catalogue::new(&settings).unwrap();

        c.bench_function(&format!("deduct {}", kind), |b| {
            b.iter(|| catalogue.deduct(kind).unwrap())
        });
    }

    const CALLERS: usize = 4;
    const ITERATIONS: usize = 100;

    for kind in StrategyKind::ALL {
        if !kind.is_safe(
            settings.service.instance_policy,
            settings.transaction.isolation,
        ) {
            continue;
        }

        let catalogue = Catalogue::new(&settings).unwrap();

        c.bench_function(
            &format!("contended {} {}x{}", kind, CALLERS, ITERATIONS),
            |b| b.iter(|| load::run(&catalogue, kind, CALLERS, ITERATIONS).unwrap()),
        );
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
