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

//! Baseline with no coordination at all. Concurrent callers can read the same
//! count and both write `count - 1`, losing one of the decrements. This is
//! kept as the negative control for the other strategies.

use super::{DeductError, Outcome, SessionStrategy, Strategy, Target};
use crate::store::Session;
use std::time::Duration;

pub struct Unguarded {
    target: Target,
    think_time: Duration,
}

impl Unguarded {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            think_time: Duration::ZERO,
        }
    }

    /// Widens the gap between read and write.
    pub fn with_think_time(mut self, d: Duration) -> Self {
        self.think_time = d;

        self
    }
}

impl Strategy for Unguarded {
    fn deduct(&self) -> Result<Outcome, DeductError> {
        self.target.read_check_write(None, self.think_time)
    }
}

impl SessionStrategy for Unguarded {
    fn deduct_in(&self, session: &mut dyn Session) -> Result<Outcome, DeductError> {
        self.target.read_check_write(Some(session), self.think_time)
    }
}
