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

use std::fmt;
use time::OffsetDateTime;

/// Which conflict token an optimistic writer compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Version,
    Timestamp,
}

/// Witness of a record's state at read time. A conditional write carrying a
/// stale token affects zero rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConcurrencyToken {
    Version(u64),
    Timestamp(OffsetDateTime),
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version(v) => write!(f, "v{}", v),
            Self::Timestamp(t) => write!(f, "t{}", t.unix_timestamp_nanos()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRecord {
    pub id: u64,
    pub product_code: String,
    pub warehouse: String,
    pub count: u64,
    pub version: u64,
    pub modified_at: OffsetDateTime,
}

impl StockRecord {
    pub fn token(&self, kind: TokenKind) -> ConcurrencyToken {
        match kind {
            TokenKind::Version => ConcurrencyToken::Version(self.version),
            TokenKind::Timestamp => ConcurrencyToken::Timestamp(self.modified_at),
        }
    }

    pub fn matches(&self, token: &ConcurrencyToken) -> bool {
        self.token(token.kind()) == *token
    }
}

impl ConcurrencyToken {
    pub fn kind(&self) -> TokenKind {
        match self {
            Self::Version(_) => TokenKind::Version,
            Self::Timestamp(_) => TokenKind::Timestamp,
        }
    }
}
