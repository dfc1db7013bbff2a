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

use crate::catalogue::StrategyKind;
use crate::config::Settings;
use crate::provider::InstancePolicy;
use crate::store::Isolation;
use clap::{Parser, ValueEnum};
use log::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

// Struct to hold the command line arguments
#[derive(Parser, Debug)]
#[command(
    name = "stockguard",
    version,
    about = "Run a stock deduction strategy under concurrent load."
)]
pub struct CliArgs {
    /// Set path to the configuration file
    #[arg(short, long = "config", value_name = "file")]
    pub config_file: Option<String>,

    /// Set log level (0=error, 1=warn, 2=info, 3=debug, 4=trace)
    #[arg(short = 'L', long = "loglevel", value_name = "x", default_value_t = 2, value_parser = clap::value_parser!(u32).range(0..=4))]
    pub log_level: u32,

    /// Strategy to run
    #[arg(short, long, value_enum, value_name = "kind")]
    pub strategy: StrategyKind,

    /// Number of concurrent callers
    #[arg(long, value_name = "n", default_value_t = 100)]
    pub callers: usize,

    /// Calls made by each caller
    #[arg(long, value_name = "n", default_value_t = 50)]
    pub iterations: usize,

    /// Override service instance_policy config option
    #[arg(long, value_enum, value_name = "policy")]
    pub instance_policy: Option<InstancePolicy>,

    /// Override transaction isolation config option
    #[arg(long, value_enum, value_name = "level")]
    pub isolation: Option<Isolation>,

    /// Report format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
}

impl CliArgs {
    /// Applies command line overrides on top of loaded settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(policy) = self.instance_policy {
            settings.service.instance_policy = policy;
        }

        if let Some(isolation) = self.isolation {
            settings.transaction.isolation = isolation;
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
