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

use clap::Parser;
use log::info;
use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use stockguard::catalogue::Catalogue;
use stockguard::cliargs::{CliArgs, Format};
use stockguard::config::{find_config_file, Settings};
use stockguard::load::{self, Report};
use stockguard::log::{get_simple_logger, local_offset_check};

fn print_text(report: &Report) {
    println!("strategy:      {}", report.strategy);
    println!("calls:         {}", report.calls);
    println!("deducted:      {}", report.deducted);
    println!("exhausted:     {}", report.exhausted);
    println!("contention:    {}", report.contention);
    println!("lock timeouts: {}", report.lock_timeouts);
    println!("failures:      {}", report.failures);
    println!("initial:       {}", report.initial);
    println!("remaining:     {}", report.remaining);
    println!("lost updates:  {}", report.lost_updates());
    println!("oversold:      {}", report.oversold());
    println!("elapsed:       {:?}", report.elapsed());
    println!("throughput:    {:.0} calls/s", report.throughput());
}

fn process_args_and_run(args: CliArgs) -> Result<(), Box<dyn Error>> {
    log::set_logger(get_simple_logger()).map_err(|e| e.to_string())?;
    log::set_max_level(args.level_filter());

    local_offset_check();

    let config_file = find_config_file(
        &env::current_dir()?,
        args.config_file.as_ref().map(PathBuf::from),
    )?;

    match &config_file {
        Some(f) => info!("using config: {}", f.display()),
        None => info!("no config file, using defaults"),
    }

    let mut settings = Settings::new(config_file.as_deref())?;
    args.apply(&mut settings);

    let catalogue = Catalogue::new(&settings)?;

    let report = load::run(&catalogue, args.strategy, args.callers, args.iterations)?;

    match args.format {
        Format::Text => print_text(&report),
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    if let Err(e) = process_args_and_run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
