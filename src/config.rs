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

use crate::provider::InstancePolicy;
use crate::store::Isolation;
use crate::strategy::optimistic::RetryPolicy;
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct Stock {
    pub product_code: String,

    // comma separated
    pub warehouses: String,

    pub initial_count: u64,
}

impl Default for Stock {
    fn default() -> Self {
        Self {
            product_code: String::from("1001"),
            warehouses: String::from("default"),
            initial_count: 5000,
        }
    }
}

impl From<Stock> for config::ValueKind {
    fn from(stock: Stock) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "product_code".to_string(),
            config::Value::from(stock.product_code),
        );
        properties.insert(
            "warehouses".to_string(),
            config::Value::from(stock.warehouses),
        );
        properties.insert(
            "initial_count".to_string(),
            config::Value::from(stock.initial_count),
        );

        Self::Table(properties)
    }
}

#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct Service {
    pub instance_policy: InstancePolicy,
    pub think_time_us: u64,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            instance_policy: InstancePolicy::Singleton,
            think_time_us: 0,
        }
    }
}

impl From<Service> for config::ValueKind {
    fn from(service: Service) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "instance_policy".to_string(),
            config::Value::from(service.instance_policy.as_str()),
        );
        properties.insert(
            "think_time_us".to_string(),
            config::Value::from(service.think_time_us),
        );

        Self::Table(properties)
    }
}

#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct Optimistic {
    pub max_attempts: u32,
    pub backoff_base_us: u64,
    pub backoff_max_us: u64,
}

impl Default for Optimistic {
    fn default() -> Self {
        let retry = RetryPolicy::default();

        Self {
            max_attempts: retry.max_attempts,
            backoff_base_us: retry.backoff_base.as_micros() as u64,
            backoff_max_us: retry.backoff_max.as_micros() as u64,
        }
    }
}

impl From<Optimistic> for config::ValueKind {
    fn from(optimistic: Optimistic) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "max_attempts".to_string(),
            config::Value::from(optimistic.max_attempts),
        );
        properties.insert(
            "backoff_base_us".to_string(),
            config::Value::from(optimistic.backoff_base_us),
        );
        properties.insert(
            "backoff_max_us".to_string(),
            config::Value::from(optimistic.backoff_max_us),
        );

        Self::Table(properties)
    }
}

#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct Transaction {
    pub isolation: Isolation,
    pub lock_wait_timeout_ms: u64,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            isolation: Isolation::RepeatableRead,
            lock_wait_timeout_ms: 1000,
        }
    }
}

impl From<Transaction> for config::ValueKind {
    fn from(transaction: Transaction) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "isolation".to_string(),
            config::Value::from(transaction.isolation.as_str()),
        );
        properties.insert(
            "lock_wait_timeout_ms".to_string(),
            config::Value::from(transaction.lock_wait_timeout_ms),
        );

        Self::Table(properties)
    }
}

#[derive(Debug, Deserialize, Default, Eq, PartialEq, Clone)]
pub struct Settings {
    pub stock: Stock,
    pub service: Service,
    pub optimistic: Optimistic,
    pub transaction: Transaction,
}

impl Settings {
    /// Loads settings from an INI file. Missing sections and keys keep their
    /// defaults. Without a file, everything is defaulted.
    pub fn new(config_file: Option<&Path>) -> Result<Settings, ConfigError> {
        let mut builder = Config::builder()
            .set_default("stock", Stock::default())?
            .set_default("service", Service::default())?
            .set_default("optimistic", Optimistic::default())?
            .set_default("transaction", Transaction::default())?;

        if let Some(f) = config_file {
            builder = builder.add_source(File::from(f).format(FileFormat::Ini));
        }

        builder.build()?.try_deserialize()
    }

    pub fn warehouses(&self) -> Vec<&str> {
        self.stock
            .warehouses
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_micros(self.service.think_time_us)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction.lock_wait_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.optimistic.max_attempts,
            backoff_base: Duration::from_micros(self.optimistic.backoff_base_us),
            backoff_max: Duration::from_micros(self.optimistic.backoff_max_us),
        }
    }
}

/// Picks the settings file to load. An explicit path must exist. Otherwise
/// the usual locations are tried, and no file at all is fine.
pub fn find_config_file(
    work_dir: &Path,
    arg_config: Option<PathBuf>,
) -> Result<Option<PathBuf>, Box<dyn Error>> {
    if let Some(cf) = arg_config {
        return match cf.try_exists() {
            Ok(true) => Ok(Some(cf)),
            Ok(false) => Err(format!("failed to open {}", cf.display()).into()),
            Err(e) => Err(format!("failed to open {}, with error: {:?}", cf.display(), e).into()),
        };
    }

    let config_files = [
        // ./config
        work_dir.join("config").join("stockguard.conf"),
        work_dir.join("stockguard.conf"),
    ];

    Ok(config_files.into_iter().find(|cf| cf.is_file()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();

        file
    }

    #[test]
    fn defaults() {
        let settings = Settings::new(None).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.stock.product_code, "1001");
        assert_eq!(settings.stock.initial_count, 5000);
        assert_eq!(settings.warehouses(), vec!["default"]);
        assert_eq!(settings.service.instance_policy, InstancePolicy::Singleton);
        assert_eq!(settings.think_time(), Duration::ZERO);
        assert_eq!(settings.transaction.isolation, Isolation::RepeatableRead);
        assert_eq!(settings.lock_wait_timeout(), Duration::from_secs(1));
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn from_file() {
        let file = write_config(
            "[stock]\n\
             product_code=2002\n\
             warehouses=north, south\n\
             initial_count=10\n\
             \n\
             [service]\n\
             instance_policy=per-caller\n\
             think_time_us=250\n\
             \n\
             [optimistic]\n\
             max_attempts=4\n\
             \n\
             [transaction]\n\
             isolation=read-uncommitted\n\
             lock_wait_timeout_ms=20\n",
        );

        let settings = Settings::new(Some(file.path())).unwrap();

        assert_eq!(settings.stock.product_code, "2002");
        assert_eq!(settings.warehouses(), vec!["north", "south"]);
        assert_eq!(settings.stock.initial_count, 10);
        assert_eq!(settings.service.instance_policy, InstancePolicy::PerCaller);
        assert_eq!(settings.think_time(), Duration::from_micros(250));
        assert_eq!(settings.transaction.isolation, Isolation::ReadUncommitted);
        assert_eq!(settings.lock_wait_timeout(), Duration::from_millis(20));

        let retry = settings.retry_policy();
        assert_eq!(retry.max_attempts, 4);

        // untouched keys keep their defaults
        assert_eq!(retry.backoff_base, Duration::from_micros(50));
        assert_eq!(retry.backoff_max, Duration::from_millis(5));
    }

    #[test]
    fn bad_value() {
        let file = write_config("[transaction]\nisolation=snapshot\n");

        assert!(Settings::new(Some(file.path())).is_err());
    }

    #[test]
    fn find_file() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(find_config_file(dir.path(), None).unwrap(), None);

        let path = dir.path().join("stockguard.conf");
        fs::write(&path, "[stock]\n").unwrap();

        assert_eq!(find_config_file(dir.path(), None).unwrap(), Some(path));

        let nested = dir.path().join("config");
        fs::create_dir(&nested).unwrap();
        let nested = nested.join("stockguard.conf");
        fs::write(&nested, "[stock]\n").unwrap();

        // ./config wins
        assert_eq!(find_config_file(dir.path(), None).unwrap(), Some(nested));
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such.conf");

        let ret = find_config_file(dir.path(), Some(missing.clone()));

        let e = ret.unwrap_err();
        assert_eq!(e.to_string(), format!("failed to open {}", missing.display()));
    }
}
