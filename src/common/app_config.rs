// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaRocksConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaRocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG.get().ok_or_else(|| anyhow!("config not initialized"))
}

pub fn init_from_env_or_default() -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = NovaRocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG.get().ok_or_else(|| anyhow!("config not initialized"))
}

pub fn config() -> Result<&'static NovaRocksConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("novarocks.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $NOVAROCKS_CONFIG or create ./novarocks.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaRocksConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_agg=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub aggregate: AggregateConfig,
}

impl NovaRocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: NovaRocksConfig = toml::from_str(s)?;
        cfg.aggregate.validate()?;
        Ok(cfg)
    }

    /// Effective tracing filter: `log_filter` when present, else `log_level`.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }
}

impl Default for NovaRocksConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
            aggregate: AggregateConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum rows per chunk pushed into or pulled from an operator.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    4096
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AggregateConfig {
    /// Distinct-key count at which a hash set is split into shards.
    #[serde(default = "default_two_level_threshold_rows")]
    pub two_level_threshold_rows: usize,
    /// Initial bucket capacity of a fresh hash set; rounded up to a power of two.
    #[serde(default = "default_hash_set_initial_capacity")]
    pub hash_set_initial_capacity: usize,
    /// Let parallel sinks of one fragment share a LIMIT countdown.
    #[serde(default = "default_enable_pipeline_share_limit")]
    pub enable_pipeline_share_limit: bool,
}

fn default_two_level_threshold_rows() -> usize {
    512 * 1024
}
fn default_hash_set_initial_capacity() -> usize {
    256
}
fn default_enable_pipeline_share_limit() -> bool {
    true
}

impl AggregateConfig {
    fn validate(&self) -> Result<()> {
        if self.two_level_threshold_rows == 0 {
            return Err(anyhow!("aggregate.two_level_threshold_rows must be positive"));
        }
        Ok(())
    }
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            two_level_threshold_rows: default_two_level_threshold_rows(),
            hash_set_initial_capacity: default_hash_set_initial_capacity(),
            enable_pipeline_share_limit: default_enable_pipeline_share_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = NovaRocksConfig::parse("").expect("parse");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.runtime.chunk_size, 4096);
        assert_eq!(cfg.aggregate.two_level_threshold_rows, 512 * 1024);
        assert!(cfg.aggregate.enable_pipeline_share_limit);
        assert_eq!(cfg.effective_log_filter(), "info");
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = NovaRocksConfig::parse(
            r#"
log_level = "debug"
log_filter = "novarocks_agg=trace"

[runtime]
chunk_size = 1024

[aggregate]
two_level_threshold_rows = 64
enable_pipeline_share_limit = false
"#,
        )
        .expect("parse");
        assert_eq!(cfg.runtime.chunk_size, 1024);
        assert_eq!(cfg.aggregate.two_level_threshold_rows, 64);
        assert_eq!(cfg.aggregate.hash_set_initial_capacity, 256);
        assert!(!cfg.aggregate.enable_pipeline_share_limit);
        assert_eq!(cfg.effective_log_filter(), "novarocks_agg=trace");
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = NovaRocksConfig::parse("[aggregate]\ntwo_level_threshold_rows = 0\n")
            .expect_err("zero threshold");
        assert!(err.to_string().contains("two_level_threshold_rows"), "{err}");
    }
}
