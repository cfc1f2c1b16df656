use std::{path::Path, str::FromStr, time::Duration};

use color_eyre::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub drill: DrillConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DrillConfig {
    pub concurrency: usize,
    pub initially_open: bool,

    /// Cancel every n-th task, starting with task 0. Zero cancels nothing.
    pub cancel_every: usize,

    pub settle_ms: u64,
    pub deadline_ms: u64,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            concurrency: 100,
            initially_open: false,
            cancel_every: 2,
            settle_ms: 200,
            deadline_ms: 1000,
        }
    }
}

impl DrillConfig {
    pub fn should_cancel(&self, index: usize) -> bool {
        self.cancel_every != 0 && index % self.cancel_every == 0
    }

    pub fn cancel_targets(&self) -> usize {
        (0..self.concurrency).filter(|&i| self.should_cancel(i)).count()
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(raw.parse()?)
    }
}

impl FromStr for Config {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}
