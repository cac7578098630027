// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default schema version for YAML descriptors
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_width_bits() -> u32 {
    16
}

fn default_channels() -> u32 {
    2
}

/// Address window reserved for one timer block, including the three
/// Set/Clear/Toggle alias windows above the base register page.
pub const TIMER_WINDOW_SIZE: u64 = 0x4000;

/// One memory-mapped timer block instance on the platform.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerInstanceDescriptor {
    pub id: String,
    pub base_address: u64,
    #[serde(default = "default_width_bits")]
    pub width_bits: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
}

/// Top-level platform descriptor: clock rates plus the timer instance table.
///
/// Vendor-specific layouts are expressed as plain data here rather than as
/// per-chip code; the engine itself carries no chip branching.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlatformDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    /// Primary counting clock rate (virtual ticks per second), selector 0.
    pub sysclk_hz: u64,
    /// Auxiliary low-speed clock rate, selector 1.
    #[serde(default)]
    pub auxclk_hz: Option<u64>,
    pub timers: Vec<TimerInstanceDescriptor>,
}

impl PlatformDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read platform descriptor {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let desc: Self = serde_yaml::from_str(yaml).context("Failed to parse platform descriptor")?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sysclk_hz == 0 {
            bail!("Platform '{}': sysclk_hz must be non-zero", self.name);
        }
        if self.timers.is_empty() {
            bail!("Platform '{}' declares no timer instances", self.name);
        }
        for (i, timer) in self.timers.iter().enumerate() {
            if timer.width_bits == 0 || timer.width_bits > 32 {
                bail!(
                    "Timer '{}': width_bits {} outside supported range 1..=32",
                    timer.id,
                    timer.width_bits
                );
            }
            if timer.channels > 8 {
                bail!(
                    "Timer '{}': {} compare channels requested, at most 8 supported",
                    timer.id,
                    timer.channels
                );
            }
            for other in &self.timers[..i] {
                if other.id == timer.id {
                    bail!("Duplicate timer id '{}'", timer.id);
                }
                let a = timer.base_address;
                let b = other.base_address;
                if a < b + TIMER_WINDOW_SIZE && b < a + TIMER_WINDOW_SIZE {
                    bail!(
                        "Timer '{}' at {:#x} overlaps window of '{}' at {:#x}",
                        timer.id,
                        a,
                        other.id,
                        b
                    );
                }
            }
        }
        Ok(())
    }
}

/// A single scripted bus access executed at a given virtual tick.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScenarioStep {
    pub at_tick: u64,
    pub address: u64,
    pub value: u32,
}

/// Expected register value checked after the scenario has run to completion.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScenarioExpectation {
    pub address: u64,
    pub value: u32,
}

/// Deterministic, CI-friendly stimulus script for a platform.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScenarioDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    /// Total virtual ticks to advance; steps beyond this horizon are an error.
    pub run_ticks: u64,
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
    #[serde(default)]
    pub expect: Vec<ScenarioExpectation>,
}

impl ScenarioDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let desc: Self = serde_yaml::from_str(yaml).context("Failed to parse scenario")?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn validate(&self) -> Result<()> {
        let mut last = 0u64;
        for step in &self.steps {
            if step.at_tick < last {
                bail!(
                    "Scenario '{}': steps must be ordered by at_tick ({} after {})",
                    self.name,
                    step.at_tick,
                    last
                );
            }
            if step.at_tick > self.run_ticks {
                bail!(
                    "Scenario '{}': step at tick {} is beyond run_ticks {}",
                    self.name,
                    step.at_tick,
                    self.run_ticks
                );
            }
            last = step.at_tick;
        }
        Ok(())
    }
}
