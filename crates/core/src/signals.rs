// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// Represents a digital signal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum DigitalLevel {
    #[default]
    Low,
    High,
}

impl From<bool> for DigitalLevel {
    fn from(b: bool) -> Self {
        if b {
            DigitalLevel::High
        } else {
            DigitalLevel::Low
        }
    }
}

impl From<DigitalLevel> for bool {
    fn from(level: DigitalLevel) -> Self {
        match level {
            DigitalLevel::High => true,
            DigitalLevel::Low => false,
        }
    }
}

/// A driven output with a transition counter.
///
/// Compare channels and interrupt lines use this so that "toggled exactly
/// once" and "no redundant edge" are directly observable in tests; driving
/// the pin to the level it already holds is a no-op.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OutputPin {
    level: DigitalLevel,
    transitions: u64,
}

impl OutputPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive the pin. Returns true if the level actually changed.
    pub fn drive(&mut self, level: bool) -> bool {
        let level = DigitalLevel::from(level);
        if level == self.level {
            return false;
        }
        self.level = level;
        self.transitions += 1;
        true
    }

    pub fn is_high(&self) -> bool {
        self.level.into()
    }

    pub fn level(&self) -> DigitalLevel {
        self.level
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Force the pin low without counting a transition (peripheral reset).
    pub fn reset(&mut self) {
        self.level = DigitalLevel::Low;
        self.transitions = 0;
    }
}
