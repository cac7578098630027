// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::clock::{EventSlot, EventToken, TimerHandle, VirtualClock};
use crate::{SimResult, SimulationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum WorkMode {
    Periodic,
    OneShot,
}

/// Wrap event kind: overflow when counting up, underflow when counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapKind {
    Overflow,
    Underflow,
}

#[derive(Debug, Clone, Copy)]
pub struct CounterConfig {
    /// Virtual ticks per second feeding the counter. Rate metadata; the tick
    /// math below only depends on the divider.
    pub frequency: u64,
    pub divider: u32,
    /// Inclusive reload bound: the counter spans `0..=limit`, so one full lap
    /// is `limit + 1` increments.
    pub limit: u64,
    pub direction: Direction,
    pub mode: WorkMode,
}

/// A hardware counter modeled in virtual time.
///
/// The value is never stored except at an epoch `(value, tick)`; the current
/// value is a pure projection from that epoch, scaled by the divider. Every
/// mutation re-epochs at the projected value and re-arms a single wrap
/// schedule, so the cost per observable event is O(1) regardless of how much
/// virtual time passes.
#[derive(Debug, serde::Serialize)]
pub struct VirtualCounter {
    #[serde(skip)]
    slot: EventSlot,
    width_bits: u32,
    frequency: u64,
    divider: u32,
    limit: u64,
    direction: Direction,
    mode: WorkMode,
    enabled: bool,
    value_at_epoch: u64,
    epoch_tick: u64,
    /// Configuration version; a scheduled callback carrying an older epoch is
    /// stale and must be ignored.
    epoch: u64,
    #[serde(skip)]
    pending: Option<TimerHandle>,
}

fn max_for_width(width_bits: u32) -> u64 {
    if width_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << width_bits) - 1
    }
}

/// Increments-to-ticks scaling, saturating at the horizon instead of
/// overflowing for degenerate limit/divider combinations.
fn scale_ticks(increments: u128, divider: u32) -> u64 {
    let ticks = increments * divider as u128;
    if ticks > u64::MAX as u128 {
        u64::MAX
    } else {
        ticks as u64
    }
}

impl VirtualCounter {
    pub fn new(slot: EventSlot, width_bits: u32, config: CounterConfig) -> SimResult<Self> {
        if width_bits == 0 || width_bits > 64 {
            return Err(SimulationError::InvalidConfiguration(format!(
                "counter width of {} bits is not supported",
                width_bits
            )));
        }
        Self::validate(&config, width_bits)?;

        let mut counter = Self {
            slot,
            width_bits,
            frequency: config.frequency,
            divider: config.divider,
            limit: config.limit,
            direction: config.direction,
            mode: config.mode,
            enabled: false,
            value_at_epoch: 0,
            epoch_tick: 0,
            epoch: 0,
            pending: None,
        };
        counter.value_at_epoch = counter.reload_value();
        Ok(counter)
    }

    fn validate(config: &CounterConfig, width_bits: u32) -> SimResult<()> {
        if config.divider == 0 {
            return Err(SimulationError::InvalidConfiguration(
                "divider must be at least 1".to_string(),
            ));
        }
        if config.frequency == 0 {
            return Err(SimulationError::InvalidConfiguration(
                "frequency must be non-zero".to_string(),
            ));
        }
        if config.limit == 0 {
            return Err(SimulationError::InvalidConfiguration(
                "limit must be non-zero for a wrapping counter".to_string(),
            ));
        }
        if config.limit > max_for_width(width_bits) {
            return Err(SimulationError::InvalidConfiguration(format!(
                "limit {:#x} does not fit in a {}-bit counter",
                config.limit, width_bits
            )));
        }
        Ok(())
    }

    fn reload_value(&self) -> u64 {
        match self.direction {
            Direction::Ascending => 0,
            Direction::Descending => self.limit,
        }
    }

    fn period(&self) -> u128 {
        self.limit as u128 + 1
    }

    /// Map a raw value onto the equivalent ascending problem. The mapping is
    /// its own inverse, which is why descending counters need no second
    /// implementation of any distance computation.
    fn translate(&self, raw: u64) -> u64 {
        match self.direction {
            Direction::Ascending => raw,
            Direction::Descending => self.limit - raw,
        }
    }

    /// Input ticks already consumed toward the next increment.
    fn phase(&self, now: u64) -> u64 {
        if !self.enabled {
            return 0;
        }
        now.saturating_sub(self.epoch_tick) % self.divider as u64
    }

    fn project(&self, now: u64) -> u64 {
        if !self.enabled {
            return self.value_at_epoch;
        }
        let elapsed = now.saturating_sub(self.epoch_tick);
        let increments = (elapsed / self.divider as u64) as u128;
        let position = self.translate(self.value_at_epoch) as u128 + increments;
        let translated = match self.mode {
            WorkMode::Periodic => (position % self.period()) as u64,
            // A one-shot past its wrap is pinned at the reload point; the
            // wrap callback disables it before this is observable.
            WorkMode::OneShot => {
                if position > self.limit as u128 {
                    0
                } else {
                    position as u64
                }
            }
        };
        self.translate(translated)
    }

    fn re_epoch(&mut self, value: u64, now: u64) {
        self.value_at_epoch = value;
        self.epoch_tick = now;
        self.epoch += 1;
    }

    /// Arm the wrap schedule from the current epoch. Callers must have just
    /// re-epoched, so no sub-increment phase needs to be carried.
    fn rearm(&mut self, clock: &mut VirtualClock) {
        if let Some(handle) = self.pending.take() {
            clock.cancel(handle);
        }
        if !self.enabled {
            return;
        }
        debug_assert_eq!(self.epoch_tick, clock.now());
        let remaining = self.period() - self.translate(self.value_at_epoch) as u128;
        let ticks = scale_ticks(remaining, self.divider);
        let token = EventToken {
            slot: self.slot,
            epoch: self.epoch,
        };
        self.pending = Some(clock.schedule_after(ticks, token));
    }

    /// Reconfigure a possibly running counter. The projected current value is
    /// preserved as the new epoch so that live frequency/divider/limit/
    /// direction changes do not jump the counter.
    pub fn configure(&mut self, config: CounterConfig, clock: &mut VirtualClock) -> SimResult<()> {
        Self::validate(&config, self.width_bits)?;

        let now = clock.now();
        let mut value = self.project(now);
        if value > config.limit {
            tracing::warn!(
                "counter value {:#x} above new limit {:#x}; clamping",
                value,
                config.limit
            );
            value = config.limit;
        }

        self.frequency = config.frequency;
        self.divider = config.divider;
        self.limit = config.limit;
        self.direction = config.direction;
        self.mode = config.mode;
        self.re_epoch(value, now);
        self.rearm(clock);
        Ok(())
    }

    /// Enabling arms the wrap schedule from the frozen value; disabling
    /// freezes the projection and cancels the schedule.
    pub fn set_enabled(&mut self, enabled: bool, clock: &mut VirtualClock) {
        if enabled == self.enabled {
            return;
        }
        let now = clock.now();
        if enabled {
            let value = self.value_at_epoch;
            self.enabled = true;
            self.re_epoch(value, now);
            self.rearm(clock);
        } else {
            let frozen = self.project(now);
            self.enabled = false;
            self.re_epoch(frozen, now);
            if let Some(handle) = self.pending.take() {
                clock.cancel(handle);
            }
        }
    }

    /// Current value as a pure projection; safe to call at any instant.
    pub fn value(&self, clock: &VirtualClock) -> u64 {
        self.project(clock.now())
    }

    pub fn set_value(&mut self, value: u64, clock: &mut VirtualClock) -> SimResult<()> {
        if value > self.limit {
            return Err(SimulationError::OutOfRange {
                value,
                limit: self.limit,
            });
        }
        self.re_epoch(value, clock.now());
        self.rearm(clock);
        Ok(())
    }

    /// Scheduler callback for the wrap deadline. Returns `None` for stale
    /// epochs; otherwise reloads, emits the wrap kind, and either re-arms
    /// (periodic) or disables itself (one-shot).
    pub fn handle_event(
        &mut self,
        token: EventToken,
        clock: &mut VirtualClock,
    ) -> Option<WrapKind> {
        if token.epoch != self.epoch || !self.enabled {
            clock.note_stale_event();
            return None;
        }
        self.pending = None;

        let kind = match self.direction {
            Direction::Ascending => WrapKind::Overflow,
            Direction::Descending => WrapKind::Underflow,
        };
        let reload = self.reload_value();
        self.re_epoch(reload, clock.now());
        if self.mode == WorkMode::OneShot {
            self.enabled = false;
        } else {
            self.rearm(clock);
        }
        Some(kind)
    }

    /// Ticks until the counter's value next equals `target`, honoring the
    /// current direction and sub-increment phase. `None` when the target is
    /// not reachable before the next wrap (or the counter is stopped).
    pub fn ticks_until_value(&self, target: u64, now: u64) -> Option<u64> {
        if !self.enabled || target > self.limit {
            return None;
        }
        let translated_current = self.translate(self.project(now));
        let translated_target = self.translate(target);
        if translated_target <= translated_current {
            return None;
        }
        let delta = (translated_target - translated_current) as u128;
        let ticks = delta * self.divider as u128 - self.phase(now) as u128;
        if ticks > u64::MAX as u128 {
            Some(u64::MAX)
        } else {
            Some(ticks as u64)
        }
    }

    /// True when `target` coincides with the reload point, i.e. a crossing
    /// that happens at the wrap instant itself.
    pub fn target_is_reload(&self, target: u64) -> bool {
        target <= self.limit && self.translate(target) == 0
    }

    /// Return to the reset state: reload value, disabled, schedule dropped.
    pub fn reset(&mut self, clock: &mut VirtualClock) {
        if let Some(handle) = self.pending.take() {
            clock.cancel(handle);
        }
        self.enabled = false;
        let reload = self.reload_value();
        self.re_epoch(reload, clock.now());
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn divider(&self) -> u32 {
        self.divider
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mode(&self) -> WorkMode {
        self.mode
    }

    pub fn width_bits(&self) -> u32 {
        self.width_bits
    }
}
