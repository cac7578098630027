// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::clock::{EventToken, EventSlot, TimerHandle, VirtualClock};
use crate::counter::VirtualCounter;
use crate::signals::OutputPin;

/// What a compare match does to the channel's output pin.
///
/// The PWM variants also react to the owning counter's wrap: the wrap edge
/// drives the active level, the match edge drives the inactive level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum OutputAction {
    /// Flag-only match, the pin is left alone.
    #[default]
    None,
    Set,
    Clear,
    Toggle,
    /// Drive high then immediately low: two edges at the match instant.
    PulseHigh,
    PulseLow,
    PwmActiveHigh,
    PwmActiveLow,
}

/// One compare channel attached to a [`VirtualCounter`].
///
/// The channel never polls: it asks the owner how many ticks remain until the
/// counter passes its target and arms exactly one schedule. A target that is
/// unreachable on the current lap (already passed, above the limit, or on the
/// wrong side after a direction change) leaves the channel inert until the
/// owner's next wrap re-aims it.
#[derive(Debug, serde::Serialize)]
pub struct CompareChannel {
    #[serde(skip)]
    slot: EventSlot,
    target: u64,
    enabled: bool,
    action: OutputAction,
    pin: OutputPin,
    epoch: u64,
    #[serde(skip)]
    pending: Option<TimerHandle>,
}

impl CompareChannel {
    pub fn new(slot: EventSlot) -> Self {
        Self {
            slot,
            target: 0,
            enabled: false,
            action: OutputAction::None,
            pin: OutputPin::new(),
            epoch: 0,
            pending: None,
        }
    }

    /// Recompute the match schedule against the owner's current trajectory.
    /// Call after any mutation of the channel or the owning counter.
    pub fn rearm(&mut self, owner: &VirtualCounter, clock: &mut VirtualClock) {
        if let Some(handle) = self.pending.take() {
            clock.cancel(handle);
        }
        self.epoch += 1;
        if !self.enabled || !owner.is_enabled() {
            return;
        }
        // A target at the reload point matches at the wrap instant itself,
        // which the owner's wrap notification delivers.
        if let Some(ticks) = owner.ticks_until_value(self.target, clock.now()) {
            let token = EventToken {
                slot: self.slot,
                epoch: self.epoch,
            };
            self.pending = Some(clock.schedule_after(ticks, token));
        }
    }

    pub fn set_target(&mut self, target: u64, owner: &VirtualCounter, clock: &mut VirtualClock) {
        self.target = target;
        self.rearm(owner, clock);
    }

    pub fn set_enabled(&mut self, enabled: bool, owner: &VirtualCounter, clock: &mut VirtualClock) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        self.rearm(owner, clock);
    }

    pub fn set_action(&mut self, action: OutputAction, owner: &VirtualCounter, clock: &mut VirtualClock) {
        self.action = action;
        self.rearm(owner, clock);
    }

    /// Scheduler callback for the match deadline. Returns true when a match
    /// actually fired; stale epochs are discarded.
    pub fn handle_event(&mut self, token: EventToken, clock: &mut VirtualClock) -> bool {
        if token.epoch != self.epoch || !self.enabled {
            clock.note_stale_event();
            return false;
        }
        self.pending = None;
        self.apply_match_action();
        // The next match is on the next lap; the owner's wrap re-aims us.
        true
    }

    /// Owner wrapped and reloaded. Re-aims the match schedule for the new lap,
    /// applies the PWM wrap edge, and fires a match if the target coincides
    /// with the reload point. Returns true when a match fired.
    pub fn on_owner_wrap(&mut self, owner: &VirtualCounter, clock: &mut VirtualClock) -> bool {
        if !self.enabled {
            return false;
        }
        match self.action {
            OutputAction::PwmActiveHigh => {
                self.pin.drive(true);
            }
            OutputAction::PwmActiveLow => {
                self.pin.drive(false);
            }
            _ => {}
        }
        let fired = if owner.target_is_reload(self.target) {
            self.apply_match_action();
            true
        } else {
            false
        };
        self.rearm(owner, clock);
        fired
    }

    fn apply_match_action(&mut self) {
        match self.action {
            OutputAction::None => {}
            OutputAction::Set => {
                self.pin.drive(true);
            }
            OutputAction::Clear => {
                self.pin.drive(false);
            }
            OutputAction::Toggle => {
                let next = !self.pin.is_high();
                self.pin.drive(next);
            }
            OutputAction::PulseHigh => {
                self.pin.drive(true);
                self.pin.drive(false);
            }
            OutputAction::PulseLow => {
                self.pin.drive(false);
                self.pin.drive(true);
            }
            OutputAction::PwmActiveHigh => {
                self.pin.drive(false);
            }
            OutputAction::PwmActiveLow => {
                self.pin.drive(true);
            }
        }
    }

    pub fn reset(&mut self, clock: &mut VirtualClock) {
        if let Some(handle) = self.pending.take() {
            clock.cancel(handle);
        }
        self.target = 0;
        self.enabled = false;
        self.action = OutputAction::None;
        self.pin.reset();
        self.epoch += 1;
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn action(&self) -> OutputAction {
        self.action
    }

    pub fn output(&self) -> &OutputPin {
        &self.pin
    }
}
