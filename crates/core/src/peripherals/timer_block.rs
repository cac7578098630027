// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The memory-mapped timer block: one counter, up to eight compare channels,
//! and a flag/enable interrupt block behind a generic register file.
//!
//! Register map (base window; the same layout repeats in the Set, Clear and
//! Toggle alias windows at +0x1000/+0x2000/+0x3000):
//!
//! | Offset     | Register  | Contents                                       |
//! |------------|-----------|------------------------------------------------|
//! | 0x00       | CTRL      | bit0 EN, bit1 ONESHOT, bit2 DOWN (lockable)    |
//! | 0x04       | CLKSEL    | bits 0..2 clock source selector                |
//! | 0x08       | PSC       | prescaler, divider = PSC + 1 (lockable)        |
//! | 0x0C       | TOP       | counting limit (lockable)                      |
//! | 0x10       | CNT       | live counter value                             |
//! | 0x14       | INTF      | interrupt flags, bit n = source n; direct W1C  |
//! | 0x18       | INTE      | interrupt enables, same layout                 |
//! | 0x1C       | LOCK      | key register; reads back the lock state        |
//! | 0x20 + 8n  | CCn_CTRL  | bit0 CCEN, bits 4..6 ACTION, bit16 OUT (ro)    |
//! | 0x24 + 8n  | CCn_TRGT  | compare target for channel n                   |
//!
//! Interrupt source n is the counter wrap for n = 0 and compare channel n-1
//! above that. Line 0 aggregates every source, line 1 only the channels.

use crate::clock::{DueEvent, EventSlot, VirtualClock};
use crate::compare::{CompareChannel, OutputAction};
use crate::counter::{CounterConfig, Direction, VirtualCounter, WorkMode};
use crate::interrupts::{InterruptAggregator, InterruptSink, LineId, SourceId};
use crate::registers::{field_get, truncate_to_width, AliasOp, WriteLock};
use crate::{Peripheral, SimResult, SimulationError};
use tickloom_config::TimerInstanceDescriptor;

pub const REG_CTRL: u32 = 0x00;
pub const REG_CLKSEL: u32 = 0x04;
pub const REG_PSC: u32 = 0x08;
pub const REG_TOP: u32 = 0x0C;
pub const REG_CNT: u32 = 0x10;
pub const REG_INTF: u32 = 0x14;
pub const REG_INTE: u32 = 0x18;
pub const REG_LOCK: u32 = 0x1C;
pub const REG_CC_BASE: u32 = 0x20;
pub const CC_STRIDE: u32 = 0x8;

/// Local event slot of the counter wrap inside a block's device routing.
const SLOT_COUNTER: u32 = 0;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CtrlFlags: u32 {
        const ENABLE = 1 << 0;
        const ONE_SHOT = 1 << 1;
        const COUNT_DOWN = 1 << 2;
    }
}

fn action_from_field(field: u32) -> OutputAction {
    match field & 0x7 {
        0 => OutputAction::None,
        1 => OutputAction::Set,
        2 => OutputAction::Clear,
        3 => OutputAction::Toggle,
        4 => OutputAction::PulseHigh,
        5 => OutputAction::PulseLow,
        6 => OutputAction::PwmActiveHigh,
        _ => OutputAction::PwmActiveLow,
    }
}

fn action_to_field(action: OutputAction) -> u32 {
    match action {
        OutputAction::None => 0,
        OutputAction::Set => 1,
        OutputAction::Clear => 2,
        OutputAction::Toggle => 3,
        OutputAction::PulseHigh => 4,
        OutputAction::PulseLow => 5,
        OutputAction::PwmActiveHigh => 6,
        OutputAction::PwmActiveLow => 7,
    }
}

/// Register names with their base offsets, for diagnostics and dump tooling.
pub fn register_map(channels: usize) -> Vec<(String, u32)> {
    let mut map = vec![
        ("CTRL".to_string(), REG_CTRL),
        ("CLKSEL".to_string(), REG_CLKSEL),
        ("PSC".to_string(), REG_PSC),
        ("TOP".to_string(), REG_TOP),
        ("CNT".to_string(), REG_CNT),
        ("INTF".to_string(), REG_INTF),
        ("INTE".to_string(), REG_INTE),
        ("LOCK".to_string(), REG_LOCK),
    ];
    for n in 0..channels {
        let base = REG_CC_BASE + CC_STRIDE * n as u32;
        map.push((format!("CC{}_CTRL", n), base));
        map.push((format!("CC{}_TRGT", n), base + 4));
    }
    map
}

#[derive(Debug)]
pub struct TimerBlock {
    id: String,
    counter: VirtualCounter,
    channels: Vec<CompareChannel>,
    irq: InterruptAggregator,
    wrap_source: SourceId,
    channel_sources: Vec<SourceId>,
    lock: WriteLock,
    ctrl: CtrlFlags,
    clksel: u32,
    psc: u32,
    sysclk_hz: u64,
    auxclk_hz: Option<u64>,
}

impl TimerBlock {
    pub fn new(
        device: u32,
        descriptor: &TimerInstanceDescriptor,
        sysclk_hz: u64,
        auxclk_hz: Option<u64>,
    ) -> SimResult<Self> {
        if sysclk_hz == 0 {
            return Err(SimulationError::InvalidConfiguration(
                "sysclk rate must be non-zero".to_string(),
            ));
        }
        let width = descriptor.width_bits;
        let counter = VirtualCounter::new(
            EventSlot::new(device, SLOT_COUNTER),
            width,
            Self::reset_counter_config(width, sysclk_hz),
        )?;

        let channels: Vec<CompareChannel> = (0..descriptor.channels)
            .map(|n| CompareChannel::new(EventSlot::new(device, 1 + n)))
            .collect();

        let mut irq = InterruptAggregator::new();
        let wrap_source = irq.add_source();
        let channel_sources: Vec<SourceId> =
            channels.iter().map(|_| irq.add_source()).collect();
        let mut all = vec![wrap_source];
        all.extend_from_slice(&channel_sources);
        irq.add_line(&all);
        irq.add_line(&channel_sources);

        Ok(Self {
            id: descriptor.id.clone(),
            counter,
            channels,
            irq,
            wrap_source,
            channel_sources,
            lock: WriteLock::new(),
            ctrl: CtrlFlags::empty(),
            clksel: 0,
            psc: 0,
            sysclk_hz,
            auxclk_hz,
        })
    }

    /// Counter state after hardware reset: full-width range, undivided,
    /// counting up, periodic, stopped.
    fn reset_counter_config(width_bits: u32, sysclk_hz: u64) -> CounterConfig {
        let limit = if width_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << width_bits) - 1
        };
        CounterConfig {
            frequency: sysclk_hz,
            divider: 1,
            limit,
            direction: Direction::Ascending,
            mode: WorkMode::Periodic,
        }
    }

    fn current_config(&self) -> CounterConfig {
        CounterConfig {
            frequency: self.counter.frequency(),
            divider: self.counter.divider(),
            limit: self.counter.limit(),
            direction: self.counter.direction(),
            mode: self.counter.mode(),
        }
    }

    /// Every counter reconfiguration invalidates the channels' match
    /// trajectories; re-aim them all.
    fn rearm_channels(&mut self, clock: &mut VirtualClock) {
        for channel in &mut self.channels {
            channel.rearm(&self.counter, clock);
        }
    }

    fn reconfigure(&mut self, config: CounterConfig, clock: &mut VirtualClock) -> SimResult<()> {
        self.counter.configure(config, clock)?;
        self.rearm_channels(clock);
        Ok(())
    }

    fn read_register(&self, offset: u32, clock: &VirtualClock) -> SimResult<u32> {
        match offset {
            REG_CTRL => Ok(self.ctrl.bits()),
            REG_CLKSEL => Ok(self.clksel),
            REG_PSC => Ok(self.psc),
            REG_TOP => Ok(self.counter.limit() as u32),
            REG_CNT => Ok(self.counter.value(clock) as u32),
            REG_INTF => Ok(self.irq.flag_bits() as u32),
            REG_INTE => Ok(self.irq.enable_bits() as u32),
            REG_LOCK => Ok(self.lock.is_locked() as u32),
            _ => {
                let (index, reg) = self.decode_channel(offset)?;
                let channel = &self.channels[index];
                match reg {
                    0 => Ok((channel.is_enabled() as u32)
                        | (action_to_field(channel.action()) << 4)
                        | ((channel.output().is_high() as u32) << 16)),
                    _ => Ok(channel.target() as u32),
                }
            }
        }
    }

    fn decode_channel(&self, offset: u32) -> SimResult<(usize, u32)> {
        if offset < REG_CC_BASE {
            return Err(SimulationError::UnknownRegister(offset));
        }
        let index = ((offset - REG_CC_BASE) / CC_STRIDE) as usize;
        let reg = (offset - REG_CC_BASE) % CC_STRIDE;
        if index >= self.channels.len() || reg % 4 != 0 {
            return Err(SimulationError::UnknownRegister(offset));
        }
        Ok((index, reg))
    }

    fn write_ctrl(
        &mut self,
        value: u32,
        clock: &mut VirtualClock,
        _sink: &mut dyn InterruptSink,
    ) -> SimResult<()> {
        let mut next = CtrlFlags::from_bits_truncate(value);

        // The counting direction is part of the locked configuration group.
        if next.contains(CtrlFlags::COUNT_DOWN) != self.ctrl.contains(CtrlFlags::COUNT_DOWN)
            && !self.lock.permit("CTRL.DOWN")
        {
            next.set(CtrlFlags::COUNT_DOWN, self.ctrl.contains(CtrlFlags::COUNT_DOWN));
        }

        let mut config = self.current_config();
        config.direction = if next.contains(CtrlFlags::COUNT_DOWN) {
            Direction::Descending
        } else {
            Direction::Ascending
        };
        config.mode = if next.contains(CtrlFlags::ONE_SHOT) {
            WorkMode::OneShot
        } else {
            WorkMode::Periodic
        };
        let direction_changed = config.direction != self.counter.direction();
        if direction_changed || config.mode != self.counter.mode() {
            let was_stopped = !self.counter.is_enabled();
            self.reconfigure(config, clock)?;
            // Only a live direction flip keeps the current value; a stopped
            // counter restarts from the new direction's reload point.
            if direction_changed && was_stopped {
                let reload = match config.direction {
                    Direction::Ascending => 0,
                    Direction::Descending => config.limit,
                };
                self.counter.set_value(reload, clock)?;
                self.rearm_channels(clock);
            }
        }

        let enable = next.contains(CtrlFlags::ENABLE);
        if enable != self.counter.is_enabled() {
            self.counter.set_enabled(enable, clock);
            self.rearm_channels(clock);
        }

        self.ctrl = next;
        Ok(())
    }

    fn write_clksel(&mut self, value: u32, clock: &mut VirtualClock) -> SimResult<()> {
        let selector = field_get(value, 0, 2);
        let rate = match selector {
            0 => Some(self.sysclk_hz),
            1 => self.auxclk_hz,
            _ => None,
        };
        match rate {
            Some(hz) => {
                self.clksel = selector;
                let mut config = self.current_config();
                config.frequency = hz;
                self.reconfigure(config, clock)
            }
            None => {
                tracing::warn!(
                    "{}: clock selector {} not available on this platform; keeping {}",
                    self.id,
                    selector,
                    self.clksel
                );
                Ok(())
            }
        }
    }

    fn write_top(&mut self, value: u32, clock: &mut VirtualClock) -> SimResult<()> {
        if !self.lock.permit("TOP") {
            return Ok(());
        }
        let limit = truncate_to_width("TOP", value as u64, self.counter.width_bits());
        if limit == 0 {
            tracing::warn!("{}: TOP of zero ignored, counter needs a non-empty range", self.id);
            return Ok(());
        }
        let mut config = self.current_config();
        config.limit = limit;
        self.reconfigure(config, clock)
    }

    fn write_cnt(&mut self, value: u32, clock: &mut VirtualClock) -> SimResult<()> {
        let cnt = truncate_to_width("CNT", value as u64, self.counter.width_bits());
        if cnt > self.counter.limit() {
            tracing::warn!(
                "{}: CNT write {:#x} above TOP {:#x}; ignored",
                self.id,
                cnt,
                self.counter.limit()
            );
            return Ok(());
        }
        self.counter.set_value(cnt, clock)?;
        self.rearm_channels(clock);
        Ok(())
    }

    /// INTF gets bitwise semantics per window: the direct window is
    /// write-1-to-clear, the Set alias raises flags in software, Clear mirrors
    /// W1C, Toggle flips. Enables never change here.
    fn write_intf(&mut self, op: AliasOp, value: u32, sink: &mut dyn InterruptSink) {
        for (i, source) in self.sources().into_iter().enumerate() {
            if value & (1 << i) == 0 {
                continue;
            }
            let flag = match op {
                AliasOp::Direct | AliasOp::Clear => false,
                AliasOp::Set => true,
                AliasOp::Toggle => !self.irq.flag(source),
            };
            self.irq.set_flag(source, flag, sink);
        }
    }

    fn write_inte(&mut self, value: u32, sink: &mut dyn InterruptSink) {
        for (i, source) in self.sources().into_iter().enumerate() {
            self.irq.set_enable(source, value & (1 << i) != 0, sink);
        }
    }

    fn sources(&self) -> Vec<SourceId> {
        let mut sources = vec![self.wrap_source];
        sources.extend_from_slice(&self.channel_sources);
        sources
    }

    fn write_channel(
        &mut self,
        offset: u32,
        value: u32,
        clock: &mut VirtualClock,
    ) -> SimResult<()> {
        let (index, reg) = self.decode_channel(offset)?;
        match reg {
            0 => {
                let channel = &mut self.channels[index];
                channel.set_action(action_from_field(field_get(value, 4, 3)), &self.counter, clock);
                channel.set_enabled(value & 1 != 0, &self.counter, clock);
            }
            _ => {
                let target =
                    truncate_to_width("CC_TRGT", value as u64, self.counter.width_bits());
                self.channels[index].set_target(target, &self.counter, clock);
            }
        }
        Ok(())
    }

    pub fn line_level(&self, line: usize) -> bool {
        self.irq.line_level(LineId(line))
    }
}

impl Peripheral for TimerBlock {
    fn name(&self) -> &str {
        &self.id
    }

    /// Reads through any alias window return the base register value; the
    /// aliases differ only on the write side.
    fn read(&self, offset: u32, clock: &VirtualClock) -> SimResult<u32> {
        let (_, base) = AliasOp::decode(offset).ok_or(SimulationError::UnknownRegister(offset))?;
        self.read_register(base, clock)
    }

    fn write(
        &mut self,
        offset: u32,
        value: u32,
        clock: &mut VirtualClock,
        sink: &mut dyn InterruptSink,
    ) -> SimResult<()> {
        let (op, base) =
            AliasOp::decode(offset).ok_or(SimulationError::UnknownRegister(offset))?;
        tracing::trace!("{}: write {:#x} <- {:#010x} ({:?})", self.id, base, value, op);

        // Registers with side effects on individual bits decode the window
        // themselves; everything else goes through generic read-modify-write.
        match base {
            REG_INTF => {
                self.write_intf(op, value, sink);
                return Ok(());
            }
            REG_LOCK => {
                // Key values must arrive verbatim; alias arithmetic on a key
                // would be meaningless.
                if op == AliasOp::Direct {
                    self.lock.write_key(value);
                } else {
                    tracing::debug!("{}: LOCK only accepts direct writes", self.id);
                }
                return Ok(());
            }
            _ => {}
        }

        let effective = op.apply(self.read_register(base, clock)?, value);
        match base {
            REG_CTRL => self.write_ctrl(effective, clock, sink),
            REG_CLKSEL => self.write_clksel(effective, clock),
            REG_PSC => {
                if self.lock.permit("PSC") {
                    self.psc = effective & 0xFFFF;
                    let mut config = self.current_config();
                    config.divider = self.psc + 1;
                    self.reconfigure(config, clock)?;
                }
                Ok(())
            }
            REG_TOP => self.write_top(effective, clock),
            REG_CNT => self.write_cnt(effective, clock),
            REG_INTE => {
                self.write_inte(effective, sink);
                Ok(())
            }
            _ => self.write_channel(base, effective, clock),
        }
    }

    fn on_timer_event(
        &mut self,
        event: DueEvent,
        clock: &mut VirtualClock,
        sink: &mut dyn InterruptSink,
    ) {
        let local = event.token.slot.local();
        if local == SLOT_COUNTER {
            if self.counter.handle_event(event.token, clock).is_none() {
                return;
            }
            // One-shot counters stop at the wrap; mirror that in CTRL.EN.
            if !self.counter.is_enabled() {
                self.ctrl.remove(CtrlFlags::ENABLE);
            }
            self.irq.set_flag(self.wrap_source, true, sink);
            for index in 0..self.channels.len() {
                if self.channels[index].on_owner_wrap(&self.counter, clock) {
                    self.irq.set_flag(self.channel_sources[index], true, sink);
                }
            }
            return;
        }

        let index = (local - 1) as usize;
        match self.channels.get_mut(index) {
            Some(channel) => {
                if channel.handle_event(event.token, clock) {
                    self.irq.set_flag(self.channel_sources[index], true, sink);
                }
            }
            None => clock.note_stale_event(),
        }
    }

    fn reset(&mut self, clock: &mut VirtualClock, sink: &mut dyn InterruptSink) {
        self.counter.reset(clock);
        let reset_config = Self::reset_counter_config(self.counter.width_bits(), self.sysclk_hz);
        if let Err(e) = self.counter.configure(reset_config, clock) {
            tracing::error!("{}: reset reconfiguration failed: {}", self.id, e);
        }
        for channel in &mut self.channels {
            channel.reset(clock);
        }
        self.irq.reset(sink);
        self.lock = WriteLock::new();
        self.ctrl = CtrlFlags::empty();
        self.clksel = 0;
        self.psc = 0;
    }

    fn irq_line_count(&self) -> usize {
        2
    }

    fn snapshot(&self, clock: &VirtualClock) -> serde_json::Value {
        serde_json::json!({
            "ctrl": self.ctrl.bits(),
            "clksel": self.clksel,
            "psc": self.psc,
            "top": self.counter.limit(),
            "cnt": self.counter.value(clock),
            "intf": self.irq.flag_bits(),
            "inte": self.irq.enable_bits(),
            "locked": self.lock.is_locked(),
            "counter": &self.counter,
            "channels": &self.channels,
        })
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::NullSink;

    fn descriptor(width_bits: u32, channels: u32) -> TimerInstanceDescriptor {
        TimerInstanceDescriptor {
            id: "gpt0".to_string(),
            base_address: 0x4000_0000,
            width_bits,
            channels,
        }
    }

    fn block() -> (VirtualClock, TimerBlock) {
        let clock = VirtualClock::new();
        let block = TimerBlock::new(0, &descriptor(16, 2), 1_000_000, Some(32_768)).unwrap();
        (clock, block)
    }

    fn advance(clock: &mut VirtualClock, block: &mut TimerBlock, ticks: u64) {
        let target = clock.now() + ticks;
        let mut sink = NullSink;
        while let Some(due) = clock.pop_due(target) {
            block.on_timer_event(due, clock, &mut sink);
        }
        clock.finish_advance(target);
    }

    fn write(block: &mut TimerBlock, clock: &mut VirtualClock, offset: u32, value: u32) {
        let mut sink = NullSink;
        block.write(offset, value, clock, &mut sink).unwrap();
    }

    #[test]
    fn test_reset_values() {
        let (clock, block) = block();
        assert_eq!(block.read(REG_CTRL, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_TOP, &clock).unwrap(), 0xFFFF);
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_INTF, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_LOCK, &clock).unwrap(), 0);
    }

    #[test]
    fn test_basic_periodic_wrap_sets_flag() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 999);
        write(&mut block, &mut clock, REG_CTRL, CtrlFlags::ENABLE.bits());

        advance(&mut clock, &mut block, 1000);
        assert_eq!(block.read(REG_INTF, &clock).unwrap(), 1);
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 0);

        // W1C clears the flag.
        write(&mut block, &mut clock, REG_INTF, 1);
        assert_eq!(block.read(REG_INTF, &clock).unwrap(), 0);
    }

    #[test]
    fn test_cnt_reads_track_projection() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 999);
        write(&mut block, &mut clock, REG_PSC, 3); // divider 4
        write(&mut block, &mut clock, REG_CTRL, CtrlFlags::ENABLE.bits());

        advance(&mut clock, &mut block, 400);
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 100);
    }

    #[test]
    fn test_one_shot_clears_enable_bit() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 99);
        write(
            &mut block,
            &mut clock,
            REG_CTRL,
            (CtrlFlags::ENABLE | CtrlFlags::ONE_SHOT).bits(),
        );

        advance(&mut clock, &mut block, 100);
        let ctrl = block.read(REG_CTRL, &clock).unwrap();
        assert_eq!(ctrl & CtrlFlags::ENABLE.bits(), 0);
        assert_eq!(block.read(REG_INTF, &clock).unwrap(), 1);
    }

    #[test]
    fn test_compare_channel_fires_and_flags() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 999);
        // Channel 0: target 250, toggle output, enabled.
        write(&mut block, &mut clock, REG_CC_BASE + 4, 250);
        write(&mut block, &mut clock, REG_CC_BASE, 1 | (3 << 4));
        write(&mut block, &mut clock, REG_CTRL, CtrlFlags::ENABLE.bits());

        advance(&mut clock, &mut block, 250);
        assert_eq!(block.read(REG_INTF, &clock).unwrap() & 0b10, 0b10);
        let cc_ctrl = block.read(REG_CC_BASE, &clock).unwrap();
        assert_ne!(cc_ctrl & (1 << 16), 0); // OUT high after toggle
    }

    #[test]
    fn test_alias_windows_on_ctrl() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 999);

        // Set alias flips EN on without touching other bits.
        write(&mut block, &mut clock, 0x1000 + REG_CTRL, CtrlFlags::ENABLE.bits());
        assert_eq!(
            block.read(REG_CTRL, &clock).unwrap(),
            CtrlFlags::ENABLE.bits()
        );
        assert!(block.read(0x2000 + REG_CTRL, &clock).unwrap() == CtrlFlags::ENABLE.bits());

        // Clear alias stops it again.
        write(&mut block, &mut clock, 0x2000 + REG_CTRL, CtrlFlags::ENABLE.bits());
        assert_eq!(block.read(REG_CTRL, &clock).unwrap(), 0);

        // Toggle alias.
        write(&mut block, &mut clock, 0x3000 + REG_CTRL, CtrlFlags::ENABLE.bits());
        assert_eq!(
            block.read(REG_CTRL, &clock).unwrap(),
            CtrlFlags::ENABLE.bits()
        );
    }

    #[test]
    fn test_intf_set_alias_raises_flag_in_software() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, 0x1000 + REG_INTF, 0b10);
        assert_eq!(block.read(REG_INTF, &clock).unwrap(), 0b10);
        assert!(!block.line_level(0)); // not enabled yet

        write(&mut block, &mut clock, REG_INTE, 0b10);
        assert!(block.line_level(0));
        assert!(block.line_level(1)); // channel-only line
    }

    #[test]
    fn test_lock_blocks_config_writes() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 999);
        write(&mut block, &mut clock, REG_LOCK, WriteLock::LOCK_KEY);
        assert_eq!(block.read(REG_LOCK, &clock).unwrap(), 1);

        write(&mut block, &mut clock, REG_TOP, 5);
        write(&mut block, &mut clock, REG_PSC, 9);
        write(&mut block, &mut clock, REG_CTRL, CtrlFlags::COUNT_DOWN.bits());
        assert_eq!(block.read(REG_TOP, &clock).unwrap(), 999);
        assert_eq!(block.read(REG_PSC, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_CTRL, &clock).unwrap() & CtrlFlags::COUNT_DOWN.bits(), 0);

        // CNT and channel registers stay writable while locked.
        write(&mut block, &mut clock, REG_CNT, 42);
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 42);

        write(&mut block, &mut clock, REG_LOCK, WriteLock::UNLOCK_KEY);
        write(&mut block, &mut clock, REG_TOP, 5);
        assert_eq!(block.read(REG_TOP, &clock).unwrap(), 5);
    }

    #[test]
    fn test_unsupported_clock_selector_retained() {
        let mut clock = VirtualClock::new();
        let mut block = TimerBlock::new(0, &descriptor(16, 2), 1_000_000, None).unwrap();

        write(&mut block, &mut clock, REG_CLKSEL, 1); // no auxclk on this rig
        assert_eq!(block.read(REG_CLKSEL, &clock).unwrap(), 0);

        write(&mut block, &mut clock, REG_CLKSEL, 3);
        assert_eq!(block.read(REG_CLKSEL, &clock).unwrap(), 0);
    }

    #[test]
    fn test_writes_truncate_to_width() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 0x12_FFFF);
        assert_eq!(block.read(REG_TOP, &clock).unwrap(), 0xFFFF);

        write(&mut block, &mut clock, REG_TOP, 100);
        write(&mut block, &mut clock, REG_CNT, 0x1_0050);
        // 0x10050 truncates to 0x50 = 80, under TOP.
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 80);
    }

    #[test]
    fn test_cnt_write_above_top_is_ignored() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 100);
        write(&mut block, &mut clock, REG_CNT, 40);
        // 5000 fits the counter width but violates TOP: warned, dropped.
        write(&mut block, &mut clock, REG_CNT, 5000);
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 40);
    }

    #[test]
    fn test_unknown_offsets_fault() {
        let (mut clock, mut block) = block();
        assert!(block.read(0x100, &clock).is_err());
        assert!(block.read(REG_CC_BASE + 2 * CC_STRIDE, &clock).is_err()); // only 2 channels
        let mut sink = NullSink;
        assert!(block.write(0x100, 0, &mut clock, &mut sink).is_err());
    }

    #[test]
    fn test_descending_mode_via_ctrl() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 999);
        write(
            &mut block,
            &mut clock,
            REG_CTRL,
            (CtrlFlags::ENABLE | CtrlFlags::COUNT_DOWN).bits(),
        );

        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 999);
        advance(&mut clock, &mut block, 700);
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 299);
    }

    #[test]
    fn test_direction_change_while_stopped_reloads_counter() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 999);

        // Down-count configured first, enabled later: counting starts at TOP
        // and the first tick is not an underflow.
        write(&mut block, &mut clock, REG_CTRL, CtrlFlags::COUNT_DOWN.bits());
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 999);

        write(&mut block, &mut clock, 0x1000 + REG_CTRL, CtrlFlags::ENABLE.bits());
        advance(&mut clock, &mut block, 1);
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 998);
        assert_eq!(block.read(REG_INTF, &clock).unwrap(), 0);

        // Stop, then flip back to ascending: reloads to zero.
        write(&mut block, &mut clock, 0x2000 + REG_CTRL, CtrlFlags::ENABLE.bits());
        write(&mut block, &mut clock, 0x2000 + REG_CTRL, CtrlFlags::COUNT_DOWN.bits());
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 0);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let (mut clock, mut block) = block();
        write(&mut block, &mut clock, REG_TOP, 999);
        write(&mut block, &mut clock, REG_PSC, 7);
        write(&mut block, &mut clock, REG_INTE, 0b11);
        write(&mut block, &mut clock, REG_LOCK, WriteLock::LOCK_KEY);
        write(&mut block, &mut clock, REG_CTRL, CtrlFlags::ENABLE.bits());
        advance(&mut clock, &mut block, 1500);

        let mut sink = NullSink;
        block.reset(&mut clock, &mut sink);
        assert_eq!(block.read(REG_CTRL, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_TOP, &clock).unwrap(), 0xFFFF);
        assert_eq!(block.read(REG_PSC, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_INTF, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_INTE, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_LOCK, &clock).unwrap(), 0);
        assert_eq!(block.read(REG_CNT, &clock).unwrap(), 0);
    }
}
