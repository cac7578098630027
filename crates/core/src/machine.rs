// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::SystemBus;
use crate::clock::VirtualClock;
use crate::interrupts::{InterruptSink, LineId};
use crate::peripherals::timer_block::TimerBlock;
use crate::{Peripheral, SimResult, SimulationError};
use tickloom_config::{PlatformDescriptor, TIMER_WINDOW_SIZE};

/// One observed edge on a peripheral's outgoing interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IrqTransition {
    pub at: u64,
    pub device: u32,
    pub line: usize,
    pub level: bool,
}

/// Sink that timestamps line changes into the machine's transition log.
struct LogSink<'a> {
    device: u32,
    at: u64,
    log: &'a mut Vec<IrqTransition>,
}

impl InterruptSink for LogSink<'_> {
    fn on_line_change(&mut self, line: LineId, level: bool) {
        self.log.push(IrqTransition {
            at: self.at,
            device: self.device,
            line: line.0,
            level,
        });
    }
}

/// A bus full of timer peripherals sharing one virtual clock.
///
/// `advance` is the machine's only notion of running: it drains due schedules
/// in deadline order, routing each to the owning device, then commits the end
/// of the window. Handlers re-arm mid-drain, so a wrap early in a long window
/// produces its successors inside the same call.
#[derive(Debug, Default)]
pub struct Machine {
    clock: VirtualClock,
    bus: SystemBus,
    irq_log: Vec<IrqTransition>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every timer described by the platform. Device indices are
    /// assigned in descriptor order.
    pub fn from_platform(platform: &PlatformDescriptor) -> SimResult<Self> {
        platform
            .validate()
            .map_err(|e| SimulationError::InvalidConfiguration(format!("{:#}", e)))?;

        let mut machine = Self::new();
        for timer in &platform.timers {
            let device = machine.bus.len() as u32;
            let block = TimerBlock::new(device, timer, platform.sysclk_hz, platform.auxclk_hz)?;
            let assigned = machine.bus.attach(
                timer.id.clone(),
                timer.base_address,
                TIMER_WINDOW_SIZE,
                Box::new(block),
            )?;
            debug_assert_eq!(assigned, device);
        }
        Ok(machine)
    }

    pub fn add_peripheral(
        &mut self,
        name: impl Into<String>,
        base: u64,
        size: u64,
        dev: Box<dyn Peripheral>,
    ) -> SimResult<u32> {
        self.bus.attach(name, base, size, dev)
    }

    /// Move virtual time forward by `ticks`, delivering every due schedule.
    pub fn advance(&mut self, ticks: u64) {
        let target = self.clock.now().saturating_add(ticks);
        while let Some(due) = self.clock.pop_due(target) {
            let device = due.token.slot.device();
            match self.bus.device_mut(device) {
                Some(entry) => {
                    let mut sink = LogSink {
                        device,
                        at: due.at,
                        log: &mut self.irq_log,
                    };
                    entry.dev.on_timer_event(due, &mut self.clock, &mut sink);
                }
                None => self.clock.note_stale_event(),
            }
        }
        self.clock.finish_advance(target);
    }

    pub fn read_u32(&self, addr: u64) -> SimResult<u32> {
        let (_, entry, offset) = self.bus.resolve(addr)?;
        entry.dev.read(offset, &self.clock)
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        let (device, entry, offset) = self.bus.resolve_mut(addr)?;
        let mut sink = LogSink {
            device,
            at: self.clock.now(),
            log: &mut self.irq_log,
        };
        entry.dev.write(offset, value, &mut self.clock, &mut sink)
    }

    /// Hardware reset of every peripheral. Virtual time itself is monotonic
    /// and does not rewind.
    pub fn reset(&mut self) {
        let mut index = 0u32;
        let now = self.clock.now();
        for entry in self.bus.iter_mut() {
            let mut sink = LogSink {
                device: index,
                at: now,
                log: &mut self.irq_log,
            };
            entry.dev.reset(&mut self.clock, &mut sink);
            index += 1;
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn bus(&self) -> &SystemBus {
        &self.bus
    }

    /// Take the accumulated interrupt transition log, oldest first.
    pub fn drain_irq_transitions(&mut self) -> Vec<IrqTransition> {
        std::mem::take(&mut self.irq_log)
    }

    pub fn irq_transitions(&self) -> &[IrqTransition] {
        &self.irq_log
    }

    /// Observable state of the whole machine as JSON.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "now": self.clock.now(),
            "metrics": self.clock.metrics(),
            "peripherals": self
                .bus
                .iter()
                .map(|p| (p.name.clone(), p.dev.snapshot(&self.clock)))
                .collect::<serde_json::Map<String, serde_json::Value>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickloom_config::TimerInstanceDescriptor;

    fn platform() -> PlatformDescriptor {
        PlatformDescriptor {
            schema_version: "1.0".to_string(),
            name: "test-rig".to_string(),
            sysclk_hz: 1_000_000,
            auxclk_hz: Some(32_768),
            timers: vec![
                TimerInstanceDescriptor {
                    id: "tim0".to_string(),
                    base_address: 0x4000_0000,
                    width_bits: 16,
                    channels: 2,
                },
                TimerInstanceDescriptor {
                    id: "tim1".to_string(),
                    base_address: 0x4001_0000,
                    width_bits: 32,
                    channels: 1,
                },
            ],
        }
    }

    #[test]
    fn test_from_platform_maps_all_timers() {
        let machine = Machine::from_platform(&platform()).unwrap();
        assert_eq!(machine.bus().len(), 2);
        assert_eq!(machine.bus().device(0).unwrap().name, "tim0");
        assert_eq!(machine.bus().device(1).unwrap().name, "tim1");
    }

    #[test]
    fn test_unmapped_access_faults() {
        let machine = Machine::from_platform(&platform()).unwrap();
        assert!(matches!(
            machine.read_u32(0x5000_0000),
            Err(SimulationError::MemoryViolation(_))
        ));
    }

    #[test]
    fn test_advance_without_schedules_moves_time() {
        let mut machine = Machine::from_platform(&platform()).unwrap();
        machine.advance(10_000);
        assert_eq!(machine.now(), 10_000);
        assert_eq!(machine.clock().metrics().events_fired, 0);
    }

    #[test]
    fn test_snapshot_names_every_peripheral() {
        let machine = Machine::from_platform(&platform()).unwrap();
        let snap = machine.snapshot();
        assert!(snap["peripherals"]["tim0"].is_object());
        assert!(snap["peripherals"]["tim1"].is_object());
        assert_eq!(snap["now"], 0);
    }
}
