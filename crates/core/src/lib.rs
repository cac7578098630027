// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Event-driven simulation core for virtual timer peripherals.
//!
//! The engine never ticks counters in a loop. Every counter and compare
//! channel computes the virtual instant of its next externally visible
//! transition and arms exactly one schedule on the machine's [`VirtualClock`];
//! reads project the current value from the last configuration epoch. Large
//! idle spans therefore cost nothing, and behavior under live reconfiguration
//! stays exact instead of drifting.

pub mod bus;
pub mod clock;
pub mod compare;
pub mod counter;
pub mod interrupts;
pub mod machine;
pub mod metrics;
pub mod peripherals;
pub mod registers;
pub mod signals;


use std::any::Any;

pub use bus::SystemBus;
pub use clock::{DueEvent, EventSlot, EventToken, TimerHandle, VirtualClock};
pub use compare::{CompareChannel, OutputAction};
pub use counter::{CounterConfig, Direction, VirtualCounter, WorkMode, WrapKind};
pub use interrupts::{InterruptAggregator, InterruptSink, LineId, NullSink, SourceId};
pub use machine::{IrqTransition, Machine};
pub use metrics::EngineMetrics;
pub use signals::{DigitalLevel, OutputPin};

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("value {value:#x} exceeds counter limit {limit:#x}")]
    OutOfRange { value: u64, limit: u64 },

    #[error("access to unmapped address {0:#010x}")]
    MemoryViolation(u64),

    #[error("unknown register offset {0:#x}")]
    UnknownRegister(u32),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait representing a memory-mapped peripheral.
///
/// Reads are pure projections and take the clock immutably; writes and timer
/// callbacks may re-arm schedules and raise interrupt lines, so they get the
/// clock mutably plus a sink for line transitions.
pub trait Peripheral: std::fmt::Debug + Send {
    fn name(&self) -> &str;

    fn read(&self, offset: u32, clock: &VirtualClock) -> SimResult<u32>;

    fn write(
        &mut self,
        offset: u32,
        value: u32,
        clock: &mut VirtualClock,
        sink: &mut dyn InterruptSink,
    ) -> SimResult<()>;

    /// Deliver a due schedule whose slot routes to this device.
    fn on_timer_event(
        &mut self,
        event: DueEvent,
        clock: &mut VirtualClock,
        sink: &mut dyn InterruptSink,
    );

    fn reset(&mut self, clock: &mut VirtualClock, sink: &mut dyn InterruptSink);

    /// Number of outgoing interrupt lines this device drives.
    fn irq_line_count(&self) -> usize;

    /// Full observable state as JSON, for snapshots and the CLI dump.
    fn snapshot(&self, clock: &VirtualClock) -> serde_json::Value;

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}
