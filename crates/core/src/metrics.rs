// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// Counters describing event-queue activity for a simulation run.
///
/// The engine is event-driven, so these numbers are the closest analogue to
/// an instruction-per-second figure: how many schedules were armed, how many
/// actually fired, and how many were superseded before firing.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct EngineMetrics {
    pub events_scheduled: u64,
    pub events_fired: u64,
    pub events_cancelled: u64,
    /// Callbacks that surfaced with an outdated configuration epoch and were
    /// ignored by their owner.
    pub events_stale: u64,
}

impl EngineMetrics {
    pub fn note_scheduled(&mut self) {
        self.events_scheduled += 1;
    }

    pub fn note_fired(&mut self) {
        self.events_fired += 1;
    }

    pub fn note_cancelled(&mut self) {
        self.events_cancelled += 1;
    }

    pub fn note_stale(&mut self) {
        self.events_stale += 1;
    }
}
