// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Peripheral, SimResult, SimulationError};

pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub dev: Box<dyn Peripheral>,
}

impl std::fmt::Debug for PeripheralEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralEntry")
            .field("name", &self.name)
            .field("base", &format_args!("{:#010x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

/// Address decoder for the machine's memory-mapped peripherals.
///
/// The device index assigned by [`attach`](SystemBus::attach) doubles as the
/// routing key in event slots, so timer callbacks find their way back to the
/// peripheral that armed them without any registry lookup.
#[derive(Debug, Default)]
pub struct SystemBus {
    peripherals: Vec<PeripheralEntry>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a device at `[base, base + size)`. Overlapping windows are a
    /// platform description error, not a runtime condition.
    pub fn attach(
        &mut self,
        name: impl Into<String>,
        base: u64,
        size: u64,
        dev: Box<dyn Peripheral>,
    ) -> SimResult<u32> {
        let name = name.into();
        if size == 0 {
            return Err(SimulationError::InvalidConfiguration(format!(
                "peripheral '{}' has an empty address window",
                name
            )));
        }
        let end = base.checked_add(size).ok_or_else(|| {
            SimulationError::InvalidConfiguration(format!(
                "peripheral '{}' window overflows the address space",
                name
            ))
        })?;
        for existing in &self.peripherals {
            if base < existing.base + existing.size && existing.base < end {
                return Err(SimulationError::InvalidConfiguration(format!(
                    "peripheral '{}' at {:#010x} overlaps '{}'",
                    name, base, existing.name
                )));
            }
        }
        self.peripherals.push(PeripheralEntry {
            name,
            base,
            size,
            dev,
        });
        Ok(self.peripherals.len() as u32 - 1)
    }

    fn lookup(&self, addr: u64) -> Option<usize> {
        self.peripherals
            .iter()
            .position(|p| addr >= p.base && addr < p.base + p.size)
    }

    /// Translate an absolute address into (device index, entry, offset).
    pub fn resolve(&self, addr: u64) -> SimResult<(u32, &PeripheralEntry, u32)> {
        let index = self
            .lookup(addr)
            .ok_or(SimulationError::MemoryViolation(addr))?;
        let entry = &self.peripherals[index];
        Ok((index as u32, entry, (addr - entry.base) as u32))
    }

    pub fn resolve_mut(&mut self, addr: u64) -> SimResult<(u32, &mut PeripheralEntry, u32)> {
        let index = self
            .lookup(addr)
            .ok_or(SimulationError::MemoryViolation(addr))?;
        let entry = &mut self.peripherals[index];
        let offset = (addr - entry.base) as u32;
        Ok((index as u32, entry, offset))
    }

    pub fn device(&self, id: u32) -> Option<&PeripheralEntry> {
        self.peripherals.get(id as usize)
    }

    pub fn device_mut(&mut self, id: u32) -> Option<&mut PeripheralEntry> {
        self.peripherals.get_mut(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeripheralEntry> {
        self.peripherals.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeripheralEntry> {
        self.peripherals.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }
}
