// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// How a write reaching an aliased register window combines with the current
/// register value. The base window at stride 0 writes directly; the three
/// alias windows above it perform read-modify-write in hardware, so guest
/// code can flip individual bits without a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOp {
    Direct,
    /// OR-mask window: set the bits that are 1 in the written value.
    Set,
    /// AND-NOT window: clear the bits that are 1 in the written value.
    Clear,
    /// XOR window: toggle the bits that are 1 in the written value.
    Toggle,
}

/// Distance between consecutive alias windows inside one peripheral's
/// address span.
pub const ALIAS_STRIDE: u32 = 0x1000;

impl AliasOp {
    /// Split an offset into the alias operation and the base register offset.
    /// Offsets past the last alias window fall through as `None`.
    pub fn decode(offset: u32) -> Option<(AliasOp, u32)> {
        let op = match offset / ALIAS_STRIDE {
            0 => AliasOp::Direct,
            1 => AliasOp::Set,
            2 => AliasOp::Clear,
            3 => AliasOp::Toggle,
            _ => return None,
        };
        Some((op, offset % ALIAS_STRIDE))
    }

    /// Combine a written value with the register's current contents.
    pub fn apply(&self, current: u32, written: u32) -> u32 {
        match self {
            AliasOp::Direct => written,
            AliasOp::Set => current | written,
            AliasOp::Clear => current & !written,
            AliasOp::Toggle => current ^ written,
        }
    }
}

/// Extract a bit field. `lsb` is the field's low bit, `width` its size.
pub fn field_get(value: u32, lsb: u32, width: u32) -> u32 {
    (value >> lsb) & field_mask(width)
}

/// Replace a bit field, leaving the rest of the register untouched.
pub fn field_set(value: u32, lsb: u32, width: u32, field: u32) -> u32 {
    let mask = field_mask(width) << lsb;
    (value & !mask) | ((field << lsb) & mask)
}

pub fn bit_get(value: u32, bit: u32) -> bool {
    (value >> bit) & 1 != 0
}

pub fn bit_set(value: u32, bit: u32, on: bool) -> u32 {
    if on {
        value | (1 << bit)
    } else {
        value & !(1 << bit)
    }
}

fn field_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Truncate a written value to the counter width, logging when bits are lost.
pub fn truncate_to_width(name: &str, value: u64, width_bits: u32) -> u64 {
    let max = if width_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << width_bits) - 1
    };
    if value > max {
        tracing::debug!(
            "{} write {:#x} truncated to {} bits ({:#x})",
            name,
            value,
            width_bits,
            value & max
        );
    }
    value & max
}

/// Key-operated guard over configuration registers.
///
/// While locked, writes to the guarded registers are dropped with a warning
/// instead of faulting, matching hardware that silently ignores protected
/// writes. The lock register itself always accepts the two key values.
#[derive(Debug, Default, serde::Serialize)]
pub struct WriteLock {
    locked: bool,
}

impl WriteLock {
    pub const LOCK_KEY: u32 = 0xA5C3;
    pub const UNLOCK_KEY: u32 = 0x5A3C;

    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a write to the lock register. Unknown values are ignored.
    pub fn write_key(&mut self, value: u32) {
        match value {
            Self::LOCK_KEY => self.locked = true,
            Self::UNLOCK_KEY => self.locked = false,
            other => {
                tracing::debug!("ignoring unrecognized lock key {:#x}", other);
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// True when the write may proceed. Logs the dropped write otherwise.
    pub fn permit(&self, register: &str) -> bool {
        if self.locked {
            tracing::warn!("write to {} blocked by configuration lock", register);
            return false;
        }
        true
    }
}
