//! Simulated devices and their local schedules.
//!
//! The registry owns every device the program creates: memories
//! (DRAM/SRAM banks with a single port) and DMA engines. Each device
//! keeps its own list of reserved busy intervals, so overlapping
//! requests serialize per device in arrival order. Devices are keyed by
//! the canonical identity of the value their create op produced.
//!
//! Timing comes from the opaque cost models in [`cost`]; the registry
//! only answers "when could an access of this many cycles finish if
//! requested at time T?".

pub mod cost;

use std::collections::HashMap;

use thiserror::Error;

use crate::ir::{DataType, ValueId};
use cost::{DmaCostModel, DmaCostParams, MemCostModel, MemCostParams};

/// Errors raised while creating or addressing devices.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// `create_mem` named a memory technology the registry doesn't know.
    #[error("unknown memory kind `{0}` (expected DRAM or SRAM)")]
    UnknownMemoryKind(String),

    /// An op addressed a value no memory device is bound to.
    #[error("no memory device bound to this value")]
    NoSuchMemory,

    /// An op addressed a value no DMA device is bound to.
    #[error("no DMA device bound to this value")]
    NoSuchDma,
}

/// Memory technology of a created memory device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    Dram,
    Sram,
}

impl MemKind {
    fn parse(s: &str) -> Result<Self, DeviceError> {
        match s {
            "DRAM" => Ok(MemKind::Dram),
            "SRAM" => Ok(MemKind::Sram),
            other => Err(DeviceError::UnknownMemoryKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for MemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemKind::Dram => write!(f, "DRAM"),
            MemKind::Sram => write!(f, "SRAM"),
        }
    }
}

/// Direction of a memory port access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One reserved busy window on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub start: u64,
    pub end: u64,
}

/// Busy intervals of a single device, in reservation order.
///
/// Reservations never overlap: each one starts no earlier than the end
/// of the previous, which is exactly the FIFO port serialization the
/// scheduler relies on.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    reservations: Vec<Reservation>,
}

impl Schedule {
    /// Earliest time a new reservation may start.
    pub fn available_from(&self) -> u64 {
        self.reservations.last().map(|r| r.end).unwrap_or(0)
    }

    fn reserve(&mut self, start: u64, cycles: u64) -> u64 {
        let start = start.max(self.available_from());
        let end = start + cycles;
        self.reservations.push(Reservation { start, end });
        end
    }

    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }
}

/// A memory bank with one serialized port.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    pub uid: u64,
    pub kind: MemKind,
    /// Total lines in the bank (product of the create shape).
    pub lines: u64,
    /// Bytes per line element.
    pub elem_bytes: u64,
    pub cost: MemCostModel,
    pub schedule: Schedule,
}

/// A DMA engine moving data between memories.
#[derive(Debug, Clone)]
pub struct DmaDevice {
    pub uid: u64,
    pub cost: DmaCostModel,
    pub schedule: Schedule,
}

/// A simulated device.
#[derive(Debug, Clone)]
pub enum Device {
    Memory(MemoryDevice),
    Dma(DmaDevice),
}

/// Owns all devices created during a run.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: HashMap<ValueId, Device>,
    next_uid: u64,
    dram: MemCostParams,
    sram: MemCostParams,
    dma: DmaCostParams,
}

impl DeviceRegistry {
    pub fn new(dram: MemCostParams, sram: MemCostParams, dma: DmaCostParams) -> Self {
        Self {
            devices: HashMap::new(),
            next_uid: 0,
            dram,
            sram,
            dma,
        }
    }

    /// Install a memory device for `key`. Returns its uid.
    pub fn create_memory(
        &mut self,
        key: ValueId,
        kind: &str,
        shape: &[i64],
        elem: DataType,
    ) -> Result<u64, DeviceError> {
        let kind = MemKind::parse(kind)?;
        let lines = shape.iter().product::<i64>().max(0) as u64;
        let params = match kind {
            MemKind::Dram => self.dram,
            MemKind::Sram => self.sram,
        };
        let uid = self.next_uid;
        self.next_uid += 1;
        log::debug!("created {} uid={} lines={} elem={}", kind, uid, lines, elem);
        self.devices.insert(
            key,
            Device::Memory(MemoryDevice {
                uid,
                kind,
                lines,
                elem_bytes: elem.bytes(),
                cost: MemCostModel::new(params),
                schedule: Schedule::default(),
            }),
        );
        Ok(uid)
    }

    /// Install a DMA device for `key`. Returns its uid.
    pub fn create_dma(&mut self, key: ValueId) -> u64 {
        let uid = self.next_uid;
        self.next_uid += 1;
        log::debug!("created DMA uid={}", uid);
        self.devices.insert(
            key,
            Device::Dma(DmaDevice {
                uid,
                cost: DmaCostModel::new(self.dma),
                schedule: Schedule::default(),
            }),
        );
        uid
    }

    pub fn memory(&self, key: ValueId) -> Result<&MemoryDevice, DeviceError> {
        match self.devices.get(&key) {
            Some(Device::Memory(m)) => Ok(m),
            _ => Err(DeviceError::NoSuchMemory),
        }
    }

    pub fn dma(&self, key: ValueId) -> Result<&DmaDevice, DeviceError> {
        match self.devices.get(&key) {
            Some(Device::Dma(d)) => Ok(d),
            _ => Err(DeviceError::NoSuchDma),
        }
    }

    fn memory_mut(&mut self, key: ValueId) -> Result<&mut MemoryDevice, DeviceError> {
        match self.devices.get_mut(&key) {
            Some(Device::Memory(m)) => Ok(m),
            _ => Err(DeviceError::NoSuchMemory),
        }
    }

    /// Reserve `cycles` of the memory port behind `key`, starting no
    /// earlier than `time`. Returns the completion time.
    pub fn schedule_memory_access(
        &mut self,
        key: ValueId,
        time: u64,
        cycles: u64,
        kind: AccessKind,
    ) -> Result<u64, DeviceError> {
        let mem = self.memory_mut(key)?;
        let end = mem.schedule.reserve(time, cycles);
        log::debug!(
            "memory uid={} {:?} {} cycles -> done @ {}",
            mem.uid,
            kind,
            cycles,
            end
        );
        Ok(end)
    }

    /// Reserve a copy window on the DMA behind `dma_key` and on both
    /// endpoint memories. The window starts no earlier than `time` and
    /// no earlier than any of the three devices frees up; `cycles` is
    /// the slowest leg's cost, already computed by the caller.
    pub fn schedule_dma(
        &mut self,
        dma_key: ValueId,
        src_key: ValueId,
        dst_key: ValueId,
        time: u64,
        cycles: u64,
    ) -> Result<u64, DeviceError> {
        let start = time
            .max(self.dma(dma_key)?.schedule.available_from())
            .max(self.memory(src_key)?.schedule.available_from())
            .max(self.memory(dst_key)?.schedule.available_from());

        self.memory_mut(src_key)?.schedule.reserve(start, cycles);
        self.memory_mut(dst_key)?.schedule.reserve(start, cycles);
        let dma = match self.devices.get_mut(&dma_key) {
            Some(Device::Dma(d)) => d,
            _ => return Err(DeviceError::NoSuchDma),
        };
        let end = dma.schedule.reserve(start, cycles);
        log::debug!("DMA uid={} copy {} cycles -> done @ {}", dma.uid, cycles, end);
        Ok(end)
    }

    /// Number of devices created so far.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// All memory devices, for post-run schedule inspection.
    pub fn memories(&self) -> impl Iterator<Item = &MemoryDevice> {
        self.devices.values().filter_map(|d| match d {
            Device::Memory(m) => Some(m),
            Device::Dma(_) => None,
        })
    }
}
