//! Device cost models.
//!
//! The engine treats these as opaque pure functions: given an access
//! volume they answer in cycles. The parameters come from the loaded
//! [`Config`](crate::config::Config) so different memory technologies
//! can be explored without touching the scheduler.

use serde::{Deserialize, Serialize};

/// Cycle parameters for one memory technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemCostParams {
    /// Fixed cycles before the first line moves.
    pub read_latency: u64,
    /// Cycles per line read.
    pub read_cycles_per_line: u64,
    /// Fixed cycles before the first line lands.
    pub write_latency: u64,
    /// Cycles per line written.
    pub write_cycles_per_line: u64,
}

impl Default for MemCostParams {
    fn default() -> Self {
        Self::sram()
    }
}

impl MemCostParams {
    /// Default DRAM timing: high latency, slow lines.
    pub fn dram() -> Self {
        Self {
            read_latency: 8,
            read_cycles_per_line: 4,
            write_latency: 8,
            write_cycles_per_line: 4,
        }
    }

    /// Default SRAM timing: single-cycle port.
    pub fn sram() -> Self {
        Self {
            read_latency: 1,
            read_cycles_per_line: 1,
            write_latency: 1,
            write_cycles_per_line: 1,
        }
    }
}

/// Cycle parameters for a DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmaCostParams {
    /// Fixed cycles to set up a transfer.
    pub startup_cycles: u64,
    /// Bytes moved per cycle once streaming.
    pub bytes_per_cycle: u64,
}

impl Default for DmaCostParams {
    fn default() -> Self {
        Self {
            startup_cycles: 2,
            bytes_per_cycle: 4,
        }
    }
}

/// Read/write cycle formulas for one memory device.
#[derive(Debug, Clone, Copy)]
pub struct MemCostModel {
    params: MemCostParams,
}

impl MemCostModel {
    pub fn new(params: MemCostParams) -> Self {
        Self { params }
    }

    /// Cycles to read `lines` lines.
    pub fn read_cycles(&self, lines: u64) -> u64 {
        self.params.read_latency + lines * self.params.read_cycles_per_line
    }

    /// Cycles to write `lines` lines.
    pub fn write_cycles(&self, lines: u64) -> u64 {
        self.params.write_latency + lines * self.params.write_cycles_per_line
    }
}

/// Transfer cycle formula for one DMA engine.
#[derive(Debug, Clone, Copy)]
pub struct DmaCostModel {
    params: DmaCostParams,
}

impl DmaCostModel {
    pub fn new(params: DmaCostParams) -> Self {
        Self { params }
    }

    /// Cycles to stream `bytes` bytes, rounding the tail cycle up.
    pub fn transfer_cycles(&self, bytes: u64) -> u64 {
        let per = self.params.bytes_per_cycle.max(1);
        self.params.startup_cycles + (bytes + per - 1) / per
    }
}
