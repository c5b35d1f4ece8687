// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

/// Simulated timestamp in picoseconds.
pub type SimTime = u64;

pub const PS_PER_NS: u64 = 1_000;

/// Represents a digital signal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum DigitalLevel {
    #[default]
    Low,
    High,
}

impl DigitalLevel {
    pub fn is_high(self) -> bool {
        self == DigitalLevel::High
    }

    /// Level as the 0/1 integer simulators exchange on single-bit ports.
    pub fn bit(self) -> u8 {
        self.is_high() as u8
    }
}

impl From<bool> for DigitalLevel {
    fn from(b: bool) -> Self {
        if b {
            DigitalLevel::High
        } else {
            DigitalLevel::Low
        }
    }
}

impl From<DigitalLevel> for bool {
    fn from(level: DigitalLevel) -> Self {
        match level {
            DigitalLevel::High => true,
            DigitalLevel::Low => false,
        }
    }
}

/// Any non-zero port value reads as high.
impl From<u8> for DigitalLevel {
    fn from(v: u8) -> Self {
        DigitalLevel::from(v != 0)
    }
}

/// The four data lines of a quad-SPI bus, `[data_0, data_1, data_2, data_3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QspiLanes(pub [DigitalLevel; 4]);

impl QspiLanes {
    pub fn new(d0: DigitalLevel, d1: DigitalLevel, d2: DigitalLevel, d3: DigitalLevel) -> Self {
        Self([d0, d1, d2, d3])
    }

    /// Packs the lanes into a nibble, `data_0` in bit 0.
    pub fn nibble(&self) -> u8 {
        self.0
            .iter()
            .enumerate()
            .fold(0, |acc, (i, level)| acc | (level.bit() << i))
    }

    pub fn from_nibble(nibble: u8) -> Self {
        Self(std::array::from_fn(|i| DigitalLevel::from((nibble >> i) & 1)))
    }
}

/// One sample of a camera-style parallel video port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpiSample {
    pub pclk: DigitalLevel,
    pub hsync: DigitalLevel,
    pub vref: DigitalLevel,
    pub data: u32,
}

/// Sampled JTAG inputs on a TCK transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JtagPins {
    pub tck: DigitalLevel,
    pub tdi: DigitalLevel,
    pub tms: DigitalLevel,
    pub trst: DigitalLevel,
}
