// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::scheduler::LocalKernel;
use labwired_core::signals::{DigitalLevel, SimTime};
use labwired_core::{SignalPort, Stimulus};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Host-side signal that records every stimulus a model drives into it.
pub struct TracePort {
    name: String,
    kernel: Arc<LocalKernel>,
    history: Mutex<Vec<(SimTime, Stimulus)>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortSummary {
    pub name: String,
    pub stimulus_count: usize,
    pub last_time_ps: Option<SimTime>,
}

impl TracePort {
    pub fn new(name: impl Into<String>, kernel: Arc<LocalKernel>) -> Self {
        Self {
            name: name.into(),
            kernel,
            history: Mutex::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub fn history(&self) -> Vec<(SimTime, Stimulus)> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn summary(&self) -> PortSummary {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        PortSummary {
            name: self.name.clone(),
            stimulus_count: history.len(),
            last_time_ps: history.last().map(|(t, _)| *t),
        }
    }
}

impl SignalPort for TracePort {
    fn drive(&self, stimulus: Stimulus) -> Option<DigitalLevel> {
        let now = self.kernel.now_ps();
        debug!("{} @{}ps: {:?}", self.name, now, stimulus);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((now, stimulus));

        // No device behind the port: JTAG shifts TDI straight back out.
        match stimulus {
            Stimulus::JtagTck(pins) => Some(pins.tdi),
            _ => None,
        }
    }
}
