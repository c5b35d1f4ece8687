// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Models built into the host binary.

use labwired_core::signals::DigitalLevel;
use labwired_core::{
    ConfigNode, CtrlItf, ModelCore, ModelHandle, ModelRegistry, PeripheralModel, SimContext,
    UartItf,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub fn builtin_registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry.register("heartbeat", Heartbeat::create);
    registry
}

/// Pulses reset, then paces UART stimulus on a periodic tick.
///
/// Config: `period_ns` (tick period, default 1000), `reset_ns` (reset pulse
/// width, default 100), `pulses` (UART edges to drive, default 4).
pub struct Heartbeat {
    core: ModelCore,
    rst: Arc<CtrlItf>,
    uart: Arc<UartItf>,
    ticks: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn create(config: ConfigNode, ctx: Option<SimContext>) -> ModelHandle {
        let mut core = ModelCore::new(config, ctx);
        let rst = Arc::new(CtrlItf::new());
        let uart = Arc::new(UartItf::new().with_tx_edge(|timestamp, level| {
            debug!("heartbeat uart0 tx {:?} @{}ps", level, timestamp);
        }));
        core.create_itf("rst", rst.clone());
        core.create_itf("uart0", uart.clone());

        Box::new(Self {
            core,
            rst,
            uart,
            ticks: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl PeripheralModel for Heartbeat {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn start(&mut self) {
        let config = self.core.config();
        let period_ns = config.u64_or("period_ns", 1_000);
        let reset_ns = config.u64_or("reset_ns", 100);
        let pulses = config.u64_or("pulses", 4);

        let (sim, rst, uart) = (self.core.sim(), self.rst.clone(), self.uart.clone());
        self.core.create_task(move || {
            if let Err(e) = rst.reset_edge(DigitalLevel::High) {
                warn!("heartbeat: {}", e);
            }
            sim.wait(reset_ns);
            if let Err(e) = rst.reset_edge(DigitalLevel::Low) {
                warn!("heartbeat: {}", e);
            }

            for pulse in 0..pulses {
                sim.wait_event();
                if let Err(e) = uart.rx_edge(DigitalLevel::from(pulse % 2 == 0)) {
                    warn!("heartbeat: {}", e);
                }
            }
            sim.print(&format!("heartbeat sent {} pulses", pulses));
        });

        let (sim, ticks) = (self.core.sim(), self.ticks.clone());
        self.core.create_periodic_handler(period_ns, move || {
            ticks.fetch_add(1, Ordering::Relaxed);
            sim.raise_event();
        });
    }
}
