// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! UART line model shipped as a model library.
//!
//! Build it as a cdylib and point a model's `module` entry at the resulting
//! shared object. On load it registers a start task that parks the receive
//! line at its idle level; every transmit edge from the simulator raises an
//! event for tasks waiting on this instance.

use labwired_core::signals::DigitalLevel;
use labwired_core::{ConfigNode, ModelCore, ModelHandle, PeripheralModel, SimContext, UartItf};
use std::sync::Arc;
use tracing::debug;

pub struct UartLine {
    core: ModelCore,
}

impl UartLine {
    pub fn create(config: ConfigNode, ctx: Option<SimContext>) -> ModelHandle {
        let mut core = ModelCore::new(config, ctx);
        let idle = match core.config().get("idle_high").and_then(|n| n.get_bool()) {
            Some(false) => DigitalLevel::Low,
            _ => DigitalLevel::High,
        };

        let sim = core.sim();
        let uart = Arc::new(UartItf::new().with_tx_edge(move |timestamp, level| {
            debug!("uart tx {:?} @{}ps", level, timestamp);
            sim.raise_event();
        }));
        core.create_itf("uart0", uart.clone());

        let sim = core.sim();
        core.create_task(move || {
            sim.print("uart model started");
            if let Err(e) = uart.rx_edge(idle) {
                sim.fatal(&format!("ERROR, {}", e));
            }
        });

        Box::new(Self { core })
    }
}

impl PeripheralModel for UartLine {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }
}

labwired_core::export_model!(UartLine::create);
