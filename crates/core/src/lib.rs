// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Runtime bridge between a time-stepped simulator kernel and independently
//! built peripheral models.
//!
//! The simulator loads a model through the [`ModelRegistry`], binds the
//! model's named [`Interface`]s to its own signal ports, and afterwards only
//! talks to model code through integer ids handed to [`dispatch_task`] and
//! [`dispatch_periodic`]. Model code in turn suspends on simulated time or
//! events through the [`Kernel`] primitives.

pub mod dispatch;
pub mod interface;
pub mod kernel;
pub mod loader;
pub mod model;
pub mod signals;

pub use dispatch::{dispatch_periodic, dispatch_task, Dispatcher, HandlerId, TaskId};
pub use interface::{
    CpiItf, CtrlItf, Edge, Interface, InterfaceKind, JtagItf, QspiItf, SignalHandle, SignalPort,
    Stimulus, UartItf,
};
pub use kernel::{ContextHandle, ExternalEvents, Kernel, SimContext, SimLink};
pub use labwired_config::ConfigNode;
pub use loader::{ModelFactory, ModelRegistry, MODEL_FACTORY_SYMBOL};
pub use model::{ModelCore, ModelHandle, PeripheralModel};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to open periph model, didn't find configuration item 'module'")]
    MissingModule,
    #[error("Failed to open periph model, configuration item 'module' is not a string")]
    InvalidModule,
    #[error("Failed to open periph model ({path}) with error: {source}")]
    Open {
        path: String,
        #[source]
        source: libloading::Error,
    },
    #[error("invalid periph model being loaded ({path}), missing symbol '{symbol}'")]
    MissingFactory { path: String, symbol: &'static str },
    #[error("{kind} interface is not bound to a simulator signal")]
    Unbound { kind: InterfaceKind },
    #[error("no task registered with id {0}")]
    UnknownTask(u32),
    #[error("task {0} was already dispatched")]
    TaskAlreadyDispatched(u32),
    #[error("task {0} belongs to a model that was torn down")]
    TaskRetired(u32),
    #[error("no periodic handler registered with id {0}")]
    UnknownHandler(u32),
    #[error("periodic handler {0} belongs to a model that was torn down")]
    HandlerRetired(u32),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
