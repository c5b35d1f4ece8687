// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The simulator side of the bridge.
//!
//! A [`Kernel`] owns simulated time and decides when model code runs. Models
//! never talk to it directly; they go through a [`SimLink`], which carries the
//! per-instance [`ContextHandle`] the simulator handed out at load time.

use crate::dispatch::{Dispatcher, HandlerId, TaskId};
use std::fmt;
use std::sync::Arc;

/// Opaque per-instance token issued by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextHandle(u64);

impl ContextHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Primitives a simulator kernel provides to loaded models.
///
/// Any of the cooperative calls (`wait`, `wait_ps`, `wait_event`) may suspend
/// the calling thread until the kernel schedules it again. Every method except
/// [`Kernel::raise_event_from_ext`] is only called from the simulator-driven
/// execution context.
pub trait Kernel: Send + Sync {
    /// Fatal diagnostic. The model that emitted it is considered unusable.
    fn fatal(&self, ctx: ContextHandle, message: &str);
    fn print(&self, ctx: ContextHandle, message: &str);

    /// Schedules one dispatch of `task` at a time of the kernel's choosing.
    fn create_task(&self, ctx: ContextHandle, task: TaskId);
    /// Schedules `handler` to be dispatched every `period_ns` for the rest of
    /// the simulation.
    fn create_periodic_handler(&self, ctx: ContextHandle, handler: HandlerId, period_ns: u64);

    fn wait(&self, ctx: ContextHandle, ns: u64);
    fn wait_ps(&self, ctx: ContextHandle, ps: u64);
    fn wait_event(&self, ctx: ContextHandle);
    fn raise_event(&self, ctx: ContextHandle);

    /// The one call that may arrive from a thread the kernel does not drive.
    /// Implementations must hand the event over to the simulator context
    /// instead of touching scheduler state from the caller's thread.
    fn raise_event_from_ext(&self, ctx: ContextHandle);
}

/// A non-null simulator context: the kernel, this instance's handle and the
/// dispatch tables the kernel resolves task and handler ids against.
///
/// A model library carries its own copy of every static in this crate, so the
/// tables travel with the context instead of being looked up on the model
/// side.
#[derive(Clone)]
pub struct SimContext {
    kernel: Arc<dyn Kernel>,
    handle: ContextHandle,
    dispatcher: Arc<Dispatcher>,
}

impl SimContext {
    /// Context whose ids resolve against the caller's process-wide tables.
    pub fn new(kernel: Arc<dyn Kernel>, handle: ContextHandle) -> Self {
        Self::with_dispatcher(kernel, handle, Dispatcher::global())
    }

    pub fn with_dispatcher(
        kernel: Arc<dyn Kernel>,
        handle: ContextHandle,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            kernel,
            handle,
            dispatcher,
        }
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn fatal(&self, message: &str) {
        self.kernel.fatal(self.handle, message);
    }

    pub fn print(&self, message: &str) {
        self.kernel.print(self.handle, message);
    }
}

impl fmt::Debug for SimContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimContext")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Forwarding handle for the cooperative primitives.
///
/// Cheap to clone so task and handler closures can capture it. A link without
/// context (the model was created with a null handle) turns every call into a
/// no-op; the cooperative ones log a warning since they cannot suspend.
#[derive(Clone, Debug, Default)]
pub struct SimLink {
    ctx: Option<SimContext>,
}

impl SimLink {
    pub fn new(ctx: Option<SimContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> Option<&SimContext> {
        self.ctx.as_ref()
    }

    fn cooperative(&self, op: &str) -> Option<&SimContext> {
        if self.ctx.is_none() {
            tracing::warn!("{} called on a model without simulator context", op);
        }
        self.ctx.as_ref()
    }

    /// Suspends the calling task for `ns` nanoseconds of simulated time.
    pub fn wait(&self, ns: u64) {
        if let Some(ctx) = self.cooperative("wait") {
            ctx.kernel.wait(ctx.handle, ns);
        }
    }

    pub fn wait_ps(&self, ps: u64) {
        if let Some(ctx) = self.cooperative("wait_ps") {
            ctx.kernel.wait_ps(ctx.handle, ps);
        }
    }

    /// Suspends the calling task until the kernel delivers a raised event.
    pub fn wait_event(&self) {
        if let Some(ctx) = self.cooperative("wait_event") {
            ctx.kernel.wait_event(ctx.handle);
        }
    }

    pub fn raise_event(&self) {
        if let Some(ctx) = &self.ctx {
            ctx.kernel.raise_event(ctx.handle);
        }
    }

    /// Cross-thread variant of [`SimLink::raise_event`]. Silent no-op without
    /// context.
    pub fn raise_event_from_ext(&self) {
        if let Some(ctx) = &self.ctx {
            ctx.kernel.raise_event_from_ext(ctx.handle);
        }
    }

    pub fn print(&self, message: &str) {
        match &self.ctx {
            Some(ctx) => ctx.print(message),
            None => tracing::info!("{}", message),
        }
    }

    pub fn fatal(&self, message: &str) {
        match &self.ctx {
            Some(ctx) => ctx.fatal(message),
            None => tracing::error!("{}", message),
        }
    }

    /// Handle for signaling this instance from a background thread.
    pub fn external_events(&self) -> ExternalEvents {
        ExternalEvents {
            ctx: self.ctx.clone(),
        }
    }

    pub(crate) fn create_task(&self, task: TaskId) {
        if let Some(ctx) = &self.ctx {
            ctx.kernel.create_task(ctx.handle, task);
        }
    }

    pub(crate) fn create_periodic_handler(&self, handler: HandlerId, period_ns: u64) {
        if let Some(ctx) = &self.ctx {
            ctx.kernel
                .create_periodic_handler(ctx.handle, handler, period_ns);
        }
    }
}

/// Event source usable from threads outside the simulator-driven context.
///
/// This is the only capability that crosses threads: it can do nothing but
/// hand an event to [`Kernel::raise_event_from_ext`], and it is a no-op when
/// the owning model has no simulator context.
#[derive(Clone, Debug)]
pub struct ExternalEvents {
    ctx: Option<SimContext>,
}

impl ExternalEvents {
    pub fn raise(&self) {
        if let Some(ctx) = &self.ctx {
            ctx.kernel.raise_event_from_ext(ctx.handle);
        }
    }
}
