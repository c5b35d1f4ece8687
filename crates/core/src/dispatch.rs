// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Id-addressed task and periodic-handler tables.
//!
//! The simulator only ever sees integer ids. Each table hands them out densely
//! from 0 and never reuses a slot, so an id stays a valid name for its slot for
//! the lifetime of the [`Dispatcher`]. When the owning model is torn down its
//! slots are retired: the closures are dropped and dispatching those ids
//! reports an error instead of running freed state.

use crate::{BridgeError, BridgeResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u32);

impl HandlerId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Identifies the model instance that registered a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

/// One-shot unit of model code.
pub struct Task(Box<dyn FnOnce() + Send>);

impl Task {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task(..)")
    }
}

/// Recurring unit of model code.
pub struct Handler(Box<dyn FnMut() + Send>);

impl Handler {
    pub fn new(f: impl FnMut() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    fn run(&mut self) {
        (self.0)()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

#[derive(Debug)]
enum TaskSlot {
    Pending(Task),
    Consumed,
    Retired,
}

#[derive(Debug)]
struct TaskEntry {
    owner: OwnerId,
    slot: TaskSlot,
}

#[derive(Debug)]
struct HandlerEntry {
    owner: OwnerId,
    period_ns: u64,
    // None once retired
    handler: Option<Arc<Mutex<Handler>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Dispatcher {
    tasks: Mutex<Vec<TaskEntry>>,
    handlers: Mutex<Vec<HandlerEntry>>,
    next_owner: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            next_owner: AtomicU64::new(0),
        }
    }

    /// The process-wide tables shared by every model created without an
    /// explicit dispatcher.
    pub fn global() -> Arc<Dispatcher> {
        static GLOBAL: OnceLock<Arc<Dispatcher>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Dispatcher::new())))
    }

    pub fn new_owner(&self) -> OwnerId {
        OwnerId(self.next_owner.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends a task and returns its id, which is the table length before the
    /// append.
    pub fn push_task(&self, owner: OwnerId, task: Task) -> TaskId {
        let mut tasks = lock(&self.tasks);
        let id = TaskId(tasks.len() as u32);
        tasks.push(TaskEntry {
            owner,
            slot: TaskSlot::Pending(task),
        });
        debug!("Registered {}", id);
        id
    }

    pub fn push_handler(&self, owner: OwnerId, period_ns: u64, handler: Handler) -> HandlerId {
        let mut handlers = lock(&self.handlers);
        let id = HandlerId(handlers.len() as u32);
        handlers.push(HandlerEntry {
            owner,
            period_ns,
            handler: Some(Arc::new(Mutex::new(handler))),
        });
        debug!("Registered {} (period {}ns)", id, period_ns);
        id
    }

    /// Runs the task registered at `id`. A task runs at most once; the table
    /// lock is released before the closure is entered, so the task may
    /// register more work or suspend in the kernel.
    pub fn dispatch_task(&self, id: TaskId) -> BridgeResult<()> {
        let task = {
            let mut tasks = lock(&self.tasks);
            let entry = tasks
                .get_mut(id.0 as usize)
                .ok_or(BridgeError::UnknownTask(id.0))?;
            match std::mem::replace(&mut entry.slot, TaskSlot::Consumed) {
                TaskSlot::Pending(task) => task,
                TaskSlot::Consumed => return Err(BridgeError::TaskAlreadyDispatched(id.0)),
                TaskSlot::Retired => {
                    entry.slot = TaskSlot::Retired;
                    return Err(BridgeError::TaskRetired(id.0));
                }
            }
        };
        debug!("Dispatching {}", id);
        task.run();
        Ok(())
    }

    /// Runs the handler registered at `id`; may be called any number of times.
    pub fn dispatch_periodic(&self, id: HandlerId) -> BridgeResult<()> {
        let handler = {
            let handlers = lock(&self.handlers);
            let entry = handlers
                .get(id.0 as usize)
                .ok_or(BridgeError::UnknownHandler(id.0))?;
            entry
                .handler
                .clone()
                .ok_or(BridgeError::HandlerRetired(id.0))?
        };
        lock(&handler).run();
        Ok(())
    }

    /// Drops every closure registered by `owner`. Returns how many slots were
    /// retired.
    pub fn retire(&self, owner: OwnerId) -> usize {
        let mut dropped_tasks = Vec::new();
        let mut dropped_handlers = Vec::new();
        {
            let mut tasks = lock(&self.tasks);
            for entry in tasks.iter_mut().filter(|e| e.owner == owner) {
                if let TaskSlot::Pending(task) =
                    std::mem::replace(&mut entry.slot, TaskSlot::Retired)
                {
                    dropped_tasks.push(task);
                }
            }
        }
        {
            let mut handlers = lock(&self.handlers);
            for entry in handlers.iter_mut().filter(|e| e.owner == owner) {
                if let Some(handler) = entry.handler.take() {
                    dropped_handlers.push(handler);
                }
            }
        }
        let count = dropped_tasks.len() + dropped_handlers.len();
        if count > 0 {
            debug!("Retired {} dispatch slots of {:?}", count, owner);
        }
        // Closures are dropped here, outside the table locks.
        count
    }

    pub fn task_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    pub fn handler_period(&self, id: HandlerId) -> Option<u64> {
        lock(&self.handlers)
            .get(id.0 as usize)
            .map(|entry| entry.period_ns)
    }
}

/// Simulator entry point: run task `id` from the process-wide table.
pub fn dispatch_task(id: u32) -> BridgeResult<()> {
    Dispatcher::global().dispatch_task(TaskId::from_raw(id))
}

/// Simulator entry point: run periodic handler `id` from the process-wide table.
pub fn dispatch_periodic(id: u32) -> BridgeResult<()> {
    Dispatcher::global().dispatch_periodic(HandlerId::from_raw(id))
}
