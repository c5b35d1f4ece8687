// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

// Exercises the process-wide tables through the simulator entry points. Kept
// as a single test so nothing else in this binary registers into them.

use labwired_core::{
    dispatch_periodic, dispatch_task, BridgeError, ConfigNode, ContextHandle, Dispatcher,
    HandlerId, Kernel, ModelCore, SimContext, TaskId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct ScheduleLog {
    tasks: Mutex<Vec<TaskId>>,
    handlers: Mutex<Vec<(HandlerId, u64)>>,
}

impl Kernel for ScheduleLog {
    fn fatal(&self, _ctx: ContextHandle, _message: &str) {}
    fn print(&self, _ctx: ContextHandle, _message: &str) {}
    fn create_task(&self, _ctx: ContextHandle, task: TaskId) {
        self.tasks.lock().unwrap().push(task);
    }
    fn create_periodic_handler(&self, _ctx: ContextHandle, handler: HandlerId, period_ns: u64) {
        self.handlers.lock().unwrap().push((handler, period_ns));
    }
    fn wait(&self, _ctx: ContextHandle, _ns: u64) {}
    fn wait_ps(&self, _ctx: ContextHandle, _ps: u64) {}
    fn wait_event(&self, _ctx: ContextHandle) {}
    fn raise_event(&self, _ctx: ContextHandle) {}
    fn raise_event_from_ext(&self, _ctx: ContextHandle) {}
}

#[test]
fn test_global_entry_points() {
    let kernel = Arc::new(ScheduleLog::default());
    let first = ModelCore::new(
        ConfigNode::empty(),
        Some(SimContext::new(kernel.clone(), ContextHandle::from_raw(1))),
    );
    let second = ModelCore::new(
        ConfigNode::empty(),
        Some(SimContext::new(kernel.clone(), ContextHandle::from_raw(2))),
    );
    assert!(Arc::ptr_eq(first.dispatcher(), &Dispatcher::global()));

    // The k-th registration in the process gets id k-1, across models.
    let runs = Arc::new(Mutex::new(Vec::new()));
    let mut ids = Vec::new();
    for (k, model) in [&first, &second, &first].into_iter().enumerate() {
        let runs = runs.clone();
        ids.push(model.create_task(move || runs.lock().unwrap().push(k)));
    }
    assert_eq!(ids.iter().map(|id| id.raw()).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(*kernel.tasks.lock().unwrap(), ids);

    let ticks = Arc::new(AtomicUsize::new(0));
    let t = ticks.clone();
    let handler = second.create_periodic_handler(1_000, move || {
        t.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(handler.raw(), 0);
    assert_eq!(*kernel.handlers.lock().unwrap(), vec![(handler, 1_000)]);

    dispatch_task(1).unwrap();
    dispatch_task(2).unwrap();
    dispatch_task(0).unwrap();
    assert_eq!(*runs.lock().unwrap(), vec![1, 2, 0]);
    assert!(matches!(dispatch_task(1), Err(BridgeError::TaskAlreadyDispatched(1))));
    assert!(matches!(dispatch_task(3), Err(BridgeError::UnknownTask(3))));

    for _ in 0..3 {
        dispatch_periodic(0).unwrap();
    }
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert!(matches!(dispatch_periodic(1), Err(BridgeError::UnknownHandler(1))));

    // Tearing a model down retires its slots; the ids are not reused.
    let pending = second.create_task(|| {});
    drop(second);
    assert!(matches!(dispatch_task(pending.raw()), Err(BridgeError::TaskRetired(3))));
    assert!(matches!(dispatch_periodic(0), Err(BridgeError::HandlerRetired(0))));
    assert_eq!(first.create_task(|| {}).raw(), 4);
}
