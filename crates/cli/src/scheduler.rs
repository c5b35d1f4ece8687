// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Reference cooperative kernel for running models outside an HDL simulator.
//!
//! Every dispatched task gets its own thread, but a single baton decides which
//! thread runs: the scheduler hands it to a task and blocks until that task
//! suspends (`wait`, `wait_ps`, `wait_event`) or returns. Periodic handlers
//! run on the scheduler thread itself.

use labwired_core::signals::{SimTime, PS_PER_NS};
use labwired_core::{ContextHandle, Dispatcher, HandlerId, Kernel, TaskId};
use serde::Serialize;
use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Wall-clock time an idle run waits for an external event before giving up.
const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_millis(500);

type FiberId = usize;

thread_local! {
    static CURRENT_FIBER: Cell<Option<FiberId>> = const { Cell::new(None) };
}

fn current_fiber() -> Option<FiberId> {
    CURRENT_FIBER.with(Cell::get)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Action {
    Spawn(ContextHandle, TaskId),
    Resume(FiberId),
    Periodic {
        ctx: ContextHandle,
        handler: HandlerId,
        period_ps: SimTime,
    },
}

// Ordered by time, then by scheduling order.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    at: SimTime,
    seq: u64,
    action: Action,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub context: u64,
    pub time_ps: SimTime,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub end_time_ps: SimTime,
    pub tasks_started: u64,
    pub tasks_finished: u64,
    pub periodic_runs: u64,
    pub events_raised: u64,
    pub external_events: u64,
    pub fatals: Vec<Diagnostic>,
}

#[derive(Default)]
struct State {
    now: SimTime,
    seq: u64,
    queue: BinaryHeap<Reverse<Scheduled>>,
    // The fiber currently holding the baton.
    active: Option<FiberId>,
    next_fiber: FiberId,
    waiters: HashMap<ContextHandle, VecDeque<FiberId>>,
    pending_events: HashMap<ContextHandle, u64>,
    report: RunReport,
}

impl State {
    fn schedule(&mut self, at: SimTime, action: Action) {
        self.seq += 1;
        self.queue.push(Reverse(Scheduled {
            at,
            seq: self.seq,
            action,
        }));
    }
}

pub struct LocalKernel {
    dispatcher: Arc<Dispatcher>,
    state: Mutex<State>,
    baton: Condvar,
    ext_tx: mpsc::Sender<ContextHandle>,
    ext_rx: Mutex<mpsc::Receiver<ContextHandle>>,
    external_timeout: Duration,
}

impl LocalKernel {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let (ext_tx, ext_rx) = mpsc::channel();
        Self {
            dispatcher,
            state: Mutex::new(State::default()),
            baton: Condvar::new(),
            ext_tx,
            ext_rx: Mutex::new(ext_rx),
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
        }
    }

    /// How long a run with nothing scheduled but tasks blocked in
    /// `wait_event` waits for an external event before it ends.
    pub fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn park<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.baton
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now_ps(&self) -> SimTime {
        self.lock().now
    }

    /// Advances simulated time until the queue drains or `end_ns` is reached.
    /// A drained queue with tasks still in `wait_event` first waits for an
    /// external event.
    pub fn run_until(self: &Arc<Self>, end_ns: u64) -> RunReport {
        let end = end_ns.saturating_mul(PS_PER_NS);
        info!(
            "Running local kernel until {} ns ({} tasks, {} periodic handlers registered)",
            end_ns,
            self.dispatcher.task_count(),
            self.dispatcher.handler_count()
        );
        for raw in 0..self.dispatcher.handler_count() as u32 {
            let handler = HandlerId::from_raw(raw);
            if let Some(period_ns) = self.dispatcher.handler_period(handler) {
                debug!("{} runs every {} ns", handler, period_ns);
            }
        }

        loop {
            self.drain_external();

            let next = {
                let mut st = self.lock();
                let due = matches!(st.queue.peek(), Some(Reverse(next)) if next.at <= end);
                let next = if due { st.queue.pop() } else { None };
                if let Some(Reverse(next)) = &next {
                    st.now = next.at;
                }
                next
            };

            let Some(Reverse(next)) = next else {
                if self.await_external() {
                    continue;
                }
                break;
            };

            match next.action {
                Action::Spawn(ctx, task) => self.spawn_fiber(ctx, task),
                Action::Resume(fiber) => self.resume(fiber),
                Action::Periodic {
                    ctx,
                    handler,
                    period_ps,
                } => self.run_periodic(ctx, handler, period_ps),
            }
        }

        let mut st = self.lock();
        st.now = st.now.max(end);
        st.report.end_time_ps = st.now;
        st.report.clone()
    }

    fn drain_external(&self) {
        let pending: Vec<ContextHandle> = {
            let rx = self.ext_rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.try_iter().collect()
        };
        for ctx in pending {
            self.deliver_external(ctx);
        }
    }

    fn deliver_external(&self, ctx: ContextHandle) {
        self.lock().report.external_events += 1;
        self.raise_event(ctx);
    }

    /// Nothing is due before the end of the run. If some task still waits for
    /// an event, an external thread may yet raise it: block for one.
    fn await_external(&self) -> bool {
        let waiting = self.lock().waiters.values().any(|w| !w.is_empty());
        if !waiting {
            return false;
        }

        let received = {
            let rx = self.ext_rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv_timeout(self.external_timeout)
        };
        match received {
            Ok(ctx) => {
                self.deliver_external(ctx);
                true
            }
            Err(_) => {
                debug!(
                    "No external event within {:?}, ending run",
                    self.external_timeout
                );
                false
            }
        }
    }

    fn run_periodic(&self, ctx: ContextHandle, handler: HandlerId, period_ps: SimTime) {
        if let Err(e) = self.dispatcher.dispatch_periodic(handler) {
            warn!("{}: dropping {}: {}", ctx, handler, e);
            return;
        }
        let mut st = self.lock();
        st.report.periodic_runs += 1;
        let at = st.now.saturating_add(period_ps);
        st.schedule(
            at,
            Action::Periodic {
                ctx,
                handler,
                period_ps,
            },
        );
    }

    fn spawn_fiber(self: &Arc<Self>, ctx: ContextHandle, task: TaskId) {
        let fiber = {
            let mut st = self.lock();
            st.next_fiber += 1;
            st.report.tasks_started += 1;
            st.next_fiber
        };

        let kernel = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{}", ctx, task))
            .spawn(move || {
                CURRENT_FIBER.with(|c| c.set(Some(fiber)));
                let _exit = FiberExit {
                    kernel: Arc::clone(&kernel),
                };
                drop(kernel.wait_for_baton(kernel.lock(), fiber));
                debug!("{} starts {} on fiber {}", ctx, task, fiber);
                if let Err(e) = kernel.dispatcher.dispatch_task(task) {
                    warn!("{}: {}", ctx, e);
                }
            });

        match spawned {
            Ok(_) => self.resume(fiber),
            Err(e) => error!("Failed to spawn thread for {}: {}", task, e),
        }
    }

    /// Hands the baton to `fiber` and blocks until it comes back.
    fn resume(&self, fiber: FiberId) {
        let mut st = self.lock();
        st.active = Some(fiber);
        self.baton.notify_all();
        while st.active.is_some() {
            st = self.park(st);
        }
    }

    fn wait_for_baton<'a>(
        &self,
        mut st: MutexGuard<'a, State>,
        fiber: FiberId,
    ) -> MutexGuard<'a, State> {
        while st.active != Some(fiber) {
            st = self.park(st);
        }
        st
    }

    /// Gives the baton back to the scheduler and waits to be resumed.
    fn suspend(&self, mut st: MutexGuard<'_, State>, fiber: FiberId) {
        st.active = None;
        self.baton.notify_all();
        drop(self.wait_for_baton(st, fiber));
    }

    fn calling_fiber(op: &str, ctx: ContextHandle) -> Option<FiberId> {
        let fiber = current_fiber();
        if fiber.is_none() {
            warn!("{}: {} called outside of a task, ignoring", ctx, op);
        }
        fiber
    }
}

// Returns the baton when a task body finishes, including by unwinding.
struct FiberExit {
    kernel: Arc<LocalKernel>,
}

impl Drop for FiberExit {
    fn drop(&mut self) {
        let mut st = self.kernel.lock();
        st.report.tasks_finished += 1;
        st.active = None;
        self.kernel.baton.notify_all();
    }
}

impl Kernel for LocalKernel {
    fn fatal(&self, ctx: ContextHandle, message: &str) {
        error!("[{}] {}", ctx, message);
        let mut st = self.lock();
        let time_ps = st.now;
        st.report.fatals.push(Diagnostic {
            context: ctx.raw(),
            time_ps,
            message: message.to_string(),
        });
    }

    fn print(&self, ctx: ContextHandle, message: &str) {
        info!("[{}] {}", ctx, message);
    }

    fn create_task(&self, ctx: ContextHandle, task: TaskId) {
        let mut st = self.lock();
        let now = st.now;
        st.schedule(now, Action::Spawn(ctx, task));
    }

    fn create_periodic_handler(&self, ctx: ContextHandle, handler: HandlerId, period_ns: u64) {
        let period_ps = if period_ns == 0 {
            warn!("{}: {} has a zero period, using 1 ns", ctx, handler);
            PS_PER_NS
        } else {
            period_ns.saturating_mul(PS_PER_NS)
        };
        let mut st = self.lock();
        let at = st.now.saturating_add(period_ps);
        st.schedule(
            at,
            Action::Periodic {
                ctx,
                handler,
                period_ps,
            },
        );
    }

    fn wait(&self, ctx: ContextHandle, ns: u64) {
        self.wait_ps(ctx, ns.saturating_mul(PS_PER_NS));
    }

    fn wait_ps(&self, ctx: ContextHandle, ps: u64) {
        let Some(fiber) = Self::calling_fiber("wait", ctx) else {
            return;
        };
        let mut st = self.lock();
        let at = st.now.saturating_add(ps);
        st.schedule(at, Action::Resume(fiber));
        self.suspend(st, fiber);
    }

    fn wait_event(&self, ctx: ContextHandle) {
        let Some(fiber) = Self::calling_fiber("wait_event", ctx) else {
            return;
        };
        let mut st = self.lock();
        if let Some(pending) = st.pending_events.get_mut(&ctx).filter(|n| **n > 0) {
            *pending -= 1;
            return;
        }
        st.waiters.entry(ctx).or_default().push_back(fiber);
        self.suspend(st, fiber);
    }

    fn raise_event(&self, ctx: ContextHandle) {
        let mut st = self.lock();
        st.report.events_raised += 1;
        let waiter = st.waiters.get_mut(&ctx).and_then(VecDeque::pop_front);
        match waiter {
            Some(fiber) => {
                let now = st.now;
                st.schedule(now, Action::Resume(fiber));
            }
            None => *st.pending_events.entry(ctx).or_default() += 1,
        }
    }

    fn raise_event_from_ext(&self, ctx: ContextHandle) {
        // Delivered by the scheduler thread on its next step.
        if self.ext_tx.send(ctx).is_err() {
            warn!("{}: external event after kernel shutdown", ctx);
        }
    }
}
