// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use labwired_core::signals::DigitalLevel;
use labwired_core::{
    ConfigNode, ContextHandle, Dispatcher, HandlerId, Interface, Kernel, ModelCore, ModelHandle,
    ModelRegistry, PeripheralModel, SignalHandle, SignalPort, SimContext, Stimulus, TaskId,
    UartItf,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Fatal(ContextHandle, String),
    Print(ContextHandle, String),
    CreateTask(ContextHandle, TaskId),
    CreatePeriodic(ContextHandle, HandlerId, u64),
    Wait(ContextHandle, u64),
    WaitPs(ContextHandle, u64),
    WaitEvent(ContextHandle),
    RaiseEvent(ContextHandle),
    RaiseEventFromExt(ContextHandle),
}

#[derive(Default)]
struct RecordingKernel {
    calls: Mutex<Vec<Call>>,
}

impl RecordingKernel {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn fatals(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Fatal(..)))
            .count()
    }
}

impl Kernel for RecordingKernel {
    fn fatal(&self, ctx: ContextHandle, message: &str) {
        self.record(Call::Fatal(ctx, message.to_string()));
    }
    fn print(&self, ctx: ContextHandle, message: &str) {
        self.record(Call::Print(ctx, message.to_string()));
    }
    fn create_task(&self, ctx: ContextHandle, task: TaskId) {
        self.record(Call::CreateTask(ctx, task));
    }
    fn create_periodic_handler(&self, ctx: ContextHandle, handler: HandlerId, period_ns: u64) {
        self.record(Call::CreatePeriodic(ctx, handler, period_ns));
    }
    fn wait(&self, ctx: ContextHandle, ns: u64) {
        self.record(Call::Wait(ctx, ns));
    }
    fn wait_ps(&self, ctx: ContextHandle, ps: u64) {
        self.record(Call::WaitPs(ctx, ps));
    }
    fn wait_event(&self, ctx: ContextHandle) {
        self.record(Call::WaitEvent(ctx));
    }
    fn raise_event(&self, ctx: ContextHandle) {
        self.record(Call::RaiseEvent(ctx));
    }
    fn raise_event_from_ext(&self, ctx: ContextHandle) {
        self.record(Call::RaiseEventFromExt(ctx));
    }
}

struct SigHandle;

impl SignalPort for SigHandle {
    fn drive(&self, _stimulus: Stimulus) -> Option<DigitalLevel> {
        None
    }
}

const CTX: ContextHandle = ContextHandle::from_raw(7);

fn attached() -> (Arc<RecordingKernel>, SimContext) {
    let kernel = Arc::new(RecordingKernel::default());
    let ctx = SimContext::new(kernel.clone(), CTX);
    (kernel, ctx)
}

#[test]
fn test_task_ids_are_dense_and_forwarded() {
    let (kernel, ctx) = attached();
    let dispatcher = Arc::new(Dispatcher::new());
    let model = ModelCore::with_dispatcher(ConfigNode::empty(), Some(ctx), dispatcher.clone());

    let order = Arc::new(Mutex::new(Vec::new()));
    let ids: Vec<TaskId> = (0..4)
        .map(|k| {
            let order = order.clone();
            model.create_task(move || order.lock().unwrap().push(k))
        })
        .collect();
    assert_eq!(
        ids.iter().map(|id| id.raw()).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert_eq!(
        kernel.calls(),
        ids.iter()
            .map(|id| Call::CreateTask(CTX, *id))
            .collect::<Vec<_>>()
    );

    // The kernel chooses the order.
    dispatcher.dispatch_task(ids[2]).unwrap();
    dispatcher.dispatch_task(ids[0]).unwrap();
    assert_eq!(*order.lock().unwrap(), vec![2, 0]);
}

#[test]
fn test_periodic_handlers_use_their_own_id_space() {
    let (kernel, ctx) = attached();
    let dispatcher = Arc::new(Dispatcher::new());
    let model = ModelCore::with_dispatcher(ConfigNode::empty(), Some(ctx), dispatcher.clone());

    let _task = model.create_task(|| {});
    let ticks = Arc::new(AtomicUsize::new(0));
    let t = ticks.clone();
    let handler = model.create_periodic_handler(250, move || {
        t.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(handler.raw(), 0);
    assert!(kernel
        .calls()
        .contains(&Call::CreatePeriodic(CTX, handler, 250)));

    for _ in 0..5 {
        dispatcher.dispatch_periodic(handler).unwrap();
    }
    assert_eq!(ticks.load(Ordering::SeqCst), 5);
}

#[test]
fn test_cooperative_primitives_forward_to_kernel() {
    let (kernel, ctx) = attached();
    let dispatcher = Arc::new(Dispatcher::new());
    let model = ModelCore::with_dispatcher(ConfigNode::empty(), Some(ctx), dispatcher.clone());

    let sim = model.sim();
    let id = model.create_task(move || {
        sim.wait(100);
        sim.wait_ps(2500);
        sim.wait_event();
        sim.raise_event();
        sim.print("done");
    });
    dispatcher.dispatch_task(id).unwrap();

    assert_eq!(
        kernel.calls()[1..],
        [
            Call::Wait(CTX, 100),
            Call::WaitPs(CTX, 2500),
            Call::WaitEvent(CTX),
            Call::RaiseEvent(CTX),
            Call::Print(CTX, "done".to_string()),
        ]
    );
}

#[test]
fn test_raise_event_from_ext_without_context_is_noop() {
    let kernel = Arc::new(RecordingKernel::default());
    let model = ModelCore::with_dispatcher(ConfigNode::empty(), None, Arc::new(Dispatcher::new()));
    model.raise_event_from_ext();
    model.external_events().raise();
    assert!(kernel.calls().is_empty());
}

#[test]
fn test_external_events_from_background_thread() {
    let (kernel, ctx) = attached();
    let dispatcher = Arc::new(Dispatcher::new());
    let model = ModelCore::with_dispatcher(ConfigNode::empty(), Some(ctx), dispatcher);
    let events = model.external_events();

    std::thread::spawn(move || {
        for _ in 0..3 {
            events.raise();
        }
    })
    .join()
    .unwrap();

    assert_eq!(kernel.calls(), vec![Call::RaiseEventFromExt(CTX); 3]);
}

static NEVER_BUILT: AtomicUsize = AtomicUsize::new(0);

fn counting_factory(config: ConfigNode, ctx: Option<SimContext>) -> ModelHandle {
    NEVER_BUILT.fetch_add(1, Ordering::SeqCst);
    Box::new(ModelCore::new(config, ctx))
}

#[test]
fn test_load_without_module_key() {
    let (kernel, ctx) = attached();
    let mut registry = ModelRegistry::new();
    registry.register("counting", counting_factory);

    let config = ConfigNode::from_yaml_str("model: counting\n").unwrap();
    assert!(registry.load(&config, Some(ctx)).is_none());
    assert_eq!(kernel.fatals(), 1);
    assert!(matches!(&kernel.calls()[0], Call::Fatal(CTX, msg) if msg.contains("'module'")));
    assert_eq!(NEVER_BUILT.load(Ordering::SeqCst), 0);
}

#[test]
fn test_load_unopenable_module() {
    let (kernel, ctx) = attached();
    let mut registry = ModelRegistry::new();
    registry.register("counting", counting_factory);

    let config = ConfigNode::from_yaml_str("module: ./does-not-exist/periph.so\n").unwrap();
    assert!(registry.load(&config, Some(ctx)).is_none());
    assert_eq!(kernel.fatals(), 1);
    assert!(matches!(&kernel.calls()[0], Call::Fatal(_, msg) if msg.contains("periph.so")));
    assert_eq!(NEVER_BUILT.load(Ordering::SeqCst), 0);
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn test_load_library_without_factory_symbol() {
    let (kernel, ctx) = attached();
    let config = ConfigNode::from_yaml_str("module: libc.so.6\n").unwrap();
    assert!(labwired_core::loader::load(&config, Some(ctx)).is_none());
    assert_eq!(kernel.fatals(), 1);
    assert!(
        matches!(&kernel.calls()[0], Call::Fatal(_, msg) if msg.contains("labwired_model_new"))
    );
}

struct UartModel {
    core: ModelCore,
}

impl PeripheralModel for UartModel {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }
}

fn uart_model_new(config: ConfigNode, ctx: Option<SimContext>) -> ModelHandle {
    Box::new(UartModel {
        core: ModelCore::new(config, ctx),
    })
}

#[test]
fn test_uart_model_end_to_end() {
    let kernel = Arc::new(RecordingKernel::default());
    let dispatcher = Arc::new(Dispatcher::new());
    let ctx = SimContext::with_dispatcher(kernel.clone(), CTX, dispatcher.clone());
    let mut registry = ModelRegistry::new();
    registry.register("./uart_model", uart_model_new);

    let config = ConfigNode::from_yaml_str("module: ./uart_model\n").unwrap();
    let mut model = registry.load(&config, Some(ctx)).unwrap();
    assert_eq!(kernel.fatals(), 0);

    let received = Arc::new(Mutex::new(Vec::new()));
    let r = received.clone();
    let uart = Arc::new(UartItf::new().with_tx_edge(move |_, level| {
        r.lock().unwrap().push(level);
    }));
    model.core_mut().create_itf("uart0", uart.clone());

    let sig_handle: SignalHandle = Arc::new(SigHandle);
    let itf = model.bind_itf("uart0", sig_handle.clone()).unwrap();
    assert!(itf.ptr_eq(&Interface::from(uart.clone())));
    assert!(itf.is_bound_to(&sig_handle));

    let started = Arc::new(AtomicUsize::new(0));
    let start_ctx = started.clone();
    let start_routine = move || {
        start_ctx.fetch_add(1, Ordering::SeqCst);
    };
    let id = model.core().create_task(start_routine);
    assert_eq!(id.raw(), 0);
    assert_eq!(kernel.calls(), vec![Call::CreateTask(CTX, id)]);

    itf.on_edge(1_000, labwired_core::Edge::UartTx(DigitalLevel::Low));
    assert_eq!(*received.lock().unwrap(), vec![DigitalLevel::Low]);

    dispatcher.dispatch_task(id).unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert!(dispatcher.dispatch_task(id).is_err());
    assert_eq!(started.load(Ordering::SeqCst), 1);

    let uart_model = model.core().interface("uart0").unwrap();
    assert!(uart_model.as_uart().is_some());
}
