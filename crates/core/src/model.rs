// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::dispatch::{Dispatcher, Handler, HandlerId, OwnerId, Task, TaskId};
use crate::interface::{Interface, SignalHandle};
use crate::kernel::{ExternalEvents, SimContext, SimLink};
use labwired_config::ConfigNode;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-instance state every peripheral model is built on.
///
/// Owns the named interfaces, the configuration subtree the model was created
/// from and the link to its simulator context. Tasks and handlers registered
/// through it are retired when it is dropped.
#[derive(Debug)]
pub struct ModelCore {
    owner: OwnerId,
    config: ConfigNode,
    link: SimLink,
    itfs: HashMap<String, Interface>,
    dispatcher: Arc<Dispatcher>,
}

impl ModelCore {
    /// Creates a model core registering into the dispatch tables of `ctx`.
    /// Without a context the process-wide tables are used; nothing will
    /// schedule those ids, but the model can still dispatch them itself.
    pub fn new(config: ConfigNode, ctx: Option<SimContext>) -> Self {
        let dispatcher = ctx
            .as_ref()
            .map_or_else(Dispatcher::global, |ctx| Arc::clone(ctx.dispatcher()));
        Self::with_dispatcher(config, ctx, dispatcher)
    }

    pub fn with_dispatcher(
        config: ConfigNode,
        ctx: Option<SimContext>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            owner: dispatcher.new_owner(),
            config,
            link: SimLink::new(ctx),
            itfs: HashMap::new(),
            dispatcher,
        }
    }

    pub fn config(&self) -> &ConfigNode {
        &self.config
    }

    pub fn context(&self) -> Option<&SimContext> {
        self.link.context()
    }

    /// Link to capture in task and handler closures.
    pub fn sim(&self) -> SimLink {
        self.link.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Registers `itf` under `name`. A previous interface with the same name is
    /// replaced.
    pub fn create_itf(&mut self, name: impl Into<String>, itf: impl Into<Interface>) {
        let name = name.into();
        let itf = itf.into();
        debug!("Creating {} interface '{}'", itf.kind(), name);
        if self.itfs.insert(name.clone(), itf).is_some() {
            debug!("Interface '{}' replaced", name);
        }
    }

    /// Binds the interface registered as `name` to a simulator-side port and
    /// returns it. Unknown names leave the model untouched and yield `None`.
    pub fn bind_itf(&self, name: &str, port: SignalHandle) -> Option<Interface> {
        let itf = self.itfs.get(name)?;
        itf.bind(port);
        debug!("Bound {} interface '{}'", itf.kind(), name);
        Some(itf.clone())
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.itfs.get(name)
    }

    pub fn interface_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.itfs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registers a one-shot task and asks the kernel to schedule it.
    pub fn create_task(&self, f: impl FnOnce() + Send + 'static) -> TaskId {
        let id = self.dispatcher.push_task(self.owner, Task::new(f));
        self.link.create_task(id);
        id
    }

    /// Registers a handler the kernel runs every `period_ns` until the end of
    /// the simulation.
    pub fn create_periodic_handler(
        &self,
        period_ns: u64,
        f: impl FnMut() + Send + 'static,
    ) -> HandlerId {
        let id = self
            .dispatcher
            .push_handler(self.owner, period_ns, Handler::new(f));
        self.link.create_periodic_handler(id, period_ns);
        id
    }

    pub fn wait(&self, ns: u64) {
        self.link.wait(ns);
    }

    pub fn wait_ps(&self, ps: u64) {
        self.link.wait_ps(ps);
    }

    pub fn wait_event(&self) {
        self.link.wait_event();
    }

    pub fn raise_event(&self) {
        self.link.raise_event();
    }

    pub fn raise_event_from_ext(&self) {
        self.link.raise_event_from_ext();
    }

    pub fn external_events(&self) -> ExternalEvents {
        self.link.external_events()
    }

    pub fn print(&self, message: &str) {
        self.link.print(message);
    }
}

impl Drop for ModelCore {
    fn drop(&mut self) {
        self.dispatcher.retire(self.owner);
    }
}

/// A loaded peripheral model.
///
/// Implementors embed a [`ModelCore`] and put their protocol logic in the
/// edge callbacks of their interfaces and in the tasks they register.
pub trait PeripheralModel: Send {
    fn core(&self) -> &ModelCore;
    fn core_mut(&mut self) -> &mut ModelCore;

    /// Called by the host once every interface is bound.
    fn start(&mut self) {}

    fn bind_itf(&self, name: &str, port: SignalHandle) -> Option<Interface> {
        self.core().bind_itf(name, port)
    }
}

impl PeripheralModel for ModelCore {
    fn core(&self) -> &ModelCore {
        self
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        self
    }
}

pub type ModelHandle = Box<dyn PeripheralModel>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{CtrlItf, SignalPort, Stimulus, UartItf};
    use crate::kernel::{ContextHandle, Kernel};
    use crate::signals::DigitalLevel;
    use crate::BridgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullPort;

    struct NullKernel;

    impl Kernel for NullKernel {
        fn fatal(&self, _ctx: ContextHandle, _message: &str) {}
        fn print(&self, _ctx: ContextHandle, _message: &str) {}
        fn create_task(&self, _ctx: ContextHandle, _task: TaskId) {}
        fn create_periodic_handler(&self, _ctx: ContextHandle, _h: HandlerId, _period_ns: u64) {}
        fn wait(&self, _ctx: ContextHandle, _ns: u64) {}
        fn wait_ps(&self, _ctx: ContextHandle, _ps: u64) {}
        fn wait_event(&self, _ctx: ContextHandle) {}
        fn raise_event(&self, _ctx: ContextHandle) {}
        fn raise_event_from_ext(&self, _ctx: ContextHandle) {}
    }

    impl SignalPort for NullPort {
        fn drive(&self, _stimulus: Stimulus) -> Option<DigitalLevel> {
            None
        }
    }

    fn core() -> ModelCore {
        ModelCore::with_dispatcher(ConfigNode::empty(), None, Arc::new(Dispatcher::new()))
    }

    #[test]
    fn test_bind_returns_registered_interface() {
        let mut model = core();
        let uart = Interface::from(UartItf::new());
        model.create_itf("uart0", uart.clone());

        let port: SignalHandle = Arc::new(NullPort);
        let bound = model.bind_itf("uart0", port.clone()).unwrap();
        assert!(bound.ptr_eq(&uart));
        assert!(uart.is_bound_to(&port));
    }

    #[test]
    fn test_bind_unknown_name_is_none() {
        let mut model = core();
        model.create_itf("rst", CtrlItf::new());
        assert!(model.bind_itf("uart0", Arc::new(NullPort)).is_none());
        assert!(!model.interface("rst").unwrap().is_bound());
        assert_eq!(model.interface_names(), vec!["rst"]);
    }

    #[test]
    fn test_create_itf_overwrites() {
        let mut model = core();
        let first = Interface::from(UartItf::new());
        let second = Interface::from(CtrlItf::new());
        model.create_itf("x", first);
        model.create_itf("x", second.clone());
        let bound = model.bind_itf("x", Arc::new(NullPort)).unwrap();
        assert!(bound.ptr_eq(&second));
    }

    #[test]
    fn test_detached_model_registers_and_dispatches() {
        let model = core();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = model.create_task(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        model.dispatcher().dispatch_task(id).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // No context: cooperative calls return immediately.
        model.wait(10);
        model.wait_event();
        model.raise_event_from_ext();
    }

    #[test]
    fn test_new_registers_into_context_tables() {
        let dispatcher = Arc::new(Dispatcher::new());
        let ctx = SimContext::with_dispatcher(
            Arc::new(NullKernel),
            ContextHandle::from_raw(1),
            dispatcher.clone(),
        );
        let model = ModelCore::new(ConfigNode::empty(), Some(ctx));
        assert!(Arc::ptr_eq(model.dispatcher(), &dispatcher));

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = model.create_task(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(dispatcher.task_count(), 1);
        dispatcher.dispatch_task(id).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_retires_registrations() {
        let dispatcher = Arc::new(Dispatcher::new());
        let model = ModelCore::with_dispatcher(ConfigNode::empty(), None, dispatcher.clone());
        let task = model.create_task(|| {});
        let handler = model.create_periodic_handler(100, || {});
        drop(model);

        assert!(matches!(
            dispatcher.dispatch_task(task),
            Err(BridgeError::TaskRetired(0))
        ));
        assert!(matches!(
            dispatcher.dispatch_periodic(handler),
            Err(BridgeError::HandlerRetired(0))
        ));
    }
}
