// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Typed peripheral interfaces.
//!
//! Each variant wraps one electrical/protocol interface of a model. The host
//! binds it to a simulator-side [`SignalPort`]; after that the model drives
//! stimulus through the port, and the simulator reports transitions back via
//! [`Interface::on_edge`].

use crate::signals::{CpiSample, DigitalLevel, JtagPins, QspiLanes, SimTime};
use crate::{BridgeError, BridgeResult};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::trace;

/// Stimulus a model writes towards the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stimulus {
    QspiData(DigitalLevel),
    QspiQuadData(QspiLanes),
    JtagTck(JtagPins),
    UartRx(DigitalLevel),
    Cpi(CpiSample),
    Reset(DigitalLevel),
}

/// Simulator-side end of a bound interface.
pub trait SignalPort: Send + Sync {
    /// Applies `stimulus`. Ports that sample an output on the same edge (JTAG
    /// TDO) return it.
    fn drive(&self, stimulus: Stimulus) -> Option<DigitalLevel>;
}

pub type SignalHandle = Arc<dyn SignalPort>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Qspi,
    Jtag,
    Uart,
    Cpi,
    Ctrl,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterfaceKind::Qspi => "qspi",
            InterfaceKind::Jtag => "jtag",
            InterfaceKind::Uart => "uart",
            InterfaceKind::Cpi => "cpi",
            InterfaceKind::Ctrl => "ctrl",
        };
        f.write_str(name)
    }
}

/// Signal transitions the simulator reports to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    QspiSck { sck: DigitalLevel, data: QspiLanes },
    UartTx(DigitalLevel),
    Cpi(CpiSample),
}

#[derive(Default)]
struct Binding {
    port: RwLock<Option<SignalHandle>>,
}

impl Binding {
    fn bind(&self, port: SignalHandle) {
        *self.port.write().unwrap_or_else(PoisonError::into_inner) = Some(port);
    }

    fn port(&self) -> Option<SignalHandle> {
        self.port
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn drive(&self, kind: InterfaceKind, stimulus: Stimulus) -> BridgeResult<Option<DigitalLevel>> {
        let port = self.port().ok_or(BridgeError::Unbound { kind })?;
        trace!("{} stimulus {:?}", kind, stimulus);
        Ok(port.drive(stimulus))
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("bound", &self.port().is_some())
            .finish()
    }
}

fn notify<F: ?Sized>(slot: &Mutex<Option<Box<F>>>, call: impl FnOnce(&mut F)) {
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handler) = guard.as_mut() {
        call(handler);
    }
}

type QspiEdgeFn = dyn FnMut(SimTime, DigitalLevel, QspiLanes) + Send;

/// Quad-SPI interface.
#[derive(Default)]
pub struct QspiItf {
    binding: Binding,
    on_sck: Mutex<Option<Box<QspiEdgeFn>>>,
}

impl QspiItf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the SCK edge callback.
    pub fn with_sck_edge(
        self,
        f: impl FnMut(SimTime, DigitalLevel, QspiLanes) + Send + 'static,
    ) -> Self {
        *self.on_sck.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(f));
        self
    }

    pub fn sck_edge(&self, timestamp: SimTime, sck: DigitalLevel, data: QspiLanes) {
        notify(&self.on_sck, |f| f(timestamp, sck, data));
    }

    /// Drives the single-line data output.
    pub fn set_data(&self, data_0: DigitalLevel) -> BridgeResult<()> {
        self.binding
            .drive(InterfaceKind::Qspi, Stimulus::QspiData(data_0))
            .map(|_| ())
    }

    /// Drives all four data lines.
    pub fn set_qpi_data(&self, data: QspiLanes) -> BridgeResult<()> {
        self.binding
            .drive(InterfaceKind::Qspi, Stimulus::QspiQuadData(data))
            .map(|_| ())
    }
}

impl fmt::Debug for QspiItf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QspiItf")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct JtagItf {
    binding: Binding,
}

impl JtagItf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drives one TCK transition and returns the sampled TDO. A port that
    /// reports nothing reads as low.
    pub fn tck_edge(&self, pins: JtagPins) -> BridgeResult<DigitalLevel> {
        self.binding
            .drive(InterfaceKind::Jtag, Stimulus::JtagTck(pins))
            .map(Option::unwrap_or_default)
    }
}

type UartEdgeFn = dyn FnMut(SimTime, DigitalLevel) + Send;

#[derive(Default)]
pub struct UartItf {
    binding: Binding,
    on_tx: Mutex<Option<Box<UartEdgeFn>>>,
}

impl UartItf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tx_edge(self, f: impl FnMut(SimTime, DigitalLevel) + Send + 'static) -> Self {
        *self.on_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(f));
        self
    }

    /// Transition on the line the device under test transmits on.
    pub fn tx_edge(&self, timestamp: SimTime, data: DigitalLevel) {
        notify(&self.on_tx, |f| f(timestamp, data));
    }

    /// Drives the device's receive line.
    pub fn rx_edge(&self, data: DigitalLevel) -> BridgeResult<()> {
        self.binding
            .drive(InterfaceKind::Uart, Stimulus::UartRx(data))
            .map(|_| ())
    }
}

impl fmt::Debug for UartItf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UartItf")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

type CpiEdgeFn = dyn FnMut(SimTime, CpiSample) + Send;

/// Camera-style parallel video interface.
#[derive(Default)]
pub struct CpiItf {
    binding: Binding,
    on_edge: Mutex<Option<Box<CpiEdgeFn>>>,
}

impl CpiItf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_edge(self, f: impl FnMut(SimTime, CpiSample) + Send + 'static) -> Self {
        *self.on_edge.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(f));
        self
    }

    pub fn edge(&self, timestamp: SimTime, sample: CpiSample) {
        notify(&self.on_edge, |f| f(timestamp, sample));
    }

    /// Drives pixel clock, sync lines and data towards the simulator.
    pub fn drive_edge(&self, sample: CpiSample) -> BridgeResult<()> {
        self.binding
            .drive(InterfaceKind::Cpi, Stimulus::Cpi(sample))
            .map(|_| ())
    }
}

impl fmt::Debug for CpiItf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpiItf")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

/// Control interface (reset line).
#[derive(Debug, Default)]
pub struct CtrlItf {
    binding: Binding,
}

impl CtrlItf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_edge(&self, reset: DigitalLevel) -> BridgeResult<()> {
        self.binding
            .drive(InterfaceKind::Ctrl, Stimulus::Reset(reset))
            .map(|_| ())
    }
}

/// A registered interface of any kind.
///
/// Clones share the same underlying interface; the model keeps its typed
/// `Arc` to drive stimulus while the host keeps the `Interface` returned by
/// binding to deliver edges.
#[derive(Debug, Clone)]
pub enum Interface {
    Qspi(Arc<QspiItf>),
    Jtag(Arc<JtagItf>),
    Uart(Arc<UartItf>),
    Cpi(Arc<CpiItf>),
    Ctrl(Arc<CtrlItf>),
}

impl Interface {
    pub fn kind(&self) -> InterfaceKind {
        match self {
            Interface::Qspi(_) => InterfaceKind::Qspi,
            Interface::Jtag(_) => InterfaceKind::Jtag,
            Interface::Uart(_) => InterfaceKind::Uart,
            Interface::Cpi(_) => InterfaceKind::Cpi,
            Interface::Ctrl(_) => InterfaceKind::Ctrl,
        }
    }

    fn binding(&self) -> &Binding {
        match self {
            Interface::Qspi(itf) => &itf.binding,
            Interface::Jtag(itf) => &itf.binding,
            Interface::Uart(itf) => &itf.binding,
            Interface::Cpi(itf) => &itf.binding,
            Interface::Ctrl(itf) => &itf.binding,
        }
    }

    /// Stores the simulator-side back-reference. Last call wins.
    pub fn bind(&self, port: SignalHandle) {
        self.binding().bind(port);
    }

    pub fn port(&self) -> Option<SignalHandle> {
        self.binding().port()
    }

    pub fn is_bound(&self) -> bool {
        self.port().is_some()
    }

    pub fn is_bound_to(&self, port: &SignalHandle) -> bool {
        self.port()
            .is_some_and(|bound| std::ptr::addr_eq(Arc::as_ptr(&bound), Arc::as_ptr(port)))
    }

    /// Whether both values name the same interface object.
    pub fn ptr_eq(&self, other: &Interface) -> bool {
        match (self, other) {
            (Interface::Qspi(a), Interface::Qspi(b)) => Arc::ptr_eq(a, b),
            (Interface::Jtag(a), Interface::Jtag(b)) => Arc::ptr_eq(a, b),
            (Interface::Uart(a), Interface::Uart(b)) => Arc::ptr_eq(a, b),
            (Interface::Cpi(a), Interface::Cpi(b)) => Arc::ptr_eq(a, b),
            (Interface::Ctrl(a), Interface::Ctrl(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Delivers a signal transition. Edges that the interface kind has no
    /// callback for are dropped.
    pub fn on_edge(&self, timestamp: SimTime, edge: Edge) {
        match (self, edge) {
            (Interface::Qspi(itf), Edge::QspiSck { sck, data }) => {
                itf.sck_edge(timestamp, sck, data)
            }
            (Interface::Uart(itf), Edge::UartTx(data)) => itf.tx_edge(timestamp, data),
            (Interface::Cpi(itf), Edge::Cpi(sample)) => itf.edge(timestamp, sample),
            (itf, edge) => trace!("{} ignores edge {:?}", itf.kind(), edge),
        }
    }

    pub fn as_qspi(&self) -> Option<&Arc<QspiItf>> {
        match self {
            Interface::Qspi(itf) => Some(itf),
            _ => None,
        }
    }

    pub fn as_jtag(&self) -> Option<&Arc<JtagItf>> {
        match self {
            Interface::Jtag(itf) => Some(itf),
            _ => None,
        }
    }

    pub fn as_uart(&self) -> Option<&Arc<UartItf>> {
        match self {
            Interface::Uart(itf) => Some(itf),
            _ => None,
        }
    }

    pub fn as_cpi(&self) -> Option<&Arc<CpiItf>> {
        match self {
            Interface::Cpi(itf) => Some(itf),
            _ => None,
        }
    }

    pub fn as_ctrl(&self) -> Option<&Arc<CtrlItf>> {
        match self {
            Interface::Ctrl(itf) => Some(itf),
            _ => None,
        }
    }
}

macro_rules! impl_into_interface {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<Arc<$ty>> for Interface {
                fn from(itf: Arc<$ty>) -> Self {
                    Interface::$variant(itf)
                }
            }

            impl From<$ty> for Interface {
                fn from(itf: $ty) -> Self {
                    Interface::$variant(Arc::new(itf))
                }
            }
        )*
    };
}

impl_into_interface!(
    QspiItf => Qspi,
    JtagItf => Jtag,
    UartItf => Uart,
    CpiItf => Cpi,
    CtrlItf => Ctrl,
);
