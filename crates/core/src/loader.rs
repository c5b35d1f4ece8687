// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::kernel::SimContext;
use crate::model::ModelHandle;
use crate::{BridgeError, BridgeResult};
use labwired_config::{ConfigError, ConfigNode};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info};

/// Symbol every model library exports (see [`crate::export_model!`]).
pub const MODEL_FACTORY_SYMBOL: &str = "labwired_model_new";

/// Configuration key naming the model implementation.
pub const MODULE_KEY: &str = "module";

pub type ModelFactory = fn(ConfigNode, Option<SimContext>) -> ModelHandle;

// Model code lives in these; they are never unloaded.
static LOADED_LIBRARIES: Mutex<Vec<libloading::Library>> = Mutex::new(Vec::new());

/// Resolves model implementations by name.
///
/// The `module` entry of a model configuration is first looked up among the
/// factories registered in-process, then opened as a shared library exporting
/// [`MODEL_FACTORY_SYMBOL`].
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    factories: HashMap<String, ModelFactory>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, returning the factory it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ModelFactory,
    ) -> Option<ModelFactory> {
        let name = name.into();
        debug!("Registering model factory '{}'", name);
        self.factories.insert(name, factory)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Loads the model described by `config`.
    ///
    /// On failure one fatal diagnostic is sent to the simulator (or logged
    /// when there is no context) and `None` is returned; the host is expected
    /// to shut this model down.
    pub fn load(&self, config: &ConfigNode, ctx: Option<SimContext>) -> Option<ModelHandle> {
        match self.try_load(config, ctx.clone()) {
            Ok(model) => Some(model),
            Err(e) => {
                let message = format!("ERROR, {}", e);
                match &ctx {
                    Some(ctx) => ctx.fatal(&message),
                    None => error!("{}", message),
                }
                None
            }
        }
    }

    pub fn try_load(
        &self,
        config: &ConfigNode,
        ctx: Option<SimContext>,
    ) -> BridgeResult<ModelHandle> {
        let module = config.require_str(MODULE_KEY).map_err(|e| match e {
            ConfigError::Missing(_) => BridgeError::MissingModule,
            ConfigError::WrongType { .. } => BridgeError::InvalidModule,
        })?;

        let factory = self.resolve(&module)?;
        info!("Instantiating peripheral model '{}'", module);
        Ok(factory(config.clone(), ctx))
    }

    fn resolve(&self, module: &str) -> BridgeResult<ModelFactory> {
        if let Some(factory) = self.factories.get(module) {
            return Ok(*factory);
        }
        load_library_factory(module)
    }
}

/// Loads a model using only shared-library resolution.
pub fn load(config: &ConfigNode, ctx: Option<SimContext>) -> Option<ModelHandle> {
    ModelRegistry::new().load(config, ctx)
}

fn load_library_factory(path: &str) -> BridgeResult<ModelFactory> {
    debug!("Opening model library {}", path);
    let library = open_library(path).map_err(|source| BridgeError::Open {
        path: path.to_string(),
        source,
    })?;

    // SAFETY: the symbol is declared by `export_model!` with exactly the
    // `ModelFactory` signature; a library built against another ABI is not
    // supported.
    let factory: ModelFactory = unsafe {
        match library.get::<ModelFactory>(MODEL_FACTORY_SYMBOL.as_bytes()) {
            Ok(symbol) => *symbol,
            Err(_) => {
                return Err(BridgeError::MissingFactory {
                    path: path.to_string(),
                    symbol: MODEL_FACTORY_SYMBOL,
                })
            }
        }
    };

    LOADED_LIBRARIES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(library);
    Ok(factory)
}

// Models may depend on symbols the simulator itself provides, so libraries
// are opened with global visibility and, where supported, deep binding.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn open_library(path: &str) -> Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
    // SAFETY: running a model library's initialisers is the point of loading it.
    unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL | libc::RTLD_DEEPBIND) }
        .map(libloading::Library::from)
}

#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
fn open_library(path: &str) -> Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
    // SAFETY: see above.
    unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(libloading::Library::from)
}

#[cfg(not(unix))]
fn open_library(path: &str) -> Result<libloading::Library, libloading::Error> {
    // SAFETY: see above.
    unsafe { libloading::Library::new(path) }
}

/// Exports a [`ModelFactory`] from a model library under
/// [`MODEL_FACTORY_SYMBOL`].
///
/// ```ignore
/// labwired_core::export_model!(MyUart::create);
/// ```
#[macro_export]
macro_rules! export_model {
    ($factory:path) => {
        #[no_mangle]
        pub fn labwired_model_new(
            config: $crate::ConfigNode,
            ctx: ::core::option::Option<$crate::kernel::SimContext>,
        ) -> $crate::model::ModelHandle {
            let factory: $crate::loader::ModelFactory = $factory;
            factory(config, ctx)
        }
    };
}
