//! The loaded bindings.

use std::fmt;
use std::sync::Arc;

use crate::engine::{self, Engine, EngineInfo};
use crate::runtime::{Detached, Runtime};
use crate::{Error, Result};

/// The minimum engine interface level.
pub const REQUIRED_VERSION: &str = "1.13.0";

/// An initialized instance of the bindings.
///
/// Holds the engine and the runtime all contexts created from it
/// use.  Cheap to clone.
#[derive(Clone)]
pub struct Module {
    engine: Arc<dyn Engine>,
    runtime: Arc<dyn Runtime>,
    version: String,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Module")
            .field("version", &self.version)
            .finish()
    }
}

impl Module {
    /// Initializes the bindings.
    ///
    /// Fails if the engine is older than [`REQUIRED_VERSION`].
    ///
    ///   [`REQUIRED_VERSION`]: constant.REQUIRED_VERSION.html
    pub fn init(engine: Arc<dyn Engine>, runtime: Arc<dyn Runtime>)
                -> Result<Self> {
        let version = engine.check_version(Some(REQUIRED_VERSION))
            .ok_or_else(|| Error::UnsupportedVersion {
                required: REQUIRED_VERSION.into(),
                found: engine.check_version(None),
            })?;
        log::debug!("Initialized engine version {}", version);

        Ok(Module { engine, runtime, version })
    }

    /// Initializes the bindings with the in-process engine and
    /// without a global execution lock.
    pub fn in_process() -> Result<Self> {
        Self::init(Arc::new(engine::memory::Engine::new()), Arc::new(Detached))
    }

    /// Returns the version of the engine.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the default engine info.
    pub fn engine_info(&self) -> Vec<EngineInfo> {
        self.engine.engine_info()
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }
}
