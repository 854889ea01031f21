//! Engine provisioning interface.
//!
//! Resolving, downloading and spawning the engine executable is not this
//! crate's job. The client only needs three steps from whoever does it,
//! expressed by [`EngineProvisioner`]:
//!
//! 1. `initialize` - describe the engine (script exists, version supported)
//! 2. `launch` - spawn the engine bound to a port, returning once spawned
//! 3. `shutdown` - terminate the engine and release its resources
//!
//! [`ExternalEngine`] covers the case where the engine is already running.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// Boxed future for provisioner steps.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Description of the engine a provisioner will launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineDescriptor {
    /// The requested script exists.
    pub exists: bool,
    /// The engine version is supported by this client.
    pub supported: bool,
    /// Engine version string.
    pub version: String,
    /// Script hash, used by provisioners for on-disk caching.
    pub hash: String,
}

/// Prepares, launches and stops the engine process.
pub trait EngineProvisioner: Send + Sync + 'static {
    /// Describe the engine.
    fn initialize(&self) -> BoxFuture<'_, Result<EngineDescriptor>>;

    /// Spawn the engine bound to `port`.
    fn launch(&self, port: u16) -> BoxFuture<'_, Result<()>>;

    /// Terminate the engine. Must tolerate being called more than once.
    fn shutdown(&self) -> BoxFuture<'_, Result<()>>;
}

/// An engine started outside this process. Every step is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ExternalEngine {
    version: String,
}

impl ExternalEngine {
    /// Create an external engine descriptor source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the given engine version from `initialize`.
    pub fn with_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
        }
    }
}

impl EngineProvisioner for ExternalEngine {
    fn initialize(&self) -> BoxFuture<'_, Result<EngineDescriptor>> {
        Box::pin(async move {
            Ok(EngineDescriptor {
                exists: true,
                supported: true,
                version: self.version.clone(),
                hash: String::new(),
            })
        })
    }

    fn launch(&self, port: u16) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tracing::debug!("using externally started engine on port {}", port);
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
