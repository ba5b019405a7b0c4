//! Explicit binding lifecycle.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::binding::BindingHandle;
use crate::connection::BindingConfig;
use crate::error::LifecycleError;
use crate::transport::Transport;

struct Running {
    handle: BindingHandle,
    reactor: JoinHandle<()>,
}

/// Owns the reactor of one binding between `initialize` and `deinitialize`.
#[derive(Default)]
pub struct BindingContext {
    running: Option<Running>,
}

impl BindingContext {
    /// Create an uninitialized context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the reactor. Must run inside a tokio runtime.
    pub fn initialize<T: Transport>(
        &mut self,
        transport: T,
        config: BindingConfig,
    ) -> Result<BindingHandle, LifecycleError> {
        if self.running.is_some() {
            return Err(LifecycleError::AlreadyInitialized);
        }
        let (handle, reactor) = BindingHandle::spawn(transport, config);
        self.running = Some(Running {
            handle: handle.clone(),
            reactor,
        });
        debug!("binding initialized");
        Ok(handle)
    }

    /// Stop the reactor, failing pending calls with `ConnectionLost`.
    pub async fn deinitialize(&mut self) -> Result<(), LifecycleError> {
        let running = self.running.take().ok_or(LifecycleError::NotInitialized)?;
        running.handle.shutdown().await;
        if let Err(err) = running.reactor.await {
            warn!(%err, "reactor task ended abnormally");
        }
        debug!("binding deinitialized");
        Ok(())
    }

    /// Check if the reactor is running under this context.
    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    /// Handle to the running binding.
    pub fn handle(&self) -> Result<&BindingHandle, LifecycleError> {
        self.running
            .as_ref()
            .map(|running| &running.handle)
            .ok_or(LifecycleError::NotInitialized)
    }
}

impl std::fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingContext")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
