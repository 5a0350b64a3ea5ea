//! Native session ownership
//!
//! A [`Session`] exclusively owns at most one live engine handle. Callers
//! borrow it through a [`Lease`]; swapping to another model waits for every
//! outstanding lease before the old handle is destroyed, and the old handle is
//! always released before the new one is initialized.
//!
//! ```text
//! Uninitialized ──ensure──▶ Initializing ──ok──▶ Ready
//!                                │                 │ ensure(other model)
//!                                ▼                 ▼
//!                              Failed ◀──err── Reinitializing ──ok──▶ Ready
//! ```

use crate::native::NativeRuntime;
use crate::registry::ModelRegistry;
use crate::telemetry::Telemetry;
use duet_kernel::engine::EngineHandle;
use duet_kernel::error::InferenceError;
use duet_kernel::inference::DEFAULT_CONTEXT_SIZE;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, MutexGuard, OwnedRwLockReadGuard, RwLock as AsyncRwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Reinitializing,
    /// Last initialization failed. The next `ensure` tries again.
    Failed,
}

/// Which catalog a session downloads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Text,
    Speech,
}

struct LiveHandle {
    handle: EngineHandle,
    model: String,
    usage: Arc<AsyncRwLock<()>>,
    call_gate: Mutex<()>,
}

/// Shared borrow of the live handle. The handle is not destroyed while a
/// lease exists.
pub struct Lease {
    live: Arc<LiveHandle>,
    _usage: OwnedRwLockReadGuard<()>,
}

impl Lease {
    async fn acquire(live: Arc<LiveHandle>) -> Self {
        let usage = live.usage.clone().read_owned().await;
        Self {
            live,
            _usage: usage,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.live.handle
    }

    pub fn model(&self) -> &str {
        &self.live.model
    }

    /// Serialize engine calls on this handle.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.live.call_gate.lock().await
    }
}

/// Steps of handle initialization.
enum InitStep {
    Init,
    DownloadIfMissing,
    InitRetry,
    Fail(InferenceError),
}

pub struct Session {
    kind: SessionKind,
    runtime: NativeRuntime,
    registry: ModelRegistry,
    telemetry: Telemetry,
    slot: Mutex<Option<Arc<LiveHandle>>>,
    state: RwLock<SessionState>,
    last_model: RwLock<Option<String>>,
    context_size: AtomicU32,
}

impl Session {
    pub fn new(
        kind: SessionKind,
        runtime: NativeRuntime,
        registry: ModelRegistry,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            kind,
            runtime,
            registry,
            telemetry,
            slot: Mutex::new(None),
            state: RwLock::new(SessionState::Uninitialized),
            last_model: RwLock::new(None),
            context_size: AtomicU32::new(DEFAULT_CONTEXT_SIZE),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Model of the last initialization attempt.
    pub fn last_model(&self) -> Option<String> {
        self.last_model.read().clone()
    }

    pub fn runtime(&self) -> &NativeRuntime {
        &self.runtime
    }

    /// Lease a handle for `model`, initializing it if another model (or none)
    /// is loaded.
    pub async fn ensure(&self, model: &str) -> Result<Lease, InferenceError> {
        self.acquire(model, false).await
    }

    /// Re-initialize `model` with `context_size` even if it is already loaded.
    pub async fn reinitialize(&self, model: &str, context_size: u32) -> Result<(), InferenceError> {
        self.context_size.store(context_size, Ordering::SeqCst);
        self.acquire(model, true).await.map(|_| ())
    }

    /// Release the handle. Calling it with nothing loaded is a no-op.
    pub async fn unload(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(live) = slot.take() {
            self.release(live).await;
        }
        *self.state.write() = SessionState::Uninitialized;
    }

    async fn acquire(&self, model: &str, force: bool) -> Result<Lease, InferenceError> {
        let mut slot = self.slot.lock().await;

        if !force {
            if let Some(live) = slot.as_ref().filter(|live| live.model == model) {
                return Ok(Lease::acquire(live.clone()).await);
            }
        }

        *self.last_model.write() = Some(model.to_string());
        let previous = slot.take();
        *self.state.write() = if previous.is_some() {
            SessionState::Reinitializing
        } else {
            SessionState::Initializing
        };
        if let Some(previous) = previous {
            self.release(previous).await;
        }

        let model_path = self.registry.model_store().model_path(model);
        match self.initialize(model, &model_path).await {
            Ok(handle) => {
                info!(model = %model, %handle, "session ready");
                let live = Arc::new(LiveHandle {
                    handle,
                    model: model.to_string(),
                    usage: Arc::new(AsyncRwLock::new(())),
                    call_gate: Mutex::new(()),
                });
                *slot = Some(live.clone());
                *self.state.write() = SessionState::Ready;
                self.telemetry.log_init(true, model, None).await;
                Ok(Lease::acquire(live).await)
            }
            Err(e) => {
                warn!(model = %model, error = %e, "session initialization failed");
                *self.state.write() = SessionState::Failed;
                self.telemetry
                    .log_init(false, model, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Wait for outstanding leases, then destroy the handle.
    async fn release(&self, live: Arc<LiveHandle>) {
        let _exclusive = live.usage.write().await;
        debug!(model = %live.model, handle = %live.handle, "releasing session handle");
        self.runtime.destroy(live.handle).await;
    }

    async fn initialize(&self, model: &str, model_path: &Path) -> Result<EngineHandle, InferenceError> {
        let context_size = self.context_size.load(Ordering::SeqCst);
        let mut step = InitStep::Init;
        loop {
            step = match step {
                InitStep::Init => match self.runtime.init(model_path.to_path_buf(), context_size).await {
                    Some(handle) => return Ok(handle),
                    None => InitStep::DownloadIfMissing,
                },
                InitStep::DownloadIfMissing => {
                    if self.registry.is_model_downloaded(model).await {
                        InitStep::Fail(init_failure(model_path))
                    } else {
                        info!(model = %model, "model missing locally, downloading before retry");
                        match self.download(model).await {
                            Ok(()) => InitStep::InitRetry,
                            Err(e) => InitStep::Fail(e),
                        }
                    }
                }
                InitStep::InitRetry => match self.runtime.init(model_path.to_path_buf(), context_size).await {
                    Some(handle) => return Ok(handle),
                    None => InitStep::Fail(init_failure(model_path)),
                },
                InitStep::Fail(e) => return Err(e),
            };
        }
    }

    async fn download(&self, model: &str) -> Result<(), InferenceError> {
        let result = match self.kind {
            SessionKind::Text => self.registry.download_model(model).await,
            SessionKind::Speech => self.registry.download_voice_model(model).await,
        };
        result.map_err(InferenceError::from)
    }
}

fn init_failure(model_path: &Path) -> InferenceError {
    InferenceError::NativeEngine {
        status: 0,
        context: format!("Failed to initialize model at path: {}", model_path.display()),
    }
}
