//! Engine Core Module
//!
//! This module contains [`SplatEngine`], the facade over the LoD pipeline.
//! It owns the render driver (and through it the tree registry, page
//! cache, accumulators, and sort worker) plus the optional GPU state, and
//! is the type applications hold.
//!
//! # Lifecycle
//!
//! 1. Create with [`SplatEngine::new`] — validates the configuration and
//!    starts the worker threads.
//! 2. Optionally attach GPU state with [`SplatEngine::init_gpu`].
//! 3. Drive one frame at a time with [`SplatEngine::frame`] (headless) or
//!    [`SplatEngine::render_frame`] (applies GPU work).
//! 4. [`SplatEngine::dispose`] tears the workers down; every later call
//!    fails with `Disposed`.
//!
//! # Multiple engines
//!
//! Rasterizer shader binding consults a lexically-scoped engine override:
//! binding code running inside [`SplatEngine::bind_override`]'s guard
//! resolves pools from that engine instead of the default. The override
//! is a thread-local and restores the previous value when the guard
//! drops.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::driver::{FrameActions, FrameInputs, RenderDriver};
use crate::errors::Result;
use crate::gpu::EngineGpu;
use crate::settings::EngineSettings;
use crate::splats::encoding::SplatEncoding;
use crate::utils::Timer;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ENGINE_OVERRIDE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Restores the previous engine override when dropped.
pub struct OverrideGuard {
    previous: Option<u64>,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        ENGINE_OVERRIDE.with(|slot| slot.set(self.previous));
    }
}

/// The LoD engine facade.
pub struct SplatEngine {
    driver: RenderDriver,
    gpu: Option<EngineGpu>,
    timer: Timer,
    id: u64,
}

impl SplatEngine {
    /// Creates an engine and starts its workers. Fails on invalid
    /// configuration or failed worker start.
    pub fn new(settings: EngineSettings) -> Result<Self> {
        Ok(Self {
            driver: RenderDriver::new(settings)?,
            gpu: None,
            timer: Timer::new(),
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// This engine's id, as seen by the override mechanism.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Allocates the engine's GPU state.
    pub fn init_gpu(&mut self, device: &wgpu::Device) {
        let settings = self.driver.settings();
        self.gpu = Some(EngineGpu::new(
            device,
            settings.page_count() as u32,
            SplatEncoding::Compact,
            settings.max_sh,
        ));
    }

    /// Runs one driver frame without touching the GPU; the caller applies
    /// the returned actions (or ignores them in headless use).
    pub fn frame(&mut self, inputs: &FrameInputs<'_>) -> Result<FrameActions> {
        self.timer.tick();
        self.driver.frame(inputs)
    }

    /// Runs one frame and applies its GPU work.
    pub fn render_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        inputs: &FrameInputs<'_>,
    ) -> Result<FrameActions> {
        let actions = self.frame(inputs)?;
        if let Some(gpu) = &mut self.gpu {
            gpu.apply_frame(device, queue, &actions, self.driver.accumulators());
        }
        Ok(actions)
    }

    /// The driver, for registry/cache introspection.
    #[must_use]
    pub fn driver(&self) -> &RenderDriver {
        &self.driver
    }

    /// Mutable driver access.
    pub fn driver_mut(&mut self) -> &mut RenderDriver {
        &mut self.driver
    }

    /// GPU state, when initialized.
    #[must_use]
    pub fn gpu(&self) -> Option<&EngineGpu> {
        self.gpu.as_ref()
    }

    /// Frame timing.
    #[must_use]
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Scopes the engine override to the returned guard: shader binding
    /// performed while the guard lives resolves against this engine.
    #[must_use]
    pub fn bind_override(&self) -> OverrideGuard {
        let previous = ENGINE_OVERRIDE.with(|slot| slot.replace(Some(self.id)));
        OverrideGuard { previous }
    }

    /// The engine id bound by the innermost live override guard on this
    /// thread, if any. Consulted at shader-binding time.
    #[must_use]
    pub fn current_override() -> Option<u64> {
        ENGINE_OVERRIDE.with(Cell::get)
    }

    /// Stops the workers. In-flight fetches and sorts complete and are
    /// discarded.
    pub fn dispose(&mut self) {
        self.driver.dispose();
    }
}
