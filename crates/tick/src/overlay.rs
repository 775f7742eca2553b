//! On-screen FPS readout.
//!
//! The overlay samples its own FPS every few frames from wall-clock time,
//! coarser than the tracker's per-frame figure, so the readout doesn't
//! jitter. Visibility is persisted under a single storage key.

use crate::config::TickConfig;
use crate::entry::{KeyEvent, KeyOutcome};
use crate::host::{KeyValueStore, OverlaySurface};

/// FPS overlay state and its host surface.
pub struct FpsOverlay {
    surface: Option<Box<dyn OverlaySurface>>,
    storage: Box<dyn KeyValueStore>,
    storage_key: String,
    sample_frames: u32,
    visible: bool,
    listening: bool,
    frame_count: u32,
    last_time: f64,
    fps: Option<f64>,
}

impl FpsOverlay {
    pub fn new(
        config: &TickConfig,
        surface: Option<Box<dyn OverlaySurface>>,
        storage: Box<dyn KeyValueStore>,
    ) -> Self {
        Self {
            surface,
            storage,
            storage_key: config.overlay_storage_key.clone(),
            sample_frames: config.overlay_sample_frames.max(1),
            visible: false,
            listening: false,
            frame_count: 0,
            last_time: 0.0,
            fps: None,
        }
    }

    /// Load the persisted visibility, mount the readout and start listening
    /// for the toggle chord.
    pub fn init(&mut self) {
        if self.surface.is_none() {
            tracing::debug!(target: "tick::overlay", "no overlay surface, readout disabled");
            return;
        }
        self.load_state();
        self.mount();
        self.listening = true;
    }

    fn load_state(&mut self) {
        match self.storage.get(&self.storage_key) {
            Ok(Some(saved)) => self.visible = saved == "true",
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(target: "tick::overlay", error = %err, "overlay state unavailable");
            }
        }
    }

    fn save_state(&mut self) {
        let value = if self.visible { "true" } else { "false" };
        if let Err(err) = self.storage.set(&self.storage_key, value) {
            tracing::debug!(target: "tick::overlay", error = %err, "overlay state not persisted");
        }
    }

    fn mount(&mut self) {
        let visible = self.visible;
        if let Some(surface) = self.surface.as_mut() {
            match surface.mount() {
                Ok(()) => surface.set_visible(visible),
                Err(err) => {
                    tracing::debug!(target: "tick::overlay", error = %err, "overlay mount failed");
                }
            }
        }
    }

    /// Flip visibility and persist it.
    pub fn toggle(&mut self) {
        self.visible = !self.visible;
        let visible = self.visible;
        if let Some(surface) = self.surface.as_mut().filter(|s| s.is_mounted()) {
            surface.set_visible(visible);
        }
        self.save_state();
        tracing::trace!(target: "tick::overlay", visible, "overlay toggled");
    }

    pub fn show(&mut self) {
        if !self.visible {
            self.toggle();
        }
    }

    pub fn hide(&mut self) {
        if self.visible {
            self.toggle();
        }
    }

    /// Route a key press. Only the toggle chord is consumed.
    pub fn handle_key(&mut self, key: &KeyEvent) -> KeyOutcome {
        if self.listening && key.is_overlay_toggle() {
            self.toggle();
            KeyOutcome::Handled
        } else {
            KeyOutcome::Ignored
        }
    }

    /// Count a frame and refresh the readout once enough have elapsed.
    pub fn on_frame(&mut self, now: f64) {
        if !self.visible || !self.is_mounted() {
            return;
        }

        self.frame_count += 1;
        if self.last_time == 0.0 {
            self.last_time = now;
            return;
        }

        let elapsed = now - self.last_time;
        if self.frame_count >= self.sample_frames && elapsed > 0.0 {
            let fps = (1000.0 * self.frame_count as f64 / elapsed).round();
            if fps > 0.0 {
                self.fps = Some(fps);
                if let Some(surface) = self.surface.as_mut() {
                    surface.set_text(&format!("FPS: {}", fps));
                }
            }
            self.frame_count = 0;
            self.last_time = now;
        }
    }

    /// Restart the sampling window at `now`.
    pub fn begin_sampling(&mut self, now: f64) {
        self.last_time = now;
        self.frame_count = 0;
    }

    /// Recreate the readout if the host removed it. Returns whether it was
    /// recreated.
    pub fn restore(&mut self, now: f64) -> bool {
        if self.surface.is_none() || self.is_mounted() {
            return false;
        }
        self.load_state();
        self.mount();
        self.begin_sampling(now);
        tracing::debug!(target: "tick::overlay", "overlay recreated");
        true
    }

    /// Remove the readout and zero the counters.
    pub fn cleanup(&mut self) {
        if let Some(surface) = self.surface.as_mut().filter(|s| s.is_mounted()) {
            surface.unmount();
        }
        self.frame_count = 0;
        self.last_time = 0.0;
    }

    /// Stop reacting to the toggle chord.
    pub fn stop_listening(&mut self) {
        self.listening = false;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_mounted(&self) -> bool {
        self.surface.as_ref().is_some_and(|s| s.is_mounted())
    }

    /// Last value shown on the readout.
    pub fn fps(&self) -> Option<f64> {
        self.fps
    }
}

impl std::fmt::Debug for FpsOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FpsOverlay")
            .field("visible", &self.visible)
            .field("mounted", &self.is_mounted())
            .field("listening", &self.listening)
            .field("fps", &self.fps)
            .finish()
    }
}
