//! Process-wide windowing setup on top of `winit`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::EventLoop;
use winit::platform::run_return::EventLoopExtRunReturn;
use winit::window::{Window, WindowBuilder};

use crate::config::WindowCfg;
use crate::error::{Error, Result};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// The windowing platform. At most one exists per process.
pub struct Platform {
    event_loop: EventLoop<()>,
}

impl Platform {
    /// Initialize windowing. Must run on the main thread; a second call fails
    /// with [`Error::PlatformAlreadyInitialized`].
    pub fn init() -> Result<Self> {
        if INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::PlatformAlreadyInitialized);
        }
        let event_loop = EventLoop::new();
        log::debug!("windowing platform initialized");
        Ok(Self { event_loop })
    }

    pub fn event_loop(&self) -> &EventLoop<()> {
        &self.event_loop
    }

    /// A fixed-size, non-resizable window. winit attaches no client API.
    pub fn create_window(&self, cfg: &WindowCfg) -> Result<Window> {
        let window = WindowBuilder::new()
            .with_title(cfg.window_name.as_str())
            .with_inner_size(PhysicalSize::new(cfg.width, cfg.height))
            .with_resizable(false)
            .build(&self.event_loop)
            .map_err(|e| Error::Window(e.to_string()))?;
        log::info!("created window '{}' ({}x{})", cfg.window_name, cfg.width, cfg.height);
        Ok(window)
    }

    /// Pump window events until a window is closed or Escape is pressed.
    pub fn wait_for_close(&mut self) {
        let mut keys = StickyKeys::new();
        self.event_loop.run_return(|event, _, flow| {
            flow.set_wait();
            if let Event::WindowEvent { event, .. } = event {
                keys.record(&event);
                if matches!(event, WindowEvent::CloseRequested) || keys.take(VirtualKeyCode::Escape) {
                    flow.set_exit();
                }
            }
        });
    }
}

/// Framebuffer size of `window` in pixels.
pub fn framebuffer_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}

/// Key latch: a press is remembered until queried, even if the key was
/// released in between.
#[derive(Debug, Default)]
pub struct StickyKeys {
    held: HashSet<VirtualKeyCode>,
    latched: HashSet<VirtualKeyCode>,
}

impl StickyKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, key: VirtualKeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.held.insert(key);
                self.latched.insert(key);
            }
            ElementState::Released => {
                self.held.remove(&key);
            }
        }
    }

    /// Feed a window event; anything but keyboard input is ignored.
    pub fn record(&mut self, event: &WindowEvent<'_>) {
        if let WindowEvent::KeyboardInput { input: KeyboardInput { virtual_keycode: Some(key), state, .. }, .. } = event {
            self.handle(*key, *state);
        }
    }

    /// Was `key` pressed since the last query (or is it still down)? Clears the latch.
    pub fn take(&mut self, key: VirtualKeyCode) -> bool {
        let latched = self.latched.remove(&key);
        latched || self.held.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_survives_release_until_queried() {
        let mut keys = StickyKeys::new();
        keys.handle(VirtualKeyCode::Escape, ElementState::Pressed);
        keys.handle(VirtualKeyCode::Escape, ElementState::Released);
        assert!(keys.take(VirtualKeyCode::Escape));
        assert!(!keys.take(VirtualKeyCode::Escape));
    }

    #[test]
    fn held_key_keeps_reporting() {
        let mut keys = StickyKeys::new();
        keys.handle(VirtualKeyCode::Space, ElementState::Pressed);
        assert!(keys.take(VirtualKeyCode::Space));
        assert!(keys.take(VirtualKeyCode::Space));
        keys.handle(VirtualKeyCode::Space, ElementState::Released);
        assert!(!keys.take(VirtualKeyCode::Space));
        assert!(!keys.take(VirtualKeyCode::A));
    }
}
