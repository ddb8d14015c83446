//! Ordered teardown of everything a device context owns.
//!
//! What gets destroyed and in which order is decided by [`release_plan`], a
//! pure function of which slots are held. [`ResourceScope`] runs that plan
//! against a [`Teardown`] backend exactly once.

use std::fmt;

/// One ownable resource kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    SwapImageViews,
    Swapchain,
    Device,
    Surface,
    DebugMessenger,
    Instance,
    Window,
}

/// Destruction order: reverse of creation.
pub const RELEASE_ORDER: [Slot; 7] = [
    Slot::SwapImageViews,
    Slot::Swapchain,
    Slot::Device,
    Slot::Surface,
    Slot::DebugMessenger,
    Slot::Instance,
    Slot::Window,
];

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::SwapImageViews => "swapchain image views",
            Slot::Swapchain => "swapchain",
            Slot::Device => "logical device",
            Slot::Surface => "surface",
            Slot::DebugMessenger => "debug messenger",
            Slot::Instance => "instance",
            Slot::Window => "window",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseStep {
    /// Wait for the logical device to go idle.
    WaitIdle,
    Destroy(Slot),
}

pub fn release_plan(held: impl Fn(Slot) -> bool) -> Vec<ReleaseStep> {
    let mut plan = Vec::with_capacity(RELEASE_ORDER.len() + 1);
    if held(Slot::Device) {
        plan.push(ReleaseStep::WaitIdle);
    }
    plan.extend(RELEASE_ORDER.iter().copied().filter(|s| held(*s)).map(ReleaseStep::Destroy));
    plan
}

/// Backend that actually owns the handles.
pub trait Teardown {
    fn held(&self, slot: Slot) -> bool;
    fn wait_idle(&mut self);
    /// Destroy the resource in `slot`. Called at most once per held slot.
    fn destroy(&mut self, slot: Slot);
}

pub struct ResourceScope<T: Teardown> {
    backend: T,
    released: bool,
}

impl<T: Teardown> ResourceScope<T> {
    pub fn new(backend: T) -> Self {
        Self { backend, released: false }
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut T {
        &mut self.backend
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Run the release plan. Later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let backend = &mut self.backend;
        for step in release_plan(|slot| backend.held(slot)) {
            match step {
                ReleaseStep::WaitIdle => backend.wait_idle(),
                ReleaseStep::Destroy(slot) => {
                    log::debug!("releasing {slot}");
                    backend.destroy(slot);
                }
            }
        }
    }
}

impl<T: Teardown> Drop for ResourceScope<T> {
    fn drop(&mut self) {
        self.release();
    }
}
