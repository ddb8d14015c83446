//! Physical device scoring and selection.
//!
//! Every enumerated device is captured as a [`DeviceInfo`] snapshot, scored
//! against the presentation surface, and the best qualifying one wins. A
//! discrete GPU beats an integrated one whenever both qualify, while single-GPU
//! systems still work.
//!
//! Scoring is a pure function of the snapshot, so everything below
//! [`SurfaceProbe`] runs without a GPU.

use std::ffi::{CStr, CString};
use std::fmt;

use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;

use crate::error::{Error, Result};

/// Score carried by a disqualified candidate.
pub const DISQUALIFIED: i32 = -1;

const BASE_SCORE: i32 = 1000;
const DISCRETE_BONUS: i32 = 1000;
const LARGE_IMAGE_BONUS: i32 = 1000;
const LARGE_IMAGE_THRESHOLD: u32 = 1000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub present: bool,
}

/// What the native API reports for one physical device against one surface.
#[derive(Clone, Debug, Default)]
pub struct DeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub extensions: Vec<CString>,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// First per-device query that failed while taking the snapshot. The
    /// fields it would have filled are left empty.
    pub query_failure: Option<(&'static str, vk::Result)>,
}

/// Why a device scored [`DISQUALIFIED`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disqualification {
    MissingExtension(CString),
    NoSurfaceFormats,
    NoPresentModes,
    NoGraphicsQueue,
    NoPresentQueue,
    QueryFailed { call: &'static str, result: vk::Result },
}

impl fmt::Display for Disqualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disqualification::MissingExtension(ext) => write!(f, "missing extension {}", ext.to_string_lossy()),
            Disqualification::NoSurfaceFormats => f.write_str("surface exposes no formats"),
            Disqualification::NoPresentModes => f.write_str("surface exposes no present modes"),
            Disqualification::NoGraphicsQueue => f.write_str("no graphics queue family"),
            Disqualification::NoPresentQueue => f.write_str("no queue family can present to the surface"),
            Disqualification::QueryFailed { call, result } => write!(f, "{call} failed: {result}"),
        }
    }
}

/// A scored device. Only the winner outlives selection.
#[derive(Clone, Debug, Default)]
pub struct DeviceCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub score: i32,
    pub graphics_index: u32,
    pub present_index: u32,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl DeviceCandidate {
    fn disqualified(info: &DeviceInfo) -> Self {
        Self { physical_device: info.handle, name: info.name.clone(), score: DISQUALIFIED, ..Default::default() }
    }

    pub fn is_qualified(&self) -> bool {
        self.score >= 0
    }

    /// Queue family indices to create queues on, deduplicated.
    pub fn unique_queue_families(&self) -> Vec<u32> {
        if self.graphics_index == self.present_index {
            vec![self.graphics_index]
        } else {
            vec![self.graphics_index, self.present_index]
        }
    }
}

/// Source of device snapshots for [`select`].
pub trait DeviceSource {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Current framebuffer size of the target window in pixels.
    fn framebuffer_size(&self) -> (u32, u32);
}

/// Preferred pixel format, used whenever the surface offers it.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first().copied())
}

/// Swap extent: the surface's current extent, or the framebuffer size clamped
/// to the surface bounds when the surface leaves it to us.
pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    let (width, height) = framebuffer;
    vk::Extent2D {
        width: width.min(caps.max_image_extent.width).max(caps.min_image_extent.width),
        height: height.min(caps.max_image_extent.height).max(caps.min_image_extent.height),
    }
}

/// One more image than the minimum, capped by the maximum when there is one.
pub fn resolve_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// Score one device, or say why it cannot be used.
pub fn evaluate(info: &DeviceInfo, required_extensions: &[&CStr], framebuffer: (u32, u32)) -> Result<DeviceCandidate, Disqualification> {
    if let Some((call, result)) = info.query_failure {
        return Err(Disqualification::QueryFailed { call, result });
    }
    if let Some(missing) = required_extensions
        .iter()
        .find(|req| !info.extensions.iter().any(|have| have.as_c_str() == **req))
    {
        return Err(Disqualification::MissingExtension((*missing).to_owned()));
    }
    if info.formats.is_empty() {
        return Err(Disqualification::NoSurfaceFormats);
    }
    if info.present_modes.is_empty() {
        return Err(Disqualification::NoPresentModes);
    }
    let graphics_index = info
        .queue_families
        .iter()
        .position(|q| q.flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or(Disqualification::NoGraphicsQueue)?;
    let present_index = info
        .queue_families
        .iter()
        .position(|q| q.present)
        .ok_or(Disqualification::NoPresentQueue)?;

    let mut score = BASE_SCORE;
    if info.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += DISCRETE_BONUS;
    }
    if info.max_image_dimension_2d > LARGE_IMAGE_THRESHOLD {
        score += LARGE_IMAGE_BONUS;
    }

    let surface_format = choose_surface_format(&info.formats).ok_or(Disqualification::NoSurfaceFormats)?;

    Ok(DeviceCandidate {
        physical_device: info.handle,
        name: info.name.clone(),
        score,
        graphics_index: graphics_index as u32,
        present_index: present_index as u32,
        capabilities: info.capabilities,
        surface_format,
        present_mode: vk::PresentModeKHR::FIFO,
        extent: resolve_extent(&info.capabilities, framebuffer),
        image_count: resolve_image_count(&info.capabilities),
    })
}

/// [`evaluate`] folded into a candidate with a negative score on failure.
pub fn score_device(info: &DeviceInfo, required_extensions: &[&CStr], framebuffer: (u32, u32)) -> DeviceCandidate {
    match evaluate(info, required_extensions, framebuffer) {
        Ok(candidate) => {
            log::debug!("device '{}' scored {}", info.name, candidate.score);
            candidate
        }
        Err(reason) => {
            log::debug!("device '{}' disqualified: {reason}", info.name);
            DeviceCandidate::disqualified(info)
        }
    }
}

/// Highest score wins; ties go to the device enumerated first.
pub fn pick_best(candidates: Vec<DeviceCandidate>) -> Result<DeviceCandidate> {
    let total = candidates.len();
    let mut best: Option<DeviceCandidate> = None;
    for candidate in candidates {
        if best.as_ref().map_or(true, |b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }
    match best {
        Some(b) if b.is_qualified() => Ok(b),
        _ => Err(Error::SelectionExhausted { candidates: total }),
    }
}

/// Score every device `source` exposes and return the winner.
pub fn select(source: &impl DeviceSource, required_extensions: &[&CStr]) -> Result<DeviceCandidate> {
    let framebuffer = source.framebuffer_size();
    let candidates: Vec<_> = source
        .devices()?
        .iter()
        .map(|info| score_device(info, required_extensions, framebuffer))
        .collect();
    let chosen = pick_best(candidates)?;
    log::info!(
        "selected device '{}' (score {}, graphics queue {}, present queue {}, {}x{} x{} images)",
        chosen.name,
        chosen.score,
        chosen.graphics_index,
        chosen.present_index,
        chosen.extent.width,
        chosen.extent.height,
        chosen.image_count
    );
    Ok(chosen)
}

/// Extensions every device must expose for the engine to present.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![khr::Swapchain::name()]
}

/// Reads [`DeviceInfo`] snapshots from a live instance and surface.
pub struct SurfaceProbe<'a> {
    pub instance: &'a ash::Instance,
    pub surface_loader: &'a khr::Surface,
    pub surface: vk::SurfaceKHR,
    pub framebuffer: (u32, u32),
}

/// Unwrap a per-device query, keeping the first failure instead of aborting
/// the whole enumeration.
fn or_record<T: Default>(res: VkResult<T>, call: &'static str, failure: &mut Option<(&'static str, vk::Result)>) -> T {
    res.unwrap_or_else(|result| {
        failure.get_or_insert((call, result));
        T::default()
    })
}

impl SurfaceProbe<'_> {
    fn snapshot(&self, pd: vk::PhysicalDevice) -> DeviceInfo {
        let mut failure = None;
        // SAFETY: `pd` was enumerated from `self.instance`, which outlives the probe.
        unsafe {
            let props = self.instance.get_physical_device_properties(pd);
            let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy().into_owned();
            let extensions = or_record(
                self.instance.enumerate_device_extension_properties(pd),
                "vkEnumerateDeviceExtensionProperties",
                &mut failure,
            )
            .iter()
            .map(|ext| CStr::from_ptr(ext.extension_name.as_ptr()).to_owned())
            .collect();

            let mut queue_families = Vec::new();
            for (i, qf) in self.instance.get_physical_device_queue_family_properties(pd).iter().enumerate() {
                let present = self
                    .surface_loader
                    .get_physical_device_surface_support(pd, i as u32, self.surface)
                    .unwrap_or(false);
                queue_families.push(QueueFamilyInfo { flags: qf.queue_flags, present });
            }

            let capabilities = or_record(
                self.surface_loader.get_physical_device_surface_capabilities(pd, self.surface),
                "vkGetPhysicalDeviceSurfaceCapabilitiesKHR",
                &mut failure,
            );
            let formats = or_record(
                self.surface_loader.get_physical_device_surface_formats(pd, self.surface),
                "vkGetPhysicalDeviceSurfaceFormatsKHR",
                &mut failure,
            );
            let present_modes = or_record(
                self.surface_loader.get_physical_device_surface_present_modes(pd, self.surface),
                "vkGetPhysicalDeviceSurfacePresentModesKHR",
                &mut failure,
            );
            if let Some((call, result)) = failure {
                log::warn!("device '{name}': {call} failed ({result}), it will not be selected");
            }

            DeviceInfo {
                handle: pd,
                name,
                device_type: props.device_type,
                max_image_dimension_2d: props.limits.max_image_dimension2_d,
                extensions,
                queue_families,
                capabilities,
                formats,
                present_modes,
                query_failure: failure,
            }
        }
    }
}

impl DeviceSource for SurfaceProbe<'_> {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        // SAFETY: the instance is live for the probe's lifetime.
        let physical = unsafe { self.instance.enumerate_physical_devices() }
            .map_err(Error::query("vkEnumeratePhysicalDevices"))?;
        Ok(physical.into_iter().map(|pd| self.snapshot(pd)).collect())
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer
    }
}
