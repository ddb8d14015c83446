//! Instance, surface, device and swapchain bring-up for one window.

use std::ffi::{c_void, CStr, CString};

use ash::extensions::{ext::DebugUtils, khr};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

use crate::config::EngineConfig;
use crate::device::{self, DeviceCandidate, DeviceInfo, DeviceSource, Disqualification, SurfaceProbe};
use crate::error::{Artifact, Error, Result};
use crate::pipeline::SwapTarget;
use crate::platform;
use crate::scope::{ResourceScope, Slot, Teardown};

// SAFETY: nul-terminated, no interior nul.
const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

unsafe extern "system" fn forward_validation(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!(target: "vulkan", "[{types:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!(target: "vulkan", "[{types:?}] {message}");
    }
    vk::FALSE
}

fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(forward_validation))
        .build()
}

/// Owning slots for every native object a [`DeviceContext`] creates.
pub struct NativeHandles {
    image_views: Vec<vk::ImageView>,
    swapchain: Option<(khr::Swapchain, vk::SwapchainKHR)>,
    device: Option<ash::Device>,
    surface: Option<(khr::Surface, vk::SurfaceKHR)>,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    instance: Option<ash::Instance>,
    window: Option<Window>,
    // Keeps the Vulkan library loaded until every slot above is gone.
    _entry: ash::Entry,
}

impl NativeHandles {
    fn new(entry: ash::Entry, window: Window) -> Self {
        Self {
            image_views: Vec::new(),
            swapchain: None,
            device: None,
            surface: None,
            debug: None,
            instance: None,
            window: Some(window),
            _entry: entry,
        }
    }
}

impl Teardown for NativeHandles {
    fn held(&self, slot: Slot) -> bool {
        match slot {
            Slot::SwapImageViews => !self.image_views.is_empty(),
            Slot::Swapchain => self.swapchain.is_some(),
            Slot::Device => self.device.is_some(),
            Slot::Surface => self.surface.is_some(),
            Slot::DebugMessenger => self.debug.is_some(),
            Slot::Instance => self.instance.is_some(),
            Slot::Window => self.window.is_some(),
        }
    }

    fn wait_idle(&mut self) {
        if let Some(device) = &self.device {
            // SAFETY: the device is live; nothing else submits during teardown.
            if let Err(e) = unsafe { device.device_wait_idle() } {
                log::warn!("vkDeviceWaitIdle failed during teardown: {e}");
            }
        }
    }

    // SAFETY (all arms): each handle was created from the parent still held in
    // a later slot, and is taken out of its slot so it is destroyed only once.
    fn destroy(&mut self, slot: Slot) {
        match slot {
            Slot::SwapImageViews => {
                let views = std::mem::take(&mut self.image_views);
                if let Some(device) = &self.device {
                    for view in views {
                        unsafe { device.destroy_image_view(view, None) };
                    }
                }
            }
            Slot::Swapchain => {
                if let Some((loader, swapchain)) = self.swapchain.take() {
                    unsafe { loader.destroy_swapchain(swapchain, None) };
                }
            }
            Slot::Device => {
                if let Some(device) = self.device.take() {
                    unsafe { device.destroy_device(None) };
                }
            }
            Slot::Surface => {
                if let Some((loader, surface)) = self.surface.take() {
                    unsafe { loader.destroy_surface(surface, None) };
                }
            }
            Slot::DebugMessenger => {
                if let Some((loader, messenger)) = self.debug.take() {
                    unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
                }
            }
            Slot::Instance => {
                if let Some(instance) = self.instance.take() {
                    unsafe { instance.destroy_instance(None) };
                }
            }
            Slot::Window => {
                self.window.take();
            }
        }
    }
}

/// Everything between a window and a pipeline: instance, optional validation
/// messenger, surface, the selected device with its queues, the swapchain and
/// one view per swapchain image. Dropping it tears all of that down in
/// reverse order.
pub struct DeviceContext {
    scope: ResourceScope<NativeHandles>,
    instance: ash::Instance,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
    framebuffer: (u32, u32),
    device: ash::Device,
    candidate: DeviceCandidate,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
}

impl DeviceContext {
    pub fn new(cfg: &EngineConfig, window: Window) -> Result<Self> {
        // SAFETY: the loaded library is kept alive by `NativeHandles::_entry`.
        let entry = unsafe { ash::Entry::load() }.map_err(|e| Error::Loader(e.to_string()))?;
        let display = window.raw_display_handle();
        let window_handle = window.raw_window_handle();
        let framebuffer = platform::framebuffer_size(&window);
        let mut scope = ResourceScope::new(NativeHandles::new(entry.clone(), window));

        let instance = create_instance(&entry, cfg, display)?;
        scope.backend_mut().instance = Some(instance.clone());

        if cfg.debug_mode {
            let loader = DebugUtils::new(&entry, &instance);
            // SAFETY: instance is live and was created with the debug utils extension.
            let messenger = unsafe { loader.create_debug_utils_messenger(&messenger_info(), None) }
                .map_err(Error::native(Artifact::DebugMessenger))?;
            scope.backend_mut().debug = Some((loader, messenger));
        }

        let surface_loader = khr::Surface::new(&entry, &instance);
        // SAFETY: the window outlives the surface; it sits in a later release slot.
        let surface = unsafe { ash_window::create_surface(&entry, &instance, display, window_handle, None) }
            .map_err(Error::native(Artifact::Surface))?;
        scope.backend_mut().surface = Some((surface_loader.clone(), surface));

        let probe = SurfaceProbe { instance: &instance, surface_loader: &surface_loader, surface, framebuffer };
        let candidate = device::select(&probe, &device::required_device_extensions())?;

        let device = create_logical_device(&instance, &candidate)?;
        scope.backend_mut().device = Some(device.clone());
        // SAFETY: both families were requested with one queue each.
        let (graphics_queue, present_queue) = unsafe {
            (device.get_device_queue(candidate.graphics_index, 0), device.get_device_queue(candidate.present_index, 0))
        };

        let swapchain_loader = khr::Swapchain::new(&instance, &device);
        let swapchain = create_swapchain(&swapchain_loader, surface, &candidate)?;
        scope.backend_mut().swapchain = Some((swapchain_loader.clone(), swapchain));

        // SAFETY: swapchain was just created by this loader.
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(Error::query("vkGetSwapchainImagesKHR"))?;
        for &image in &images {
            let view = create_image_view(&device, image, candidate.surface_format.format)?;
            scope.backend_mut().image_views.push(view);
        }
        let image_views = scope.backend().image_views.clone();
        log::info!("swapchain ready: {} image(s), {:?}", images.len(), candidate.surface_format.format);

        Ok(Self {
            scope,
            instance,
            surface_loader,
            surface,
            framebuffer,
            device,
            candidate,
            graphics_queue,
            present_queue,
            images,
            image_views,
        })
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// The logical device. Pipelines built on it borrow it, so they cannot outlive the context.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn candidate(&self) -> &DeviceCandidate {
        &self.candidate
    }

    /// Score every physical device against this context's surface again,
    /// keeping the reason for each disqualification.
    pub fn survey(&self) -> Result<Vec<(DeviceInfo, std::result::Result<DeviceCandidate, Disqualification>)>> {
        let probe = SurfaceProbe {
            instance: &self.instance,
            surface_loader: &self.surface_loader,
            surface: self.surface,
            framebuffer: self.framebuffer,
        };
        let required = device::required_device_extensions();
        Ok(probe
            .devices()?
            .into_iter()
            .map(|info| {
                let verdict = device::evaluate(&info, &required, self.framebuffer);
                (info, verdict)
            })
            .collect())
    }

    pub fn swap_target(&self) -> SwapTarget {
        SwapTarget { format: self.candidate.surface_format.format, extent: self.candidate.extent }
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn window(&self) -> Option<&Window> {
        self.scope.backend().window.as_ref()
    }
}

fn create_instance(entry: &ash::Entry, cfg: &EngineConfig, display: raw_window_handle::RawDisplayHandle) -> Result<ash::Instance> {
    let app_name = CString::new(cfg.app_name.as_str()).map_err(|_| Error::InvalidConfig("app_name contains a nul byte".into()))?;
    let engine_name = CString::new(cfg.engine_name.as_str()).map_err(|_| Error::InvalidConfig("engine_name contains a nul byte".into()))?;
    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_1);

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .map_err(Error::query("vkEnumerateInstanceExtensionProperties"))?
        .to_vec();
    let mut layers = Vec::new();
    if cfg.debug_mode {
        let available = entry
            .enumerate_instance_layer_properties()
            .map_err(Error::query("vkEnumerateInstanceLayerProperties"))?;
        // SAFETY: layer_name is a nul-terminated fixed array filled by the loader.
        let found = available.iter().any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if !found {
            return Err(Error::MissingValidationLayer);
        }
        layers.push(VALIDATION_LAYER.as_ptr());
        extensions.push(DebugUtils::name().as_ptr());
    }

    // Also report problems raised while creating and destroying the instance itself.
    let mut messenger = messenger_info();
    let mut info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);
    if cfg.debug_mode {
        info = info.push_next(&mut messenger);
    }
    // SAFETY: every pointer in `info` refers to locals that outlive the call.
    let instance = unsafe { entry.create_instance(&info, None) }.map_err(Error::native(Artifact::Instance))?;
    log::info!("created instance for '{}' (validation {})", cfg.app_name, if cfg.debug_mode { "on" } else { "off" });
    Ok(instance)
}

fn create_logical_device(instance: &ash::Instance, candidate: &DeviceCandidate) -> Result<ash::Device> {
    let priorities = [1.0f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = candidate
        .unique_queue_families()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo::builder().queue_family_index(family).queue_priorities(&priorities).build())
        .collect();
    let extensions: Vec<*const std::os::raw::c_char> = device::required_device_extensions().iter().map(|e| e.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();
    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);
    // SAFETY: physical device came from this instance; pointers refer to live locals.
    let device = unsafe { instance.create_device(candidate.physical_device, &info, None) }.map_err(Error::native(Artifact::Device))?;
    log::info!("created logical device on '{}' with {} queue famil(ies)", candidate.name, queue_infos.len());
    Ok(device)
}

fn create_swapchain(loader: &khr::Swapchain, surface: vk::SurfaceKHR, candidate: &DeviceCandidate) -> Result<vk::SwapchainKHR> {
    let families = [candidate.graphics_index, candidate.present_index];
    let concurrent = candidate.graphics_index != candidate.present_index;
    let sharing = if concurrent { vk::SharingMode::CONCURRENT } else { vk::SharingMode::EXCLUSIVE };
    let indices: &[u32] = if concurrent { &families } else { &[] };
    let info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface)
        .min_image_count(candidate.image_count)
        .image_format(candidate.surface_format.format)
        .image_color_space(candidate.surface_format.color_space)
        .image_extent(candidate.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing)
        .queue_family_indices(indices)
        .pre_transform(candidate.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(candidate.present_mode)
        .clipped(true);
    // SAFETY: surface and device behind `loader` are live.
    unsafe { loader.create_swapchain(&info, None) }.map_err(Error::native(Artifact::Swapchain))
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    // SAFETY: image belongs to a swapchain created on `device`.
    unsafe { device.create_image_view(&info, None) }.map_err(Error::native(Artifact::ImageView))
}
