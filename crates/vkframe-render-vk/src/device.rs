// SPDX-License-Identifier: CEPL-1.0
//! Physical device choice and logical device bring-up.

use std::ffi::CStr;

use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::{debug, info};
use vkframe_render::RenderError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    #[inline]
    pub fn separate_present(&self) -> bool {
        self.graphics != self.present
    }
}

/// What one queue family can do, as far as family selection cares.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FamilyCaps {
    pub graphics: bool,
    pub present: bool,
}

/// First family that does both; otherwise the first graphics family paired
/// with the first present-capable one.
pub(crate) fn select_queue_families(families: &[FamilyCaps]) -> Option<QueueFamilies> {
    if let Some(i) = families.iter().position(|f| f.graphics && f.present) {
        return Some(QueueFamilies {
            graphics: i as u32,
            present: i as u32,
        });
    }
    let graphics = families.iter().position(|f| f.graphics)? as u32;
    let present = families.iter().position(|f| f.present)? as u32;
    Some(QueueFamilies { graphics, present })
}

/// Lower is better.
pub(crate) fn device_type_rank(ty: vk::PhysicalDeviceType) -> u8 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        _ => 4,
    }
}

/// Index of the best-ranked candidate; ties keep enumeration order.
pub(crate) fn best_device(types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    types
        .iter()
        .enumerate()
        .min_by_key(|&(i, &ty)| (device_type_rank(ty), i))
        .map(|(i, _)| i)
}

/// The chosen device with its queues and the properties later stages need.
pub(crate) struct Gpu {
    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub props: vk::PhysicalDeviceProperties,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
}

unsafe fn supports_swapchain(instance: &ash::Instance, phys: vk::PhysicalDevice) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default()
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
}

unsafe fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned()
}

pub(crate) unsafe fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let physicals = instance
        .enumerate_physical_devices()
        .context("vkEnumeratePhysicalDevices")?;
    if physicals.is_empty() {
        return Err(RenderError::NoSuitableDevice.into());
    }

    let mut saw_graphics = false;
    let mut candidates = Vec::new();
    for phys in physicals {
        let props = instance.get_physical_device_properties(phys);
        let caps: Vec<FamilyCaps> = instance
            .get_physical_device_queue_family_properties(phys)
            .iter()
            .enumerate()
            .map(|(i, q)| FamilyCaps {
                graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: surface_loader
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false),
            })
            .collect();
        saw_graphics |= caps.iter().any(|c| c.graphics);

        let families = select_queue_families(&caps);
        let usable = families.is_some() && supports_swapchain(instance, phys);
        debug!(
            "candidate {} ({:?}) families={:?} usable={}",
            device_name(&props),
            props.device_type,
            families,
            usable
        );
        if let (true, Some(families)) = (usable, families) {
            candidates.push((phys, props.device_type, families));
        }
    }

    if candidates.is_empty() {
        return Err(if saw_graphics {
            RenderError::NoQueueFamily("presentation to this surface")
        } else {
            RenderError::NoQueueFamily("graphics")
        }
        .into());
    }

    let types: Vec<_> = candidates.iter().map(|c| c.1).collect();
    let best = best_device(&types).ok_or(RenderError::NoSuitableDevice)?;
    let (phys, _, families) = candidates[best];
    Ok((phys, families))
}

impl Gpu {
    pub unsafe fn new(
        instance: &ash::Instance,
        phys: vk::PhysicalDevice,
        families: QueueFamilies,
    ) -> Result<Self> {
        let priorities = [1.0_f32];
        let mut queue_infos = vec![vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: families.graphics,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        }];
        if families.separate_present() {
            queue_infos.push(vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: families.present,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            });
        }

        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };
        let device = instance
            .create_device(phys, &dinfo, None)
            .context("vkCreateDevice")?;

        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);
        let props = instance.get_physical_device_properties(phys);
        let mem_props = instance.get_physical_device_memory_properties(phys);

        info!(
            "vk device: {} ({:?}), graphics family {}, present family {}{}",
            device_name(&props),
            props.device_type,
            families.graphics,
            families.present,
            if families.separate_present() { " (separate)" } else { "" }
        );

        Ok(Self {
            phys,
            device,
            families,
            graphics_queue,
            present_queue,
            props,
            mem_props,
        })
    }

    pub unsafe fn destroy(&self) {
        self.device.destroy_device(None);
    }
}
