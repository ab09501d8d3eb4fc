// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The shared layered array backing a technique's slots.

use std::borrow::Cow;
use umbra_core::renderer::api::{TextureArrayDescriptor, TextureFormat, TextureId};
use umbra_core::renderer::{GraphicsDevice, ResourceError};

/// A square 2D texture array holding `layers_per_slot` layers for every slot.
///
/// The array is created lazily by the first [`LayeredTarget::ensure_capacity`]
/// call that asks for at least one slot.
#[derive(Debug)]
pub struct LayeredTarget {
    texture: Option<TextureId>,
    layers_per_slot: u32,
    slots: u32,
    size: u32,
    mip_levels: u32,
    format: TextureFormat,
    label: Cow<'static, str>,
}

impl LayeredTarget {
    /// Describes a target. No GPU memory is allocated yet.
    pub fn new(
        layers_per_slot: u32,
        size: u32,
        mip_levels: u32,
        format: TextureFormat,
        label: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            texture: None,
            layers_per_slot: layers_per_slot.max(1),
            slots: 0,
            size: size.max(1),
            mip_levels: mip_levels.max(1),
            format,
            label: label.into(),
        }
    }

    /// The backing array, if allocated.
    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    /// Layers reserved per slot.
    pub fn layers_per_slot(&self) -> u32 {
        self.layers_per_slot
    }

    /// Slots the array currently holds.
    pub fn slot_capacity(&self) -> u32 {
        self.slots
    }

    /// Total layers in the array.
    pub fn layer_count(&self) -> u32 {
        self.slots * self.layers_per_slot
    }

    /// Width and height of each layer.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Mip levels of the array.
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    fn allocate(&self, device: &dyn GraphicsDevice, slots: u32) -> Result<TextureId, ResourceError> {
        device.create_texture_array(&TextureArrayDescriptor {
            label: Some(Cow::Borrowed(self.label.as_ref())),
            size: self.size,
            layers: slots * self.layers_per_slot,
            mip_levels: self.mip_levels,
            format: self.format,
        })
    }

    /// Resizes the array to exactly `slots` slots, keeping the layers both sizes share.
    ///
    /// Returns `true` if the array was recreated. Callers pass the allocator's
    /// high-water mark, so the depth never drops below the live slot count.
    pub fn ensure_capacity(&mut self, device: &dyn GraphicsDevice, slots: u32) -> Result<bool, ResourceError> {
        if slots == self.slots && (self.texture.is_some() || slots == 0) {
            return Ok(false);
        }
        if slots == 0 {
            if let Some(old) = self.texture.take() {
                device.destroy_texture(old)?;
            }
            self.slots = 0;
            return Ok(true);
        }

        let texture = self.allocate(device, slots)?;
        if let Some(old) = self.texture.replace(texture) {
            let kept = self.slots.min(slots) * self.layers_per_slot;
            if kept > 0 {
                device.copy_texture_layers(old, 0, texture, 0, kept)?;
            }
            device.destroy_texture(old)?;
        }
        log::debug!(
            "LayeredTarget({}): resized from {} to {} slots ({} layers)",
            self.label,
            self.slots,
            slots,
            slots * self.layers_per_slot
        );
        self.slots = slots;
        Ok(true)
    }

    /// Changes the layer resolution.
    ///
    /// Contents cannot survive a resolution change, so the array is recreated
    /// empty and `true` is returned: the owner must mark every producer stale.
    pub fn set_resolution(&mut self, device: &dyn GraphicsDevice, size: u32) -> Result<bool, ResourceError> {
        let size = size.max(1);
        if size == self.size {
            return Ok(false);
        }
        self.size = size;
        if let Some(old) = self.texture.take() {
            device.destroy_texture(old)?;
            self.texture = Some(self.allocate(device, self.slots)?);
        }
        log::info!("LayeredTarget({}): resolution set to {}", self.label, size);
        Ok(true)
    }

    /// Clears `count` layers starting at `first`. Does nothing before allocation.
    pub fn clear_layers(&self, device: &dyn GraphicsDevice, first: u32, count: u32) -> Result<(), ResourceError> {
        match self.texture {
            Some(texture) if count > 0 => device.clear_texture_layers(texture, first, count),
            _ => Ok(()),
        }
    }

    /// Releases the array.
    pub fn destroy(self, device: &dyn GraphicsDevice) {
        if let Some(texture) = self.texture {
            if let Err(e) = device.destroy_texture(texture) {
                log::warn!("LayeredTarget({}): Failed to destroy texture: {:?}", self.label, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_infra::{DeviceCommand, HeadlessDevice};

    fn target() -> LayeredTarget {
        LayeredTarget::new(6, 64, 1, TextureFormat::Rgba16Float, "Test")
    }

    #[test]
    fn test_allocation_is_lazy() {
        let device = HeadlessDevice::new();
        let mut target = target();
        assert!(!target.ensure_capacity(&device, 0).unwrap());
        assert_eq!(target.texture(), None);
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn test_growth_copies_existing_layers() {
        let device = HeadlessDevice::new();
        let mut target = target();
        assert!(target.ensure_capacity(&device, 2).unwrap());
        let first = target.texture().unwrap();
        assert!(!target.ensure_capacity(&device, 2).unwrap());

        assert!(target.ensure_capacity(&device, 3).unwrap());
        let second = target.texture().unwrap();
        assert_ne!(first, second);
        assert_eq!(device.texture_layers(second), Some(18));
        assert_eq!(device.live_texture_count(), 1);
        assert!(device.commands().contains(&DeviceCommand::CopyTextureLayers {
            source: first,
            source_layer: 0,
            destination: second,
            destination_layer: 0,
            count: 12,
        }));
    }

    #[test]
    fn test_resolution_change_recreates_empty() {
        let device = HeadlessDevice::new();
        let mut target = target();
        target.ensure_capacity(&device, 1).unwrap();
        let before = target.texture();
        device.clear_commands();

        assert!(!target.set_resolution(&device, 64).unwrap());
        assert!(target.set_resolution(&device, 128).unwrap());
        assert_eq!(target.size(), 128);
        assert_ne!(target.texture(), before);
        assert_eq!(target.layer_count(), 6);
        assert!(!device
            .commands()
            .iter()
            .any(|c| matches!(c, DeviceCommand::CopyTextureLayers { .. })));
    }

    #[test]
    fn test_clear_touches_only_requested_layers() {
        let device = HeadlessDevice::new();
        let mut target = target();
        target.clear_layers(&device, 0, 1).unwrap();
        assert!(device.commands().is_empty());

        target.ensure_capacity(&device, 2).unwrap();
        target.clear_layers(&device, 7, 1).unwrap();
        assert_eq!(
            device.commands().last(),
            Some(&DeviceCommand::ClearTextureLayers {
                texture: target.texture().unwrap(),
                first: 7,
                count: 1,
            })
        );
    }
}
