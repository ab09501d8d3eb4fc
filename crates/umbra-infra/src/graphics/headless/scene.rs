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

//! A secondary render path that only records what it was asked to draw.

use umbra_core::math::Vec3;
use umbra_core::renderer::api::Viewpoint;
use umbra_core::renderer::{GraphicsDevice, ResourceError};
use umbra_core::technique::{SceneGeometry, TechniqueCategory};

/// One recorded scene render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneRender {
    /// Eye of the viewpoint rendered from.
    pub eye: Vec3,
    /// Far plane of the viewpoint.
    pub far: f32,
    /// Categories requested.
    pub categories: TechniqueCategory,
}

/// A [`SceneGeometry`] that draws nothing and logs every request.
#[derive(Debug, Default)]
pub struct RecordingScene {
    renders: Vec<SceneRender>,
}

impl RecordingScene {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every render since creation or the last [`RecordingScene::clear`].
    pub fn renders(&self) -> &[SceneRender] {
        &self.renders
    }

    /// Forgets recorded renders.
    pub fn clear(&mut self) {
        self.renders.clear();
    }
}

impl SceneGeometry for RecordingScene {
    fn render_geometry(
        &mut self,
        _device: &dyn GraphicsDevice,
        viewpoint: &Viewpoint,
        categories: TechniqueCategory,
    ) -> Result<(), ResourceError> {
        self.renders.push(SceneRender {
            eye: viewpoint.position,
            far: viewpoint.far,
            categories,
        });
        Ok(())
    }
}
