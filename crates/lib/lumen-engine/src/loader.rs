//! Renderpack loading seam between the engine and wherever packs come from.

use std::collections::HashMap;

use lumen_rhi::renderpack::RenderpackData;
use lumen_rhi::RhiError;

/// Source of renderpacks, looked up by name. Loading runs on a worker
/// thread, so implementations must be shareable.
pub trait RenderpackLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<RenderpackData, RhiError>;
}

/// Loader over packs registered up front. The sandbox and tests build their
/// packs in code and hand them to the engine through this.
#[derive(Default)]
pub struct StaticRenderpackLoader {
    packs: HashMap<String, RenderpackData>,
}

impl StaticRenderpackLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: RenderpackData) {
        self.packs.insert(name.into(), data);
    }
}

impl RenderpackLoader for StaticRenderpackLoader {
    fn load(&self, name: &str) -> Result<RenderpackData, RhiError> {
        self.packs
            .get(name)
            .cloned()
            .ok_or_else(|| RhiError::ResourceNotFound(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pack_is_reported() {
        let loader = StaticRenderpackLoader::new();
        assert!(matches!(
            loader.load("nonexistent"),
            Err(RhiError::ResourceNotFound(_))
        ));
    }
}
