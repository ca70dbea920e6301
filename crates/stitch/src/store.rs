use std::collections::HashMap;
use std::sync::Arc;

use slotmap::SlotMap;
use source::Pixel;

use crate::{SourcePair, StitchError, StitchedImage};

slotmap::new_key_type! {
    pub struct StitchHandle;
}

/// Stitched images registered by name.
pub struct StitchStore<T> {
    images: SlotMap<StitchHandle, Arc<StitchedImage<T>>>,
    by_name: HashMap<String, StitchHandle>,
}

impl<T: Pixel> Default for StitchStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pixel> StitchStore<T> {
    pub fn new() -> Self {
        Self {
            images: SlotMap::with_key(),
            by_name: HashMap::new(),
        }
    }

    pub fn insert(&mut self, image: Arc<StitchedImage<T>>) -> Result<StitchHandle, StitchError> {
        if self.by_name.contains_key(image.name()) {
            return Err(StitchError::DuplicateName(image.name().to_owned()));
        }
        let name = image.name().to_owned();
        let handle = self.images.insert(image);
        self.by_name.insert(name, handle);
        Ok(handle)
    }

    pub fn get(&self, handle: StitchHandle) -> Option<Arc<StitchedImage<T>>> {
        self.images.get(handle).cloned()
    }

    pub fn handle(&self, name: &str) -> Option<StitchHandle> {
        self.by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<StitchedImage<T>>> {
        self.handle(name).and_then(|handle| self.get(handle))
    }

    pub fn source_pair(&self, name: &str) -> Option<SourcePair<T>> {
        self.by_name(name).map(|image| image.source_pair())
    }

    /// Unregisters and disposes the image.
    pub fn remove(&mut self, handle: StitchHandle) -> Option<Arc<StitchedImage<T>>> {
        let image = self.images.remove(handle)?;
        self.by_name.remove(image.name());
        image.dispose();
        Some(image)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.images.values().map(|image| image.name())
    }
}
