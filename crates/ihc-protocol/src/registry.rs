//! The device-type registry.
//!
//! Device payloads only carry a type id; the registry resolves that id to
//! the full [`DeviceType`] decoded from an earlier type listing. Entries
//! are keyed by id, kept in insertion order, and never removed: a later
//! listing refreshes an entry in place but does not shrink the registry.

use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;

use crate::DeviceType;

/// Insertion-ordered cache of device types, shared by the session
/// manager, the codec and notification consumers.
#[derive(Debug, Default)]
pub struct DeviceTypeRegistry {
    types: RwLock<IndexMap<u32, Arc<DeviceType>>>,
}

impl DeviceTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or refreshes) a type and returns the stored entry.
    ///
    /// A refreshed entry keeps its original position. If the type's image
    /// filename did not change, an already loaded image is carried over.
    pub fn insert(&self, mut device_type: DeviceType) -> Arc<DeviceType> {
        let mut types =
            self.types.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = types.get(&device_type.id) {
            if device_type.image.is_none()
                && previous.image_filename == device_type.image_filename
            {
                device_type.image = previous.image.clone();
            }
        }

        let entry = Arc::new(device_type);
        types.insert(entry.id, Arc::clone(&entry));
        entry
    }

    /// Stores the loaded image bytes for a type.
    ///
    /// Returns `false` if the type is not registered.
    pub fn set_image(&self, id: u32, image: Vec<u8>) -> bool {
        let mut types =
            self.types.write().unwrap_or_else(PoisonError::into_inner);

        let Some(slot) = types.get_mut(&id) else {
            return false;
        };
        let mut updated = DeviceType::clone(slot);
        updated.image = Some(image.into());
        *slot = Arc::new(updated);
        true
    }

    /// Looks up a type by id.
    pub fn get(&self, id: u32) -> Option<Arc<DeviceType>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Returns every registered type in insertion order.
    pub fn list(&self) -> Vec<Arc<DeviceType>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Returns the types that name an image which has not been loaded yet.
    pub fn pending_images(&self) -> Vec<Arc<DeviceType>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| t.image_filename.is_some() && !t.is_image_loaded())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_type(id: u32, name: &str, image: Option<&str>) -> DeviceType {
        DeviceType {
            id,
            name: name.into(),
            color: None,
            image_filename: image.map(str::to_string),
            commands: Vec::new(),
            image: None,
        }
    }

    #[test]
    fn test_insert_keeps_insertion_order() {
        let registry = DeviceTypeRegistry::new();
        registry.insert(device_type(9, "Sensor", None));
        registry.insert(device_type(2, "Lamp", None));
        registry.insert(device_type(5, "Plug", None));

        let ids: Vec<u32> = registry.list().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![9, 2, 5]);
    }

    #[test]
    fn test_insert_existing_refreshes_in_place() {
        let registry = DeviceTypeRegistry::new();
        registry.insert(device_type(1, "Lamp", None));
        registry.insert(device_type(2, "Plug", None));
        registry.insert(device_type(1, "Light", None));

        assert_eq!(registry.len(), 2);
        let list = registry.list();
        assert_eq!(list[0].id, 1);
        assert_eq!(list[0].name, "Light");
    }

    #[test]
    fn test_set_image_unknown_type_returns_false() {
        let registry = DeviceTypeRegistry::new();
        assert!(!registry.set_image(3, vec![1, 2, 3]));
    }

    #[test]
    fn test_refresh_with_same_filename_keeps_image() {
        let registry = DeviceTypeRegistry::new();
        registry.insert(device_type(1, "Lamp", Some("lamp.png")));
        assert!(registry.set_image(1, vec![7, 7]));

        registry.insert(device_type(1, "Lamp", Some("lamp.png")));
        let image = registry.get(1).and_then(|t| t.image.clone());
        assert_eq!(image.as_deref(), Some(&[7u8, 7][..]));

        registry.insert(device_type(1, "Lamp", Some("lamp2.png")));
        assert!(!registry.get(1).is_some_and(|t| t.is_image_loaded()));
    }

    #[test]
    fn test_pending_images_skips_loaded_and_imageless() {
        let registry = DeviceTypeRegistry::new();
        registry.insert(device_type(1, "Lamp", Some("lamp.png")));
        registry.insert(device_type(2, "Plug", None));
        registry.insert(device_type(3, "Fan", Some("fan.png")));
        registry.set_image(3, vec![0]);

        let pending: Vec<u32> =
            registry.pending_images().iter().map(|t| t.id).collect();
        assert_eq!(pending, vec![1]);
    }
}
