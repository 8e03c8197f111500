// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Registry of connected filesystem endpoints
//!
//! One `UserlandFs` instance owns every endpoint the host knows, keyed by
//! filesystem name. Mount paths look endpoints up here; an endpoint leaves
//! the registry only when no volume uses it anymore, and dropping the
//! registry entry is what finally destroys the endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::file_system::FileSystem;

pub struct UserlandFs {
    file_systems: Mutex<HashMap<String, Arc<FileSystem>>>,
}

impl UserlandFs {
    pub fn new() -> Self {
        Self {
            file_systems: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connected endpoint under its filesystem name. Names are
    /// unique; a second endpoint for the same name is refused.
    pub fn register_file_system(&self, file_system: Arc<FileSystem>) -> BridgeResult<()> {
        let name = file_system.name().to_string();
        let mut file_systems = self.file_systems.lock().unwrap();
        if file_systems.contains_key(&name) {
            warn!(name, "filesystem already registered");
            return Err(BridgeError::BadValue);
        }
        info!(name, "filesystem registered");
        file_systems.insert(name, file_system);
        Ok(())
    }

    pub fn file_system(&self, name: &str) -> Option<Arc<FileSystem>> {
        self.file_systems.lock().unwrap().get(name).cloned()
    }

    /// Remove an endpoint. Refused while any of its volumes is still
    /// mounted; an unmount always removes its volume first, even when the
    /// server rejected or never answered it.
    pub fn unregister_file_system(&self, name: &str) -> BridgeResult<()> {
        let mut file_systems = self.file_systems.lock().unwrap();
        let Some(file_system) = file_systems.get(name) else {
            return Err(BridgeError::BadValue);
        };
        let mounted = file_system.volume_count();
        if mounted > 0 {
            warn!(name, mounted, "refusing to unregister a filesystem in use");
            return Err(BridgeError::BadValue);
        }
        file_systems.remove(name);
        info!(name, "filesystem unregistered");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.file_systems.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.file_systems.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for UserlandFs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::host::MockHostVnodeOps;
    use crate::types::VolumeId;
    use crate::volume::Volume;

    fn endpoint() -> Arc<FileSystem> {
        FileSystem::detached(Arc::new(MockHostVnodeOps::new()), BridgeConfig::default())
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = UserlandFs::new();
        let fs = endpoint();
        registry.register_file_system(Arc::clone(&fs)).unwrap();

        let found = registry.file_system("detached").expect("registered");
        assert!(Arc::ptr_eq(&found, &fs));
        assert_eq!(registry.len(), 1);

        drop(found);
        drop(fs);
        registry.unregister_file_system("detached").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_name_is_refused() {
        let registry = UserlandFs::new();
        registry.register_file_system(endpoint()).unwrap();
        assert_eq!(
            registry.register_file_system(endpoint()),
            Err(BridgeError::BadValue)
        );
    }

    #[test]
    fn test_unregister_unknown_name() {
        let registry = UserlandFs::new();
        assert_eq!(
            registry.unregister_file_system("nope"),
            Err(BridgeError::BadValue)
        );
    }

    #[test]
    fn test_unregister_refused_while_volumes_mounted() {
        let registry = UserlandFs::new();
        let fs = endpoint();
        let volume = Volume::new(&fs, VolumeId(1));
        fs.insert_volume(Arc::clone(&volume));
        registry.register_file_system(Arc::clone(&fs)).unwrap();

        assert_eq!(
            registry.unregister_file_system("detached"),
            Err(BridgeError::BadValue)
        );
    }
}
