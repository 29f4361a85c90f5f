// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! Capture device backends and the registry that instantiates them.
//!
//! A device is selected by a backend name (`"dummy"`, or a real V4L2
//! backend on a host with the hardware present) plus a device path.
//! The registry pattern mirrors the teacher's rig-backend registry:
//! backend implementations register a factory under a normalized
//! name, and callers build a boxed trait object without knowing the
//! concrete type.

use std::collections::HashMap;

use pvr_core::device::CaptureDevice;

mod dummy;

pub use dummy::DummyDevice;

/// How to reach a capture device.
#[derive(Debug, Clone)]
pub enum DeviceAccess {
    /// A V4L2-style device node, e.g. `/dev/video0`.
    Path(String),
    /// The software backend used in development and in tests; carries
    /// only a label for logging.
    Dummy(String),
}

impl DeviceAccess {
    pub fn label(&self) -> &str {
        match self {
            DeviceAccess::Path(p) => p,
            DeviceAccess::Dummy(label) => label,
        }
    }
}

type BackendFactory = fn(DeviceAccess) -> Box<dyn CaptureDevice>;

/// Registers and instantiates capture device backends by name.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register_backend(&mut self, name: &str, factory: BackendFactory) {
        self.factories.insert(normalize_name(name), factory);
    }

    pub fn is_backend_registered(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_name(name))
    }

    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate a fresh device handle. Called by the capture worker
    /// once per recording; the returned handle is dropped (and the
    /// device released) when the capture finishes.
    pub fn build(&self, backend: &str, access: DeviceAccess) -> Result<Box<dyn CaptureDevice>, String> {
        let key = normalize_name(backend);
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| format!("unknown capture device backend: {backend}"))?;
        Ok(factory(access))
    }
}

/// Register every backend compiled into this binary. There is
/// currently only the software `DummyDevice`; a real V4L2 backend
/// would be feature-gated and added here the way the teacher gates
/// its serial rig backends.
pub fn register_builtin_backends(registry: &mut DeviceRegistry) {
    registry.register_backend("dummy", dummy_factory);
}

fn dummy_factory(access: DeviceAccess) -> Box<dyn CaptureDevice> {
    Box::new(DummyDevice::new(access.label().to_string()))
}

fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_backend_is_registered_by_default() {
        let mut reg = DeviceRegistry::new();
        register_builtin_backends(&mut reg);
        assert!(reg.is_backend_registered("Dummy"));
        assert!(reg.build("dummy", DeviceAccess::Dummy("test".into())).is_ok());
        assert!(reg.build("nonexistent", DeviceAccess::Dummy("test".into())).is_err());
    }
}
