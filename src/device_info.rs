use parking_lot::Mutex;

use crate::types::Device;

/// Most distinct SDK identities kept; later ones are dropped.
pub const MAX_FRONTEND_SDKS: usize = 32;
/// Longest accepted SDK name or version, in bytes.
pub const MAX_SDK_FIELD_LEN: usize = 64;

/// Frontend SDKs seen on incoming requests, reported to the core for diagnostics.
///
/// Entries are deduplicated by name and version and kept in first-seen order. The values
/// come from request headers, so the list is capped at [`MAX_FRONTEND_SDKS`] entries and
/// identities longer than [`MAX_SDK_FIELD_LEN`] bytes are ignored.
#[derive(Debug, Default)]
pub struct FrontendSdkRegistry {
    sdks: Mutex<Vec<Device>>,
}

impl FrontendSdkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an SDK identity. Returns `false` if it was already known or was rejected
    /// by the size limits.
    pub fn add(&self, device: Device) -> bool {
        if device.name.len() > MAX_SDK_FIELD_LEN || device.version.len() > MAX_SDK_FIELD_LEN {
            tracing::debug!("Ignoring oversized frontend SDK identity");
            return false;
        }
        let mut sdks = self.sdks.lock();
        if sdks.contains(&device) {
            return false;
        }
        if sdks.len() >= MAX_FRONTEND_SDKS {
            tracing::debug!(limit = MAX_FRONTEND_SDKS, "Frontend SDK registry full");
            return false;
        }
        tracing::debug!(name = %device.name, version = %device.version, "New frontend SDK seen");
        sdks.push(device);
        true
    }

    /// Snapshot of every SDK recorded so far.
    #[must_use]
    pub fn frontend_sdks(&self) -> Vec<Device> {
        self.sdks.lock().clone()
    }

    /// Forget every recorded SDK. Intended for test harnesses.
    pub fn reset(&self) {
        self.sdks.lock().clear();
    }
}
