//! Device-availability registry.
//!
//! A [`DeviceApi`] is the handle a backend exposes once its device has been
//! probed successfully. Passes consult [`device_api`] as a gate: `None` means
//! the device is unreachable from this process and device-specific rewrites
//! must not run.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use zmora_dtype::DeviceSpec;

/// Probe handle for a reachable device.
pub trait DeviceApi: Send + Sync {
    /// Backend kind name, e.g. `"cpu"` or `"cuda"`.
    fn kind(&self) -> &'static str;
}

/// Host CPU. Always reachable.
pub struct CpuDeviceApi;

impl DeviceApi for CpuDeviceApi {
    fn kind(&self) -> &'static str {
        "cpu"
    }
}

#[cfg(feature = "cuda")]
pub struct CudaDeviceApi {
    pub device_id: usize,
}

#[cfg(feature = "cuda")]
impl DeviceApi for CudaDeviceApi {
    fn kind(&self) -> &'static str {
        "cuda"
    }
}

struct DeviceRegistry {
    apis: RwLock<HashMap<DeviceSpec, Arc<dyn DeviceApi>>>,
}

impl DeviceRegistry {
    fn new() -> Self {
        Self { apis: RwLock::new(HashMap::new()) }
    }

    fn get(&self, spec: &DeviceSpec) -> Option<Arc<dyn DeviceApi>> {
        {
            let apis = self.apis.read();
            if let Some(api) = apis.get(spec) {
                return Some(Arc::clone(api));
            }
        }

        let mut apis = self.apis.write();
        if let Some(api) = apis.get(spec) {
            return Some(Arc::clone(api));
        }

        let api = Self::probe(spec)?;
        apis.insert(*spec, Arc::clone(&api));
        Some(api)
    }

    fn probe(spec: &DeviceSpec) -> Option<Arc<dyn DeviceApi>> {
        match spec {
            DeviceSpec::Cpu => Some(Arc::new(CpuDeviceApi)),
            #[cfg(feature = "cuda")]
            DeviceSpec::Cuda { device_id } => Some(Arc::new(CudaDeviceApi { device_id: *device_id })),
            #[cfg(not(feature = "cuda"))]
            DeviceSpec::Cuda { .. } => None,
        }
    }

    fn register(&self, spec: DeviceSpec, api: Arc<dyn DeviceApi>) {
        self.apis.write().insert(spec, api);
    }
}

static REGISTRY: Lazy<DeviceRegistry> = Lazy::new(DeviceRegistry::new);

/// Look up (or lazily probe) the API for a device. `None` means unavailable.
pub fn device_api(spec: &DeviceSpec) -> Option<Arc<dyn DeviceApi>> {
    REGISTRY.get(spec)
}

/// Install an API object for a device.
///
/// Embedders use this to expose devices the built-in probes do not know
/// about; tests use it to make a device "exist".
pub fn register_api(spec: DeviceSpec, api: Arc<dyn DeviceApi>) {
    REGISTRY.register(spec, api);
}
