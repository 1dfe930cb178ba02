//! Target description and device-availability probes.
//!
//! Compiler passes gate themselves on two questions: "what target am I
//! lowering for?" ([`Target::current`]) and "is that device actually
//! reachable from this process?" ([`registry::device_api`]). Both answers are
//! advisory: a pass that gets `None` simply declines to run.

pub mod error;
pub mod registry;
pub mod target;

pub use error::{Error, Result};
pub use registry::{DeviceApi, device_api, register_api};
pub use target::{Target, TargetKind, with_target};
pub use zmora_dtype::DeviceSpec;

/// Extension trait for parsing device strings.
pub trait DeviceSpecExt {
    /// Parse a device string into a [`DeviceSpec`].
    ///
    /// Examples: `"cpu"`, `"cuda"`, `"cuda:1"`.
    fn parse(s: &str) -> Result<DeviceSpec>;
}

impl DeviceSpecExt for DeviceSpec {
    fn parse(s: &str) -> Result<DeviceSpec> {
        let upper = s.to_uppercase();
        let mut parts = upper.split(':');
        let kind = parts.next().unwrap_or_default();
        let device_id = match parts.next() {
            Some(id) => {
                id.parse().map_err(|_| Error::InvalidDevice { device: s.to_string() })?
            }
            None => 0,
        };
        match kind {
            "CPU" => Ok(DeviceSpec::Cpu),
            "CUDA" | "GPU" => Ok(DeviceSpec::Cuda { device_id }),
            _ => error::InvalidDeviceSnafu { device: s.to_string() }.fail(),
        }
    }
}
