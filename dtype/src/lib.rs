//! Scalar element types shared by every zmora crate.
//!
//! `DType` covers the usual machine scalars plus the sub-byte types that only
//! exist as tensor-core operands (`Int4`, `UInt4`, `Int1`). `Handle` is the
//! opaque pointer type carried by buffer data variables and intrinsic calls.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumCount, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum DType {
    Bool,

    Int1,
    Int4,
    Int8,
    Int16,
    Int32,
    Int64,

    #[strum(serialize = "uint4")]
    UInt4,
    #[strum(serialize = "uint8")]
    UInt8,
    #[strum(serialize = "uint16")]
    UInt16,
    #[strum(serialize = "uint32")]
    UInt32,
    #[strum(serialize = "uint64")]
    UInt64,

    Float16,
    #[strum(serialize = "bfloat16")]
    BFloat16,
    Float32,
    Float64,

    /// Opaque pointer (buffer data vars, intrinsic call results).
    Handle,
    /// No data; metadata-only expressions.
    Void,
}

impl DType {
    pub const fn bits(&self) -> usize {
        match self {
            Self::Bool | Self::Int1 => 1,
            Self::Int4 | Self::UInt4 => 4,
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 16,
            Self::Int32 | Self::UInt32 | Self::Float32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Handle => 64,
            Self::Void => 0,
        }
    }

    /// Storage size rounded up to whole bytes.
    pub const fn bytes(&self) -> usize {
        self.bits().div_ceil(8)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int1 | Self::Int4 | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt4 | Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_integer(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    pub const fn is_handle(&self) -> bool {
        matches!(self, Self::Handle)
    }
}

/// Compute device identity.
///
/// Lives here rather than in `zmora-device` so that IR-level code can name a
/// device without depending on the probe machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSpec {
    Cpu,
    Cuda { device_id: usize },
}
