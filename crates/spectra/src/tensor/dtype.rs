//! Element encodings understood by the engine and by the DLPack boundary.

use std::fmt;
use std::str::FromStr;

use crate::error::{ArrayError, ArrayResult};
use crate::ops::dispatch::dispatch_numeric;

/// Type code family, numbered like DLPack's `DLDataTypeCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTypeCode {
    Int,
    UInt,
    Float,
    Complex,
    Bool,
}

impl DataTypeCode {
    /// Returns the DLPack code for this family.
    pub fn tag(self) -> u8 {
        match self {
            DataTypeCode::Int => 0,
            DataTypeCode::UInt => 1,
            DataTypeCode::Float => 2,
            DataTypeCode::Complex => 5,
            DataTypeCode::Bool => 6,
        }
    }

    /// Reconstructs a code from its DLPack tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DataTypeCode::Int),
            1 => Some(DataTypeCode::UInt),
            2 => Some(DataTypeCode::Float),
            5 => Some(DataTypeCode::Complex),
            6 => Some(DataTypeCode::Bool),
            _ => None,
        }
    }
}

/// Immutable element descriptor: type family, bit width, and vector lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub code: DataTypeCode,
    pub bits: u8,
    pub lanes: u8,
}

impl DataType {
    pub const INT8: DataType = DataType::scalar(DataTypeCode::Int, 8);
    pub const INT16: DataType = DataType::scalar(DataTypeCode::Int, 16);
    pub const INT32: DataType = DataType::scalar(DataTypeCode::Int, 32);
    pub const INT64: DataType = DataType::scalar(DataTypeCode::Int, 64);
    pub const UINT8: DataType = DataType::scalar(DataTypeCode::UInt, 8);
    pub const UINT16: DataType = DataType::scalar(DataTypeCode::UInt, 16);
    pub const UINT32: DataType = DataType::scalar(DataTypeCode::UInt, 32);
    pub const UINT64: DataType = DataType::scalar(DataTypeCode::UInt, 64);
    pub const FLOAT16: DataType = DataType::scalar(DataTypeCode::Float, 16);
    pub const FLOAT32: DataType = DataType::scalar(DataTypeCode::Float, 32);
    pub const FLOAT64: DataType = DataType::scalar(DataTypeCode::Float, 64);
    pub const COMPLEX64: DataType = DataType::scalar(DataTypeCode::Complex, 64);
    pub const COMPLEX128: DataType = DataType::scalar(DataTypeCode::Complex, 128);
    pub const BOOL: DataType = DataType::scalar(DataTypeCode::Bool, 8);

    /// Single-lane descriptor.
    pub const fn scalar(code: DataTypeCode, bits: u8) -> Self {
        DataType {
            code,
            bits,
            lanes: 1,
        }
    }

    pub const fn new(code: DataTypeCode, bits: u8, lanes: u8) -> Self {
        DataType { code, bits, lanes }
    }

    /// Returns the number of bytes a single element occupies.
    pub fn size_in_bytes(self) -> usize {
        (self.bits as usize).div_ceil(8) * self.lanes as usize
    }

    /// IEEE float types of any width.
    pub fn is_float(self) -> bool {
        self.code == DataTypeCode::Float
    }

    /// Complex types; a lane holds two float components.
    pub fn is_complex(self) -> bool {
        self.code == DataTypeCode::Complex
    }

    /// Signed or unsigned integers.
    pub fn is_integer(self) -> bool {
        matches!(self.code, DataTypeCode::Int | DataTypeCode::UInt)
    }

    /// One byte per element, each 0 or 1.
    pub fn is_bool(self) -> bool {
        self.code == DataTypeCode::Bool
    }

    /// Whether the engine can store and compute on this dtype.
    pub fn is_supported(self) -> bool {
        self == DataType::BOOL
            || dispatch_numeric!(self, T => {
                std::mem::size_of::<T>() == self.size_in_bytes()
            }, else false)
    }

    /// Parses a textual dtype name such as `"float32"` or `"i64"`.
    pub fn parse(name: &str) -> ArrayResult<Self> {
        let dtype = match name.trim().to_ascii_lowercase().as_str() {
            "int8" | "i8" => DataType::INT8,
            "int16" | "i16" => DataType::INT16,
            "int32" | "i32" => DataType::INT32,
            "int64" | "i64" => DataType::INT64,
            "uint8" | "u8" => DataType::UINT8,
            "uint16" | "u16" => DataType::UINT16,
            "uint32" | "u32" => DataType::UINT32,
            "uint64" | "u64" => DataType::UINT64,
            "float16" | "f16" | "half" => DataType::FLOAT16,
            "float32" | "f32" | "float" => DataType::FLOAT32,
            "float64" | "f64" | "double" => DataType::FLOAT64,
            "complex64" | "c64" => DataType::COMPLEX64,
            "complex128" | "c128" => DataType::COMPLEX128,
            "bool" => DataType::BOOL,
            other => {
                return Err(ArrayError::type_error(format!(
                    "unknown dtype name '{other}'"
                )))
            }
        };
        Ok(dtype)
    }

    /// Ensures the dtype is single-lane, which every compute kernel requires.
    pub(crate) fn ensure_single_lane(self, op: &str) -> ArrayResult<()> {
        if self.lanes != 1 {
            return Err(ArrayError::type_error(format!(
                "{op} does not support vector dtype {self}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.code {
            DataTypeCode::Int => "int",
            DataTypeCode::UInt => "uint",
            DataTypeCode::Float => "float",
            DataTypeCode::Complex => "complex",
            DataTypeCode::Bool => "bool",
        };
        if self.code == DataTypeCode::Bool && self.bits == 8 {
            write!(f, "bool")?;
        } else {
            write!(f, "{family}{}", self.bits)?;
        }
        if self.lanes != 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

impl FromStr for DataType {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::parse(s)
    }
}
