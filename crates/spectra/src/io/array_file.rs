//! Single-array binary persistence.
//!
//! Layout, all little-endian:
//!
//! ```text
//! magic "SPECTRA1" | version u32 | ndim u32 | bits u8 | code u8 | device kind u8 |
//! device index i32 | shape i64[ndim] | strides i64[ndim] | offsets i64[ndim] | payload
//! ```
//!
//! Strides and offsets are in bytes. Arrays are always written contiguously, so the stored
//! strides are the row-major strides of the shape and the offsets are zero.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::slice;

use crate::error::{ArrayError, ArrayResult};
use crate::tensor::shape::{self, Dims};
use crate::tensor::storage::output_bytes;
use crate::tensor::{DataType, DataTypeCode, Device, DeviceKind, NdArray, StorageBuffer};

const MAGIC: &[u8; 8] = b"SPECTRA1";
const VERSION_V1: u32 = 1;
const MAX_RANK: usize = 64;

/// Serialises `array` into `writer`. Non-contiguous arrays are materialised first.
pub fn write_array<W: Write>(array: &NdArray, writer: &mut W) -> ArrayResult<()> {
    array.ensure_cpu("write_array")?;
    array.dtype().ensure_single_lane("write_array")?;
    let contiguous = if array.is_contiguous() {
        array.clone()
    } else {
        array.copy()?
    };
    let dtype = contiguous.dtype();
    let device = contiguous.device();
    let ndim = contiguous.ndim();

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION_V1.to_le_bytes())?;
    writer.write_all(&(ndim as u32).to_le_bytes())?;
    writer.write_all(&[dtype.bits, dtype.code.tag(), device.kind.tag() as u8])?;
    writer.write_all(&device.index.to_le_bytes())?;
    for &dim in contiguous.shape() {
        writer.write_all(&dim.to_le_bytes())?;
    }
    for stride in shape::contiguous_strides(contiguous.shape(), dtype.size_in_bytes())? {
        writer.write_all(&stride.to_le_bytes())?;
    }
    for _ in 0..ndim {
        writer.write_all(&0i64.to_le_bytes())?;
    }

    let len = contiguous.numel() as usize * dtype.size_in_bytes();
    if len > 0 {
        let payload = unsafe { slice::from_raw_parts(contiguous.data_ptr_raw(), len) };
        if cfg!(target_endian = "little") {
            writer.write_all(payload)?;
        } else {
            let mut swapped = payload.to_vec();
            swap_components(&mut swapped, dtype);
            writer.write_all(&swapped)?;
        }
    }
    log::debug!("wrote {contiguous} ({len} payload bytes)");
    Ok(())
}

/// Reads one array written by [`write_array`] into a fresh contiguous CPU array.
pub fn read_array<R: Read>(reader: &mut R) -> ArrayResult<NdArray> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(ArrayError::value("invalid array file magic header"));
    }
    let version = read_u32(reader)?;
    if version != VERSION_V1 {
        return Err(ArrayError::value(format!(
            "unsupported array file version {version}"
        )));
    }
    let ndim = read_u32(reader)? as usize;
    if ndim > MAX_RANK {
        return Err(ArrayError::value(format!(
            "array file declares rank {ndim}, more than the supported {MAX_RANK}"
        )));
    }

    let mut header = [0u8; 3];
    reader.read_exact(&mut header)?;
    let [bits, code, kind] = header;
    let code = DataTypeCode::from_tag(code)
        .ok_or_else(|| ArrayError::type_error(format!("unknown dtype code {code} in array file")))?;
    let dtype = DataType::scalar(code, bits);
    if !dtype.is_supported() {
        return Err(ArrayError::type_error(format!(
            "array file stores unsupported dtype {dtype}"
        )));
    }
    let kind = DeviceKind::from_tag(kind as i32)
        .ok_or_else(|| ArrayError::device(format!("unknown device kind {kind} in array file")))?;
    let device = Device::new(kind, read_i32(reader)?);
    if !device.is_cpu() {
        return Err(ArrayError::device(format!(
            "array file records device {device}; only cpu arrays can be loaded"
        )));
    }

    let shape = read_dims(reader, ndim)?;
    let strides = read_dims(reader, ndim)?;
    let offsets = read_dims(reader, ndim)?;
    shape::validate_shape(&shape)?;
    let expected = shape::contiguous_strides(&shape, dtype.size_in_bytes())?;
    let strides_ok = shape
        .iter()
        .zip(strides.iter().zip(expected.iter()))
        .all(|(&dim, (&stored, &wanted))| dim <= 1 || stored == wanted);
    if !strides_ok || offsets.iter().any(|&o| o != 0) {
        return Err(ArrayError::value(format!(
            "array file layout strides={strides:?} offsets={offsets:?} is not contiguous for shape {shape:?}"
        )));
    }

    let len = output_bytes(&shape, dtype)?;
    let buffer = StorageBuffer::allocate_zeroed(len)?;
    if len > 0 {
        let payload = unsafe { slice::from_raw_parts_mut(buffer.as_mut_ptr(), len) };
        reader.read_exact(payload)?;
        if cfg!(target_endian = "big") {
            swap_components(payload, dtype);
        }
    }
    let array = NdArray::contiguous(buffer, &shape, dtype)?;
    log::debug!("read {array} ({len} payload bytes)");
    Ok(array)
}

/// Serialises `array` into an in-memory array file.
pub fn write_to_bytes(array: &NdArray) -> ArrayResult<Vec<u8>> {
    let mut bytes = Vec::new();
    write_array(array, &mut bytes)?;
    Ok(bytes)
}

/// Parses an array file held in memory.
pub fn read_from_bytes(bytes: &[u8]) -> ArrayResult<NdArray> {
    let mut cursor = bytes;
    read_array(&mut cursor)
}

/// Writes `array` to `path`, replacing any existing file.
pub fn write_to_file(array: &NdArray, path: impl AsRef<Path>) -> ArrayResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_array(array, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Reads an array file from `path`.
pub fn read_from_file(path: impl AsRef<Path>) -> ArrayResult<NdArray> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    read_array(&mut reader)
}

/// Reverses the bytes of every scalar component; complex elements swap each half.
fn swap_components(bytes: &mut [u8], dtype: DataType) {
    let width = if dtype.is_complex() {
        dtype.size_in_bytes() / 2
    } else {
        dtype.size_in_bytes()
    };
    if width > 1 {
        for chunk in bytes.chunks_exact_mut(width) {
            chunk.reverse();
        }
    }
}

fn read_u32(reader: &mut impl Read) -> ArrayResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32(reader: &mut impl Read) -> ArrayResult<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64(reader: &mut impl Read) -> ArrayResult<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_dims(reader: &mut impl Read, ndim: usize) -> ArrayResult<Dims> {
    (0..ndim).map(|_| read_i64(reader)).collect()
}
