// src/binary_io.rs
//
// Raw native-endian primitives shared by the vector, matrix and model formats.
// There is no header, no checksum and no endianness marker.

use std::io::{self, Read, Write};

const F64_BYTES: usize = std::mem::size_of::<f64>();

pub(crate) fn write_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_ne_bytes())
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}

/// Reads a dimension field and checks it fits in `usize`.
pub(crate) fn read_dimension<R: Read>(reader: &mut R) -> io::Result<usize> {
    let raw = read_u64(reader)?;
    usize::try_from(raw).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("dimension field {} does not fit in usize", raw),
        )
    })
}

pub(crate) fn write_f64s<W: Write>(writer: &mut W, values: &[f64]) -> io::Result<()> {
    writer.write_all(bytemuck::cast_slice(values))
}

/// Reads exactly `count` native-endian f64 values.
///
/// The payload is pulled incrementally, so a corrupt length field ends in
/// `UnexpectedEof` instead of a huge up-front allocation.
pub(crate) fn read_f64s<R: Read>(reader: &mut R, count: usize) -> io::Result<Vec<f64>> {
    let byte_len = count.checked_mul(F64_BYTES).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("element count {} overflows the addressable size", count),
        )
    })?;
    let mut bytes = Vec::new();
    reader.take(byte_len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != byte_len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes of f64 payload, found {}", byte_len, bytes.len()),
        ));
    }
    let mut values = vec![0.0f64; count];
    bytemuck::cast_slice_mut::<f64, u8>(&mut values).copy_from_slice(&bytes);
    Ok(values)
}
