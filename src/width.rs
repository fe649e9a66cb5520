use std::convert::TryFrom;

use crate::result::*;

/// A checked cast to a 16-bit count or offset field.
///
/// `0xFFFF` is reserved to mean "see the Zip64 record",
/// which we don't write, so it's out of bounds too.
pub fn u16_field<I: Into<u64>>(field: &'static str, i: I) -> ZipResult<u16> {
    let value: u64 = i.into();
    if value >= u16::MAX as u64 {
        return Err(ZipError::Unrepresentable { field, value });
    }
    Ok(value as u16)
}

/// A checked cast to a 32-bit size or offset field.
///
/// Like [`u16_field()`], the all-ones value is the Zip64 escape hatch.
pub fn u32_field<I: Into<u64>>(field: &'static str, i: I) -> ZipResult<u32> {
    let value: u64 = i.into();
    if value >= u32::MAX as u64 {
        return Err(ZipError::Unrepresentable { field, value });
    }
    Ok(value as u32)
}

/// A checked cast for length fields, which have no reserved values.
pub fn u16_length(field: &'static str, len: usize) -> ZipResult<u16> {
    u16::try_from(len).map_err(|_| ZipError::Unrepresentable {
        field,
        value: len as u64,
    })
}
