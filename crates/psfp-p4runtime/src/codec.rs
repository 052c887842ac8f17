// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Fixed-width value codec
//!
//! Device fields are unsigned big-endian bitstrings of a declared width.
//! Encoding masks the host value to that width and emits `ceil(width / 8)`
//! bytes. A value that needed more bits is not an error: the masked bytes are
//! returned together with a [`Truncation`] record that the caller logs.

use std::fmt;

use tracing::warn;

use crate::error::{P4RuntimeError, Result};
use crate::proto::p4runtime::{p4_data, P4Data};
use crate::schema::{DigestSpec, FieldSpec};

/// Widest field the codec handles
pub const MAX_BIT_WIDTH: u32 = 128;

/// A value was wider than its field and lost its high bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    pub original: u128,
    pub masked: u128,
    pub bit_width: u32,
}

impl fmt::Display for Truncation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "value {} exceeds {} bits, masked to {}",
            self.original, self.bit_width, self.masked
        )
    }
}

/// Encoded bytes plus the truncation that happened on the way, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub truncation: Option<Truncation>,
}

impl Encoded {
    /// Emit a warning naming `target` when the value was masked
    pub fn warn_if_truncated(&self, target: &str) {
        if let Some(t) = &self.truncation {
            warn!("[CODEC] {}: {}", target, t);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn check_width(bit_width: u32) -> Result<()> {
    if bit_width == 0 || bit_width > MAX_BIT_WIDTH {
        return Err(P4RuntimeError::InvalidBitWidth(bit_width));
    }
    Ok(())
}

/// All-ones mask of `bit_width` bits
pub fn width_mask(bit_width: u32) -> u128 {
    if bit_width >= MAX_BIT_WIDTH {
        u128::MAX
    } else {
        (1u128 << bit_width) - 1
    }
}

/// Number of bytes a field of `bit_width` bits occupies on the wire
pub fn byte_len(bit_width: u32) -> usize {
    bit_width.div_ceil(8) as usize
}

/// Encode `value` into a `bit_width`-bit big-endian bitstring
pub fn encode(value: u128, bit_width: u32) -> Result<Encoded> {
    check_width(bit_width)?;

    let masked = value & width_mask(bit_width);
    let truncation = (masked != value).then_some(Truncation {
        original: value,
        masked,
        bit_width,
    });

    let full = masked.to_be_bytes();
    let bytes = full[full.len() - byte_len(bit_width)..].to_vec();

    Ok(Encoded { bytes, truncation })
}

/// Decode a big-endian bitstring of a `bit_width`-bit field
///
/// Servers may send the shortest form (leading zero bytes stripped) or a
/// padded one; both are accepted. A value that does not fit the width is a
/// decode error.
pub fn decode(bytes: &[u8], bit_width: u32) -> Result<u128> {
    check_width(bit_width)?;

    let significant = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => return Ok(0),
    };
    if significant.len() > 16 {
        return Err(P4RuntimeError::Decode(format!(
            "{}-byte bitstring does not fit in {} bits",
            bytes.len(),
            bit_width
        )));
    }

    let value = significant
        .iter()
        .fold(0u128, |acc, b| (acc << 8) | u128::from(*b));
    if value & !width_mask(bit_width) != 0 {
        return Err(P4RuntimeError::Decode(format!(
            "value {} does not fit in {} bits",
            value, bit_width
        )));
    }
    Ok(value)
}

/// Encode a value for a field known to the schema, logging any truncation
pub fn encode_field(field: &FieldSpec, value: u128) -> Result<Vec<u8>> {
    let encoded = encode(value, field.bit_width)?;
    encoded.warn_if_truncated(&field.name);
    Ok(encoded.into_bytes())
}

/// Members of one decoded digest struct, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStruct {
    members: Vec<(String, u128)>,
}

impl DecodedStruct {
    /// Value of a member by name
    pub fn get(&self, name: &str) -> Result<u128> {
        self.members
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| P4RuntimeError::schema_lookup("digest member", name))
    }

    pub fn members(&self) -> &[(String, u128)] {
        &self.members
    }
}

/// Decode one digest entry using the member widths of its registered struct
///
/// Members arrive positionally; the schema supplies the name and width of each
/// position.
pub fn decode_struct(spec: &DigestSpec, data: &P4Data) -> Result<DecodedStruct> {
    let values: Vec<&P4Data> = match &data.data {
        Some(p4_data::Data::Struct(st)) => st.members.iter().collect(),
        // A single-member digest may be sent as a bare bitstring
        Some(p4_data::Data::Bitstring(_)) | Some(p4_data::Data::Bool(_)) => vec![data],
        None => {
            return Err(P4RuntimeError::Decode(format!(
                "digest '{}' entry carries no data",
                spec.name
            )))
        }
    };

    if values.len() != spec.members.len() {
        return Err(P4RuntimeError::Decode(format!(
            "digest '{}' has {} members, schema declares {}",
            spec.name,
            values.len(),
            spec.members.len()
        )));
    }

    let mut members = Vec::with_capacity(values.len());
    for (field, value) in spec.members.iter().zip(values) {
        let decoded = match &value.data {
            Some(p4_data::Data::Bitstring(bytes)) => decode(bytes, field.bit_width)?,
            Some(p4_data::Data::Bool(flag)) => u128::from(*flag),
            _ => {
                return Err(P4RuntimeError::Decode(format!(
                    "digest member '{}' is not a bitstring",
                    field.name
                )))
            }
        };
        members.push((field.name.clone(), decoded));
    }

    Ok(DecodedStruct { members })
}
