use crate::error::{Result, RtspError};

/// Largest access unit expressible in the 13-bit AU-size field.
pub const MAX_ACCESS_UNIT: usize = (1 << 13) - 1;

/// AU-headers-length value: one 16-bit AU header, counted in bits.
const AU_HEADERS_LENGTH_BITS: u16 = 16;

/// Frame one AAC access unit as an RFC 3640 AAC-hbr payload.
///
/// ```text
/// AU-headers-length: 16            (2 bytes, bit count)
/// AU-header:         [size:13|index:3]  (2 bytes, index = 0)
/// Access unit:       [...]
/// ```
///
/// Exactly one access unit per payload; the caller sets the marker bit on
/// every audio packet.
pub fn frame_access_unit(access_unit: &[u8]) -> Result<Vec<u8>> {
    if access_unit.len() > MAX_ACCESS_UNIT {
        return Err(RtspError::PayloadTooLarge {
            size: access_unit.len(),
            max: MAX_ACCESS_UNIT,
        });
    }

    let au_header = (access_unit.len() as u16) << 3;

    let mut payload = Vec::with_capacity(4 + access_unit.len());
    payload.extend_from_slice(&AU_HEADERS_LENGTH_BITS.to_be_bytes());
    payload.extend_from_slice(&au_header.to_be_bytes());
    payload.extend_from_slice(access_unit);
    Ok(payload)
}

/// SDP `a=fmtp` parameters for AAC-hbr (RFC 3640 §3.3.6), without the
/// `a=fmtp:<pt> ` prefix.
pub fn fmtp_parameters(config_base64: &str) -> String {
    format!(
        "profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3;config={}",
        config_base64
    )
}
