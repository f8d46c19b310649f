use super::RtpPayload;

/// Largest RTP payload emitted for video. NAL units above this size are
/// FU-A fragmented.
pub const MAX_PAYLOAD: usize = 1400;

/// FU-A fragment data per packet (payload ceiling minus FU indicator and FU header).
pub const MAX_FRAGMENT: usize = MAX_PAYLOAD - 2;

/// NAL unit type of a coded slice of an IDR picture.
pub const NAL_TYPE_IDR: u8 = 5;
/// NAL unit type of a sequence parameter set.
pub const NAL_TYPE_SPS: u8 = 7;
/// NAL unit type of a picture parameter set.
pub const NAL_TYPE_PPS: u8 = 8;
/// NAL unit type of an FU-A fragmentation unit (RFC 6184 §5.8).
pub const NAL_TYPE_FU_A: u8 = 28;

/// Extract NAL units from an H.264 Annex B bitstream.
///
/// H.264 Annex B bitstreams delimit NAL units with start codes:
/// - 4-byte: `0x00 0x00 0x00 0x01`
/// - 3-byte: `0x00 0x00 0x01`
///
/// Returns the data between start codes, excluding the start codes
/// themselves. The start code length is tracked per NAL so boundaries stay
/// correct when 3-byte and 4-byte start codes are mixed.
///
/// A non-empty buffer without any start code is returned as one unit, which
/// covers encoders that hand over bare NAL units.
pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    if start_entries.is_empty() {
        return if data.is_empty() { Vec::new() } else { vec![data] };
    }

    let mut nal_units = Vec::with_capacity(start_entries.len());
    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = match start_entries.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };

        if start < end {
            nal_units.push(&data[start..end]);
        }
    }

    nal_units
}

/// NAL unit type (low 5 bits of the NAL header byte).
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1f)
}

/// Whether any of the NAL units is an IDR slice.
pub fn is_key_frame(nal_units: &[&[u8]]) -> bool {
    nal_units
        .iter()
        .any(|nal| nal_type(nal) == Some(NAL_TYPE_IDR))
}

/// Find the first SPS and PPS in a codec-config buffer.
pub fn find_parameter_sets(data: &[u8]) -> (Option<&[u8]>, Option<&[u8]>) {
    let mut sps = None;
    let mut pps = None;
    for nal in extract_nal_units(data) {
        match nal_type(nal) {
            Some(NAL_TYPE_SPS) if sps.is_none() => sps = Some(nal),
            Some(NAL_TYPE_PPS) if pps.is_none() => pps = Some(nal),
            _ => {}
        }
    }
    (sps, pps)
}

/// Strip a leading Annex B start code, if any.
pub fn strip_start_code(nal: &[u8]) -> &[u8] {
    if nal.starts_with(&[0, 0, 0, 1]) {
        &nal[4..]
    } else if nal.starts_with(&[0, 0, 1]) {
        &nal[3..]
    } else {
        nal
    }
}

/// Split a single NAL unit into RTP payloads (RFC 6184).
///
/// - **Single NAL Unit** (§5.6): a NAL that fits in [`MAX_PAYLOAD`] is
///   sent as-is.
///
/// - **FU-A Fragmentation** (§5.8): larger NALs are split across packets,
///   each carrying a 2-byte FU header before the NAL payload:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MAX_PAYLOAD - 2 bytes)
///   ```
///
/// The original NAL header byte is not carried; the receiver rebuilds it
/// from the FU indicator's NRI and the FU header's type.
pub fn fragment_nal(nal_unit: &[u8]) -> Vec<Vec<u8>> {
    if nal_unit.is_empty() {
        return Vec::new();
    }

    if nal_unit.len() <= MAX_PAYLOAD {
        return vec![nal_unit.to_vec()];
    }

    let nal_header = nal_unit[0];
    let nal_type = nal_header & 0x1f;
    let nri = nal_header & 0x60;
    let fu_indicator = nri | NAL_TYPE_FU_A;

    let payload = &nal_unit[1..];
    let count = payload.len().div_ceil(MAX_FRAGMENT);
    let mut fragments = Vec::with_capacity(count);

    for (idx, chunk) in payload.chunks(MAX_FRAGMENT).enumerate() {
        let start_bit = if idx == 0 { 0x80 } else { 0x00 };
        let end_bit = if idx + 1 == count { 0x40 } else { 0x00 };

        let mut fragment = Vec::with_capacity(2 + chunk.len());
        fragment.push(fu_indicator);
        fragment.push(start_bit | end_bit | nal_type);
        fragment.extend_from_slice(chunk);
        fragments.push(fragment);
    }

    tracing::trace!(
        nal_type,
        nal_size = nal_unit.len(),
        fragments = fragments.len(),
        "FU-A fragmented NAL unit"
    );

    fragments
}

/// Packetize the NAL units of one access unit.
///
/// Per RFC 6184 §5.1, the marker bit is set only on the payload carrying
/// the last fragment of the last NAL unit.
pub fn packetize_access_unit(nal_units: &[&[u8]]) -> Vec<RtpPayload> {
    let mut payloads: Vec<RtpPayload> = nal_units
        .iter()
        .flat_map(|nal| fragment_nal(nal))
        .map(|data| RtpPayload {
            data,
            marker: false,
        })
        .collect();

    if let Some(last) = payloads.last_mut() {
        last.marker = true;
    }
    payloads
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- NAL extraction ---

    #[test]
    fn extract_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x65u8, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn extract_single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x67u8, 0x42, 0x00][..]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        data.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84]);
        let nals = extract_nal_units(&data);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0], &[0x67, 0x42]);
        assert_eq!(nals[1], &[0x68, 0xCE]);
        assert_eq!(nals[2], &[0x65, 0x88, 0x84]);
        for nal in nals {
            assert!(!nal.starts_with(&[0, 0, 1]));
        }
    }

    #[test]
    fn extract_empty_data() {
        assert!(extract_nal_units(&[]).is_empty());
    }

    #[test]
    fn extract_no_start_code_returns_whole_buffer() {
        let data = [0x65, 0xFF, 0xFE];
        assert_eq!(extract_nal_units(&data), vec![&data[..]]);
    }

    // --- Classification ---

    #[test]
    fn key_frame_detection() {
        let idr = [0x65u8, 0x00];
        let slice = [0x41u8, 0x00];
        let sps = [0x67u8, 0x42];
        assert!(is_key_frame(&[&sps, &idr]));
        assert!(!is_key_frame(&[&slice]));
        assert!(!is_key_frame(&[]));
    }

    #[test]
    fn parameter_sets_from_config_buffer() {
        let config = [0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e, 0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80];
        let (sps, pps) = find_parameter_sets(&config);
        assert_eq!(sps, Some(&[0x67, 0x42, 0x00, 0x1e][..]));
        assert_eq!(pps, Some(&[0x68, 0xce, 0x38, 0x80][..]));
    }

    #[test]
    fn strip_start_codes() {
        assert_eq!(strip_start_code(&[0, 0, 0, 1, 0x67]), &[0x67]);
        assert_eq!(strip_start_code(&[0, 0, 1, 0x68]), &[0x68]);
        assert_eq!(strip_start_code(&[0x65]), &[0x65]);
    }

    // --- Fragmentation ---

    #[test]
    fn small_nal_single_payload() {
        let nal = vec![0x65, 0xAA, 0xBB, 0xCC];
        assert_eq!(fragment_nal(&nal), vec![nal]);
    }

    #[test]
    fn nal_at_ceiling_not_fragmented() {
        let nal = vec![0x65; MAX_PAYLOAD];
        assert_eq!(fragment_nal(&nal).len(), 1);
    }

    #[test]
    fn large_nal_fragment_count_and_reassembly() {
        for size in [MAX_PAYLOAD + 1, 2797, 2798, 5000] {
            let mut nal = vec![0x65];
            nal.extend((1..size).map(|i| (i % 251) as u8));

            let fragments = fragment_nal(&nal);
            assert_eq!(fragments.len(), (size - 1).div_ceil(MAX_FRAGMENT), "size {size}");

            let reassembled: Vec<u8> = fragments.iter().flat_map(|f| f[2..].to_vec()).collect();
            assert_eq!(reassembled, nal[1..]);
        }
    }

    #[test]
    fn fu_a_headers() {
        let mut nal = vec![0x65]; // NRI=3, type=5
        nal.extend(vec![0xAA; MAX_PAYLOAD + 500]);
        let fragments = fragment_nal(&nal);
        assert_eq!(fragments.len(), 2);

        assert_eq!(fragments[0][0], 0x60 | 28); // NRI kept, FU-A type
        assert_eq!(fragments[0][1], 0x80 | 5); // Start bit + original type
        assert_eq!(fragments[1][1], 0x40 | 5); // End bit + original type
        assert!(fragments.iter().all(|f| f.len() <= MAX_PAYLOAD));
    }

    #[test]
    fn empty_nal_no_payloads() {
        assert!(fragment_nal(&[]).is_empty());
    }

    #[test]
    fn marker_only_on_last_payload_of_access_unit() {
        let sps = [0x67u8, 0x42];
        let mut idr = vec![0x65];
        idr.extend(vec![0x11; 3000]);
        let payloads = packetize_access_unit(&[&sps, &idr]);
        assert_eq!(payloads.len(), 1 + 3);
        assert!(payloads[..3].iter().all(|p| !p.marker));
        assert!(payloads[3].marker);
        assert_eq!(payloads[3].data[1] & 0x40, 0x40);
    }
}
