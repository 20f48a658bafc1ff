//! Annex B NAL unit scanner
//!
//! Single-pass scan of a byte buffer into typed NAL unit records. Both
//! 3-byte (`00 00 01`) and 4-byte (`00 00 00 01`) start codes are accepted
//! anywhere in the stream.

/// Coded slice of a non-IDR picture
pub const NAL_NON_IDR: u8 = 1;
/// Coded slice of an IDR picture (decode-from-here keyframe)
pub const NAL_IDR: u8 = 5;
/// Sequence parameter set
pub const NAL_SPS: u8 = 7;
/// Picture parameter set
pub const NAL_PPS: u8 = 8;

/// A NAL unit located inside a scanned buffer.
///
/// Offsets are relative to the buffer handed to [`scan`]; the record does
/// not own the bytes and is not retained beyond reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    /// NAL unit type (low 5 bits of the header byte, 0..31)
    pub nal_type: u8,
    /// Offset of the start code preceding this unit
    pub start_code: usize,
    /// Offset of the NAL header byte (first byte after the start code)
    pub offset: usize,
    /// Length of the unit from the header byte to the next start code
    /// or end of buffer
    pub size: usize,
}

impl NalUnit {
    /// Payload bytes of this unit (header byte included, start code excluded)
    pub fn bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset..self.offset + self.size]
    }

    /// The unit including its start code, suitable for direct
    /// concatenation into an Annex B stream
    pub fn annex_b<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start_code..self.offset + self.size]
    }
}

/// Position of the next start code at or after `from`, together with its
/// length (3 or 4 bytes). A `00 00 00 01` sequence is reported once, as a
/// 4-byte code.
fn find_start_code(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 {
            if buf[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= buf.len() && buf[i + 2] == 0 && buf[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Scan a buffer into its ordered list of NAL units.
///
/// A buffer without any start code yields an empty list; the caller must
/// treat that as "nothing to reconstruct", not as an error. Start codes
/// with no byte following them (truncated tail) are skipped.
pub fn scan(buf: &[u8]) -> Vec<NalUnit> {
    let mut units = Vec::new();
    let mut cursor = 0usize;

    while let Some((sc_pos, sc_len)) = find_start_code(buf, cursor) {
        let header = sc_pos + sc_len;
        if header >= buf.len() {
            break; // start code at the very end, no unit follows
        }

        let end = match find_start_code(buf, header) {
            Some((next, _)) => next,
            None => buf.len(),
        };

        units.push(NalUnit {
            nal_type: buf[header] & 0x1F,
            start_code: sc_pos,
            offset: header,
            size: end - header,
        });

        cursor = end;
    }

    units
}

/// True if the buffer contains a NAL unit of the given type.
pub fn contains_nal_type(buf: &[u8], target: u8) -> bool {
    scan(buf).iter().any(|u| u.nal_type == target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annex_b(units: &[(usize, &[u8])]) -> Vec<u8> {
        // (start code length, payload) pairs
        let mut out = Vec::new();
        for (sc, payload) in units {
            match sc {
                3 => out.extend_from_slice(&[0, 0, 1]),
                _ => out.extend_from_slice(&[0, 0, 0, 1]),
            }
            out.extend_from_slice(payload);
        }
        out
    }

    #[test]
    fn test_scan_empty_and_garbage() {
        assert!(scan(&[]).is_empty());
        assert!(scan(&[0x42]).is_empty());
        // No start code anywhere
        assert!(scan(&[0xFF; 64]).is_empty());
        // Zeros without the trailing 0x01 are not a start code
        assert!(scan(&[0, 0, 0, 0, 0, 0]).is_empty());
    }

    #[test]
    fn test_scan_mixed_start_codes() {
        let buf = annex_b(&[(4, &[0x67, 0xAA]), (3, &[0x68, 0xBB]), (4, &[0x65, 0x01, 0x02])]);
        let units = scan(&buf);

        assert_eq!(units.len(), 3);
        assert_eq!(units[0].nal_type, NAL_SPS);
        assert_eq!(units[1].nal_type, NAL_PPS);
        assert_eq!(units[2].nal_type, NAL_IDR);

        assert_eq!(units[0].bytes(&buf), &[0x67, 0xAA]);
        assert_eq!(units[1].bytes(&buf), &[0x68, 0xBB]);
        assert_eq!(units[2].bytes(&buf), &[0x65, 0x01, 0x02]);
        assert_eq!(units[1].annex_b(&buf), &[0, 0, 1, 0x68, 0xBB]);
    }

    #[test]
    fn test_scan_offsets_in_bounds() {
        // Buffers that end mid-start-code or right after one must not
        // produce out-of-bounds records
        let cases: Vec<Vec<u8>> = vec![
            vec![0, 0, 1],
            vec![0, 0, 0, 1],
            vec![0, 0, 1, 0x41],
            vec![0x41, 0, 0, 1, 0x65, 0, 0],
            annex_b(&[(3, &[0x01]), (3, &[0x41, 0, 0])]),
        ];
        for buf in cases {
            for unit in scan(&buf) {
                assert!(unit.offset + unit.size <= buf.len());
                assert!(unit.start_code < unit.offset);
                let _ = unit.bytes(&buf);
                let _ = unit.annex_b(&buf);
            }
        }
    }

    #[test]
    fn test_scan_concatenation_reproduces_stream() {
        let buf = annex_b(&[(4, &[0x67, 1, 2]), (4, &[0x68, 3]), (3, &[0x65, 4, 5, 6])]);
        let units = scan(&buf);
        let rebuilt: Vec<u8> = units.iter().flat_map(|u| u.annex_b(&buf).to_vec()).collect();
        assert_eq!(rebuilt, buf);
    }

    #[test]
    fn test_contains_nal_type() {
        let buf = annex_b(&[(4, &[0x67]), (4, &[0x41, 0xFF])]);
        assert!(contains_nal_type(&buf, NAL_SPS));
        assert!(contains_nal_type(&buf, NAL_NON_IDR));
        assert!(!contains_nal_type(&buf, NAL_IDR));
    }
}
