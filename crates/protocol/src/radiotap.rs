use byteorder::{ByteOrder, LittleEndian};

use crate::mac_string;

/// Length of the fixed link-layer header following the radiotap header.
pub const MAC_HEADER_LEN: usize = 24;

/// Transmitter address at bytes 10..16 of the link-layer header.
const MAC_OFFSET: usize = 10;
/// Sequence-control field at bytes 22..24.
const SEQ_CTRL_OFFSET: usize = 22;

/// Bit index of the signed dBm antenna-signal field.
const ANTENNA_SIGNAL_BIT: u32 = 5;

/// MAC address and sequence number recovered from the link-layer header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMeta {
    pub mac: [u8; 6],
    pub mac_str: String,
    /// Top 12 bits of the sequence-control field.
    pub seq: u16,
}

/// Extract transmitter MAC and sequence number.
///
/// The radiotap header length sits at bytes 2..4 (little-endian); the
/// link-layer header follows it. Returns None when the buffer cannot
/// hold both headers; callers treat that as "metadata unavailable".
pub fn parse_mac_seq(rt: &[u8]) -> Option<LinkMeta> {
    if rt.len() < 4 {
        return None;
    }
    let rt_len = LittleEndian::read_u16(&rt[2..4]) as usize;
    if rt.len() < rt_len + MAC_HEADER_LEN {
        return None;
    }

    let mac_hdr = &rt[rt_len..rt_len + MAC_HEADER_LEN];
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&mac_hdr[MAC_OFFSET..MAC_OFFSET + 6]);
    let seq_ctrl = LittleEndian::read_u16(&mac_hdr[SEQ_CTRL_OFFSET..SEQ_CTRL_OFFSET + 2]);

    Some(LinkMeta {
        mac,
        mac_str: mac_string(&mac),
        seq: seq_ctrl >> 4,
    })
}

/// (size, alignment) of the radiotap fields that can precede the
/// antenna-signal field. Unknown bits report size 0 and abort the walk.
fn field_size_align(bit: u32) -> (usize, usize) {
    match bit {
        0 => (8, 8),  // TSFT
        1 => (1, 1),  // Flags
        2 => (1, 1),  // Rate
        3 => (4, 2),  // Channel
        4 => (2, 1),  // FHSS
        5 => (1, 1),  // dBm antenna signal (i8)
        6 => (1, 1),  // dBm antenna noise
        7 => (2, 2),  // lock quality
        8 => (2, 2),  // TX attenuation
        9 => (2, 2),  // dB TX attenuation
        10 => (1, 1), // dBm TX power
        11 => (1, 1), // antenna index
        12 => (1, 1), // dB antenna signal
        13 => (1, 1), // dB antenna noise
        14 => (2, 2), // RX flags
        _ => (0, 1),
    }
}

/// Parse antenna signal strength (dBm) from a radiotap-style header.
///
/// Walks the present-bitmap chain (bit 31 of each word marks a
/// continuation word), then visits set field bits in increasing order,
/// aligning the cursor before each field, until the antenna-signal
/// field is reached. Returns None when the bitmap chain or any field
/// would cross the declared header length, or when bit 5 is absent.
pub fn parse_signal_dbm(rt: &[u8]) -> Option<i8> {
    if rt.len() < 8 {
        return None;
    }

    let rt_len = LittleEndian::read_u16(&rt[2..4]) as usize;
    let hdr_limit = rt_len.min(rt.len());

    let mut off = 4usize;
    let mut present = Vec::new();
    loop {
        if off + 4 > hdr_limit {
            return None;
        }
        let word = LittleEndian::read_u32(&rt[off..off + 4]);
        present.push(word);
        off += 4;
        if word & 0x8000_0000 == 0 {
            break;
        }
    }

    let bit_set = |b: u32| -> bool {
        let (idx, bit) = (b as usize / 32, b % 32);
        idx < present.len() && (present[idx] >> bit) & 1 != 0
    };

    for b in 0..64u32 {
        if !bit_set(b) {
            continue;
        }
        let (size, align) = field_size_align(b);
        if size == 0 {
            return None;
        }
        if align > 1 {
            off = (off + align - 1) & !(align - 1);
        }
        if off + size > hdr_limit {
            return None;
        }
        if b == ANTENNA_SIGNAL_BIT {
            return Some(rt[off] as i8);
        }
        off += size;
        if b > ANTENNA_SIGNAL_BIT {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a radiotap header with one present word and the given
    /// field payload bytes.
    fn rt_header(present: u32, fields: &[u8]) -> Vec<u8> {
        let len = (8 + fields.len()) as u16;
        let mut out = vec![0u8, 0u8];
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&present.to_le_bytes());
        out.extend_from_slice(fields);
        out
    }

    #[test]
    fn test_sequence_number_extraction() {
        // 8-byte radiotap header, bit 5 absent, then a 24-byte MAC header.
        let mut buf = rt_header(0, &[]);
        let mut mac_hdr = [0u8; MAC_HEADER_LEN];
        mac_hdr[10..16].copy_from_slice(&[0x02, 0x00, 0x00, 0xAB, 0xCD, 0xEF]);
        mac_hdr[22..24].copy_from_slice(&0x1230u16.to_le_bytes());
        buf.extend_from_slice(&mac_hdr);

        let meta = parse_mac_seq(&buf).expect("link meta");
        assert_eq!(meta.seq, 291);
        assert_eq!(meta.mac, [0x02, 0x00, 0x00, 0xAB, 0xCD, 0xEF]);
        assert_eq!(meta.mac_str, "02:00:00:ab:cd:ef");
    }

    #[test]
    fn test_mac_seq_too_short() {
        let buf = rt_header(0, &[]);
        // No MAC header after the radiotap header.
        assert_eq!(parse_mac_seq(&buf), None);
        assert_eq!(parse_mac_seq(&[0, 0, 8]), None);
    }

    #[test]
    fn test_signal_only_bit5() {
        let buf = rt_header(1 << 5, &[(-70i8) as u8]);
        assert_eq!(parse_signal_dbm(&buf), Some(-70));
    }

    #[test]
    fn test_signal_bit5_absent() {
        let buf = rt_header((1 << 1) | (1 << 2), &[0x12, 0x04]);
        assert_eq!(parse_signal_dbm(&buf), None);
    }

    #[test]
    fn test_signal_skips_aligned_fields() {
        // TSFT (8 bytes, align 8) + channel (4 bytes, align 2) + signal.
        let present = (1 << 0) | (1 << 3) | (1 << 5);
        let mut fields = vec![0u8; 8]; // TSFT
        fields.extend_from_slice(&[0x6c, 0x09, 0x80, 0x04]); // channel
        fields.push((-41i8) as u8);
        let buf = rt_header(present, &fields);
        assert_eq!(parse_signal_dbm(&buf), Some(-41));
    }

    #[test]
    fn test_signal_extended_bitmap() {
        // Continuation word, signal after the second present word.
        let len = (12 + 1) as u16;
        let mut buf = vec![0u8, 0u8];
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&(0x8000_0000u32 | (1 << 5)).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push((-55i8) as u8);
        assert_eq!(parse_signal_dbm(&buf), Some(-55));
    }

    #[test]
    fn test_signal_unterminated_bitmap() {
        // Every word flags a continuation; the chain exceeds the header.
        let len = 12u16;
        let mut buf = vec![0u8, 0u8];
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&0x8000_0000u32.to_le_bytes());
        buf.extend_from_slice(&0x8000_0000u32.to_le_bytes());
        assert_eq!(parse_signal_dbm(&buf), None);
    }

    #[test]
    fn test_signal_field_past_header_bound() {
        // Bit 5 set but declared length leaves no room for the byte.
        let mut buf = rt_header(1 << 5, &[(-70i8) as u8]);
        buf[2..4].copy_from_slice(&8u16.to_le_bytes());
        assert_eq!(parse_signal_dbm(&buf), None);
    }
}
