pub mod frame;
pub mod iq;
pub mod radiotap;

/// RSSI value stored when the radio metadata carries no antenna-signal field.
pub const RSSI_DBM_MISSING: i8 = -128;

/// MAC substituted when the link-layer header cannot be parsed.
pub const MAC_UNKNOWN: [u8; 6] = [0; 6];

/// Format a MAC address as the usual colon-separated hex string.
pub fn mac_string(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_string() {
        assert_eq!(
            mac_string(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]),
            "de:ad:be:ef:00:01"
        );
        assert_eq!(mac_string(&MAC_UNKNOWN), "00:00:00:00:00:00");
    }
}
