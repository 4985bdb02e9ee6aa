use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Fixed envelope header: two u64 timestamps + two u16 payload lengths.
pub const HEADER_LEN: usize = 20;

/// One capture datagram after outer framing has been removed.
///
/// `radio_meta` holds the radiotap-style header plus the link-layer
/// header captured on the monitor interface; `iq` holds the raw IQ
/// side-channel blob from the radio platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEnvelope {
    /// TSF stamped by the monitor-interface capture path.
    pub radio_tsf: u64,
    /// TSF stamped by the IQ side channel.
    pub sample_tsf: u64,
    pub radio_meta: Vec<u8>,
    pub iq: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated capture envelope: got {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },
}

/// Decode one capture datagram.
///
/// Layout: `u64 radio_tsf | u64 sample_tsf | u16 meta_len | u16 iq_len`
/// (all little-endian) followed by `meta_len` metadata bytes and
/// `iq_len` IQ bytes.
pub fn decode(datagram: &[u8]) -> Result<CaptureEnvelope, FrameError> {
    if datagram.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            got: datagram.len(),
            need: HEADER_LEN,
        });
    }

    let radio_tsf = LittleEndian::read_u64(&datagram[0..8]);
    let sample_tsf = LittleEndian::read_u64(&datagram[8..16]);
    let meta_len = LittleEndian::read_u16(&datagram[16..18]) as usize;
    let iq_len = LittleEndian::read_u16(&datagram[18..20]) as usize;

    let need = HEADER_LEN + meta_len + iq_len;
    if datagram.len() < need {
        return Err(FrameError::Truncated {
            got: datagram.len(),
            need,
        });
    }

    let meta_end = HEADER_LEN + meta_len;
    Ok(CaptureEnvelope {
        radio_tsf,
        sample_tsf,
        radio_meta: datagram[HEADER_LEN..meta_end].to_vec(),
        iq: datagram[meta_end..meta_end + iq_len].to_vec(),
    })
}

/// Encode an envelope back to wire form. Payloads longer than u16::MAX
/// are not representable and are truncated by the length fields; the
/// capture platform never produces them.
pub fn encode(env: &CaptureEnvelope) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + env.radio_meta.len() + env.iq.len());
    out.extend_from_slice(&env.radio_tsf.to_le_bytes());
    out.extend_from_slice(&env.sample_tsf.to_le_bytes());
    out.extend_from_slice(&(env.radio_meta.len() as u16).to_le_bytes());
    out.extend_from_slice(&(env.iq.len() as u16).to_le_bytes());
    out.extend_from_slice(&env.radio_meta);
    out.extend_from_slice(&env.iq);
    out
}
