use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use rf_protocol::iq::IqRecord;

#[derive(Debug, Clone, Copy, Default)]
pub struct AggregatorConfig {
    /// Force the per-frame sample count instead of inferring it from
    /// the first appended frame.
    pub frame_len_override: Option<usize>,
    /// Drop frames whose sample count differs from the fixed length
    /// instead of padding/truncating them.
    pub strict_len: bool,
}

/// All decoded fields of one datagram, handed to the aggregator by
/// reference.
#[derive(Debug)]
pub struct FrameRow<'a> {
    pub radio_tsf: u64,
    pub sample_tsf: u64,
    pub mac: [u8; 6],
    pub mac_str: &'a str,
    pub seq: u16,
    pub rssi_dbm: i8,
    pub iq: &'a IqRecord,
}

/// Scalar metadata attached to a flushed batch.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchMeta {
    pub start_unix: f64,
    pub end_unix: f64,
    pub elapsed_seconds: f64,
    pub frames: usize,
    pub frame_len: usize,
    pub strict_len: bool,
    pub frame_len_override: Option<usize>,
}

/// Columnar capture batch: one entry per frame in every scalar column,
/// one fixed-length row per frame in every per-sample column.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureBatch {
    pub meta: BatchMeta,
    pub radio_tsf: Vec<u64>,
    pub sample_tsf: Vec<u64>,
    pub mac: Vec<[u8; 6]>,
    pub mac_str: Vec<String>,
    pub seq: Vec<u16>,
    pub rssi_dbm: Vec<i8>,
    /// Interleaved I,Q pairs, `2 * frame_len` values per row.
    pub iq: Vec<Vec<i16>>,
    pub agc_gain: Vec<Vec<u8>>,
    pub rssi_half_db: Vec<Vec<u16>>,
    pub ch_idle: Vec<Vec<u8>>,
    pub demod: Vec<Vec<u8>>,
    pub tx_rf: Vec<Vec<u8>>,
    pub fcs_ok: Vec<Vec<u8>>,
}

/// Zero-extend or truncate a per-sample array to exactly `m` elements.
fn pad_or_trim<T: Copy + Default>(src: &[T], m: usize) -> Vec<T> {
    let mut out = vec![T::default(); m];
    let n = m.min(src.len());
    out[..n].copy_from_slice(&src[..n]);
    out
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Buffers decoded frames column-wise until they are flushed as one
/// batch to a persistence collaborator.
pub struct CaptureAggregator {
    cfg: AggregatorConfig,
    frame_len: Option<usize>,
    started_at: f64,
    radio_tsf: Vec<u64>,
    sample_tsf: Vec<u64>,
    mac: Vec<[u8; 6]>,
    mac_str: Vec<String>,
    seq: Vec<u16>,
    rssi_dbm: Vec<i8>,
    iq: Vec<Vec<i16>>,
    agc_gain: Vec<Vec<u8>>,
    rssi_half_db: Vec<Vec<u16>>,
    ch_idle: Vec<Vec<u8>>,
    demod: Vec<Vec<u8>>,
    tx_rf: Vec<Vec<u8>>,
    fcs_ok: Vec<Vec<u8>>,
}

impl CaptureAggregator {
    pub fn new(cfg: AggregatorConfig) -> Self {
        Self {
            cfg,
            frame_len: cfg.frame_len_override,
            started_at: unix_now(),
            radio_tsf: Vec::new(),
            sample_tsf: Vec::new(),
            mac: Vec::new(),
            mac_str: Vec::new(),
            seq: Vec::new(),
            rssi_dbm: Vec::new(),
            iq: Vec::new(),
            agc_gain: Vec::new(),
            rssi_half_db: Vec::new(),
            ch_idle: Vec::new(),
            demod: Vec::new(),
            tx_rf: Vec::new(),
            fcs_ok: Vec::new(),
        }
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.radio_tsf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radio_tsf.is_empty()
    }

    /// Per-frame sample count, once known.
    pub fn frame_len(&self) -> Option<usize> {
        self.frame_len
    }

    /// Append one frame. Returns false when strict length checking
    /// rejects the frame.
    pub fn append(&mut self, row: FrameRow) -> bool {
        let m = match self.frame_len {
            Some(m) => {
                if self.cfg.strict_len && row.iq.len() != m {
                    return false;
                }
                m
            }
            None => {
                let m = row.iq.len();
                self.frame_len = Some(m);
                m
            }
        };

        self.radio_tsf.push(row.radio_tsf);
        self.sample_tsf.push(row.sample_tsf);
        self.mac.push(row.mac);
        self.mac_str.push(row.mac_str.to_string());
        self.seq.push(row.seq);
        self.rssi_dbm.push(row.rssi_dbm);

        let mut interleaved = vec![0i16; 2 * m];
        for (k, (&i, &q)) in row.iq.i.iter().zip(row.iq.q.iter()).take(m).enumerate() {
            interleaved[2 * k] = i;
            interleaved[2 * k + 1] = q;
        }
        self.iq.push(interleaved);

        self.agc_gain.push(pad_or_trim(&row.iq.agc_gain, m));
        self.rssi_half_db.push(pad_or_trim(&row.iq.rssi_half_db, m));
        self.ch_idle.push(pad_or_trim(&row.iq.ch_idle, m));
        self.demod.push(pad_or_trim(&row.iq.demod, m));
        self.tx_rf.push(pad_or_trim(&row.iq.tx_rf, m));
        self.fcs_ok.push(pad_or_trim(&row.iq.fcs_ok, m));
        true
    }

    /// Package everything buffered so far and clear the buffers.
    /// Returns None when nothing was accumulated.
    pub fn flush(&mut self) -> Option<CaptureBatch> {
        if self.is_empty() {
            return None;
        }
        let end = unix_now();
        let meta = BatchMeta {
            start_unix: self.started_at,
            end_unix: end,
            elapsed_seconds: end - self.started_at,
            frames: self.len(),
            frame_len: self.frame_len.unwrap_or(0),
            strict_len: self.cfg.strict_len,
            frame_len_override: self.cfg.frame_len_override,
        };

        let batch = CaptureBatch {
            meta,
            radio_tsf: std::mem::take(&mut self.radio_tsf),
            sample_tsf: std::mem::take(&mut self.sample_tsf),
            mac: std::mem::take(&mut self.mac),
            mac_str: std::mem::take(&mut self.mac_str),
            seq: std::mem::take(&mut self.seq),
            rssi_dbm: std::mem::take(&mut self.rssi_dbm),
            iq: std::mem::take(&mut self.iq),
            agc_gain: std::mem::take(&mut self.agc_gain),
            rssi_half_db: std::mem::take(&mut self.rssi_half_db),
            ch_idle: std::mem::take(&mut self.ch_idle),
            demod: std::mem::take(&mut self.demod),
            tx_rf: std::mem::take(&mut self.tx_rf),
            fcs_ok: std::mem::take(&mut self.fcs_ok),
        };

        // Rollover: the next batch's clock starts now.
        self.started_at = end;
        if self.cfg.frame_len_override.is_none() {
            self.frame_len = None;
        }
        Some(batch)
    }
}
