use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use serde::Serialize;

use rf_dsp::cfo;
use rf_dsp::iq_to_complex;
use rf_dsp::spectrogram::SpectrogramBuilder;
use rf_identity::model::EmbeddingModel;
use rf_identity::resolver::IdentityResolver;
use rf_output::aggregator::{CaptureAggregator, FrameRow};
use rf_output::sink::BatchSink;
use rf_protocol::iq::{IqRecord, TrimWindow};
use rf_protocol::{frame, iq, mac_string, radiotap, MAC_UNKNOWN, RSSI_DBM_MISSING};

/// Largest UDP payload the capture platform can send.
const MAX_DATAGRAM: usize = 65_535;
/// Pause between socket drains once the receive queue is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(2);
const STATS_EVERY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub port: u16,
    /// Expected preamble length in samples; 0 accepts any length.
    pub vector_len: usize,
    /// Rate the IQ payload was captured at, in Hz.
    pub sample_rate: f64,
    pub spec_width: usize,
    /// Enrollment cosine-distance threshold.
    pub threshold: f64,
    pub trim: Option<TrimWindow>,
    /// Frames per persisted batch in capture mode.
    pub batch_frames: usize,
    /// Exit after the first flush instead of rolling over.
    pub single_flush: bool,
}

/// One resolved frame, published to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    pub label: i32,
    pub is_new_device: bool,
    pub distance: f64,
    pub cfo_hz: f64,
    pub mac: String,
    pub seq: u16,
    pub rssi_dbm: i8,
    pub tsf: u64,
}

#[derive(Default)]
struct Counters {
    received: u64,
    truncated: u64,
    bad_iq: u64,
    length_mismatch: u64,
    short_frame: u64,
    bad_embedding: u64,
    unresolved: u64,
    resolved: u64,
    enrolled: u64,
}

impl Counters {
    fn dropped(&self) -> u64 {
        self.truncated + self.bad_iq + self.length_mismatch + self.short_frame
            + self.bad_embedding
    }

    fn report(&self, elapsed: Duration) {
        eprintln!(
            "[{:.1}s] frames: {} resolved: {} enrolled: {} dropped: {} \
             (trunc: {} iq: {} len: {} spec: {} embed: {}) unresolved: {}",
            elapsed.as_secs_f64(),
            self.received,
            self.resolved,
            self.enrolled,
            self.dropped(),
            self.truncated,
            self.bad_iq,
            self.length_mismatch,
            self.short_frame,
            self.bad_embedding,
            self.unresolved,
        );
    }
}

struct DecodedFrame {
    radio_tsf: u64,
    sample_tsf: u64,
    mac: [u8; 6],
    mac_str: String,
    seq: u16,
    rssi_dbm: i8,
    iq: IqRecord,
}

/// Decode one datagram through the envelope, metadata, and IQ layers.
/// Missing radio metadata is substituted with sentinels; envelope and
/// IQ failures drop the frame.
fn decode_datagram(
    datagram: &[u8],
    trim: Option<TrimWindow>,
    counters: &mut Counters,
) -> Option<DecodedFrame> {
    let env = match frame::decode(datagram) {
        Ok(env) => env,
        Err(e) => {
            counters.truncated += 1;
            log::warn!("dropping frame: {}", e);
            return None;
        }
    };

    let (mac, mac_str, seq) = match radiotap::parse_mac_seq(&env.radio_meta) {
        Some(meta) => (meta.mac, meta.mac_str, meta.seq),
        None => (MAC_UNKNOWN, mac_string(&MAC_UNKNOWN), 0),
    };
    let rssi_dbm = radiotap::parse_signal_dbm(&env.radio_meta).unwrap_or(RSSI_DBM_MISSING);

    let record = match iq::decode(&env.iq, trim) {
        Ok(record) => record,
        Err(e) => {
            counters.bad_iq += 1;
            log::warn!("dropping frame: {}", e);
            return None;
        }
    };

    Some(DecodedFrame {
        radio_tsf: env.radio_tsf,
        sample_tsf: env.sample_tsf,
        mac,
        mac_str,
        seq,
        rssi_dbm,
        iq: record,
    })
}

fn bind(port: u16) -> Result<UdpSocket, String> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .map_err(|e| format!("failed to bind UDP *:{}: {}", port, e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| format!("failed to set non-blocking: {}", e))?;
    log::info!("listening on UDP *:{}", port);
    Ok(socket)
}

/// Re-identification loop: decode each frame, characterize it, embed
/// it, and resolve it to a device label. Decisions stream to the
/// presentation layer over `events`.
pub fn run_identify(
    cfg: &PipelineConfig,
    model: &dyn EmbeddingModel,
    resolver: &mut IdentityResolver,
    events: Sender<DeviceEvent>,
) -> Result<(), String> {
    let socket = bind(cfg.port)?;
    let mut builder = SpectrogramBuilder::new(cfg.spec_width);
    let mut counters = Counters::default();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let start = Instant::now();
    let mut last_stats = Instant::now();

    loop {
        loop {
            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(format!("socket receive error: {}", e)),
            };
            if len < 8 {
                continue; // runt datagram, not even a header prefix
            }
            counters.received += 1;

            let Some(decoded) = decode_datagram(&buf[..len], cfg.trim, &mut counters) else {
                continue;
            };

            let samples = iq_to_complex(&decoded.iq.i, &decoded.iq.q);
            if cfg.vector_len > 0 && samples.len() != cfg.vector_len {
                counters.length_mismatch += 1;
                log::warn!(
                    "dropping frame: {} samples, expected {}",
                    samples.len(),
                    cfg.vector_len
                );
                continue;
            }

            let est = cfo::estimate(&samples, cfg.sample_rate);
            log::debug!(
                "[{}] seq {} cfo {:.1} Hz (coarse {:.1}, fine {:.1})",
                decoded.mac_str,
                decoded.seq,
                est.total_hz,
                est.coarse_hz,
                est.fine_hz
            );

            let spectrogram = match builder.build(&samples) {
                Ok(s) => s,
                Err(e) => {
                    counters.short_frame += 1;
                    log::warn!("dropping frame: {}", e);
                    continue;
                }
            };

            let embedding = match model.infer(&spectrogram) {
                Ok(v) => v,
                Err(e) => {
                    counters.bad_embedding += 1;
                    log::warn!("dropping frame: {}", e);
                    continue;
                }
            };
            if embedding.len() != model.embedding_len() {
                counters.bad_embedding += 1;
                log::warn!(
                    "dropping frame: model returned {} embedding values, expected {}",
                    embedding.len(),
                    model.embedding_len()
                );
                continue;
            }

            let decision = match resolver.resolve(&embedding, cfg.threshold) {
                Ok(d) => d,
                Err(e) => {
                    // Frame stays unresolved; the resolver guarantees
                    // nothing was enrolled for it.
                    counters.unresolved += 1;
                    log::error!("frame not resolved: {}", e);
                    continue;
                }
            };
            counters.resolved += 1;
            if decision.is_new_device {
                counters.enrolled += 1;
            }

            let event = DeviceEvent {
                label: decision.label,
                is_new_device: decision.is_new_device,
                distance: decision.distance,
                cfo_hz: est.total_hz,
                mac: decoded.mac_str,
                seq: decoded.seq,
                rssi_dbm: decoded.rssi_dbm,
                tsf: decoded.sample_tsf,
            };
            if events.send(event).is_err() {
                // Presentation side hung up; nothing left to publish to.
                return Ok(());
            }
        }

        if last_stats.elapsed() >= STATS_EVERY {
            counters.report(start.elapsed());
            last_stats = Instant::now();
        }
        std::thread::sleep(IDLE_SLEEP);
    }
}

/// Capture loop: decode each frame and buffer it for batch persistence.
/// Every exit path flushes whatever is buffered first.
pub fn run_capture(
    cfg: &PipelineConfig,
    aggregator: &mut CaptureAggregator,
    sink: &mut dyn BatchSink,
) -> Result<(), String> {
    let socket = bind(cfg.port)?;
    let mut counters = Counters::default();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let start = Instant::now();
    let mut last_stats = Instant::now();

    loop {
        loop {
            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    // Flush the partial batch before surfacing the error.
                    if let Err(fe) = flush_to_sink(aggregator, sink) {
                        log::error!("{}", fe);
                    }
                    return Err(format!("socket receive error: {}", e));
                }
            };
            if len < 8 {
                continue;
            }
            counters.received += 1;

            let Some(decoded) = decode_datagram(&buf[..len], cfg.trim, &mut counters) else {
                continue;
            };

            let appended = aggregator.append(FrameRow {
                radio_tsf: decoded.radio_tsf,
                sample_tsf: decoded.sample_tsf,
                mac: decoded.mac,
                mac_str: &decoded.mac_str,
                seq: decoded.seq,
                rssi_dbm: decoded.rssi_dbm,
                iq: &decoded.iq,
            });
            if !appended {
                counters.length_mismatch += 1;
                continue;
            }

            if aggregator.len() >= cfg.batch_frames {
                flush_to_sink(aggregator, sink)?;
                if cfg.single_flush {
                    counters.report(start.elapsed());
                    return Ok(());
                }
            }
        }

        if last_stats.elapsed() >= STATS_EVERY {
            counters.report(start.elapsed());
            eprintln!(
                "capture: {}/{} frames buffered (M = {:?})",
                aggregator.len(),
                cfg.batch_frames,
                aggregator.frame_len(),
            );
            last_stats = Instant::now();
        }
        std::thread::sleep(IDLE_SLEEP);
    }
}

fn flush_to_sink(
    aggregator: &mut CaptureAggregator,
    sink: &mut dyn BatchSink,
) -> Result<(), String> {
    if let Some(batch) = aggregator.flush() {
        sink.write(&batch)
            .map_err(|e| format!("batch persistence failed: {}", e))?;
    }
    Ok(())
}
