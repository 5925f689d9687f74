//! Channel multiplexer and thread topology.
//!
//! Each channel runs its pipeline on a dedicated thread, handing
//! finished IQ line blocks to the mux over a bounded queue. The mux
//! thread mixes every channel through its offset oscillator into the
//! wideband stream and pushes blocks into the RF FIFO; a sink worker
//! drains the FIFO on its own timing. Cancellation is edge-triggered:
//! a shared abort flag plus FIFO close.

use crate::clock::Clock;
use crate::config::VideoConfig;
use crate::dsp::{Nco, Rational};
use crate::errors::{Result, SinkError, TxError};
use crate::pipeline::build_pipeline;
use crate::rf::{Fifo, RadioSink, ReadResult};
use crate::source::AvSource;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use num_complex::Complex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Queue depth between a channel worker and the mux, in lines.
const CHANNEL_QUEUE_LINES: usize = 30;

/// IQ pairs mixed per mux block.
const MUX_BLOCK_PAIRS: usize = 4096;

/// FIFO geometry for the sink hand-off.
const RF_FIFO_BLOCKS: usize = 32;
const RF_FIFO_BYTES: usize = MUX_BLOCK_PAIRS * 4;

/// One channel of the multiplex.
pub struct ChannelSpec {
    pub config: VideoConfig,
    pub source: Box<dyn AvSource>,
    /// Centre frequency offset within the wideband output.
    pub offset_hz: i64,
}

/// Run statistics, shared with the caller.
#[derive(Default)]
pub struct MuxStats {
    pub underruns: AtomicU64,
    pub samples: AtomicU64,
}

struct ChannelLane {
    rx: Receiver<Vec<i16>>,
    queue: VecDeque<i16>,
    nco: Option<Nco>,
    exhausted: bool,
}

fn channel_worker(
    spec: ChannelSpec,
    sample_rate: u32,
    clock: Arc<dyn Clock>,
    tx: Sender<Vec<i16>>,
    abort: Arc<AtomicBool>,
) -> Result<()> {
    let mut pipeline = build_pipeline(
        spec.config,
        sample_rate,
        sample_rate,
        spec.source,
        clock,
    )?;

    let mut block = Vec::new();
    while !abort.load(Ordering::Relaxed) {
        block.clear();
        pipeline.next_line_iq(&mut block)?;

        // Back-pressure: block until the mux drains the queue, but
        // keep watching the abort flag.
        let mut out = std::mem::take(&mut block);
        loop {
            match tx.try_send(out) {
                Ok(()) => break,
                Err(TrySendError::Full(b)) => {
                    if abort.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    out = b;
                    thread::sleep(Duration::from_micros(200));
                }
                Err(TrySendError::Disconnected(_)) => return Ok(()),
            }
        }
    }

    Ok(())
}

/// Run N channels into one sink until `abort` is raised or
/// `sample_limit` output samples have been produced.
pub fn run_channels(
    channels: Vec<ChannelSpec>,
    sample_rate: u32,
    mut sink: Box<dyn RadioSink>,
    clock: Arc<dyn Clock>,
    abort: Arc<AtomicBool>,
    sample_limit: Option<u64>,
    stats: Arc<MuxStats>,
) -> Result<()> {
    assert!(!channels.is_empty());

    let fifo = Fifo::new(RF_FIFO_BLOCKS, RF_FIFO_BYTES)?;
    let mut fifo_writer = fifo.writer();
    let mut fifo_reader = fifo.reader(Some(4));

    // Sink worker: drains the FIFO in its own time, as a device
    // callback would.
    let sink_abort = abort.clone();
    let sink_thread = thread::spawn(move || -> Result<()> {
        let mut sample_buf: Vec<i16> = Vec::with_capacity(RF_FIFO_BYTES / 2);
        loop {
            match fifo_reader.read(RF_FIFO_BYTES, true) {
                ReadResult::Data(bytes) => {
                    sample_buf.clear();
                    for b in bytes.chunks_exact(2) {
                        sample_buf.push(i16::from_ne_bytes([b[0], b[1]]));
                    }
                    if let Err(e) = sink.write_iq(&sample_buf) {
                        sink_abort.store(true, Ordering::Relaxed);
                        sink.close().ok();
                        return Err(e);
                    }
                }
                ReadResult::Eof => {
                    sink.close()?;
                    return Ok(());
                }
                ReadResult::WouldBlock => unreachable!("blocking read"),
            }
        }
    });

    // Channel workers.
    let mut lanes = Vec::new();
    let mut workers = Vec::new();
    for spec in channels {
        let (tx, rx) = bounded(CHANNEL_QUEUE_LINES);
        let nco = (spec.offset_hz != 0).then(|| {
            Nco::new(Rational::new(spec.offset_hz, 1), sample_rate, 1.0)
        });
        lanes.push(ChannelLane {
            rx,
            queue: VecDeque::new(),
            nco,
            exhausted: false,
        });

        let clock = clock.clone();
        let abort = abort.clone();
        workers.push(thread::spawn(move || {
            let r = channel_worker(spec, sample_rate, clock, tx, abort.clone());
            if let Err(e) = &r {
                log::error!("channel worker failed: {e}");
                abort.store(true, Ordering::Relaxed);
            }
            r
        }));
    }

    // The mux loop.
    let mut acc = vec![Complex::new(0i32, 0i32); MUX_BLOCK_PAIRS];
    let mut out_bytes = vec![0u8; MUX_BLOCK_PAIRS * 4];
    let mut produced: u64 = 0;
    let mut last_report = Instant::now();
    let mut report_underruns: u64 = 0;

    'mux: loop {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        if let Some(limit) = sample_limit {
            if produced >= limit {
                break;
            }
        }

        for c in acc.iter_mut() {
            *c = Complex::new(0, 0);
        }

        let single = lanes.len() == 1;

        for lane in &mut lanes {
            // Top the queue up without blocking the other channels.
            while lane.queue.len() < MUX_BLOCK_PAIRS * 2 {
                match lane.rx.try_recv() {
                    Ok(block) => lane.queue.extend(block),
                    Err(crossbeam_channel::TryRecvError::Empty) => {
                        if single && !lane.exhausted {
                            // One channel only: wait rather than pad.
                            match lane.rx.recv_timeout(Duration::from_millis(200)) {
                                Ok(block) => {
                                    lane.queue.extend(block);
                                    continue;
                                }
                                Err(_) => {
                                    if abort.load(Ordering::Relaxed) {
                                        break 'mux;
                                    }
                                    break;
                                }
                            }
                        }
                        break;
                    }
                    Err(crossbeam_channel::TryRecvError::Disconnected) => {
                        lane.exhausted = true;
                        break;
                    }
                }
            }

            let available = lane.queue.len() / 2;
            if available < MUX_BLOCK_PAIRS && !lane.exhausted {
                stats.underruns.fetch_add(1, Ordering::Relaxed);
                report_underruns += 1;
            }

            for (i, c) in acc.iter_mut().enumerate().take(MUX_BLOCK_PAIRS) {
                let (re, im) = if i < available {
                    (
                        lane.queue[i * 2] as i32,
                        lane.queue[i * 2 + 1] as i32,
                    )
                } else {
                    (0, 0)
                };

                let s = match &mut lane.nco {
                    Some(nco) => nco.mix_offset(Complex::new(re << 15, im << 15)),
                    None => Complex::new(re << 15, im << 15),
                };
                c.re += s.re >> 15;
                c.im += s.im >> 15;
            }

            lane.queue.drain(..(MUX_BLOCK_PAIRS * 2).min(lane.queue.len()));

            if lane.exhausted && lane.queue.is_empty() && single {
                break 'mux;
            }
        }

        // Clamp into int16 bytes and push through the FIFO.
        for (i, c) in acc.iter().enumerate() {
            let re = c.re.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            let im = c.im.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out_bytes[i * 4..i * 4 + 2].copy_from_slice(&re.to_ne_bytes());
            out_bytes[i * 4 + 2..i * 4 + 4].copy_from_slice(&im.to_ne_bytes());
        }

        if fifo_writer.write_all(&out_bytes).is_err() {
            break;
        }

        produced += MUX_BLOCK_PAIRS as u64;
        stats.samples.store(produced, Ordering::Relaxed);

        if last_report.elapsed() >= Duration::from_secs(1) {
            if report_underruns > 0 {
                log::warn!("mux: {report_underruns} underruns in the last second");
            }
            log::info!("mux: {produced} samples");
            report_underruns = 0;
            last_report = Instant::now();
        }
    }

    // Drain: close the FIFO, wake everything, collect the workers.
    abort.store(true, Ordering::Relaxed);
    fifo_writer.close();

    for w in workers {
        match w.join() {
            Ok(r) => r?,
            Err(_) => {
                return Err(TxError::Sink(SinkError::WriteFailed {
                    reason: "channel worker panicked".into(),
                }))
            }
        }
    }

    match sink_thread.join() {
        Ok(r) => r?,
        Err(_) => {
            return Err(TxError::Sink(SinkError::WriteFailed {
                reason: "sink worker panicked".into(),
            }))
        }
    }

    Ok(())
}
