//! FIFO behaviour under realistic producer/consumer timing.

use retrotx_core::rf::{Fifo, ReadResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn slow_reader_limits_writer_lead() {
    // 4 blocks, one slow reader, one fast writer: the writer must
    // never get more than the ring ahead, and no data is lost.
    const BLOCK: usize = 4096;
    let fifo = Fifo::new(4, BLOCK).unwrap();
    let mut reader = fifo.reader(Some(1));
    let mut writer = fifo.writer();

    let written = Arc::new(AtomicU64::new(0));
    let wc = written.clone();

    let producer = thread::spawn(move || {
        let mut pattern = 0u8;
        let start = Instant::now();
        let mut blocks = 0u64;
        while start.elapsed() < Duration::from_millis(500) {
            let mut block = vec![0u8; BLOCK];
            for b in block.iter_mut() {
                *b = pattern;
                pattern = pattern.wrapping_add(1);
            }
            writer.write_all(&block).unwrap();
            blocks += 1;
            wc.store(blocks, Ordering::SeqCst);
        }
        writer.close();
        blocks
    });

    let mut pattern = 0u8;
    let mut read_blocks = 0u64;
    let mut read_bytes = 0usize;
    loop {
        match reader.read(BLOCK, true) {
            ReadResult::Data(d) => {
                for &b in d {
                    assert_eq!(b, pattern, "data corrupted at byte {read_bytes}");
                    pattern = pattern.wrapping_add(1);
                    read_bytes += 1;
                }
                read_blocks = (read_bytes / BLOCK) as u64;
                thread::sleep(Duration::from_millis(10));

                let w = written.load(Ordering::SeqCst);
                assert!(
                    w <= read_blocks + 4,
                    "writer {w} blocks vs reader {read_blocks}"
                );
            }
            ReadResult::Eof => break,
            ReadResult::WouldBlock => unreachable!(),
        }
    }

    let total = producer.join().unwrap();
    assert_eq!(read_bytes, total as usize * BLOCK);
}

#[test]
fn prefill_holds_first_read() {
    let fifo = Fifo::new(6, 128).unwrap();
    let mut reader = fifo.reader(Some(3));
    let mut writer = fifo.writer();

    // Two blocks written: the 3-block prefill is not met.
    writer.write_all(&[1u8; 256]).unwrap();
    assert!(matches!(reader.read(64, false), ReadResult::WouldBlock));

    // Third block arrives: reading unblocks.
    writer.write_all(&[2u8; 128]).unwrap();
    // Push the writer into the fourth block so block 3 is released.
    writer.write_all(&[3u8; 1]).unwrap();
    match reader.read(64, true) {
        ReadResult::Data(d) => assert_eq!(d[0], 1),
        _ => panic!("expected data after prefill"),
    }
}

#[test]
fn many_readers_all_drain() {
    const READERS: usize = 4;
    let fifo = Fifo::new(8, 512).unwrap();
    let mut readers: Vec<_> = (0..READERS).map(|_| fifo.reader(Some(1))).collect();
    let mut writer = fifo.writer();

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 239) as u8).collect();
    let expect = payload.clone();

    let handles: Vec<_> = readers
        .drain(..)
        .map(|mut r| {
            thread::spawn(move || {
                let mut got = Vec::new();
                loop {
                    match r.read(300, true) {
                        ReadResult::Data(d) => got.extend_from_slice(d),
                        ReadResult::Eof => break,
                        ReadResult::WouldBlock => unreachable!(),
                    }
                }
                got
            })
        })
        .collect();

    writer.write_all(&payload).unwrap();
    writer.close();

    for h in handles {
        assert_eq!(h.join().unwrap(), expect);
    }
}
