//! Single-writer / multi-reader block FIFO.
//!
//! A fixed ring of byte blocks. The writer owns exactly one block at a
//! time (`writing` set); readers pin the block they are consuming
//! (`readers` count). A block is recycled only once every reader has
//! left it, and a zero-length block marks end-of-stream. Every block
//! has its own mutex and condvar, so readers of different blocks never
//! contend.

use crate::errors::{FifoError, Result, TxError};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

struct BlockState {
    readers: usize,
    writing: bool,
    length: usize,
}

struct Block {
    state: Mutex<BlockState>,
    cond: Condvar,
    data: UnsafeCell<Box<[u8]>>,
}

// Block data is accessed mutably only by the writer while `writing`
// is set and no reader has entered, and immutably by readers while
// `writing` is clear. The state mutex orders the transitions.
unsafe impl Sync for Block {}

struct Shared {
    blocks: Vec<Block>,
    length: usize,
    writer_taken: AtomicBool,
}

/// The FIFO handle. Readers must be created before the first write.
pub struct Fifo {
    shared: Arc<Shared>,
}

impl Fifo {
    /// `count` blocks (min 3) of `length` bytes each.
    pub fn new(count: usize, length: usize) -> Result<Self> {
        if count < 3 {
            return Err(TxError::Fifo(FifoError::TooSmall {
                min: 3,
                requested: count,
            }));
        }
        assert!(length > 0);

        let blocks = (0..count)
            .map(|_| Block {
                state: Mutex::new(BlockState {
                    readers: 0,
                    writing: true,
                    length,
                }),
                cond: Condvar::new(),
                data: UnsafeCell::new(vec![0u8; length].into_boxed_slice()),
            })
            .collect();

        Ok(Self {
            shared: Arc::new(Shared {
                blocks,
                length,
                writer_taken: AtomicBool::new(false),
            }),
        })
    }

    /// The single writer. Panics if taken twice.
    pub fn writer(&self) -> FifoWriter {
        assert!(
            !self.shared.writer_taken.swap(true, Ordering::SeqCst),
            "FIFO writer already taken"
        );
        FifoWriter {
            shared: self.shared.clone(),
            block: 0,
            offset: 0,
            closed: false,
        }
    }

    /// A reader starting at the stream head. `prefill` blocks must be
    /// written before the first read returns; `None` uses the maximum.
    pub fn reader(&self, prefill: Option<usize>) -> FifoReader {
        let count = self.shared.blocks.len();

        // Readers start on the block before the writer, positioned at
        // its end so the first read advances into fresh data.
        let start = count - 1;
        {
            let mut st = self.shared.blocks[start].state.lock().unwrap();
            st.readers += 1;
        }

        let prefill = prefill
            .map(|p| p.clamp(1, count - 2))
            .unwrap_or(count - 2);

        FifoReader {
            shared: self.shared.clone(),
            block: start,
            offset: self.shared.length,
            eof: false,
            prefill: Some(prefill - 1),
        }
    }
}

pub struct FifoWriter {
    shared: Arc<Shared>,
    block: usize,
    offset: usize,
    closed: bool,
}

impl FifoWriter {
    /// Borrow writable space in the current block, advancing to the
    /// next block when full. Returns None when `wait` is false and the
    /// next block is still being read, or after close.
    pub fn write_ptr(&mut self, wait: bool) -> Option<&mut [u8]> {
        if self.closed {
            return None;
        }

        let len = {
            let st = self.shared.blocks[self.block].state.lock().unwrap();
            st.length
        };
        if len == 0 {
            return None;
        }

        if self.offset == len {
            let next = (self.block + 1) % self.shared.blocks.len();
            {
                let mut st = self.shared.blocks[next].state.lock().unwrap();
                if wait {
                    while st.readers > 0 {
                        st = self.shared.blocks[next].cond.wait(st).unwrap();
                    }
                } else if st.readers > 0 {
                    return None;
                }
                st.writing = true;
            }

            // Release the full block to readers.
            {
                let mut st = self.shared.blocks[self.block].state.lock().unwrap();
                st.writing = false;
                self.shared.blocks[self.block].cond.notify_all();
            }

            self.block = next;
            self.offset = 0;
        }

        let remaining = self.shared.length - self.offset;
        let offset = self.offset;
        let block = &self.shared.blocks[self.block];
        // The writer holds this block exclusively: `writing` is set
        // and no reader enters a writing block.
        let data = unsafe { &mut *block.data.get() };
        Some(&mut data[offset..offset + remaining])
    }

    /// Commit bytes written through `write_ptr`.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.offset + n <= self.shared.length);
        self.offset += n;
    }

    /// Convenience: copy a whole buffer through the FIFO.
    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let Some(dst) = self.write_ptr(true) else {
                return Err(TxError::Fifo(FifoError::Closed));
            };
            let n = dst.len().min(data.len());
            dst[..n].copy_from_slice(&data[..n]);
            self.commit(n);
            data = &data[n..];
        }
        Ok(())
    }

    /// Close the stream: truncate the head block to the bytes written
    /// and plant the end-of-stream marker.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let count = self.shared.blocks.len();
        let head = self.block;

        let head_len = {
            let mut st = self.shared.blocks[head].state.lock().unwrap();
            st.length = self.offset;
            st.length
        };

        if head_len > 0 {
            // The EOS marker goes on the following block.
            let next = (head + 1) % count;
            let mut st = self.shared.blocks[next].state.lock().unwrap();
            while st.readers > 0 {
                st = self.shared.blocks[next].cond.wait(st).unwrap();
            }
            st.writing = false;
            st.length = 0;
            drop(st);
            self.shared.blocks[next].cond.notify_all();
        }

        let mut st = self.shared.blocks[head].state.lock().unwrap();
        st.writing = false;
        drop(st);
        self.shared.blocks[head].cond.notify_all();
    }
}

impl Drop for FifoWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Result of a FIFO read.
pub enum ReadResult<'a> {
    Data(&'a [u8]),
    /// No data ready and `wait` was false.
    WouldBlock,
    Eof,
}

pub struct FifoReader {
    shared: Arc<Shared>,
    block: usize,
    offset: usize,
    eof: bool,
    prefill: Option<usize>,
}

impl FifoReader {
    /// Read up to `max` bytes. The returned slice borrows the block
    /// directly; a following `read` releases it.
    pub fn read(&mut self, max: usize, wait: bool) -> ReadResult<'_> {
        if self.eof {
            return ReadResult::Eof;
        }

        // Hold off until the prefill block has been filled.
        if let Some(p) = self.prefill {
            let block = &self.shared.blocks[p];
            let mut st = block.state.lock().unwrap();
            if wait {
                while st.writing && st.length != 0 {
                    st = block.cond.wait(st).unwrap();
                }
            } else if st.writing && st.length != 0 {
                return ReadResult::WouldBlock;
            }
            drop(st);
            self.prefill = None;
        }

        let len = {
            let st = self.shared.blocks[self.block].state.lock().unwrap();
            st.length
        };

        if self.offset == len {
            let next = (self.block + 1) % self.shared.blocks.len();

            {
                let block = &self.shared.blocks[next];
                let mut st = block.state.lock().unwrap();
                if wait {
                    while st.writing && st.length != 0 {
                        st = block.cond.wait(st).unwrap();
                    }
                } else if st.writing && st.length != 0 {
                    return ReadResult::WouldBlock;
                }

                if st.length == 0 {
                    self.eof = true;
                } else {
                    st.readers += 1;
                }
            }

            {
                let block = &self.shared.blocks[self.block];
                let mut st = block.state.lock().unwrap();
                st.readers -= 1;
                drop(st);
                block.cond.notify_all();
            }

            self.block = next;
            self.offset = 0;

            if self.eof {
                return ReadResult::Eof;
            }
        }

        let len = {
            let st = self.shared.blocks[self.block].state.lock().unwrap();
            st.length
        };
        let n = max.min(len - self.offset);
        let offset = self.offset;
        self.offset += n;

        let block = &self.shared.blocks[self.block];
        // Readers only enter blocks with `writing` clear; the block
        // contents are immutable until every reader leaves.
        let data = unsafe { &*block.data.get() };
        ReadResult::Data(&data[offset..offset + n])
    }
}

impl Drop for FifoReader {
    fn drop(&mut self) {
        if !self.eof {
            let block = &self.shared.blocks[self.block];
            let mut st = block.state.lock().unwrap();
            st.readers = st.readers.saturating_sub(1);
            drop(st);
            block.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn rejects_tiny_fifo() {
        assert!(Fifo::new(2, 16).is_err());
    }

    #[test]
    fn single_reader_sees_all_bytes_in_order() {
        let fifo = Fifo::new(4, 64).unwrap();
        let mut reader = fifo.reader(Some(1));
        let mut writer = fifo.writer();

        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let expect = payload.clone();

        let t = thread::spawn(move || {
            writer.write_all(&payload).unwrap();
            writer.close();
        });

        let mut got = Vec::new();
        loop {
            match reader.read(64, true) {
                ReadResult::Data(d) => got.extend_from_slice(d),
                ReadResult::Eof => break,
                ReadResult::WouldBlock => unreachable!(),
            }
        }
        t.join().unwrap();

        assert_eq!(got, expect);
    }

    #[test]
    fn two_readers_both_see_the_stream() {
        let fifo = Fifo::new(4, 32).unwrap();
        let mut r1 = fifo.reader(Some(1));
        let mut r2 = fifo.reader(Some(1));
        let mut writer = fifo.writer();

        let payload: Vec<u8> = (0..500u32).map(|i| (i % 97) as u8).collect();
        let expect = payload.clone();

        let h1 = thread::spawn(move || {
            let mut got = Vec::new();
            loop {
                match r1.read(16, true) {
                    ReadResult::Data(d) => got.extend_from_slice(d),
                    ReadResult::Eof => break,
                    ReadResult::WouldBlock => unreachable!(),
                }
            }
            got
        });
        let h2 = thread::spawn(move || {
            let mut got = Vec::new();
            loop {
                match r2.read(29, true) {
                    ReadResult::Data(d) => got.extend_from_slice(d),
                    ReadResult::Eof => break,
                    ReadResult::WouldBlock => unreachable!(),
                }
            }
            got
        });

        writer.write_all(&payload).unwrap();
        writer.close();

        assert_eq!(h1.join().unwrap(), expect);
        assert_eq!(h2.join().unwrap(), expect);
    }

    #[test]
    fn slow_reader_applies_backpressure() {
        let fifo = Fifo::new(4, 256).unwrap();
        let mut reader = fifo.reader(Some(1));
        let mut writer = fifo.writer();

        let written = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let wcount = written.clone();

        let t = thread::spawn(move || {
            let payload = [0xABu8; 256];
            for _ in 0..64 {
                writer.write_all(&payload).unwrap();
                wcount.fetch_add(256, Ordering::SeqCst);
            }
            writer.close();
        });

        let mut got = 0usize;
        loop {
            match reader.read(256, true) {
                ReadResult::Data(d) => {
                    got += d.len();
                    thread::sleep(Duration::from_millis(2));
                    // The writer can never be more than the whole ring
                    // ahead of us.
                    let w = written.load(Ordering::SeqCst);
                    assert!(w <= got + 4 * 256, "writer ran ahead: {w} vs {got}");
                }
                ReadResult::Eof => break,
                ReadResult::WouldBlock => unreachable!(),
            }
        }
        t.join().unwrap();
        assert_eq!(got, 64 * 256);
    }

    #[test]
    fn nonblocking_read_returns_wouldblock() {
        let fifo = Fifo::new(4, 32).unwrap();
        let mut reader = fifo.reader(Some(1));
        let _writer = fifo.writer();

        assert!(matches!(reader.read(8, false), ReadResult::WouldBlock));
    }

    #[test]
    fn close_without_data_signals_eof() {
        let fifo = Fifo::new(3, 16).unwrap();
        let mut reader = fifo.reader(Some(1));
        let mut writer = fifo.writer();
        writer.close();

        assert!(matches!(reader.read(8, true), ReadResult::Eof));
    }
}
