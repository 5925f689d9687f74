//! ETS 300 706 teletext encoder.
//!
//! Carries a service of magazines, pages and subpages assembled from
//! TTI files, or raw 42-byte packets from a file. Packets are inserted
//! on lines 7-22 and 320-335 of 625-line rasters at 6.9375 Mbit/s.

use super::data::{BitOrder, VbiLut};
use crate::clock::{mjd, Clock};
use crate::errors::{ConfigError, Result, SourceError, TxError};
use crate::video::{EngineState, LineProcessor, LineRing};
use chrono::{Datelike, Timelike};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Odd-parity encode of a 7-bit character.
fn parity(c: u8) -> u8 {
    let c = c & 0x7F;
    (c.count_ones() as u8 % 2 == 0) as u8 * 0x80 | c
}

const HAMMING84: [u8; 16] = [
    0x15, 0x02, 0x49, 0x5E, 0x64, 0x73, 0x38, 0x2F, 0xD0, 0xC7, 0x8C, 0x9B, 0xA1, 0xB6, 0xFD,
    0xEA,
];

fn unhamming84(b: u8) -> u8 {
    HAMMING84.iter().position(|&h| h == b).unwrap_or(0) as u8
}

/// Page CRC per ETS 300 706 9.6.1.
fn crc16(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let bit = ((crc >> 15) ^ (crc >> 11) ^ (crc >> 8) ^ (crc >> 6) ^ (b >> 7) as u16) & 1;
            crc = (crc << 1) | bit;
            b <<= 1;
        }
    }
    crc
}

const PACKET_LEN: usize = 45;
type Packet = [u8; PACKET_LEN];

fn packet_number(p: &Packet) -> u8 {
    (unhamming84(p[4]) << 1) | (unhamming84(p[3]) >> 3)
}

fn sync_header(p: &mut Packet) {
    p[0] = 0x55;
    p[1] = 0x55;
    p[2] = 0x27;
}

fn packet_address(p: &mut Packet, magazine: u8, number: u8) {
    p[3] = HAMMING84[(((number & 1) << 3) | (magazine & 7)) as usize];
    p[4] = HAMMING84[((number >> 1) & 15) as usize];
}

fn paritycpy(dst: &mut [u8], src: &[u8], pad: u8) {
    let mut i = 0;
    for &c in src {
        if c == 0 || i >= dst.len() {
            break;
        }
        dst[i] = parity(c);
        i += 1;
    }
    while i < dst.len() {
        dst[i] = parity(pad);
        i += 1;
    }
}

/// One displayable page (or subpage).
#[derive(Debug, Clone)]
pub struct Page {
    /// Full page number, 0x100..=0x8FF.
    pub page: u16,
    pub subpage: u8,
    pub subcode: u16,
    pub page_status: u16,
    pub cycle_time: u32,
    /// false: timer seconds, true: cycle count.
    pub cycle_count_mode: bool,
    cycle_count: u32,
    pub links: [u32; 6],
    packets: Vec<Packet>,
    nodelay_packets: usize,
    erase: bool,
}

impl Page {
    fn new() -> Self {
        Self {
            page: 0,
            subpage: 0,
            subcode: 0x3F7F,
            page_status: 0x8000,
            cycle_time: 8,
            cycle_count_mode: false,
            cycle_count: 0,
            links: [0; 6],
            packets: Vec::new(),
            nodelay_packets: 0,
            erase: true,
        }
    }

    /// Build the transmission packets from 25 display rows. The
    /// fastext packet precedes the page body.
    fn make_packets(&mut self, rows: &[[u8; 40]; 25]) {
        self.packets.clear();
        self.nodelay_packets = 0;

        let magazine = ((self.page >> 8) & 7) as u8;
        let mut fastext = [0u8; PACKET_LEN];
        self.fastext_packet(&mut fastext, magazine);
        self.packets.push(fastext);

        for (i, row) in rows.iter().enumerate().skip(1) {
            if row.iter().all(|&c| c == b' ' || c == 0) {
                continue;
            }
            let mut p: Packet = [0; PACKET_LEN];
            sync_header(&mut p);
            packet_address(&mut p, magazine, i as u8);
            paritycpy(&mut p[5..45], row, b' ');
            self.packets.push(p);
        }
    }

    fn fastext_packet(&self, p: &mut Packet, magazine: u8) {
        sync_header(p);
        packet_address(p, magazine, 27);
        p[5] = HAMMING84[0];

        for (i, &raw) in self.links.iter().enumerate() {
            let (page, subcode) = if raw < 0x100 {
                (0x8FF, 0x3F7F)
            } else if raw < 0x10000 {
                (raw, 0x3F7F)
            } else {
                (raw >> 8, raw & 0xFF)
            };
            // Magazine bits are carried xor'ed into the page number.
            let page = page ^ ((magazine as u32 & 7) << 8);

            let link = &mut p[6 + 6 * i..12 + 6 * i];
            link[0] = HAMMING84[(page & 0x0F) as usize];
            link[1] = HAMMING84[((page >> 4) & 0x0F) as usize];
            link[2] = HAMMING84[(subcode & 0x0F) as usize];
            link[3] = HAMMING84[((((page >> 8) & 1) << 3) | ((subcode >> 4) & 7)) as usize];
            link[4] = HAMMING84[((subcode >> 8) & 0x0F) as usize];
            link[5] = HAMMING84[((((page >> 9) & 3) << 2) | ((subcode >> 12) & 3)) as usize];
        }

        p[42] = HAMMING84[0x0F];
        // Placeholder CRC, replaced when the header is generated.
        p[43] = 0x12;
        p[44] = 0x34;
    }

    fn update_crc(&mut self, header: &Packet) {
        let blank = [parity(b' '); 40];
        let mut crc = crc16(0x0000, &header[13..37]);

        for row in 1..26u8 {
            let line = self
                .packets
                .iter()
                .find(|p| packet_number(p) == row)
                .map(|p| &p[5..45]);
            crc = crc16(crc, line.unwrap_or(&blank[..]));
        }

        for p in &mut self.packets {
            if packet_number(p) == 27 {
                p[43] = (crc >> 8) as u8;
                p[44] = crc as u8;
            }
        }
    }
}

#[derive(Debug, Default)]
struct Magazine {
    magazine: u8,
    /// Pages sorted by page number; each entry cycles its subpages.
    pages: Vec<Vec<Page>>,
    active: Vec<usize>,
    page_idx: usize,
    row: usize,
    delay: u64,
    filler: bool,
}

impl Magazine {
    fn current(&mut self) -> Option<&mut Page> {
        let set = self.pages.get_mut(self.page_idx)?;
        let sub = self.active.get(self.page_idx).copied().unwrap_or(0);
        set.get_mut(sub)
    }
}

/// The full teletext service.
pub struct Service {
    magazines: [Magazine; 8],
    magazine: usize,
    /// Timecode units per second (lines per second).
    second_delay: u64,
    header_delay: u64,
    last_stamp: i64,
    header_template: String,
}

impl Service {
    fn new(lines_per_frame: u32, frames_per_second: f64) -> Self {
        let second_delay = (lines_per_frame as f64 * frames_per_second) as u64;
        let mut magazines: [Magazine; 8] = Default::default();
        for (i, m) in magazines.iter_mut().enumerate() {
            m.magazine = if i == 0 { 8 } else { i as u8 };
        }
        Self {
            magazines,
            magazine: 1,
            second_delay,
            header_delay: (20e-3 * second_delay as f64 + 0.5) as u64,
            last_stamp: 0,
            header_template: "retrotx ".to_string(),
        }
    }

    pub fn add_page(&mut self, page: Page) {
        let mag = &mut self.magazines[((page.page >> 8) & 7) as usize];

        match mag.pages.iter_mut().find(|set| set[0].page == page.page) {
            Some(set) => {
                match set.iter_mut().find(|p| p.subpage == page.subpage) {
                    Some(existing) => *existing = page,
                    None => {
                        set.push(page);
                        set.sort_by_key(|p| p.subpage);
                    }
                }
            }
            None => {
                mag.pages.push(vec![page]);
                mag.pages.sort_by_key(|set| set[0].page);
                mag.active.push(0);
            }
        }
        // Keep the parallel index arrays in step after sorting.
        let n = mag.pages.len();
        mag.active.resize(n, 0);
    }

    fn header_text(&self, page: u16, clock: &dyn Clock) -> String {
        let now = clock.now();
        format!(
            "{}{:03X} {} {:02}:{:02}/{:02}",
            self.header_template,
            page & 0xFFF,
            now.format("%a %d %b"),
            now.hour(),
            now.minute(),
            now.second()
        )
    }

    fn next_magazine_packet(
        &mut self,
        mag_idx: usize,
        timecode: u64,
        clock: &dyn Clock,
    ) -> Option<Packet> {
        let header_delay = self.header_delay;
        let second_delay = self.second_delay;

        if self.magazines[mag_idx].filler {
            // Filler header closes a single-page magazine cycle.
            self.magazines[mag_idx].filler = false;
            let mut page = Page::new();
            page.page = ((self.magazines[mag_idx].magazine as u16 & 7) << 8) | 0xFF;
            let text = self.header_text(0x8FF, clock);
            return Some(header_packet(&page, &text, true));
        }

        if self.magazines[mag_idx].pages.is_empty() {
            return None;
        }

        let mut out: Option<Packet> = None;

        if self.magazines[mag_idx].row == 0 {
            let text = {
                let page = self.magazines[mag_idx].current()?.page;
                self.header_text(page, clock)
            };

            let m = &mut self.magazines[mag_idx];
            let p = m.current()?;
            let erase = p.erase;
            p.erase = false;
            let header = header_packet(p, &text, erase);
            p.update_crc(&header);
            m.delay = timecode + header_delay;
            m.row += 1;
            out = Some(header);
        } else {
            let m = &mut self.magazines[mag_idx];
            let row = m.row;
            let delay = m.delay;
            let p = m.current()?;

            // Hold display rows until the 20 ms header rule is met.
            if row - 1 == p.nodelay_packets && timecode < delay {
                return None;
            }
            let pkt = *p.packets.get(row - 1)?;
            m.row += 1;
            out = Some(pkt);
        }

        // End of page: advance subpage cycles and move to the next
        // page in the magazine.
        let m = &mut self.magazines[mag_idx];
        let finished = {
            let row = m.row;
            m.current().map(|p| row - 1 == p.packets.len()).unwrap_or(true)
        };
        if finished {
            let next_idx = (m.page_idx + 1) % m.pages.len();
            let nset = &mut m.pages[next_idx];
            if nset.len() > 1 {
                let active = &mut m.active[next_idx];
                let p = &mut nset[*active];
                let adv = if p.cycle_count_mode {
                    p.cycle_count += 1;
                    if p.cycle_count >= p.cycle_time {
                        p.cycle_count = 0;
                        true
                    } else {
                        false
                    }
                } else {
                    if timecode >= p.cycle_count as u64 {
                        p.cycle_count =
                            (timecode + p.cycle_time as u64 * second_delay) as u32;
                        true
                    } else {
                        false
                    }
                };
                if adv {
                    *active = (*active + 1) % nset.len();
                    nset[*active].erase = true;
                }
            }

            m.page_idx = next_idx;
            m.row = 0;
            if m.pages.len() == 1 {
                m.filler = true;
            }
        }

        out
    }

    fn next_packet(&mut self, timecode: u64, clock: &dyn Clock) -> Option<Packet> {
        // Insert packet 8/30 once per second.
        let stamp = clock.now().timestamp();
        if stamp != self.last_stamp {
            self.last_stamp = stamp;
            return Some(packet830(clock));
        }

        for _ in 0..8 {
            let idx = self.magazine;
            self.magazine = (self.magazine + 1) & 7;
            if let Some(p) = self.next_magazine_packet(idx, timecode, clock) {
                return Some(p);
            }
        }
        None
    }
}

/// Page header packet (Y = 0) with the control bits from the page
/// status word.
fn header_packet(page: &Page, text: &str, erase: bool) -> Packet {
    let mut p: Packet = [0; PACKET_LEN];
    let magazine = ((page.page >> 8) & 7) as u8;
    let status = page.page_status;

    sync_header(&mut p);
    packet_address(&mut p, magazine, 0);

    let newsflash = status & 1;
    let subtitle = (status >> 1) & 1;
    let suppress = (status >> 2) & 1;
    let update = (status >> 3) & 1;
    let interrupted = (status >> 4) & 1;
    let inhibit = (status >> 5) & 1;
    let nocs = (status >> 7) & 7;
    let subcode = page.subcode;

    p[5] = HAMMING84[(page.page & 0x0F) as usize];
    p[6] = HAMMING84[((page.page >> 4) & 0x0F) as usize];
    p[7] = HAMMING84[(subcode & 0x0F) as usize];
    p[8] = HAMMING84[((if erase { 8u8 } else { 0 }) | ((subcode >> 4) & 7) as u8) as usize];
    p[9] = HAMMING84[((subcode >> 8) & 0x0F) as usize];
    p[10] = HAMMING84
        [(((subtitle << 3) | (newsflash << 2)) as u8 | ((subcode >> 12) & 3) as u8) as usize];
    p[11] = HAMMING84[((inhibit << 3) | (interrupted << 2) | (update << 1) | suppress) as usize];
    p[12] = HAMMING84[((nocs << 1) as u8 & 0x0E) as usize];

    paritycpy(&mut p[13..45], text.as_bytes(), b' ');
    p
}

/// Packet 8/30 format 1: initial page, MJD and UTC.
fn packet830(clock: &dyn Clock) -> Packet {
    let mut p: Packet = [0; PACKET_LEN];
    sync_header(&mut p);
    packet_address(&mut p, 8, 30);

    let initial_page = 0x100u16;
    let initial_subcode = 0x3F7Fu16;

    p[5] = HAMMING84[0];
    p[6] = HAMMING84[(initial_page & 0x0F) as usize];
    p[7] = HAMMING84[((initial_page >> 4) & 0x0F) as usize];
    p[8] = HAMMING84[(initial_subcode & 0x0F) as usize];
    p[9] = HAMMING84[((((initial_page >> 8) & 1) << 3) | ((initial_subcode >> 4) & 7)) as usize];
    p[10] = HAMMING84[((initial_subcode >> 8) & 0x0F) as usize];
    p[11] =
        HAMMING84[((((initial_page >> 9) & 3) << 2) | ((initial_subcode >> 12) & 3)) as usize];

    // Network id and time offset unused.
    p[12] = 0x00;
    p[13] = 0x00;
    p[14] = 0;

    let now = clock.now();
    let d = mjd(now.year(), now.month(), now.day());
    p[15] = (d % 100000 / 10000 + 1) as u8;
    p[16] = (((d % 10000 / 1000 + 1) << 4) | (d % 1000 / 100 + 1)) as u8;
    p[17] = (((d % 100 / 10 + 1) << 4) | (d % 10 + 1)) as u8;

    p[18] = (((now.hour() / 10 + 1) << 4) | (now.hour() % 10 + 1)) as u8;
    p[19] = (((now.minute() / 10 + 1) << 4) | (now.minute() % 10 + 1)) as u8;
    p[20] = (((now.second() / 10 + 1) << 4) | (now.second() % 10 + 1)) as u8;

    paritycpy(&mut p[25..45], b"retrotx", b' ');
    p
}

/// TTI page file parser. A valid file starts with two uppercase
/// letters and a comma.
pub fn load_tti(service: &mut Service, path: &Path) -> Result<()> {
    let mut f = File::open(path).map_err(|e| {
        TxError::Source(SourceError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    })?;
    let mut text = String::new();
    f.read_to_string(&mut text).map_err(|e| {
        TxError::Source(SourceError::ReadFailed {
            reason: e.to_string(),
        })
    })?;

    let head = text.as_bytes();
    if head.len() < 3
        || !head[0].is_ascii_uppercase()
        || !head[1].is_ascii_uppercase()
        || head[2] != b','
    {
        return Err(TxError::Config(ConfigError::InvalidOption {
            option: "teletext",
            reason: format!("{}: not a TTI file", path.display()),
        }));
    }

    let mut page = Page::new();
    let mut rows = [[b' '; 40]; 25];
    let mut have_page = false;

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let (cmd, rest) = match line.split_once(',') {
            Some(t) => t,
            None => continue,
        };
        match cmd {
            "PN" => {
                if have_page {
                    page.make_packets(&rows);
                    service.add_page(std::mem::replace(&mut page, Page::new()));
                    rows = [[b' '; 40]; 25];
                }
                let x = u32::from_str_radix(rest.trim(), 16).unwrap_or(0);
                if x < 0x10000 {
                    page.page = x as u16;
                    page.subpage = 0;
                } else {
                    page.page = (x >> 8) as u16;
                    page.subpage = (x & 0xFF) as u8;
                }
                have_page = page.page > 0;
            }
            "CT" => {
                let mut it = rest.splitn(2, ',');
                page.cycle_time = it.next().and_then(|v| v.parse().ok()).unwrap_or(8);
                page.cycle_count_mode = matches!(it.next(), Some(m) if m.eq_ignore_ascii_case("c"));
            }
            "DE" => {}
            "PS" => {
                page.page_status = u16::from_str_radix(rest.trim(), 16).unwrap_or(0x8000);
            }
            "SC" => {
                page.subcode = u16::from_str_radix(rest.trim(), 16).unwrap_or(0);
            }
            "OL" => {
                let (row_s, data) = match rest.split_once(',') {
                    Some(t) => t,
                    None => continue,
                };
                let row: usize = match row_s.parse() {
                    Ok(r) if (1..25).contains(&r) => r,
                    _ => continue,
                };
                let mut c = 0;
                let mut esc = false;
                for &byte in data.as_bytes() {
                    if c >= 40 {
                        break;
                    }
                    if byte == 0x1B {
                        esc = true;
                        continue;
                    }
                    rows[row][c] = if esc { byte.wrapping_sub(0x40) } else { byte } & 0x7F;
                    esc = false;
                    c += 1;
                }
            }
            "FL" => {
                for (i, v) in rest.split(',').take(6).enumerate() {
                    page.links[i] = u32::from_str_radix(v.trim(), 16).unwrap_or(0);
                }
            }
            _ => {
                log::warn!("{}: unrecognised TTI line '{line}'", path.display());
            }
        }
    }

    if have_page {
        page.make_packets(&rows);
        service.add_page(page);
    }

    Ok(())
}

/// Build a rolling subtitle page on page 888: double-height boxed
/// rows near the bottom of the screen.
pub fn subtitle_page(text: &str) -> Page {
    let mut page = Page::new();
    page.page = 0x888;
    page.subpage = 0x7F;
    page.cycle_time = 8;
    page.page_status = 0xC016;
    page.subcode = 0x3F7F;

    let mut rows = [[b' '; 40]; 25];

    if !text.is_empty() {
        // Break the text into display lines of at most 36 characters.
        let mut lines: Vec<String> = Vec::new();
        for para in text.lines() {
            let mut cur = String::new();
            for word in para.split_whitespace() {
                if cur.len() + word.len() + 1 > 36 {
                    lines.push(std::mem::take(&mut cur));
                }
                if !cur.is_empty() {
                    cur.push(' ');
                }
                cur.push_str(word);
            }
            if !cur.is_empty() {
                lines.push(cur);
            }
        }

        // Bottom-aligned, double height rows with start/end box
        // markers.
        let shown = lines.len().min(3);
        for (i, line) in lines.iter().rev().take(shown).enumerate() {
            let row = 22 - i * 2;
            let indent = (17usize.saturating_sub(line.len() / 2)).min(34);
            let r = &mut rows[row];
            r[indent] = 0x0D; // double height
            r[indent + 1] = 0x0B; // start box
            r[indent + 2] = 0x0B;
            let mut c = indent + 3;
            for &b in line.as_bytes() {
                if c >= 38 {
                    break;
                }
                r[c] = match b {
                    b'[' => b'(',
                    b']' => b')',
                    _ => b & 0x7F,
                };
                c += 1;
            }
            r[c] = 0x0A; // end box
            r[(c + 1).min(39)] = 0x0A;
        }
    }

    page.make_packets(&rows);
    page
}

enum TeletextSource {
    Service(Service),
    Raw(Box<dyn ReadSeek>),
}

trait ReadSeek: Read + Send {
    fn rewind_stream(&mut self) -> std::io::Result<()>;
}

impl ReadSeek for File {
    fn rewind_stream(&mut self) -> std::io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

struct StdinPackets;

impl Read for StdinPackets {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::stdin().read(buf)
    }
}

impl ReadSeek for StdinPackets {
    fn rewind_stream(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Teletext line processor.
pub struct Teletext {
    lut: VbiLut,
    source: TeletextSource,
    clock: Arc<dyn Clock>,
    lines_per_frame: u32,
}

impl Teletext {
    pub fn new(state: &EngineState, path: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        if state.conf.lines != 625 {
            return Err(TxError::Config(ConfigError::UnsupportedRaster {
                feature: "teletext",
                lines: state.conf.lines,
            }));
        }

        // 66% of the white level, 444 symbols at 6.9375 Mbit/s.
        let level = ((state.white_level - state.black_level) as f64 * 0.66).round() as i16;
        let bwidth = state.pixel_rate as f64 / 6_937_500.0;
        let lut = VbiLut::init_rc(
            444,
            state.width,
            level,
            bwidth,
            0.7,
            state.pixel_rate as f64 * 10.2e-6,
        );

        let source = if let Some(raw) = path.strip_prefix("raw:") {
            if raw == "-" {
                TeletextSource::Raw(Box::new(StdinPackets))
            } else {
                let f = File::open(raw).map_err(|e| {
                    TxError::Source(SourceError::Open {
                        path: raw.to_string(),
                        reason: e.to_string(),
                    })
                })?;
                TeletextSource::Raw(Box::new(f))
            }
        } else {
            let mut service = Service::new(
                state.conf.lines,
                state.conf.frame_rate.to_f64(),
            );
            let p = Path::new(path);
            if path == "subtitles" {
                service.add_page(subtitle_page(""));
            } else if p.is_dir() {
                let mut entries: Vec<_> = std::fs::read_dir(p)
                    .map_err(|e| {
                        TxError::Source(SourceError::Open {
                            path: path.to_string(),
                            reason: e.to_string(),
                        })
                    })?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        !p.file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.starts_with('.'))
                            .unwrap_or(true)
                    })
                    .collect();
                entries.sort();
                for entry in entries {
                    if let Err(e) = load_tti(&mut service, &entry) {
                        log::warn!("skipping {}: {e}", entry.display());
                    }
                }
            } else {
                load_tti(&mut service, p)?;
            }
            TeletextSource::Service(service)
        };

        Ok(Self {
            lut,
            source,
            clock,
            lines_per_frame: state.conf.lines,
        })
    }

    /// Fetch the next 45-byte packet including run-in, or None when no
    /// packet is due this line.
    pub fn next_packet(&mut self, frame: u32, line: u32) -> Option<Packet> {
        let timecode =
            (frame as u64) * self.lines_per_frame as u64 + (line as u64 - 1);

        match &mut self.source {
            TeletextSource::Service(s) => s.next_packet(timecode, self.clock.as_ref()),
            TeletextSource::Raw(f) => {
                let mut p: Packet = [0; PACKET_LEN];
                sync_header(&mut p);
                let mut got = 0;
                let mut rewound = false;
                while got < 42 {
                    match f.read(&mut p[3 + got..45]) {
                        Ok(0) => {
                            // Loop the file on EOF; give up if a
                            // rewind yields no data (empty file).
                            if rewound || f.rewind_stream().is_err() {
                                return None;
                            }
                            rewound = true;
                        }
                        Ok(n) => {
                            got += n;
                            rewound = false;
                        }
                        Err(_) => return None,
                    }
                }
                Some(p)
            }
        }
    }
}

impl LineProcessor for Teletext {
    fn name(&self) -> &'static str {
        "teletext"
    }

    fn process(&mut self, _state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        let (frame, number, allocated) = {
            let l = ring.get(0);
            (l.frame, l.number, l.vbi_allocated)
        };

        if allocated {
            return Ok(1);
        }
        let in_vbi = (7..=22).contains(&number) || (320..=335).contains(&number);
        if !in_vbi {
            return Ok(1);
        }

        if let Some(packet) = self.next_packet(frame, number) {
            let l = ring.get_mut(0);
            self.lut
                .render(&packet, 0, PACKET_LEN * 8, BitOrder::LsbFirst, l);
            l.vbi_allocated = true;
        } else {
            ring.get_mut(0).vbi_allocated = true;
        }

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn service() -> Service {
        Service::new(625, 25.0)
    }

    #[test]
    fn parity_is_odd() {
        for c in 0u8..0x80 {
            assert_eq!(parity(c).count_ones() % 2, 1, "char {c:#x}");
        }
    }

    #[test]
    fn tti_single_page_header_bytes() {
        let mut s = service();
        let dir = std::env::temp_dir().join("retrotx-tti-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("p100.tti");
        std::fs::write(&path, "PN,1F000\r\nPS,C000\r\nSC,0000\r\nOL,1,HELLO\r\n").unwrap();
        load_tti(&mut s, &path).unwrap();

        // At epoch 0 the 8/30 stamp matches the fresh service, so the
        // first packet is the page header itself.
        let clock = FixedClock(0);
        let p = s.next_packet(0, &clock).expect("header packet");

        // Run-in and framing code.
        assert_eq!(&p[..3], &[0x55, 0x55, 0x27]);
        // Magazine 1, packet 0.
        assert_eq!(p[3], HAMMING84[1]);
        assert_eq!(p[4], HAMMING84[0]);
        // Page 0xF0 units/tens.
        assert_eq!(p[5], HAMMING84[0x0]);
        assert_eq!(p[6], HAMMING84[0xF]);
        // Erase bit set on first transmission (status 0xC000).
        assert_eq!(p[8], HAMMING84[0x8]);
    }

    #[test]
    fn header_respects_20ms_rule() {
        let mut s = service();
        let dir = std::env::temp_dir().join("retrotx-tti-test2");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("p200.tti");
        std::fs::write(&path, "PN,20000\r\nOL,1,A\r\nOL,2,B\r\n").unwrap();
        load_tti(&mut s, &path).unwrap();

        let clock = FixedClock(10);
        let _ = s.next_packet(0, &clock); // 8/30
        let hdr = s.next_packet(1, &clock).unwrap();
        assert_eq!(packet_number(&hdr), 0);
        // The page body must wait ~312 lines for the 20 ms delay.
        assert!(s.next_packet(2, &clock).is_none());
        assert!(s.next_packet(100, &clock).is_none());
        let p27 = s.next_packet(320, &clock).unwrap();
        assert_eq!(packet_number(&p27), 27);
        let row = s.next_packet(321, &clock).unwrap();
        assert_eq!(packet_number(&row), 1);
    }

    #[test]
    fn packet830_carries_mjd() {
        // 2000-01-01: MJD 51544.
        let clock = FixedClock(946684800);
        let p = packet830(&clock);
        assert_eq!(p[15], 5 + 1);
        assert_eq!(p[16], ((1 + 1) << 4) | (5 + 1));
        assert_eq!(p[17], ((4 + 1) << 4) | (4 + 1));
    }

    #[test]
    fn subtitle_page_boxes_the_text() {
        let page = subtitle_page("HELLO SUBTITLE WORLD");
        assert_eq!(page.page, 0x888);
        // One display row plus the fastext packet.
        assert_eq!(page.packets.len(), 2);
        let row = &page.packets[1];
        assert_eq!(packet_number(row), 22);
        let body: Vec<u8> = row[5..45].iter().map(|&b| b & 0x7F).collect();
        assert!(body.windows(2).any(|w| w == [0x0B, 0x0B]));
        assert!(body.contains(&b'H'));
        assert!(body.contains(&0x0A));
    }

    #[test]
    fn page_crc_covers_header_and_rows() {
        let mut page = Page::new();
        page.page = 0x100;
        let mut rows = [[b' '; 40]; 25];
        rows[1][..5].copy_from_slice(b"HELLO");
        page.make_packets(&rows);

        let hdr = header_packet(&page, "x", false);
        page.update_crc(&hdr);
        let p27 = page
            .packets
            .iter()
            .find(|p| packet_number(p) == 27)
            .unwrap();
        assert_ne!(&p27[43..45], &[0x12, 0x34]);
    }
}
