//! Shared test infrastructure for the engine tests.
//!
//! `FaultyDisk` plays the part of a failing device: reads stop short at
//! the first bad byte and the next attempt inside a bad range returns
//! `EIO`, which is exactly how a real kernel surfaces media errors.
#![allow(dead_code)]

use std::io;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use blockrescue::block::Status;
use blockrescue::config::Settings;
use blockrescue::domain::Domain;
use blockrescue::io::{FileTarget, Source};
use blockrescue::logbook::Logbook;
use blockrescue::rescue::{Rescuebook, RunOutcome};
use blockrescue::signals;

pub struct FaultyDisk {
    data: Vec<u8>,
    declared_size: i64,
    bad: Vec<Range<i64>>,
    flaky: Mutex<Vec<(Range<i64>, u32)>>,
    read_log: Mutex<Vec<Range<i64>>>,
    bytes_served: AtomicI64,
    trip: Option<(i64, i32)>,
}

impl FaultyDisk {
    pub fn new(data: Vec<u8>) -> FaultyDisk {
        let declared_size = data.len() as i64;
        FaultyDisk {
            data,
            declared_size,
            bad: Vec::new(),
            flaky: Mutex::new(Vec::new()),
            read_log: Mutex::new(Vec::new()),
            bytes_served: AtomicI64::new(0),
            trip: None,
        }
    }

    /// Pretend the device is this large even if the backing data ends
    /// earlier; reads past the data report EOF.
    pub fn declare_size(&mut self, size: i64) {
        self.declared_size = size;
    }

    /// Bytes in `range` never read successfully.
    pub fn add_bad_range(&mut self, range: Range<i64>) {
        self.bad.push(range);
    }

    /// Bytes in `range` fail the first `failures` attempts, then read
    /// fine.
    pub fn add_flaky_range(&mut self, range: Range<i64>, failures: u32) {
        self.flaky.lock().unwrap().push((range, failures));
    }

    /// Raise `signum` on the process cancellation flag once this many
    /// bytes have been served.
    pub fn trip_signal_after(&mut self, bytes: i64, signum: i32) {
        self.trip = Some((bytes, signum));
    }

    /// Every range that was actually read, in call order.
    pub fn reads(&self) -> Vec<Range<i64>> {
        self.read_log.lock().unwrap().clone()
    }
}

impl Source for FaultyDisk {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        let pos = pos as i64;
        let data_len = self.data.len() as i64;
        if pos >= data_len || buf.is_empty() {
            return Ok(0);
        }
        let mut limit = (pos + buf.len() as i64).min(data_len);
        let mut fault_under_cursor = false;
        for r in &self.bad {
            if r.end > pos && r.start < limit {
                if r.start <= pos {
                    fault_under_cursor = true;
                } else {
                    limit = limit.min(r.start);
                }
            }
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            for (r, failures) in flaky.iter_mut() {
                if *failures == 0 {
                    continue;
                }
                if r.end > pos && r.start < limit {
                    if r.start <= pos {
                        *failures -= 1;
                        fault_under_cursor = true;
                    } else {
                        limit = limit.min(r.start);
                    }
                }
            }
        }
        if fault_under_cursor {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        let n = (limit - pos) as usize;
        buf[..n].copy_from_slice(&self.data[pos as usize..pos as usize + n]);
        self.read_log.lock().unwrap().push(pos..limit);
        let served = self.bytes_served.fetch_add(n as i64, Ordering::Relaxed) + n as i64;
        if let Some((after, signum)) = self.trip {
            if served >= after {
                signals::trigger(signum);
            }
        }
        Ok(n)
    }

    fn size(&self) -> Option<i64> {
        Some(self.declared_size)
    }
}

/// Handle that lets a test keep inspecting the disk after the engine
/// has taken ownership of its clone.
#[derive(Clone)]
pub struct SharedDisk(pub std::sync::Arc<FaultyDisk>);

impl Source for SharedDisk {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        self.0.read_at(buf, pos)
    }

    fn size(&self) -> Option<i64> {
        self.0.size()
    }
}

pub struct Fixture {
    #[allow(dead_code)]
    dir: tempfile::TempDir,
    pub out_path: PathBuf,
    pub map_path: PathBuf,
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let out_path = dir.path().join("out.bin");
    let map_path = dir.path().join("rescue.map");
    Fixture {
        dir,
        out_path,
        map_path,
    }
}

pub fn settings(hardbs: i64, softbs: i64) -> Settings {
    Settings {
        hardbs,
        softbs,
        ..Settings::default()
    }
}

/// Build a rescue over the whole declared device with a fresh or
/// pre-existing mapfile from the fixture, but do not run it yet.
pub fn build_rescue(settings: &Settings, disk: FaultyDisk, fx: &Fixture) -> Rescuebook {
    let book = Logbook::new(
        Some(fx.map_path.clone()),
        Domain::new(0, i64::MAX),
        disk.size(),
        settings.cluster,
        settings.complete_only,
    )
    .expect("logbook");
    let out = FileTarget::open(&fx.out_path).expect("output");
    Rescuebook::new(settings, book, Box::new(disk), Box::new(out), 0)
}

pub fn run_rescue(settings: &Settings, disk: FaultyDisk, fx: &Fixture) -> (RunOutcome, Rescuebook) {
    let mut book = build_rescue(settings, disk, fx);
    let outcome = book.run().expect("rescue run");
    (outcome, book)
}

/// `(pos, size, status char)` triples of the final vector, for compact
/// comparisons.
pub fn triples(book: &Logbook) -> Vec<(i64, i64, char)> {
    book.vec()
        .sblocks()
        .iter()
        .map(|sb| (sb.pos(), sb.size(), sb.status().as_char()))
        .collect()
}

/// Conservation check: rescued + errored + untried bytes inside the
/// domain add up to the domain itself.
pub fn assert_conservation(book: &Rescuebook) {
    let log = book.logbook();
    log.vec().assert_partition();
    let mut non_tried = 0;
    for sb in log.vec().sblocks() {
        if sb.status() == Status::NonTried {
            non_tried += log.domain().overlap_size(sb.block());
        }
    }
    assert_eq!(
        book.recsize() + book.errsize() + non_tried,
        log.domain().in_size(),
        "conservation of domain bytes"
    );
}
