//! Generate mode: rebuild an approximate map from an already copied
//! output. Non-tried regions of the map are read back from the output;
//! any hard-block-sized piece that is not all zero must have been
//! copied at some point and becomes finished. Zero pieces stay
//! non-tried, since a zero block and a never-written block cannot be
//! told apart.

use tracing::info;

use crate::block::{Block, Status};
use crate::config::Settings;
use crate::io::{is_zero, read_block_target, ReadOutcome, Target};
use crate::logbook::Logbook;
use crate::mapfile::CursorStatus;
use crate::progress::{format_bytes, Progress};
use crate::rescue::{RescueError, RunOutcome};
use crate::signals;

pub struct Genbook {
    book: Logbook,
    out: Box<dyn Target>,
    buf: Vec<u8>,
    offset: i64,
    hardbs: i64,
    softbs: i64,
    recsize: i64,
    gensize: i64,
    progress: Progress,
}

impl Genbook {
    pub fn new(
        settings: &Settings,
        book: Logbook,
        out: Box<dyn Target>,
        offset: i64,
    ) -> Genbook {
        Genbook {
            book,
            out,
            buf: vec![0u8; settings.softbs as usize],
            offset,
            hardbs: settings.hardbs,
            softbs: settings.softbs,
            recsize: 0,
            gensize: 0,
            progress: Progress::new(std::time::Duration::from_secs(settings.progress_secs)),
        }
    }

    pub fn recsize(&self) -> i64 {
        self.recsize
    }

    pub fn logbook(&self) -> &Logbook {
        &self.book
    }

    pub fn run(&mut self) -> Result<RunOutcome, RescueError> {
        for sb in self.book.vec().sblocks() {
            if sb.status() == Status::Finished {
                self.recsize += self.book.domain().overlap_size(sb.block());
            }
        }
        signals::install();

        let result = self.check_all();

        if matches!(result, Ok(RunOutcome::Finished)) {
            self.book
                .set_cursor(CursorStatus::Finished, self.book.current_pos());
        }
        self.book.compact();
        self.book.update_mapfile()?;
        info!(
            "generated map: {} recovered of {} checked",
            format_bytes(self.recsize),
            format_bytes(self.gensize)
        );
        result
    }

    fn check_all(&mut self) -> Result<RunOutcome, RescueError> {
        let mut pos = if self.offset >= 0 { 0 } else { -self.offset };
        if self.book.current_status() == CursorStatus::Generating
            && self.book.domain().includes_pos(self.book.current_pos())
            && (self.offset >= 0 || self.book.current_pos() >= -self.offset)
        {
            pos = self.book.current_pos();
        }

        loop {
            let mut b = Block::new(pos, self.softbs.min(i64::MAX - pos));
            self.book.find_chunk(&mut b, Status::NonTried);
            if b.size() <= 0 {
                return Ok(RunOutcome::Finished);
            }
            pos = b.end();
            self.book.set_cursor(CursorStatus::Generating, b.pos());
            let (copied, error) = self.check_block(&b);
            if copied + error < b.size() {
                // the copy ends here
                let new_end = b.pos() + copied + error;
                if new_end <= self.book.start() {
                    return Err(RescueError::EndsBeforeStart);
                }
                self.book.truncate_vector(new_end);
            }
            self.progress
                .report("generating map", b.pos(), self.recsize, 0, 0, false);
            if signals::interrupted() {
                return Ok(RunOutcome::Interrupted(signals::signum()));
            }
            self.book.update_mapfile()?;
        }
    }

    /// Read `b` back from the output and mark its nonzero hard blocks
    /// finished.
    fn check_block(&mut self, b: &Block) -> (i64, i64) {
        assert!(
            b.size() > 0 && b.size() <= self.softbs,
            "bad size checking a block"
        );
        let size = b.size() as usize;
        let (n, outcome) =
            read_block_target(self.out.as_ref(), &mut self.buf[..size], b.pos() + self.offset);
        let copied = n as i64;
        let error = match outcome {
            ReadOutcome::Error(_) => b.size() - copied,
            _ => 0,
        };

        let mut off = 0usize;
        while off < copied as usize {
            let len = (self.hardbs as usize).min(copied as usize - off);
            let nonzero = !is_zero(&self.buf[off..off + len]);
            if nonzero {
                self.book.change_chunk_status(
                    &Block::new(b.pos() + off as i64, len as i64),
                    Status::Finished,
                );
                self.recsize += len as i64;
            }
            self.gensize += len as i64;
            off += len;
        }
        (copied, error)
    }
}
