//! The four-pass rescue engine.
//!
//! Pass 1 (`copy_non_tried`) sweeps forward over untouched territory
//! with the soft block size, skipping adaptively once errors appear.
//! Pass 2 (`trim_errors`) walks the damaged areas backward one hard
//! block at a time to pin down their trailing edges. Pass 3
//! (`split_errors`) sweeps the trimmed interiors forward, jumping over
//! stretches that keep failing, until a whole sweep finds nothing left
//! to split. Pass 4 (`copy_errors`) re-reads bad sectors up to
//! `max_retries` times. Between work units the engine snapshots the
//! logbook, so a killed run resumes mid-pass.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use crate::block::{Block, Status};
use crate::config::Settings;
use crate::domain::Domain;
use crate::io::{
    is_zero, read_block, sync_target, write_block, ReadOutcome, Source, Target,
};
use crate::logbook::Logbook;
use crate::mapfile::{CursorStatus, MapfileError};
use crate::progress::{format_bytes, Progress};
use crate::readlog::{ReadLogger, ReadRecord};
use crate::signals;

#[derive(Debug, Error)]
pub enum RescueError {
    /// Output-side failures end the run; the input may keep erroring.
    #[error("write error: {0}")]
    Write(#[source] io::Error),
    #[error("mapfile error: {0}")]
    Mapfile(#[from] MapfileError),
    #[error("input file disappeared")]
    InputVanished,
    #[error("file ends before the start of the map")]
    EndsBeforeStart,
    #[error("unable to read the fill pattern")]
    EmptyPattern,
    #[error("error syncing output file: {0}")]
    Sync(#[source] io::Error),
}

/// How a run ended, when it ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    TooManyErrors,
    Interrupted(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassEnd {
    Done,
    Interrupted,
}

pub(crate) struct Step {
    pub copied: i64,
    pub error: i64,
}

pub struct Rescuebook {
    book: Logbook,
    input: Box<dyn Source>,
    out: Box<dyn Target>,
    input_path: Option<PathBuf>,
    test_domain: Option<Domain>,
    read_log: Option<ReadLogger>,
    progress: Progress,
    buf: Vec<u8>,
    offset: i64,
    hardbs: i64,
    softbs: i64,
    skipbs: i64,
    max_errors: i64,
    max_retries: i64,
    nosplit: bool,
    synchronous: bool,
    min_outfile_size: i64,
    /// Highest end offset "written" as zeros; -1 while sparse writes
    /// are disabled.
    sparse_size: i64,
    recsize: i64,
    errsize: i64,
    errors: u32,
}

impl Rescuebook {
    /// `offset` is added to every output position: input byte `p` lands
    /// at output byte `p + offset`.
    pub fn new(
        settings: &Settings,
        mut book: Logbook,
        input: Box<dyn Source>,
        out: Box<dyn Target>,
        offset: i64,
    ) -> Rescuebook {
        if settings.retrim {
            book.rewrite_statuses(
                &[Status::NonSplit, Status::BadSector],
                Status::NonTrimmed,
            );
        }
        if settings.try_again {
            book.rewrite_statuses(
                &[Status::NonSplit, Status::NonTrimmed],
                Status::NonTried,
            );
        }
        Rescuebook {
            book,
            input,
            out,
            input_path: None,
            test_domain: None,
            read_log: None,
            progress: Progress::new(std::time::Duration::from_secs(settings.progress_secs)),
            buf: vec![0u8; settings.softbs as usize],
            offset,
            hardbs: settings.hardbs,
            softbs: settings.softbs,
            skipbs: settings.effective_skipbs(),
            max_errors: settings.max_errors,
            max_retries: settings.max_retries,
            nosplit: settings.nosplit,
            synchronous: settings.synchronous,
            min_outfile_size: settings.min_outfile_size,
            sparse_size: if settings.sparse { 0 } else { -1 },
            recsize: 0,
            errsize: 0,
            errors: 0,
        }
    }

    /// Enables the existence check that catches an unplugged input.
    pub fn set_input_path(&mut self, path: PathBuf) {
        self.input_path = Some(path);
    }

    /// Ranges outside this domain are reported as errored without any
    /// read attempt.
    pub fn set_test_domain(&mut self, domain: Domain) {
        self.test_domain = Some(domain);
    }

    pub fn set_read_logger(&mut self, log: ReadLogger) {
        self.read_log = Some(log);
    }

    pub fn recsize(&self) -> i64 {
        self.recsize
    }

    pub fn errsize(&self) -> i64 {
        self.errsize
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn logbook(&self) -> &Logbook {
        &self.book
    }

    /// Run every pending pass, snapshot the logbook, and report how the
    /// run ended. Fatal errors still leave a final snapshot behind.
    pub fn run(&mut self) -> Result<RunOutcome, RescueError> {
        let (copy_pending, trim_pending, split_pending) = self.rebuild_counters();
        self.count_errors();
        signals::install();
        if self.book.loaded_from_mapfile() {
            info!(
                "initial status: rescued={} errsize={} errors={}",
                format_bytes(self.recsize),
                format_bytes(self.errsize),
                self.errors
            );
        }

        let result = self.run_passes(copy_pending, trim_pending, split_pending);

        if matches!(result, Ok(RunOutcome::Finished | RunOutcome::TooManyErrors)) {
            self.book
                .set_cursor(CursorStatus::Finished, self.book.current_pos());
        }
        let sync_result = self.extend_outfile_size();
        self.book.compact();
        self.book.update_mapfile()?;
        if let Some(log) = &mut self.read_log {
            if let Err(e) = log.flush() {
                warn!("read log flush failed: {e}");
            }
        }
        let outcome = result?;
        if let Err(e) = sync_result {
            return Err(RescueError::Sync(e));
        }
        self.count_errors();
        self.progress.report(
            "finished",
            self.book.current_pos(),
            self.recsize,
            self.errsize,
            self.errors,
            true,
        );
        Ok(outcome)
    }

    /// One scan over the vector: which passes still have work, and the
    /// rescued / errored byte counts inside the domain.
    fn rebuild_counters(&mut self) -> (bool, bool, bool) {
        let (mut copy, mut trim, mut split) = (false, false, false);
        let mut recsize = 0;
        let mut errsize = 0;
        for sb in self.book.vec().sblocks() {
            let within = self.book.domain().overlap_size(sb.block());
            if within == 0 {
                if self.book.domain().lt(sb.block()) {
                    break;
                }
                continue;
            }
            match sb.status() {
                Status::NonTried => {
                    copy = true;
                    trim = true;
                    split = true;
                }
                Status::NonTrimmed => {
                    trim = true;
                    split = true;
                    errsize += within;
                }
                Status::NonSplit => {
                    split = true;
                    errsize += within;
                }
                Status::BadSector => errsize += within,
                Status::Finished => recsize += within,
            }
        }
        self.recsize = recsize;
        self.errsize = errsize;
        (copy, trim, split)
    }

    fn run_passes(
        &mut self,
        copy_pending: bool,
        trim_pending: bool,
        split_pending: bool,
    ) -> Result<RunOutcome, RescueError> {
        if copy_pending && !self.too_many_errors() {
            if self.copy_non_tried()? == PassEnd::Interrupted {
                return Ok(RunOutcome::Interrupted(signals::signum()));
            }
        }
        if trim_pending && !self.too_many_errors() {
            if self.trim_errors()? == PassEnd::Interrupted {
                return Ok(RunOutcome::Interrupted(signals::signum()));
            }
        }
        if split_pending && !self.nosplit && !self.too_many_errors() {
            if self.split_errors()? == PassEnd::Interrupted {
                return Ok(RunOutcome::Interrupted(signals::signum()));
            }
        }
        if self.max_retries != 0 && !self.too_many_errors() {
            if self.copy_errors()? == PassEnd::Interrupted {
                return Ok(RunOutcome::Interrupted(signals::signum()));
            }
        }
        if self.too_many_errors() {
            Ok(RunOutcome::TooManyErrors)
        } else {
            Ok(RunOutcome::Finished)
        }
    }

    /// Pass 1: read the non-tried areas, skipping over the damage.
    fn copy_non_tried(&mut self) -> Result<PassEnd, RescueError> {
        let mut pos = 0i64;
        let mut skip_size = self.hardbs; // size to skip on error
        if self.book.current_status() == CursorStatus::Copying
            && self.book.domain().includes_pos(self.book.current_pos())
        {
            pos = self.book.current_pos();
        }

        loop {
            let want = if skip_size > 0 { self.hardbs } else { self.softbs };
            let mut b = Block::new(pos, want.min(i64::MAX - pos));
            self.book.find_chunk(&mut b, Status::NonTried);
            if b.size() <= 0 {
                break;
            }
            if pos != b.pos() {
                skip_size = 0; // reset on block change
            }
            pos = b.end();
            self.book.set_cursor(CursorStatus::Copying, b.pos());
            let st = if skip_size > 0 {
                Status::BadSector
            } else {
                Status::NonTrimmed
            };
            let step = self.copy_and_update(&b, st, "copying non-tried blocks")?;
            if step.error > 0 {
                self.errsize += step.error;
                if skip_size < self.skipbs {
                    skip_size = self.skipbs;
                } else if skip_size < i64::MAX / 4 {
                    skip_size *= 2;
                }
                // stamp the presumed-bad stretch without reading it
                if pos >= 0 && pos < self.book.end() {
                    let mut skb = Block::new(pos, skip_size.min(i64::MAX - pos));
                    self.book.find_chunk(&mut skb, Status::NonTried);
                    if skb.pos() == pos && skb.size() > 0 {
                        self.book.change_chunk_status(&skb, Status::NonTrimmed);
                        pos = skb.end();
                        self.errsize += skb.size();
                    }
                }
            } else if skip_size > 0 && step.copied > 0 {
                skip_size = (skip_size - step.copied).max(0);
            }
            if self.too_many_errors() {
                break;
            }
            if signals::interrupted() {
                return Ok(PassEnd::Interrupted);
            }
            self.book.update_mapfile()?;
        }
        Ok(PassEnd::Done)
    }

    /// Pass 2: re-read the damaged areas backward, one hard block at a
    /// time. When a block fails, the rest of the area below it has had
    /// its trailing edge located and becomes non-split.
    fn trim_errors(&mut self) -> Result<PassEnd, RescueError> {
        let mut pos = i64::MAX - self.hardbs;
        if self.book.current_status() == CursorStatus::Trimming
            && self.book.domain().includes_pos(self.book.current_pos())
        {
            pos = self.book.current_pos();
        }

        while pos >= 0 {
            let mut b = Block::new(pos, self.hardbs);
            self.book.rfind_chunk(&mut b, Status::NonTrimmed);
            if b.size() <= 0 {
                break;
            }
            pos = b.pos() - self.hardbs;
            self.book.set_cursor(CursorStatus::Trimming, b.pos());
            let step = self.copy_and_update(&b, Status::BadSector, "trimming failed blocks")?;
            if step.copied > 0 {
                self.errsize -= step.copied;
            }
            if step.error > 0 && b.pos() > 0 {
                if let Some(index) = self.book.find_index(b.pos() - 1) {
                    let sb = *self.book.sblock(index);
                    if self.book.domain().includes(sb.block())
                        && sb.status() == Status::NonTrimmed
                    {
                        self.book.change_chunk_status(sb.block(), Status::NonSplit);
                    }
                }
            }
            if self.too_many_errors() {
                break;
            }
            if signals::interrupted() {
                return Ok(PassEnd::Interrupted);
            }
            self.book.update_mapfile()?;
        }
        Ok(PassEnd::Done)
    }

    /// Pass 3: sweep the trimmed interiors forward until a whole sweep
    /// finds nothing, jumping deep into an area after enough
    /// consecutive failures.
    fn split_errors(&mut self) -> Result<PassEnd, RescueError> {
        let mut resume = self.book.current_status() == CursorStatus::Splitting
            && self.book.domain().includes_pos(self.book.current_pos());
        loop {
            let mut pos = 0i64;
            if resume {
                resume = false;
                pos = self.book.current_pos();
            }
            let mut error_counter = 0i64;
            let mut block_found = false;

            while pos >= 0 {
                let mut b = Block::new(pos, self.hardbs.min(i64::MAX - pos));
                self.book.find_chunk(&mut b, Status::NonSplit);
                if b.size() <= 0 {
                    break;
                }
                pos = b.end();
                block_found = true;
                self.book.set_cursor(CursorStatus::Splitting, b.pos());
                let step =
                    self.copy_and_update(&b, Status::BadSector, "splitting failed blocks")?;
                if step.copied > 0 {
                    self.errsize -= step.copied;
                }
                if step.error <= 0 {
                    error_counter = 0;
                } else {
                    error_counter += 1;
                    if error_counter >= 2 && error_counter * self.hardbs >= 2 * self.skipbs {
                        // enough consecutive errors: leap into the area
                        error_counter = 0;
                        if let Some(index) = self.book.find_index(pos) {
                            let sb = self.book.sblock(index);
                            if sb.status() == Status::NonSplit
                                && sb.size() >= 2 * self.skipbs
                                && sb.size() >= 4 * self.hardbs
                            {
                                pos += (sb.size() / (2 * self.hardbs)) * self.hardbs;
                            }
                        }
                    }
                }
                if self.too_many_errors() {
                    break;
                }
                if signals::interrupted() {
                    return Ok(PassEnd::Interrupted);
                }
                self.book.update_mapfile()?;
            }
            if !block_found || self.too_many_errors() {
                break;
            }
        }
        Ok(PassEnd::Done)
    }

    /// Pass 4: retry the remaining bad sectors, sweep after sweep.
    fn copy_errors(&mut self) -> Result<PassEnd, RescueError> {
        let mut resume = self.book.current_status() == CursorStatus::Retrying
            && self.book.domain().includes_pos(self.book.current_pos());
        let mut retry = 1i64;
        while self.max_retries < 0 || retry <= self.max_retries {
            let mut pos = 0i64;
            if resume {
                resume = false;
                pos = self.book.current_pos();
            }
            let mut block_found = false;
            let phase = format!("retrying bad sectors (retry {retry})");

            while pos >= 0 {
                let mut b = Block::new(pos, self.hardbs.min(i64::MAX - pos));
                self.book.find_chunk(&mut b, Status::BadSector);
                if b.size() <= 0 {
                    break;
                }
                pos = b.end();
                block_found = true;
                self.book.set_cursor(CursorStatus::Retrying, b.pos());
                let step = self.copy_and_update(&b, Status::BadSector, &phase)?;
                if step.copied > 0 {
                    self.errsize -= step.copied;
                }
                if self.too_many_errors() {
                    break;
                }
                if signals::interrupted() {
                    return Ok(PassEnd::Interrupted);
                }
                self.book.update_mapfile()?;
            }
            if !block_found || self.too_many_errors() {
                break;
            }
            retry += 1;
        }
        Ok(PassEnd::Done)
    }

    /// Shared work unit: transfer `b`, record the result in the vector,
    /// and split a large failed tail so its leading hard block is
    /// isolated as a bad sector.
    fn copy_and_update(
        &mut self,
        b: &Block,
        on_error: Status,
        phase: &str,
    ) -> Result<Step, RescueError> {
        self.progress
            .report(phase, b.pos(), self.recsize, self.errsize, self.errors, false);
        let (copied, error) = self.copy_block(b)?;
        if copied + error < b.size() {
            // EOF inside the request
            let new_end = b.pos() + copied + error;
            if new_end <= self.book.start() {
                return Err(RescueError::EndsBeforeStart);
            }
            self.book.truncate_vector(new_end);
        }
        if copied > 0 {
            self.book
                .change_chunk_status(&Block::new(b.pos(), copied), Status::Finished);
            self.recsize += copied;
        }
        if error > 0 {
            let epos = b.pos() + copied;
            if error >= self.hardbs && on_error != Status::BadSector {
                self.book
                    .change_chunk_status(&Block::new(epos, self.hardbs), Status::BadSector);
                if error > self.hardbs {
                    self.book.change_chunk_status(
                        &Block::new(epos + self.hardbs, error - self.hardbs),
                        on_error,
                    );
                }
            } else {
                self.book
                    .change_chunk_status(&Block::new(epos, error), on_error);
            }
            if self.max_errors >= 0 {
                self.count_errors();
            }
            if let Some(path) = &self.input_path {
                if !path.exists() {
                    return Err(RescueError::InputVanished);
                }
            }
        }
        Ok(Step { copied, error })
    }

    /// Transfer one block: read from the input, write the readable
    /// prefix to the output (or account it as sparse when all zero).
    /// Returns `(copied, error)`; `copied + error < b.size` means EOF.
    fn copy_block(&mut self, b: &Block) -> Result<(i64, i64), RescueError> {
        assert!(
            b.size() > 0 && b.size() <= self.softbs,
            "bad size copying a block"
        );
        let size = b.size() as usize;
        let excluded = self
            .test_domain
            .as_ref()
            .is_some_and(|d| !d.includes(b));
        let (copied, error) = if excluded {
            (0i64, b.size())
        } else {
            let (n, outcome) = read_block(self.input.as_ref(), &mut self.buf[..size], b.pos());
            let n = n as i64;
            match outcome {
                ReadOutcome::Error(_) => (n, b.size() - n),
                _ => (n, 0),
            }
        };
        if copied > 0 {
            let wpos = b.pos() + self.offset;
            let data = &self.buf[..copied as usize];
            if self.sparse_size >= 0 && is_zero(data) {
                let end = wpos + copied;
                if end > self.sparse_size {
                    self.sparse_size = end;
                }
            } else {
                write_block(self.out.as_ref(), data, wpos).map_err(RescueError::Write)?;
                if self.synchronous {
                    sync_target(self.out.as_ref()).map_err(RescueError::Write)?;
                }
            }
        }
        if let Some(log) = &mut self.read_log {
            let rec = ReadRecord {
                pos: b.pos(),
                size: b.size(),
                copied,
                error,
            };
            if let Err(e) = log.record(&rec) {
                warn!("read log write failed: {e}");
            }
        }
        Ok((copied, error))
    }

    /// Recount the maximal contiguous damaged runs inside the domain.
    fn count_errors(&mut self) {
        let mut good = true;
        let mut errors = 0u32;
        for sb in self.book.vec().sblocks() {
            if !self.book.domain().includes(sb.block()) {
                if self.book.domain().lt(sb.block()) {
                    break;
                }
                continue;
            }
            if sb.status().is_damaged() {
                if good {
                    good = false;
                    errors += 1;
                }
            } else {
                good = true;
            }
        }
        self.errors = errors;
    }

    fn too_many_errors(&self) -> bool {
        self.max_errors >= 0 && i64::from(self.errors) > self.max_errors
    }

    /// Make the output at least as long as the sparse high-water mark
    /// or the requested minimum, with a single byte write at the end.
    fn extend_outfile_size(&mut self) -> io::Result<()> {
        if self.min_outfile_size > 0 || self.sparse_size > 0 {
            let min_size = self.min_outfile_size.max(self.sparse_size);
            let size = self.out.len()? as i64;
            if min_size > size {
                write_block(self.out.as_ref(), &[0u8], min_size - 1)?;
                let _ = sync_target(self.out.as_ref());
            }
        }
        Ok(())
    }
}
