//! Fill mode: overwrite the output regions whose status is in a chosen
//! set with a repeating pattern. The map itself is not modified, only
//! the cursor moves, so a filled map can still drive later rescues.

use tracing::info;

use crate::block::{Block, Status};
use crate::config::Settings;
use crate::io::{read_block, sync_target, write_block, Source, Target};
use crate::logbook::Logbook;
use crate::mapfile::CursorStatus;
use crate::progress::{format_bytes, Progress};
use crate::rescue::{RescueError, RunOutcome};
use crate::signals;

pub struct Fillbook {
    book: Logbook,
    out: Box<dyn Target>,
    buf: Vec<u8>,
    offset: i64,
    softbs: i64,
    synchronous: bool,
    filled_size: i64,
    progress: Progress,
}

impl Fillbook {
    pub fn new(
        settings: &Settings,
        book: Logbook,
        out: Box<dyn Target>,
        offset: i64,
    ) -> Fillbook {
        Fillbook {
            book,
            out,
            buf: vec![0u8; settings.softbs as usize],
            offset,
            softbs: settings.softbs,
            synchronous: settings.synchronous,
            filled_size: 0,
            progress: Progress::new(std::time::Duration::from_secs(settings.progress_secs)),
        }
    }

    pub fn filled_size(&self) -> i64 {
        self.filled_size
    }

    pub fn logbook(&self) -> &Logbook {
        &self.book
    }

    /// Read up to one soft block of pattern from `src` and replicate it
    /// across the whole buffer.
    pub fn read_pattern(&mut self, src: &dyn Source) -> Result<(), RescueError> {
        let (n, _) = read_block(src, &mut self.buf, 0);
        if n == 0 {
            return Err(RescueError::EmptyPattern);
        }
        let mut i = n;
        while i < self.buf.len() {
            let size = i.min(self.buf.len() - i);
            self.buf.copy_within(0..size, i);
            i += size;
        }
        Ok(())
    }

    /// Fill every chunk whose status is in `fill_types`, resuming from
    /// the cursor when the previous run was also filling.
    pub fn run(&mut self, fill_types: &[Status]) -> Result<RunOutcome, RescueError> {
        signals::install();
        let result = self.fill_all(fill_types);
        if matches!(result, Ok(RunOutcome::Finished)) {
            self.book
                .set_cursor(CursorStatus::Finished, self.book.current_pos());
        }
        self.book.update_mapfile()?;
        info!("filled {}", format_bytes(self.filled_size));
        result
    }

    fn fill_all(&mut self, fill_types: &[Status]) -> Result<RunOutcome, RescueError> {
        let mut pos = 0i64;
        if self.book.current_status() == CursorStatus::Filling
            && self.book.domain().includes_pos(self.book.current_pos())
        {
            pos = self.book.current_pos();
        }
        loop {
            let mut b = Block::new(pos, self.softbs.min(i64::MAX - pos));
            self.book
                .find_chunk_where(&mut b, |s| fill_types.contains(&s));
            if b.size() <= 0 {
                return Ok(RunOutcome::Finished);
            }
            pos = b.end();
            self.book.set_cursor(CursorStatus::Filling, b.pos());
            self.fill_block(&b)?;
            self.progress
                .report("filling blocks", b.pos(), self.filled_size, 0, 0, false);
            if signals::interrupted() {
                return Ok(RunOutcome::Interrupted(signals::signum()));
            }
            self.book.update_mapfile()?;
        }
    }

    fn fill_block(&mut self, b: &Block) -> Result<(), RescueError> {
        assert!(
            b.size() > 0 && b.size() <= self.softbs,
            "bad size filling a block"
        );
        let data = &self.buf[..b.size() as usize];
        write_block(self.out.as_ref(), data, b.pos() + self.offset)
            .map_err(RescueError::Write)?;
        if self.synchronous {
            sync_target(self.out.as_ref()).map_err(RescueError::Write)?;
        }
        self.filled_size += b.size();
        Ok(())
    }
}

/// Parse a status-set argument such as `-*/` into fill types.
pub fn parse_fill_types(arg: &str) -> Option<Vec<Status>> {
    let mut types = Vec::new();
    for c in arg.chars() {
        types.push(Status::from_char(c)?);
    }
    if types.is_empty() {
        None
    } else {
        Some(types)
    }
}
