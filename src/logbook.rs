//! Durable pairing of the sblock vector with the pass cursor.
//!
//! Every mutation the engine makes lands here, and a snapshot is taken
//! after every work unit so a killed run resumes exactly where the map
//! says it stopped.

use std::path::PathBuf;

use crate::block::{Block, Sblock, Status};
use crate::domain::Domain;
use crate::mapfile::{self, Cursor, CursorStatus, Mapfile, MapfileError};
use crate::sblocks::SblockVec;

pub struct Logbook {
    mapfile_path: Option<PathBuf>,
    domain: Domain,
    vec: SblockVec,
    cursor: Cursor,
    loaded: bool,
}

impl Logbook {
    /// Build the book from an existing mapfile when one is present,
    /// otherwise start a fresh single `non_tried` extent. `insize` is
    /// the declared input length; `None` leaves the end open until EOF
    /// is observed.
    pub fn new(
        mapfile_path: Option<PathBuf>,
        mut domain: Domain,
        insize: Option<i64>,
        cluster: usize,
        complete_only: bool,
    ) -> Result<Logbook, MapfileError> {
        let prior = match &mapfile_path {
            Some(path) if path.exists() => Some(mapfile::load(path)?),
            _ => None,
        };
        let loaded = prior.is_some();
        let (mut vec, cursor) = match prior {
            Some(map) => (assemble(map.sblocks), map.cursor),
            None => {
                let end = insize.unwrap_or(i64::MAX);
                (
                    SblockVec::new(0, end, cluster),
                    Cursor {
                        pos: 0,
                        status: CursorStatus::Copying,
                    },
                )
            }
        };
        if loaded && !complete_only {
            if let Some(isize) = insize {
                vec.extend_to(isize);
            }
        }
        domain.crop(vec.start(), vec.end());
        Ok(Logbook {
            mapfile_path,
            domain,
            vec,
            cursor,
            loaded,
        })
    }

    pub fn loaded_from_mapfile(&self) -> bool {
        self.loaded
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn vec(&self) -> &SblockVec {
        &self.vec
    }

    pub fn start(&self) -> i64 {
        self.vec.start()
    }

    pub fn end(&self) -> i64 {
        self.vec.end()
    }

    pub fn current_pos(&self) -> i64 {
        self.cursor.pos
    }

    pub fn current_status(&self) -> CursorStatus {
        self.cursor.status
    }

    pub fn set_cursor(&mut self, status: CursorStatus, pos: i64) {
        self.cursor = Cursor { pos, status };
    }

    pub fn find_chunk(&self, b: &mut Block, st: Status) {
        self.vec.find_chunk(b, st, &self.domain);
    }

    pub fn find_chunk_where<F>(&self, b: &mut Block, pred: F)
    where
        F: Fn(Status) -> bool,
    {
        self.vec.find_chunk_where(b, pred, &self.domain);
    }

    pub fn rfind_chunk(&self, b: &mut Block, st: Status) {
        self.vec.rfind_chunk(b, st, &self.domain);
    }

    pub fn find_index(&self, pos: i64) -> Option<usize> {
        self.vec.find_index(pos)
    }

    pub fn sblock(&self, index: usize) -> &Sblock {
        &self.vec.sblocks()[index]
    }

    pub fn change_chunk_status(&mut self, block: &Block, st: Status) {
        self.vec.change_chunk_status(block, st);
    }

    /// Forget everything at or past `end`: EOF arrived earlier than the
    /// declared size. The domain shrinks with the vector and the cursor
    /// is clamped.
    pub fn truncate_vector(&mut self, end: i64) {
        self.vec.truncate(end);
        let (start, end) = (self.vec.start(), self.vec.end());
        self.domain.crop(start, end);
        if self.cursor.pos > end {
            self.cursor.pos = end;
        }
    }

    /// One-shot status rewrite applied before a run (`retrim` /
    /// `try_again`). Only extents fully inside the domain change.
    pub fn rewrite_statuses(&mut self, from: &[Status], to: Status) {
        for i in 0..self.vec.sblocks().len() {
            let sb = &self.vec.sblocks()[i];
            if !self.domain.includes(sb.block()) {
                if self.domain.lt(sb.block()) {
                    break;
                }
                continue;
            }
            if from.contains(&sb.status()) {
                self.vec.set_status_at(i, to);
            }
        }
        self.vec.compact();
    }

    pub fn compact(&mut self) {
        self.vec.compact();
    }

    /// Take a durable snapshot. A missing mapfile path makes this a
    /// no-op: the run is then not resumable, by the operator's choice.
    pub fn update_mapfile(&self) -> Result<(), MapfileError> {
        let Some(path) = &self.mapfile_path else {
            return Ok(());
        };
        let map = Mapfile {
            cursor: self.cursor,
            sblocks: self.vec.sblocks().to_vec(),
        };
        mapfile::save(path, &map)
    }
}

/// Turn loaded triples into a gap-free partition from position zero:
/// holes become `non_tried`.
fn assemble(parts: Vec<Sblock>) -> SblockVec {
    let mut filled: Vec<Sblock> = Vec::with_capacity(parts.len() + 2);
    let mut at = 0i64;
    for sb in parts {
        if sb.pos() > at {
            filled.push(Sblock::new(
                Block::new(at, sb.pos() - at),
                Status::NonTried,
            ));
        }
        at = sb.end();
        filled.push(sb);
    }
    SblockVec::from_sblocks(filled)
}
