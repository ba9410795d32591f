//! Gap-free partition of the rescue interval into status-tagged blocks.
//!
//! The vector keeps four invariants across every mutation: it starts at
//! the engine start, adjacent entries touch exactly (`a.end == b.pos`),
//! adjacent entries carry different statuses, and every entry is
//! non-empty. Chunk searches are always filtered through a [`Domain`].

use crate::block::{Block, Sblock, Status};
use crate::domain::Domain;

#[derive(Debug, Clone)]
pub struct SblockVec {
    v: Vec<Sblock>,
}

impl SblockVec {
    /// Fresh vector: one `non_tried` extent covering `[start, end)`.
    pub fn new(start: i64, end: i64, capacity: usize) -> SblockVec {
        assert!(end > start, "empty rescue interval");
        let mut v = Vec::with_capacity(capacity.max(1));
        v.push(Sblock::new(Block::new(start, end - start), Status::NonTried));
        SblockVec { v }
    }

    /// Rebuild from already contiguous entries (a loaded mapfile).
    pub fn from_sblocks(parts: Vec<Sblock>) -> SblockVec {
        assert!(!parts.is_empty(), "empty sblock list");
        for w in parts.windows(2) {
            assert!(w[0].end() == w[1].pos(), "sblock list has gaps or overlaps");
        }
        assert!(parts.iter().all(|sb| sb.size() > 0), "empty sblock entry");
        let mut vec = SblockVec { v: parts };
        vec.compact();
        vec
    }

    pub fn start(&self) -> i64 {
        self.v[0].pos()
    }

    pub fn end(&self) -> i64 {
        self.v[self.v.len() - 1].end()
    }

    pub fn sblocks(&self) -> &[Sblock] {
        &self.v
    }

    /// Index of the entry containing `pos`.
    pub fn find_index(&self, pos: i64) -> Option<usize> {
        if pos < self.start() || pos >= self.end() {
            return None;
        }
        let i = self.v.partition_point(|sb| sb.end() <= pos);
        debug_assert!(self.v[i].block().includes_pos(pos));
        Some(i)
    }

    /// Shrink `b` to the first sub-interval at or after `b.pos` whose
    /// status equals `st`, intersected with the domain. `b.size` becomes
    /// zero when no such chunk exists; it never grows past its original
    /// size.
    pub fn find_chunk(&self, b: &mut Block, st: Status, domain: &Domain) {
        self.find_chunk_where(b, |s| s == st, domain);
    }

    pub fn find_chunk_where<F>(&self, b: &mut Block, pred: F, domain: &Domain)
    where
        F: Fn(Status) -> bool,
    {
        let orig_size = b.size();
        if orig_size <= 0 {
            return;
        }
        let mut pos = b.pos().max(self.start());
        loop {
            let Some(p) = next_pos_in_domain(domain, pos) else {
                b.set_size(0);
                return;
            };
            pos = p;
            let Some(i) = self.find_index(pos) else {
                b.set_size(0);
                return;
            };
            let sb = &self.v[i];
            if pred(sb.status()) {
                let (s, e) = domain
                    .first_range_in(pos, sb.end())
                    .expect("position was inside the domain");
                b.set_size(orig_size.min(e - s));
                b.set_pos(s);
                return;
            }
            pos = sb.end();
        }
    }

    /// Backward counterpart of [`find_chunk`]: the last matching chunk
    /// at or before `b.end`.
    pub fn rfind_chunk(&self, b: &mut Block, st: Status, domain: &Domain) {
        let orig_size = b.size();
        if orig_size <= 0 {
            return;
        }
        let mut end = b.end().min(self.end());
        loop {
            let Some(e) = prev_end_in_domain(domain, end) else {
                b.set_size(0);
                return;
            };
            end = e;
            if end <= self.start() {
                b.set_size(0);
                return;
            }
            let i = self
                .find_index(end - 1)
                .expect("position was inside the vector");
            let sb = &self.v[i];
            if sb.status() == st {
                let (s, e) = domain
                    .last_range_in(sb.pos(), end)
                    .expect("position was inside the domain");
                let pos = s.max(e - orig_size);
                b.set_size(e - pos);
                b.set_pos(pos);
                return;
            }
            end = sb.pos();
        }
    }

    /// Replace the status of `block` (which must lie inside the vector),
    /// splitting at its boundaries and re-merging like-status neighbours.
    pub fn change_chunk_status(&mut self, block: &Block, st: Status) {
        assert!(block.size() > 0, "empty chunk in status change");
        assert!(
            block.pos() >= self.start() && block.end() <= self.end(),
            "chunk outside the vector"
        );
        let mut i = self
            .find_index(block.pos())
            .expect("chunk start inside the vector");
        if self.v[i].pos() < block.pos() {
            let front = self.v[i].split(block.pos()).expect("split point interior");
            self.v.insert(i, front);
            i += 1;
        }
        let mut j = i;
        while j < self.v.len() && self.v[j].end() <= block.end() {
            j += 1;
        }
        if j < self.v.len() && self.v[j].pos() < block.end() {
            // the leading part of v[j] is covered by the replacement
            let _ = self.v[j].split(block.end()).expect("split point interior");
        }
        self.v.splice(i..j, [Sblock::new(*block, st)]);
        self.merge_around(i);
    }

    /// Rewrite one entry in place without merging. Callers restore the
    /// neighbour invariant with [`compact`] afterwards.
    pub fn set_status_at(&mut self, index: usize, st: Status) {
        self.v[index].set_status(st);
    }

    /// Drop everything at or past `end`. Used when EOF shows up before
    /// the declared input size.
    pub fn truncate(&mut self, end: i64) {
        assert!(end > self.start(), "truncation before the vector start");
        if end >= self.end() {
            return;
        }
        let i = self.find_index(end).expect("end inside the vector");
        if self.v[i].pos() < end {
            self.v[i].set_end(end);
            self.v.truncate(i + 1);
        } else {
            self.v.truncate(i);
        }
    }

    /// Grow the span with `non_tried` up to `end`.
    pub fn extend_to(&mut self, end: i64) {
        if end <= self.end() {
            return;
        }
        let last = self.v.last_mut().expect("vector never empty");
        if last.status() == Status::NonTried {
            last.set_end(end);
        } else {
            let pos = last.end();
            self.v
                .push(Sblock::new(Block::new(pos, end - pos), Status::NonTried));
        }
    }

    /// Collapse redundant splits before a final snapshot.
    pub fn compact(&mut self) {
        let mut out: Vec<Sblock> = Vec::with_capacity(self.v.len());
        for sb in self.v.drain(..) {
            match out.last_mut() {
                Some(last) if last.status() == sb.status() => last.set_end(sb.end()),
                _ => out.push(sb),
            }
        }
        self.v = out;
    }

    /// Panics unless all four partition invariants hold.
    pub fn assert_partition(&self) {
        assert!(!self.v.is_empty());
        for sb in &self.v {
            assert!(sb.size() > 0, "empty sblock");
        }
        for w in self.v.windows(2) {
            assert_eq!(w[0].end(), w[1].pos(), "gap or overlap");
            assert_ne!(w[0].status(), w[1].status(), "unmerged neighbours");
        }
    }

    fn merge_around(&mut self, i: usize) {
        if i + 1 < self.v.len() && self.v[i].status() == self.v[i + 1].status() {
            let e = self.v[i + 1].end();
            self.v[i].set_end(e);
            self.v.remove(i + 1);
        }
        if i > 0 && self.v[i - 1].status() == self.v[i].status() {
            let e = self.v[i].end();
            self.v[i - 1].set_end(e);
            self.v.remove(i);
        }
    }
}

fn next_pos_in_domain(domain: &Domain, pos: i64) -> Option<i64> {
    domain.first_range_in(pos, i64::MAX).map(|(s, _)| s)
}

fn prev_end_in_domain(domain: &Domain, end: i64) -> Option<i64> {
    domain.last_range_in(0, end).map(|(_, e)| e)
}
