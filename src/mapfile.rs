//! On-disk map format: comment lines, one cursor line, then one
//! `pos size status` triple per extent, all positions in hex.
//!
//! A reader must never observe a torn file, so saves go through a
//! sibling temp file that is fsynced and renamed over the target.

use std::fs;
use std::io::Write;
use std::path::Path;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{
    char, digit1, hex_digit1, line_ending, multispace0, not_line_ending, one_of, space1,
};
use nom::combinator::{all_consuming, eof, map_res, opt};
use nom::multi::many0;
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;
use thiserror::Error;

use crate::block::{Block, Sblock, Status};

/// Phase recorded in the cursor line; tells a resumed run which pass
/// was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStatus {
    Copying,
    Trimming,
    Splitting,
    Retrying,
    Filling,
    Generating,
    Finished,
}

impl CursorStatus {
    pub fn as_char(self) -> char {
        match self {
            CursorStatus::Copying => '?',
            CursorStatus::Trimming => '*',
            CursorStatus::Splitting => '/',
            CursorStatus::Retrying => '-',
            CursorStatus::Filling => 'F',
            CursorStatus::Generating => 'G',
            CursorStatus::Finished => '+',
        }
    }

    pub fn from_char(c: char) -> Option<CursorStatus> {
        match c {
            '?' => Some(CursorStatus::Copying),
            '*' => Some(CursorStatus::Trimming),
            '/' => Some(CursorStatus::Splitting),
            '-' => Some(CursorStatus::Retrying),
            'F' => Some(CursorStatus::Filling),
            'G' => Some(CursorStatus::Generating),
            '+' => Some(CursorStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub pos: i64,
    pub status: CursorStatus,
}

/// Parsed map: the cursor plus the raw extent triples, exactly as they
/// appear in the file. Gap filling and invariant checks happen when the
/// logbook assembles its vector from this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapfile {
    pub cursor: Cursor,
    pub sblocks: Vec<Sblock>,
}

#[derive(Debug, Error)]
pub enum MapfileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed mapfile: {0}")]
    Parse(String),
    #[error("mapfile describes no data")]
    Empty,
    #[error("mapfile extents overlap or run backwards at 0x{0:X}")]
    Overlap(i64),
}

fn hex_i64(input: &str) -> IResult<&str, i64> {
    preceded(
        tag("0x"),
        map_res(hex_digit1, |s: &str| i64::from_str_radix(s, 16)),
    )(input)
}

fn block_status(input: &str) -> IResult<&str, Status> {
    map_res(one_of("?*/-+"), |c| Status::from_char(c).ok_or(()))(input)
}

fn cursor_status(input: &str) -> IResult<&str, CursorStatus> {
    map_res(one_of("?*/-FG+"), |c| CursorStatus::from_char(c).ok_or(()))(input)
}

fn comment_line(input: &str) -> IResult<&str, &str> {
    preceded(char('#'), terminated(not_line_ending, line_ending))(input)
}

fn end_of_line(input: &str) -> IResult<&str, &str> {
    alt((line_ending, eof))(input)
}

fn cursor_line(input: &str) -> IResult<&str, Cursor> {
    let (input, (pos, _, status, _pass, _)) = tuple((
        hex_i64,
        space1,
        cursor_status,
        // pass counters written by other tools are accepted and ignored
        opt(preceded(space1, digit1)),
        end_of_line,
    ))(input)?;
    Ok((input, Cursor { pos, status }))
}

fn sblock_line(input: &str) -> IResult<&str, (i64, i64, Status)> {
    let (input, (pos, _, size, _, status, _)) = tuple((
        hex_i64,
        space1,
        hex_i64,
        space1,
        block_status,
        end_of_line,
    ))(input)?;
    Ok((input, (pos, size, status)))
}

fn mapfile(input: &str) -> IResult<&str, Mapfile> {
    let (input, _) = many0(comment_line)(input)?;
    let (input, cursor) = cursor_line(input)?;
    let (input, _) = many0(comment_line)(input)?;
    let (input, triples) = many0(preceded(many0(comment_line), sblock_line))(input)?;
    let (input, _) = multispace0(input)?;
    let sblocks = triples
        .into_iter()
        .map(|(pos, size, status)| Sblock::new(Block::new(pos, size), status))
        .collect();
    Ok((input, Mapfile { cursor, sblocks }))
}

pub fn parse(text: &str) -> Result<Mapfile, MapfileError> {
    let (_, map) = all_consuming(mapfile)(text)
        .map_err(|e| MapfileError::Parse(e.to_string()))?;
    if map.sblocks.is_empty() {
        return Err(MapfileError::Empty);
    }
    let mut prev_end = -1i64;
    for sb in &map.sblocks {
        if sb.pos() < prev_end || sb.size() <= 0 {
            return Err(MapfileError::Overlap(sb.pos()));
        }
        prev_end = sb.end();
    }
    Ok(map)
}

pub fn load(path: &Path) -> Result<Mapfile, MapfileError> {
    let text = fs::read_to_string(path)?;
    parse(&text)
}

/// Write the map crash-atomically: temp sibling, fsync, rename.
pub fn save(path: &Path, map: &Mapfile) -> Result<(), MapfileError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    {
        let mut f = fs::File::create(&tmp)?;
        writeln!(
            f,
            "# Rescue mapfile. Created by blockrescue version {}",
            env!("CARGO_PKG_VERSION")
        )?;
        writeln!(
            f,
            "# Date: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f, "# current_pos  current_status")?;
        writeln!(f, "0x{:08X}     {}", map.cursor.pos, map.cursor.status.as_char())?;
        writeln!(f, "#      pos        size  status")?;
        for sb in &map.sblocks {
            writeln!(
                f,
                "0x{:08X}  0x{:08X}  {}",
                sb.pos(),
                sb.size(),
                sb.status().as_char()
            )?;
        }
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
