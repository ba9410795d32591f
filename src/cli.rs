use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Input file or device to rescue
    pub input: PathBuf,

    /// Output file or device
    pub output: PathBuf,

    /// Mapfile recording progress; omit for a non-resumable run
    pub mapfile: Option<PathBuf>,

    /// Optional path to a YAML defaults file
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Hardware block size, in bytes
    #[arg(short = 'b', long)]
    pub hardbs: Option<i64>,

    /// Soft block size for the first pass, in bytes
    #[arg(long)]
    pub softbs: Option<i64>,

    /// Capacity hint for the block map
    #[arg(long)]
    pub cluster: Option<usize>,

    /// Minimum size to skip after a read error, in bytes
    #[arg(long)]
    pub skipbs: Option<i64>,

    /// Start position in the input
    #[arg(short = 'i', long, default_value_t = 0)]
    pub input_position: i64,

    /// Start position in the output (defaults to the input position)
    #[arg(short = 'o', long)]
    pub output_position: Option<i64>,

    /// Maximum number of bytes to rescue
    #[arg(short = 's', long)]
    pub size: Option<i64>,

    /// Stop after this many error areas (negative: unlimited)
    #[arg(short = 'e', long)]
    pub max_errors: Option<i64>,

    /// Retry passes over bad sectors (0: none, negative: forever)
    #[arg(short = 'r', long)]
    pub max_retries: Option<i64>,

    /// Do not try to split error areas
    #[arg(short = 'n', long)]
    pub no_split: bool,

    /// Mark failed areas as non-trimmed again before starting
    #[arg(short = 'M', long)]
    pub retrim: bool,

    /// Mark failed areas as non-tried again before starting
    #[arg(short = 'A', long)]
    pub try_again: bool,

    /// Skip writes of all-zero blocks
    #[arg(short = 'S', long)]
    pub sparse: bool,

    /// fsync the output after every write
    #[arg(short = 'D', long)]
    pub synchronous: bool,

    /// Restrict the rescue to what the mapfile already describes
    #[arg(short = 'C', long)]
    pub complete_only: bool,

    /// Grow the output to at least this many bytes at the end
    #[arg(long)]
    pub min_outfile_size: Option<i64>,

    /// Restrict the rescue domain to the finished blocks of this mapfile
    #[arg(short = 'm', long)]
    pub domain_mapfile: Option<PathBuf>,

    /// Presume everything outside the finished blocks of this mapfile
    /// to be bad, without reading it
    #[arg(long)]
    pub test_mode: Option<PathBuf>,

    /// Write a JSONL record of every read attempt to this file
    #[arg(long)]
    pub log_reads: Option<PathBuf>,

    /// Fill the output blocks with the given statuses (e.g. "-*/")
    /// using data read from the input
    #[arg(long, value_name = "TYPES")]
    pub fill: Option<String>,

    /// Generate an approximate mapfile from the output copy
    #[arg(short = 'G', long)]
    pub generate: bool,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
