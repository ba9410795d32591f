use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use blockrescue::{
    cli,
    config,
    fill::{parse_fill_types, Fillbook},
    generate::Genbook,
    domain::Domain,
    io::{FileSource, FileTarget, Source},
    logbook::Logbook,
    logging,
    mapfile,
    progress::format_bytes,
    readlog::ReadLogger,
    rescue::{Rescuebook, RunOutcome},
    signals,
};
use blockrescue::block::Status;

fn main() {
    logging::init_logging();
    let cli_opts = cli::parse();
    let code = match run(cli_opts) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli_opts: cli::CliOptions) -> Result<i32> {
    let mut settings = config::load_settings(cli_opts.config_path.as_deref())?;
    if let Some(v) = cli_opts.hardbs {
        settings.hardbs = v;
    }
    if let Some(v) = cli_opts.softbs {
        settings.softbs = v;
    }
    if let Some(v) = cli_opts.cluster {
        settings.cluster = v;
    }
    if let Some(v) = cli_opts.skipbs {
        settings.skipbs = v;
    }
    if let Some(v) = cli_opts.max_errors {
        settings.max_errors = v;
    }
    if let Some(v) = cli_opts.max_retries {
        settings.max_retries = v;
    }
    if let Some(v) = cli_opts.min_outfile_size {
        settings.min_outfile_size = v;
    }
    settings.nosplit |= cli_opts.no_split;
    settings.retrim |= cli_opts.retrim;
    settings.try_again |= cli_opts.try_again;
    settings.sparse |= cli_opts.sparse;
    settings.synchronous |= cli_opts.synchronous;
    settings.complete_only |= cli_opts.complete_only;
    settings.validate()?;

    if cli_opts.input_position < 0 {
        bail!("input position must not be negative");
    }
    if cli_opts.generate && cli_opts.fill.is_some() {
        bail!("fill and generate modes are mutually exclusive");
    }

    let input = FileSource::open(&cli_opts.input)
        .with_context(|| format!("opening input {}", cli_opts.input.display()))?;
    let insize = cli_opts
        .size
        .map(|s| cli_opts.input_position.saturating_add(s))
        .or_else(|| input.size());

    let mut domain = match &cli_opts.domain_mapfile {
        Some(path) => domain_from_mapfile(path)?,
        None => Domain::new(
            cli_opts.input_position,
            cli_opts.size.unwrap_or(i64::MAX - cli_opts.input_position),
        ),
    };
    if cli_opts.domain_mapfile.is_some() {
        let end = cli_opts
            .size
            .map(|s| cli_opts.input_position.saturating_add(s))
            .unwrap_or(i64::MAX);
        domain.crop(cli_opts.input_position, end);
    }

    let offset = cli_opts.output_position.unwrap_or(cli_opts.input_position)
        - cli_opts.input_position;

    let book = Logbook::new(
        cli_opts.mapfile.clone(),
        domain,
        insize,
        settings.cluster,
        settings.complete_only,
    )?;
    if book.domain().is_empty() {
        info!("nothing to do");
        return Ok(0);
    }

    let out = FileTarget::open(&cli_opts.output)
        .with_context(|| format!("opening output {}", cli_opts.output.display()))?;

    let outcome = if let Some(types) = &cli_opts.fill {
        let Some(types) = parse_fill_types(types) else {
            bail!("bad fill types {types:?}: use characters from ?*/-+");
        };
        if cli_opts.mapfile.is_none() {
            bail!("fill mode needs a mapfile");
        }
        let mut book = Fillbook::new(&settings, book, Box::new(out), offset);
        book.read_pattern(&input)?;
        info!("filling output blocks with statuses {:?}", cli_opts.fill);
        book.run(&types)?
    } else if cli_opts.generate {
        if cli_opts.mapfile.is_none() {
            bail!("generate mode needs a mapfile");
        }
        info!("generating mapfile from the output copy");
        let mut book = Genbook::new(&settings, book, Box::new(out), offset);
        book.run()?
    } else {
        let mut book = Rescuebook::new(&settings, book, Box::new(input), Box::new(out), offset);
        book.set_input_path(cli_opts.input.clone());
        if let Some(path) = &cli_opts.test_mode {
            book.set_test_domain(domain_from_mapfile(path)?);
        }
        if let Some(path) = &cli_opts.log_reads {
            book.set_read_logger(
                ReadLogger::create(path)
                    .with_context(|| format!("creating read log {}", path.display()))?,
            );
        }
        info!(
            "rescuing {} -> {}",
            cli_opts.input.display(),
            cli_opts.output.display()
        );
        let outcome = book.run()?;
        info!(
            "rescued={} errsize={} errors={}",
            format_bytes(book.recsize()),
            format_bytes(book.errsize()),
            book.errors()
        );
        outcome
    };

    match outcome {
        RunOutcome::Finished => Ok(0),
        RunOutcome::TooManyErrors => {
            info!("too many errors in input file");
            Ok(0)
        }
        RunOutcome::Interrupted(signum) => {
            info!("interrupted by signal {signum}");
            Ok(signals::signaled_exit(signum))
        }
    }
}

/// The finished blocks of another mapfile, as a rescue domain.
fn domain_from_mapfile(path: &Path) -> Result<Domain> {
    let map = mapfile::load(path)
        .with_context(|| format!("reading domain mapfile {}", path.display()))?;
    let blocks = map
        .sblocks
        .iter()
        .filter(|sb| sb.status() == Status::Finished)
        .map(|sb| *sb.block())
        .collect();
    Ok(Domain::from_blocks(blocks))
}
