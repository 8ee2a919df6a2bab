//! A binary to index an assembly file and print its records.
//!
//! ```shell
//! cargo run --release --bin=assembly-inspect --features=binaries -- --format ace assembly.ace
//! cargo run --release --bin=assembly-inspect --features=binaries -- --format phd reads.phd.gz --id read1
//! ```
//!
//! Without `--id`, every record id is printed in file order. With it, the one
//! record is decoded and summarized. Files that cannot seek (gzip) are not
//! indexed; their records are read in a single streaming pass instead.

use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use assemblyfile::ace;
use assemblyfile::asm;
use assemblyfile::cas;
use assemblyfile::datastore::Driver;
use assemblyfile::datastore::Indexed;
use assemblyfile::parse::Source;
use assemblyfile::phd;
use assemblyfile::sff;
use clap::Parser;
use clap::ValueEnum;
use clap_verbosity_flag::Verbosity;
use tracing::info;
use tracing_log::AsTrace as _;
use tracing_subscriber::EnvFilter;

/// The formats that can be inspected.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// CAS reference alignments.
    Cas,

    /// Standard Flowgram Format reads.
    Sff,

    /// ACE assemblies.
    Ace,

    /// PHD basecalls.
    Phd,

    /// ASM assembler messages.
    Asm,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The file to inspect. Files ending in `.gz` are decompressed.
    path: PathBuf,

    /// The format of the file.
    #[arg(short, long, value_enum)]
    format: Format,

    /// If desired, the id of a single record to print.
    #[arg(short, long)]
    id: Option<String>,

    #[command(flatten)]
    verbose: Verbosity,
}

/// Indexes `driver` and prints either every id or the record named `id`.
fn inspect<D>(driver: D, id: Option<D::Id>, describe: impl Fn(&D::Record) -> String) -> Result<()>
where
    D: Driver,
    D::Id: std::fmt::Display,
{
    if !driver.can_create_bookmark() {
        info!("source cannot seek, streaming records");
        return stream(&driver, id, describe);
    }

    let store = Indexed::build(driver).context("indexing file")?;
    info!("indexed {} records", store.len()?);

    match id {
        Some(id) => match store.get(&id)? {
            Some(record) => println!("{}", describe(&record)),
            None => bail!("no record with id {id}"),
        },
        None => {
            for id in store.ids()? {
                println!("{id}");
            }
        }
    }

    store.close();
    Ok(())
}

/// Prints either every id or the record named `id` in one pass over `driver`.
fn stream<D>(driver: &D, id: Option<D::Id>, describe: impl Fn(&D::Record) -> String) -> Result<()>
where
    D: Driver,
    D::Id: std::fmt::Display,
{
    let mut found = false;

    driver
        .scan(&mut |record_id, record| match &id {
            Some(id) if *id == record_id => {
                println!("{}", describe(&record));
                found = true;
                false
            }
            Some(_) => true,
            None => {
                println!("{record_id}");
                true
            }
        })
        .context("reading file")?;

    match id {
        Some(id) if !found => bail!("no record with id {id}"),
        _ => Ok(()),
    }
}

fn describe_cas(read: &cas::AlignedRead) -> String {
    match (read.reference_range(), read.valid_range()) {
        (Some(reference), Some(valid)) => format!(
            "read {}: aligned to {} (valid range {})",
            read.index(),
            reference,
            valid
        ),
        _ => format!("read {}: unaligned", read.index()),
    }
}

fn describe_sff(flowgram: &sff::Flowgram) -> String {
    format!(
        "{}\t{}\tvalid range {}",
        flowgram.name(),
        flowgram.bases(),
        flowgram.valid_range()
    )
}

fn describe_phd(phd: &phd::Phd) -> String {
    format!(
        "{}\t{}\t{} tags",
        phd.id(),
        phd.basecalls(),
        phd.tags().len()
    )
}

fn describe_ace(contig: &assemblyfile::assembly::Contig) -> String {
    let mut lines = vec![format!("{}\t{}", contig.id(), contig.consensus())];

    for read in contig.reads() {
        lines.push(format!(
            "  {}\t{}\t{}\t{}",
            read.id(),
            read.direction(),
            read.consensus_range(),
            read.sequence().differences().len()
        ));
    }

    lines.join("\n")
}

fn describe_asm(message: &asm::Message) -> String {
    let mut lines = vec![format!("{{{}", message.kind())];

    for (key, value) in message.fields() {
        lines.push(format!("{key}:{value}"));
    }

    lines.push(format!("({} nested messages)", message.children().len()));
    lines.push(String::from("}"));
    lines.join("\n")
}

fn throw(args: Args) -> Result<()> {
    let source = Source::from_path(&args.path);
    info!("reading {}", args.path.display());

    match args.format {
        Format::Cas => {
            let id = args
                .id
                .map(|id| id.parse::<u64>())
                .transpose()
                .context("parsing CAS read index")?;
            inspect(cas::Parser::new(source), id, describe_cas)
        }
        Format::Sff => inspect(sff::Parser::new(source), args.id, describe_sff),
        Format::Ace => inspect(ace::Parser::new(source), args.id, describe_ace),
        Format::Phd => inspect(phd::Parser::new(source), args.id, describe_phd),
        Format::Asm => inspect(asm::Parser::new(source), args.id, describe_asm),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_max_level(args.verbose.log_level_filter().as_trace())
            .init(),
    };

    throw(args)
}
