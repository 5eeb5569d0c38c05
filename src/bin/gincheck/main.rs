//! Binary entry point for the gincheck CLI.
#![forbid(unsafe_code)]

mod ui;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use gincheck::{
    admin::{
        verify, AccessMethod, Catalog, CheckError, DefaultPageSanity, Persistence, VerifyOptions,
        VerifyReport, VerifySeverity,
    },
    logging::init_logging,
    primitives::pager::{PageStore, Pager, PagerOptions},
    storage::gin::{
        build_index, int64_key, BuildOptions, GinMeta, GinPage, IndexEntry, KeyType, META_BLOCK,
    },
    types::{page::PageHeader, HeapPointer, PageId},
};
use serde::Serialize;
use ui::{Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "gincheck",
    version,
    about = "Structural checker for GIN index files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "GINCHECK_LOG",
        default_value = "warn",
        help = "Tracing filter, e.g. `info` or `gincheck=debug`"
    )]
    log_level: String,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ColorArg::Auto,
        help = "Colorize text output"
    )]
    color: ColorArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Verify the structure of an index file")]
    Verify(VerifyCmd),

    #[command(about = "Write a demo index with inline lists and posting trees")]
    SeedDemo(SeedDemoCmd),

    #[command(about = "Decode one page and dump its bytes")]
    Inspect(InspectCmd),
}

#[derive(Args, Debug)]
struct VerifyCmd {
    #[arg(value_name = "INDEX")]
    index_path: PathBuf,

    #[arg(long, help = "Skip posting list decoding and posting tree walks")]
    no_postings: bool,

    #[arg(long, help = "Do not recompute page checksums")]
    skip_checksums: bool,

    #[arg(long, env = "GINCHECK_CACHE_PAGES", default_value_t = 128, help = "Page cache size (pages)")]
    cache_pages: usize,
}

#[derive(Args, Debug)]
struct SeedDemoCmd {
    #[arg(value_name = "INDEX")]
    index_path: PathBuf,

    #[arg(long, default_value_t = 8192, help = "Page size in bytes")]
    page_size: u32,

    #[arg(long, default_value_t = 2000, help = "Number of distinct keys")]
    entries: u32,

    #[arg(long, help = "Store posting lists uncompressed")]
    raw_postings: bool,

    #[arg(long, help = "Fixed checksum salt")]
    salt: Option<u64>,
}

#[derive(Args, Debug)]
struct InspectCmd {
    #[arg(value_name = "INDEX")]
    index_path: PathBuf,

    #[arg(long, value_name = "N", help = "Block number to decode")]
    page: u64,

    #[arg(long, default_value_t = 256, help = "Bytes of the page to hex dump")]
    dump_bytes: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ColorArg {
    Auto,
    Never,
}

impl From<ColorArg> for Theme {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Theme::Auto,
            ColorArg::Never => Theme::Plain,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let ui = Ui::new(cli.color.into());

    match &cli.command {
        Command::Verify(cmd) => {
            if !run_verify(cmd, &cli.format, &ui)? {
                std::process::exit(2);
            }
        }
        Command::SeedDemo(cmd) => {
            let report = run_seed_demo(cmd)?;
            emit(&cli.format, &report, || print_seed_text(&ui, &report))?;
        }
        Command::Inspect(cmd) => {
            let report = run_inspect(cmd)?;
            emit(&cli.format, &report, || print_inspect_text(&ui, &report))?;
        }
    }
    Ok(())
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn index_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string())
}

/// Returns `Ok(false)` when the index is corrupt.
fn run_verify(cmd: &VerifyCmd, format: &OutputFormat, ui: &Ui) -> Result<bool, Box<dyn Error>> {
    let pager = Pager::open(
        &cmd.index_path,
        PagerOptions {
            cache_pages: cmd.cache_pages,
            ..PagerOptions::default()
        },
    )?;
    let name = index_name(&cmd.index_path);
    let catalog = Catalog::new();
    let table = catalog.create_table(format!("{name}_table"), Persistence::Permanent);
    let index = catalog.create_index(
        name,
        table,
        AccessMethod::Gin,
        Persistence::Permanent,
        Arc::new(pager),
    )?;
    let options = VerifyOptions {
        validate_postings: !cmd.no_postings,
        sanity: Arc::new(DefaultPageSanity {
            verify_checksums: !cmd.skip_checksums,
        }),
        ..VerifyOptions::default()
    };

    match verify(&catalog, index, &options) {
        Ok(report) => {
            emit(format, &report, || print_verify_text(ui, &report))?;
            Ok(true)
        }
        Err(err) if err.is_corruption() => {
            let failure = CorruptionOutput::from_error(&err);
            emit(format, &failure, || ui.error(&failure.message))?;
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Serialize)]
struct CorruptionOutput {
    corrupted: bool,
    block: Option<u64>,
    offset: Option<u16>,
    message: String,
}

impl CorruptionOutput {
    fn from_error(err: &CheckError) -> Self {
        let location = err.corruption();
        Self {
            corrupted: true,
            block: location.map(|(block, _, _)| block.0),
            offset: location.and_then(|(_, offset, _)| offset),
            message: err.to_string(),
        }
    }
}

fn print_verify_text(ui: &Ui, report: &VerifyReport) {
    if report.skipped {
        for notice in &report.notices {
            ui.warn(&notice.message);
        }
        return;
    }
    let counts = &report.counts;
    let leaf_depth = counts
        .leaf_depth
        .map_or_else(|| "-".to_string(), |depth| depth.to_string());
    ui.section(
        "Entry tree",
        [
            ("pages", counts.entry_pages.to_string()),
            ("leaf pages", counts.entry_leaf_pages.to_string()),
            ("tuples", counts.entry_tuples.to_string()),
            ("leaf depth", leaf_depth),
            ("deleted pages", counts.deleted_pages.to_string()),
        ],
    );
    ui.section(
        "Posting data",
        [
            ("posting trees", counts.posting_trees.to_string()),
            ("posting pages", counts.posting_pages.to_string()),
            ("heap pointers", counts.heap_pointers.to_string()),
        ],
    );
    ui.section(
        "Concurrency",
        [
            ("splits followed", counts.splits_detected.to_string()),
            ("parents re-read", counts.parents_refound.to_string()),
        ],
    );
    ui.list(
        "Notices",
        report.notices.iter().map(|notice| match notice.severity {
            VerifySeverity::Info => format!("info: {}", notice.message),
            VerifySeverity::Notice => format!("notice: {}", notice.message),
        }),
    );
    ui.success(&format!("index \"{}\" verified", report.relation));
}

#[derive(Serialize)]
struct SeedReport {
    path: String,
    salt: u64,
    entries: u64,
    entry_pages: u64,
    data_pages: u64,
    entry_levels: usize,
    posting_trees: usize,
}

fn demo_entries(count: u32) -> Vec<IndexEntry> {
    (1..=count)
        .map(|key| {
            let postings = if key % 16 == 0 { 600 } else { key % 7 + 1 };
            let items = (0..postings)
                .map(|i| HeapPointer::new(key * 3 + i / 100 + 1, (i % 100) as u16 + 1))
                .collect();
            IndexEntry::new(1, int64_key(key as i64), items)
        })
        .collect()
}

fn run_seed_demo(cmd: &SeedDemoCmd) -> Result<SeedReport, Box<dyn Error>> {
    if cmd.index_path.exists() {
        return Err(format!("{} already exists", cmd.index_path.display()).into());
    }
    let pager = Pager::create(
        &cmd.index_path,
        PagerOptions {
            page_size: cmd.page_size,
            ..PagerOptions::default()
        },
    )?;
    let options = BuildOptions {
        key_types: vec![KeyType::Int64],
        compress_postings: !cmd.raw_postings,
        salt: cmd.salt,
        ..BuildOptions::default()
    };
    let summary = build_index(&pager, demo_entries(cmd.entries), &options)?;
    Ok(SeedReport {
        path: cmd.index_path.display().to_string(),
        salt: summary.salt,
        entries: summary.entries,
        entry_pages: summary.entry_pages,
        data_pages: summary.data_pages,
        entry_levels: summary.entry_levels.len(),
        posting_trees: summary.posting_roots.len(),
    })
}

fn print_seed_text(ui: &Ui, report: &SeedReport) {
    ui.section(
        "Demo index",
        [
            ("path", report.path.clone()),
            ("entries", report.entries.to_string()),
            ("entry pages", report.entry_pages.to_string()),
            ("posting pages", report.data_pages.to_string()),
            ("entry levels", report.entry_levels.to_string()),
            ("posting trees", report.posting_trees.to_string()),
        ],
    );
    ui.success(&format!("wrote {}", report.path));
}

#[derive(Serialize)]
struct InspectReport {
    page: u64,
    kind: String,
    page_size: u32,
    salt: u64,
    crc32: u32,
    detail: Vec<(String, String)>,
    hex: Vec<String>,
}

fn run_inspect(cmd: &InspectCmd) -> Result<InspectReport, Box<dyn Error>> {
    let pager = Pager::open(&cmd.index_path, PagerOptions::default())?;
    let id = PageId(cmd.page);
    let page = pager.read_shared(id)?;
    let data = page.data();
    let header = PageHeader::decode(data)?;

    let mut detail = Vec::new();
    if id == META_BLOCK {
        let meta = GinMeta::decode(data)?;
        let key_types: Vec<String> = meta.key_types.iter().map(KeyType::to_string).collect();
        detail.push(("key types".to_string(), key_types.join(", ")));
        detail.push(("entries".to_string(), meta.entries.to_string()));
        detail.push(("entry pages".to_string(), meta.entry_pages.to_string()));
        detail.push(("posting pages".to_string(), meta.data_pages.to_string()));
    } else {
        let view = GinPage::parse(data)?;
        let opaque = view.opaque();
        let right_link = opaque
            .right_link
            .map_or_else(|| "none".to_string(), |link| link.to_string());
        detail.push(("flags".to_string(), format!("{:#06x}", opaque.flags)));
        detail.push(("leaf".to_string(), view.is_leaf().to_string()));
        detail.push(("deleted".to_string(), view.is_deleted().to_string()));
        detail.push(("items".to_string(), opaque.max_offset.to_string()));
        detail.push(("right link".to_string(), right_link));
        detail.push(("lsn".to_string(), opaque.lsn.to_string()));
        if view.is_data() {
            detail.push(("right bound".to_string(), opaque.right_bound.to_string()));
        }
        detail.push((
            "free space".to_string(),
            format!("{}..{}", opaque.free_start, opaque.free_end),
        ));
    }

    let dump = &data[..cmd.dump_bytes.min(data.len())];
    let hex = dump.chunks(32).map(hex::encode).collect();
    Ok(InspectReport {
        page: id.0,
        kind: format!("{:?}", header.kind),
        page_size: header.page_size,
        salt: header.salt,
        crc32: header.crc32,
        detail,
        hex,
    })
}

fn print_inspect_text(ui: &Ui, report: &InspectReport) {
    ui.section(
        &format!("Page {}", report.page),
        [
            ("kind", report.kind.clone()),
            ("page size", report.page_size.to_string()),
            ("salt", format!("{:#018x}", report.salt)),
            ("crc32", format!("{:#010x}", report.crc32)),
        ],
    );
    ui.section(
        "Contents",
        report
            .detail
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone())),
    );
    ui.list("Bytes", report.hex.iter().cloned());
}
