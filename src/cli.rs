// Command-line interface for chunkpatch.
//
// Subcommands create patches (`diff`), apply them to one file (`apply`) or
// to a directory tree (`patch`), and inspect them (`show`, `config`).

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::engine::{self, DiffOptions};
use crate::hash::config::{self, ChunkerConfig};
use crate::io::{self as fileio, hex};
use crate::patch::codec::{self, InstructionReader};
use crate::patch::instruction::{Instruction, Opcode, ScriptSummary};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_LEVEL: u32 = 6;

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Content-defined binary patch tool.
#[derive(Parser, Debug)]
#[command(
    name = "chunkpatch",
    version,
    about = "Create and apply chunk-aligned binary patches",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a patch turning OLD into NEW.
    Diff(DiffArgs),
    /// Apply a single-file patch to a target file.
    Apply(ApplyArgs),
    /// Apply a (possibly multi-file) patch under a directory.
    Patch(PatchArgs),
    /// List the instructions in a patch.
    Show(ShowArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct DiffTuningArgs {
    /// Chunking level (0-9); higher levels use smaller chunks.
    #[arg(long, short = 'l', value_parser = clap::value_parser!(u32).range(0..=9), default_value_t = DEFAULT_LEVEL)]
    level: u32,

    /// Minimum chunk size (supports K/M/G suffix).
    #[arg(long = "min-chunk", value_parser = parse_byte_size)]
    min_chunk: Option<u64>,

    /// Target average chunk size (supports K/M/G suffix).
    #[arg(long = "chunk-size", value_parser = parse_byte_size)]
    chunk_size: Option<u64>,

    /// Maximum chunk size (supports K/M/G suffix).
    #[arg(long = "max-chunk", value_parser = parse_byte_size)]
    max_chunk: Option<u64>,

    /// Skip the instruction coalescing pass.
    #[arg(long = "no-coalesce")]
    no_coalesce: bool,
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Old version.
    #[arg(value_hint = ValueHint::FilePath)]
    old: PathBuf,

    /// New version.
    #[arg(value_hint = ValueHint::FilePath)]
    new: PathBuf,

    /// Patch output file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    output_pos: Option<PathBuf>,

    /// Patch output file.
    #[arg(long, short = 'o', value_hint = ValueHint::FilePath, conflicts_with = "output_pos")]
    output: Option<PathBuf>,

    /// Write the patch to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Relative path the patch selects before editing.
    #[arg(long)]
    label: Option<String>,

    #[command(flatten)]
    tuning: DiffTuningArgs,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// File to patch.
    #[arg(value_hint = ValueHint::FilePath)]
    target: PathBuf,

    /// Write the result here instead of replacing TARGET.
    #[arg(long, short = 'o', value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PatchArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Directory the patch's paths are relative to.
    #[arg(long, short = 'd', value_hint = ValueHint::DirPath, default_value = ".")]
    root: PathBuf,

    /// File edited before the patch selects one.
    #[arg(long = "default")]
    default_file: Option<String>,
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Print only the summary counts.
    #[arg(long)]
    summary: bool,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Diff,
    Apply,
    Patch,
    Show,
    Config,
}

#[derive(Debug)]
struct Options {
    command: Command,
    use_stdout: bool,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    level: u32,
    min_chunk: Option<u64>,
    chunk_size: Option<u64>,
    max_chunk: Option<u64>,
    coalesce: bool,
    old_file: Option<PathBuf>,
    new_file: Option<PathBuf>,
    patch_file: Option<PathBuf>,
    target_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    label: Option<String>,
    root: PathBuf,
    default_file: Option<String>,
    summary_only: bool,
}

impl Options {
    fn base(command: Command, force: bool, quiet: bool, verbose: u8, json_output: bool) -> Self {
        Options {
            command,
            use_stdout: false,
            force,
            quiet,
            verbose: verbose.min(2),
            json_output,
            level: DEFAULT_LEVEL,
            min_chunk: None,
            chunk_size: None,
            max_chunk: None,
            coalesce: true,
            old_file: None,
            new_file: None,
            patch_file: None,
            target_file: None,
            output_file: None,
            label: None,
            root: PathBuf::from("."),
            default_file: None,
            summary_only: false,
        }
    }
}

fn resolve_options(cli: Cli) -> Options {
    let Cli {
        command,
        force,
        quiet,
        verbose,
        json_output,
    } = cli;
    let base = |command| Options::base(command, force, quiet, verbose, json_output);

    match command {
        Cmd::Diff(args) => Options {
            use_stdout: args.stdout,
            level: args.tuning.level,
            min_chunk: args.tuning.min_chunk,
            chunk_size: args.tuning.chunk_size,
            max_chunk: args.tuning.max_chunk,
            coalesce: !args.tuning.no_coalesce,
            old_file: Some(args.old),
            new_file: Some(args.new),
            output_file: args.output.or(args.output_pos),
            label: args.label,
            ..base(Command::Diff)
        },
        Cmd::Apply(args) => Options {
            patch_file: Some(args.patch),
            target_file: Some(args.target),
            output_file: args.output,
            ..base(Command::Apply)
        },
        Cmd::Patch(args) => Options {
            patch_file: Some(args.patch),
            root: args.root,
            default_file: args.default_file,
            ..base(Command::Patch)
        },
        Cmd::Show(args) => Options {
            patch_file: Some(args.patch),
            summary_only: args.summary,
            ..base(Command::Show)
        },
        Cmd::Config => base(Command::Config),
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("chunkpatch".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let opts = resolve_options(cli);
        let _ = build_diff_options(&opts);
    }
}

// ---------------------------------------------------------------------------
// Build DiffOptions from CLI options
// ---------------------------------------------------------------------------

fn to_size(flag: &str, value: u64) -> Result<usize, String> {
    usize::try_from(value).map_err(|_| format!("--{flag}: {value} is too large"))
}

/// Start from the level's profile; explicit sizes override it. When only
/// `--chunk-size` is given, the bounds keep the default profile's ratios.
fn build_diff_options(opts: &Options) -> Result<DiffOptions, String> {
    let mut chunker: ChunkerConfig = config::config_for_level(opts.level);

    if opts.min_chunk.is_some() || opts.chunk_size.is_some() || opts.max_chunk.is_some() {
        let target = match opts.chunk_size {
            Some(v) => to_size("chunk-size", v)?,
            None => chunker.target_size,
        };
        let min = match opts.min_chunk {
            Some(v) => to_size("min-chunk", v)?,
            None if opts.chunk_size.is_some() => (target / 4).max(1),
            None => chunker.min_size,
        };
        let max = match opts.max_chunk {
            Some(v) => to_size("max-chunk", v)?,
            None if opts.chunk_size.is_some() => target.saturating_mul(8),
            None => chunker.max_size,
        };
        chunker = ChunkerConfig::custom(min, target, max).map_err(|e| e.to_string())?;
    }

    Ok(DiffOptions {
        chunker,
        coalesce: opts.coalesce,
    })
}

fn log_filter(opts: &Options) -> &'static str {
    if opts.quiet {
        return "error";
    }
    match opts.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => eprintln!("{s}"),
        Err(e) => eprintln!("chunkpatch: json error: {e}"),
    }
}

fn refuse_overwrite(path: &Path, opts: &Options) -> bool {
    if path.exists() && !opts.force {
        eprintln!(
            "chunkpatch: output file exists, use -f to overwrite: {}",
            path.display()
        );
        return true;
    }
    false
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("chunkpatch version {version}");

    let parallel = cfg!(feature = "parallel") as u8;
    eprintln!("PARALLEL={parallel}");
    eprintln!("DEFAULT_LEVEL={DEFAULT_LEVEL}");
    eprintln!("ROLLING_WINDOW={}", config::DEFAULT_WINDOW);
    for p in [config::FINE, config::DEFAULT, config::COARSE] {
        eprintln!(
            "PROFILE_{}={}/{}/{}",
            p.name.to_uppercase(),
            p.min_size,
            p.target_size,
            p.max_size
        );
    }
    for op in Opcode::ALL {
        eprintln!("OPCODE_{}=0x{:02X}", op.name(), op as u8);
    }

    0
}

// ---------------------------------------------------------------------------
// Diff command
// ---------------------------------------------------------------------------

fn cmd_diff(opts: &Options) -> i32 {
    let diff_opts = match build_diff_options(opts) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("chunkpatch: {e}");
            return 1;
        }
    };
    let (Some(old), Some(new)) = (&opts.old_file, &opts.new_file) else {
        eprintln!("chunkpatch: diff needs OLD and NEW");
        return 1;
    };

    let patch = match &opts.output_file {
        Some(patch) if !opts.use_stdout => patch,
        _ => return diff_to_stdout(opts, old, new, &diff_opts),
    };
    if refuse_overwrite(patch, opts) {
        return 1;
    }

    let stats = match fileio::diff_files(old, new, patch, opts.label.as_deref(), &diff_opts) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("chunkpatch: diff error: {e}");
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "chunkpatch: diff: old size: {}, new size: {}, chunks: {}/{}, \
             instructions: {}, literal bytes: {}, patch size: {}",
            stats.old_size,
            stats.new_size,
            stats.old_chunks,
            stats.new_chunks,
            stats.instructions,
            stats.literal_bytes,
            stats.patch_size
        );
    }

    if opts.json_output {
        print_json(&serde_json::json!({
            "command": "diff",
            "old_size": stats.old_size,
            "new_size": stats.new_size,
            "old_chunks": stats.old_chunks,
            "new_chunks": stats.new_chunks,
            "instructions": stats.instructions,
            "literal_bytes": stats.literal_bytes,
            "patch_size": stats.patch_size,
            "old_sha256": hex(&stats.old_sha256),
            "new_sha256": hex(&stats.new_sha256),
            "profile": diff_opts.chunker.name,
        }));
    }

    0
}

fn diff_to_stdout(opts: &Options, old: &Path, new: &Path, diff_opts: &DiffOptions) -> i32 {
    let old_data = match fs::read(old) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("chunkpatch: old file: {}: {e}", old.display());
            return 1;
        }
    };
    let new_data = match fs::read(new) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("chunkpatch: new file: {}: {e}", new.display());
            return 1;
        }
    };

    let script = match engine::diff(&old_data, &new_data, opts.label.as_deref(), diff_opts) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("chunkpatch: diff error: {e}");
            return 1;
        }
    };

    let mut out = BufWriter::with_capacity(BUF_SIZE, io::stdout().lock());
    if let Err(e) = codec::write_instructions(&mut out, &script) {
        eprintln!("chunkpatch: write error: {e}");
        return 1;
    }
    if let Err(e) = out.flush() {
        eprintln!("chunkpatch: write flush error: {e}");
        return 1;
    }

    if opts.json_output {
        let summary = ScriptSummary::of(&script);
        print_json(&serde_json::json!({
            "command": "diff",
            "old_size": old_data.len(),
            "new_size": new_data.len(),
            "instructions": script.len(),
            "literal_bytes": summary.literal_bytes,
            "patch_size": script.iter().map(codec::encoded_len).sum::<usize>(),
        }));
    }
    0
}

// ---------------------------------------------------------------------------
// Apply command
// ---------------------------------------------------------------------------

fn cmd_apply(opts: &Options) -> i32 {
    let (Some(patch), Some(target)) = (&opts.patch_file, &opts.target_file) else {
        eprintln!("chunkpatch: apply needs PATCH and TARGET");
        return 1;
    };

    let dest = match &opts.output_file {
        Some(out) => {
            if refuse_overwrite(out, opts) {
                return 1;
            }
            // A missing target patches as empty, as it does in place.
            let staged = match fs::copy(target, out) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => match fs::remove_file(out) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                    _ => Ok(0),
                },
                other => other,
            };
            if let Err(e) = staged {
                eprintln!("chunkpatch: target file: {}: {e}", target.display());
                return 1;
            }
            out
        }
        None => target,
    };

    let stats = match fileio::apply_file_atomic(patch, dest) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("chunkpatch: apply error: {e}");
            if dest != target {
                let _ = fs::remove_file(dest);
            }
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "chunkpatch: apply: instructions: {}, output size: {}",
            stats.instructions,
            stats.output_size.unwrap_or(0)
        );
    }

    if opts.json_output {
        print_json(&serde_json::json!({
            "command": "apply",
            "patch_size": stats.patch_size,
            "instructions": stats.instructions,
            "output_size": stats.output_size,
            "output_sha256": stats.output_sha256.map(|d| hex(&d)),
        }));
    }

    0
}

// ---------------------------------------------------------------------------
// Patch command
// ---------------------------------------------------------------------------

fn cmd_patch(opts: &Options) -> i32 {
    let Some(patch) = &opts.patch_file else {
        eprintln!("chunkpatch: patch needs PATCH");
        return 1;
    };

    let stats = match fileio::apply_patch(patch, &opts.root, opts.default_file.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("chunkpatch: patch error: {e}");
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "chunkpatch: patch: instructions: {}, files selected: {}, files removed: {}",
            stats.instructions, stats.summary.files, stats.summary.removals
        );
    }

    if opts.json_output {
        print_json(&serde_json::json!({
            "command": "patch",
            "patch_size": stats.patch_size,
            "instructions": stats.instructions,
            "files": stats.summary.files,
            "removals": stats.summary.removals,
        }));
    }

    0
}

// ---------------------------------------------------------------------------
// Show command
// ---------------------------------------------------------------------------

fn describe(inst: &Instruction) -> String {
    match inst {
        Instruction::Insert { offset, payload } | Instruction::Update { offset, payload } => {
            format!("offset={offset} len={}", payload.len())
        }
        Instruction::Delete { offset, count } => format!("offset={offset} count={count}"),
        Instruction::SetFile { path } | Instruction::DeleteFile { path } => format!("path={path:?}"),
    }
}

fn cmd_show(opts: &Options) -> i32 {
    let Some(patch) = &opts.patch_file else {
        eprintln!("chunkpatch: show needs PATCH");
        return 1;
    };
    let file = match File::open(patch) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("chunkpatch: patch file: {}: {e}", patch.display());
            return 1;
        }
    };

    let mut out = BufWriter::new(io::stdout().lock());
    let mut reader = InstructionReader::new(BufReader::with_capacity(BUF_SIZE, file));
    let mut script = Vec::new();
    let mut start = reader.position();

    while let Some(next) = reader.next() {
        let inst = match next {
            Ok(inst) => inst,
            Err(e) => {
                let _ = out.flush();
                eprintln!("chunkpatch: invalid patch: {e}");
                return 1;
            }
        };
        if !opts.summary_only {
            let line = format!(
                "{:6}  @{:<10} {:<8} {}",
                script.len(),
                start,
                inst.opcode().name(),
                describe(&inst)
            );
            if let Err(e) = writeln!(out, "{line}") {
                eprintln!("chunkpatch: write error: {e}");
                return 1;
            }
        }
        start = reader.position();
        script.push(inst);
    }

    let summary = ScriptSummary::of(&script);
    let totals = format!(
        "instructions: {} (insert {}, delete {}, update {}, setfile {}, delfile {}), \
         literal bytes: {}, deleted bytes: {}",
        script.len(),
        summary.inserts,
        summary.deletes,
        summary.updates,
        summary.files,
        summary.removals,
        summary.literal_bytes,
        summary.deleted_bytes
    );
    if !opts.quiet
        && let Err(e) = writeln!(out, "{totals}")
    {
        eprintln!("chunkpatch: write error: {e}");
        return 1;
    }
    if let Err(e) = out.flush() {
        eprintln!("chunkpatch: write flush error: {e}");
        return 1;
    }

    if opts.json_output {
        print_json(&serde_json::json!({
            "command": "show",
            "patch_size": reader.position(),
            "instructions": script.len(),
            "inserts": summary.inserts,
            "deletes": summary.deletes,
            "updates": summary.updates,
            "files": summary.files,
            "removals": summary.removals,
            "literal_bytes": summary.literal_bytes,
            "deleted_bytes": summary.deleted_bytes,
        }));
    }

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&opts)))
        .format_timestamp(None)
        .format_target(false)
        .init();

    // Warn if -c overrides output filename.
    if opts.use_stdout
        && !opts.quiet
        && let Some(path) = &opts.output_file
    {
        eprintln!(
            "chunkpatch: warning: -c option overrides output filename: {}",
            path.display()
        );
    }

    let exit_code = match opts.command {
        Command::Diff => cmd_diff(&opts),
        Command::Apply => cmd_apply(&opts),
        Command::Patch => cmd_patch(&opts),
        Command::Show => cmd_show(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_opts(args: &[&str]) -> Options {
        let argv: Vec<String> = std::iter::once("chunkpatch".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        let cli = Cli::try_parse_from(argv).expect("cli parse failed");
        resolve_options(cli)
    }

    #[test]
    fn parse_byte_size_suffixes() {
        assert_eq!(parse_byte_size("1").unwrap(), 1);
        assert_eq!(parse_byte_size("2K").unwrap(), 2 * 1024);
        assert_eq!(parse_byte_size("3m").unwrap(), 3 * 1024 * 1024);
        assert_eq!(parse_byte_size("4G").unwrap(), 4 * 1024 * 1024 * 1024);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("12X").is_err());
    }

    #[test]
    fn diff_subcommand_maps_correctly() {
        let opts = parse_opts(&[
            "diff",
            "--level",
            "9",
            "--label",
            "dir/file.bin",
            "old.bin",
            "new.bin",
            "out.cpt",
        ]);
        assert_eq!(opts.command, Command::Diff);
        assert_eq!(opts.level, 9);
        assert_eq!(opts.old_file, Some(PathBuf::from("old.bin")));
        assert_eq!(opts.new_file, Some(PathBuf::from("new.bin")));
        assert_eq!(opts.output_file, Some(PathBuf::from("out.cpt")));
        assert_eq!(opts.label.as_deref(), Some("dir/file.bin"));
        assert!(opts.coalesce);
    }

    #[test]
    fn diff_output_flag_and_stdout() {
        let opts = parse_opts(&["diff", "-c", "--output", "p.cpt", "a", "b"]);
        assert!(opts.use_stdout);
        assert_eq!(opts.output_file, Some(PathBuf::from("p.cpt")));
    }

    #[test]
    fn apply_subcommand_maps_correctly() {
        let opts = parse_opts(&["--quiet", "apply", "p.cpt", "target.bin", "-o", "out.bin"]);
        assert_eq!(opts.command, Command::Apply);
        assert!(opts.quiet);
        assert_eq!(opts.patch_file, Some(PathBuf::from("p.cpt")));
        assert_eq!(opts.target_file, Some(PathBuf::from("target.bin")));
        assert_eq!(opts.output_file, Some(PathBuf::from("out.bin")));
    }

    #[test]
    fn patch_subcommand_defaults() {
        let opts = parse_opts(&["patch", "p.cpt"]);
        assert_eq!(opts.command, Command::Patch);
        assert_eq!(opts.root, PathBuf::from("."));
        assert!(opts.default_file.is_none());

        let opts = parse_opts(&["patch", "--root", "tree", "--default", "main.bin", "p.cpt"]);
        assert_eq!(opts.root, PathBuf::from("tree"));
        assert_eq!(opts.default_file.as_deref(), Some("main.bin"));
    }

    #[test]
    fn show_and_config_map() {
        let opts = parse_opts(&["show", "--summary", "p.cpt"]);
        assert_eq!(opts.command, Command::Show);
        assert!(opts.summary_only);
        assert_eq!(parse_opts(&["config"]).command, Command::Config);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let opts = parse_opts(&["diff", "a", "b", "p", "--force", "--json"]);
        assert!(opts.force);
        assert!(opts.json_output);
    }

    #[test]
    fn verbose_is_capped() {
        let opts = parse_opts(&["-v", "-v", "-v", "config"]);
        assert_eq!(opts.verbose, 2);
        assert_eq!(log_filter(&opts), "debug");
        assert_eq!(log_filter(&parse_opts(&["config"])), "warn");
        assert_eq!(log_filter(&parse_opts(&["-q", "config"])), "error");
    }

    #[test]
    fn level_selects_profile() {
        let opts = parse_opts(&["diff", "--level", "1", "a", "b", "p"]);
        let d = build_diff_options(&opts).unwrap();
        assert_eq!(d.chunker, config::COARSE);

        let opts = parse_opts(&["diff", "a", "b", "p"]);
        assert_eq!(build_diff_options(&opts).unwrap(), DiffOptions::default());
    }

    #[test]
    fn chunk_size_flags_build_custom_profile() {
        let opts = parse_opts(&[
            "diff",
            "--min-chunk",
            "2K",
            "--chunk-size",
            "8K",
            "--max-chunk",
            "64K",
            "--no-coalesce",
            "a",
            "b",
            "p",
        ]);
        let d = build_diff_options(&opts).unwrap();
        assert_eq!(d.chunker.name, "custom");
        assert_eq!(d.chunker.min_size, 2 * 1024);
        assert_eq!(d.chunker.target_size, 8 * 1024);
        assert_eq!(d.chunker.max_size, 64 * 1024);
        assert!(!d.coalesce);
    }

    #[test]
    fn chunk_size_alone_scales_bounds() {
        let opts = parse_opts(&["diff", "--chunk-size", "16K", "a", "b", "p"]);
        let d = build_diff_options(&opts).unwrap();
        assert_eq!(d.chunker.min_size, 4 * 1024);
        assert_eq!(d.chunker.max_size, 128 * 1024);
    }

    #[test]
    fn inconsistent_chunk_sizes_rejected() {
        let opts = parse_opts(&["diff", "--min-chunk", "64K", "--max-chunk", "1K", "a", "b", "p"]);
        assert!(build_diff_options(&opts).is_err());
    }

    #[test]
    fn level_out_of_range_rejected() {
        let argv = ["chunkpatch", "diff", "--level", "10", "a", "b"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn fuzz_parse_never_panics_on_garbage() {
        fuzz_try_parse_args(&["diff".into(), "--chunk-size".into(), "0".into(), "a".into(), "b".into()]);
        fuzz_try_parse_args(&["--bogus".into()]);
        fuzz_try_parse_args(&[]);
    }
}
