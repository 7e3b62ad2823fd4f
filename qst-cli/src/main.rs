mod manifest;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use memmap2::Mmap;
use qst_asm::{assemble, disassemble};
use qst_bytecode::{Severity, WriteError, parse_bytecode, write_bytecode};
use qst_ir::{BytecodeIr, SegmentType};
use qst_isa::Format;

use manifest::{FormatName, LabelManifest};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(target_env = "msvc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "qst", about = "Quest script bytecode assembler and disassembler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Disassemble bytecode to assembly text
    Disasm {
        /// Path to the bytecode
        input: PathBuf,
        /// Label manifest of the bytecode
        #[arg(long)]
        labels: PathBuf,
        /// Write arg_push instructions out instead of folding them into their consumer
        #[arg(long)]
        manual_stack: bool,
        /// Keep going past structural errors
        #[arg(long)]
        lenient: bool,
        /// Overrides the manifest's format
        #[arg(long, value_enum)]
        format: Option<FormatName>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Assemble text into bytecode
    Asm {
        /// Path to the assembly text
        input: PathBuf,
        /// Expect arg_push instructions to be written out
        #[arg(long)]
        manual_stack: bool,
        #[arg(long, value_enum, default_value = "network-variant")]
        format: FormatName,
        /// Output bytecode file
        #[arg(short, long)]
        output: PathBuf,
        /// Where to write the label manifest of the output
        #[arg(long)]
        labels_out: Option<PathBuf>,
    },
    /// Check that bytecode survives decoding, and disassembly, unchanged
    Roundtrip {
        /// Path to the bytecode
        input: PathBuf,
        /// Label manifest of the bytecode
        #[arg(long)]
        labels: PathBuf,
        #[arg(long)]
        manual_stack: bool,
        #[arg(long)]
        lenient: bool,
        #[arg(long, value_enum)]
        format: Option<FormatName>,
    },
    /// Show the segments of a bytecode file
    Info {
        /// Path to the bytecode
        input: PathBuf,
        /// Label manifest of the bytecode
        #[arg(long)]
        labels: PathBuf,
        #[arg(long)]
        lenient: bool,
        #[arg(long, value_enum)]
        format: Option<FormatName>,
    },
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("decoding failed: {0}")]
    Decode(String),
    #[error("assembly failed with {0} error(s)")]
    Assembly(usize),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("round trip mismatch: {0}")]
    Mismatch(String),
}

fn main() {
    // Decoding diagnostics are reported through the log.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Disasm {
            input,
            labels,
            manual_stack,
            lenient,
            format,
            output,
        } => cmd_disasm(&input, &labels, !manual_stack, lenient, format, output.as_deref()),
        Commands::Asm {
            input,
            manual_stack,
            format,
            output,
            labels_out,
        } => cmd_asm(&input, !manual_stack, format, &output, labels_out.as_deref()),
        Commands::Roundtrip {
            input,
            labels,
            manual_stack,
            lenient,
            format,
        } => cmd_roundtrip(&input, &labels, !manual_stack, lenient, format),
        Commands::Info {
            input,
            labels,
            lenient,
            format,
        } => cmd_info(&input, &labels, lenient, format),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn map_file(path: &Path) -> Result<Mmap, Error> {
    let file = File::open(path).map_err(io_error(path))?;
    // SAFETY: the map is only read, and only while the command runs.
    unsafe { Mmap::map(&file) }.map_err(io_error(path))
}

fn read_manifest(path: &Path) -> Result<LabelManifest, Error> {
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    serde_yaml::from_str(&text).map_err(|source| Error::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Bytecode decoded with its manifest.
struct Loaded {
    bytes: Mmap,
    manifest: LabelManifest,
    format: Format,
    ir: BytecodeIr,
}

fn load(
    input: &Path,
    labels: &Path,
    lenient: bool,
    format: Option<FormatName>,
) -> Result<Loaded, Error> {
    let bytes = map_file(input)?;
    let manifest = read_manifest(labels)?;
    let format = manifest.format(format);
    log::debug!("decoding {} ({} bytes, {format:?})", input.display(), bytes.len());

    let decoded = parse_bytecode(
        &bytes,
        &manifest.label_offsets,
        &manifest.entry_labels,
        format,
        lenient,
    );
    let failed = !lenient && decoded.has_errors();
    let ir = match decoded.ir {
        Some(ir) if !failed => ir,
        _ => {
            let first = decoded
                .problems
                .iter()
                .find(|p| p.severity == Severity::Error)
                .map_or_else(|| "unknown error".to_string(), ToString::to_string);
            return Err(Error::Decode(first));
        }
    };

    Ok(Loaded {
        bytes,
        manifest,
        format,
        ir,
    })
}

fn cmd_disasm(
    input: &Path,
    labels: &Path,
    inline_stack_args: bool,
    lenient: bool,
    format: Option<FormatName>,
    output: Option<&Path>,
) -> Result<(), Error> {
    let loaded = load(input, labels, lenient, format)?;
    let text = disassemble(&loaded.ir, inline_stack_args).join("\n");

    match output {
        Some(path) => fs::write(path, text).map_err(io_error(path)),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

fn cmd_asm(
    input: &Path,
    inline_stack_args: bool,
    format: FormatName,
    output: &Path,
    labels_out: Option<&Path>,
) -> Result<(), Error> {
    let source = fs::read_to_string(input).map_err(io_error(input))?;
    let lines: Vec<&str> = source.lines().collect();

    let assembled = assemble(&lines, inline_stack_args);
    for problem in &assembled.problems {
        eprintln!("{}:{problem}", input.display());
    }
    if assembled.has_errors() {
        let errors = assembled
            .problems
            .iter()
            .filter(|p| p.severity == Severity::Error)
            .count();
        return Err(Error::Assembly(errors));
    }

    let (bytes, label_offsets) = write_bytecode(&assembled.ir, format.into())?;
    fs::write(output, &bytes).map_err(io_error(output))?;

    if let Some(path) = labels_out {
        let manifest = LabelManifest {
            format: Some(format),
            label_offsets,
            entry_labels: [0].into(),
        };
        let yaml = serde_yaml::to_string(&manifest).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, yaml).map_err(io_error(path))?;
    }

    Ok(())
}

fn cmd_roundtrip(
    input: &Path,
    labels: &Path,
    inline_stack_args: bool,
    lenient: bool,
    format: Option<FormatName>,
) -> Result<(), Error> {
    let loaded = load(input, labels, lenient, format)?;

    // Step 1: bytes -> IR -> bytes
    let (bytes, label_offsets) = write_bytecode(&loaded.ir, loaded.format)?;
    if let Some(offset) = first_difference(&bytes, &loaded.bytes) {
        return Err(Error::Mismatch(format!("bytes differ at offset {offset:#x}")));
    }
    if trim_unused(&label_offsets) != trim_unused(&loaded.manifest.label_offsets) {
        return Err(Error::Mismatch("label offsets differ".to_string()));
    }
    println!("bytes: ok ({} bytes)", bytes.len());

    // Step 2: IR -> text -> IR
    let lines = disassemble(&loaded.ir, inline_stack_args);
    let assembled = assemble(&lines, inline_stack_args);
    if let Some(problem) = assembled.problems.first() {
        return Err(Error::Mismatch(format!("reassembly: {problem}")));
    }
    if assembled.ir != loaded.ir {
        let relisted = disassemble(&assembled.ir, inline_stack_args);
        let line = first_difference(&lines, &relisted).unwrap_or(lines.len());
        return Err(Error::Mismatch(format!("text differs at line {}", line + 1)));
    }
    println!("text: ok ({} lines)", lines.len());

    Ok(())
}

fn cmd_info(
    input: &Path,
    labels: &Path,
    lenient: bool,
    format: Option<FormatName>,
) -> Result<(), Error> {
    let loaded = load(input, labels, lenient, format)?;
    let segments = &loaded.ir.segments;
    let count = |ty: SegmentType| segments.iter().filter(|s| s.ty() == ty).count();

    println!("=== Quest Script Info ===");
    println!("Format:           {:?}", loaded.format);
    println!("Size:             {} bytes", loaded.bytes.len());
    println!(
        "Segments:         {} ({} code, {} data, {} string)",
        segments.len(),
        count(SegmentType::Instructions),
        count(SegmentType::Data),
        count(SegmentType::String)
    );
    println!("Entry labels:     {:?}", loaded.manifest.entry_labels);
    println!();

    let mut offset = 0;
    for segment in segments {
        let size = segment.size(loaded.format);
        let ty = match segment.ty() {
            SegmentType::Instructions => "code",
            SegmentType::Data => "data",
            SegmentType::String => "string",
        };
        let labels: Vec<String> = segment.labels().iter().map(ToString::to_string).collect();
        println!("{offset:#08x}  {ty:<6} {size:>6}  {}", labels.join(", "));
        offset += size;
    }

    Ok(())
}

fn first_difference<T: PartialEq>(a: &[T], b: &[T]) -> Option<usize> {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .or_else(|| (a.len() != b.len()).then(|| a.len().min(b.len())))
}

/// The label table without its trailing unused entries.
fn trim_unused(offsets: &[i32]) -> &[i32] {
    let len = offsets.iter().rposition(|&o| o != -1).map_or(0, |i| i + 1);
    &offsets[..len]
}
