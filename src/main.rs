use anyhow::{anyhow, Context, Result};
use clap::Parser;
use memmap2::Mmap;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use cdr_ber_decode::jsonl::write_record;
use cdr_ber_decode::{Asn1Schema, BerSchemaDecoder, DecoderProfile, Engine, EngineConfig, RecordFamily, SchemaDecoder};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Tolerant BER CDR decoder -> JSONL (schema decode, scanner fallback, field normalization)",
    long_about = None
)]
struct Cli {
    #[arg(long = "schema")]
    schema: Option<PathBuf>,

    /// Save the compiled schema tables here
    #[arg(long = "compile-schema")]
    compile_schema: Option<PathBuf>,

    /// Load schema tables saved with --compile-schema
    #[arg(long = "load-compiled")]
    load_compiled: Option<PathBuf>,

    #[arg(long = "family", value_enum, default_value_t = RecordFamily::Sgsn)]
    family: RecordFamily,

    /// Overrides the family's record type
    #[arg(long = "root-type")]
    root_type: Option<String>,

    #[arg(long = "output-dir")]
    output_dir: PathBuf,

    #[arg(long = "ext")]
    ext: Option<String>,

    /// Decode the records of each file in parallel as well
    #[arg(long = "parallel-records")]
    parallel_records: bool,

    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn expand_inputs(inputs: &[PathBuf], allowed_exts: Option<&HashSet<String>>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for p in inputs {
        if p.is_file() {
            if should_include(p, allowed_exts) {
                files.push(p.clone());
            }
        } else if p.is_dir() {
            for entry in WalkDir::new(p).follow_links(false) {
                let entry = entry?;
                let path = entry.path();
                if path.is_file() && should_include(path, allowed_exts) {
                    files.push(path.to_path_buf());
                }
            }
        } else {
            return Err(anyhow!("Input path is not a file or directory: {:?}", p));
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

#[inline]
fn should_include(path: &Path, allowed_exts: Option<&HashSet<String>>) -> bool {
    let Some(set) = allowed_exts else { return true; };
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else { return false; };
    set.contains(&ext.to_ascii_lowercase())
}

fn load_schema(cli: &Cli) -> Result<Asn1Schema> {
    if let Some(bin_path) = &cli.load_compiled {
        info!(path = ?bin_path, "loading pre-compiled schema");
        return Asn1Schema::load_compiled(bin_path)
            .with_context(|| format!("Failed to load compiled schema {:?}", bin_path));
    }
    let Some(text_path) = &cli.schema else {
        return Err(anyhow!("You must provide either --schema or --load-compiled"));
    };

    info!(path = ?text_path, "parsing text schema");
    let schema_text = std::fs::read_to_string(text_path)
        .with_context(|| format!("Failed to read schema file {:?}", text_path))?;
    let parsed = Asn1Schema::parse(&schema_text).with_context(|| format!("Failed to compile {:?}", text_path))?;

    if let Some(save_path) = &cli.compile_schema {
        parsed
            .save_compiled(save_path)
            .with_context(|| format!("Failed to save compiled schema {:?}", save_path))?;
        info!(path = ?save_path, "schema saved, use --load-compiled next time");
    }
    Ok(parsed)
}

fn process_file(engine: &Engine<BerSchemaDecoder>, in_path: &Path, out_dir: &Path) -> Result<usize> {
    let file = File::open(in_path).with_context(|| format!("Failed to open input file {:?}", in_path))?;
    // SAFETY: the map is read-only and input files are not modified while decoding.
    let mmap = unsafe { Mmap::map(&file)? };
    let data: &[u8] = &mmap;

    if data.is_empty() {
        return Ok(0);
    }

    let file_name = in_path
        .file_name()
        .ok_or_else(|| anyhow!("Input path has no filename: {:?}", in_path))?
        .to_string_lossy()
        .to_string();

    let report = engine.decode_file(&file_name, data);
    for issue in &report.issues {
        warn!(file = %file_name, %issue, "file issue");
    }

    let out_path = out_dir.join(format!("{}.jsonl", file_name));
    let out_file = File::create(&out_path).with_context(|| format!("Failed to create output file {:?}", out_path))?;
    let mut writer = BufWriter::with_capacity(8 * 1024 * 1024, out_file);
    let mut hex_scratch: Vec<u8> = Vec::with_capacity(64 * 1024);

    for record in &report.records {
        write_record(&mut writer, &file_name, record, &mut hex_scratch)
            .with_context(|| format!("Failed to write {:?}", out_path))?;
    }
    writer.flush()?;
    Ok(report.records.len())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cdr_ber_decode=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overall_start = Instant::now();

    let allowed_exts: Option<HashSet<String>> = cli.ext.as_ref().map(|s| {
        s.split(',')
            .map(|x| x.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|x| !x.is_empty())
            .collect()
    });

    let decoder = BerSchemaDecoder::new(load_schema(&cli)?);

    let mut profile = DecoderProfile::for_family(cli.family);
    if let Some(root_type) = &cli.root_type {
        profile.record_type = root_type.clone();
    }
    if !decoder.knows_type(&profile.record_type) {
        return Err(anyhow!(
            "root-type '{}' does not appear in parsed schema (check spelling / module).",
            profile.record_type
        ));
    }

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", cli.output_dir))?;

    let input_files = expand_inputs(&cli.inputs, allowed_exts.as_ref())
        .with_context(|| "Failed to expand input files/directories")?;

    if input_files.is_empty() {
        warn!("no input files found");
        return Ok(());
    }
    info!(files = input_files.len(), family = ?cli.family, "starting");

    let engine = Engine::new(
        decoder,
        profile,
        EngineConfig {
            parallel_records: cli.parallel_records,
        },
    );

    let out_dir = cli.output_dir.clone();
    let results: Vec<(PathBuf, Result<usize>)> = input_files
        .par_iter()
        .map(|p| (p.clone(), process_file(&engine, p, &out_dir)))
        .collect();

    let mut total_records = 0usize;
    let mut failed_files = 0usize;
    for (path, res) in results {
        match res {
            Ok(count) => total_records += count,
            Err(e) => {
                failed_files += 1;
                error!(path = ?path, "decoding failed: {:#}", e);
            }
        }
    }

    info!(
        records = total_records,
        failed_files,
        elapsed_s = overall_start.elapsed().as_secs_f64(),
        "done"
    );
    Ok(())
}
