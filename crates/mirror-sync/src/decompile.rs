//! Conversion of compiled `*.luac` scripts into `*.lua` files.

use crate::Result;
use log::{debug, error, info};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use walkdir::WalkDir;

/// Leading bytes of LuaJIT bytecode.
pub const LUAJIT_MAGIC: [u8; 4] = [0x1B, 0x4C, 0x4A, 0x02];

/// Extension of scripts awaiting the pass.
pub const COMPILED_EXTENSION: &str = "luac";

/// Turns a compiled script into source.
pub trait Decompiler: Sync {
    /// Write the decompiled form of `input` to `output`.
    fn decompile(&self, input: &Path, output: &Path) -> io::Result<()>;
}

/// Runs an external command with the input and output paths appended.
#[derive(Debug, Clone)]
pub struct ExternalDecompiler {
    program: String,
    args: Vec<String>,
}

impl ExternalDecompiler {
    /// Build from a command vector; `None` when it is empty.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Decompiler for ExternalDecompiler {
    fn decompile(&self, input: &Path, output: &Path) -> io::Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("-f")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-c")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} exited with {}", self.program, status),
            ));
        }
        if !output.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} produced no output", self.program),
            ));
        }
        Ok(())
    }
}

/// Whether the file starts with LuaJIT bytecode.
pub fn is_compiled(path: &Path) -> io::Result<bool> {
    let mut head = [0u8; 4];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(head == LUAJIT_MAGIC)
}

/// Collect files with `extension` below `dir`, sorted.
pub(crate) fn collect_files(dir: &Path, extension: Option<&str>) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if extension.map_or(true, |ext| path.extension().is_some_and(|e| e == ext)) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecompileStats {
    pub decompiled: usize,
    pub renamed: usize,
    pub failed: usize,
}

enum FileOutcome {
    Decompiled,
    Renamed,
}

fn process_file(path: &Path, decompiler: &dyn Decompiler) -> io::Result<FileOutcome> {
    let output = path.with_extension("lua");
    if !is_compiled(path)? {
        fs::rename(path, &output)?;
        return Ok(FileOutcome::Renamed);
    }
    decompiler.decompile(path, &output)?;
    fs::remove_file(path)?;
    Ok(FileOutcome::Decompiled)
}

/// Process every `*.luac` below `dir` in parallel. Per-file failures are
/// logged and counted.
pub fn decompile_tree(dir: &Path, decompiler: &dyn Decompiler) -> Result<DecompileStats> {
    if !dir.is_dir() {
        debug!("No script directory at {}", dir.display());
        return Ok(DecompileStats::default());
    }

    let files = collect_files(dir, Some(COMPILED_EXTENSION))?;
    let results: Vec<_> = files
        .par_iter()
        .map(|path| process_file(path, decompiler))
        .collect();

    let mut stats = DecompileStats::default();
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(FileOutcome::Decompiled) => stats.decompiled += 1,
            Ok(FileOutcome::Renamed) => stats.renamed += 1,
            Err(e) => {
                error!("{} failed to decompile: {}", path.display(), e);
                stats.failed += 1;
            }
        }
    }

    info!(
        "Scripts in {}: {} decompiled, {} renamed, {} failed",
        dir.display(),
        stats.decompiled,
        stats.renamed,
        stats.failed
    );
    Ok(stats)
}
