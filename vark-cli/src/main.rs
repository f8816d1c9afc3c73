//! Thin command-line front end over the `vark` archive library

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use vark::{fnv1a, AppendOptions, OpenFlags, VarkArchive};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "vark",
    about = "Single-file archive tool with fast random-access decompression",
    version
)]
struct Cli {
    /// Create a new archive from the inputs
    #[arg(short = 'c', conflicts_with_all = ["append", "extract", "list", "verify"])]
    create: bool,

    /// Append the inputs to an archive, creating it when absent
    #[arg(short = 'a', conflicts_with_all = ["extract", "list", "verify"])]
    append: bool,

    /// Extract every entry of the archive
    #[arg(short = 'x', conflicts_with_all = ["list", "verify"])]
    extract: bool,

    /// List archive contents
    #[arg(short = 'l', conflicts_with = "verify")]
    list: bool,

    /// Verify archive integrity against the stored content hashes
    #[arg(short = 'v')]
    verify: bool,

    /// Store appended entries in sharded format for random-access reads
    #[arg(short = 's')]
    sharded: bool,

    /// Archive path
    archive: PathBuf,

    /// Input files or directories, expanded recursively
    inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Append,
    Extract,
    List,
    Verify,
}

/// Pick the operating mode. Without an explicit flag: extract when
/// the archive exists and no inputs were given, append when it exists
/// and inputs were given, create otherwise.
fn resolve_mode(cli: &Cli, archive_exists: bool) -> Mode {
    if cli.create {
        Mode::Create
    } else if cli.append {
        Mode::Append
    } else if cli.extract {
        Mode::Extract
    } else if cli.list {
        Mode::List
    } else if cli.verify {
        Mode::Verify
    } else if archive_exists && cli.inputs.is_empty() {
        Mode::Extract
    } else if archive_exists {
        Mode::Append
    } else {
        Mode::Create
    }
}

/// Expand the input arguments: directories become the set of regular
/// files under them, recursively.
fn collect_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        }
    }
    files
}

fn append_options(sharded: bool) -> AppendOptions {
    if sharded {
        AppendOptions::sharded()
    } else {
        AppendOptions::plain()
    }
}

fn append_all(archive: &mut VarkArchive, files: &[PathBuf], options: AppendOptions, verb: &str) {
    for file in files {
        println!("  {verb}: {}", file.display());
        if let Err(e) = archive.append_file(file, options) {
            eprintln!("Error: Failed to add {}: {e}", file.display());
        }
    }
}

fn cmd_create(cli: &Cli, files: &[PathBuf]) -> i32 {
    if files.is_empty() {
        eprintln!("Error: No input files specified for creation.");
        return 1;
    }
    println!("Creating archive: {}", cli.archive.display());
    let mut archive = match VarkArchive::create(&cli.archive, OpenFlags::writable()) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("Error: Failed to create archive: {e}");
            return 1;
        }
    };
    append_all(&mut archive, files, append_options(cli.sharded), "Adding");
    archive.close();
    0
}

fn cmd_append(cli: &Cli, files: &[PathBuf]) -> i32 {
    if files.is_empty() {
        eprintln!("Error: No input files specified for append.");
        return 1;
    }
    let mut archive = if cli.archive.exists() {
        match VarkArchive::load(&cli.archive, OpenFlags::writable()) {
            Ok(archive) => archive,
            Err(e) => {
                eprintln!("Error: Failed to load archive {}: {e}", cli.archive.display());
                return 1;
            }
        }
    } else {
        println!("Archive not found, creating new: {}", cli.archive.display());
        match VarkArchive::create(&cli.archive, OpenFlags::writable()) {
            Ok(archive) => archive,
            Err(e) => {
                eprintln!("Error: Failed to create archive: {e}");
                return 1;
            }
        }
    };
    append_all(&mut archive, files, append_options(cli.sharded), "Appending");
    archive.close();
    0
}

fn cmd_extract(archive_path: &Path) -> i32 {
    println!("Extracting archive: {}", archive_path.display());
    let mut archive = match VarkArchive::load(archive_path, OpenFlags::mapped()) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("Error: Failed to load archive: {e}");
            return 1;
        }
    };

    let names: Vec<String> = archive.entries().iter().map(|e| e.path.clone()).collect();
    for name in names {
        println!("  Extracting: {name}");
        match archive.decompress_file(&name) {
            Ok(data) => {
                let out = PathBuf::from(&name);
                if let Some(parent) = out.parent() {
                    if !parent.as_os_str().is_empty() {
                        if let Err(e) = fs::create_dir_all(parent) {
                            eprintln!("    Error: Could not create {}: {e}", parent.display());
                            continue;
                        }
                    }
                }
                if let Err(e) = fs::write(&out, &data) {
                    eprintln!("    Error: Could not write file: {e}");
                }
            }
            Err(e) => eprintln!("    Error: Decompression failed: {e}"),
        }
    }
    0
}

fn cmd_list(archive_path: &Path) -> i32 {
    let archive = match VarkArchive::load(archive_path, OpenFlags::default()) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("Error: Failed to load archive {}: {e}", archive_path.display());
            return 1;
        }
    };

    println!(
        "Archive: {} ({} bytes, {} files)",
        archive_path.display(),
        archive.size(),
        archive.len()
    );
    println!("  Compressed Size  Original Path");
    println!("  ---------------  -------------");
    for entry in archive.entries() {
        println!("  {:>15}  {}", entry.size, entry.path);
    }
    0
}

fn cmd_verify(archive_path: &Path) -> i32 {
    let mut archive = match VarkArchive::load(archive_path, OpenFlags::mapped()) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("Error: Failed to load archive {}: {e}", archive_path.display());
            return 1;
        }
    };

    println!("Verifying archive: {}", archive_path.display());
    let entries: Vec<(String, u64)> = archive
        .entries()
        .iter()
        .map(|e| (e.path.clone(), e.hash))
        .collect();
    let mut fail_count = 0u32;
    for (name, stored_hash) in entries {
        print!("  {name}... ");
        match archive.decompress_file(&name) {
            Ok(data) if fnv1a(&data) == stored_hash => println!("OK"),
            Ok(_) => {
                println!("FAILED (Hash mismatch)");
                fail_count += 1;
            }
            Err(e) => {
                println!("FAILED ({e})");
                fail_count += 1;
            }
        }
    }

    if fail_count == 0 {
        println!("\nIntegrity check PASSED.");
        0
    } else {
        println!("\nIntegrity check FAILED ({fail_count} errors found).");
        1
    }
}

fn run(cli: &Cli) -> i32 {
    let files = collect_inputs(&cli.inputs);
    match resolve_mode(cli, cli.archive.exists()) {
        Mode::Create => cmd_create(cli, &files),
        Mode::Append => cmd_append(cli, &files),
        Mode::Extract => cmd_extract(&cli.archive),
        Mode::List => cmd_list(&cli.archive),
        Mode::Verify => cmd_verify(&cli.archive),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    std::process::exit(run(&cli));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("vark").chain(args.iter().copied()))
    }

    #[test]
    fn explicit_mode_flags() {
        assert_eq!(resolve_mode(&cli(&["-c", "a.vark", "f"]), false), Mode::Create);
        assert_eq!(resolve_mode(&cli(&["-a", "a.vark", "f"]), true), Mode::Append);
        assert_eq!(resolve_mode(&cli(&["-x", "a.vark"]), true), Mode::Extract);
        assert_eq!(resolve_mode(&cli(&["-l", "a.vark"]), true), Mode::List);
        assert_eq!(resolve_mode(&cli(&["-v", "a.vark"]), true), Mode::Verify);
    }

    #[test]
    fn smart_mode_resolution() {
        // Existing archive, no inputs: extract
        assert_eq!(resolve_mode(&cli(&["a.vark"]), true), Mode::Extract);
        // Existing archive with inputs: append
        assert_eq!(resolve_mode(&cli(&["a.vark", "f"]), true), Mode::Append);
        // Missing archive: create
        assert_eq!(resolve_mode(&cli(&["a.vark", "f"]), false), Mode::Create);
        assert_eq!(resolve_mode(&cli(&["a.vark"]), false), Mode::Create);
    }

    #[test]
    fn sharded_flag_combines_with_modes() {
        let parsed = cli(&["-c", "-s", "a.vark", "f"]);
        assert!(parsed.create && parsed.sharded);
        assert!(append_options(parsed.sharded).sharded);
    }

    #[test]
    fn directories_expand_recursively() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();
        fs::write(dir.path().join("sub/deeper/c.txt"), b"c").unwrap();

        let files = collect_inputs(&[dir.path().to_path_buf()]);
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.is_file()));
    }

    #[test]
    fn missing_inputs_are_skipped() {
        let files = collect_inputs(&[PathBuf::from("does/not/exist")]);
        assert!(files.is_empty());
    }
}
