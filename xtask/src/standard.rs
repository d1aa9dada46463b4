//! Standard test runner: single run, compare output against expected files.
//!
//! `testsuite/expected/<example>.expected` holds the decoded defmt log. If
//! `testsuite/expected/<example>.uart` exists, the bytes the TTY put on the
//! wire (UART0) must match it too.

use std::fs;
use std::path::Path;

use anyhow::Result;

use crate::build::project_root;
use crate::defmt;
use crate::qemu::run_qemu;
use crate::runner::RunOptions;

/// Run a standard test.
///
/// Executes the example once and compares output against the expected files.
pub fn run_standard(example: &str, elf_path: &Path, opts: &RunOptions) -> Result<bool> {
    println!("Running in QEMU...");
    let output = run_qemu(elf_path)?;
    let log = defmt::decode_output(elf_path, &output.semihosting)?;
    let wire = String::from_utf8_lossy(&output.wire).into_owned();

    if opts.verbose {
        print!("{log}");
        println!("--- QEMU run end ---");
        if !wire.is_empty() {
            println!("--- wire ---");
            print!("{wire}");
        }
        return Ok(true);
    }

    let expected_dir = project_root().join("testsuite").join("expected");
    let log_path = expected_dir.join(format!("{example}.expected"));
    let wire_path = expected_dir.join(format!("{example}.uart"));

    if opts.bless {
        bless(&log_path, &log)?;
        if !wire.is_empty() || wire_path.exists() {
            bless(&wire_path, &wire)?;
        }
        return Ok(true);
    }

    if !log_path.exists() {
        println!("  No expected output file, run with --bless to create");
        println!("--- output ---");
        print!("{log}");
        return Ok(false);
    }

    let mut pass = compare("log", &fs::read_to_string(&log_path)?, &log);
    if wire_path.exists() {
        pass &= compare("wire", &fs::read_to_string(&wire_path)?, &wire);
    }
    if pass {
        println!("  PASS");
    }
    Ok(pass)
}

fn compare(what: &str, expected: &str, actual: &str) -> bool {
    if expected == actual {
        return true;
    }
    println!("  FAIL: {what} differs from expected");
    println!("--- expected ---");
    print!("{expected}");
    println!("--- actual ---");
    print!("{actual}");
    false
}

fn bless(path: &Path, content: &str) -> Result<()> {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let status = if path.exists() {
        if fs::read_to_string(path)? == content {
            "No change"
        } else {
            fs::write(path, content)?;
            "Updated"
        }
    } else {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, content)?;
        "Created"
    };
    println!("  {filename}: {status}");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compare_reports_equality() {
        assert!(compare("log", "[INFO ] a\n", "[INFO ] a\n"));
        assert!(!compare("log", "[INFO ] a\n", "[INFO ] b\n"));
    }

    #[test]
    fn bless_creates_then_keeps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("x.expected");
        bless(&path, "one\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\n");
        bless(&path, "two\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two\n");
    }
}
