//! Cross-builds the testsuite firmware.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};

/// QEMU's lm3s6965evb is a Cortex-M3.
const TARGET: &str = "thumbv7m-none-eabi";

/// The workspace root, one level above this crate.
pub fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..")
}

fn testsuite_dir(root: &Path) -> PathBuf {
    root.join("testsuite")
}

/// Where cargo puts the firmware image of `example`.
fn elf_path(root: &Path, example: &str, release: bool) -> PathBuf {
    let profile = if release { "release" } else { "debug" };
    root.join("target")
        .join(TARGET)
        .join(profile)
        .join("examples")
        .join(example)
}

/// Builds a testsuite example and returns the path to its ELF.
///
/// The log filter comes from `DEFMT_LOG` in `.cargo/config.toml`. Compiler
/// output is only shown when the build fails.
pub fn build_example(example: &str, release: bool) -> Result<PathBuf> {
    let root = project_root();

    let mut cmd = Command::new("cargo");
    cmd.current_dir(testsuite_dir(&root))
        .args(["build", "--example", example, "--target", TARGET]);
    if release {
        cmd.arg("--release");
    }

    let output = cmd.output().context("Failed to run cargo build")?;
    if !output.status.success() {
        eprint!("{}", String::from_utf8_lossy(&output.stderr));
        bail!("building '{example}' failed");
    }

    Ok(elf_path(&root, example, release))
}

/// Names of the testsuite examples containing `filter`, sorted.
pub fn discover_examples(filter: Option<&str>) -> Result<Vec<String>> {
    let dir = testsuite_dir(&project_root()).join("examples");

    let mut examples = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_none_or(|ext| ext != "rs") {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if filter.is_none_or(|f| stem.contains(f)) {
            examples.push(stem);
        }
    }
    examples.sort();
    Ok(examples)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn elf_lands_in_target_examples() {
        let path = elf_path(Path::new("/w"), "fifo", true);
        assert_eq!(path, Path::new("/w/target/thumbv7m-none-eabi/release/examples/fifo"));
    }

    #[test]
    fn filter_selects_examples() {
        let all = discover_examples(None).unwrap();
        assert!(all.iter().any(|e| e == "fifo"));
        assert!(all.windows(2).all(|w| w[0] <= w[1]));

        let tty = discover_examples(Some("tty_")).unwrap();
        assert!(!tty.is_empty());
        assert!(tty.iter().all(|e| e.contains("tty_")));
    }
}
