//! defmt frame decoding for the QEMU output.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use defmt_decoder::{DecodeError, Frame, Table};

/// Decodes the rzcobs framed defmt stream in `raw_output` with the table of
/// the ELF, one line per frame.
pub fn decode_output(elf_path: &Path, raw_output: &[u8]) -> Result<String> {
    let elf_data = fs::read(elf_path).context("Failed to read ELF file")?;
    let table = Table::parse(&elf_data)
        .context("Failed to parse defmt table from ELF")?
        .ok_or_else(|| anyhow!("No defmt data found in ELF"))?;

    let mut decoder = table.new_stream_decoder();
    decoder.received(raw_output);

    let mut output = String::new();
    loop {
        match decoder.decode() {
            Ok(frame) => {
                output.push_str(&format_frame(&frame));
                output.push('\n');
            }
            Err(DecodeError::UnexpectedEof) => break,
            Err(DecodeError::Malformed) => bail!("Malformed defmt frame"),
        }
    }

    Ok(output)
}

/// `[LEVEL] message`. Source locations are left out so expected files do not
/// change when code moves.
fn format_frame(frame: &Frame) -> String {
    let level = frame
        .level()
        .map(|l| l.as_str())
        .unwrap_or("print")
        .to_uppercase();

    format!("[{level:<5}] {}", frame.display_message())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_elf_is_an_error() {
        let err = decode_output(Path::new("/nonexistent/firmware.elf"), &[]).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read ELF file"));
    }
}
