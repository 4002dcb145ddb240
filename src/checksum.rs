use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use md5::{Digest as Md5Digest, Md5};

const STREAM_CHUNK_SIZE: usize = 512 * 1024;

/// Lowercase hex MD5 of everything `reader` yields, plus the byte count.
pub fn md5_stream<R: Read>(mut reader: R) -> anyhow::Result<(String, u64)> {
    let mut hasher = Md5::new();
    let mut processed: u64 = 0;
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        processed = processed.saturating_add(n as u64);
        hasher.update(&buf[..n]);
    }
    Ok((hex::encode(hasher.finalize()), processed))
}

pub fn md5_file(path: &Path) -> anyhow::Result<String> {
    let file = File::open(path).with_context(|| format!("opening file for checksum: {path:?}"))?;
    let (digest, _) = md5_stream(file)?;
    Ok(digest)
}

/// Refuse to go any further unless `path` is the expected clean base ROM.
pub fn validate_base_rom(path: &Path, expected_md5: &str) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!(
            "You need a Super Mario World ROM. Nothing found at {}",
            path.display()
        );
    }

    let actual = md5_file(path)?;
    if !actual.eq_ignore_ascii_case(expected_md5) {
        anyhow::bail!(
            "Invalid SMW base ROM {} (md5 {actual}, expected {expected_md5}). Please provide a clean US ROM.",
            path.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn rom_fixture() -> (NamedTempFile, Vec<u8>) {
        let mut f = NamedTempFile::new().unwrap();
        let body: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
        f.write_all(&body).unwrap();
        f.flush().unwrap();
        (f, body)
    }

    #[test]
    fn md5_of_known_input() {
        let (digest, len) = md5_stream(&b"abc"[..]).unwrap();
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(len, 3);
    }

    #[test]
    fn accepts_exact_fixture() {
        let (f, body) = rom_fixture();
        let (expected, _) = md5_stream(&body[..]).unwrap();
        validate_base_rom(f.path(), &expected).unwrap();
        validate_base_rom(f.path(), &expected.to_uppercase()).unwrap();
    }

    #[test]
    fn rejects_single_corrupted_byte() {
        let (_f, body) = rom_fixture();
        let (expected, _) = md5_stream(&body[..]).unwrap();

        let mut corrupted = body.clone();
        corrupted[100] ^= 0x01;
        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(&corrupted).unwrap();
        bad.flush().unwrap();

        let err = validate_base_rom(bad.path(), &expected).unwrap_err();
        assert!(err.to_string().contains("Invalid SMW base ROM"));
    }

    #[test]
    fn rejects_missing_rom() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_base_rom(&dir.path().join("smw.sfc"), crate::config::SMW_MD5)
            .unwrap_err();
        assert!(err.to_string().contains("You need a Super Mario World ROM"));
    }
}
