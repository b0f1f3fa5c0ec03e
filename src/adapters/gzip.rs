//! Gzip decompression of downloaded inputs.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompress `src` into `dest` on the blocking pool.
///
/// Inputs without the gzip magic bytes are copied through unchanged, since
/// some mirrors serve plain files under a `.gz` name.
pub async fn decompress(src: &Path, dest: &Path) -> Result<u64> {
    let src: PathBuf = src.to_path_buf();
    let dest: PathBuf = dest.to_path_buf();
    tokio::task::spawn_blocking(move || decompress_blocking(&src, &dest))
        .await
        .context("Decompression task failed")?
}

fn decompress_blocking(src: &Path, dest: &Path) -> Result<u64> {
    let mut reader = BufReader::new(
        File::open(src).with_context(|| format!("Failed to open {}", src.display()))?,
    );
    let mut writer = BufWriter::new(
        File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?,
    );

    let mut magic = [0u8; 2];
    let read = read_prefix(&mut reader, &mut magic)
        .with_context(|| format!("Failed to read {}", src.display()))?;
    let prefix = io::Cursor::new(magic[..read].to_vec());

    let written = if read == 2 && magic == GZIP_MAGIC {
        let mut decoder = MultiGzDecoder::new(prefix.chain(reader));
        io::copy(&mut decoder, &mut writer)
            .with_context(|| format!("Failed to decompress {}", src.display()))?
    } else {
        io::copy(&mut prefix.chain(reader), &mut writer)
            .with_context(|| format!("Failed to copy {}", src.display()))?
    };
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", dest.display()))?;

    if written == 0 {
        anyhow::bail!("Decompressed file is empty: {}", src.display());
    }
    Ok(written)
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
