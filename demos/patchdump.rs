use std::io::Write;

use krykit::Result;
use krykit::formats::kry::KryFile;
use krykit::keys::{KeyCache, KeySource};

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "patch.zip.patch".into());

    let cache = KeyCache::new();
    let mut file = KryFile::open(&path, KeySource::patch(), &cache)?;

    eprintln!("{path}: {} plaintext bytes", file.size());

    let mut buf = vec![0u8; file.size() as usize];
    let n = file.read(&mut buf)?;
    std::io::stdout().write_all(&buf[..n])?;

    Ok(())
}
