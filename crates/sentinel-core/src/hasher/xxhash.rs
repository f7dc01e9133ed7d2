use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use twox_hash::XxHash64;

const CHUNK_SIZE: usize = 64 * 1024;

pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Streaming XxHash64 of a file's full content.
pub fn hash_file(path: &Path) -> io::Result<u64> {
    let mut f = File::open(path)?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0; CHUNK_SIZE];
    loop {
        let n = f.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.write(&buffer[..n]);
    }
    Ok(hasher.finish())
}

/// Copy `src` to a newly created `dst`, hashing the bytes on the way.
/// Returns `(bytes_copied, hash)`. The destination is synced before return.
pub fn copy_and_hash(src: &Path, dst: &Path) -> io::Result<(u64, u64)> {
    let mut input = File::open(src)?;
    let output = File::options().write(true).create_new(true).open(dst)?;
    let mut writer = BufWriter::new(output);
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = input.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.write(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    let output = writer.into_inner().map_err(|e| e.into_error())?;
    output.sync_all()?;
    Ok((total, hasher.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_copy_and_hash_matches_hash_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &data).unwrap();

        let (bytes, hash) = copy_and_hash(&src, &dst).unwrap();
        assert_eq!(bytes, data.len() as u64);
        assert_eq!(hash, hash_data(&data));
        assert_eq!(hash_file(&dst).unwrap(), hash);
        assert_eq!(std::fs::read(&dst).unwrap(), data);
    }

    #[test]
    fn test_copy_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        std::fs::write(&src, b"a").unwrap();
        std::fs::write(&dst, b"b").unwrap();
        assert!(copy_and_hash(&src, &dst).is_err());
    }
}
