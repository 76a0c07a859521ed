use crate::error::{Error, Result};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Md5,
    Sha256,
    Sha512,
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashKind::Md5 => "md5",
            HashKind::Sha256 => "sha256",
            HashKind::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

pub fn compute(path: &Path, kind: HashKind) -> Result<String> {
    match kind {
        HashKind::Md5 => digest_file::<Md5>(path),
        HashKind::Sha256 => digest_file::<Sha256>(path),
        HashKind::Sha512 => digest_file::<Sha512>(path),
    }
}

/// Checks `path` against `expected`. No expected value means nothing to check.
pub fn verify(path: &Path, kind: HashKind, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        tracing::info!("Expected {} is None, skip {} check for {:?}", kind, kind, path);
        return Ok(());
    };

    let actual = compute(path, kind)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(Error::ChecksumMismatch {
            kind: kind.to_string(),
            path: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        });
    }

    tracing::debug!("Verified {} {}", kind, path.display());
    Ok(())
}

fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    let digest = hasher.finalize();
    Ok(digest.iter().map(|byte| format!("{:02x}", byte)).collect())
}
