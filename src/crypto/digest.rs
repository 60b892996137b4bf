/// File digests and HMAC helpers.

use crate::error::{KitError, Result};
use hmac::digest::core_api::BlockSizeUser;
use hmac::{Mac, SimpleHmac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Block size used when streaming files through a hasher.
pub const FILE_BLOCK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Look up an algorithm by name, falling back to sha256 for unknown names.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            log::warn!("Unknown hash algorithm {:?}, using sha256", name);
            HashAlgorithm::default()
        })
    }

    /// Output length in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = KitError;

    fn from_str(s: &str) -> Result<Self> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| KitError::ConfigError(format!("Unknown hash algorithm: {}", s)))
    }
}

fn stream_digest<D: Digest, R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut hasher = D::new();
    let mut block = [0u8; FILE_BLOCK_SIZE];
    loop {
        let read = reader.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(hasher.finalize().to_vec())
}

/// Digest everything `reader` yields.
pub fn reader_digest<R: Read>(reader: R, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        HashAlgorithm::Md5 => stream_digest::<Md5, _>(reader),
        HashAlgorithm::Sha1 => stream_digest::<Sha1, _>(reader),
        HashAlgorithm::Sha224 => stream_digest::<Sha224, _>(reader),
        HashAlgorithm::Sha256 => stream_digest::<Sha256, _>(reader),
        HashAlgorithm::Sha384 => stream_digest::<Sha384, _>(reader),
        HashAlgorithm::Sha512 => stream_digest::<Sha512, _>(reader),
    }
}

/// Hex digest of a file, read in [`FILE_BLOCK_SIZE`] blocks.
///
/// `None` selects sha256.
pub fn file_digest(path: impl AsRef<Path>, algorithm: Option<HashAlgorithm>) -> Result<String> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let digest = reader_digest(file, algorithm.unwrap_or_default())?;
    log::debug!("Digested {}", path.display());
    Ok(hex::encode(digest))
}

pub fn md5_for_file(path: impl AsRef<Path>) -> Result<String> {
    file_digest(path, Some(HashAlgorithm::Md5))
}

fn hmac_parts<D: Digest + BlockSizeUser>(secret: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    let mut mac = <SimpleHmac<D> as Mac>::new_from_slice(secret)
        .map_err(|e| KitError::ConfigError(format!("Invalid HMAC key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC of `parts` (fed in order) under `secret`.
pub fn make_digest(secret: &[u8], parts: &[&[u8]], algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        HashAlgorithm::Md5 => hmac_parts::<Md5>(secret, parts),
        HashAlgorithm::Sha1 => hmac_parts::<Sha1>(secret, parts),
        HashAlgorithm::Sha224 => hmac_parts::<Sha224>(secret, parts),
        HashAlgorithm::Sha256 => hmac_parts::<Sha256>(secret, parts),
        HashAlgorithm::Sha384 => hmac_parts::<Sha384>(secret, parts),
        HashAlgorithm::Sha512 => hmac_parts::<Sha512>(secret, parts),
    }
}

/// [`make_digest`] rendered as lower-case hex.
pub fn make_hex_digest(secret: &[u8], parts: &[&[u8]], algorithm: HashAlgorithm) -> Result<String> {
    make_digest(secret, parts, algorithm).map(hex::encode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_algorithm_lookup() {
        for algorithm in HashAlgorithm::ALL {
            assert_eq!(algorithm.name().parse::<HashAlgorithm>().unwrap(), algorithm);
        }
        assert_eq!("SHA512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert!("whirlpool".parse::<HashAlgorithm>().is_err());
        assert_eq!(HashAlgorithm::from_name_or_default("whirlpool"), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::from_name_or_default("md5"), HashAlgorithm::Md5);
    }

    #[test]
    fn test_file_digest_known_values() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Attack at dawn.\n").unwrap();

        assert_eq!(
            file_digest(file.path(), None).unwrap(),
            "1d6c270d7cc7e82a816ffb7bc3797d213b24d9d17af48f4b3b8d01fb43ed15c3"
        );
    }

    #[test]
    fn test_file_digest_output_sizes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0x5a; FILE_BLOCK_SIZE * 3 + 17]).unwrap();

        for algorithm in HashAlgorithm::ALL {
            let digest = file_digest(file.path(), Some(algorithm)).unwrap();
            assert_eq!(digest.len(), algorithm.output_size() * 2, "{}", algorithm);
        }
    }

    #[test]
    fn test_md5_for_file_matches_file_digest() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"").unwrap();

        let digest = md5_for_file(file.path()).unwrap();
        assert_eq!(digest, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(digest, file_digest(file.path(), Some(HashAlgorithm::Md5)).unwrap());
    }

    #[test]
    fn test_file_digest_missing_file() {
        let result = file_digest("/nonexistent/minikit/file.txt", None);
        assert!(matches!(result, Err(KitError::IoError(_))));
    }

    #[test]
    fn test_make_digest_known_vector() {
        let secret = "écriture 寫作";
        let parts = ["3.14159", "abc", "def", "ghi", "4321", "écriture 寫作", "\u{1234}"];
        let parts: Vec<&[u8]> = parts.iter().map(|p| p.as_bytes()).collect();

        let digest = make_hex_digest(secret.as_bytes(), &parts, HashAlgorithm::Sha256).unwrap();
        assert_eq!(
            digest,
            "88eb22670a7e9a454df26670ce0ff9838013fabfedac978a4c2539b7a3db9de9"
        );
    }

    #[test]
    fn test_make_digest_part_boundaries_do_not_matter() {
        let split = make_digest(b"key", &[b"ab".as_slice(), b"cd".as_slice()], HashAlgorithm::Sha1).unwrap();
        let joined = make_digest(b"key", &[b"abcd".as_slice()], HashAlgorithm::Sha1).unwrap();
        assert_eq!(split, joined);
        assert_eq!(split.len(), HashAlgorithm::Sha1.output_size());
    }
}
