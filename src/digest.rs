//! Checksum support for resolved binaries and fetched resources.

use crate::error::{PmpError, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::Path,
    str::FromStr,
};

/// The digest algorithms understood by the resolvers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Parses a user-supplied algorithm name, accepting common spellings
    /// such as `sha256`, `SHA-256` and `sha_256`.
    pub fn parse(name: &str) -> Result<Self> {
        let folded: String =
            name.chars().filter(char::is_ascii_alphanumeric).collect::<String>().to_lowercase();
        match folded.as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(PmpError::UnsupportedDigestAlgorithm(name.to_string())),
        }
    }

    /// The canonical name, e.g. `SHA-256` for `sha256`.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Streams `reader` to completion and returns the raw digest bytes.
    pub fn hash_reader(&self, mut reader: impl Read) -> io::Result<Vec<u8>> {
        fn drive<D: sha2::Digest>(reader: &mut impl Read) -> io::Result<Vec<u8>> {
            let mut hasher = D::new();
            let mut buf = [0u8; 64 * 1024];
            loop {
                let read = reader.read(&mut buf)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buf[..read]);
            }
            Ok(hasher.finalize().to_vec())
        }
        match self {
            Self::Md5 => drive::<Md5>(&mut reader),
            Self::Sha1 => drive::<Sha1>(&mut reader),
            Self::Sha256 => drive::<Sha256>(&mut reader),
            Self::Sha512 => drive::<Sha512>(&mut reader),
        }
    }

    /// Hashes the file at `path` and returns the lowercase hex digest.
    pub fn hash_file(&self, path: &Path) -> Result<String> {
        let file = File::open(path).map_err(|err| PmpError::io(err, path))?;
        let raw = self.hash_reader(file).map_err(|err| PmpError::io(err, path))?;
        Ok(hex::encode(raw))
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// An expected checksum, carried as `<algorithm>:<lowercase hex>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    value: Vec<u8>,
}

impl Digest {
    pub fn new(algorithm: &str, value: &str) -> Result<Self> {
        let algorithm = DigestAlgorithm::parse(algorithm)?;
        let value = hex::decode(value.trim().to_lowercase())
            .map_err(|_| PmpError::MalformedDigest(value.to_string()))?;
        if value.is_empty() {
            return Err(PmpError::MalformedDigest(String::new()));
        }
        Ok(Self { algorithm, value })
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The expected digest as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.value)
    }

    /// Recomputes the digest of `path` and compares it with the expected
    /// value in constant time. A mismatch is always fatal.
    pub fn verify(&self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|err| PmpError::io(err, path))?;
        let actual = self.algorithm.hash_reader(file).map_err(|err| PmpError::io(err, path))?;
        if constant_time_eq(&actual, &self.value) {
            trace!(algorithm = %self.algorithm, path = %path.display(), "digest verified");
            Ok(())
        } else {
            Err(PmpError::DigestMismatch {
                path: path.to_path_buf(),
                expected: self.to_hex(),
                actual: hex::encode(actual),
            })
        }
    }
}

impl FromStr for Digest {
    type Err = PmpError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, value) =
            s.split_once(':').ok_or_else(|| PmpError::MalformedDigest(s.to_string()))?;
        Self::new(algorithm, value)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
