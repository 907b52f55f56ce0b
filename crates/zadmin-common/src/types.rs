//! Core type definitions for zadmin
//!
//! Validated names for pools, datasets and snapshots, the `ashift` pool
//! property and the stream compression choices used by `snapshot send`.

use crate::error::{Error, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Maximum length of a full ZFS name
pub const MAX_NAME_LEN: usize = 255;

/// Words `zpool` reserves for vdev specifications
const RESERVED_POOL_PREFIXES: &[&str] = &["mirror", "raidz", "draid", "spare"];

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn validate_component(component: &str) -> std::result::Result<(), NameError> {
    if component.is_empty() {
        return Err(NameError::EmptyComponent);
    }
    if let Some(c) = component.chars().find(|c| !is_name_char(*c)) {
        return Err(NameError::InvalidChar(c));
    }
    Ok(())
}

fn invalid(name: &str, source: NameError) -> Error {
    Error::InvalidName {
        name: name.to_string(),
        source,
    }
}

/// Errors that can occur when validating a ZFS name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name must be at most {MAX_NAME_LEN} characters")]
    TooLong,
    #[error("pool name must start with a letter")]
    InvalidStartChar,
    #[error("name contains invalid character: {0:?}")]
    InvalidChar(char),
    #[error("name contains an empty component")]
    EmptyComponent,
    #[error("pool name cannot start with reserved word '{0}'")]
    Reserved(&'static str),
    #[error("pool name cannot contain '/'")]
    NestedPool,
    #[error("snapshot name must have the form dataset@snapshot")]
    MissingSnapshot,
    #[error("dataset name cannot contain '@'")]
    UnexpectedSnapshot,
}

/// Name of a ZFS storage pool
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(try_from = "String", into = "String")]
pub struct PoolName(String);

impl PoolName {
    /// Create a new pool name (validates `zpool` naming rules)
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name).map_err(|e| invalid(&name, e))?;
        Ok(Self(name))
    }

    /// Get the pool name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> std::result::Result<(), NameError> {
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong);
        }
        if name.contains('/') {
            return Err(NameError::NestedPool);
        }
        if name.contains('@') {
            return Err(NameError::UnexpectedSnapshot);
        }
        if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(NameError::InvalidStartChar);
        }
        validate_component(name)?;
        if let Some(word) = RESERVED_POOL_PREFIXES.iter().find(|w| name.starts_with(*w)) {
            return Err(NameError::Reserved(word));
        }
        if name == "log" {
            return Err(NameError::Reserved("log"));
        }
        Ok(())
    }
}

impl fmt::Debug for PoolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolName({:?})", self.0)
    }
}

impl FromStr for PoolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for PoolName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PoolName> for String {
    fn from(value: PoolName) -> Self {
        value.0
    }
}

/// Name of a filesystem or volume inside a pool (`pool/child/...`)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(try_from = "String", into = "String")]
pub struct DatasetName(String);

impl DatasetName {
    /// Create a new dataset name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name).map_err(|e| invalid(&name, e))?;
        Ok(Self(name))
    }

    /// Get the dataset name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The pool that holds this dataset
    #[must_use]
    pub fn pool(&self) -> PoolName {
        let pool = self.0.split('/').next().unwrap_or(&self.0);
        PoolName(pool.to_string())
    }

    /// Whether this dataset is the root dataset of its pool
    #[must_use]
    pub fn is_pool_root(&self) -> bool {
        !self.0.contains('/')
    }

    /// Name with `/` replaced, suitable as a file name component
    #[must_use]
    pub fn to_file_stem(&self) -> String {
        self.0.replace('/', "_")
    }

    fn validate(name: &str) -> std::result::Result<(), NameError> {
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong);
        }
        if name.contains('@') {
            return Err(NameError::UnexpectedSnapshot);
        }
        let mut components = name.split('/');
        if let Some(pool) = components.next() {
            PoolName::validate(pool)?;
        }
        components.try_for_each(validate_component)
    }
}

impl fmt::Debug for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetName({:?})", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for DatasetName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DatasetName> for String {
    fn from(value: DatasetName) -> Self {
        value.0
    }
}

impl From<PoolName> for DatasetName {
    fn from(pool: PoolName) -> Self {
        Self(pool.0)
    }
}

/// Name of a snapshot (`dataset@snapshot`)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{dataset}@{snapshot}")]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotName {
    dataset: DatasetName,
    snapshot: String,
}

impl SnapshotName {
    /// Parse a full `dataset@snapshot` name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (dataset, snapshot) = name
            .split_once('@')
            .ok_or_else(|| invalid(&name, NameError::MissingSnapshot))?;
        Self::from_parts(DatasetName::new(dataset)?, snapshot)
    }

    /// Build a snapshot name from a dataset and a short snapshot name
    pub fn from_parts(dataset: DatasetName, snapshot: &str) -> Result<Self> {
        let full = format!("{dataset}@{snapshot}");
        if full.len() > MAX_NAME_LEN {
            return Err(invalid(&full, NameError::TooLong));
        }
        validate_component(snapshot).map_err(|e| invalid(&full, e))?;
        Ok(Self {
            dataset,
            snapshot: snapshot.to_string(),
        })
    }

    /// The dataset this snapshot belongs to
    #[must_use]
    pub const fn dataset(&self) -> &DatasetName {
        &self.dataset
    }

    /// The part after `@`
    #[must_use]
    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }
}

impl fmt::Debug for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotName(\"{self}\")")
    }
}

impl FromStr for SnapshotName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SnapshotName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SnapshotName> for String {
    fn from(value: SnapshotName) -> Self {
        value.to_string()
    }
}

/// The `ashift` pool property: log2 of the device sector size
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(try_from = "u32", into = "u32")]
pub struct Ashift(u8);

impl Ashift {
    /// Let ZFS detect the sector size
    pub const AUTO: Self = Self(0);
    /// 4 KiB sectors, the usual SSD alignment
    pub const SSD: Self = Self(12);

    /// Create a new ashift value (0 or 9..=16)
    pub fn new(value: u32) -> Result<Self> {
        match u8::try_from(value) {
            Ok(exp @ (0 | 9..=16)) => Ok(Self(exp)),
            _ => Err(Error::InvalidAshift(value)),
        }
    }

    /// The raw exponent
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Sector size in bytes, `None` for auto-detect
    #[must_use]
    pub const fn sector_size(self) -> Option<u64> {
        if self.0 == 0 {
            None
        } else {
            Some(1 << self.0)
        }
    }
}

impl Default for Ashift {
    fn default() -> Self {
        Self::SSD
    }
}

impl FromStr for Ashift {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| Error::invalid_argument(format!("ashift must be a number, got {s:?}")))?;
        Self::new(value)
    }
}

impl TryFrom<u32> for Ashift {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Ashift> for u32 {
    fn from(value: Ashift) -> Self {
        u32::from(value.0)
    }
}

/// Compression applied to a send stream written to a file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Raw `zfs send` stream
    #[default]
    None,
    Gzip,
    Xz,
    Zstd,
}

impl Compression {
    /// All supported compressions
    pub const ALL: [Self; 4] = [Self::None, Self::Gzip, Self::Xz, Self::Zstd];

    /// Compressor program, `None` for raw streams
    #[must_use]
    pub const fn program(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gzip"),
            Self::Xz => Some("xz"),
            Self::Zstd => Some("zstd"),
        }
    }

    /// Arguments that compress stdin to stdout
    #[must_use]
    pub const fn compress_args(self) -> &'static [&'static str] {
        match self {
            Self::None => &[],
            Self::Gzip | Self::Xz => &["-c"],
            Self::Zstd => &["-q", "-c"],
        }
    }

    /// Arguments that decompress a file to stdout
    #[must_use]
    pub const fn decompress_args(self) -> &'static [&'static str] {
        match self {
            Self::None => &[],
            Self::Gzip | Self::Xz => &["-d", "-c"],
            Self::Zstd => &["-q", "-d", "-c"],
        }
    }

    /// File extension appended after `.zfs`
    #[must_use]
    pub const fn extension(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gz"),
            Self::Xz => Some("xz"),
            Self::Zstd => Some("zst"),
        }
    }

    /// Guess the compression of a stream file from its extension
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::ALL
            .into_iter()
            .find(|c| c.extension() == Some(ext))
            .unwrap_or(Self::None)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        };
        f.write_str(s)
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" | "" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "xz" => Ok(Self::Xz),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(Error::invalid_argument(format!(
                "unknown compression '{other}' (expected none, gzip, xz or zstd)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_name_validation() {
        assert!(PoolName::new("zroot").is_ok());
        assert!(PoolName::new("tank-01.backup").is_ok());

        assert!(PoolName::new("").is_err());
        assert!(PoolName::new("1tank").is_err());
        assert!(PoolName::new("tank/home").is_err());
        assert!(PoolName::new("mirror0").is_err());
        assert!(PoolName::new("raidz").is_err());
        assert!(PoolName::new("ta nk").is_err());
    }

    #[test]
    fn test_pool_name_error_kind() {
        assert!(PoolName::new("logs").is_ok());
        match PoolName::new("log") {
            Err(Error::InvalidName { source, .. }) => {
                assert_eq!(source, NameError::Reserved("log"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_dataset_name() {
        let ds = DatasetName::new("zroot/ROOT/default").unwrap();
        assert_eq!(ds.pool().as_str(), "zroot");
        assert!(!ds.is_pool_root());
        assert_eq!(ds.to_file_stem(), "zroot_ROOT_default");

        assert!(DatasetName::new("zroot").unwrap().is_pool_root());
        assert!(DatasetName::new("zroot//home").is_err());
        assert!(DatasetName::new("zroot/home/").is_err());
        assert!(DatasetName::new("zroot/home@snap").is_err());
    }

    #[test]
    fn test_snapshot_name() {
        let snap = SnapshotName::new("zroot/home@daily-1").unwrap();
        assert_eq!(snap.dataset().as_str(), "zroot/home");
        assert_eq!(snap.snapshot(), "daily-1");
        assert_eq!(snap.to_string(), "zroot/home@daily-1");

        assert!(SnapshotName::new("zroot/home").is_err());
        assert!(SnapshotName::new("zroot/home@").is_err());
        assert!(SnapshotName::new("zroot/home@a@b").is_err());
    }

    #[test]
    fn test_ashift_range() {
        assert_eq!(Ashift::new(12).unwrap(), Ashift::SSD);
        assert_eq!(Ashift::new(0).unwrap(), Ashift::AUTO);
        assert!(Ashift::new(8).is_err());
        assert!(Ashift::new(17).is_err());
        assert!(matches!(Ashift::new(268), Err(Error::InvalidAshift(268))));
        assert_eq!("9\n".parse::<Ashift>().unwrap().value(), 9);
        assert!("twelve".parse::<Ashift>().is_err());
        assert_eq!(Ashift::SSD.sector_size(), Some(4096));
        assert_eq!(Ashift::AUTO.sector_size(), None);
    }

    #[test]
    fn test_compression_parse_and_detect() {
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert_eq!("GZIP".parse::<Compression>().unwrap(), Compression::Gzip);
        assert!("lz4".parse::<Compression>().is_err());

        assert_eq!(
            Compression::from_path(Path::new("/backup/zroot@a.zfs.zst")),
            Compression::Zstd
        );
        assert_eq!(
            Compression::from_path(Path::new("/backup/zroot@a.zfs")),
            Compression::None
        );
    }
}
