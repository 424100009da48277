use std::path::PathBuf;
use std::time::Duration;

use crate::compression::codec::Codec;
use crate::serialization::WireFormat;

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory, one subdirectory per collection.
    pub path: PathBuf,
    /// Payload compression for newly created shards.
    pub codec: Codec,
    /// Wire format for newly created collections.
    pub format: WireFormat,
    /// Unix permission mode applied to written files (passthrough to the OS).
    pub file_protection: Option<u32>,
    /// Shards below this document count are compaction candidates.
    pub compaction_threshold: usize,
    /// Delay between background compaction passes.
    pub compaction_interval: Duration,
    /// Deadline applied to each engine operation and result stream.
    pub operation_timeout: Option<Duration>,
}

impl Config {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Config {
            path: path.into(),
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            path: PathBuf::from("./data"),
            codec: Codec::None,
            format: WireFormat::TagTree,
            file_protection: None,
            compaction_threshold: 100,             // docs per shard
            compaction_interval: Duration::from_secs(60),
            operation_timeout: None,
        }
    }
}
