//! Recorder contract
//!
//! Recording (muxing to FLV/MP4/HLS) happens outside the relay. A recorder
//! is created per recorded stream and attached as a sink of the bridge
//! fan-out carrying that stream.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::media::MediaSink;

/// What a recorder is created for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderParams {
    pub client_id: String,
    pub stream_id: String,
    /// One output file per requested record type
    pub files: Vec<PathBuf>,
}

/// A running recording of one stream
pub trait Recorder: Send + Sync {
    fn init(&self) -> Result<()>;

    fn close(&self);

    fn as_sink(self: Arc<Self>) -> Arc<dyn MediaSink>;
}

pub trait RecorderFactory: Send + Sync {
    fn create(&self, params: &RecorderParams) -> Result<Arc<dyn Recorder>>;
}

/// `<record_path>/<stream_id>_<unix_millis>.<record_type>`
pub fn record_file(record_path: &Path, stream_id: &str, unix_millis: u128, record_type: &str) -> PathBuf {
    record_path.join(format!("{}_{}.{}", stream_id, unix_millis, record_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_file_name() {
        let path = record_file(Path::new("/data/record"), "s1", 1_700_000_000_123, "flv");
        assert_eq!(path, PathBuf::from("/data/record/s1_1700000000123.flv"));
    }
}
