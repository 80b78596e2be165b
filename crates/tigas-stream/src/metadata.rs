//! Frame-metadata sidecar
//!
//! One `frame_id,timestamp_ms` line per encoded frame, in frame order. The
//! sidecar is the offline half of the SEI identity channel.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tigas_core::FrameMetadata;

pub struct MetadataWriter {
    writer: BufWriter<File>,
}

impl MetadataWriter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn append(&mut self, meta: &FrameMetadata) -> std::io::Result<()> {
        writeln!(self.writer, "{},{}", meta.frame_id, meta.timestamp_ms)
    }

    pub fn finish(mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
