//! Decoding one acquisition file into a sample.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::array::{DType, SliceArray};
use crate::error::DecodeError;
use crate::io::FileSource;

use super::detect::FlimFormat;
use super::ptu::{self, PtuMetadata};
use super::sdt::{self, SdtMeasureInfo};
use super::tiff;

// =============================================================================
// ChannelMetadata
// =============================================================================

/// Acquisition metadata attached to one channel of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "file_type", rename_all = "lowercase")]
pub enum ChannelMetadata {
    Ptu(PtuMetadata),
    Sdt(SdtMeasureInfo),
    #[serde(rename = "tif")]
    Tiff,
}

impl ChannelMetadata {
    /// Name of the format the metadata came from.
    pub fn file_type(&self) -> &'static str {
        match self {
            ChannelMetadata::Ptu(_) => FlimFormat::Ptu.name(),
            ChannelMetadata::Sdt(_) => FlimFormat::Sdt.name(),
            ChannelMetadata::Tiff => FlimFormat::Tiff.name(),
        }
    }

    /// Laser repetition rate in MHz, when the file records one.
    pub fn laser_frequency_mhz(&self) -> Option<f64> {
        match self {
            ChannelMetadata::Ptu(meta) => meta.sync_rate.map(|hz| hz / 1e6),
            ChannelMetadata::Sdt(info) => info
                .stop_info
                .as_ref()
                .map(|stop| f64::from(stop.max_sync_rate) / 1e6),
            ChannelMetadata::Tiff => None,
        }
    }
}

// =============================================================================
// SliceSample
// =============================================================================

/// One decoded file: data with axes (channel, bin, y, x) and one metadata
/// entry per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceSample {
    pub data: SliceArray,
    pub metadata: Vec<ChannelMetadata>,
}

impl SliceSample {
    /// Attach the same metadata to every channel of `data`.
    pub fn replicated(data: SliceArray, metadata: ChannelMetadata) -> Self {
        let channels = data.shape()[0];
        Self {
            data,
            metadata: vec![metadata; channels],
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.data.shape()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn nbytes(&self) -> usize {
        self.data.nbytes()
    }
}

impl FlimFormat {
    /// Decode the file at `path` with this format's reader.
    pub fn read(self, path: &Path) -> Result<SliceSample, DecodeError> {
        let source = FileSource::open(path)?;
        let sample = match self {
            FlimFormat::Ptu => ptu::decode(source.as_bytes())?,
            FlimFormat::Sdt => sdt::decode(source.as_bytes())?,
            FlimFormat::Tiff => {
                SliceSample::replicated(tiff::read_pages(&source)?, ChannelMetadata::Tiff)
            }
        };
        debug!(
            path = %path.display(),
            format = %self,
            shape = ?sample.shape(),
            dtype = %sample.dtype(),
            "Decoded sample"
        );
        Ok(sample)
    }
}
