//! CRAM container, slice and record decoding.
//!
//! Everything here works from byte ranges: a slice is located through the
//! index, its container header and compression header are read, and only
//! that slice's blocks are fetched and decompressed.

pub mod codec;
pub mod compression_header;
pub mod container;
pub mod decoder;
pub mod encoding;
pub mod num;
pub mod rans;
pub mod record;
pub mod slice;

pub use compression_header::CompressionHeader;
pub use container::{ContainerHeader, FileDefinition};
pub use decoder::{ContainerDecoder, FileHeader};
pub use record::{AlignmentRecord, FeatureCode, FeatureData, MateInfo, ReadFeature, Tag, TagValue};
pub use slice::{Slice, SliceHeader};
