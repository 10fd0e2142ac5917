//! PDF writing: appending revisions to an existing file.
//!
//! ## Architecture
//!
//! ```text
//! [ImageData] / [ContentStreamBuilder]  (stamp images and drawing operators)
//!     ↓
//! Object values
//!     ↓
//! [IncrementalUpdate]  (new + replaced objects, chained xref section)
//!     ↓
//! [ObjectSerializer]   (deterministic PDF syntax)
//!     ↓
//! original bytes ++ new revision
//! ```
//!
//! Nothing in this module ever rewrites bytes that were already in the file.

mod content_stream;
mod image_handler;
mod incremental;
mod object_serializer;

pub use content_stream::{encode_win_ansi, helvetica_width, ContentStreamBuilder, ContentStreamOp};
pub use image_handler::{ColorSpace, ImageData, ImageError, ImageFormat};
pub use incremental::{IncrementalUpdate, WrittenRevision};
pub use object_serializer::{format_real, hex_upper, ObjectSerializer};
