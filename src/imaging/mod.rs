//! Image processing: pure Rust, statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image` crate (JPEG, PNG, GIF) |
//! | **Fit** | shrink-only contain math + `resize_exact` (Lanczos3) |
//! | **Pad** | `imageops::overlay` onto a zero-filled canvas |
//! | **Encode** | JPEG, quality 100 |
//! | **Fingerprint** | SHA-1 of the source bytes + box size |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Codec**: bytes ⇄ raster
//! - **Letterbox**: the [`Transformation`](crate::service::Transformation) the service caches

mod calculations;
pub mod codec;
pub mod letterbox;

pub use calculations::{calculate_center_offset, calculate_contain_dimensions, is_scaled_downsize};
pub use codec::CodecError;
pub use letterbox::Letterbox;
