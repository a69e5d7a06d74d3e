//! Client-requested operations: crop, scale and the server-side scale
//! constraint.
//!
//! # Coordinate System
//!
//! - Crops resolve to a [`Rectangle`](crate::geometry::Rectangle) in
//!   full-resolution pixel space, origin top-left
//! - Percent crops use fractions (0.0 to 1.0) of the full image
//! - Pixel crops are expressed against the constrained (virtual) image size
//!   that a [`ScaleConstraint`] presents to the client

mod crop;
mod reduction;
mod scale;

pub use crop::CropRequest;
pub use reduction::ReductionFactor;
pub use scale::{ScaleConstraint, ScaleRequest};
