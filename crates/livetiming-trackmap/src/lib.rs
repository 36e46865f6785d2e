//! Track map geometry.
//!
//! - [`transform`] – the world → SVG projection shared by the renderer and the
//!   live-map relay, plus its inverse.
//! - [`svg`] – renders upstream waypoints into an SVG whose last line carries
//!   the projection parameters.

pub mod svg;
pub mod transform;

pub use svg::{Waypoint, parse_meta, read_meta, render};
pub use transform::{ProjectedCar, SvgMeta};
