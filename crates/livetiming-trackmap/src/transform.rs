//! World → SVG projection.
//!
//! Simulator coordinates lie in the horizontal `(x, z)` plane. A point is
//! mapped onto the canvas in four steps:
//!
//! 1. translate by `(offsetX, offsetZ)` so the track's minimum corner is the origin,
//! 2. scale by `scaleSVG` and add the fixed [`PADDING`],
//! 3. invert the vertical axis (SVG grows downwards),
//! 4. optionally rotate by 90° so tall tracks render in landscape.
//!
//! The parameters are written into every rendered SVG (see [`crate::svg`]) and
//! read back by the live-map relay, so cars are projected with exactly the
//! numbers the track itself was drawn with.

use livetiming_types::CarPosition;
use serde::{Deserialize, Serialize};

/// Blank border around the track, in SVG units.
pub const PADDING: f64 = 20.0;

/// Length of the longer track side on the canvas, before padding.
pub const TARGET_SPAN: f64 = 1000.0;

/// Projection parameters of one rendered track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvgMeta {
    /// Canvas width after rotation.
    pub width: f64,
    /// Canvas height after rotation.
    pub height: f64,
    pub offset_x: f64,
    pub offset_z: f64,
    pub rotate: bool,
    #[serde(rename = "scaleSVG")]
    pub scale_svg: f64,
}

/// A car projected onto the track canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedCar {
    pub driver: String,
    pub x: f64,
    pub y: f64,
}

impl SvgMeta {
    /// Fit a canvas around the given `(x, z)` points.
    ///
    /// Returns `None` when there are no finite points.
    pub fn fit(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;
        for (x, z) in points {
            if !x.is_finite() || !z.is_finite() {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, x, z, z),
                Some((min_x, max_x, min_z, max_z)) => {
                    (min_x.min(x), max_x.max(x), min_z.min(z), max_z.max(z))
                }
            });
        }
        let (min_x, max_x, min_z, max_z) = bounds?;

        let span_x = max_x - min_x;
        let span_z = max_z - min_z;
        let longest = span_x.max(span_z);
        let scale_svg = if longest > 0.0 { TARGET_SPAN / longest } else { 1.0 };

        let plain_width = span_x * scale_svg + 2.0 * PADDING;
        let plain_height = span_z * scale_svg + 2.0 * PADDING;
        let rotate = span_z > span_x;
        let (width, height) = if rotate {
            (plain_height, plain_width)
        } else {
            (plain_width, plain_height)
        };

        Some(Self {
            width,
            height,
            offset_x: -min_x,
            offset_z: -min_z,
            rotate,
            scale_svg,
        })
    }

    /// Canvas height before the optional rotation.
    fn plain_height(&self) -> f64 {
        if self.rotate { self.width } else { self.height }
    }

    /// Map a world point onto the canvas.
    pub fn project(&self, x: f64, z: f64) -> (f64, f64) {
        let h = self.plain_height();
        let u = (x + self.offset_x) * self.scale_svg + PADDING;
        let v = h - ((z + self.offset_z) * self.scale_svg + PADDING);
        if self.rotate { (h - v, u) } else { (u, v) }
    }

    /// Map a canvas point back into world coordinates.
    pub fn unproject(&self, px: f64, py: f64) -> (f64, f64) {
        let h = self.plain_height();
        let (u, v) = if self.rotate { (py, h - px) } else { (px, py) };
        let x = (u - PADDING) / self.scale_svg - self.offset_x;
        let z = (h - v - PADDING) / self.scale_svg - self.offset_z;
        (x, z)
    }

    /// Project a car-positions array, keeping its order.
    pub fn project_cars(&self, cars: &[CarPosition]) -> Vec<ProjectedCar> {
        cars.iter()
            .map(|car| {
                let (x, y) = self.project(car.x, car.z);
                ProjectedCar {
                    driver: car.driver.clone(),
                    x,
                    y,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn close(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < EPS && (a.1 - b.1).abs() < EPS
    }

    #[test]
    fn fit_landscape_track() {
        let meta = SvgMeta::fit([(-100.0, 0.0), (100.0, 50.0)]).unwrap();
        assert!(!meta.rotate);
        assert_eq!(meta.scale_svg, 5.0);
        assert_eq!(meta.width, 1000.0 + 2.0 * PADDING);
        assert_eq!(meta.height, 250.0 + 2.0 * PADDING);
        assert_eq!(meta.offset_x, 100.0);
        assert_eq!(meta.offset_z, 0.0);

        // Minimum x, minimum z lands bottom-left inside the padding.
        assert!(close(meta.project(-100.0, 0.0), (PADDING, meta.height - PADDING)));
        // Maximum corner lands top-right.
        assert!(close(meta.project(100.0, 50.0), (meta.width - PADDING, PADDING)));
    }

    #[test]
    fn fit_rotates_tall_tracks_into_landscape() {
        let meta = SvgMeta::fit([(0.0, 0.0), (10.0, 100.0)]).unwrap();
        assert!(meta.rotate);
        assert!(meta.width > meta.height);

        // Every point stays on the canvas.
        for (x, z) in [(0.0, 0.0), (10.0, 100.0), (0.0, 100.0), (10.0, 0.0)] {
            let (px, py) = meta.project(x, z);
            assert!((0.0..=meta.width).contains(&px), "x {px} off canvas");
            assert!((0.0..=meta.height).contains(&py), "y {py} off canvas");
        }
    }

    #[test]
    fn unproject_inverts_project() {
        let points = [(-350.5, 12.25), (80.0, -410.0), (0.0, 0.0), (199.9, 33.3)];
        for rotate_tall in [false, true] {
            let meta = if rotate_tall {
                SvgMeta::fit([(-400.0, -500.0), (200.0, 600.0)]).unwrap()
            } else {
                SvgMeta::fit([(-400.0, -500.0), (900.0, 100.0)]).unwrap()
            };
            assert_eq!(meta.rotate, rotate_tall);
            for (x, z) in points {
                let (px, py) = meta.project(x, z);
                let back = meta.unproject(px, py);
                assert!(close(back, (x, z)), "{:?} != {:?}", back, (x, z));
            }
        }
    }

    #[test]
    fn fit_ignores_non_finite_points_and_handles_degenerate_input() {
        assert!(SvgMeta::fit(std::iter::empty()).is_none());
        assert!(SvgMeta::fit([(f64::NAN, 1.0)]).is_none());

        let single = SvgMeta::fit([(5.0, 5.0), (f64::INFINITY, 0.0)]).unwrap();
        assert_eq!(single.scale_svg, 1.0);
        assert_eq!(single.width, 2.0 * PADDING);
    }

    #[test]
    fn project_cars_keeps_order_and_names() {
        let meta = SvgMeta::fit([(0.0, 0.0), (100.0, 50.0)]).unwrap();
        let cars = vec![
            CarPosition { driver: "LDE".into(), x: 10.0, y: 3.0, z: 10.0 },
            CarPosition { driver: "TEN".into(), x: 90.0, y: 3.0, z: 40.0 },
        ];
        let projected = meta.project_cars(&cars);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected[1].driver, "TEN");
        assert!(close((projected[0].x, projected[0].y), meta.project(10.0, 10.0)));
    }

    #[test]
    fn meta_uses_wire_field_names() {
        let meta = SvgMeta::fit([(0.0, 0.0), (10.0, 5.0)]).unwrap();
        let json = serde_json::to_value(meta).unwrap();
        for key in ["width", "height", "offsetX", "offsetZ", "rotate", "scaleSVG"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
