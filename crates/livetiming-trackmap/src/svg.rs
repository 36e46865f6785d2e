//! SVG rendering of upstream track waypoints.
//!
//! Output layout:
//!
//! ```text
//! <svg xmlns=… width=… height=… viewBox=…>
//!   <polyline class="waypoints-<type>" points="…"/>   one per waypoint type
//! </svg>
//! <!-- {"width":…,"height":…,"offsetX":…,"offsetZ":…,"rotate":…,"scaleSVG":…} -->
//! ```
//!
//! The trailing comment is always the last line of the file.

use std::fmt::Write as _;
use std::path::Path;

use livetiming_types::LiveError;
use livetiming_types::snapshot::string_or_number;
use serde::Deserialize;
use tracing::debug;

use crate::transform::SvgMeta;

/// Waypoint type of the racing line; everything else (pit lane, …) is drawn thinner.
const RACING_LINE: &str = "0";

/// One element of `GET /rest/race/track/{id}/trackmap`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Waypoint {
    #[serde(rename = "type", default, deserialize_with = "string_or_number")]
    pub kind: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Render waypoints into an SVG document with a trailing metadata line.
pub fn render(waypoints: &[Waypoint]) -> Result<String, LiveError> {
    let meta = SvgMeta::fit(waypoints.iter().map(|w| (w.x, w.z)))
        .ok_or_else(|| LiveError::InvalidResource("track map has no usable waypoints".into()))?;

    // Group by type, keeping the order in which types first appear.
    let mut groups: Vec<(&str, Vec<&Waypoint>)> = Vec::new();
    let mut dropped = 0usize;
    for w in waypoints {
        if !w.x.is_finite() || !w.z.is_finite() {
            dropped += 1;
            continue;
        }
        match groups.iter_mut().find(|(kind, _)| *kind == w.kind) {
            Some((_, points)) => points.push(w),
            None => groups.push((w.kind.as_str(), vec![w])),
        }
    }
    if dropped > 0 {
        debug!(dropped, total = waypoints.len(), "skipping non-finite waypoints");
    }
    debug!(
        segments = groups.len(),
        width = meta.width,
        height = meta.height,
        rotate = meta.rotate,
        "rendering track map"
    );

    let mut out = String::new();
    let (width, height) = (meta.width.ceil(), meta.height.ceil());
    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );
    for (kind, points) in &groups {
        let stroke = if *kind == RACING_LINE { 12 } else { 4 };
        let mut coords = String::new();
        for w in points {
            let (px, py) = meta.project(w.x, w.z);
            let _ = write!(coords, "{px:.1},{py:.1} ");
        }
        let _ = writeln!(
            out,
            r##"  <polyline class="waypoints-{kind}" fill="none" stroke="#555" stroke-width="{stroke}" stroke-linejoin="round" points="{}"/>"##,
            coords.trim_end()
        );
    }
    out.push_str("</svg>\n");

    let meta_json = serde_json::to_string(&meta)
        .map_err(|e| LiveError::Parsing(format!("track map metadata: {e}")))?;
    let _ = write!(out, "<!-- {meta_json} -->");
    Ok(out)
}

/// Read the projection parameters from the last line of a rendered SVG.
pub fn parse_meta(svg: &str) -> Result<SvgMeta, LiveError> {
    let last = svg
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| LiveError::InvalidResource("empty track map".into()))?;

    let json = last
        .strip_prefix("<!--")
        .and_then(|rest| rest.strip_suffix("-->"))
        .ok_or_else(|| LiveError::InvalidResource("track map has no metadata line".into()))?;

    serde_json::from_str(json.trim())
        .map_err(|e| LiveError::Parsing(format!("track map metadata: {e}")))
}

/// [`parse_meta`] on a file from disk.
pub fn read_meta(path: &Path) -> Result<SvgMeta, LiveError> {
    let svg = std::fs::read_to_string(path)?;
    parse_meta(&svg)
}
