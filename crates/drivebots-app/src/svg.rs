//! Static SVG snapshot of the circuit and the trails driven on it.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use drivebots_core::{TrackGeometry, Vec2};

use crate::sinks::TrailSnapshot;

const MARGIN: f32 = 20.0;
const CAR_WIDTH: f32 = 20.0;
const CAR_LENGTH: f32 = 40.0;

fn bounds(points: impl Iterator<Item = Vec2>) -> Option<(Vec2, Vec2)> {
    points.fold(None, |acc, p| match acc {
        None => Some((p, p)),
        Some((min, max)) => Some((
            Vec2::new(min.x.min(p.x), min.y.min(p.y)),
            Vec2::new(max.x.max(p.x), max.y.max(p.y)),
        )),
    })
}

fn points_attr(points: &[Vec2]) -> String {
    let mut out = String::with_capacity(points.len() * 12);
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:.1},{:.1}", p.x, p.y);
    }
    out
}

/// Render the track boundaries, checkpoint gates, trails and latest car pose.
#[must_use]
pub fn render_svg(track: &TrackGeometry, trails: &TrailSnapshot) -> String {
    let all = track
        .left_boundary()
        .iter()
        .chain(track.right_boundary())
        .copied();
    let (min, max) = bounds(all).unwrap_or((Vec2::ZERO, Vec2::new(100.0, 100.0)));
    let width = max.x - min.x + 2.0 * MARGIN;
    let height = max.y - min.y + 2.0 * MARGIN;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="{:.1} {:.1} {:.1} {:.1}" width="{:.0}" height="{:.0}">"#,
        min.x - MARGIN,
        min.y - MARGIN,
        width,
        height,
        width,
        height
    );
    let _ = writeln!(
        svg,
        r##"<rect x="{:.1}" y="{:.1}" width="{width:.1}" height="{height:.1}" fill="#f4f4f0"/>"##,
        min.x - MARGIN,
        min.y - MARGIN
    );

    for boundary in [track.left_boundary(), track.right_boundary()] {
        let _ = writeln!(
            svg,
            r##"<polygon points="{}" fill="none" stroke="#333" stroke-width="5"/>"##,
            points_attr(boundary)
        );
    }
    for checkpoint in track.checkpoints() {
        let (a, b) = (checkpoint.gate.from, checkpoint.gate.to);
        let _ = writeln!(
            svg,
            r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#7bb661" stroke-width="1"/>"##,
            a.x, a.y, b.x, b.y
        );
    }
    for trail in trails.previous.iter().filter(|t| t.len() > 1) {
        let _ = writeln!(
            svg,
            r##"<polyline points="{}" fill="none" stroke="#999" stroke-width="1.5" stroke-opacity="0.6"/>"##,
            points_attr(trail)
        );
    }
    if trails.current.len() > 1 {
        let _ = writeln!(
            svg,
            r##"<polyline points="{}" fill="none" stroke="#d33" stroke-width="2"/>"##,
            points_attr(&trails.current)
        );
    }
    if let Some(pose) = trails.pose {
        let _ = writeln!(
            svg,
            r##"<rect x="{:.1}" y="{:.1}" width="{CAR_WIDTH}" height="{CAR_LENGTH}" fill="#2a6fdb" transform="rotate({:.2} {:.1} {:.1})"/>"##,
            pose.position.x - CAR_WIDTH / 2.0,
            pose.position.y - CAR_LENGTH / 2.0,
            pose.angle.to_degrees(),
            pose.position.x,
            pose.position.y
        );
    }
    svg.push_str("</svg>\n");
    svg
}

pub fn write_svg(path: &Path, track: &TrackGeometry, trails: &TrailSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_svg(track, trails))
        .with_context(|| format!("failed to write SVG snapshot to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivebots_core::{Pose, TrackConfig};

    #[test]
    fn snapshot_contains_track_trails_and_car() {
        let track = TrackGeometry::from_config(&TrackConfig::default()).expect("track");
        let trails = TrailSnapshot {
            previous: vec![vec![Vec2::new(130.0, 110.0), Vec2::new(150.0, 320.0)]],
            current: vec![Vec2::new(130.0, 110.0), Vec2::new(131.0, 120.0)],
            pose: Some(Pose::new(Vec2::new(131.0, 120.0), 0.0)),
        };
        let svg = render_svg(&track, &trails);
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<polygon").count(), 2);
        assert_eq!(svg.matches("<line").count(), track.checkpoints().len());
        assert_eq!(svg.matches("<polyline").count(), 2);
        assert!(svg.contains("130.0,110.0 150.0,320.0"));
        assert!(svg.contains("#2a6fdb"));
    }

    #[test]
    fn empty_trails_draw_only_the_track() {
        let track = TrackGeometry::from_config(&TrackConfig::default()).expect("track");
        let svg = render_svg(&track, &TrailSnapshot::default());
        assert_eq!(svg.matches("<polyline").count(), 0);
        assert!(!svg.contains("#2a6fdb"));
    }

    #[test]
    fn writes_into_missing_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("track.svg");
        let track = TrackGeometry::from_config(&TrackConfig::default()).expect("track");
        write_svg(&path, &track, &TrailSnapshot::default()).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("<polygon"));
    }
}
