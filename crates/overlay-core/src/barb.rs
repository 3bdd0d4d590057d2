// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wind-barb icon generation.
//!
//! Renders the standard meteorological wind-barb symbol for a speed in knots.
//! Speed is consumed in priority order: one pennant per 50 kt, one full barb
//! per remaining 10 kt, and a single half barb when at least 5 kt remain.
//! Anything under 3 kt is drawn as the calm circle.
//!
//! The same geometry is available as a raster ([`render_barb`]) for the map
//! engine's image registry and as an SVG document ([`barb_svg`]) for export.

use image::{Rgba, RgbaImage};
use resvg::tiny_skia::{FillRule, LineCap, Paint, PathBuilder, Pixmap, Stroke, Transform};

/// Width and height of every generated icon, in pixels.
pub const ICON_SIZE: u32 = 48;

/// Discrete speeds (knots) that get their own cached icon.
pub const SPEED_BUCKETS: [u32; 15] = [0, 5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 65, 70];

/// Prefix of every icon name registered with the map engine.
pub const ICON_PREFIX: &str = "wind-barb-";

const CALM_THRESHOLD_KNOTS: f64 = 3.0;
/// A bucket covers speeds below `bucket + BUCKET_REACH`.
pub const BUCKET_REACH: f64 = 3.0;

const BARB_COLOR: [u8; 3] = [0x00, 0x66, 0xcc];
const STROKE_WIDTH: f32 = 2.0;
const CENTER: f32 = 24.0;
const SHAFT_HALF_LENGTH: f32 = 18.0;
const DECORATION_START: f32 = CENTER - 16.0;
const DECORATION_OFFSET: f32 = 2.0;
const PENNANT_WIDTH: f32 = 12.0;
const PENNANT_HEIGHT: f32 = 10.0;
const PENNANT_SPACING: f32 = 8.0;
const BARB_LENGTH: f32 = 12.0;
const BARB_RISE: f32 = 4.0;
const BARB_SPACING: f32 = 5.0;
const CALM_RADIUS: f32 = 4.0;

/// How a speed breaks down into barb decorations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarbDecomposition {
    /// Speed is below the calm threshold; no shaft is drawn.
    pub calm: bool,
    /// Filled triangles, 50 kt each.
    pub pennants: u32,
    /// Full-length barbs, 10 kt each.
    pub full_barbs: u32,
    /// A single half-length barb for 5 kt.
    pub half_barb: bool,
}

impl BarbDecomposition {
    /// Decompose a speed in knots. Negative and NaN speeds are treated as calm.
    #[must_use]
    pub fn from_knots(knots: f64) -> Self {
        let knots = clamp_speed(knots);
        if knots < CALM_THRESHOLD_KNOTS {
            return Self {
                calm: true,
                ..Self::default()
            };
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "speed is clamped non-negative")]
        let mut remaining = knots.floor() as u32;

        let pennants = remaining / 50;
        remaining -= pennants * 50;

        let full_barbs = remaining / 10;
        remaining -= full_barbs * 10;

        Self {
            calm: false,
            pennants,
            full_barbs,
            half_barb: remaining >= 5,
        }
    }
}

/// One drawing primitive of a barb icon, in icon pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarbShape {
    /// Unfilled circle (calm symbol).
    Circle { cx: f32, cy: f32, r: f32 },
    /// Stroked segment (shaft, full barb, half barb).
    Line { x1: f32, y1: f32, x2: f32, y2: f32 },
    /// Filled triangle (pennant).
    Triangle { points: [(f32, f32); 3] },
}

fn clamp_speed(knots: f64) -> f64 {
    if knots.is_nan() || knots < 0.0 {
        0.0
    } else {
        knots
    }
}

/// Map a continuous speed onto its icon bucket.
///
/// Bucket `b` covers every speed below `b + 3`, so 2.9 kt is bucket 0 and
/// 3 kt is bucket 5. Speeds past the last bucket saturate at 70.
#[must_use]
pub fn bucket_for_speed(knots: f64) -> u32 {
    let knots = clamp_speed(knots);
    SPEED_BUCKETS
        .iter()
        .copied()
        .find(|&bucket| knots < f64::from(bucket) + BUCKET_REACH)
        .unwrap_or(SPEED_BUCKETS[SPEED_BUCKETS.len() - 1])
}

/// Deterministic image-registry name for a bucket.
#[must_use]
pub fn icon_name(bucket: u32) -> String {
    format!("{ICON_PREFIX}{bucket}")
}

/// Lay out the primitives for a speed.
#[must_use]
pub fn barb_shapes(knots: f64) -> Vec<BarbShape> {
    let decomposition = BarbDecomposition::from_knots(knots);

    if decomposition.calm {
        return vec![BarbShape::Circle {
            cx: CENTER,
            cy: CENTER,
            r: CALM_RADIUS,
        }];
    }

    let mut shapes = vec![BarbShape::Line {
        x1: CENTER,
        y1: CENTER + SHAFT_HALF_LENGTH,
        x2: CENTER,
        y2: CENTER - SHAFT_HALF_LENGTH,
    }];

    let x = CENTER + DECORATION_OFFSET;
    let mut y = DECORATION_START;

    for _ in 0..decomposition.pennants {
        shapes.push(BarbShape::Triangle {
            points: [(x, y), (x + PENNANT_WIDTH, y), (x, y + PENNANT_HEIGHT)],
        });
        y += PENNANT_SPACING;
    }

    for _ in 0..decomposition.full_barbs {
        shapes.push(BarbShape::Line {
            x1: x,
            y1: y,
            x2: x + BARB_LENGTH,
            y2: y - BARB_RISE,
        });
        y += BARB_SPACING;
    }

    if decomposition.half_barb {
        shapes.push(BarbShape::Line {
            x1: x,
            y1: y,
            x2: x + BARB_LENGTH / 2.0,
            y2: y - BARB_RISE / 2.0,
        });
    }

    shapes
}

/// Rasterize the barb for a speed into a 48x48 RGBA image.
#[must_use]
pub fn render_barb(knots: f64) -> RgbaImage {
    let Some(mut pixmap) = Pixmap::new(ICON_SIZE, ICON_SIZE) else {
        return RgbaImage::new(ICON_SIZE, ICON_SIZE);
    };

    let mut paint = Paint::default();
    paint.set_color_rgba8(BARB_COLOR[0], BARB_COLOR[1], BARB_COLOR[2], 255);
    paint.anti_alias = true;

    let stroke = Stroke {
        width: STROKE_WIDTH,
        line_cap: LineCap::Butt,
        ..Stroke::default()
    };

    for shape in barb_shapes(knots) {
        match shape {
            BarbShape::Circle { cx, cy, r } => {
                if let Some(path) = PathBuilder::from_circle(cx, cy, r) {
                    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
                }
            }
            BarbShape::Line { x1, y1, x2, y2 } => {
                let mut pb = PathBuilder::new();
                pb.move_to(x1, y1);
                pb.line_to(x2, y2);
                if let Some(path) = pb.finish() {
                    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
                }
            }
            BarbShape::Triangle { points } => {
                let mut pb = PathBuilder::new();
                pb.move_to(points[0].0, points[0].1);
                pb.line_to(points[1].0, points[1].1);
                pb.line_to(points[2].0, points[2].1);
                pb.close();
                if let Some(path) = pb.finish() {
                    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
                }
            }
        }
    }

    RgbaImage::from_fn(ICON_SIZE, ICON_SIZE, |x, y| {
        pixmap.pixel(x, y).map_or(Rgba([0, 0, 0, 0]), |p| {
            let c = p.demultiply();
            Rgba([c.red(), c.green(), c.blue(), c.alpha()])
        })
    })
}

/// The same barb as a standalone SVG document.
#[must_use]
pub fn barb_svg(knots: f64) -> String {
    let color = format!("#{:02x}{:02x}{:02x}", BARB_COLOR[0], BARB_COLOR[1], BARB_COLOR[2]);
    let mut body = String::new();

    for shape in barb_shapes(knots) {
        let element = match shape {
            BarbShape::Circle { cx, cy, r } => format!(
                r#"<circle cx="{cx}" cy="{cy}" r="{r}" fill="none" stroke="{color}" stroke-width="{STROKE_WIDTH}"/>"#
            ),
            BarbShape::Line { x1, y1, x2, y2 } => format!(
                r#"<line x1="{x1}" y1="{y1}" x2="{x2}" y2="{y2}" stroke="{color}" stroke-width="{STROKE_WIDTH}"/>"#
            ),
            BarbShape::Triangle { points } => {
                let [(ax, ay), (bx, by), (cx, cy)] = points;
                format!(r#"<polygon points="{ax},{ay} {bx},{by} {cx},{cy}" fill="{color}"/>"#)
            }
        };
        body.push_str("  ");
        body.push_str(&element);
        body.push('\n');
    }

    format!(
        "<svg width=\"{ICON_SIZE}\" height=\"{ICON_SIZE}\" viewBox=\"0 0 {ICON_SIZE} {ICON_SIZE}\" xmlns=\"http://www.w3.org/2000/svg\">\n{body}</svg>\n"
    )
}
