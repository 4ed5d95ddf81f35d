use ab_glyph::{point, Font, FontArc, PxScale, ScaleFont};
use tracing::warn;

use crate::geometry::Point2;
use crate::pose::{Landmark, Pose, POSE_CONNECTIONS};
use crate::risk::{Joint, JointRisks, RiskLevel};
use crate::video::Frame;

pub const SKELETON_COLOR: [u8; 3] = [0, 255, 0];
pub const LANDMARK_COLOR: [u8; 3] = [255, 0, 0];
pub const COUNTER_COLOR: [u8; 3] = [255, 255, 255];

/// DejaVu Sans, see `assets/fonts/DejaVuSans-LICENSE.txt`.
static LABEL_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Normalised coordinates further than this outside [0, 1] are not drawn.
const LANDMARK_MARGIN: f64 = 1.0;

/// Label colour for a risk level: green, orange, red.
pub fn risk_color(level: RiskLevel) -> [u8; 3] {
    match level {
        RiskLevel::Low => [0, 255, 0],
        RiskLevel::Moderate => [255, 165, 0],
        RiskLevel::High => [255, 0, 0],
    }
}

fn drawable(landmark: &Landmark) -> bool {
    let in_range = |v: f64| v.is_finite() && (-LANDMARK_MARGIN..=1.0 + LANDMARK_MARGIN).contains(&v);
    in_range(landmark.x) && in_range(landmark.y)
}

/// Liang-Barsky: the part of `a -> b` inside `[min, max]`, if any.
fn clip_segment(a: Point2, b: Point2, min: Point2, max: Point2) -> Option<(Point2, Point2)> {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);

    for (p, q) in [(-dx, a.x - min.x), (dx, max.x - a.x), (-dy, a.y - min.y), (dy, max.y - a.y)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    Some((
        Point2::new(a.x + t0 * dx, a.y + t0 * dy),
        Point2::new(a.x + t1 * dx, a.y + t1 * dy),
    ))
}

/// Draws the pose skeleton, per-joint risk labels and the frame counter
/// onto frames in place.
#[derive(Debug, Clone)]
pub struct FrameAnnotator {
    pub line_thickness: i64,
    pub landmark_radius: i64,
    /// Baseline of the first risk label
    pub label_origin: (f32, f32),
    pub label_spacing: f32,
    pub label_scale: f32,
    /// Distance of the frame counter baseline from the bottom edge
    pub counter_margin: f32,
    font: Option<FontArc>,
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        let font = match FontArc::try_from_slice(LABEL_FONT) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!("Label font unavailable, frames get no text: {}", e);
                None
            }
        };
        Self {
            line_thickness: 2,
            landmark_radius: 2,
            label_origin: (10.0, 30.0),
            label_spacing: 30.0,
            label_scale: 22.0,
            counter_margin: 30.0,
            font,
        }
    }
}

impl FrameAnnotator {
    /// `index` is the zero-based frame number shown in the counter.
    pub fn annotate(&self, frame: &mut Frame, pose: &Pose, risks: &JointRisks, index: usize) {
        let (width, height) = (frame.width, frame.height);
        let pixel = |i: usize| {
            pose.landmarks()
                .get(i)
                .filter(|l| drawable(l))
                .map(|l| l.to_pixel(width, height))
        };

        for (from, to) in POSE_CONNECTIONS {
            if let (Some(a), Some(b)) = (pixel(from.index()), pixel(to.index())) {
                self.draw_line(frame, a, b, SKELETON_COLOR);
            }
        }

        for landmark in pose.landmarks().iter().filter(|l| drawable(l)) {
            self.fill_circle(frame, landmark.to_pixel(width, height), self.landmark_radius, LANDMARK_COLOR);
        }

        self.draw_risk_labels(frame, risks);
        let counter_y = height as f32 - self.counter_margin;
        self.draw_text(frame, &format!("Frame: {}", index), (self.label_origin.0, counter_y), COUNTER_COLOR);
    }

    /// `"{Joint}: {level}"` per joint in check order, coloured by severity.
    pub fn draw_risk_labels(&self, frame: &mut Frame, risks: &JointRisks) {
        let (x, y0) = self.label_origin;
        for (i, joint) in Joint::ALL.into_iter().enumerate() {
            let level = risks.get(joint);
            let y = y0 + self.label_spacing * i as f32;
            self.draw_text(frame, &format!("{}: {}", joint, level), (x, y), risk_color(level));
        }
    }

    /// Anti-aliased text with its baseline starting at `origin`.
    pub fn draw_text(&self, frame: &mut Frame, text: &str, origin: (f32, f32), color: [u8; 3]) {
        let Some(font) = &self.font else {
            return;
        };
        let scaled = font.as_scaled(PxScale::from(self.label_scale));
        let mut caret = origin.0;

        for c in text.chars() {
            let mut glyph = scaled.scaled_glyph(c);
            glyph.position = point(caret, origin.1);
            caret += scaled.h_advance(glyph.id);

            if let Some(outlined) = font.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                let (left, top) = (bounds.min.x.floor() as i64, bounds.min.y.floor() as i64);
                outlined.draw(|gx, gy, coverage| {
                    blend_pixel(frame, left + i64::from(gx), top + i64::from(gy), color, coverage);
                });
            }
        }
    }

    /// Bresenham, stamped with a square brush of `line_thickness`. The
    /// segment is clipped to the frame first, so the walk stays bounded.
    fn draw_line(&self, frame: &mut Frame, a: Point2, b: Point2, color: [u8; 3]) {
        let pad = self.line_thickness.max(1) as f64;
        let min = Point2::new(-pad, -pad);
        let max = Point2::new(f64::from(frame.width) + pad, f64::from(frame.height) + pad);
        let Some((a, b)) = clip_segment(a, b, min, max) else {
            return;
        };

        let (mut x0, mut y0) = (a.x.round() as i64, a.y.round() as i64);
        let (x1, y1) = (b.x.round() as i64, b.y.round() as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let brush = self.line_thickness.max(1);
        let half = brush / 2;

        loop {
            self.fill_rect(frame, x0 - half, y0 - half, brush, brush, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn fill_circle(&self, frame: &mut Frame, center: Point2, radius: i64, color: [u8; 3]) {
        let (cx, cy) = (center.x.round() as i64, center.y.round() as i64);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    frame.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn fill_rect(&self, frame: &mut Frame, x: i64, y: i64, width: i64, height: i64, color: [u8; 3]) {
        let x_end = (x + width).min(i64::from(frame.width));
        let y_end = (y + height).min(i64::from(frame.height));
        for py in y.max(0)..y_end {
            for px in x.max(0)..x_end {
                frame.set_pixel(px, py, color);
            }
        }
    }
}

fn blend_pixel(frame: &mut Frame, x: i64, y: i64, color: [u8; 3], coverage: f32) {
    if x < 0 || y < 0 {
        return;
    }
    let Some(under) = frame.pixel(x as u32, y as u32) else {
        return;
    };
    let alpha = coverage.clamp(0.0, 1.0);
    let mix = |bg: u8, fg: u8| (f32::from(bg) + (f32::from(fg) - f32::from(bg)) * alpha).round() as u8;
    frame.set_pixel(
        x,
        y,
        [mix(under[0], color[0]), mix(under[1], color[1]), mix(under[2], color[2])],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{neutral_pose, pose_with};
    use crate::pose::PoseLandmark;
    use std::time::{Duration, Instant};

    /// Pixels in rows `y_range` that are a non-zero blend of `color` over black.
    fn tinted_pixels(frame: &Frame, y_range: std::ops::Range<u32>, color: [u8; 3]) -> usize {
        let mut count = 0;
        for y in y_range {
            for x in 0..frame.width {
                if let Some(p) = frame.pixel(x, y) {
                    let tinted = p != [0, 0, 0]
                        && (0..3).all(|c| (color[c] == 0) == (p[c] == 0))
                        && (0..3).all(|c| p[c] <= color[c]);
                    if tinted {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    #[test]
    fn test_risk_labels_use_severity_colors() {
        let mut frame = Frame::new(240, 120);
        let risks = JointRisks {
            back: RiskLevel::Low,
            knees: RiskLevel::Moderate,
            shoulders: RiskLevel::High,
        };
        FrameAnnotator::default().draw_risk_labels(&mut frame, &risks);

        // Baselines at y = 30, 60, 90; glyphs sit just above each.
        assert!(tinted_pixels(&frame, 12..32, risk_color(RiskLevel::Low)) > 20);
        assert!(tinted_pixels(&frame, 42..62, risk_color(RiskLevel::Moderate)) > 20);
        assert!(tinted_pixels(&frame, 72..92, risk_color(RiskLevel::High)) > 20);
        assert_eq!(tinted_pixels(&frame, 12..32, risk_color(RiskLevel::High)), 0);
    }

    #[test]
    fn test_frame_counter_drawn_near_bottom() {
        let mut frame = Frame::new(160, 200);
        let unusable = Pose::new(vec![Landmark::new(f64::NAN, f64::NAN); crate::pose::LANDMARK_COUNT]);
        FrameAnnotator::default().annotate(&mut frame, &unusable, &JointRisks::default(), 7);

        // Counter baseline at 200 - 30.
        assert!(tinted_pixels(&frame, 150..172, COUNTER_COLOR) > 20);
        assert_eq!(tinted_pixels(&frame, 100..150, SKELETON_COLOR), 0);
    }

    #[test]
    fn test_skeleton_is_drawn_between_landmarks() {
        let mut frame = Frame::new(300, 300);
        FrameAnnotator::default().annotate(&mut frame, &neutral_pose(), &JointRisks::default(), 0);

        // Left knee (150,225) to left ankle (150,270): the midpoint lies on the bone.
        assert_eq!(frame.pixel(150, 247), Some(SKELETON_COLOR));
        assert_eq!(frame.pixel(150, 225), Some(LANDMARK_COLOR));
    }

    #[test]
    fn test_out_of_frame_segment_is_clipped_to_the_edge() {
        // Ankle below the frame but within the drawable margin.
        let pose = pose_with(&[(PoseLandmark::LeftAnkle, Landmark::new(0.5, 1.8))]);
        let mut frame = Frame::new(300, 300);
        FrameAnnotator::default().annotate(&mut frame, &pose, &JointRisks::default(), 0);
        assert_eq!(frame.pixel(150, 299), Some(SKELETON_COLOR));
    }

    #[test]
    fn test_extreme_landmarks_neither_panic_nor_stall() {
        let pose = pose_with(&[
            (PoseLandmark::LeftKnee, Landmark::new(-1e300, 0.5)),
            (PoseLandmark::LeftAnkle, Landmark::new(1e300, 0.5)),
            (PoseLandmark::LeftHip, Landmark::new(2e6, 0.5)),
        ]);
        let started = Instant::now();
        let mut frame = Frame::new(32, 32);
        for index in 0..100 {
            FrameAnnotator::default().annotate(&mut frame, &pose, &JointRisks::default(), index);
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_clip_segment() {
        let min = Point2::new(0.0, 0.0);
        let max = Point2::new(10.0, 10.0);

        let (a, b) = clip_segment(Point2::new(-100.0, 5.0), Point2::new(200.0, 5.0), min, max).unwrap();
        assert!(a.x.abs() < 1e-9 && (b.x - 10.0).abs() < 1e-9);
        assert_eq!((a.y, b.y), (5.0, 5.0));

        // Huge spans stay finite and inside the rectangle.
        let (a, b) = clip_segment(Point2::new(-1e300, 5.0), Point2::new(1e300, 5.0), min, max).unwrap();
        for p in [a, b] {
            assert!((0.0..=10.0).contains(&p.x) && (0.0..=10.0).contains(&p.y));
        }

        assert!(clip_segment(Point2::new(-5.0, -5.0), Point2::new(-1.0, 20.0), min, max).is_none());
        assert_eq!(
            clip_segment(Point2::new(2.0, 3.0), Point2::new(4.0, 5.0), min, max),
            Some((Point2::new(2.0, 3.0), Point2::new(4.0, 5.0)))
        );
    }
}
