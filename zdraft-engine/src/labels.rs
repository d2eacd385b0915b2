//! 测量标签与角度弧。
//!
//! 多行标签以参考点为中心对称排布：共 `n` 行时第 `i` 行的屏幕纵向偏移为
//! `(i - (n - 1) / 2) × 行高`。两行标签位于 ±0.5 行高，四行标签位于 ±0.5 与 ±1.5 行高。

use zdraft_core::document::Geometry;
use zdraft_core::geometry::{Bounds2D, Point2, normalize_angle, point_on_circle, polygon_area};

/// 标签内容与世界坐标参考点。
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementLabel {
    pub anchor: Point2,
    pub lines: Vec<String>,
}

/// 各行相对参考点的纵向偏移（屏幕像素，向下为正）。
pub fn label_line_offsets(line_count: usize, line_height: f64) -> Vec<f64> {
    let center = (line_count as f64 - 1.0) * 0.5;
    (0..line_count)
        .map(|i| (i as f64 - center) * line_height)
        .collect()
}

/// 两条共顶点射线之间的内角弧，`|sweep| ≤ π`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InternalArc {
    pub start_angle: f64,
    /// 带符号扫掠角，正值为逆时针。
    pub sweep: f64,
}

impl InternalArc {
    #[inline]
    pub fn end_angle(&self) -> f64 {
        self.start_angle + self.sweep
    }

    #[inline]
    pub fn bisector(&self) -> f64 {
        self.start_angle + self.sweep * 0.5
    }
}

/// 比较顺时针与逆时针两种角距离，取较短者。任一射线退化时返回 `None`。
pub fn internal_arc(vertex: Point2, first: Point2, second: Point2) -> Option<InternalArc> {
    let to_first = vertex.vector_to(first);
    let to_second = vertex.vector_to(second);
    if to_first.normalize().is_none() || to_second.normalize().is_none() {
        return None;
    }
    let a = normalize_angle(to_first.angle());
    let b = normalize_angle(to_second.angle());
    let counter_clockwise = normalize_angle(b - a);
    let clockwise = normalize_angle(a - b);
    let sweep = if counter_clockwise <= clockwise {
        counter_clockwise
    } else {
        -clockwise
    };
    Some(InternalArc {
        start_angle: a,
        sweep,
    })
}

/// 长度、角度、面积标签。没有可测量量的几何返回 `None`。
pub fn measurement_label(geometry: &Geometry, decimals: usize) -> Option<MeasurementLabel> {
    let fmt = |value: f64| format!("{value:.decimals$}");
    match geometry {
        Geometry::Line(line) => {
            let vector = line.start.vector_to(line.end);
            Some(MeasurementLabel {
                anchor: line.start.midpoint(line.end),
                lines: vec![
                    format!("L={}", fmt(vector.length())),
                    format!("{}°", fmt(normalize_angle(vector.angle()).to_degrees())),
                ],
            })
        }
        Geometry::Dimension(dim) => {
            let (a, b) = dim.dimension_line()?;
            let text = dim
                .text_override
                .clone()
                .unwrap_or_else(|| fmt(dim.measurement()));
            Some(MeasurementLabel {
                anchor: a.midpoint(b),
                lines: vec![text],
            })
        }
        Geometry::AngleMeasurement(angle) => {
            let arc = internal_arc(angle.vertex, angle.first, angle.second)?;
            let radius = angle_arc_radius(angle.vertex, angle.first, angle.second);
            Some(MeasurementLabel {
                anchor: point_on_circle(angle.vertex, radius, arc.bisector()),
                lines: vec![format!("{}°", fmt(arc.sweep.abs().to_degrees()))],
            })
        }
        Geometry::Rectangle(rect) => {
            let bounds = Bounds2D::from_corners(rect.corner_a, rect.corner_b);
            let (w, h) = (bounds.width(), bounds.height());
            Some(MeasurementLabel {
                anchor: bounds.center(),
                lines: vec![
                    format!("A={}", fmt(w * h)),
                    format!("W={}", fmt(w)),
                    format!("H={}", fmt(h)),
                    format!("P={}", fmt(2.0 * (w + h))),
                ],
            })
        }
        Geometry::Circle(circle) => Some(MeasurementLabel {
            anchor: circle.center,
            lines: vec![
                format!("A={}", fmt(std::f64::consts::PI * circle.radius * circle.radius)),
                format!("R={}", fmt(circle.radius)),
            ],
        }),
        Geometry::Polyline(polyline) if polyline.closed => {
            closed_region_label(&polyline.vertices, &fmt)
        }
        Geometry::Hatch(hatch) => closed_region_label(&hatch.boundary, &fmt),
        _ => None,
    }
}

/// 角度弧半径：两条射线中较短者的一半。
pub fn angle_arc_radius(vertex: Point2, first: Point2, second: Point2) -> f64 {
    vertex.distance(first).min(vertex.distance(second)) * 0.5
}

fn closed_region_label(vertices: &[Point2], fmt: &dyn Fn(f64) -> String) -> Option<MeasurementLabel> {
    if vertices.len() < 3 {
        return None;
    }
    let mut bounds = Bounds2D::empty();
    let mut perimeter = 0.0;
    for (i, vertex) in vertices.iter().enumerate() {
        bounds.include_point(*vertex);
        perimeter += vertex.distance(vertices[(i + 1) % vertices.len()]);
    }
    Some(MeasurementLabel {
        anchor: bounds.center(),
        lines: vec![
            format!("A={}", fmt(polygon_area(vertices))),
            format!("P={}", fmt(perimeter)),
        ],
    })
}

#[cfg(test)]
mod tests {
    use std::f64::consts::{FRAC_PI_2, PI};

    use zdraft_core::document::{Line, Rectangle};

    use super::*;

    #[test]
    fn multi_line_offsets_are_symmetric() {
        assert_eq!(label_line_offsets(1, 14.0), vec![0.0]);
        assert_eq!(label_line_offsets(2, 14.0), vec![-7.0, 7.0]);
        assert_eq!(label_line_offsets(4, 10.0), vec![-15.0, -5.0, 5.0, 15.0]);
    }

    #[test]
    fn internal_arc_picks_short_path_for_both_orders() {
        let vertex = Point2::new(0.0, 0.0);
        let east = Point2::new(1.0, 0.0);
        let south_east = Point2::new(1.0, -1.0);

        let forward = internal_arc(vertex, east, south_east).expect("arc");
        assert!((forward.sweep + PI / 4.0).abs() < 1e-12);
        let backward = internal_arc(vertex, south_east, east).expect("arc");
        assert!((backward.sweep - PI / 4.0).abs() < 1e-12);

        let north = Point2::new(0.0, 2.0);
        let west_south = Point2::new(-1.0, -0.2);
        for (a, b) in [(north, west_south), (west_south, north)] {
            let arc = internal_arc(vertex, a, b).expect("arc");
            assert!(arc.sweep.abs() <= PI + 1e-12);
        }
    }

    #[test]
    fn internal_arc_rejects_degenerate_rays() {
        let vertex = Point2::new(3.0, 3.0);
        assert!(internal_arc(vertex, vertex, Point2::new(4.0, 3.0)).is_none());
    }

    #[test]
    fn rectangle_label_has_four_lines() {
        let rect = Geometry::Rectangle(Rectangle {
            corner_a: Point2::new(0.0, 0.0),
            corner_b: Point2::new(4.0, 2.0),
        });
        let label = measurement_label(&rect, 1).expect("label");
        assert_eq!(label.lines, vec!["A=8.0", "W=4.0", "H=2.0", "P=12.0"]);
        assert_eq!(label.anchor, Point2::new(2.0, 1.0));
    }

    #[test]
    fn line_label_reports_length_and_angle() {
        let line = Geometry::Line(Line {
            start: Point2::new(0.0, 0.0),
            end: Point2::new(0.0, 5.0),
        });
        let label = measurement_label(&line, 2).expect("label");
        assert_eq!(label.lines[0], "L=5.00");
        assert_eq!(label.lines[1], format!("{:.2}°", FRAC_PI_2.to_degrees()));
    }
}
