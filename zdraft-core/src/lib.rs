pub mod document;
pub mod transform;

pub mod geometry {
    use std::f64::consts::{PI, TAU};

    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维世界坐标点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        pub const ORIGIN: Point2 = Point2(DVec2::ZERO);

        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn midpoint(self, other: Point2) -> Point2 {
            Self((self.0 + other.0) * 0.5)
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        pub const ZERO: Vector2 = Vector2(DVec2::ZERO);

        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn normalize(self) -> Option<Self> {
            let len = self.0.length();
            if len <= f64::EPSILON || !len.is_finite() {
                None
            } else {
                Some(Self(self.0 / len))
            }
        }

        #[inline]
        pub fn dot(self, other: Vector2) -> f64 {
            self.0.dot(other.0)
        }

        /// 二维叉积（z 分量）。
        #[inline]
        pub fn cross(self, other: Vector2) -> f64 {
            self.0.perp_dot(other.0)
        }

        #[inline]
        pub fn perp(self) -> Self {
            Self(self.0.perp())
        }

        #[inline]
        pub fn scale(self, factor: f64) -> Self {
            Self(self.0 * factor)
        }

        #[inline]
        pub fn negate(self) -> Self {
            Self(-self.0)
        }

        #[inline]
        pub fn angle(self) -> f64 {
            self.0.y.atan2(self.0.x)
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于空间索引与命中测试的粗筛。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        /// 由任意两个角点构造，自动整理 min/max。
        pub fn from_corners(a: Point2, b: Point2) -> Self {
            Self {
                min: Point2::from_vec(a.as_vec2().min(b.as_vec2())),
                max: Point2::from_vec(a.as_vec2().max(b.as_vec2())),
            }
        }

        pub fn around(center: Point2, radius: f64) -> Self {
            Self {
                min: Point2::new(center.x() - radius, center.y() - radius),
                max: Point2::new(center.x() + radius, center.y() + radius),
            }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            self.min.midpoint(self.max)
        }

        #[inline]
        pub fn width(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.max.x() - self.min.x()
            }
        }

        #[inline]
        pub fn height(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.max.y() - self.min.y()
            }
        }

        #[inline]
        pub fn area(&self) -> f64 {
            self.width() * self.height()
        }

        pub fn contains(&self, point: Point2) -> bool {
            !self.is_empty()
                && point.x() >= self.min.x()
                && point.x() <= self.max.x()
                && point.y() >= self.min.y()
                && point.y() <= self.max.y()
        }

        pub fn intersects(&self, other: &Bounds2D) -> bool {
            !self.is_empty()
                && !other.is_empty()
                && self.min.x() <= other.max.x()
                && self.max.x() >= other.min.x()
                && self.min.y() <= other.max.y()
                && self.max.y() >= other.min.y()
        }

        /// 向四周扩张 `margin`，空框保持为空。
        pub fn expanded(&self, margin: f64) -> Self {
            if self.is_empty() {
                return *self;
            }
            Self {
                min: Point2::new(self.min.x() - margin, self.min.y() - margin),
                max: Point2::new(self.max.x() + margin, self.max.y() + margin),
            }
        }

        pub fn translated(&self, delta: Vector2) -> Self {
            if self.is_empty() {
                return *self;
            }
            Self {
                min: self.min.translate(delta),
                max: self.max.translate(delta),
            }
        }
    }

    /// 绝对角度归一化到 `[0, 2π)`。
    pub fn normalize_angle(angle: f64) -> f64 {
        let mut result = angle % TAU;
        if result < 0.0 {
            result += TAU;
        }
        if result >= TAU { 0.0 } else { result }
    }

    /// 角度差归一化到 `(-π, π]`。
    pub fn normalize_angle_delta(delta: f64) -> f64 {
        let mut result = normalize_angle(delta);
        if result > PI {
            result -= TAU;
        }
        result
    }

    #[inline]
    pub fn point_on_circle(center: Point2, radius: f64, angle: f64) -> Point2 {
        center.translate(Vector2::new(radius * angle.cos(), radius * angle.sin()))
    }

    /// 点到线段的投影参数 `t ∈ [0, 1]` 及投影点。退化线段返回起点。
    pub fn project_onto_segment(point: Point2, start: Point2, end: Point2) -> (f64, Point2) {
        let seg = start.vector_to(end);
        let len_sq = seg.length_squared();
        if len_sq <= f64::EPSILON {
            return (0.0, start);
        }
        let t = (start.vector_to(point).dot(seg) / len_sq).clamp(0.0, 1.0);
        (t, start.translate(seg.scale(t)))
    }

    #[inline]
    pub fn distance_to_segment(point: Point2, start: Point2, end: Point2) -> f64 {
        let (_, projected) = project_onto_segment(point, start, end);
        point.distance(projected)
    }

    /// 点到无限直线（过 `origin`、方向 `direction`）的垂足。方向为零时返回 `None`。
    pub fn foot_on_line(point: Point2, origin: Point2, direction: Vector2) -> Option<Point2> {
        let dir = direction.normalize()?;
        let t = origin.vector_to(point).dot(dir);
        Some(origin.translate(dir.scale(t)))
    }

    /// 射线式壳体判定：`vertices` 视为闭合多边形。
    pub fn point_in_polygon(point: Point2, vertices: &[Point2]) -> bool {
        if vertices.len() < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = vertices.len() - 1;
        for i in 0..vertices.len() {
            let a = vertices[i];
            let b = vertices[j];
            if (a.y() > point.y()) != (b.y() > point.y()) {
                let x_cross = (b.x() - a.x()) * (point.y() - a.y()) / (b.y() - a.y()) + a.x();
                if point.x() < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// 鞋带公式求多边形面积（取绝对值）。
    pub fn polygon_area(vertices: &[Point2]) -> f64 {
        if vertices.len() < 3 {
            return 0.0;
        }
        let mut sum = 0.0;
        for (i, a) in vertices.iter().enumerate() {
            let b = vertices[(i + 1) % vertices.len()];
            sum += a.x() * b.y() - b.x() * a.y();
        }
        (sum * 0.5).abs()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::f64::consts::FRAC_PI_2;

        #[test]
        fn angle_normalization_uses_canonical_ranges() {
            assert!((normalize_angle(-FRAC_PI_2) - 3.0 * FRAC_PI_2).abs() < 1e-12);
            assert!(normalize_angle(TAU).abs() < 1e-12);
            assert!((normalize_angle_delta(3.0 * FRAC_PI_2) + FRAC_PI_2).abs() < 1e-12);
            assert!((normalize_angle_delta(PI) - PI).abs() < 1e-12);
            assert!((normalize_angle_delta(-PI) - PI).abs() < 1e-12);
        }

        #[test]
        fn segment_projection_clamps_to_endpoints() {
            let start = Point2::new(0.0, 0.0);
            let end = Point2::new(10.0, 0.0);
            let (t, p) = project_onto_segment(Point2::new(12.0, 3.0), start, end);
            assert_eq!(t, 1.0);
            assert_eq!(p, end);
            assert!((distance_to_segment(Point2::new(5.0, 2.0), start, end) - 2.0).abs() < 1e-12);
        }

        #[test]
        fn polygon_helpers() {
            let square = [
                Point2::new(0.0, 0.0),
                Point2::new(4.0, 0.0),
                Point2::new(4.0, 4.0),
                Point2::new(0.0, 4.0),
            ];
            assert!(point_in_polygon(Point2::new(2.0, 2.0), &square));
            assert!(!point_in_polygon(Point2::new(5.0, 2.0), &square));
            assert!((polygon_area(&square) - 16.0).abs() < 1e-12);
        }

        #[test]
        fn bounds_area_and_intersection() {
            let mut bounds = Bounds2D::empty();
            assert!(bounds.is_empty());
            assert_eq!(bounds.area(), 0.0);
            bounds.include_point(Point2::new(1.0, 1.0));
            bounds.include_point(Point2::new(3.0, 5.0));
            assert!((bounds.area() - 8.0).abs() < 1e-12);
            let other = Bounds2D::around(Point2::new(3.5, 5.5), 1.0);
            assert!(bounds.intersects(&other));
            assert!(!bounds.intersects(&Bounds2D::around(Point2::new(10.0, 10.0), 1.0)));
        }
    }
}
