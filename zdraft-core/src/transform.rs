//! 世界坐标与屏幕坐标之间的双向映射。
//!
//! 绘图变体遵循 CAD 约定（世界 Y 轴向上，屏幕 Y 轴向下），会翻转 Y；
//! 简单变体不翻转，供覆盖层与可见性计算使用。所有函数都是输入的纯函数。

use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds2D, Point2};

/// 屏幕坐标（像素），原点在画布左上角。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(self, other: ScreenPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// 视口快照。任何平移/缩放都会产生新值，不会原地修改。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    scale: f64,
    offset_x: f64,
    offset_y: f64,
    canvas_width: f64,
    canvas_height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            canvas_width: 800.0,
            canvas_height: 600.0,
        }
    }
}

impl Viewport {
    /// 构造视口；`scale` 必须为正且所有分量有限，否则返回 `None`。
    pub fn new(
        scale: f64,
        offset_x: f64,
        offset_y: f64,
        canvas_width: f64,
        canvas_height: f64,
    ) -> Option<Self> {
        let finite = [scale, offset_x, offset_y, canvas_width, canvas_height]
            .iter()
            .all(|value| value.is_finite());
        if !finite || scale <= 0.0 || canvas_width < 0.0 || canvas_height < 0.0 {
            return None;
        }
        Some(Self {
            scale,
            offset_x,
            offset_y,
            canvas_width,
            canvas_height,
        })
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    #[inline]
    pub fn offset_x(&self) -> f64 {
        self.offset_x
    }

    #[inline]
    pub fn offset_y(&self) -> f64 {
        self.offset_y
    }

    #[inline]
    pub fn canvas_width(&self) -> f64 {
        self.canvas_width
    }

    #[inline]
    pub fn canvas_height(&self) -> f64 {
        self.canvas_height
    }

    #[inline]
    pub fn world_to_screen(&self, point: Point2) -> ScreenPoint {
        world_to_screen(point, self)
    }

    #[inline]
    pub fn screen_to_world(&self, point: ScreenPoint) -> Point2 {
        screen_to_world(point, self)
    }

    /// 像素距离换算为世界距离。每次查询都应重新计算，不可缓存。
    #[inline]
    pub fn screen_distance_to_world(&self, pixels: f64) -> f64 {
        pixels / self.scale
    }

    #[inline]
    pub fn world_distance_to_screen(&self, distance: f64) -> f64 {
        distance * self.scale
    }

    /// 替换缩放比例，非法值时保持原视口。
    pub fn with_scale(&self, scale: f64) -> Self {
        Self::new(
            scale,
            self.offset_x,
            self.offset_y,
            self.canvas_width,
            self.canvas_height,
        )
        .unwrap_or(*self)
    }

    /// 画布尺寸变化，保持偏移不变。
    pub fn resized(&self, canvas_width: f64, canvas_height: f64) -> Self {
        Self::new(
            self.scale,
            self.offset_x,
            self.offset_y,
            canvas_width,
            canvas_height,
        )
        .unwrap_or(*self)
    }

    /// 按屏幕像素平移（正 `dy` 表示内容向下移动）。
    pub fn panned_by(&self, dx: f64, dy: f64) -> Self {
        Self::new(
            self.scale,
            self.offset_x + dx,
            self.offset_y - dy,
            self.canvas_width,
            self.canvas_height,
        )
        .unwrap_or(*self)
    }

    /// 以屏幕锚点为中心缩放，锚点下的世界坐标保持不动。
    pub fn zoomed_at(&self, anchor: ScreenPoint, factor: f64, min_scale: f64, max_scale: f64) -> Self {
        if !factor.is_finite() || factor <= 0.0 {
            return *self;
        }
        let anchor_world = self.screen_to_world(anchor);
        let scale = (self.scale * factor).clamp(min_scale, max_scale);
        let offset_x = anchor.x - anchor_world.x() * scale;
        let offset_y = self.canvas_height - anchor.y - anchor_world.y() * scale;
        Self::new(
            scale,
            offset_x,
            offset_y,
            self.canvas_width,
            self.canvas_height,
        )
        .unwrap_or(*self)
    }

    /// 缩放并居中以完整显示 `bounds`，四周留出 `margin_px` 像素。
    pub fn fit_to_bounds(&self, bounds: &Bounds2D, margin_px: f64, min_scale: f64, max_scale: f64) -> Self {
        if bounds.is_empty() {
            return *self;
        }
        let available_w = (self.canvas_width - 2.0 * margin_px).max(1.0);
        let available_h = (self.canvas_height - 2.0 * margin_px).max(1.0);
        let mut scale = self.scale;
        let (bw, bh) = (bounds.width(), bounds.height());
        if bw > f64::EPSILON || bh > f64::EPSILON {
            let sx = if bw > f64::EPSILON { available_w / bw } else { f64::INFINITY };
            let sy = if bh > f64::EPSILON { available_h / bh } else { f64::INFINITY };
            scale = sx.min(sy);
        }
        let scale = scale.clamp(min_scale, max_scale);
        let center = bounds.center();
        let offset_x = self.canvas_width * 0.5 - center.x() * scale;
        let offset_y = self.canvas_height * 0.5 - center.y() * scale;
        Self::new(
            scale,
            offset_x,
            offset_y,
            self.canvas_width,
            self.canvas_height,
        )
        .unwrap_or(*self)
    }

    /// 当前画布可见的世界范围。
    pub fn visible_world_bounds(&self) -> Bounds2D {
        let screen = Bounds2D::new(
            Point2::new(0.0, 0.0),
            Point2::new(self.canvas_width, self.canvas_height),
        );
        screen_bounds_to_world(&screen, self)
    }
}

/// 绘图变体：世界 → 屏幕（翻转 Y）。
#[inline]
pub fn world_to_screen(point: Point2, viewport: &Viewport) -> ScreenPoint {
    ScreenPoint {
        x: point.x() * viewport.scale + viewport.offset_x,
        y: viewport.canvas_height - (point.y() * viewport.scale + viewport.offset_y),
    }
}

/// 绘图变体：屏幕 → 世界（翻转 Y）。
#[inline]
pub fn screen_to_world(point: ScreenPoint, viewport: &Viewport) -> Point2 {
    Point2::new(
        (point.x - viewport.offset_x) / viewport.scale,
        (viewport.canvas_height - point.y - viewport.offset_y) / viewport.scale,
    )
}

/// 简单变体：不翻转 Y。
#[inline]
pub fn world_to_screen_simple(point: Point2, viewport: &Viewport) -> ScreenPoint {
    ScreenPoint {
        x: point.x() * viewport.scale + viewport.offset_x,
        y: point.y() * viewport.scale + viewport.offset_y,
    }
}

#[inline]
pub fn screen_to_world_simple(point: ScreenPoint, viewport: &Viewport) -> Point2 {
    Point2::new(
        (point.x - viewport.offset_x) / viewport.scale,
        (point.y - viewport.offset_y) / viewport.scale,
    )
}

/// 世界包围盒映射到屏幕（绘图变体）。结果以 `Bounds2D` 表示屏幕像素范围。
pub fn world_bounds_to_screen(bounds: &Bounds2D, viewport: &Viewport) -> Bounds2D {
    map_bounds(bounds, |p| {
        let s = world_to_screen(p, viewport);
        Point2::new(s.x, s.y)
    })
}

pub fn screen_bounds_to_world(bounds: &Bounds2D, viewport: &Viewport) -> Bounds2D {
    map_bounds(bounds, |p| screen_to_world(ScreenPoint::new(p.x(), p.y()), viewport))
}

pub fn world_bounds_to_screen_simple(bounds: &Bounds2D, viewport: &Viewport) -> Bounds2D {
    map_bounds(bounds, |p| {
        let s = world_to_screen_simple(p, viewport);
        Point2::new(s.x, s.y)
    })
}

pub fn screen_bounds_to_world_simple(bounds: &Bounds2D, viewport: &Viewport) -> Bounds2D {
    map_bounds(bounds, |p| {
        screen_to_world_simple(ScreenPoint::new(p.x(), p.y()), viewport)
    })
}

fn map_bounds(bounds: &Bounds2D, map: impl Fn(Point2) -> Point2) -> Bounds2D {
    if bounds.is_empty() {
        return *bounds;
    }
    Bounds2D::from_corners(map(bounds.min()), map(bounds.max()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewports() -> Vec<Viewport> {
        vec![
            Viewport::default(),
            Viewport::new(10.0, -250.0, 120.5, 1024.0, 768.0).unwrap(),
            Viewport::new(0.01, 3.0, -7.0, 640.0, 480.0).unwrap(),
            Viewport::new(437.25, 1.0e4, -2.5e3, 1920.0, 1080.0).unwrap(),
        ]
    }

    #[test]
    fn drawing_round_trip_is_exact_within_epsilon() {
        let points = [
            Point2::new(0.0, 0.0),
            Point2::new(10.1, 0.05),
            Point2::new(-1234.5, 987.25),
            Point2::new(3.0e3, -4.0e3),
        ];
        for viewport in viewports() {
            for point in points {
                let back = screen_to_world(world_to_screen(point, &viewport), &viewport);
                assert!((back.x() - point.x()).abs() < 1e-9, "{viewport:?} {point:?}");
                assert!((back.y() - point.y()).abs() < 1e-9, "{viewport:?} {point:?}");
                let simple = screen_to_world_simple(world_to_screen_simple(point, &viewport), &viewport);
                assert!((simple.x() - point.x()).abs() < 1e-9);
                assert!((simple.y() - point.y()).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn drawing_variant_flips_y_and_simple_does_not() {
        let viewport = Viewport::new(2.0, 10.0, 20.0, 800.0, 600.0).unwrap();
        let up = Point2::new(0.0, 10.0);
        let drawing = world_to_screen(up, &viewport);
        let simple = world_to_screen_simple(up, &viewport);
        assert_eq!(drawing.x, 10.0);
        assert_eq!(drawing.y, 600.0 - 40.0);
        assert_eq!(simple.y, 40.0);
    }

    #[test]
    fn invalid_scale_is_rejected() {
        assert!(Viewport::new(0.0, 0.0, 0.0, 100.0, 100.0).is_none());
        assert!(Viewport::new(-1.0, 0.0, 0.0, 100.0, 100.0).is_none());
        assert!(Viewport::new(f64::NAN, 0.0, 0.0, 100.0, 100.0).is_none());
        let viewport = Viewport::default();
        assert_eq!(viewport.with_scale(0.0), viewport);
    }

    #[test]
    fn zoom_at_keeps_anchor_fixed() {
        let viewport = Viewport::new(1.5, 40.0, -30.0, 800.0, 600.0).unwrap();
        let anchor = ScreenPoint::new(312.0, 144.0);
        let before = viewport.screen_to_world(anchor);
        let zoomed = viewport.zoomed_at(anchor, 2.0, 0.01, 1000.0);
        assert!((zoomed.scale() - 3.0).abs() < 1e-12);
        let after = zoomed.screen_to_world(anchor);
        assert!((before.x() - after.x()).abs() < 1e-9);
        assert!((before.y() - after.y()).abs() < 1e-9);

        let clamped = viewport.zoomed_at(anchor, 1.0e6, 0.01, 1000.0);
        assert!((clamped.scale() - 1000.0).abs() < 1e-12);
    }

    #[test]
    fn fit_to_bounds_centers_content() {
        let viewport = Viewport::default();
        let bounds = Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(100.0, 50.0));
        let fitted = viewport.fit_to_bounds(&bounds, 20.0, 0.01, 1000.0);
        assert!((fitted.scale() - 7.6).abs() < 1e-9);
        let center = fitted.world_to_screen(bounds.center());
        assert!((center.x - 400.0).abs() < 1e-9);
        assert!((center.y - 300.0).abs() < 1e-9);
    }

    #[test]
    fn panning_moves_content_with_pointer() {
        let viewport = Viewport::default();
        let world = Point2::new(5.0, 5.0);
        let before = viewport.world_to_screen(world);
        let panned = viewport.panned_by(12.0, -8.0);
        let after = panned.world_to_screen(world);
        assert!((after.x - before.x - 12.0).abs() < 1e-12);
        assert!((after.y - before.y + 8.0).abs() < 1e-12);
    }

    #[test]
    fn bounds_transforms_are_inverse() {
        let viewport = Viewport::new(4.0, 12.0, 8.0, 800.0, 600.0).unwrap();
        let world = Bounds2D::new(Point2::new(-2.0, 1.0), Point2::new(6.0, 9.0));
        let screen = world_bounds_to_screen(&world, &viewport);
        assert!((screen.width() - 32.0).abs() < 1e-9);
        let back = screen_bounds_to_world(&screen, &viewport);
        assert!((back.min().x() + 2.0).abs() < 1e-9);
        assert!((back.max().y() - 9.0).abs() < 1e-9);
        let simple = screen_bounds_to_world_simple(&world_bounds_to_screen_simple(&world, &viewport), &viewport);
        assert!((simple.min().y() - 1.0).abs() < 1e-9);
    }
}
