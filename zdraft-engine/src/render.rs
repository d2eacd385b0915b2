use std::collections::HashSet;

use tracing::warn;
use zdraft_config::{LabelConfig, StyleConfig};
use zdraft_core::document::{DashClass, Entity, EntityId, Geometry, Layer, LineWeightClass, Style};
use zdraft_core::geometry::{
    Bounds2D, Point2, Vector2, point_in_polygon, point_on_circle,
};
use zdraft_core::transform::{ScreenPoint, Viewport};

use crate::grips::GripRole;
use crate::labels::{angle_arc_radius, internal_arc, label_line_offsets, measurement_label};

/// 描边参数（屏幕像素）。
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub color: u32,
    pub width_px: f64,
    pub dash: Vec<f64>,
    pub opacity: f64,
}

impl Stroke {
    pub fn solid(color: u32, width_px: f64) -> Self {
        Self {
            color,
            width_px,
            dash: Vec::new(),
            opacity: 1.0,
        }
    }
}

/// 渲染目标。实体渲染器只依赖这组绘制原语。
pub trait RenderContext {
    fn set_stroke(&mut self, stroke: &Stroke);
    fn polyline(&mut self, points: &[ScreenPoint], closed: bool);
    fn fill_polygon(&mut self, points: &[ScreenPoint], color: u32, opacity: f64);
    fn marker(&mut self, center: ScreenPoint, radius_px: f64, color: u32, filled: bool);
    fn text(&mut self, anchor: ScreenPoint, content: &str, size_px: f64, rotation: f64);
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Stroke(Stroke),
    Polyline {
        points: Vec<ScreenPoint>,
        closed: bool,
    },
    Fill {
        points: Vec<ScreenPoint>,
        color: u32,
        opacity: f64,
    },
    Marker {
        center: ScreenPoint,
        radius_px: f64,
        color: u32,
        filled: bool,
    },
    Text {
        anchor: ScreenPoint,
        content: String,
        size_px: f64,
        rotation: f64,
    },
}

/// 记录绘制指令的显示列表，合成器的每个绘制面各持有一份。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayList {
    ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn extend_from(&mut self, other: &DisplayList) {
        self.ops.extend(other.ops.iter().cloned());
    }

    pub fn polyline_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Polyline { .. }))
            .count()
    }

    pub fn texts(&self) -> impl Iterator<Item = (&ScreenPoint, &str)> + '_ {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { anchor, content, .. } => Some((anchor, content.as_str())),
            _ => None,
        })
    }
}

impl RenderContext for DisplayList {
    fn set_stroke(&mut self, stroke: &Stroke) {
        self.ops.push(DrawOp::Stroke(stroke.clone()));
    }

    fn polyline(&mut self, points: &[ScreenPoint], closed: bool) {
        if points.len() < 2 {
            return;
        }
        self.ops.push(DrawOp::Polyline {
            points: points.to_vec(),
            closed,
        });
    }

    fn fill_polygon(&mut self, points: &[ScreenPoint], color: u32, opacity: f64) {
        if points.len() < 3 {
            return;
        }
        self.ops.push(DrawOp::Fill {
            points: points.to_vec(),
            color,
            opacity,
        });
    }

    fn marker(&mut self, center: ScreenPoint, radius_px: f64, color: u32, filled: bool) {
        self.ops.push(DrawOp::Marker {
            center,
            radius_px,
            color,
            filled,
        });
    }

    fn text(&mut self, anchor: ScreenPoint, content: &str, size_px: f64, rotation: f64) {
        self.ops.push(DrawOp::Text {
            anchor,
            content: content.to_string(),
            size_px,
            rotation,
        });
    }
}

/// 由配置注入的样式表：线宽等级、虚线等级到像素值的映射。
#[derive(Debug, Clone)]
pub struct StyleTable {
    config: StyleConfig,
}

impl StyleTable {
    pub fn new(config: &StyleConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn line_width(&self, weight: LineWeightClass) -> f64 {
        let widths = &self.config.line_width_px;
        match weight {
            LineWeightClass::Thin => widths.thin,
            LineWeightClass::Normal => widths.normal,
            LineWeightClass::Thick => widths.thick,
            LineWeightClass::ExtraThick => widths.extra_thick,
        }
    }

    pub fn dash_pattern(&self, dash: DashClass) -> Vec<f64> {
        let patterns = &self.config.dash_patterns;
        match dash {
            DashClass::Solid => Vec::new(),
            DashClass::Dashed => patterns.dashed.clone(),
            DashClass::Dotted => patterns.dotted.clone(),
            DashClass::DashDot => patterns.dash_dot.clone(),
            DashClass::Center => patterns.center.clone(),
        }
    }

    /// 样式颜色为空时随层。
    pub fn stroke_for(&self, style: &Style, layer: &Layer) -> Stroke {
        Stroke {
            color: style.color.unwrap_or(layer.color),
            width_px: self.line_width(style.weight),
            dash: self.dash_pattern(style.dash),
            opacity: style.opacity.clamp(0.0, 1.0),
        }
    }

    #[inline]
    pub fn config(&self) -> &StyleConfig {
        &self.config
    }
}

/// 无效几何只报告一次，避免每帧刷屏。
#[derive(Debug, Default)]
pub struct MalformedLog {
    reported: HashSet<EntityId>,
}

impl MalformedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回是否为首次报告。
    pub fn report(&mut self, entity: &Entity) -> bool {
        let first = self.reported.insert(entity.id);
        if first {
            warn!(
                entity = entity.id.get(),
                kind = entity.geometry.kind_name(),
                "实体几何无效，跳过渲染与命中测试"
            );
        }
        first
    }

    #[inline]
    pub fn reported_count(&self) -> usize {
        self.reported.len()
    }

    pub fn forget(&mut self, id: EntityId) {
        self.reported.remove(&id);
    }
}

/// 结构校验，永不 panic。无效几何返回 `None`。
pub fn validate(entity: &Entity) -> Option<&Geometry> {
    if entity.geometry.is_well_formed() {
        Some(&entity.geometry)
    } else {
        None
    }
}

/// 校验并在首次失败时记录日志。
pub fn validate_logged<'a>(entity: &'a Entity, log: &mut MalformedLog) -> Option<&'a Geometry> {
    let geometry = validate(entity);
    if geometry.is_none() {
        log.report(entity);
    }
    geometry
}

/// 有效实体的包围盒。无效或无界实体返回 `None`。
pub fn bounding_box(entity: &Entity) -> Option<Bounds2D> {
    validate(entity)?.bounds()
}

/// 绘制单个实体。返回 `false` 表示几何无效、未绘制任何内容。
///
/// 测量标签仅在 `labels.enabled` 时绘制；引线文字的字号始终取自 `labels`。
pub fn render_entity(
    ctx: &mut dyn RenderContext,
    entity: &Entity,
    layer: &Layer,
    viewport: &Viewport,
    styles: &StyleTable,
    labels: &LabelConfig,
    log: &mut MalformedLog,
) -> bool {
    let Some(geometry) = validate_logged(entity, log) else {
        return false;
    };
    let stroke = styles.stroke_for(&entity.style, layer);
    ctx.set_stroke(&stroke);
    draw_geometry(ctx, geometry, viewport, &stroke, labels.font_size_px);

    if labels.enabled {
        draw_labels(ctx, geometry, viewport, labels);
    }
    true
}

/// 仅绘制几何轮廓，供预览层复用。`font_size_px` 用于引线等屏幕字号固定的注释文字。
pub fn draw_geometry(
    ctx: &mut dyn RenderContext,
    geometry: &Geometry,
    viewport: &Viewport,
    stroke: &Stroke,
    font_size_px: f64,
) {
    let to_screen = |points: &[Point2]| -> Vec<ScreenPoint> {
        points.iter().map(|p| viewport.world_to_screen(*p)).collect()
    };
    match geometry {
        Geometry::Point(point) => {
            let center = viewport.world_to_screen(point.position);
            ctx.marker(center, stroke.width_px.max(1.0) * 2.0, stroke.color, true);
        }
        Geometry::Text(text) => {
            let anchor = viewport.world_to_screen(text.insert);
            // 绘图坐标翻转了 Y 轴，屏幕旋转方向相反。
            ctx.text(anchor, &text.content, text.height * viewport.scale(), -text.rotation);
        }
        Geometry::Hatch(hatch) => {
            let screen = to_screen(&hatch.boundary);
            if hatch.solid {
                ctx.fill_polygon(&screen, stroke.color, stroke.opacity);
            }
            ctx.polyline(&screen, true);
        }
        Geometry::AngleMeasurement(angle) => {
            ctx.polyline(&to_screen(&[angle.first, angle.vertex, angle.second][..]), false);
            if let Some(arc) = internal_arc(angle.vertex, angle.first, angle.second) {
                let radius = angle_arc_radius(angle.vertex, angle.first, angle.second);
                let points =
                    zdraft_core::document::sample_arc(angle.vertex, radius, arc.start_angle, arc.sweep);
                ctx.polyline(&to_screen(&points), false);
            }
        }
        Geometry::Leader(leader) => {
            ctx.polyline(&to_screen(&leader.vertices), false);
            if let (Some(text), Some(last)) = (&leader.text, leader.vertices.last()) {
                ctx.text(viewport.world_to_screen(*last), text, font_size_px, 0.0);
            }
        }
        Geometry::XLine(xline) => {
            if let Some((a, b)) = clip_infinite(xline.origin, xline.direction, viewport, true) {
                ctx.polyline(&[viewport.world_to_screen(a), viewport.world_to_screen(b)], false);
            }
        }
        Geometry::Ray(ray) => {
            if let Some((a, b)) = clip_infinite(ray.origin, ray.direction, viewport, false) {
                ctx.polyline(&[viewport.world_to_screen(a), viewport.world_to_screen(b)], false);
            }
        }
        Geometry::Block(block) => {
            for child in block.world_children() {
                draw_geometry(ctx, &child, viewport, stroke, font_size_px);
            }
        }
        _ => {
            let closed = matches!(geometry, Geometry::Rectangle(_))
                || matches!(geometry, Geometry::Polyline(p) if p.closed);
            for path in geometry.outline() {
                let mut screen = to_screen(&path);
                if closed && screen.len() > 2 {
                    screen.pop();
                    ctx.polyline(&screen, true);
                } else {
                    ctx.polyline(&screen, false);
                }
            }
        }
    }
}

fn draw_labels(ctx: &mut dyn RenderContext, geometry: &Geometry, viewport: &Viewport, labels: &LabelConfig) {
    let Some(label) = measurement_label(geometry, labels.decimals) else {
        return;
    };
    let anchor = viewport.world_to_screen(label.anchor);
    let offsets = label_line_offsets(label.lines.len(), labels.line_height_px);
    for (line, offset) in label.lines.iter().zip(offsets) {
        let position = ScreenPoint::new(anchor.x, anchor.y + offset);
        ctx.text(position, line, labels.font_size_px, 0.0);
    }
}

/// 把无限线裁剪到可见范围（外扩一个对角线长度）。
fn clip_infinite(
    origin: Point2,
    direction: Vector2,
    viewport: &Viewport,
    both_ways: bool,
) -> Option<(Point2, Point2)> {
    let dir = direction.normalize()?;
    let visible = viewport.visible_world_bounds();
    let diagonal = visible.width().hypot(visible.height());
    let reach = origin.distance(visible.center()) + diagonal;
    let far = origin.translate(dir.scale(reach));
    let near = if both_ways {
        origin.translate(dir.scale(-reach))
    } else {
        origin
    };
    Some((near, far))
}

/// 命中的部位：轮廓或封闭图形内部。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitPart {
    Edge,
    Interior,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitInfo {
    pub entity: EntityId,
    pub part: HitPart,
    /// 到轮廓的屏幕距离；内部命中时为 0。
    pub distance_px: f64,
}

/// 屏幕点命中测试。世界容差在每次调用时按当前比例重新换算。
pub fn hit_test(
    entity: &Entity,
    screen: ScreenPoint,
    viewport: &Viewport,
    tolerance_px: f64,
) -> Option<HitInfo> {
    let point = viewport.screen_to_world(screen);
    let tolerance = viewport.screen_distance_to_world(tolerance_px);
    let (part, distance) = hit_test_world(&entity.geometry, point, tolerance)?;
    Some(HitInfo {
        entity: entity.id,
        part,
        distance_px: viewport.world_distance_to_screen(distance),
    })
}

/// 世界坐标下的精确命中测试，返回命中部位与世界距离。
pub fn hit_test_world(geometry: &Geometry, point: Point2, tolerance: f64) -> Option<(HitPart, f64)> {
    if !geometry.is_well_formed() || !tolerance.is_finite() || !point.is_finite() {
        return None;
    }
    if let Some(bounds) = geometry.bounds() {
        if !bounds.expanded(tolerance).contains(point) {
            return None;
        }
    }
    let distance = geometry.distance_to(point);
    if distance <= tolerance {
        return Some((HitPart::Edge, distance));
    }
    let inside = match geometry {
        Geometry::Circle(circle) => circle.center.distance(point) < circle.radius,
        _ => geometry
            .filled_region()
            .is_some_and(|region| point_in_polygon(point, &region)),
    };
    inside.then_some((HitPart::Interior, 0.0))
}

/// 实体的操作夹点（未附加交互状态）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripSpec {
    pub role: GripRole,
    pub index: usize,
    pub position: Point2,
}

impl GripSpec {
    fn new(role: GripRole, index: usize, position: Point2) -> Self {
        Self {
            role,
            index,
            position,
        }
    }
}

pub fn grips(entity: &Entity) -> Vec<GripSpec> {
    match validate(entity) {
        Some(geometry) => geometry_grips(geometry),
        None => Vec::new(),
    }
}

fn geometry_grips(geometry: &Geometry) -> Vec<GripSpec> {
    use GripRole::{Center, Midpoint, Vertex};
    let vertices = |points: &[Point2]| -> Vec<GripSpec> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| GripSpec::new(Vertex, i, *p))
            .collect()
    };
    match geometry {
        Geometry::Line(line) => vec![
            GripSpec::new(Vertex, 0, line.start),
            GripSpec::new(Vertex, 1, line.end),
            GripSpec::new(Midpoint, 0, line.start.midpoint(line.end)),
        ],
        Geometry::Circle(circle) => {
            let mut grips = vec![GripSpec::new(Center, 0, circle.center)];
            for (i, angle) in [0.0, 0.5, 1.0, 1.5].iter().enumerate() {
                let position = point_on_circle(circle.center, circle.radius, angle * std::f64::consts::PI);
                grips.push(GripSpec::new(Vertex, i, position));
            }
            grips
        }
        Geometry::Arc(arc) => vec![
            GripSpec::new(Center, 0, arc.center),
            GripSpec::new(Vertex, 0, arc.start_point()),
            GripSpec::new(Vertex, 1, arc.end_point()),
            GripSpec::new(Midpoint, 0, arc.mid_point()),
        ],
        Geometry::Ellipse(ellipse) => vec![
            GripSpec::new(Center, 0, ellipse.center),
            GripSpec::new(Vertex, 0, ellipse.point_at(0.0)),
            GripSpec::new(Vertex, 1, ellipse.point_at(std::f64::consts::FRAC_PI_2)),
        ],
        Geometry::Rectangle(rect) => {
            let mut grips = vertices(&rect.corners()[..]);
            let center = Bounds2D::from_corners(rect.corner_a, rect.corner_b).center();
            grips.push(GripSpec::new(Center, 0, center));
            grips
        }
        Geometry::Polyline(polyline) => {
            let mut grips = vertices(&polyline.vertices);
            let segments = zdraft_core::document::path_segments(&polyline.vertices, polyline.closed);
            for (i, (a, b)) in segments.into_iter().enumerate() {
                grips.push(GripSpec::new(Midpoint, i, a.midpoint(b)));
            }
            grips
        }
        Geometry::Point(point) => vec![GripSpec::new(Center, 0, point.position)],
        Geometry::Text(text) => vec![GripSpec::new(Center, 0, text.insert)],
        Geometry::Spline(spline) => vertices(&spline.control_points),
        Geometry::Dimension(dim) => {
            let mut grips = vec![
                GripSpec::new(Vertex, 0, dim.start),
                GripSpec::new(Vertex, 1, dim.end),
            ];
            if let Some((a, b)) = dim.dimension_line() {
                grips.push(GripSpec::new(Midpoint, 0, a.midpoint(b)));
            }
            grips
        }
        Geometry::AngleMeasurement(angle) => vec![
            GripSpec::new(Center, 0, angle.vertex),
            GripSpec::new(Vertex, 0, angle.first),
            GripSpec::new(Vertex, 1, angle.second),
        ],
        Geometry::Leader(leader) => vertices(&leader.vertices),
        Geometry::Hatch(hatch) => {
            let mut grips = vertices(&hatch.boundary);
            if let Some(bounds) = geometry.bounds() {
                grips.push(GripSpec::new(Center, 0, bounds.center()));
            }
            grips
        }
        Geometry::Block(block) => vec![GripSpec::new(Center, 0, block.insert)],
        Geometry::XLine(xline) => direction_grips(xline.origin, xline.direction),
        Geometry::Ray(ray) => direction_grips(ray.origin, ray.direction),
    }
}

fn direction_grips(origin: Point2, direction: Vector2) -> Vec<GripSpec> {
    let mut grips = vec![GripSpec::new(GripRole::Center, 0, origin)];
    if let Some(dir) = direction.normalize() {
        grips.push(GripSpec::new(GripRole::Vertex, 0, origin.translate(dir)));
    }
    grips
}

/// 拖动中心夹点或直线中点夹点时整体平移，其余夹点改变形状。
pub fn grip_moves_entity(geometry: &Geometry, role: GripRole) -> bool {
    match role {
        GripRole::Center => true,
        GripRole::Midpoint => matches!(geometry, Geometry::Line(_)),
        GripRole::Vertex => false,
    }
}

/// 按夹点拖动结果重塑几何。结果无效时返回 `None`。
pub fn reshape(geometry: &Geometry, grip: &GripSpec, target: Point2) -> Option<Geometry> {
    let delta = grip.position.vector_to(target);
    if grip_moves_entity(geometry, grip.role) {
        return Some(geometry.translated(delta));
    }
    let set = |points: &[Point2], index: usize| -> Option<Vec<Point2>> {
        let mut points = points.to_vec();
        *points.get_mut(index)? = target;
        Some(points)
    };
    let mut result = geometry.clone();
    match (&mut result, grip.role) {
        (Geometry::Line(line), GripRole::Vertex) => match grip.index {
            0 => line.start = target,
            1 => line.end = target,
            _ => return None,
        },
        (Geometry::Circle(circle), GripRole::Vertex) => circle.radius = circle.center.distance(target),
        (Geometry::Arc(arc), GripRole::Vertex) => {
            let angle = arc.center.vector_to(target).angle();
            match grip.index {
                0 => arc.start_angle = angle,
                1 => arc.end_angle = angle,
                _ => return None,
            }
        }
        (Geometry::Arc(arc), GripRole::Midpoint) => arc.radius = arc.center.distance(target),
        (Geometry::Ellipse(ellipse), GripRole::Vertex) => match grip.index {
            0 => ellipse.major_axis = ellipse.center.vector_to(target),
            1 => {
                let major = ellipse.major_axis.length();
                if major <= f64::EPSILON {
                    return None;
                }
                ellipse.ratio = (ellipse.center.distance(target) / major).min(1.0);
            }
            _ => return None,
        },
        (Geometry::Rectangle(rect), GripRole::Vertex) => {
            let corners = rect.corners();
            let opposite = *corners.get((grip.index + 2) % 4)?;
            rect.corner_a = opposite;
            rect.corner_b = target;
        }
        (Geometry::Polyline(polyline), GripRole::Vertex) => {
            polyline.vertices = set(&polyline.vertices, grip.index)?;
        }
        (Geometry::Polyline(polyline), GripRole::Midpoint) => {
            let n = polyline.vertices.len();
            if grip.index >= n {
                return None;
            }
            let next = (grip.index + 1) % n;
            if !polyline.closed && next == 0 {
                return None;
            }
            for i in [grip.index, next] {
                polyline.vertices[i] = polyline.vertices[i].translate(delta);
            }
        }
        (Geometry::Spline(spline), GripRole::Vertex) => {
            spline.control_points = set(&spline.control_points, grip.index)?;
        }
        (Geometry::Dimension(dim), GripRole::Vertex) => match grip.index {
            0 => dim.start = target,
            1 => dim.end = target,
            _ => return None,
        },
        (Geometry::Dimension(dim), GripRole::Midpoint) => {
            let normal = dim.start.vector_to(dim.end).normalize()?.perp();
            dim.offset = dim.start.vector_to(target).dot(normal);
        }
        (Geometry::AngleMeasurement(angle), GripRole::Vertex) => match grip.index {
            0 => angle.first = target,
            1 => angle.second = target,
            _ => return None,
        },
        (Geometry::Leader(leader), GripRole::Vertex) => {
            leader.vertices = set(&leader.vertices, grip.index)?;
        }
        (Geometry::Hatch(hatch), GripRole::Vertex) => {
            hatch.boundary = set(&hatch.boundary, grip.index)?;
        }
        (Geometry::XLine(xline), GripRole::Vertex) => xline.direction = xline.origin.vector_to(target),
        (Geometry::Ray(ray), GripRole::Vertex) => ray.direction = ray.origin.vector_to(target),
        _ => return None,
    }
    result.is_well_formed().then_some(result)
}

#[cfg(test)]
mod tests {
    use zdraft_config::AppConfig;
    use zdraft_core::document::{Arc, Circle, Leader, Line, Polyline, Rectangle, Winding, XLine};

    use super::*;

    fn entity(id: u64, geometry: Geometry) -> Entity {
        Entity::new(EntityId::new(id), "0", geometry)
    }

    fn horizontal_line() -> Entity {
        entity(
            1,
            Geometry::Line(Line {
                start: Point2::new(0.0, 0.0),
                end: Point2::new(10.0, 0.0),
            }),
        )
    }

    #[test]
    fn malformed_entity_renders_nothing_and_logs_once() {
        let config = AppConfig::default();
        let styles = StyleTable::new(&config.style);
        let viewport = Viewport::default();
        let mut log = MalformedLog::new();
        let mut list = DisplayList::new();
        let bad = entity(
            9,
            Geometry::Circle(Circle {
                center: Point2::new(f64::INFINITY, 0.0),
                radius: 1.0,
            }),
        );
        let layer = Layer::new("0");
        for _ in 0..3 {
            assert!(!render_entity(
                &mut list,
                &bad,
                &layer,
                &viewport,
                &styles,
                &config.labels,
                &mut log
            ));
        }
        assert!(list.is_empty());
        assert_eq!(log.reported_count(), 1);
        assert!(hit_test(&bad, ScreenPoint::new(0.0, 0.0), &viewport, 100.0).is_none());
        assert!(grips(&bad).is_empty());
        assert!(bounding_box(&bad).is_none());
    }

    #[test]
    fn line_renders_through_drawing_transform() {
        let config = AppConfig::default();
        let styles = StyleTable::new(&config.style);
        let viewport = Viewport::new(2.0, 10.0, 20.0, 800.0, 600.0).expect("viewport");
        let mut list = DisplayList::new();
        let mut log = MalformedLog::new();
        let layer = Layer::new("0").with_color(0x00FF00);
        assert!(render_entity(
            &mut list,
            &horizontal_line(),
            &layer,
            &viewport,
            &styles,
            &LabelConfig {
                enabled: false,
                ..LabelConfig::default()
            },
            &mut log
        ));
        let polyline = list
            .ops()
            .iter()
            .find_map(|op| match op {
                DrawOp::Polyline { points, .. } => Some(points.clone()),
                _ => None,
            })
            .expect("line polyline");
        assert_eq!(polyline[0], ScreenPoint::new(10.0, 580.0));
        assert_eq!(polyline[1], ScreenPoint::new(30.0, 580.0));
        assert!(matches!(&list.ops()[0], DrawOp::Stroke(stroke) if stroke.color == 0x00FF00));
    }

    #[test]
    fn labels_stack_symmetrically_around_anchor() {
        let config = AppConfig::default();
        let styles = StyleTable::new(&config.style);
        let viewport = Viewport::default();
        let mut list = DisplayList::new();
        let mut log = MalformedLog::new();
        let rect = entity(
            2,
            Geometry::Rectangle(Rectangle {
                corner_a: Point2::new(0.0, 0.0),
                corner_b: Point2::new(40.0, 20.0),
            }),
        );
        render_entity(
            &mut list,
            &rect,
            &Layer::new("0"),
            &viewport,
            &styles,
            &config.labels,
            &mut log,
        );
        let anchor = viewport.world_to_screen(Point2::new(20.0, 10.0));
        let ys: Vec<f64> = list.texts().map(|(p, _)| p.y - anchor.y).collect();
        let h = config.labels.line_height_px;
        assert_eq!(ys, vec![-1.5 * h, -0.5 * h, 0.5 * h, 1.5 * h]);
    }

    #[test]
    fn leader_text_uses_configured_font_size() {
        let mut config = AppConfig::default();
        config.labels.font_size_px = 20.0;
        let styles = StyleTable::new(&config.style);
        let mut list = DisplayList::new();
        let mut log = MalformedLog::new();
        let leader = entity(
            4,
            Geometry::Leader(Leader {
                vertices: vec![Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)],
                text: Some("NOTE".to_string()),
            }),
        );
        assert!(render_entity(
            &mut list,
            &leader,
            &Layer::new("0"),
            &Viewport::default(),
            &styles,
            &config.labels,
            &mut log,
        ));
        let sizes: Vec<f64> = list
            .ops()
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { content, size_px, .. } if content == "NOTE" => Some(*size_px),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![20.0]);
    }

    #[test]
    fn hit_tolerance_is_scale_invariant() {
        let line = horizontal_line();
        for scale in [1.0, 10.0] {
            let viewport = Viewport::new(scale, 50.0, 50.0, 800.0, 600.0).expect("viewport");
            let on_line = viewport.world_to_screen(Point2::new(5.0, 0.0));
            let probe = ScreenPoint::new(on_line.x, on_line.y + 2.0);
            let hit = hit_test(&line, probe, &viewport, 3.0).expect("hit within aperture");
            assert!((hit.distance_px - 2.0).abs() < 1e-9);
            let far = ScreenPoint::new(on_line.x, on_line.y + 4.0);
            assert!(hit_test(&line, far, &viewport, 3.0).is_none());
        }
    }

    #[test]
    fn closed_shapes_hit_on_interior() {
        let circle = entity(
            3,
            Geometry::Circle(Circle {
                center: Point2::new(0.0, 0.0),
                radius: 10.0,
            }),
        );
        let (part, _) = hit_test_world(&circle.geometry, Point2::new(1.0, 1.0), 0.5).expect("hit");
        assert_eq!(part, HitPart::Interior);
        let open = Geometry::Polyline(Polyline {
            vertices: vec![
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                Point2::new(10.0, 10.0),
            ],
            closed: false,
        });
        assert!(hit_test_world(&open, Point2::new(7.0, 3.0), 0.5).is_none());
    }

    #[test]
    fn unbounded_lines_hit_far_from_origin() {
        let xline = Geometry::XLine(XLine {
            origin: Point2::new(0.0, 0.0),
            direction: Vector2::new(1.0, 1.0),
        });
        assert!(hit_test_world(&xline, Point2::new(-500.0, -500.2), 0.5).is_some());
    }

    #[test]
    fn arc_hit_respects_sweep() {
        let arc = Geometry::Arc(Arc {
            center: Point2::new(0.0, 0.0),
            radius: 5.0,
            start_angle: 0.0,
            end_angle: std::f64::consts::FRAC_PI_2,
            winding: Winding::CounterClockwise,
        });
        assert!(hit_test_world(&arc, Point2::new(0.0, 5.1), 0.2).is_some());
        assert!(hit_test_world(&arc, Point2::new(0.0, -5.0), 0.2).is_none());
    }

    #[test]
    fn rectangle_corner_drag_keeps_opposite_corner() {
        let rect = Geometry::Rectangle(Rectangle {
            corner_a: Point2::new(0.0, 0.0),
            corner_b: Point2::new(4.0, 2.0),
        });
        let grip = GripSpec::new(GripRole::Vertex, 2, Point2::new(4.0, 2.0));
        let reshaped = reshape(&rect, &grip, Point2::new(6.0, 3.0)).expect("reshape");
        assert_eq!(reshaped.bounds(), Some(Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(6.0, 3.0))));
    }

    #[test]
    fn line_midpoint_grip_moves_entity() {
        let line = horizontal_line();
        let mid = grips(&line)
            .into_iter()
            .find(|g| g.role == GripRole::Midpoint)
            .expect("midpoint grip");
        assert!(grip_moves_entity(&line.geometry, mid.role));
        let moved = reshape(&line.geometry, &mid, Point2::new(5.0, 3.0)).expect("move");
        assert_eq!(moved, line.geometry.translated(Vector2::new(0.0, 3.0)));
    }

    #[test]
    fn zero_radius_reshape_is_rejected() {
        let circle = Geometry::Circle(Circle {
            center: Point2::new(1.0, 1.0),
            radius: 2.0,
        });
        let grip = GripSpec::new(GripRole::Vertex, 0, Point2::new(3.0, 1.0));
        assert!(reshape(&circle, &grip, Point2::new(1.0, 1.0)).is_none());
    }
}
