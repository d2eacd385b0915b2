use std::f64::consts::{FRAC_PI_2, PI, TAU};

use serde::{Deserialize, Serialize};

use crate::geometry::{
    Bounds2D, Point2, Vector2, distance_to_segment, foot_on_line, normalize_angle,
    point_on_circle, polygon_area,
};

/// 默认图层名，场景中始终存在。
pub const DEFAULT_LAYER: &str = "0";

/// 采样整圆时的基础段数，圆弧按角度比例折算。
const CIRCLE_SEGMENTS: usize = 64;
const SPLINE_SEGMENTS_PER_SPAN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 提供原始数值，便于序列化或日志输出。
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    /// 0xRRGGBB
    pub color: u32,
}

impl Layer {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            locked: false,
            color: 0xFFFFFF,
        }
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }
}

/// 线宽等级，具体像素宽度由样式表决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineWeightClass {
    Thin,
    #[default]
    Normal,
    Thick,
    ExtraThick,
}

/// 虚线等级，具体图案由样式表决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashClass {
    #[default]
    Solid,
    Dashed,
    Dotted,
    DashDot,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Style {
    /// `None` 表示随层。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default)]
    pub weight: LineWeightClass,
    #[serde(default)]
    pub dash: DashClass,
    #[serde(default = "Style::default_opacity")]
    pub opacity: f64,
}

impl Style {
    fn default_opacity() -> f64 {
        1.0
    }
}

impl Default for Style {
    fn default() -> Self {
        Self {
            color: None,
            weight: LineWeightClass::default(),
            dash: DashClass::default(),
            opacity: Self::default_opacity(),
        }
    }
}

/// 圆弧绕行方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winding {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start: Point2,
    pub end: Point2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point2,
    pub radius: f64,
}

/// 圆弧，角度以弧度储存；起止角相等视为整圆。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    pub center: Point2,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    #[serde(default)]
    pub winding: Winding,
}

impl Arc {
    /// 带符号扫掠角：逆时针为正，顺时针为负。
    pub fn sweep(&self) -> f64 {
        let raw = match self.winding {
            Winding::CounterClockwise => normalize_angle(self.end_angle - self.start_angle),
            Winding::Clockwise => normalize_angle(self.start_angle - self.end_angle),
        };
        let magnitude = if raw.abs() < 1e-12 { TAU } else { raw };
        match self.winding {
            Winding::CounterClockwise => magnitude,
            Winding::Clockwise => -magnitude,
        }
    }

    pub fn contains_angle(&self, angle: f64) -> bool {
        let sweep = self.sweep();
        let offset = if sweep >= 0.0 {
            normalize_angle(angle - self.start_angle)
        } else {
            normalize_angle(self.start_angle - angle)
        };
        offset <= sweep.abs() + 1e-12
    }

    #[inline]
    pub fn start_point(&self) -> Point2 {
        point_on_circle(self.center, self.radius, self.start_angle)
    }

    #[inline]
    pub fn end_point(&self) -> Point2 {
        point_on_circle(self.center, self.radius, self.start_angle + self.sweep())
    }

    #[inline]
    pub fn mid_point(&self) -> Point2 {
        point_on_circle(self.center, self.radius, self.start_angle + self.sweep() * 0.5)
    }
}

/// 椭圆，记录主轴向量与参数范围；起止参数相等视为整椭圆。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    pub center: Point2,
    pub major_axis: Vector2,
    pub ratio: f64,
    pub start_parameter: f64,
    pub end_parameter: f64,
}

impl Ellipse {
    pub fn point_at(&self, parameter: f64) -> Point2 {
        let major = self.major_axis;
        let minor = major.perp().scale(self.ratio);
        self.center
            .translate(major.scale(parameter.cos()))
            .translate(minor.scale(parameter.sin()))
    }

    pub fn is_full(&self) -> bool {
        (normalize_angle(self.end_parameter - self.start_parameter)).abs() < 1e-12
    }

    pub fn span(&self) -> f64 {
        if self.is_full() {
            TAU
        } else {
            normalize_angle(self.end_parameter - self.start_parameter)
        }
    }
}

/// 轴对齐矩形，由两个对角点确定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub corner_a: Point2,
    pub corner_b: Point2,
}

impl Rectangle {
    /// 逆时针排列的四个角点，从最小角开始。
    pub fn corners(&self) -> [Point2; 4] {
        let b = Bounds2D::from_corners(self.corner_a, self.corner_b);
        let (min, max) = (b.min(), b.max());
        [
            min,
            Point2::new(max.x(), min.y()),
            max,
            Point2::new(min.x(), max.y()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub vertices: Vec<Point2>,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointMarker {
    pub position: Point2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub insert: Point2,
    pub content: String,
    pub height: f64,
    pub rotation: f64,
}

impl Text {
    /// 以字符数估算的文字框（宽 = 0.6 × 字高 × 字符数），四角按旋转排列。
    pub fn box_corners(&self) -> [Point2; 4] {
        let width = self.height * 0.6 * self.content.chars().count().max(1) as f64;
        let along = Vector2::new(self.rotation.cos(), self.rotation.sin());
        let up = along.perp();
        let a = self.insert;
        let b = a.translate(along.scale(width));
        let c = b.translate(up.scale(self.height));
        let d = a.translate(up.scale(self.height));
        [a, b, c, d]
    }
}

/// 均匀夹持 B 样条。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spline {
    pub degree: usize,
    pub control_points: Vec<Point2>,
}

/// 对齐线性标注：`offset` 为尺寸线相对测量基线的带符号距离（向左为正）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub start: Point2,
    pub end: Point2,
    pub offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_override: Option<String>,
}

impl Dimension {
    #[inline]
    pub fn measurement(&self) -> f64 {
        self.start.distance(self.end)
    }

    /// 尺寸线两端点。基线退化时返回 `None`。
    pub fn dimension_line(&self) -> Option<(Point2, Point2)> {
        let normal = self.start.vector_to(self.end).normalize()?.perp();
        let shift = normal.scale(self.offset);
        Some((self.start.translate(shift), self.end.translate(shift)))
    }
}

/// 角度测量：顶点加两条射线上的点，总是量取内角。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleMeasurement {
    pub vertex: Point2,
    pub first: Point2,
    pub second: Point2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leader {
    pub vertices: Vec<Point2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hatch {
    pub boundary: Vec<Point2>,
    pub pattern: String,
    pub solid: bool,
}

/// 块参照：子几何按 插入点 + 旋转 + 等比缩放 放置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub insert: Point2,
    pub rotation: f64,
    pub scale: f64,
    pub children: Vec<Geometry>,
}

impl Block {
    pub fn placement(&self) -> Similarity {
        Similarity {
            translation: Point2::ORIGIN.vector_to(self.insert),
            rotation: self.rotation,
            scale: self.scale,
        }
    }

    /// 已变换到世界坐标的子几何。
    pub fn world_children(&self) -> Vec<Geometry> {
        let placement = self.placement();
        self.children
            .iter()
            .map(|child| child.transformed(&placement))
            .collect()
    }
}

/// 双向无限构造线。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XLine {
    pub origin: Point2,
    pub direction: Vector2,
}

/// 单向射线。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    pub origin: Point2,
    pub direction: Vector2,
}

/// 相似变换：先等比缩放、再旋转、最后平移。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub translation: Vector2,
    pub rotation: f64,
    pub scale: f64,
}

impl Similarity {
    pub fn apply_vector(&self, vector: Vector2) -> Vector2 {
        let (sin, cos) = self.rotation.sin_cos();
        Vector2::new(
            (vector.x() * cos - vector.y() * sin) * self.scale,
            (vector.x() * sin + vector.y() * cos) * self.scale,
        )
    }

    pub fn apply_point(&self, point: Point2) -> Point2 {
        let rotated = self.apply_vector(Point2::ORIGIN.vector_to(point));
        Point2::ORIGIN.translate(rotated).translate(self.translation)
    }
}

/// 几何关键点，用于端点/中点/圆心捕捉与夹点。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyPoints {
    pub endpoints: Vec<Point2>,
    pub midpoints: Vec<Point2>,
    pub centers: Vec<Point2>,
}

/// 封闭的几何变体集合。新增变体时，所有 `match` 都会在编译期提示。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Line(Line),
    Circle(Circle),
    Arc(Arc),
    Ellipse(Ellipse),
    Rectangle(Rectangle),
    Polyline(Polyline),
    Point(PointMarker),
    Text(Text),
    Spline(Spline),
    Dimension(Dimension),
    AngleMeasurement(AngleMeasurement),
    Leader(Leader),
    Hatch(Hatch),
    Block(Block),
    XLine(XLine),
    Ray(Ray),
}

impl Geometry {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Geometry::Line(_) => "line",
            Geometry::Circle(_) => "circle",
            Geometry::Arc(_) => "arc",
            Geometry::Ellipse(_) => "ellipse",
            Geometry::Rectangle(_) => "rectangle",
            Geometry::Polyline(_) => "polyline",
            Geometry::Point(_) => "point",
            Geometry::Text(_) => "text",
            Geometry::Spline(_) => "spline",
            Geometry::Dimension(_) => "dimension",
            Geometry::AngleMeasurement(_) => "angle_measurement",
            Geometry::Leader(_) => "leader",
            Geometry::Hatch(_) => "hatch",
            Geometry::Block(_) => "block",
            Geometry::XLine(_) => "xline",
            Geometry::Ray(_) => "ray",
        }
    }

    /// 结构校验：坐标有限、半径为正、顶点数量足够等。
    pub fn is_well_formed(&self) -> bool {
        fn finite(values: &[f64]) -> bool {
            values.iter().all(|v| v.is_finite())
        }
        fn all_finite(points: &[Point2]) -> bool {
            points.iter().all(|p| p.is_finite())
        }
        match self {
            Geometry::Line(line) => line.start.is_finite() && line.end.is_finite(),
            Geometry::Circle(circle) => {
                circle.center.is_finite() && circle.radius.is_finite() && circle.radius > 0.0
            }
            Geometry::Arc(arc) => {
                arc.center.is_finite()
                    && finite(&[arc.radius, arc.start_angle, arc.end_angle])
                    && arc.radius > 0.0
            }
            Geometry::Ellipse(ellipse) => {
                ellipse.center.is_finite()
                    && ellipse.major_axis.is_finite()
                    && ellipse.major_axis.length() > f64::EPSILON
                    && finite(&[ellipse.ratio, ellipse.start_parameter, ellipse.end_parameter])
                    && ellipse.ratio > 0.0
                    && ellipse.ratio <= 1.0
            }
            Geometry::Rectangle(rect) => rect.corner_a.is_finite() && rect.corner_b.is_finite(),
            Geometry::Polyline(polyline) => {
                polyline.vertices.len() >= 2 && all_finite(&polyline.vertices)
            }
            Geometry::Point(point) => point.position.is_finite(),
            Geometry::Text(text) => {
                text.insert.is_finite()
                    && finite(&[text.height, text.rotation])
                    && text.height > 0.0
            }
            Geometry::Spline(spline) => {
                (1..=5).contains(&spline.degree)
                    && spline.control_points.len() > spline.degree
                    && all_finite(&spline.control_points)
            }
            Geometry::Dimension(dim) => {
                dim.start.is_finite()
                    && dim.end.is_finite()
                    && dim.offset.is_finite()
                    && dim.start.distance(dim.end) > f64::EPSILON
            }
            Geometry::AngleMeasurement(angle) => {
                all_finite(&[angle.vertex, angle.first, angle.second])
                    && angle.vertex.distance(angle.first) > f64::EPSILON
                    && angle.vertex.distance(angle.second) > f64::EPSILON
            }
            Geometry::Leader(leader) => leader.vertices.len() >= 2 && all_finite(&leader.vertices),
            Geometry::Hatch(hatch) => hatch.boundary.len() >= 3 && all_finite(&hatch.boundary),
            Geometry::Block(block) => {
                block.insert.is_finite()
                    && finite(&[block.rotation, block.scale])
                    && block.scale > 0.0
                    && block.children.iter().all(Geometry::is_well_formed)
            }
            Geometry::XLine(xline) => {
                xline.origin.is_finite()
                    && xline.direction.is_finite()
                    && xline.direction.length() > f64::EPSILON
            }
            Geometry::Ray(ray) => {
                ray.origin.is_finite()
                    && ray.direction.is_finite()
                    && ray.direction.length() > f64::EPSILON
            }
        }
    }

    /// 2D 轴对齐范围。构造线与射线无界，返回 `None`。
    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        match self {
            Geometry::Line(line) => {
                bounds.include_point(line.start);
                bounds.include_point(line.end);
            }
            Geometry::Circle(circle) => {
                bounds = Bounds2D::around(circle.center, circle.radius.abs());
            }
            Geometry::Arc(arc) => arc_bounds(arc, &mut bounds),
            Geometry::Ellipse(_) | Geometry::Spline(_) => {
                for path in self.outline() {
                    for point in path {
                        bounds.include_point(point);
                    }
                }
            }
            Geometry::Rectangle(rect) => {
                bounds = Bounds2D::from_corners(rect.corner_a, rect.corner_b);
            }
            Geometry::Polyline(polyline) => {
                for vertex in &polyline.vertices {
                    bounds.include_point(*vertex);
                }
            }
            Geometry::Point(point) => bounds.include_point(point.position),
            Geometry::Text(text) => {
                for corner in text.box_corners() {
                    bounds.include_point(corner);
                }
            }
            Geometry::Dimension(dim) => {
                bounds.include_point(dim.start);
                bounds.include_point(dim.end);
                if let Some((a, b)) = dim.dimension_line() {
                    bounds.include_point(a);
                    bounds.include_point(b);
                }
            }
            Geometry::AngleMeasurement(angle) => {
                bounds.include_point(angle.vertex);
                bounds.include_point(angle.first);
                bounds.include_point(angle.second);
            }
            Geometry::Leader(leader) => {
                for vertex in &leader.vertices {
                    bounds.include_point(*vertex);
                }
            }
            Geometry::Hatch(hatch) => {
                for vertex in &hatch.boundary {
                    bounds.include_point(*vertex);
                }
            }
            Geometry::Block(block) => {
                bounds.include_point(block.insert);
                for child in block.world_children() {
                    if let Some(child_bounds) = child.bounds() {
                        bounds.include_bounds(&child_bounds);
                    }
                }
            }
            Geometry::XLine(_) | Geometry::Ray(_) => return None,
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }

    /// 平移副本。只做加法，撤销时依赖保存的原值而非反向平移。
    pub fn translated(&self, delta: Vector2) -> Geometry {
        let mv = |p: Point2| p.translate(delta);
        match self {
            Geometry::Line(line) => Geometry::Line(Line {
                start: mv(line.start),
                end: mv(line.end),
            }),
            Geometry::Circle(circle) => Geometry::Circle(Circle {
                center: mv(circle.center),
                ..circle.clone()
            }),
            Geometry::Arc(arc) => Geometry::Arc(Arc {
                center: mv(arc.center),
                ..arc.clone()
            }),
            Geometry::Ellipse(ellipse) => Geometry::Ellipse(Ellipse {
                center: mv(ellipse.center),
                ..ellipse.clone()
            }),
            Geometry::Rectangle(rect) => Geometry::Rectangle(Rectangle {
                corner_a: mv(rect.corner_a),
                corner_b: mv(rect.corner_b),
            }),
            Geometry::Polyline(polyline) => Geometry::Polyline(Polyline {
                vertices: polyline.vertices.iter().copied().map(mv).collect(),
                closed: polyline.closed,
            }),
            Geometry::Point(point) => Geometry::Point(PointMarker {
                position: mv(point.position),
            }),
            Geometry::Text(text) => Geometry::Text(Text {
                insert: mv(text.insert),
                ..text.clone()
            }),
            Geometry::Spline(spline) => Geometry::Spline(Spline {
                degree: spline.degree,
                control_points: spline.control_points.iter().copied().map(mv).collect(),
            }),
            Geometry::Dimension(dim) => Geometry::Dimension(Dimension {
                start: mv(dim.start),
                end: mv(dim.end),
                ..dim.clone()
            }),
            Geometry::AngleMeasurement(angle) => Geometry::AngleMeasurement(AngleMeasurement {
                vertex: mv(angle.vertex),
                first: mv(angle.first),
                second: mv(angle.second),
            }),
            Geometry::Leader(leader) => Geometry::Leader(Leader {
                vertices: leader.vertices.iter().copied().map(mv).collect(),
                text: leader.text.clone(),
            }),
            Geometry::Hatch(hatch) => Geometry::Hatch(Hatch {
                boundary: hatch.boundary.iter().copied().map(mv).collect(),
                ..hatch.clone()
            }),
            Geometry::Block(block) => Geometry::Block(Block {
                insert: mv(block.insert),
                ..block.clone()
            }),
            Geometry::XLine(xline) => Geometry::XLine(XLine {
                origin: mv(xline.origin),
                direction: xline.direction,
            }),
            Geometry::Ray(ray) => Geometry::Ray(Ray {
                origin: mv(ray.origin),
                direction: ray.direction,
            }),
        }
    }

    /// 相似变换副本，用于块参照展开。矩形旋转后退化为闭合多段线。
    pub fn transformed(&self, xf: &Similarity) -> Geometry {
        let p = |point: Point2| xf.apply_point(point);
        let pts = |points: &[Point2]| points.iter().map(|point| xf.apply_point(*point)).collect::<Vec<_>>();
        match self {
            Geometry::Line(line) => Geometry::Line(Line {
                start: p(line.start),
                end: p(line.end),
            }),
            Geometry::Circle(circle) => Geometry::Circle(Circle {
                center: p(circle.center),
                radius: circle.radius * xf.scale,
            }),
            Geometry::Arc(arc) => Geometry::Arc(Arc {
                center: p(arc.center),
                radius: arc.radius * xf.scale,
                start_angle: arc.start_angle + xf.rotation,
                end_angle: arc.end_angle + xf.rotation,
                winding: arc.winding,
            }),
            Geometry::Ellipse(ellipse) => Geometry::Ellipse(Ellipse {
                center: p(ellipse.center),
                major_axis: xf.apply_vector(ellipse.major_axis),
                ..ellipse.clone()
            }),
            Geometry::Rectangle(rect) => {
                if xf.rotation.abs() < 1e-12 {
                    Geometry::Rectangle(Rectangle {
                        corner_a: p(rect.corner_a),
                        corner_b: p(rect.corner_b),
                    })
                } else {
                    Geometry::Polyline(Polyline {
                        vertices: pts(&rect.corners()[..]),
                        closed: true,
                    })
                }
            }
            Geometry::Polyline(polyline) => Geometry::Polyline(Polyline {
                vertices: pts(&polyline.vertices),
                closed: polyline.closed,
            }),
            Geometry::Point(point) => Geometry::Point(PointMarker {
                position: p(point.position),
            }),
            Geometry::Text(text) => Geometry::Text(Text {
                insert: p(text.insert),
                content: text.content.clone(),
                height: text.height * xf.scale,
                rotation: text.rotation + xf.rotation,
            }),
            Geometry::Spline(spline) => Geometry::Spline(Spline {
                degree: spline.degree,
                control_points: pts(&spline.control_points),
            }),
            Geometry::Dimension(dim) => Geometry::Dimension(Dimension {
                start: p(dim.start),
                end: p(dim.end),
                offset: dim.offset * xf.scale,
                text_override: dim.text_override.clone(),
            }),
            Geometry::AngleMeasurement(angle) => Geometry::AngleMeasurement(AngleMeasurement {
                vertex: p(angle.vertex),
                first: p(angle.first),
                second: p(angle.second),
            }),
            Geometry::Leader(leader) => Geometry::Leader(Leader {
                vertices: pts(&leader.vertices),
                text: leader.text.clone(),
            }),
            Geometry::Hatch(hatch) => Geometry::Hatch(Hatch {
                boundary: pts(&hatch.boundary),
                ..hatch.clone()
            }),
            Geometry::Block(block) => Geometry::Block(Block {
                name: block.name.clone(),
                insert: p(block.insert),
                rotation: block.rotation + xf.rotation,
                scale: block.scale * xf.scale,
                children: block.children.clone(),
            }),
            Geometry::XLine(xline) => Geometry::XLine(XLine {
                origin: p(xline.origin),
                direction: xf.apply_vector(xline.direction),
            }),
            Geometry::Ray(ray) => Geometry::Ray(Ray {
                origin: p(ray.origin),
                direction: xf.apply_vector(ray.direction),
            }),
        }
    }

    /// 端点、中点与圆心。
    pub fn key_points(&self) -> KeyPoints {
        let mut keys = KeyPoints::default();
        match self {
            Geometry::Line(line) => {
                keys.endpoints.extend([line.start, line.end]);
                keys.midpoints.push(line.start.midpoint(line.end));
            }
            Geometry::Circle(circle) => {
                keys.centers.push(circle.center);
                for quadrant in [0.0, FRAC_PI_2, PI, 3.0 * FRAC_PI_2] {
                    keys.endpoints
                        .push(point_on_circle(circle.center, circle.radius, quadrant));
                }
            }
            Geometry::Arc(arc) => {
                keys.endpoints.extend([arc.start_point(), arc.end_point()]);
                keys.midpoints.push(arc.mid_point());
                keys.centers.push(arc.center);
            }
            Geometry::Ellipse(ellipse) => {
                keys.centers.push(ellipse.center);
                if ellipse.is_full() {
                    for quadrant in [0.0, FRAC_PI_2, PI, 3.0 * FRAC_PI_2] {
                        keys.endpoints.push(ellipse.point_at(quadrant));
                    }
                } else {
                    keys.endpoints.push(ellipse.point_at(ellipse.start_parameter));
                    keys.endpoints
                        .push(ellipse.point_at(ellipse.start_parameter + ellipse.span()));
                }
            }
            Geometry::Rectangle(rect) => {
                let corners = rect.corners();
                keys.endpoints.extend(corners);
                for i in 0..4 {
                    keys.midpoints.push(corners[i].midpoint(corners[(i + 1) % 4]));
                }
                keys.centers
                    .push(Bounds2D::from_corners(rect.corner_a, rect.corner_b).center());
            }
            Geometry::Polyline(polyline) => {
                keys.endpoints.extend(polyline.vertices.iter().copied());
                for (a, b) in path_segments(&polyline.vertices, polyline.closed) {
                    keys.midpoints.push(a.midpoint(b));
                }
            }
            Geometry::Point(point) => keys.endpoints.push(point.position),
            Geometry::Text(text) => keys.endpoints.push(text.insert),
            Geometry::Spline(spline) => {
                if let (Some(first), Some(last)) =
                    (spline.control_points.first(), spline.control_points.last())
                {
                    keys.endpoints.extend([*first, *last]);
                }
            }
            Geometry::Dimension(dim) => {
                keys.endpoints.extend([dim.start, dim.end]);
                if let Some((a, b)) = dim.dimension_line() {
                    keys.midpoints.push(a.midpoint(b));
                }
            }
            Geometry::AngleMeasurement(angle) => {
                keys.endpoints.extend([angle.vertex, angle.first, angle.second]);
            }
            Geometry::Leader(leader) => keys.endpoints.extend(leader.vertices.iter().copied()),
            Geometry::Hatch(hatch) => {
                keys.endpoints.extend(hatch.boundary.iter().copied());
            }
            Geometry::Block(block) => keys.endpoints.push(block.insert),
            Geometry::XLine(xline) => keys.endpoints.push(xline.origin),
            Geometry::Ray(ray) => keys.endpoints.push(ray.origin),
        }
        keys
    }

    /// 直线段集合，供垂足、延伸与平行捕捉使用。
    pub fn straight_segments(&self) -> Vec<(Point2, Point2)> {
        match self {
            Geometry::Line(line) => vec![(line.start, line.end)],
            Geometry::Rectangle(rect) => path_segments(&rect.corners(), true),
            Geometry::Polyline(polyline) => path_segments(&polyline.vertices, polyline.closed),
            Geometry::Leader(leader) => path_segments(&leader.vertices, false),
            Geometry::Dimension(dim) => dim.dimension_line().into_iter().collect(),
            Geometry::Hatch(hatch) => path_segments(&hatch.boundary, true),
            Geometry::Block(block) => block
                .world_children()
                .iter()
                .flat_map(Geometry::straight_segments)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// 采样后的世界坐标折线，渲染与近似命中测试共用。无界几何返回空。
    pub fn outline(&self) -> Vec<Vec<Point2>> {
        match self {
            Geometry::Line(line) => vec![vec![line.start, line.end]],
            Geometry::Circle(circle) => {
                vec![sample_arc(circle.center, circle.radius, 0.0, TAU)]
            }
            Geometry::Arc(arc) => vec![sample_arc(arc.center, arc.radius, arc.start_angle, arc.sweep())],
            Geometry::Ellipse(ellipse) => {
                let span = ellipse.span();
                let segments = ((span / (TAU / CIRCLE_SEGMENTS as f64)).ceil() as usize).max(16);
                let points = (0..=segments)
                    .map(|i| {
                        ellipse.point_at(ellipse.start_parameter + span * (i as f64 / segments as f64))
                    })
                    .collect();
                vec![points]
            }
            Geometry::Rectangle(rect) => {
                let corners = rect.corners();
                vec![vec![corners[0], corners[1], corners[2], corners[3], corners[0]]]
            }
            Geometry::Polyline(polyline) => {
                let mut points = polyline.vertices.clone();
                if polyline.closed {
                    if let Some(first) = points.first().copied() {
                        points.push(first);
                    }
                }
                vec![points]
            }
            Geometry::Point(_) => Vec::new(),
            Geometry::Text(text) => {
                let corners = text.box_corners();
                vec![vec![corners[0], corners[1], corners[2], corners[3], corners[0]]]
            }
            Geometry::Spline(spline) => {
                let points = sample_spline(&spline.control_points, spline.degree);
                if points.is_empty() { Vec::new() } else { vec![points] }
            }
            Geometry::Dimension(dim) => {
                let mut paths = Vec::new();
                if let Some((a, b)) = dim.dimension_line() {
                    paths.push(vec![dim.start, a]);
                    paths.push(vec![dim.end, b]);
                    paths.push(vec![a, b]);
                }
                paths
            }
            Geometry::AngleMeasurement(angle) => {
                vec![vec![angle.first, angle.vertex, angle.second]]
            }
            Geometry::Leader(leader) => vec![leader.vertices.clone()],
            Geometry::Hatch(hatch) => {
                let mut points = hatch.boundary.clone();
                if let Some(first) = points.first().copied() {
                    points.push(first);
                }
                vec![points]
            }
            Geometry::Block(block) => block
                .world_children()
                .iter()
                .flat_map(Geometry::outline)
                .collect(),
            Geometry::XLine(_) | Geometry::Ray(_) => Vec::new(),
        }
    }

    /// 点到几何轮廓的世界距离。直线、圆、圆弧、构造线与射线为精确解，其余按采样折线近似。
    pub fn distance_to(&self, point: Point2) -> f64 {
        match self {
            Geometry::Line(line) => distance_to_segment(point, line.start, line.end),
            Geometry::Circle(circle) => (circle.center.distance(point) - circle.radius).abs(),
            Geometry::Arc(arc) => {
                let angle = arc.center.vector_to(point).angle();
                if arc.contains_angle(angle) {
                    (arc.center.distance(point) - arc.radius).abs()
                } else {
                    point
                        .distance(arc.start_point())
                        .min(point.distance(arc.end_point()))
                }
            }
            Geometry::Point(marker) => marker.position.distance(point),
            Geometry::XLine(xline) => foot_on_line(point, xline.origin, xline.direction)
                .map(|foot| foot.distance(point))
                .unwrap_or(f64::INFINITY),
            Geometry::Ray(ray) => match ray.direction.normalize() {
                Some(dir) => {
                    let t = ray.origin.vector_to(point).dot(dir).max(0.0);
                    ray.origin.translate(dir.scale(t)).distance(point)
                }
                None => f64::INFINITY,
            },
            _ => self
                .outline()
                .iter()
                .flat_map(|path| path_segments(path, false))
                .map(|(a, b)| distance_to_segment(point, a, b))
                .fold(f64::INFINITY, f64::min),
        }
    }

    /// 封闭区域的顶点（用于内部命中与面积标签）。
    pub fn filled_region(&self) -> Option<Vec<Point2>> {
        match self {
            Geometry::Circle(_) | Geometry::Ellipse(_) => {
                let mut outline = self.outline().into_iter().next()?;
                outline.pop();
                Some(outline)
            }
            Geometry::Rectangle(rect) => Some(rect.corners().to_vec()),
            Geometry::Polyline(polyline) if polyline.closed => Some(polyline.vertices.clone()),
            Geometry::Hatch(hatch) => Some(hatch.boundary.clone()),
            Geometry::Text(text) => Some(text.box_corners().to_vec()),
            _ => None,
        }
    }

    pub fn area(&self) -> Option<f64> {
        match self {
            Geometry::Circle(circle) => Some(PI * circle.radius * circle.radius),
            Geometry::Rectangle(_) | Geometry::Polyline(_) | Geometry::Hatch(_) => {
                self.filled_region().map(|region| polygon_area(&region))
            }
            _ => None,
        }
    }
}

/// 场景中的实体：标识、图层引用、共享样式与几何。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub layer: String,
    #[serde(default)]
    pub style: Style,
    pub geometry: Geometry,
}

impl Entity {
    pub fn new(id: EntityId, layer: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            id,
            layer: layer.into(),
            style: Style::default(),
            geometry,
        }
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    #[inline]
    pub fn bounds(&self) -> Option<Bounds2D> {
        self.geometry.bounds()
    }
}

/// 场景加载协作方提供的初始内容。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// 相邻顶点构成的线段；`closed` 时补上首尾段。
pub fn path_segments(points: &[Point2], closed: bool) -> Vec<(Point2, Point2)> {
    let mut segments: Vec<(Point2, Point2)> =
        points.windows(2).map(|pair| (pair[0], pair[1])).collect();
    if closed && points.len() > 2 {
        segments.push((points[points.len() - 1], points[0]));
    }
    segments
}

/// 从 `start` 出发按带符号扫掠角采样圆弧。
pub fn sample_arc(center: Point2, radius: f64, start: f64, sweep: f64) -> Vec<Point2> {
    if radius <= f64::EPSILON {
        return Vec::new();
    }
    let segments = ((sweep.abs() / (TAU / CIRCLE_SEGMENTS as f64)).ceil() as usize).max(8);
    (0..=segments)
        .map(|i| point_on_circle(center, radius, start + sweep * (i as f64 / segments as f64)))
        .collect()
}

/// de Boor 求值的夹持均匀 B 样条采样。
pub fn sample_spline(control_points: &[Point2], degree: usize) -> Vec<Point2> {
    let n = control_points.len();
    if degree == 0 || n <= degree {
        return control_points.to_vec();
    }
    let spans = n - degree;
    let mut knots = Vec::with_capacity(n + degree + 1);
    knots.extend(std::iter::repeat_n(0.0, degree + 1));
    for i in 1..spans {
        knots.push(i as f64 / spans as f64);
    }
    knots.extend(std::iter::repeat_n(1.0, degree + 1));

    let samples = spans * SPLINE_SEGMENTS_PER_SPAN;
    let mut points = Vec::with_capacity(samples + 1);
    for step in 0..=samples {
        let t = step as f64 / samples as f64;
        let span = if t >= 1.0 {
            n - 1
        } else {
            (degree..n)
                .rfind(|&k| knots[k] <= t)
                .unwrap_or(degree)
        };
        let mut d: Vec<glam::DVec2> = (0..=degree)
            .map(|j| control_points[j + span - degree].as_vec2())
            .collect();
        for r in 1..=degree {
            for j in (r..=degree).rev() {
                let i = j + span - degree;
                let denom = knots[i + degree + 1 - r] - knots[i];
                let alpha = if denom.abs() < 1e-12 { 0.0 } else { (t - knots[i]) / denom };
                d[j] = d[j - 1] * (1.0 - alpha) + d[j] * alpha;
            }
        }
        points.push(Point2::from_vec(d[degree]));
    }
    points
}

fn arc_bounds(arc: &Arc, bounds: &mut Bounds2D) {
    let radius = arc.radius.abs();
    if radius <= f64::EPSILON {
        bounds.include_point(arc.center);
        return;
    }
    bounds.include_point(arc.start_point());
    bounds.include_point(arc.end_point());
    for quadrant in [0.0, FRAC_PI_2, PI, FRAC_PI_2 * 3.0] {
        if arc.contains_angle(quadrant) {
            bounds.include_point(point_on_circle(arc.center, radius, quadrant));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arc_sweep_respects_winding() {
        let ccw = Arc {
            center: Point2::new(0.0, 0.0),
            radius: 1.0,
            start_angle: 0.0,
            end_angle: FRAC_PI_2,
            winding: Winding::CounterClockwise,
        };
        assert!((ccw.sweep() - FRAC_PI_2).abs() < 1e-12);
        let cw = Arc {
            winding: Winding::Clockwise,
            ..ccw.clone()
        };
        assert!((cw.sweep() + 3.0 * FRAC_PI_2).abs() < 1e-12);
        assert!(cw.contains_angle(PI));
        assert!(!ccw.contains_angle(PI));
    }

    #[test]
    fn arc_bounds_include_crossed_quadrants() {
        let arc = Geometry::Arc(Arc {
            center: Point2::new(0.0, 0.0),
            radius: 2.0,
            start_angle: 0.0,
            end_angle: PI,
            winding: Winding::CounterClockwise,
        });
        let bounds = arc.bounds().expect("arc bounds");
        assert!((bounds.max().y() - 2.0).abs() < 1e-9);
        assert!((bounds.min().y()).abs() < 1e-9);
        assert!((bounds.min().x() + 2.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_geometry_is_detected() {
        let nan_line = Geometry::Line(Line {
            start: Point2::new(f64::NAN, 0.0),
            end: Point2::new(1.0, 0.0),
        });
        assert!(!nan_line.is_well_formed());
        let zero_circle = Geometry::Circle(Circle {
            center: Point2::new(0.0, 0.0),
            radius: 0.0,
        });
        assert!(!zero_circle.is_well_formed());
        let short_polyline = Geometry::Polyline(Polyline {
            vertices: vec![Point2::new(0.0, 0.0)],
            closed: false,
        });
        assert!(!short_polyline.is_well_formed());
        let spline = Geometry::Spline(Spline {
            degree: 3,
            control_points: vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)],
        });
        assert!(!spline.is_well_formed());
    }

    #[test]
    fn unbounded_geometry_has_no_bounds() {
        let xline = Geometry::XLine(XLine {
            origin: Point2::new(0.0, 0.0),
            direction: Vector2::new(1.0, 1.0),
        });
        assert!(xline.bounds().is_none());
        assert!(xline.is_well_formed());
    }

    #[test]
    fn spline_sampling_is_clamped_to_end_points() {
        let controls = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 2.0),
            Point2::new(3.0, 2.0),
            Point2::new(4.0, 0.0),
            Point2::new(6.0, 1.0),
        ];
        let samples = sample_spline(&controls, 3);
        let first = samples.first().copied().unwrap();
        let last = samples.last().copied().unwrap();
        assert!(first.distance(controls[0]) < 1e-9);
        assert!(last.distance(controls[4]) < 1e-9);
    }

    #[test]
    fn block_children_follow_placement() {
        let block = Geometry::Block(Block {
            name: "door".to_string(),
            insert: Point2::new(10.0, 0.0),
            rotation: FRAC_PI_2,
            scale: 2.0,
            children: vec![Geometry::Line(Line {
                start: Point2::new(0.0, 0.0),
                end: Point2::new(1.0, 0.0),
            })],
        });
        let bounds = block.bounds().expect("block bounds");
        assert!((bounds.max().y() - 2.0).abs() < 1e-9);
        assert!((bounds.min().x() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn translation_is_pure_addition() {
        let line = Geometry::Line(Line {
            start: Point2::new(0.1, 0.2),
            end: Point2::new(0.3, 0.7),
        });
        let moved = line.translated(Vector2::new(5.0, 0.0));
        match moved {
            Geometry::Line(moved) => {
                assert_eq!(moved.start.x(), 0.1 + 5.0);
                assert_eq!(moved.end.y(), 0.7);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn entity_serializes_with_tagged_geometry() {
        let entity = Entity::new(
            EntityId::new(7),
            "GEOM",
            Geometry::Circle(Circle {
                center: Point2::new(1.0, 2.0),
                radius: 3.0,
            }),
        );
        let json = serde_json::to_string(&entity).expect("serialize entity");
        assert!(json.contains("\"type\":\"circle\""));
        let back: Entity = serde_json::from_str(&json).expect("deserialize entity");
        assert_eq!(back, entity);
    }
}
