//! 多策略对象捕捉。
//!
//! 每个策略独立扫描光标附近的几何，最多给出一个候选点；引擎合并全部候选，
//! 取优先级最高者，同优先级按屏幕距离，再按 (类型, 来源实体, 坐标) 的全序决出，
//! 保证相同场景和光标位置下结果唯一。各策略的搜索半径是基准捕捉孔径的倍数，
//! 倍数与优先级均来自配置。

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::trace;
use zdraft_config::{SnapConfig, SnapStrategyConfig};
use zdraft_core::document::{Entity, EntityId, Geometry};
use zdraft_core::geometry::{Point2, Vector2, foot_on_line, point_on_circle};
use zdraft_core::transform::{ScreenPoint, Viewport};

use crate::scene::Scene;
use crate::spatial::SpatialIndex;

/// 捕捉类型。声明顺序即同优先级同距离时的确定性次序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapKind {
    Endpoint,
    Midpoint,
    Center,
    Perpendicular,
    Tangent,
    Parallel,
    Extension,
    Ortho,
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapCandidate {
    pub point: Point2,
    pub kind: SnapKind,
    pub priority: u8,
    pub source: Option<EntityId>,
    /// 候选点到原始光标的屏幕距离（像素）。
    pub distance_px: f64,
}

impl SnapCandidate {
    fn rank(&self, other: &SnapCandidate) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.distance_px.total_cmp(&other.distance_px))
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.source.cmp(&other.source))
            .then_with(|| self.point.x().total_cmp(&other.point.x()))
            .then_with(|| self.point.y().total_cmp(&other.point.y()))
    }
}

/// 一次指针移动的捕捉请求。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapQuery {
    pub cursor: ScreenPoint,
    /// 上一个已提交的点，正交、垂足、切点与平行捕捉依赖它。
    pub last_point: Option<Point2>,
    /// 显式参照实体；缺省时以光标附近的实体作为参照。
    pub reference: Option<EntityId>,
}

impl SnapQuery {
    pub fn at(cursor: ScreenPoint) -> Self {
        Self {
            cursor,
            last_point: None,
            reference: None,
        }
    }

    pub fn with_last_point(mut self, point: Option<Point2>) -> Self {
        self.last_point = point;
        self
    }

    pub fn with_reference(mut self, reference: Option<EntityId>) -> Self {
        self.reference = reference;
        self
    }
}

/// 策略可见的只读上下文。
pub struct SnapContext<'a> {
    pub scene: &'a Scene,
    pub index: &'a SpatialIndex,
    pub viewport: &'a Viewport,
    pub query: &'a SnapQuery,
    pub cursor: Point2,
}

impl<'a> SnapContext<'a> {
    /// 光标 `radius` 范围内可见且几何有效的实体，按 z 序。
    pub fn nearby(&self, radius: f64) -> Vec<&'a Entity> {
        self.index
            .query_radius(self.cursor, radius)
            .into_iter()
            .filter_map(|id| self.scene.entity(id))
            .filter(|entity| self.scene.is_visible(entity) && entity.geometry.is_well_formed())
            .collect()
    }

    /// 参照实体：显式指定时只用它，否则用附近实体。
    pub fn references(&self, radius: f64) -> Vec<&'a Entity> {
        match self.query.reference {
            Some(id) => self
                .scene
                .entity(id)
                .filter(|entity| self.scene.is_visible(entity) && entity.geometry.is_well_formed())
                .into_iter()
                .collect(),
            None => self.nearby(radius),
        }
    }
}

/// 单个捕捉策略。`radius` 为世界单位的搜索半径，返回的点必须落在该半径内。
pub trait SnapStrategy {
    fn kind(&self) -> SnapKind;
    fn find(&self, ctx: &SnapContext<'_>, radius: f64) -> Option<(Point2, Option<EntityId>)>;
}

/// 在给定点集中取距光标最近且位于半径内的点。
fn nearest<I>(cursor: Point2, radius: f64, points: I) -> Option<(Point2, Option<EntityId>)>
where
    I: IntoIterator<Item = (Point2, Option<EntityId>)>,
{
    points
        .into_iter()
        .filter(|(point, _)| point.is_finite())
        .map(|(point, source)| (cursor.distance(point), point, source))
        .filter(|(distance, _, _)| *distance <= radius)
        .min_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.1.x().total_cmp(&b.1.x()))
                .then_with(|| a.1.y().total_cmp(&b.1.y()))
        })
        .map(|(_, point, source)| (point, source))
}

/// 端点、中点与圆心捕捉共用的关键点策略。
#[derive(Debug, Clone, Copy)]
pub struct KeyPointSnap {
    kind: SnapKind,
}

impl KeyPointSnap {
    pub fn endpoint() -> Self {
        Self {
            kind: SnapKind::Endpoint,
        }
    }

    pub fn midpoint() -> Self {
        Self {
            kind: SnapKind::Midpoint,
        }
    }

    pub fn center() -> Self {
        Self {
            kind: SnapKind::Center,
        }
    }
}

impl SnapStrategy for KeyPointSnap {
    fn kind(&self) -> SnapKind {
        self.kind
    }

    fn find(&self, ctx: &SnapContext<'_>, radius: f64) -> Option<(Point2, Option<EntityId>)> {
        let points = ctx.nearby(radius).into_iter().flat_map(|entity| {
            let keys = entity.geometry.key_points();
            let selected = match self.kind {
                SnapKind::Midpoint => keys.midpoints,
                SnapKind::Center => keys.centers,
                _ => keys.endpoints,
            };
            selected.into_iter().map(move |point| (point, Some(entity.id)))
        });
        nearest(ctx.cursor, radius, points)
    }
}

/// 最近的栅格交点。
#[derive(Debug, Clone, Copy)]
pub struct GridSnap {
    spacing: f64,
}

impl GridSnap {
    pub fn new(spacing: f64) -> Self {
        Self { spacing }
    }
}

impl SnapStrategy for GridSnap {
    fn kind(&self) -> SnapKind {
        SnapKind::Grid
    }

    fn find(&self, ctx: &SnapContext<'_>, radius: f64) -> Option<(Point2, Option<EntityId>)> {
        if !(self.spacing.is_finite() && self.spacing > 0.0) {
            return None;
        }
        let snapped = Point2::new(
            (ctx.cursor.x() / self.spacing).round() * self.spacing,
            (ctx.cursor.y() / self.spacing).round() * self.spacing,
        );
        nearest(ctx.cursor, radius, [(snapped, None)])
    }
}

/// 把光标投影到过上一点的水平或垂直线上，取较近者。
#[derive(Debug, Clone, Copy, Default)]
pub struct OrthoSnap;

impl SnapStrategy for OrthoSnap {
    fn kind(&self) -> SnapKind {
        SnapKind::Ortho
    }

    fn find(&self, ctx: &SnapContext<'_>, radius: f64) -> Option<(Point2, Option<EntityId>)> {
        let last = ctx.query.last_point?;
        let horizontal = Point2::new(ctx.cursor.x(), last.y());
        let vertical = Point2::new(last.x(), ctx.cursor.y());
        nearest(ctx.cursor, radius, [(horizontal, None), (vertical, None)])
    }
}

/// 上一点到参照直线段的垂足，或到圆/圆弧的最近点（法向）。
#[derive(Debug, Clone, Copy, Default)]
pub struct PerpendicularSnap;

impl SnapStrategy for PerpendicularSnap {
    fn kind(&self) -> SnapKind {
        SnapKind::Perpendicular
    }

    fn find(&self, ctx: &SnapContext<'_>, radius: f64) -> Option<(Point2, Option<EntityId>)> {
        let last = ctx.query.last_point?;
        let mut points = Vec::new();
        for entity in ctx.references(radius) {
            for (start, end) in entity.geometry.straight_segments() {
                let direction = start.vector_to(end);
                let Some(foot) = foot_on_line(last, start, direction) else {
                    continue;
                };
                let t = start.vector_to(foot).dot(direction) / direction.length_squared();
                if (0.0..=1.0).contains(&t) {
                    points.push((foot, Some(entity.id)));
                }
            }
            match &entity.geometry {
                Geometry::Circle(circle) => {
                    if let Some(dir) = circle.center.vector_to(last).normalize() {
                        points.push((circle.center.translate(dir.scale(circle.radius)), Some(entity.id)));
                    }
                }
                Geometry::Arc(arc) => {
                    if let Some(dir) = arc.center.vector_to(last).normalize() {
                        if arc.contains_angle(dir.angle()) {
                            points.push((arc.center.translate(dir.scale(arc.radius)), Some(entity.id)));
                        }
                    }
                }
                _ => {}
            }
        }
        nearest(ctx.cursor, radius, points)
    }
}

/// 从上一点到圆或圆弧的切点，闭式求解。
#[derive(Debug, Clone, Copy, Default)]
pub struct TangentSnap;

/// 外点到圆的两个切点；点在圆内或圆上时无解。
pub fn tangent_points(from: Point2, center: Point2, radius: f64) -> Option<[Point2; 2]> {
    let offset = center.vector_to(from);
    let distance = offset.length();
    if !(radius > 0.0) || distance <= radius {
        return None;
    }
    let base = offset.angle();
    let alpha = (radius / distance).acos();
    Some([
        point_on_circle(center, radius, base + alpha),
        point_on_circle(center, radius, base - alpha),
    ])
}

impl SnapStrategy for TangentSnap {
    fn kind(&self) -> SnapKind {
        SnapKind::Tangent
    }

    fn find(&self, ctx: &SnapContext<'_>, radius: f64) -> Option<(Point2, Option<EntityId>)> {
        let last = ctx.query.last_point?;
        let mut points = Vec::new();
        for entity in ctx.references(radius) {
            match &entity.geometry {
                Geometry::Circle(circle) => {
                    if let Some(pair) = tangent_points(last, circle.center, circle.radius) {
                        points.extend(pair.map(|p| (p, Some(entity.id))));
                    }
                }
                Geometry::Arc(arc) => {
                    if let Some(pair) = tangent_points(last, arc.center, arc.radius) {
                        points.extend(
                            pair.into_iter()
                                .filter(|p| arc.contains_angle(arc.center.vector_to(*p).angle()))
                                .map(|p| (p, Some(entity.id))),
                        );
                    }
                }
                _ => {}
            }
        }
        nearest(ctx.cursor, radius, points)
    }
}

/// 平行与延伸共用的离散探测距离：第 `k` 个探测点距基点 `k × base_px / scale`。
#[derive(Debug, Clone, Copy)]
struct Probe {
    base_px: f64,
    count: u32,
}

impl Probe {
    fn step(&self, viewport: &Viewport) -> Option<f64> {
        let step = viewport.screen_distance_to_world(self.base_px);
        (step.is_finite() && step > 0.0 && self.count > 0).then_some(step)
    }
}

/// 过上一点、平行于参照直线段的方向上的离散探测点。
#[derive(Debug, Clone, Copy)]
pub struct ParallelSnap {
    probe: Probe,
}

impl ParallelSnap {
    pub fn new(base_px: f64, count: u32) -> Self {
        Self {
            probe: Probe { base_px, count },
        }
    }
}

impl SnapStrategy for ParallelSnap {
    fn kind(&self) -> SnapKind {
        SnapKind::Parallel
    }

    fn find(&self, ctx: &SnapContext<'_>, radius: f64) -> Option<(Point2, Option<EntityId>)> {
        let last = ctx.query.last_point?;
        let step = self.probe.step(ctx.viewport)?;
        let mut points = Vec::new();
        for entity in ctx.references(radius) {
            for (start, end) in entity.geometry.straight_segments() {
                let Some(direction) = start.vector_to(end).normalize() else {
                    continue;
                };
                for k in 1..=self.probe.count {
                    let distance = step * k as f64;
                    for sign in [1.0, -1.0] {
                        points.push((last.translate(direction.scale(sign * distance)), Some(entity.id)));
                    }
                }
            }
        }
        nearest(ctx.cursor, radius, points)
    }
}

/// 参照直线段越过端点方向上的离散探测点。
///
/// 光标在延长线上的投影必须越过端点，取与投影最接近的探测距离。
#[derive(Debug, Clone, Copy)]
pub struct ExtensionSnap {
    probe: Probe,
}

impl ExtensionSnap {
    pub fn new(base_px: f64, count: u32) -> Self {
        Self {
            probe: Probe { base_px, count },
        }
    }

    fn probe_from(&self, anchor: Point2, outward: Vector2, cursor: Point2, step: f64) -> Option<Point2> {
        let beyond = anchor.vector_to(cursor).dot(outward);
        if beyond <= 1e-9 {
            return None;
        }
        let k = (beyond / step).round().clamp(1.0, self.probe.count as f64);
        Some(anchor.translate(outward.scale(k * step)))
    }
}

impl SnapStrategy for ExtensionSnap {
    fn kind(&self) -> SnapKind {
        SnapKind::Extension
    }

    fn find(&self, ctx: &SnapContext<'_>, radius: f64) -> Option<(Point2, Option<EntityId>)> {
        let step = self.probe.step(ctx.viewport)?;
        let mut points = Vec::new();
        for entity in ctx.references(radius) {
            for (start, end) in entity.geometry.straight_segments() {
                let Some(forward) = start.vector_to(end).normalize() else {
                    continue;
                };
                let ends = [(end, forward), (start, forward.negate())];
                for (anchor, outward) in ends {
                    if let Some(point) = self.probe_from(anchor, outward, ctx.cursor, step) {
                        points.push((point, Some(entity.id)));
                    }
                }
            }
        }
        nearest(ctx.cursor, radius, points)
    }
}

struct ConfiguredStrategy {
    strategy: Box<dyn SnapStrategy>,
    settings: SnapStrategyConfig,
}

/// 捕捉引擎，按配置装配策略。不持有任何随时间变化的状态。
pub struct SnapEngine {
    strategies: Vec<ConfiguredStrategy>,
    aperture_px: f64,
}

impl std::fmt::Debug for SnapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<SnapKind> = self.strategies.iter().map(|s| s.strategy.kind()).collect();
        f.debug_struct("SnapEngine")
            .field("strategies", &kinds)
            .field("aperture_px", &self.aperture_px)
            .finish()
    }
}

impl SnapEngine {
    pub fn new(aperture_px: f64) -> Self {
        Self {
            strategies: Vec::new(),
            aperture_px,
        }
    }

    pub fn from_config(config: &SnapConfig, aperture_px: f64) -> Self {
        let mut engine = Self::new(aperture_px);
        engine.push(Box::new(KeyPointSnap::endpoint()), config.endpoint);
        engine.push(Box::new(KeyPointSnap::midpoint()), config.midpoint);
        engine.push(Box::new(KeyPointSnap::center()), config.center);
        engine.push(Box::new(PerpendicularSnap), config.perpendicular);
        engine.push(Box::new(TangentSnap), config.tangent);
        engine.push(
            Box::new(ParallelSnap::new(config.probe_base_px, config.probe_count)),
            config.parallel,
        );
        engine.push(
            Box::new(ExtensionSnap::new(config.probe_base_px, config.probe_count)),
            config.extension,
        );
        engine.push(Box::new(OrthoSnap), config.ortho);
        engine.push(Box::new(GridSnap::new(config.grid_spacing)), config.grid);
        engine
    }

    pub fn push(&mut self, strategy: Box<dyn SnapStrategy>, settings: SnapStrategyConfig) {
        self.strategies.push(ConfiguredStrategy { strategy, settings });
    }

    #[inline]
    pub fn aperture_px(&self) -> f64 {
        self.aperture_px
    }

    pub fn set_aperture_px(&mut self, aperture_px: f64) {
        self.aperture_px = aperture_px;
    }

    /// 启用或停用某类策略，返回是否找到该策略。
    pub fn set_enabled(&mut self, kind: SnapKind, enabled: bool) -> bool {
        let mut found = false;
        for configured in self.strategies.iter_mut().filter(|s| s.strategy.kind() == kind) {
            configured.settings.enabled = enabled;
            found = true;
        }
        found
    }

    pub fn is_enabled(&self, kind: SnapKind) -> bool {
        self.strategies
            .iter()
            .any(|s| s.strategy.kind() == kind && s.settings.enabled)
    }

    /// 某策略的搜索半径（像素）。
    pub fn radius_px(&self, kind: SnapKind) -> Option<f64> {
        self.strategies
            .iter()
            .find(|s| s.strategy.kind() == kind)
            .map(|s| s.settings.radius_multiplier * self.aperture_px)
    }

    /// 所有策略的候选，已按裁决顺序排好。
    pub fn candidates(
        &self,
        query: &SnapQuery,
        scene: &Scene,
        index: &SpatialIndex,
        viewport: &Viewport,
    ) -> Vec<SnapCandidate> {
        let ctx = SnapContext {
            scene,
            index,
            viewport,
            query,
            cursor: viewport.screen_to_world(query.cursor),
        };
        let mut candidates: Vec<SnapCandidate> = self
            .strategies
            .iter()
            .filter(|configured| configured.settings.enabled)
            .filter_map(|configured| {
                let radius_px = configured.settings.radius_multiplier * self.aperture_px;
                let radius = viewport.screen_distance_to_world(radius_px);
                if !(radius.is_finite() && radius > 0.0) {
                    return None;
                }
                let (point, source) = configured.strategy.find(&ctx, radius)?;
                Some(SnapCandidate {
                    point,
                    kind: configured.strategy.kind(),
                    priority: configured.settings.priority,
                    source,
                    distance_px: viewport.world_to_screen(point).distance(query.cursor),
                })
            })
            .collect();
        candidates.sort_by(SnapCandidate::rank);
        candidates
    }

    /// 唯一的最佳候选。`None` 表示未捕捉，调用方使用原始光标点。
    pub fn resolve(
        &self,
        query: &SnapQuery,
        scene: &Scene,
        index: &SpatialIndex,
        viewport: &Viewport,
    ) -> Option<SnapCandidate> {
        let best = self.candidates(query, scene, index, viewport).into_iter().next();
        if let Some(candidate) = &best {
            trace!(
                kind = ?candidate.kind,
                x = candidate.point.x(),
                y = candidate.point.y(),
                "捕捉命中"
            );
        }
        best
    }
}
