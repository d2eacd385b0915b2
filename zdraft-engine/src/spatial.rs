use std::collections::{HashMap, HashSet};

use tracing::debug;
use zdraft_core::document::EntityId;
use zdraft_core::geometry::{Bounds2D, Point2};

use crate::render::bounding_box;
use crate::scene::Scene;

/// 单个实体最多占用的网格单元数，超出后按无界实体处理。
const MAX_CELLS_PER_ENTITY: i64 = 4096;

type CellKey = (i64, i64);

fn cell_span(min: CellKey, max: CellKey) -> i64 {
    let w = max.0.saturating_sub(min.0).saturating_add(1);
    let h = max.1.saturating_sub(min.1).saturating_add(1);
    w.saturating_mul(h)
}

#[derive(Debug, Clone, Copy)]
struct IndexedEntity {
    bounds: Option<Bounds2D>,
    z: usize,
}

#[derive(Debug, Clone, Copy)]
struct RebuildCursor {
    revision: u64,
    cell_size: f64,
    next: usize,
}

/// 均匀网格空间索引，是场景的派生缓存。
///
/// 单元边长以世界单位计，由像素边长除以当前比例得到。索引记录构建时的场景修订号，
/// 修订号不一致即视为过期，由会话在下一次查询前重建。
#[derive(Debug, Default)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: HashMap<CellKey, Vec<EntityId>>,
    unbounded: Vec<EntityId>,
    entries: HashMap<EntityId, IndexedEntity>,
    revision: Option<u64>,
    pending: Option<RebuildCursor>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由像素单元边长与当前比例换算世界单元边长。
    #[inline]
    pub fn cell_size_for(cell_size_px: f64, scale: f64) -> f64 {
        cell_size_px / scale
    }

    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_rebuilding(&self) -> bool {
        self.pending.is_some()
    }

    /// 修订号不一致，或单元尺寸偏离目标超过两倍时视为过期。
    pub fn is_stale(&self, scene: &Scene, cell_size: f64) -> bool {
        if self.revision != Some(scene.revision()) {
            return true;
        }
        let ratio = cell_size / self.cell_size;
        !(0.5..=2.0).contains(&ratio)
    }

    pub fn invalidate(&mut self) {
        self.revision = None;
        self.pending = None;
    }

    /// 一次性完整重建。
    pub fn rebuild(&mut self, scene: &Scene, cell_size: f64) {
        self.begin_rebuild(scene, cell_size);
        while !self.rebuild_step(scene, usize::MAX) {}
    }

    /// 开始分帧重建：清空现有内容，后续由 [`rebuild_step`](Self::rebuild_step) 逐批填充。
    pub fn begin_rebuild(&mut self, scene: &Scene, cell_size: f64) {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            1.0
        };
        self.cells.clear();
        self.unbounded.clear();
        self.entries.clear();
        self.cell_size = cell_size;
        self.revision = None;
        self.pending = Some(RebuildCursor {
            revision: scene.revision(),
            cell_size,
            next: 0,
        });
    }

    /// 处理最多 `budget` 个实体，返回重建是否完成。
    /// 场景在重建期间发生变化时从头开始。
    pub fn rebuild_step(&mut self, scene: &Scene, budget: usize) -> bool {
        let Some(mut cursor) = self.pending else {
            return self.revision.is_some();
        };
        if cursor.revision != scene.revision() {
            debug!(
                expected = cursor.revision,
                actual = scene.revision(),
                "重建期间场景已变化，重新开始"
            );
            self.begin_rebuild(scene, cursor.cell_size);
            return self.rebuild_step(scene, budget);
        }

        for (z, entity) in scene
            .entities()
            .enumerate()
            .skip(cursor.next)
            .take(budget.max(1))
        {
            self.insert(entity.id, bounding_box(entity), z, entity.geometry.bounds().is_none());
            cursor.next = z + 1;
        }

        if cursor.next >= scene.len() {
            self.pending = None;
            self.revision = Some(cursor.revision);
            debug!(
                entities = self.entries.len(),
                cells = self.cells.len(),
                cell_size = self.cell_size,
                "空间索引重建完成"
            );
            true
        } else {
            self.pending = Some(cursor);
            false
        }
    }

    /// `unbounded_geometry` 为真表示构造线、射线一类本身无界的实体；
    /// 无效实体（包围盒为空但几何有界）不进入索引。
    fn insert(&mut self, id: EntityId, bounds: Option<Bounds2D>, z: usize, unbounded_geometry: bool) {
        match bounds {
            Some(bounds) => {
                let (min, max) = (self.cell_of(bounds.min()), self.cell_of(bounds.max()));
                let span = cell_span(min, max);
                if span > MAX_CELLS_PER_ENTITY || span <= 0 {
                    self.unbounded.push(id);
                } else {
                    for cx in min.0..=max.0 {
                        for cy in min.1..=max.1 {
                            self.cells.entry((cx, cy)).or_default().push(id);
                        }
                    }
                }
                self.entries.insert(id, IndexedEntity { bounds: Some(bounds), z });
            }
            None if unbounded_geometry => {
                self.unbounded.push(id);
                self.entries.insert(id, IndexedEntity { bounds: None, z });
            }
            None => {}
        }
    }

    #[inline]
    fn cell_of(&self, point: Point2) -> CellKey {
        let cx = (point.x() / self.cell_size).floor();
        let cy = (point.y() / self.cell_size).floor();
        (cx.clamp(i64::MIN as f64, i64::MAX as f64) as i64, cy.clamp(i64::MIN as f64, i64::MAX as f64) as i64)
    }

    /// 包围盒与查询框相交的实体，去重后按 z 序（由下到上）返回。
    pub fn query_bounds(&self, area: &Bounds2D) -> Vec<EntityId> {
        if area.is_empty() || self.cell_size <= 0.0 {
            return Vec::new();
        }
        let mut seen: HashSet<EntityId> = HashSet::new();
        let (min, max) = (self.cell_of(area.min()), self.cell_of(area.max()));
        let span = cell_span(min, max);
        if span > MAX_CELLS_PER_ENTITY {
            for (id, entry) in &self.entries {
                if entry.bounds.is_some_and(|b| b.intersects(area)) {
                    seen.insert(*id);
                }
            }
        } else {
            for cx in min.0..=max.0 {
                for cy in min.1..=max.1 {
                    let Some(bucket) = self.cells.get(&(cx, cy)) else {
                        continue;
                    };
                    for id in bucket {
                        let overlaps = self
                            .entries
                            .get(id)
                            .and_then(|entry| entry.bounds)
                            .is_some_and(|b| b.intersects(area));
                        if overlaps {
                            seen.insert(*id);
                        }
                    }
                }
            }
        }
        seen.extend(self.unbounded.iter().copied());
        self.sorted_by_z(seen)
    }

    /// 以 `center` 为圆心、`radius` 为半径的候选实体。
    pub fn query_radius(&self, center: Point2, radius: f64) -> Vec<EntityId> {
        self.query_bounds(&Bounds2D::around(center, radius.abs()))
    }

    pub fn bounds_of(&self, id: EntityId) -> Option<Bounds2D> {
        self.entries.get(&id).and_then(|entry| entry.bounds)
    }

    pub fn z_of(&self, id: EntityId) -> Option<usize> {
        self.entries.get(&id).map(|entry| entry.z)
    }

    fn sorted_by_z(&self, ids: HashSet<EntityId>) -> Vec<EntityId> {
        let mut ids: Vec<(usize, EntityId)> = ids
            .into_iter()
            .filter_map(|id| self.entries.get(&id).map(|entry| (entry.z, id)))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }
}
