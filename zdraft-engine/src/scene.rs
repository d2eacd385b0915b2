use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};
use zdraft_core::document::{DEFAULT_LAYER, Entity, EntityId, Geometry, Layer, SceneSnapshot, Style};
use zdraft_core::geometry::Bounds2D;

/// 视图会话独占的场景：按插入顺序保存实体，按名称保存图层。
///
/// 修改入口均为 `pub(crate)`，外部只能通过命令栈改动场景。
/// 每次修改都会递增 `revision`，派生缓存据此判断是否过期。
/// `positions` 与 `entities` 同步维护，按 ID 查找为常数时间。
#[derive(Debug, Clone)]
pub struct Scene {
    entities: Vec<Entity>,
    positions: HashMap<EntityId, usize>,
    layers: BTreeMap<String, Layer>,
    default_layer: Layer,
    revision: u64,
}

impl Scene {
    pub fn new() -> Self {
        let default_layer = Layer::new(DEFAULT_LAYER);
        let mut layers = BTreeMap::new();
        layers.insert(DEFAULT_LAYER.to_string(), default_layer.clone());
        Self {
            entities: Vec::new(),
            positions: HashMap::new(),
            layers,
            default_layer,
            revision: 0,
        }
    }

    /// 由加载协作方提供的快照构建场景。重复 ID 的实体会被丢弃并记录警告。
    pub fn from_snapshot(snapshot: SceneSnapshot) -> Self {
        let mut scene = Self::new();
        for layer in snapshot.layers {
            scene.layers.insert(layer.name.clone(), layer);
        }
        let mut seen = HashSet::new();
        for entity in snapshot.entities {
            if !seen.insert(entity.id) {
                warn!(entity = entity.id.get(), "快照中实体 ID 重复，已忽略");
                continue;
            }
            if !scene.layers.contains_key(&entity.layer) {
                debug!(entity = entity.id.get(), layer = %entity.layer, "实体引用的图层不存在，将按默认图层显示");
            }
            scene.positions.insert(entity.id, scene.entities.len());
            scene.entities.push(entity);
        }
        debug!(
            entities = scene.entities.len(),
            layers = scene.layers.len(),
            "场景快照已载入"
        );
        scene
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            layers: self.layers.values().cloned().collect(),
            entities: self.entities.clone(),
        }
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(*self.positions.get(&id)?)
    }

    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.positions.contains_key(&id)
    }

    /// 按绘制顺序（z 序由低到高）迭代实体。
    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.iter()
    }

    /// 实体在绘制顺序中的位置，越大越靠上。
    #[inline]
    pub fn z_index(&self, id: EntityId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> + '_ {
        self.layers.values()
    }

    /// 实体所属图层；悬空引用回退到默认图层，仅用于过滤与渲染。
    pub fn effective_layer(&self, entity: &Entity) -> &Layer {
        self.layers
            .get(&entity.layer)
            .or_else(|| self.layers.get(DEFAULT_LAYER))
            .unwrap_or(&self.default_layer)
    }

    pub fn is_visible(&self, entity: &Entity) -> bool {
        self.effective_layer(entity).visible
    }

    pub fn is_editable(&self, entity: &Entity) -> bool {
        !self.effective_layer(entity).locked
    }

    /// 所有有界实体的整体范围。
    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        for entity in &self.entities {
            if let Some(entity_bounds) = entity.bounds() {
                bounds.include_bounds(&entity_bounds);
            }
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }

    pub(crate) fn push_entity(&mut self, entity: Entity) {
        self.positions.insert(entity.id, self.entities.len());
        self.entities.push(entity);
        self.touch();
    }

    /// 一次遍历删除一批实体，按原 z 序返回 `(原位置, 实体)`。
    pub(crate) fn remove_entities(&mut self, ids: &HashSet<EntityId>) -> Vec<(usize, Entity)> {
        let Some(first) = ids.iter().filter_map(|id| self.z_index(*id)).min() else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(ids.len());
        let mut kept = Vec::with_capacity(self.entities.len() - first);
        for (offset, entity) in self.entities.drain(first..).enumerate() {
            if ids.contains(&entity.id) {
                self.positions.remove(&entity.id);
                removed.push((first + offset, entity));
            } else {
                kept.push(entity);
            }
        }
        self.entities.extend(kept);
        self.reindex_from(first);
        self.touch();
        removed
    }

    /// `remove_entities` 的逆操作：位置按升序排列时，插回后每个实体恰好回到原位置。
    pub(crate) fn restore_entities(&mut self, mut records: Vec<(usize, Entity)>) {
        if records.is_empty() {
            return;
        }
        records.sort_by_key(|(index, _)| *index);
        let first = records[0].0.min(self.entities.len());
        let tail: Vec<Entity> = self.entities.drain(first..).collect();
        let mut tail = tail.into_iter();
        let mut records = records.into_iter().peekable();
        loop {
            let position = self.entities.len();
            let next = match records.peek() {
                Some((index, _)) if *index <= position => records.next().map(|(_, entity)| entity),
                _ => tail.next().or_else(|| records.next().map(|(_, entity)| entity)),
            };
            match next {
                Some(entity) => self.entities.push(entity),
                None => break,
            }
        }
        self.reindex_from(first);
        self.touch();
    }

    pub(crate) fn replace_geometry(&mut self, id: EntityId, geometry: Geometry) -> Option<Geometry> {
        let index = self.z_index(id)?;
        let previous = std::mem::replace(&mut self.entities[index].geometry, geometry);
        self.touch();
        Some(previous)
    }

    pub(crate) fn replace_style(&mut self, id: EntityId, style: Style) -> Option<Style> {
        let index = self.z_index(id)?;
        let previous = std::mem::replace(&mut self.entities[index].style, style);
        self.touch();
        Some(previous)
    }

    pub(crate) fn insert_layer(&mut self, layer: Layer) -> Option<Layer> {
        let previous = self.layers.insert(layer.name.clone(), layer);
        self.touch();
        previous
    }

    pub(crate) fn remove_layer(&mut self, name: &str) -> Option<Layer> {
        if name == DEFAULT_LAYER {
            return None;
        }
        let removed = self.layers.remove(name);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub(crate) fn set_layer_flags(&mut self, name: &str, visible: bool, locked: bool) -> bool {
        let Some(layer) = self.layers.get_mut(name) else {
            return false;
        };
        layer.visible = visible;
        layer.locked = locked;
        self.touch();
        true
    }

    fn reindex_from(&mut self, start: usize) {
        for (index, entity) in self.entities.iter().enumerate().skip(start) {
            self.positions.insert(entity.id, index);
        }
    }

    #[inline]
    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

/// 深度相等只比较实体与图层内容，不比较修订号。
impl PartialEq for Scene {
    fn eq(&self, other: &Self) -> bool {
        self.entities == other.entities && self.layers == other.layers
    }
}

#[cfg(test)]
mod tests {
    use zdraft_core::document::{Circle, Line};
    use zdraft_core::geometry::Point2;

    use super::*;

    fn line(id: u64, layer: &str) -> Entity {
        Entity::new(
            EntityId::new(id),
            layer,
            Geometry::Line(Line {
                start: Point2::new(0.0, 0.0),
                end: Point2::new(10.0, 0.0),
            }),
        )
    }

    #[test]
    fn default_layer_always_exists() {
        let scene = Scene::new();
        assert!(scene.layer(DEFAULT_LAYER).is_some());
        assert!(scene.is_empty());
        assert!(scene.bounds().is_none());
    }

    #[test]
    fn dangling_layer_falls_back_to_default() {
        let mut scene = Scene::new();
        scene.push_entity(line(1, "MISSING"));
        let entity = scene.entity(EntityId::new(1)).expect("entity exists");
        assert_eq!(scene.effective_layer(entity).name, DEFAULT_LAYER);
        assert!(scene.is_visible(entity));

        scene.set_layer_flags(DEFAULT_LAYER, false, true);
        let entity = scene.entity(EntityId::new(1)).expect("entity exists");
        assert!(!scene.is_visible(entity));
        assert!(!scene.is_editable(entity));
    }

    #[test]
    fn mutations_bump_revision_and_keep_order() {
        let mut scene = Scene::new();
        let start = scene.revision();
        scene.push_entity(line(1, DEFAULT_LAYER));
        scene.push_entity(line(2, DEFAULT_LAYER));
        scene.restore_entities(vec![(
            0,
            Entity::new(
                EntityId::new(3),
                DEFAULT_LAYER,
                Geometry::Circle(Circle {
                    center: Point2::new(1.0, 1.0),
                    radius: 1.0,
                }),
            ),
        )]);
        assert_eq!(scene.revision(), start + 3);
        let order: Vec<u64> = scene.entities().map(|e| e.id.get()).collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(scene.z_index(EntityId::new(2)), Some(2));

        let removed = scene.remove_entities(&HashSet::from([EntityId::new(1)]));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, 1);
        assert_eq!(removed[0].1.id.get(), 1);
        assert!(!scene.contains(EntityId::new(1)));
        assert_eq!(scene.z_index(EntityId::new(2)), Some(1));
    }

    #[test]
    fn batch_remove_and_restore_keep_positions_in_step() {
        let mut scene = Scene::new();
        for id in 1..=8 {
            scene.push_entity(line(id, DEFAULT_LAYER));
        }
        let original = scene.clone();
        let targets: HashSet<EntityId> = [2, 3, 5, 8].into_iter().map(EntityId::new).collect();

        let removed = scene.remove_entities(&targets);
        let indices: Vec<usize> = removed.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![1, 2, 4, 7]);
        let order: Vec<u64> = scene.entities().map(|e| e.id.get()).collect();
        assert_eq!(order, vec![1, 4, 6, 7]);
        for (z, entity) in scene.entities().enumerate() {
            assert_eq!(scene.z_index(entity.id), Some(z));
        }
        assert!(scene.entity(EntityId::new(5)).is_none());

        // 乱序传入也能按位置插回
        let mut shuffled = removed;
        shuffled.reverse();
        scene.restore_entities(shuffled);
        assert_eq!(scene, original);
        for (z, entity) in scene.entities().enumerate() {
            assert_eq!(scene.z_index(entity.id), Some(z));
            assert_eq!(scene.entity(entity.id).map(|e| e.id), Some(entity.id));
        }
    }

    #[test]
    fn equality_ignores_revision() {
        let mut a = Scene::new();
        let b = Scene::new();
        a.push_entity(line(1, DEFAULT_LAYER));
        a.remove_entities(&HashSet::from([EntityId::new(1)]));
        assert_ne!(a.revision(), b.revision());
        assert_eq!(a, b);
    }

    #[test]
    fn snapshot_drops_duplicate_ids() {
        let snapshot = SceneSnapshot {
            layers: vec![Layer::new("GEOM")],
            entities: vec![line(1, "GEOM"), line(1, "GEOM"), line(2, "GEOM")],
        };
        let scene = Scene::from_snapshot(snapshot);
        assert_eq!(scene.len(), 2);
        assert!(scene.layer("GEOM").is_some());
        assert!(scene.layer(DEFAULT_LAYER).is_some());
    }
}
