use zdraft_core::document::EntityId;
use zdraft_core::geometry::Bounds2D;
use zdraft_core::transform::{ScreenPoint, Viewport};

use crate::grips::{GripRef, GripSet};
use crate::render::{self, HitInfo};
use crate::scene::Scene;
use crate::spatial::SpatialIndex;

/// 命中结果：夹点或实体。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitTarget {
    Grip(GripRef),
    Entity(HitInfo),
}

impl HitTarget {
    pub fn entity(&self) -> EntityId {
        match self {
            HitTarget::Grip(grip) => grip.entity,
            HitTarget::Entity(info) => info.entity,
        }
    }
}

/// 借用场景与空间索引的命中测试器。索引必须已与场景同步。
#[derive(Debug, Clone, Copy)]
pub struct HitTester<'a> {
    scene: &'a Scene,
    index: &'a SpatialIndex,
    grips: Option<&'a GripSet>,
}

impl<'a> HitTester<'a> {
    pub fn new(scene: &'a Scene, index: &'a SpatialIndex) -> Self {
        Self {
            scene,
            index,
            grips: None,
        }
    }

    /// 附加夹点集合，夹点先于实体参与命中。
    pub fn with_grips(mut self, grips: &'a GripSet) -> Self {
        self.grips = Some(grips);
        self
    }

    /// 先查夹点，再查实体。多个实体命中时取包围盒面积最小者，面积相同取最上层。
    pub fn hit_test(&self, screen: ScreenPoint, viewport: &Viewport, aperture_px: f64) -> Option<HitTarget> {
        if let Some(grips) = self.grips {
            if let Some(grip) = grips
                .grip_at(screen, viewport, aperture_px)
                .and_then(|i| grips.grips().get(i))
            {
                return Some(HitTarget::Grip(grip.grip_ref()));
            }
        }
        self.hit_entity(screen, viewport, aperture_px)
            .map(HitTarget::Entity)
    }

    pub fn hit_entity(&self, screen: ScreenPoint, viewport: &Viewport, aperture_px: f64) -> Option<HitInfo> {
        let world = viewport.screen_to_world(screen);
        let tolerance = viewport.screen_distance_to_world(aperture_px);
        let mut best: Option<(f64, usize, HitInfo)> = None;
        for id in self.index.query_radius(world, tolerance) {
            let Some(entity) = self.scene.entity(id) else {
                continue;
            };
            if !self.scene.is_visible(entity) {
                continue;
            }
            let Some(info) = render::hit_test(entity, screen, viewport, aperture_px) else {
                continue;
            };
            let area = self.index.bounds_of(id).map_or(f64::INFINITY, |b| b.area());
            let z = self.index.z_of(id).unwrap_or(0);
            let better = match &best {
                None => true,
                Some((best_area, best_z, _)) => area < *best_area || (area == *best_area && z > *best_z),
            };
            if better {
                best = Some((area, z, info));
            }
        }
        best.map(|(_, _, info)| info)
    }

    /// 框选：包围盒与查询框相交的可见实体，按 z 序。
    pub fn entities_in(&self, area: &Bounds2D) -> Vec<EntityId> {
        self.index
            .query_bounds(area)
            .into_iter()
            .filter(|id| self.scene.entity(*id).is_some_and(|e| self.scene.is_visible(e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use zdraft_config::ViewerConfig;
    use zdraft_core::document::{Circle, DEFAULT_LAYER, Entity, Geometry, Line};
    use zdraft_core::geometry::Point2;

    use super::*;
    use crate::render::HitPart;

    fn indexed(scene: &Scene, viewport: &Viewport) -> SpatialIndex {
        let mut index = SpatialIndex::new();
        index.rebuild(scene, SpatialIndex::cell_size_for(64.0, viewport.scale()));
        index
    }

    fn circles() -> Scene {
        let mut scene = Scene::new();
        scene.push_entity(Entity::new(
            EntityId::new(1),
            DEFAULT_LAYER,
            Geometry::Circle(Circle {
                center: Point2::ORIGIN,
                radius: 50.0,
            }),
        ));
        scene.push_entity(Entity::new(
            EntityId::new(2),
            DEFAULT_LAYER,
            Geometry::Circle(Circle {
                center: Point2::new(5.0, 0.0),
                radius: 10.0,
            }),
        ));
        scene
    }

    #[test]
    fn smaller_area_wins_over_larger_enclosing_entity() {
        let scene = circles();
        let viewport = Viewport::new(1.0, 0.0, 0.0, 800.0, 600.0).expect("viewport");
        let index = indexed(&scene, &viewport);
        let tester = HitTester::new(&scene, &index);
        let hit = tester
            .hit_test(viewport.world_to_screen(Point2::new(6.0, 1.0)), &viewport, 5.0)
            .expect("命中");
        assert_eq!(hit.entity(), EntityId::new(2));
    }

    #[test]
    fn equal_area_prefers_topmost() {
        let mut scene = Scene::new();
        for id in 1..=2 {
            scene.push_entity(Entity::new(
                EntityId::new(id),
                DEFAULT_LAYER,
                Geometry::Line(Line {
                    start: Point2::new(0.0, 0.0),
                    end: Point2::new(10.0, 0.0),
                }),
            ));
        }
        let viewport = Viewport::default();
        let index = indexed(&scene, &viewport);
        let hit = HitTester::new(&scene, &index)
            .hit_entity(viewport.world_to_screen(Point2::new(5.0, 0.0)), &viewport, 3.0)
            .expect("命中");
        assert_eq!(hit.entity, EntityId::new(2));
        assert_eq!(hit.part, HitPart::Edge);
    }

    #[test]
    fn grips_take_precedence_over_entities() {
        let scene = circles();
        let viewport = Viewport::default();
        let index = indexed(&scene, &viewport);
        let mut grips = GripSet::new(&ViewerConfig::default());
        grips.rebuild(&scene, &[EntityId::new(2)]);
        let tester = HitTester::new(&scene, &index).with_grips(&grips);
        let hit = tester
            .hit_test(viewport.world_to_screen(Point2::new(5.0, 0.0)), &viewport, 5.0)
            .expect("命中");
        assert!(matches!(hit, HitTarget::Grip(grip) if grip.entity == EntityId::new(2)));
    }

    #[test]
    fn hidden_layers_are_not_hittable() {
        let mut scene = circles();
        scene.set_layer_flags(DEFAULT_LAYER, false, false);
        let viewport = Viewport::default();
        let index = indexed(&scene, &viewport);
        let tester = HitTester::new(&scene, &index);
        assert!(
            tester
                .hit_test(viewport.world_to_screen(Point2::new(6.0, 1.0)), &viewport, 5.0)
                .is_none()
        );
    }
}
