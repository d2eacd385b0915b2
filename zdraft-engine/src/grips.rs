use serde::{Deserialize, Serialize};
use tracing::debug;
use zdraft_config::ViewerConfig;
use zdraft_core::document::{EntityId, Geometry};
use zdraft_core::geometry::Point2;
use zdraft_core::transform::{ScreenPoint, Viewport};

use crate::command::Command;
use crate::render::{self, GripSpec};
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GripRole {
    Vertex,
    Midpoint,
    Center,
}

/// 夹点交互状态：Cold → Warm（悬停）→ Hot（按下拖动）→ Cold（释放或离开）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GripState {
    #[default]
    Cold,
    Warm,
    Hot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grip {
    pub entity: EntityId,
    pub role: GripRole,
    pub index: usize,
    pub position: Point2,
    pub state: GripState,
}

impl Grip {
    #[inline]
    pub fn grip_ref(&self) -> GripRef {
        GripRef {
            entity: self.entity,
            role: self.role,
            index: self.index,
        }
    }

    fn spec(&self) -> GripSpec {
        GripSpec {
            role: self.role,
            index: self.index,
            position: self.position,
        }
    }
}

/// 夹点的稳定引用（不含位置与状态）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GripRef {
    pub entity: EntityId,
    pub role: GripRole,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripTransition {
    pub grip: GripRef,
    pub from: GripState,
    pub to: GripState,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    grip: usize,
    origin: Point2,
    current: Point2,
}

/// 释放夹点的结果：状态变化与概括整次拖动的唯一命令。
#[derive(Debug, Clone, Default)]
pub struct GripRelease {
    pub transitions: Vec<GripTransition>,
    pub command: Option<Command>,
}

/// 由当前选择集派生的夹点集合。
///
/// 选择集或场景修订号变化后必须 [`rebuild`](Self::rebuild)，交互状态随之清空。
#[derive(Debug, Clone)]
pub struct GripSet {
    grips: Vec<Grip>,
    selection: Vec<EntityId>,
    revision: Option<u64>,
    warm: Option<usize>,
    drag: Option<Drag>,
    size_px: f64,
    multipliers: [f64; 3],
}

impl GripSet {
    pub fn new(config: &ViewerConfig) -> Self {
        Self {
            grips: Vec::new(),
            selection: Vec::new(),
            revision: None,
            warm: None,
            drag: None,
            size_px: config.grip_size_px,
            multipliers: [
                config.grip_cold_multiplier,
                config.grip_warm_multiplier,
                config.grip_hot_multiplier,
            ],
        }
    }

    #[inline]
    pub fn grips(&self) -> &[Grip] {
        &self.grips
    }

    pub fn is_stale(&self, selection: &[EntityId], scene: &Scene) -> bool {
        self.revision != Some(scene.revision()) || self.selection != selection
    }

    pub fn invalidate(&mut self) {
        self.revision = None;
    }

    /// 为选中且可编辑的实体重新计算夹点。
    pub fn rebuild(&mut self, scene: &Scene, selection: &[EntityId]) {
        self.grips.clear();
        self.warm = None;
        self.drag = None;
        for id in selection {
            let Some(entity) = scene.entity(*id) else {
                continue;
            };
            if !scene.is_visible(entity) || !scene.is_editable(entity) {
                continue;
            }
            self.grips.extend(render::grips(entity).into_iter().map(|spec| Grip {
                entity: entity.id,
                role: spec.role,
                index: spec.index,
                position: spec.position,
                state: GripState::Cold,
            }));
        }
        self.selection = selection.to_vec();
        self.revision = Some(scene.revision());
        debug!(grips = self.grips.len(), selected = selection.len(), "夹点已重建");
    }

    /// 指定状态下的显示尺寸（像素）。
    pub fn display_size(&self, state: GripState) -> f64 {
        let multiplier = match state {
            GripState::Cold => self.multipliers[0],
            GripState::Warm => self.multipliers[1],
            GripState::Hot => self.multipliers[2],
        };
        self.size_px * multiplier
    }

    #[inline]
    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn hot(&self) -> Option<&Grip> {
        self.drag.and_then(|drag| self.grips.get(drag.grip))
    }

    pub fn warm(&self) -> Option<&Grip> {
        self.warm.and_then(|i| self.grips.get(i))
    }

    /// 拾取范围内最近的夹点；距离相同取先出现者。
    pub fn grip_at(&self, screen: ScreenPoint, viewport: &Viewport, pick_px: f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, grip) in self.grips.iter().enumerate() {
            let distance = viewport.world_to_screen(grip.position).distance(screen);
            if distance > pick_px {
                continue;
            }
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }
        best.map(|(i, _)| i)
    }

    fn set_state(&mut self, index: usize, to: GripState) -> Option<GripTransition> {
        let grip = self.grips.get_mut(index)?;
        if grip.state == to {
            return None;
        }
        let transition = GripTransition {
            grip: grip.grip_ref(),
            from: grip.state,
            to,
        };
        grip.state = to;
        Some(transition)
    }

    /// 悬停：进入拾取范围的夹点变为 Warm，离开的变回 Cold。拖动期间不改变状态。
    pub fn pointer_move(&mut self, screen: ScreenPoint, viewport: &Viewport, pick_px: f64) -> Vec<GripTransition> {
        if self.drag.is_some() {
            return Vec::new();
        }
        let target = self.grip_at(screen, viewport, pick_px);
        if target == self.warm {
            return Vec::new();
        }
        let mut transitions = Vec::new();
        if let Some(previous) = self.warm.take() {
            transitions.extend(self.set_state(previous, GripState::Cold));
        }
        if let Some(next) = target {
            transitions.extend(self.set_state(next, GripState::Warm));
            self.warm = Some(next);
        }
        transitions
    }

    /// 按下：只有 Warm 夹点可以变为 Hot。
    pub fn pointer_down(&mut self, world: Point2) -> Option<GripTransition> {
        if self.drag.is_some() {
            return None;
        }
        let index = self.warm?;
        let origin = self.grips.get(index)?.position;
        let transition = self.set_state(index, GripState::Hot)?;
        self.warm = None;
        self.drag = Some(Drag {
            grip: index,
            origin,
            current: world,
        });
        Some(transition)
    }

    /// 拖动：更新草稿位置，不修改场景。
    pub fn pointer_drag(&mut self, world: Point2) {
        if let Some(drag) = self.drag.as_mut() {
            drag.current = world;
        }
    }

    /// 拖动中的草稿几何，用于预览层。
    pub fn draft(&self, scene: &Scene) -> Option<(EntityId, Geometry)> {
        let drag = self.drag?;
        let grip = self.grips.get(drag.grip)?;
        let entity = scene.entity(grip.entity)?;
        let geometry = render::reshape(&entity.geometry, &grip.spec(), drag.current)?;
        Some((grip.entity, geometry))
    }

    /// 释放：Hot → Cold，并生成概括整次拖动的唯一命令。位置未变化时不生成命令。
    pub fn pointer_up(&mut self, scene: &Scene) -> GripRelease {
        let Some(drag) = self.drag.take() else {
            return GripRelease::default();
        };
        let transitions: Vec<GripTransition> = self.set_state(drag.grip, GripState::Cold).into_iter().collect();
        let command = self.grips.get(drag.grip).and_then(|grip| {
            if drag.current == drag.origin {
                return None;
            }
            let entity = scene.entity(grip.entity)?;
            if render::grip_moves_entity(&entity.geometry, grip.role) {
                Some(Command::move_entities(vec![grip.entity], drag.origin.vector_to(drag.current)))
            } else {
                let after = render::reshape(&entity.geometry, &grip.spec(), drag.current)?;
                Some(Command::reshape(grip.entity, entity.geometry.clone(), after))
            }
        });
        GripRelease {
            transitions,
            command,
        }
    }

    /// 指针离开画布：所有非 Cold 夹点回到 Cold，进行中的拖动被丢弃。
    pub fn pointer_leave(&mut self) -> Vec<GripTransition> {
        self.warm = None;
        self.drag = None;
        (0..self.grips.len())
            .filter_map(|i| self.set_state(i, GripState::Cold))
            .collect()
    }
}
