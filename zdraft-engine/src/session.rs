//! 查看器会话：持有场景与全部派生状态，是外部协作方唯一的入口。
//!
//! 场景只经由命令栈修改。每次修改后空间索引与夹点被标记过期，内容层和交互层标记为脏；
//! 读取方（命中测试、捕捉）在查询前按需重建索引。批量修改超过阈值时，
//! 索引改为借助调度器的延迟任务分帧重建。

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};
use zdraft_config::{AppConfig, LabelConfig, SpatialConfig, ViewerConfig};
use zdraft_core::document::{DEFAULT_LAYER, Entity, EntityId, Geometry, SceneSnapshot};
use zdraft_core::geometry::Point2;
use zdraft_core::transform::{ScreenPoint, Viewport};

use crate::command::{Command, CommandSink, CommandStack};
use crate::compositor::{CONTENT_SURFACE, INTERACTION_SURFACE, LayerCompositor, PREVIEW_SURFACE};
use crate::draft::{DraftState, Tool};
use crate::errors::{CommandError, RenderError, SchedulerError};
use crate::grips::{Grip, GripRef, GripSet, GripState, GripTransition};
use crate::hit::{HitTarget, HitTester};
use crate::ids::IdAllocator;
use crate::render::{self, MalformedLog, RenderContext, Stroke, StyleTable};
use crate::scene::Scene;
use crate::scheduler::{
    FrameMetrics, FrameScheduler, RenderPriority, RenderSystem, SubscriptionId, TaskId, TaskOutcome, TickReport,
};
use crate::snap::{SnapCandidate, SnapEngine, SnapKind, SnapQuery};
use crate::spatial::SpatialIndex;

pub const CONTENT_SYSTEM: &str = "content";
pub const INTERACTION_SYSTEM: &str = "interaction";
pub const PREVIEW_SYSTEM: &str = "preview";

/// 会话向订阅者发布的类型化事件。
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SelectionChanged { selection: Vec<EntityId> },
    SceneChanged { revision: u64 },
    ToolChanged { tool: Tool },
    ViewportChanged { viewport: Viewport },
    GripChanged(GripTransition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&SessionEvent)>;

/// 简单的发布/订阅总线。订阅者收到事件后自行拉取会话当前状态。
#[derive(Default)]
pub struct EventBus {
    next: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBus {
    pub fn subscribe(&mut self, listener: impl FnMut(&SessionEvent) + 'static) -> ListenerId {
        self.next += 1;
        let id = ListenerId(self.next);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        before != self.listeners.len()
    }

    pub fn emit(&mut self, event: &SessionEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }
}

/// 各绘制面是否需要重绘。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub content: bool,
    pub interaction: bool,
    pub preview: bool,
}

impl DirtyFlags {
    pub fn all() -> Self {
        Self {
            content: true,
            interaction: true,
            preview: true,
        }
    }
}

/// 渲染系统每帧看到的上下文：场景、视口以及派生状态。
#[derive(Debug)]
pub struct Workspace {
    scene: Scene,
    viewport: Viewport,
    index: SpatialIndex,
    grips: GripSet,
    selection: Vec<EntityId>,
    compositor: LayerCompositor,
    styles: StyleTable,
    labels: LabelConfig,
    spatial: SpatialConfig,
    malformed: MalformedLog,
    preview: Option<Geometry>,
    snap_marker: Option<SnapCandidate>,
    pub dirty: DirtyFlags,
}

impl Workspace {
    #[inline]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    #[inline]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    #[inline]
    pub fn selection(&self) -> &[EntityId] {
        &self.selection
    }

    #[inline]
    pub fn grips(&self) -> &[Grip] {
        self.grips.grips()
    }

    #[inline]
    pub fn compositor(&self) -> &LayerCompositor {
        &self.compositor
    }

    #[inline]
    pub fn compositor_mut(&mut self) -> &mut LayerCompositor {
        &mut self.compositor
    }

    /// 正在绘制或拖动的草稿几何。
    #[inline]
    pub fn preview(&self) -> Option<&Geometry> {
        self.preview.as_ref()
    }

    #[inline]
    pub fn snap_marker(&self) -> Option<&SnapCandidate> {
        self.snap_marker.as_ref()
    }

    #[inline]
    pub fn malformed_reported(&self) -> usize {
        self.malformed.reported_count()
    }

    fn cell_size(&self) -> f64 {
        SpatialIndex::cell_size_for(self.spatial.cell_size_px, self.viewport.scale())
    }

    /// 索引过期或分帧重建未完成时，就地完成重建。
    fn ensure_index(&mut self) {
        let cell_size = self.cell_size();
        if self.index.is_rebuilding() && !self.index.rebuild_step(&self.scene, usize::MAX) {
            return;
        }
        if self.index.is_stale(&self.scene, cell_size) {
            self.index.rebuild(&self.scene, cell_size);
        }
    }

    fn ensure_grips(&mut self) {
        if self.grips.is_stale(&self.selection, &self.scene) {
            self.grips.rebuild(&self.scene, &self.selection);
            self.dirty.interaction = true;
        }
    }
}

fn surface_error(name: &str) -> RenderError {
    RenderError::Failed(format!("缺少绘制面 {name}"))
}

fn render_content(ws: &mut Workspace) -> Result<(), RenderError> {
    let list = ws
        .compositor
        .surface_mut(CONTENT_SURFACE)
        .ok_or_else(|| surface_error(CONTENT_SURFACE))?;
    list.clear();
    let visible = ws.viewport.visible_world_bounds();
    let mut drawn = 0usize;
    for entity in ws.scene.entities() {
        if !ws.scene.is_visible(entity) {
            continue;
        }
        if render::bounding_box(entity).is_some_and(|b| !b.intersects(&visible)) {
            continue;
        }
        let layer = ws.scene.effective_layer(entity);
        if render::render_entity(
            &mut *list,
            entity,
            layer,
            &ws.viewport,
            &ws.styles,
            &ws.labels,
            &mut ws.malformed,
        ) {
            drawn += 1;
        }
    }
    debug!(drawn, "内容层已重绘");
    ws.dirty.content = false;
    Ok(())
}

fn render_interaction(ws: &mut Workspace) -> Result<(), RenderError> {
    ws.ensure_grips();
    let list = ws
        .compositor
        .surface_mut(INTERACTION_SURFACE)
        .ok_or_else(|| surface_error(INTERACTION_SURFACE))?;
    list.clear();
    let style = ws.styles.config();
    let highlight = Stroke::solid(style.selection_color, style.line_width_px.normal + 1.0);
    for id in &ws.selection {
        if let Some(entity) = ws.scene.entity(*id).filter(|e| ws.scene.is_visible(e)) {
            if let Some(geometry) = render::validate(entity) {
                list.set_stroke(&highlight);
                render::draw_geometry(
                    &mut *list,
                    geometry,
                    &ws.viewport,
                    &highlight,
                    ws.labels.font_size_px,
                );
            }
        }
    }
    for grip in ws.grips.grips() {
        let (color, filled) = match grip.state {
            GripState::Cold => (style.grip_color, false),
            GripState::Warm => (style.grip_color, true),
            GripState::Hot => (style.hot_grip_color, true),
        };
        let radius = ws.grips.display_size(grip.state) * 0.5;
        list.marker(ws.viewport.world_to_screen(grip.position), radius, color, filled);
    }
    if let Some(snap) = &ws.snap_marker {
        list.marker(
            ws.viewport.world_to_screen(snap.point),
            ws.grips.display_size(GripState::Warm),
            style.preview_color,
            false,
        );
    }
    ws.dirty.interaction = false;
    Ok(())
}

fn render_preview(ws: &mut Workspace) -> Result<(), RenderError> {
    let list = ws
        .compositor
        .surface_mut(PREVIEW_SURFACE)
        .ok_or_else(|| surface_error(PREVIEW_SURFACE))?;
    list.clear();
    if let Some(geometry) = ws.preview.as_ref().filter(|g| g.is_well_formed()) {
        let style = ws.styles.config();
        let stroke = Stroke {
            dash: style.dash_patterns.dashed.clone(),
            ..Stroke::solid(style.preview_color, style.line_width_px.normal)
        };
        list.set_stroke(&stroke);
        render::draw_geometry(&mut *list, geometry, &ws.viewport, &stroke, ws.labels.font_size_px);
    }
    ws.dirty.preview = false;
    Ok(())
}

/// 指针按下的处理结果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerAction {
    None,
    GripPressed(GripRef),
    Selected(Option<EntityId>),
    DraftPoint(Point2),
    Committed(EntityId),
}

/// 单个视图的交互会话。
pub struct ViewerSession {
    workspace: Workspace,
    scheduler: FrameScheduler<Workspace>,
    history: CommandStack,
    ids: IdAllocator,
    snap: SnapEngine,
    draft: DraftState,
    events: EventBus,
    viewer: ViewerConfig,
    current_layer: String,
    rebuild_task: Option<TaskId>,
}

impl std::fmt::Debug for ViewerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("entities", &self.workspace.scene.len())
            .field("selection", &self.workspace.selection)
            .field("tool", &self.draft.tool())
            .field("scheduler", &self.scheduler)
            .field("history", &self.history)
            .finish()
    }
}

impl ViewerSession {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_scene(config, Scene::new())
    }

    pub fn from_snapshot(config: &AppConfig, snapshot: SceneSnapshot) -> Self {
        Self::with_scene(config, Scene::from_snapshot(snapshot))
    }

    pub fn with_scene(config: &AppConfig, scene: Scene) -> Self {
        let viewer = config.viewer.clone();
        let viewport = Viewport::new(1.0, 0.0, 0.0, viewer.canvas_width, viewer.canvas_height).unwrap_or_default();
        let ids = IdAllocator::after(&scene);
        let workspace = Workspace {
            scene,
            viewport,
            index: SpatialIndex::new(),
            grips: GripSet::new(&viewer),
            selection: Vec::new(),
            compositor: LayerCompositor::standard(),
            styles: StyleTable::new(&config.style),
            labels: config.labels.clone(),
            spatial: config.spatial.clone(),
            malformed: MalformedLog::new(),
            preview: None,
            snap_marker: None,
            dirty: DirtyFlags::all(),
        };
        let mut session = Self {
            workspace,
            scheduler: FrameScheduler::new(&config.scheduler),
            history: CommandStack::new(config.history.max_depth),
            ids,
            snap: SnapEngine::from_config(&config.snap, viewer.aperture_px),
            draft: DraftState::default(),
            events: EventBus::default(),
            viewer,
            current_layer: DEFAULT_LAYER.to_string(),
            rebuild_task: None,
        };
        session.register_default_systems();
        info!(
            entities = session.workspace.scene.len(),
            layers = session.workspace.scene.layers().count(),
            "查看器会话已创建"
        );
        session
    }

    fn register_default_systems(&mut self) {
        let defaults: [(&str, RenderPriority, fn(&mut Workspace) -> Result<(), RenderError>, fn(&Workspace) -> bool); 3] = [
            (PREVIEW_SYSTEM, RenderPriority::Critical, render_preview, |ws| ws.dirty.preview),
            (INTERACTION_SYSTEM, RenderPriority::High, render_interaction, |ws| ws.dirty.interaction),
            (CONTENT_SYSTEM, RenderPriority::Normal, render_content, |ws| ws.dirty.content),
        ];
        for (id, priority, render, is_dirty) in defaults {
            if let Err(err) = self.scheduler.register_fn(id, priority, render, is_dirty) {
                warn!(system = id, error = %err, "默认渲染系统注册失败");
            }
        }
    }

    // ---- 只读访问 ----

    #[inline]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    #[inline]
    pub fn scene(&self) -> &Scene {
        &self.workspace.scene
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        self.workspace.viewport
    }

    #[inline]
    pub fn selection(&self) -> &[EntityId] {
        &self.workspace.selection
    }

    #[inline]
    pub fn tool(&self) -> Tool {
        self.draft.tool()
    }

    #[inline]
    pub fn draft(&self) -> &DraftState {
        &self.draft
    }

    #[inline]
    pub fn history(&self) -> &CommandStack {
        &self.history
    }

    #[inline]
    pub fn scheduler(&self) -> &FrameScheduler<Workspace> {
        &self.scheduler
    }

    #[inline]
    pub fn current_layer(&self) -> &str {
        &self.current_layer
    }

    pub fn world_to_screen(&self, point: Point2) -> ScreenPoint {
        self.workspace.viewport.world_to_screen(point)
    }

    pub fn screen_to_world(&self, point: ScreenPoint) -> Point2 {
        self.workspace.viewport.screen_to_world(point)
    }

    // ---- 订阅 ----

    pub fn subscribe(&mut self, listener: impl FnMut(&SessionEvent) + 'static) -> ListenerId {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn subscribe_frame_metrics(&mut self, callback: impl FnMut(&FrameMetrics) + 'static) -> SubscriptionId {
        self.scheduler.subscribe_metrics(callback)
    }

    pub fn unsubscribe_frame_metrics(&mut self, id: SubscriptionId) -> bool {
        self.scheduler.unsubscribe_metrics(id)
    }

    pub fn set_command_sink(&mut self, sink: Box<dyn CommandSink>) {
        self.history.set_sink(sink);
    }

    // ---- 渲染调度 ----

    pub fn register_render_system(&mut self, system: Box<dyn RenderSystem<Workspace>>) -> Result<(), SchedulerError> {
        self.scheduler.register(system)
    }

    pub fn register_render_fn<R, D>(
        &mut self,
        id: impl Into<String>,
        priority: RenderPriority,
        render: R,
        is_dirty: D,
    ) -> Result<(), SchedulerError>
    where
        R: FnMut(&mut Workspace) -> Result<(), RenderError> + 'static,
        D: FnMut(&Workspace) -> bool + 'static,
    {
        self.scheduler.register_fn(id, priority, render, is_dirty)
    }

    pub fn unregister_render_system(&mut self, id: &str) -> bool {
        self.scheduler.unregister(id)
    }

    /// 在调度器上排一个延迟任务，与渲染共用同一帧节拍。
    pub fn schedule_after(
        &mut self,
        delay: Duration,
        task: impl FnMut(&mut Workspace) -> TaskOutcome + 'static,
    ) -> TaskId {
        self.scheduler.schedule_after(delay, task)
    }

    pub fn tick(&mut self, now: Duration) -> TickReport {
        self.scheduler.tick(&mut self.workspace, now)
    }

    /// 合成后的整帧显示列表。
    pub fn frame(&self) -> render::DisplayList {
        self.workspace.compositor.composite()
    }

    // ---- 命令 ----

    pub fn execute(&mut self, command: Command) -> Result<(), CommandError> {
        let affected = command.affected_count();
        self.history.execute(&mut self.workspace.scene, command)?;
        self.after_scene_change(affected);
        Ok(())
    }

    pub fn undo(&mut self) -> Result<bool, CommandError> {
        let affected = self.history.last().map_or(0, Command::affected_count);
        let undone = self.history.undo(&mut self.workspace.scene)?;
        if undone {
            self.after_scene_change(affected);
        }
        Ok(undone)
    }

    pub fn redo(&mut self) -> Result<bool, CommandError> {
        let affected = self.history.next_redo().map_or(0, Command::affected_count);
        let redone = self.history.redo(&mut self.workspace.scene)?;
        if redone {
            self.after_scene_change(affected);
        }
        Ok(redone)
    }

    /// 删除当前选择集。
    pub fn delete_selection(&mut self) -> Result<(), CommandError> {
        let ids = self.workspace.selection.clone();
        self.execute(Command::delete_entities(ids))
    }

    /// 分配新 ID 并把几何加入当前图层。
    pub fn add_geometry(&mut self, geometry: Geometry) -> Result<EntityId, CommandError> {
        let id = self.ids.allocate();
        let entity = Entity::new(id, self.current_layer.clone(), geometry);
        self.execute(Command::add_entities(vec![entity]))?;
        Ok(id)
    }

    pub fn set_current_layer(&mut self, name: &str) -> Result<(), CommandError> {
        if self.workspace.scene.layer(name).is_none() {
            return Err(CommandError::LayerNotFound(name.to_string()));
        }
        self.current_layer = name.to_string();
        Ok(())
    }

    fn after_scene_change(&mut self, affected: usize) {
        for entity in self.workspace.scene.entities() {
            self.ids.observe(entity.id);
        }
        let ws = &mut self.workspace;
        let before = ws.selection.len();
        ws.selection.retain(|id| ws.scene.contains(*id));
        let selection_changed = before != ws.selection.len();

        if let Some(task) = self.rebuild_task.take() {
            self.scheduler.cancel(task);
        }
        if affected > ws.spatial.bulk_threshold {
            let cell_size = ws.cell_size();
            ws.index.begin_rebuild(&ws.scene, cell_size);
            let chunk = ws.spatial.rebuild_chunk.max(1);
            debug!(affected, chunk, "批量修改，空间索引改为分帧重建");
            self.rebuild_task = Some(self.scheduler.schedule_after(Duration::ZERO, move |ws: &mut Workspace| {
                if !ws.index.is_rebuilding() || ws.index.rebuild_step(&ws.scene, chunk) {
                    TaskOutcome::Done
                } else {
                    TaskOutcome::Reschedule(Duration::ZERO)
                }
            }));
        } else {
            ws.index.invalidate();
        }
        ws.grips.invalidate();
        ws.dirty.content = true;
        ws.dirty.interaction = true;
        if ws.grips.is_dragging() || self.draft.is_active() {
            ws.dirty.preview = true;
        }

        let revision = ws.scene.revision();
        self.events.emit(&SessionEvent::SceneChanged { revision });
        if selection_changed {
            let selection = self.workspace.selection.clone();
            self.events.emit(&SessionEvent::SelectionChanged { selection });
        }
    }

    // ---- 选择与夹点 ----

    /// 设置选择集；不存在的 ID 被忽略，重复的只保留一次。
    pub fn set_selection(&mut self, ids: &[EntityId]) {
        let mut selection: Vec<EntityId> = Vec::with_capacity(ids.len());
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if self.workspace.scene.contains(*id) && seen.insert(*id) {
                selection.push(*id);
            }
        }
        if selection == self.workspace.selection {
            return;
        }
        self.workspace.selection = selection.clone();
        self.workspace.grips.invalidate();
        self.workspace.dirty.interaction = true;
        self.events.emit(&SessionEvent::SelectionChanged { selection });
    }

    pub fn clear_selection(&mut self) {
        self.set_selection(&[]);
    }

    /// 当前选择集的夹点，必要时先重建。
    pub fn grips(&mut self) -> &[Grip] {
        self.workspace.ensure_grips();
        self.workspace.grips.grips()
    }

    // ---- 命中与捕捉 ----

    pub fn hit_test(&mut self, screen: ScreenPoint) -> Option<HitTarget> {
        self.workspace.ensure_index();
        self.workspace.ensure_grips();
        let ws = &self.workspace;
        HitTester::new(&ws.scene, &ws.index)
            .with_grips(&ws.grips)
            .hit_test(screen, &ws.viewport, self.viewer.aperture_px)
    }

    pub fn snap(&mut self, screen: ScreenPoint) -> Option<SnapCandidate> {
        self.workspace.ensure_index();
        let last_point = self
            .workspace
            .grips
            .hot()
            .map(|grip| grip.position)
            .or_else(|| self.draft.last_point());
        let query = SnapQuery::at(screen).with_last_point(last_point);
        let ws = &self.workspace;
        self.snap.resolve(&query, &ws.scene, &ws.index, &ws.viewport)
    }

    pub fn set_snap_enabled(&mut self, kind: SnapKind, enabled: bool) -> bool {
        self.snap.set_enabled(kind, enabled)
    }

    fn snapping_active(&self) -> bool {
        self.workspace.grips.is_dragging() || self.draft.tool() != Tool::Select
    }

    /// 捕捉后的世界坐标；未捕捉时使用原始光标点。
    fn resolve_point(&mut self, screen: ScreenPoint) -> Point2 {
        let candidate = if self.snapping_active() { self.snap(screen) } else { None };
        if candidate != self.workspace.snap_marker {
            self.workspace.snap_marker = candidate;
            self.workspace.dirty.interaction = true;
        }
        candidate.map_or_else(|| self.screen_to_world(screen), |c| c.point)
    }

    fn emit_transitions(&mut self, transitions: Vec<GripTransition>) {
        if transitions.is_empty() {
            return;
        }
        self.workspace.dirty.interaction = true;
        for transition in transitions {
            self.events.emit(&SessionEvent::GripChanged(transition));
        }
    }

    // ---- 指针事件 ----

    pub fn pointer_move(&mut self, screen: ScreenPoint) -> Option<SnapCandidate> {
        self.workspace.ensure_grips();
        let world = self.resolve_point(screen);
        if self.workspace.grips.is_dragging() {
            let ws = &mut self.workspace;
            ws.grips.pointer_drag(world);
            ws.preview = ws.grips.draft(&ws.scene).map(|(_, geometry)| geometry);
            ws.dirty.preview = true;
        } else {
            let aperture = self.viewer.aperture_px;
            let ws = &mut self.workspace;
            let transitions = ws.grips.pointer_move(screen, &ws.viewport, aperture);
            self.emit_transitions(transitions);
            if self.draft.is_active() {
                self.workspace.preview = self.draft.preview(world);
                self.workspace.dirty.preview = true;
            }
        }
        self.workspace.snap_marker
    }

    pub fn pointer_down(&mut self, screen: ScreenPoint) -> Result<PointerAction, CommandError> {
        self.workspace.ensure_index();
        self.workspace.ensure_grips();
        let aperture = self.viewer.aperture_px;
        {
            let ws = &mut self.workspace;
            let transitions = ws.grips.pointer_move(screen, &ws.viewport, aperture);
            self.emit_transitions(transitions);
        }
        if self.workspace.grips.warm().is_some() {
            let world = self.screen_to_world(screen);
            if let Some(transition) = self.workspace.grips.pointer_down(world) {
                let grip = transition.grip;
                self.emit_transitions(vec![transition]);
                return Ok(PointerAction::GripPressed(grip));
            }
        }

        if self.draft.tool() == Tool::Select {
            let hit = {
                let ws = &self.workspace;
                HitTester::new(&ws.scene, &ws.index).hit_entity(screen, &ws.viewport, aperture)
            };
            let selected = hit.map(|info| info.entity);
            match selected {
                Some(id) => self.set_selection(&[id]),
                None => self.clear_selection(),
            }
            return Ok(PointerAction::Selected(selected));
        }

        let world = self.resolve_point(screen);
        match self.draft.add_point(world) {
            Some(geometry) => {
                self.workspace.preview = None;
                self.workspace.dirty.preview = true;
                let id = self.add_geometry(geometry)?;
                Ok(PointerAction::Committed(id))
            }
            None if self.draft.is_active() => Ok(PointerAction::DraftPoint(world)),
            None => Ok(PointerAction::None),
        }
    }

    /// 释放：拖动夹点时执行概括整次拖动的唯一命令。返回是否执行了命令。
    pub fn pointer_up(&mut self, screen: ScreenPoint) -> Result<bool, CommandError> {
        if !self.workspace.grips.is_dragging() {
            return Ok(false);
        }
        let world = self.resolve_point(screen);
        let release = {
            let ws = &mut self.workspace;
            ws.grips.pointer_drag(world);
            ws.preview = None;
            ws.dirty.preview = true;
            ws.grips.pointer_up(&ws.scene)
        };
        self.workspace.snap_marker = None;
        self.emit_transitions(release.transitions);
        match release.command {
            Some(command) => self.execute(command).map(|()| true),
            None => Ok(false),
        }
    }

    pub fn pointer_leave(&mut self) {
        let transitions = self.workspace.grips.pointer_leave();
        self.emit_transitions(transitions);
        let ws = &mut self.workspace;
        if ws.snap_marker.take().is_some() {
            ws.dirty.interaction = true;
        }
        if ws.preview.take().is_some() {
            ws.dirty.preview = true;
        }
    }

    // ---- 工具与草稿 ----

    pub fn set_tool(&mut self, tool: Tool) {
        if tool == self.draft.tool() {
            return;
        }
        self.draft.set_tool(tool);
        self.workspace.preview = None;
        self.workspace.snap_marker = None;
        self.workspace.dirty.preview = true;
        self.workspace.dirty.interaction = true;
        self.events.emit(&SessionEvent::ToolChanged { tool });
    }

    /// 结束多点草稿并提交。
    pub fn finish_draft(&mut self) -> Result<Option<EntityId>, CommandError> {
        let Some(geometry) = self.draft.finish() else {
            return Ok(None);
        };
        self.workspace.preview = None;
        self.workspace.dirty.preview = true;
        self.add_geometry(geometry).map(Some)
    }

    /// 放弃草稿，不构造任何命令。
    pub fn cancel_draft(&mut self) -> bool {
        let cancelled = self.draft.cancel();
        if self.workspace.preview.take().is_some() {
            self.workspace.dirty.preview = true;
        }
        if cancelled {
            debug!(tool = ?self.draft.tool(), "草稿已取消");
        }
        cancelled
    }

    // ---- 视口 ----

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if viewport == self.workspace.viewport {
            return;
        }
        self.workspace.viewport = viewport;
        self.workspace.dirty = DirtyFlags::all();
        self.events.emit(&SessionEvent::ViewportChanged { viewport });
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        let next = self.workspace.viewport.panned_by(dx, dy);
        self.set_viewport(next);
    }

    pub fn zoom_at(&mut self, anchor: ScreenPoint, factor: f64) {
        let next = self
            .workspace
            .viewport
            .zoomed_at(anchor, factor, self.viewer.min_scale, self.viewer.max_scale);
        self.set_viewport(next);
    }

    fn canvas_center(&self) -> ScreenPoint {
        let viewport = &self.workspace.viewport;
        ScreenPoint::new(viewport.canvas_width() * 0.5, viewport.canvas_height() * 0.5)
    }

    pub fn zoom_in(&mut self) {
        self.zoom_at(self.canvas_center(), self.viewer.zoom_step);
    }

    pub fn zoom_out(&mut self) {
        self.zoom_at(self.canvas_center(), 1.0 / self.viewer.zoom_step);
    }

    /// 比例回到 1，保持画布中心的世界点不动。
    pub fn reset_zoom(&mut self) {
        let factor = 1.0 / self.workspace.viewport.scale();
        self.zoom_at(self.canvas_center(), factor);
    }

    /// 缩放到完整显示场景；空场景不变。
    pub fn zoom_to_fit(&mut self) {
        let Some(bounds) = self.workspace.scene.bounds() else {
            return;
        };
        let next = self.workspace.viewport.fit_to_bounds(
            &bounds,
            self.viewer.fit_margin_px,
            self.viewer.min_scale,
            self.viewer.max_scale,
        );
        self.set_viewport(next);
    }

    pub fn resize(&mut self, canvas_width: f64, canvas_height: f64) {
        let next = self.workspace.viewport.resized(canvas_width, canvas_height);
        self.set_viewport(next);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use zdraft_core::document::{Circle, Layer, Leader, Line};

    use super::*;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.viewer.canvas_width = 800.0;
        config.viewer.canvas_height = 600.0;
        config
    }

    fn line_session() -> (ViewerSession, EntityId) {
        let mut session = ViewerSession::new(&config());
        let id = session
            .add_geometry(Geometry::Line(Line {
                start: Point2::new(100.0, 100.0),
                end: Point2::new(200.0, 100.0),
            }))
            .expect("添加直线");
        (session, id)
    }

    #[test]
    fn default_systems_render_each_surface_once() {
        let (mut session, _) = line_session();
        let report = session.tick(Duration::from_millis(16));
        assert_eq!(report.rendered, vec![PREVIEW_SYSTEM, INTERACTION_SYSTEM, CONTENT_SYSTEM]);
        assert!(session.frame().polyline_count() >= 1);
        let idle = session.tick(Duration::from_millis(32));
        assert!(idle.skipped);
    }

    #[test]
    fn select_then_drag_end_grip_executes_single_reshape() {
        let (mut session, id) = line_session();
        let end = session.world_to_screen(Point2::new(200.0, 100.0));
        assert_eq!(
            session.pointer_down(end).expect("选择"),
            PointerAction::Selected(Some(id))
        );
        assert_eq!(session.grips().len(), 3);

        let action = session.pointer_down(end).expect("按下夹点");
        assert!(matches!(action, PointerAction::GripPressed(grip) if grip.entity == id));
        for step in 1..=5 {
            session.pointer_move(ScreenPoint::new(end.x + step as f64 * 3.0, end.y - 37.0));
        }
        assert!(session.workspace().preview().is_some());
        let depth = session.history().undo_len();
        assert!(session.pointer_up(ScreenPoint::new(end.x + 15.0, end.y - 37.0)).expect("释放"));
        assert_eq!(session.history().undo_len(), depth + 1);
        assert!(matches!(session.history().last(), Some(Command::ReshapeEntity { .. })));
        assert!(session.workspace().preview().is_none());

        assert!(session.undo().expect("撤销"));
        match &session.scene().entity(id).expect("实体").geometry {
            Geometry::Line(line) => assert_eq!(line.end, Point2::new(200.0, 100.0)),
            other => panic!("意外几何: {other:?}"),
        }
    }

    #[test]
    fn drawing_a_line_commits_once_and_cancel_commits_nothing() {
        let mut session = ViewerSession::new(&config());
        session.set_snap_enabled(SnapKind::Grid, false);
        session.set_tool(Tool::Line);
        let a = session.world_to_screen(Point2::new(0.0, 0.0));
        let b = session.world_to_screen(Point2::new(50.0, 10.0));
        assert!(matches!(session.pointer_down(a).expect("第一点"), PointerAction::DraftPoint(_)));
        session.pointer_move(b);
        assert!(session.workspace().preview().is_some());
        let committed = session.pointer_down(b).expect("第二点");
        assert!(matches!(committed, PointerAction::Committed(_)));
        assert_eq!(session.scene().len(), 1);

        session.set_tool(Tool::Polyline);
        let depth = session.history().undo_len();
        session.pointer_down(a).expect("折线第一点");
        session.pointer_down(b).expect("折线第二点");
        assert!(session.cancel_draft());
        assert_eq!(session.history().undo_len(), depth);
        assert_eq!(session.finish_draft().expect("无草稿"), None);
    }

    #[test]
    fn events_describe_state_changes() {
        let (mut session, id) = line_session();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        session.subscribe(move |event| sink.borrow_mut().push(event.clone()));
        session.set_selection(&[id, id, EntityId::new(999)]);
        session.set_tool(Tool::Circle);
        session.pan_by(10.0, 0.0);
        session.delete_selection().expect("删除");
        let seen = seen.borrow();
        assert_eq!(seen[0], SessionEvent::SelectionChanged { selection: vec![id] });
        assert_eq!(seen[1], SessionEvent::ToolChanged { tool: Tool::Circle });
        assert!(matches!(seen[2], SessionEvent::ViewportChanged { .. }));
        assert!(matches!(seen[3], SessionEvent::SceneChanged { .. }));
        assert_eq!(seen[4], SessionEvent::SelectionChanged { selection: Vec::new() });
    }

    #[test]
    fn bulk_edit_rebuilds_index_across_ticks() {
        let mut config = config();
        config.spatial.bulk_threshold = 10;
        config.spatial.rebuild_chunk = 8;
        let mut session = ViewerSession::new(&config);
        let entities: Vec<Entity> = (1..=40)
            .map(|i| {
                Entity::new(
                    EntityId::new(i),
                    DEFAULT_LAYER,
                    Geometry::Circle(Circle {
                        center: Point2::new(i as f64 * 30.0, 0.0),
                        radius: 5.0,
                    }),
                )
            })
            .collect();
        session.execute(Command::add_entities(entities)).expect("批量添加");
        assert!(session.workspace().index.is_rebuilding());
        assert_eq!(session.scheduler().pending_tasks(), 1);
        for frame in 1..=6 {
            session.tick(Duration::from_millis(frame * 16));
        }
        assert!(!session.workspace().index.is_rebuilding());
        assert_eq!(session.scheduler().pending_tasks(), 0);
        assert_eq!(session.workspace().index.len(), 40);
        let hit = session.hit_test(session.world_to_screen(Point2::new(305.0, 0.0)));
        assert_eq!(hit.map(|h| h.entity()), Some(EntityId::new(10)));
    }

    #[test]
    fn leader_text_follows_configured_font_size() {
        let mut config = config();
        config.labels.font_size_px = 20.0;
        let mut session = ViewerSession::new(&config);
        session
            .add_geometry(Geometry::Leader(Leader {
                vertices: vec![Point2::new(0.0, 0.0), Point2::new(40.0, 20.0)],
                text: Some("NOTE".to_string()),
            }))
            .expect("引线");
        session.zoom_to_fit();
        session.tick(Duration::from_millis(16));
        let sizes: Vec<f64> = session
            .frame()
            .ops()
            .iter()
            .filter_map(|op| match op {
                render::DrawOp::Text { content, size_px, .. } if content == "NOTE" => Some(*size_px),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![20.0]);
    }

    #[test]
    fn locked_layer_edit_is_rejected_without_history() {
        let mut session = ViewerSession::new(&config());
        session.execute(Command::add_layer(Layer::new("frozen"))).expect("图层");
        session.set_current_layer("frozen").expect("当前图层");
        let id = session
            .add_geometry(Geometry::Circle(Circle {
                center: Point2::ORIGIN,
                radius: 1.0,
            }))
            .expect("圆");
        session
            .execute(Command::set_layer_flags("frozen", None, Some(true)))
            .expect("锁定");
        let depth = session.history().undo_len();
        let err = session
            .execute(Command::move_entities(vec![id], zdraft_core::geometry::Vector2::new(1.0, 0.0)))
            .unwrap_err();
        assert_eq!(err, CommandError::LayerLocked("frozen".to_string()));
        assert_eq!(session.history().undo_len(), depth);
        assert_eq!(session.set_current_layer("missing"), Err(CommandError::LayerNotFound("missing".to_string())));
    }
}
