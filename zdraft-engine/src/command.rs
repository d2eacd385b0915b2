use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zdraft_core::document::{Entity, EntityId, Geometry, Layer, Style};
use zdraft_core::geometry::Vector2;

use crate::errors::CommandError;
use crate::scene::Scene;

/// 删除时记录的原位置与实体，撤销时按位置插回。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedEntity {
    pub index: usize,
    pub entity: Entity,
}

/// 可逆、可序列化的场景修改。
///
/// `apply` 先校验全部前置条件再修改场景，失败时场景保持不变。
/// 执行时捕获撤销所需的原始状态（删除的实体、移动前的几何等），
/// 因此撤销是精确还原而不是反向运算。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    AddEntities {
        entities: Vec<Entity>,
    },
    DeleteEntities {
        ids: Vec<EntityId>,
        #[serde(default)]
        removed: Vec<RemovedEntity>,
    },
    MoveEntities {
        ids: Vec<EntityId>,
        delta: Vector2,
        #[serde(default)]
        before: Vec<(EntityId, Geometry)>,
    },
    ReshapeEntity {
        id: EntityId,
        before: Geometry,
        after: Geometry,
    },
    SetStyle {
        ids: Vec<EntityId>,
        style: Style,
        #[serde(default)]
        before: Vec<(EntityId, Style)>,
    },
    AddLayer {
        layer: Layer,
    },
    SetLayerFlags {
        name: String,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        locked: Option<bool>,
        #[serde(default)]
        before: Option<(bool, bool)>,
    },
    Composite {
        label: String,
        commands: Vec<Command>,
    },
}

impl Command {
    pub fn add_entities(entities: Vec<Entity>) -> Self {
        Command::AddEntities { entities }
    }

    pub fn delete_entities(ids: Vec<EntityId>) -> Self {
        Command::DeleteEntities {
            ids,
            removed: Vec::new(),
        }
    }

    pub fn move_entities(ids: Vec<EntityId>, delta: Vector2) -> Self {
        Command::MoveEntities {
            ids,
            delta,
            before: Vec::new(),
        }
    }

    pub fn reshape(id: EntityId, before: Geometry, after: Geometry) -> Self {
        Command::ReshapeEntity { id, before, after }
    }

    pub fn set_style(ids: Vec<EntityId>, style: Style) -> Self {
        Command::SetStyle {
            ids,
            style,
            before: Vec::new(),
        }
    }

    pub fn add_layer(layer: Layer) -> Self {
        Command::AddLayer { layer }
    }

    pub fn set_layer_flags(name: impl Into<String>, visible: Option<bool>, locked: Option<bool>) -> Self {
        Command::SetLayerFlags {
            name: name.into(),
            visible,
            locked,
            before: None,
        }
    }

    pub fn composite(label: impl Into<String>, commands: Vec<Command>) -> Self {
        Command::Composite {
            label: label.into(),
            commands,
        }
    }

    /// 审计日志中使用的动作名。
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddEntities { .. } => "add_entities",
            Command::DeleteEntities { .. } => "delete_entities",
            Command::MoveEntities { .. } => "move_entities",
            Command::ReshapeEntity { .. } => "reshape_entity",
            Command::SetStyle { .. } => "set_style",
            Command::AddLayer { .. } => "add_layer",
            Command::SetLayerFlags { .. } => "set_layer_flags",
            Command::Composite { .. } => "composite",
        }
    }

    /// 受影响的实体数量，会话据此决定是否分帧重建索引。
    pub fn affected_count(&self) -> usize {
        match self {
            Command::AddEntities { entities } => entities.len(),
            Command::DeleteEntities { ids, .. }
            | Command::MoveEntities { ids, .. }
            | Command::SetStyle { ids, .. } => ids.len(),
            Command::ReshapeEntity { .. } => 1,
            Command::AddLayer { .. } | Command::SetLayerFlags { .. } => 0,
            Command::Composite { commands, .. } => commands.iter().map(Command::affected_count).sum(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn apply(&mut self, scene: &mut Scene) -> Result<(), CommandError> {
        match self {
            Command::AddEntities { entities } => {
                if entities.is_empty() {
                    return Err(CommandError::Empty);
                }
                let mut batch = HashSet::new();
                for entity in entities.iter() {
                    if scene.contains(entity.id) {
                        return Err(CommandError::DuplicateEntity(entity.id.get()));
                    }
                    if !batch.insert(entity.id) {
                        return Err(CommandError::RepeatedEntity(entity.id.get()));
                    }
                    if !entity.geometry.is_well_formed() {
                        return Err(CommandError::MalformedGeometry(entity.id.get()));
                    }
                    let layer = scene
                        .layer(&entity.layer)
                        .ok_or_else(|| CommandError::LayerNotFound(entity.layer.clone()))?;
                    if layer.locked {
                        return Err(CommandError::LayerLocked(layer.name.clone()));
                    }
                }
                for entity in entities.iter() {
                    scene.push_entity(entity.clone());
                }
                Ok(())
            }
            Command::DeleteEntities { ids, removed } => {
                check_ids(scene, ids)?;
                for id in ids.iter() {
                    if let Some(entity) = scene.entity(*id) {
                        // 删除只看实体自身引用的图层，悬空引用不回退到默认图层。
                        if scene.layer(&entity.layer).is_some_and(|layer| layer.locked) {
                            return Err(CommandError::LayerLocked(entity.layer.clone()));
                        }
                    }
                }
                let targets: HashSet<EntityId> = ids.iter().copied().collect();
                let captured: Vec<RemovedEntity> = scene
                    .remove_entities(&targets)
                    .into_iter()
                    .map(|(index, entity)| RemovedEntity { index, entity })
                    .collect();
                *removed = captured;
                Ok(())
            }
            Command::MoveEntities { ids, delta, before } => {
                if !delta.is_finite() {
                    return Err(CommandError::InvalidArgument("平移量必须为有限值".to_string()));
                }
                check_editable(scene, ids)?;
                let mut captured = Vec::with_capacity(ids.len());
                let mut moved = Vec::with_capacity(ids.len());
                for id in ids.iter() {
                    let entity = scene
                        .entity(*id)
                        .ok_or(CommandError::EntityNotFound(id.get()))?;
                    let translated = entity.geometry.translated(*delta);
                    if !translated.is_well_formed() {
                        return Err(CommandError::MalformedGeometry(id.get()));
                    }
                    captured.push((*id, entity.geometry.clone()));
                    moved.push((*id, translated));
                }
                for (id, geometry) in moved {
                    scene.replace_geometry(id, geometry);
                }
                *before = captured;
                Ok(())
            }
            Command::ReshapeEntity { id, before, after } => {
                check_editable(scene, std::slice::from_ref(id))?;
                if !after.is_well_formed() {
                    return Err(CommandError::MalformedGeometry(id.get()));
                }
                let current = scene.entity(*id).map(|entity| &entity.geometry);
                if current != Some(&*before) {
                    return Err(CommandError::StaleGeometry(id.get()));
                }
                scene.replace_geometry(*id, after.clone());
                Ok(())
            }
            Command::SetStyle { ids, style, before } => {
                if !(0.0..=1.0).contains(&style.opacity) {
                    return Err(CommandError::InvalidArgument(format!(
                        "不透明度 {} 超出 [0, 1]",
                        style.opacity
                    )));
                }
                check_editable(scene, ids)?;
                let captured: Vec<(EntityId, Style)> = ids
                    .iter()
                    .filter_map(|id| scene.entity(*id).map(|entity| (*id, entity.style)))
                    .collect();
                for id in ids.iter() {
                    scene.replace_style(*id, *style);
                }
                *before = captured;
                Ok(())
            }
            Command::AddLayer { layer } => {
                if layer.name.trim().is_empty() {
                    return Err(CommandError::InvalidArgument("图层名不能为空".to_string()));
                }
                if scene.layer(&layer.name).is_some() {
                    return Err(CommandError::DuplicateLayer(layer.name.clone()));
                }
                scene.insert_layer(layer.clone());
                Ok(())
            }
            Command::SetLayerFlags {
                name,
                visible,
                locked,
                before,
            } => {
                let layer = scene
                    .layer(name)
                    .ok_or_else(|| CommandError::LayerNotFound(name.clone()))?;
                let previous = (layer.visible, layer.locked);
                scene.set_layer_flags(
                    name,
                    visible.unwrap_or(previous.0),
                    locked.unwrap_or(previous.1),
                );
                *before = Some(previous);
                Ok(())
            }
            Command::Composite { label, commands } => {
                if commands.is_empty() {
                    return Err(CommandError::Empty);
                }
                for i in 0..commands.len() {
                    if let Err(err) = commands[i].apply(scene) {
                        for applied in commands[..i].iter_mut().rev() {
                            if let Err(rollback) = applied.undo(scene) {
                                warn!(label = %label, error = %rollback, "组合命令回滚失败");
                            }
                        }
                        return Err(err);
                    }
                }
                Ok(())
            }
        }
    }

    pub fn undo(&mut self, scene: &mut Scene) -> Result<(), CommandError> {
        match self {
            Command::AddEntities { entities } => {
                let ids: Vec<EntityId> = entities.iter().map(|entity| entity.id).collect();
                check_ids(scene, &ids)?;
                scene.remove_entities(&ids.into_iter().collect());
                Ok(())
            }
            Command::DeleteEntities { removed, .. } => {
                for record in removed.iter() {
                    if scene.contains(record.entity.id) {
                        return Err(CommandError::DuplicateEntity(record.entity.id.get()));
                    }
                }
                scene.restore_entities(
                    removed
                        .iter()
                        .map(|record| (record.index, record.entity.clone()))
                        .collect(),
                );
                Ok(())
            }
            Command::MoveEntities { before, .. } => restore_geometry(scene, before),
            Command::ReshapeEntity { id, before, after } => {
                let current = scene.entity(*id).map(|entity| &entity.geometry);
                if current.is_none() {
                    return Err(CommandError::EntityNotFound(id.get()));
                }
                if current != Some(&*after) {
                    return Err(CommandError::StaleGeometry(id.get()));
                }
                scene.replace_geometry(*id, before.clone());
                Ok(())
            }
            Command::SetStyle { before, .. } => {
                let ids: Vec<EntityId> = before.iter().map(|(id, _)| *id).collect();
                check_ids(scene, &ids)?;
                for (id, style) in before.iter() {
                    scene.replace_style(*id, *style);
                }
                Ok(())
            }
            Command::AddLayer { layer } => {
                if scene.entities().any(|entity| entity.layer == layer.name) {
                    return Err(CommandError::InvalidArgument(format!(
                        "图层 {} 仍被实体引用",
                        layer.name
                    )));
                }
                scene
                    .remove_layer(&layer.name)
                    .map(|_| ())
                    .ok_or_else(|| CommandError::LayerNotFound(layer.name.clone()))
            }
            Command::SetLayerFlags { name, before, .. } => {
                let (visible, locked) =
                    before.ok_or_else(|| CommandError::InvalidArgument("命令尚未执行".to_string()))?;
                if scene.set_layer_flags(name, visible, locked) {
                    Ok(())
                } else {
                    Err(CommandError::LayerNotFound(name.clone()))
                }
            }
            Command::Composite { label, commands } => {
                let count = commands.len();
                for i in (0..count).rev() {
                    if let Err(err) = commands[i].undo(scene) {
                        for undone in commands[i + 1..].iter_mut() {
                            if let Err(reapply) = undone.apply(scene) {
                                warn!(label = %label, error = %reapply, "组合命令撤销回滚失败");
                            }
                        }
                        return Err(err);
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_ids(scene: &Scene, ids: &[EntityId]) -> Result<(), CommandError> {
    if ids.is_empty() {
        return Err(CommandError::Empty);
    }
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(*id) {
            return Err(CommandError::RepeatedEntity(id.get()));
        }
        if !scene.contains(*id) {
            return Err(CommandError::EntityNotFound(id.get()));
        }
    }
    Ok(())
}

fn check_editable(scene: &Scene, ids: &[EntityId]) -> Result<(), CommandError> {
    check_ids(scene, ids)?;
    for id in ids {
        if let Some(entity) = scene.entity(*id) {
            if !scene.is_editable(entity) {
                return Err(CommandError::LayerLocked(scene.effective_layer(entity).name.clone()));
            }
        }
    }
    Ok(())
}

fn restore_geometry(scene: &mut Scene, before: &[(EntityId, Geometry)]) -> Result<(), CommandError> {
    let ids: Vec<EntityId> = before.iter().map(|(id, _)| *id).collect();
    check_ids(scene, &ids)?;
    for (id, geometry) in before {
        scene.replace_geometry(*id, geometry.clone());
    }
    Ok(())
}

/// 命令记录中的动作类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Execute,
    Undo,
    Redo,
}

/// 交给持久化/审计协作方的命令记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub sequence: u64,
    pub action: CommandAction,
    pub command: Command,
}

/// 审计/持久化协作方。写入失败只记录日志，不影响命令本身。
pub trait CommandSink {
    fn record(&mut self, record: &CommandRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// 撤销/重做栈。撤销栈超过最大深度时丢弃最早的记录。
pub struct CommandStack {
    undo: VecDeque<Command>,
    redo: Vec<Command>,
    max_depth: usize,
    sequence: u64,
    sink: Option<Box<dyn CommandSink>>,
}

impl std::fmt::Debug for CommandStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStack")
            .field("undo", &self.undo.len())
            .field("redo", &self.redo.len())
            .field("max_depth", &self.max_depth)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl CommandStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_depth: max_depth.max(1),
            sequence: 0,
            sink: None,
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn CommandSink>) {
        self.sink = Some(sink);
    }

    #[inline]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    #[inline]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[inline]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 最近一次可撤销的命令。
    pub fn last(&self) -> Option<&Command> {
        self.undo.back()
    }

    /// 下一次重做将执行的命令。
    pub fn next_redo(&self) -> Option<&Command> {
        self.redo.last()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// 执行命令：成功后压入撤销栈并清空重做栈；失败时场景与两个栈都保持不变。
    pub fn execute(&mut self, scene: &mut Scene, mut command: Command) -> Result<(), CommandError> {
        if let Err(err) = command.apply(scene) {
            warn!(command = command.name(), error = %err, "命令执行被拒绝");
            return Err(err);
        }
        debug!(command = command.name(), "命令已执行");
        self.publish(CommandAction::Execute, &command);
        self.redo.clear();
        self.undo.push_back(command);
        while self.undo.len() > self.max_depth {
            if let Some(evicted) = self.undo.pop_front() {
                debug!(command = evicted.name(), "撤销历史超出上限，丢弃最早记录");
            }
        }
        Ok(())
    }

    /// 撤销最近一次命令。栈为空时返回 `Ok(false)`。
    pub fn undo(&mut self, scene: &mut Scene) -> Result<bool, CommandError> {
        let Some(mut command) = self.undo.pop_back() else {
            return Ok(false);
        };
        if let Err(err) = command.undo(scene) {
            warn!(command = command.name(), error = %err, "撤销失败");
            self.undo.push_back(command);
            return Err(err);
        }
        self.publish(CommandAction::Undo, &command);
        self.redo.push(command);
        Ok(true)
    }

    /// 重做最近一次撤销的命令。栈为空时返回 `Ok(false)`。
    pub fn redo(&mut self, scene: &mut Scene) -> Result<bool, CommandError> {
        let Some(mut command) = self.redo.pop() else {
            return Ok(false);
        };
        if let Err(err) = command.apply(scene) {
            warn!(command = command.name(), error = %err, "重做失败");
            self.redo.push(command);
            return Err(err);
        }
        self.publish(CommandAction::Redo, &command);
        self.undo.push_back(command);
        Ok(true)
    }

    fn publish(&mut self, action: CommandAction, command: &Command) {
        self.sequence += 1;
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let record = CommandRecord {
            sequence: self.sequence,
            action,
            command: command.clone(),
        };
        if let Err(err) = sink.record(&record) {
            warn!(sequence = record.sequence, error = %err, "命令审计记录写入失败");
        }
    }
}
