pub mod command;
pub mod compositor;
pub mod draft;
pub mod grips;
pub mod hit;
pub mod labels;
pub mod render;
pub mod scene;
pub mod scheduler;
pub mod session;
pub mod snap;
pub mod spatial;

pub mod errors {
    use thiserror::Error;

    /// 命令前置条件不满足。返回该错误时场景保持原状。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum CommandError {
        #[error("实体 {0} 不存在")]
        EntityNotFound(u64),
        #[error("实体 {0} 已存在")]
        DuplicateEntity(u64),
        #[error("实体 {0} 在同一命令中重复出现")]
        RepeatedEntity(u64),
        #[error("实体 {0} 的几何数据无效")]
        MalformedGeometry(u64),
        #[error("实体 {0} 的当前几何与命令记录不一致")]
        StaleGeometry(u64),
        #[error("图层 {0} 已锁定")]
        LayerLocked(String),
        #[error("图层 {0} 不存在")]
        LayerNotFound(String),
        #[error("图层 {0} 已存在")]
        DuplicateLayer(String),
        #[error("无效参数: {0}")]
        InvalidArgument(String),
        #[error("命令不包含任何操作")]
        Empty,
    }

    /// 渲染系统在一帧内的失败。调度器记录后跳过该系统。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum RenderError {
        #[error("渲染失败: {0}")]
        Failed(String),
        #[error("渲染系统发生 panic: {0}")]
        Panicked(String),
    }

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum SchedulerError {
        #[error("渲染系统 {0} 已注册")]
        DuplicateSystem(String),
    }

    /// 图层合成器的初始化配置错误。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum CompositorError {
        #[error("合成器至少需要一个绘制面")]
        Empty,
        #[error("绘制面名称重复: {0}")]
        DuplicateName(String),
        #[error("绘制面层级重复: {0}")]
        DuplicateZOrder(i32),
        #[error("不透明绘制面 {0} 位于底层之上")]
        OpaqueAboveBase(String),
    }
}

pub mod ids {
    use zdraft_core::document::EntityId;

    use crate::scene::Scene;

    /// 场景之外的实体 ID 分配器，保证新 ID 不与已有实体冲突。
    #[derive(Debug, Clone)]
    pub struct IdAllocator {
        next: u64,
    }

    impl IdAllocator {
        pub fn new() -> Self {
            Self { next: 1 }
        }

        /// 从现有场景的最大 ID 之后继续分配。
        pub fn after(scene: &Scene) -> Self {
            let next = scene
                .entities()
                .map(|entity| entity.id.get())
                .max()
                .map_or(1, |max| max.saturating_add(1));
            Self { next }
        }

        pub fn allocate(&mut self) -> EntityId {
            let id = EntityId::new(self.next);
            self.next = self.next.saturating_add(1);
            id
        }

        /// 外部提供的 ID（如重放命令）被占用后调用，避免后续冲突。
        pub fn observe(&mut self, id: EntityId) {
            if id.get() >= self.next {
                self.next = id.get().saturating_add(1);
            }
        }
    }

    impl Default for IdAllocator {
        fn default() -> Self {
            Self::new()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn allocator_skips_observed_ids() {
            let mut ids = IdAllocator::new();
            assert_eq!(ids.allocate().get(), 1);
            ids.observe(EntityId::new(10));
            assert_eq!(ids.allocate().get(), 11);
            ids.observe(EntityId::new(3));
            assert_eq!(ids.allocate().get(), 12);
        }
    }
}
