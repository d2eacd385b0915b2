//! 单线程协作式帧调度器。
//!
//! 每次显示刷新调用一次 [`FrameScheduler::tick`]：先运行到期的一次性任务，
//! 再询问所有渲染系统是否脏，按优先级（Critical → Background，同级按注册顺序）
//! 依次渲染脏系统。单个系统返回错误或 panic 时仅本帧跳过该系统。

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};
use zdraft_config::SchedulerConfig;

use crate::errors::{RenderError, SchedulerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPriority {
    Critical,
    High,
    Normal,
    Background,
}

/// 注册到调度器的渲染系统，`C` 为每帧传入的渲染上下文。
pub trait RenderSystem<C> {
    fn id(&self) -> &str;
    fn priority(&self) -> RenderPriority;
    fn is_dirty(&mut self, ctx: &C) -> bool;
    fn render(&mut self, ctx: &mut C) -> Result<(), RenderError>;
}

/// 由闭包组成的渲染系统。
pub struct FnSystem<R, D> {
    id: String,
    priority: RenderPriority,
    render: R,
    is_dirty: D,
}

impl<C, R, D> RenderSystem<C> for FnSystem<R, D>
where
    R: FnMut(&mut C) -> Result<(), RenderError>,
    D: FnMut(&C) -> bool,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> RenderPriority {
        self.priority
    }

    fn is_dirty(&mut self, ctx: &C) -> bool {
        (self.is_dirty)(ctx)
    }

    fn render(&mut self, ctx: &mut C) -> Result<(), RenderError> {
        (self.render)(ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// 一次性任务的返回值。`Reschedule` 用于把耗时工作拆分到后续帧。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Reschedule(Duration),
}

type Task<C> = Box<dyn FnMut(&mut C) -> TaskOutcome>;
type MetricsCallback = Box<dyn FnMut(&FrameMetrics)>;

struct PendingTask<C> {
    id: TaskId,
    due: Duration,
    key: Option<String>,
    task: Task<C>,
}

/// 周期性发布的帧指标。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub fps: f64,
    pub frame_time_ms: f64,
    pub frames: u64,
}

/// 单次 tick 的结果。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub rendered: Vec<String>,
    pub failed: Vec<(String, RenderError)>,
    pub tasks_run: usize,
    /// 没有任何脏系统，本帧未做渲染工作。
    pub skipped: bool,
}

pub struct FrameScheduler<C> {
    systems: Vec<Box<dyn RenderSystem<C>>>,
    tasks: Vec<PendingTask<C>>,
    subscribers: Vec<(SubscriptionId, MetricsCallback)>,
    frame_times: VecDeque<Duration>,
    last_frame: Option<Duration>,
    now: Duration,
    frames: u64,
    next_task: u64,
    next_subscription: u64,
    state: SchedulerState,
    metrics_window: usize,
    metrics_interval: u64,
}

impl<C> fmt::Debug for FrameScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.systems.iter().map(|s| s.id()).collect();
        f.debug_struct("FrameScheduler")
            .field("state", &self.state)
            .field("systems", &ids)
            .field("tasks", &self.tasks.len())
            .field("frames", &self.frames)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知 panic".to_string()
    }
}

impl<C> FrameScheduler<C> {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            systems: Vec::new(),
            tasks: Vec::new(),
            subscribers: Vec::new(),
            frame_times: VecDeque::new(),
            last_frame: None,
            now: Duration::ZERO,
            frames: 0,
            next_task: 1,
            next_subscription: 1,
            state: SchedulerState::Idle,
            metrics_window: config.metrics_window.max(1),
            metrics_interval: config.metrics_interval.max(1),
        }
    }

    #[inline]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn system_ids(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.id()).collect()
    }

    #[inline]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn register(&mut self, system: Box<dyn RenderSystem<C>>) -> Result<(), SchedulerError> {
        if self.systems.iter().any(|s| s.id() == system.id()) {
            return Err(SchedulerError::DuplicateSystem(system.id().to_string()));
        }
        // 插在同优先级的最后一个之后，保持注册顺序
        let position = self
            .systems
            .iter()
            .position(|s| s.priority() > system.priority())
            .unwrap_or(self.systems.len());
        debug!(system = system.id(), priority = ?system.priority(), "注册渲染系统");
        self.systems.insert(position, system);
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Running;
            info!("帧调度器进入运行状态");
        }
        Ok(())
    }

    pub fn register_fn<R, D>(
        &mut self,
        id: impl Into<String>,
        priority: RenderPriority,
        render: R,
        is_dirty: D,
    ) -> Result<(), SchedulerError>
    where
        R: FnMut(&mut C) -> Result<(), RenderError> + 'static,
        D: FnMut(&C) -> bool + 'static,
    {
        self.register(Box::new(FnSystem {
            id: id.into(),
            priority,
            render,
            is_dirty,
        }))
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        let before = self.systems.len();
        self.systems.retain(|s| s.id() != id);
        let removed = self.systems.len() != before;
        if removed {
            debug!(system = id, "注销渲染系统");
        }
        if self.systems.is_empty() && self.state == SchedulerState::Running {
            self.state = SchedulerState::Idle;
            self.last_frame = None;
            info!("帧调度器回到空闲状态");
        }
        removed
    }

    pub fn subscribe_metrics(&mut self, callback: impl FnMut(&FrameMetrics) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe_metrics(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    fn push_task(&mut self, due: Duration, key: Option<String>, task: Task<C>) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        self.tasks.push(PendingTask { id, due, key, task });
        id
    }

    /// 在下一次 tick 运行。
    pub fn schedule_once(&mut self, task: impl FnMut(&mut C) -> TaskOutcome + 'static) -> TaskId {
        self.push_task(self.now, None, Box::new(task))
    }

    /// 在最近一次 tick 的时间点之后 `delay` 到期。
    pub fn schedule_after(&mut self, delay: Duration, task: impl FnMut(&mut C) -> TaskOutcome + 'static) -> TaskId {
        self.push_task(self.now + delay, None, Box::new(task))
    }

    /// 同一 `key` 只保留最后一次调度，到期时间从本次调用重新计算。
    pub fn debounce(
        &mut self,
        key: impl Into<String>,
        delay: Duration,
        task: impl FnMut(&mut C) -> TaskOutcome + 'static,
    ) -> TaskId {
        let key = key.into();
        self.tasks.retain(|pending| pending.key.as_deref() != Some(key.as_str()));
        self.push_task(self.now + delay, Some(key), Box::new(task))
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|pending| pending.id != id);
        before != self.tasks.len()
    }

    fn run_due_tasks(&mut self, ctx: &mut C) -> usize {
        let mut due: Vec<PendingTask<C>> = Vec::new();
        let mut waiting = Vec::with_capacity(self.tasks.len());
        for pending in self.tasks.drain(..) {
            if pending.due <= self.now {
                due.push(pending);
            } else {
                waiting.push(pending);
            }
        }
        self.tasks = waiting;
        due.sort_by_key(|pending| (pending.due, pending.id));

        let count = due.len();
        for mut pending in due {
            let outcome = catch_unwind(AssertUnwindSafe(|| (pending.task)(ctx)));
            match outcome {
                Ok(TaskOutcome::Done) => {}
                Ok(TaskOutcome::Reschedule(delay)) => {
                    pending.due = self.now + delay;
                    self.tasks.push(pending);
                }
                Err(payload) => {
                    error!(task = pending.id.0, error = %panic_message(payload.as_ref()), "一次性任务 panic，已丢弃");
                }
            }
        }
        count
    }

    /// 推进一帧。`now` 为单调时间戳。
    pub fn tick(&mut self, ctx: &mut C, now: Duration) -> TickReport {
        self.now = now.max(self.now);
        let mut report = TickReport {
            tasks_run: self.run_due_tasks(ctx),
            ..TickReport::default()
        };
        if self.state == SchedulerState::Idle {
            report.skipped = true;
            return report;
        }

        let mut dirty = Vec::with_capacity(self.systems.len());
        for (i, system) in self.systems.iter_mut().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| system.is_dirty(ctx))) {
                Ok(true) => dirty.push(i),
                Ok(false) => {}
                Err(payload) => {
                    let err = RenderError::Panicked(panic_message(payload.as_ref()));
                    error!(system = system.id(), error = %err, "脏检查失败，本帧跳过");
                    report.failed.push((system.id().to_string(), err));
                }
            }
        }
        if dirty.is_empty() {
            trace!("无脏系统，跳过本帧");
            report.skipped = true;
            return report;
        }

        for i in dirty {
            let system = &mut self.systems[i];
            let result = match catch_unwind(AssertUnwindSafe(|| system.render(ctx))) {
                Ok(result) => result,
                Err(payload) => Err(RenderError::Panicked(panic_message(payload.as_ref()))),
            };
            match result {
                Ok(()) => report.rendered.push(system.id().to_string()),
                Err(err) => {
                    error!(system = system.id(), error = %err, "渲染系统失败，本帧跳过");
                    report.failed.push((system.id().to_string(), err));
                }
            }
        }
        self.record_frame(now);
        report
    }

    fn record_frame(&mut self, now: Duration) {
        if let Some(last) = self.last_frame {
            self.frame_times.push_back(now.saturating_sub(last));
            while self.frame_times.len() > self.metrics_window {
                self.frame_times.pop_front();
            }
        }
        self.last_frame = Some(now);
        self.frames += 1;
        if self.frames % self.metrics_interval == 0 {
            if let Some(metrics) = self.metrics() {
                for (_, callback) in self.subscribers.iter_mut() {
                    callback(&metrics);
                }
            }
        }
    }

    /// 滚动窗口内的平均帧间隔与帧率；不足两帧时为 `None`。
    pub fn metrics(&self) -> Option<FrameMetrics> {
        if self.frame_times.is_empty() {
            return None;
        }
        let total: Duration = self.frame_times.iter().sum();
        let frame_time_ms = total.as_secs_f64() * 1000.0 / self.frame_times.len() as f64;
        let fps = if frame_time_ms > 0.0 { 1000.0 / frame_time_ms } else { 0.0 };
        Some(FrameMetrics {
            fps,
            frame_time_ms,
            frames: self.frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    type Log = Vec<String>;

    fn scheduler() -> FrameScheduler<Log> {
        FrameScheduler::new(&SchedulerConfig {
            metrics_window: 4,
            metrics_interval: 2,
        })
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn register_logger(s: &mut FrameScheduler<Log>, id: &'static str, priority: RenderPriority) {
        s.register_fn(
            id,
            priority,
            move |log: &mut Log| {
                log.push(id.to_string());
                Ok(())
            },
            |_: &Log| true,
        )
        .expect("注册");
    }

    #[test]
    fn dirty_systems_render_in_priority_then_registration_order() {
        let mut s = scheduler();
        register_logger(&mut s, "background", RenderPriority::Background);
        register_logger(&mut s, "normal-a", RenderPriority::Normal);
        register_logger(&mut s, "critical", RenderPriority::Critical);
        register_logger(&mut s, "normal-b", RenderPriority::Normal);
        let mut log = Log::new();
        let report = s.tick(&mut log, ms(16));
        assert_eq!(log, vec!["critical", "normal-a", "normal-b", "background"]);
        assert_eq!(report.rendered, log);
    }

    #[test]
    fn failing_system_does_not_block_others() {
        let mut s = scheduler();
        register_logger(&mut s, "first", RenderPriority::Critical);
        s.register_fn(
            "broken",
            RenderPriority::High,
            |_: &mut Log| -> Result<(), RenderError> { panic!("boom") },
            |_: &Log| true,
        )
        .expect("注册");
        s.register_fn(
            "erroring",
            RenderPriority::High,
            |_: &mut Log| Err(RenderError::Failed("缺少资源".to_string())),
            |_: &Log| true,
        )
        .expect("注册");
        register_logger(&mut s, "last", RenderPriority::Background);
        let mut log = Log::new();
        let report = s.tick(&mut log, ms(16));
        assert_eq!(log, vec!["first", "last"]);
        assert_eq!(report.failed.len(), 2);
        assert!(matches!(&report.failed[0], (id, RenderError::Panicked(msg)) if id == "broken" && msg == "boom"));
        let report = s.tick(&mut log, ms(32));
        assert_eq!(report.failed.len(), 2);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn clean_tick_is_skipped() {
        let mut s = scheduler();
        s.register_fn("quiet", RenderPriority::Normal, |_: &mut Log| Ok(()), |_: &Log| false)
            .expect("注册");
        let mut log = Log::new();
        let report = s.tick(&mut log, ms(16));
        assert!(report.skipped);
        assert!(report.rendered.is_empty());
        assert_eq!(s.frames(), 0);
    }

    #[test]
    fn state_follows_registrations() {
        let mut s = scheduler();
        assert_eq!(s.state(), SchedulerState::Idle);
        register_logger(&mut s, "a", RenderPriority::Normal);
        assert_eq!(s.state(), SchedulerState::Running);
        assert_eq!(
            s.register_fn("a", RenderPriority::High, |_: &mut Log| Ok(()), |_: &Log| true),
            Err(SchedulerError::DuplicateSystem("a".to_string()))
        );
        assert!(s.unregister("a"));
        assert!(!s.unregister("a"));
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[test]
    fn delayed_and_debounced_tasks_ride_the_tick() {
        let mut s = scheduler();
        s.schedule_after(ms(50), |log: &mut Log| {
            log.push("delayed".to_string());
            TaskOutcome::Done
        });
        s.debounce("layout", ms(20), |log: &mut Log| {
            log.push("layout-1".to_string());
            TaskOutcome::Done
        });
        s.debounce("layout", ms(20), |log: &mut Log| {
            log.push("layout-2".to_string());
            TaskOutcome::Done
        });
        let cancelled = s.schedule_once(|log: &mut Log| {
            log.push("cancelled".to_string());
            TaskOutcome::Done
        });
        assert!(s.cancel(cancelled));

        let mut log = Log::new();
        s.tick(&mut log, ms(10));
        assert!(log.is_empty());
        s.tick(&mut log, ms(25));
        assert_eq!(log, vec!["layout-2"]);
        s.tick(&mut log, ms(60));
        assert_eq!(log, vec!["layout-2", "delayed"]);
        assert_eq!(s.pending_tasks(), 0);
    }

    #[test]
    fn rescheduled_task_is_chunked_across_ticks() {
        let mut s = scheduler();
        let remaining = Rc::new(Cell::new(3));
        let counter = remaining.clone();
        s.schedule_once(move |log: &mut Log| {
            log.push(format!("chunk-{}", counter.get()));
            counter.set(counter.get() - 1);
            if counter.get() == 0 {
                TaskOutcome::Done
            } else {
                TaskOutcome::Reschedule(Duration::ZERO)
            }
        });
        let mut log = Log::new();
        for frame in 1..=5 {
            s.tick(&mut log, ms(frame * 16));
        }
        assert_eq!(log, vec!["chunk-3", "chunk-2", "chunk-1"]);
        assert_eq!(remaining.get(), 0);
    }

    #[test]
    fn metrics_published_every_interval() {
        let mut s = scheduler();
        register_logger(&mut s, "a", RenderPriority::Normal);
        let published = Rc::new(RefCell::new(Vec::new()));
        let sink = published.clone();
        s.subscribe_metrics(move |m: &FrameMetrics| sink.borrow_mut().push(*m));
        let mut log = Log::new();
        for frame in 0..4 {
            s.tick(&mut log, ms(frame * 20));
        }
        let published = published.borrow();
        assert_eq!(published.len(), 2);
        let last = published[1];
        assert!((last.frame_time_ms - 20.0).abs() < 1e-9);
        assert!((last.fps - 50.0).abs() < 1e-9);
        assert_eq!(last.frames, 4);
    }
}
