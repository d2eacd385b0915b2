use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use tracing::{info, warn};
use zdraft_config::AppConfig;
use zdraft_core::document::EntityId;
use zdraft_core::geometry::Point2;
use zdraft_engine::draft::Tool;
use zdraft_engine::session::{PointerAction, ViewerSession};

use crate::errors::FrontendError;
use crate::loader::{SceneSource, load_session, load_session_from_env_or_demo};

const FRAME: Duration = Duration::from_millis(16);

/// 一次脚本化演示的结果概览。
#[derive(Debug, Clone, PartialEq)]
pub struct DemoSummary {
    pub source: SceneSource,
    pub layers: Vec<(String, bool, bool)>,
    pub entity_count: usize,
    pub drawn: Option<u64>,
    pub undo_depth: usize,
    pub redo_depth: usize,
    pub frames: u64,
    pub display_ops: usize,
    pub metrics_published: usize,
    pub scale: f64,
}

/// 启动 CLI 演示或返回错误。显式指定的场景文件加载失败时直接报错。
pub fn run_cli_demo(config: &AppConfig, scene: Option<&Path>) -> Result<(), FrontendError> {
    info!("启动 CLI 演示前端");
    let summary = run_demo(config, scene)?;
    print_summary(&summary);
    Ok(())
}

/// 简易 CLI 演示：加载场景后执行一段绘制、拖动夹点、撤销/重做的手势脚本。
/// 未指定场景文件时读取环境变量，仍未找到则使用内置示例。
pub fn run_demo(config: &AppConfig, scene: Option<&Path>) -> Result<DemoSummary, FrontendError> {
    let loaded = match scene {
        Some(path) => load_session(config, path)?,
        None => load_session_from_env_or_demo(config),
    };
    let mut session = loaded.session;
    let published = Rc::new(Cell::new(0usize));
    let counter = published.clone();
    session.subscribe_frame_metrics(move |metrics| {
        counter.set(counter.get() + 1);
        info!(fps = metrics.fps, frame_time_ms = metrics.frame_time_ms, "帧指标");
    });

    let mut clock = Duration::ZERO;
    let mut frame = |session: &mut ViewerSession| {
        clock += FRAME;
        session.tick(clock)
    };
    frame(&mut session);

    let drawn = draw_line(&mut session, Point2::new(0.0, 80.0), Point2::new(40.0, 80.0))?;
    frame(&mut session);
    if let Some(id) = drawn {
        drag_end_grip(&mut session, Point2::new(40.0, 80.0), Point2::new(40.0, 88.0))?;
        frame(&mut session);
        if !session.undo()? {
            warn!("撤销栈为空");
        }
        if !session.redo()? {
            warn!("重做栈为空");
        }
        info!(entity = id.get(), "演示手势完成");
    }
    for _ in 0..4 {
        frame(&mut session);
    }

    let scene = session.scene();
    Ok(DemoSummary {
        source: loaded.source,
        layers: scene
            .layers()
            .map(|layer| (layer.name.clone(), layer.visible, layer.locked))
            .collect(),
        entity_count: scene.len(),
        drawn: drawn.map(|id| id.get()),
        undo_depth: session.history().undo_len(),
        redo_depth: session.history().redo_len(),
        frames: session.scheduler().frames(),
        display_ops: session.frame().len(),
        metrics_published: published.get(),
        scale: session.viewport().scale(),
    })
}

fn draw_line(
    session: &mut ViewerSession,
    from: Point2,
    to: Point2,
) -> Result<Option<EntityId>, FrontendError> {
    session.set_tool(Tool::Line);
    session.pointer_down(session.world_to_screen(from))?;
    session.pointer_move(session.world_to_screen(to));
    let action = session.pointer_down(session.world_to_screen(to))?;
    session.set_tool(Tool::Select);
    Ok(match action {
        PointerAction::Committed(id) => Some(id),
        _ => None,
    })
}

fn drag_end_grip(session: &mut ViewerSession, grip: Point2, target: Point2) -> Result<bool, FrontendError> {
    let at = session.world_to_screen(grip);
    session.pointer_down(at)?;
    session.pointer_move(at);
    if !matches!(session.pointer_down(at)?, PointerAction::GripPressed(_)) {
        return Ok(false);
    }
    session.pointer_move(session.world_to_screen(target));
    Ok(session.pointer_up(session.world_to_screen(target))?)
}

pub fn print_summary(summary: &DemoSummary) {
    println!("zdraft CLI 演示");
    match &summary.source {
        SceneSource::Json(path) => println!("已从 JSON 加载场景：{}", path.display()),
        SceneSource::Demo => println!("使用内置示例场景"),
    }
    println!("图层：");
    for (name, visible, locked) in &summary.layers {
        println!("  - {name} (可见: {visible}, 锁定: {locked})");
    }
    println!("实体数量：{}", summary.entity_count);
    match summary.drawn {
        Some(id) => println!("新绘制的线段 ID = {id}"),
        None => println!("未能绘制新线段"),
    }
    println!("撤销栈深度 = {}, 重做栈深度 = {}", summary.undo_depth, summary.redo_depth);
    println!(
        "已渲染帧数 = {}, 当前帧绘制指令 = {}, 发布帧指标 {} 次",
        summary.frames, summary.display_ops, summary.metrics_published
    );
    println!("视口比例 = {:.3}", summary.scale);
}
