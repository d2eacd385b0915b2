use std::env;
use std::f64::consts::FRAC_PI_2;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use zdraft_config::AppConfig;
use zdraft_core::document::{
    AngleMeasurement, Arc, Circle, DEFAULT_LAYER, Dimension, Entity, EntityId, Geometry, Layer, Line, Polyline,
    SceneSnapshot, Text, Winding,
};
use zdraft_core::geometry::Point2;
use zdraft_engine::session::ViewerSession;
use zdraft_io::{JsonSceneLoader, JsonlAuditLog, SceneLoader};

use crate::errors::FrontendError;

pub const SCENE_ENV: &str = "ZDRAFT_SCENE_JSON";
pub const AUDIT_ENV: &str = "ZDRAFT_AUDIT_LOG";

/// 场景来源，便于前端呈现加载信息。
#[derive(Debug, Clone, PartialEq)]
pub enum SceneSource {
    Json(PathBuf),
    Demo,
}

/// 内置示例中各实体的 ID。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoEntities {
    pub baseline: EntityId,
    pub circle: EntityId,
    pub arc: EntityId,
    pub outline: EntityId,
    pub dimension: EntityId,
    pub angle: EntityId,
    pub label: EntityId,
}

#[derive(Debug)]
pub struct LoadedSession {
    pub session: ViewerSession,
    pub source: SceneSource,
    pub demo_entities: Option<DemoEntities>,
}

/// 从环境变量 `ZDRAFT_SCENE_JSON` 指定的路径加载场景，失败时回退到内置示例。
pub fn load_session_from_env_or_demo(config: &AppConfig) -> LoadedSession {
    let path = env::var_os(SCENE_ENV).map(PathBuf::from);
    load_session_or_demo(config, path.as_deref())
}

/// 加载显式指定的场景文件，失败时把错误交给调用方。
pub fn load_session(config: &AppConfig, path: &Path) -> Result<LoadedSession, FrontendError> {
    let snapshot = JsonSceneLoader::new().load(path)?;
    info!(path = %path.display(), "从 JSON 加载场景成功");
    Ok(prepare(LoadedSession {
        session: ViewerSession::from_snapshot(config, snapshot),
        source: SceneSource::Json(path.to_path_buf()),
        demo_entities: None,
    }))
}

/// 路径为 `None` 或加载失败时使用内置示例。
pub fn load_session_or_demo(config: &AppConfig, path: Option<&Path>) -> LoadedSession {
    let Some(path) = path else {
        return demo_session(config);
    };
    load_session(config, path).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "加载场景失败，回退到内置示例");
        demo_session(config)
    })
}

fn prepare(mut loaded: LoadedSession) -> LoadedSession {
    attach_audit_log(&mut loaded.session);
    loaded.session.zoom_to_fit();
    loaded
}

fn attach_audit_log(session: &mut ViewerSession) {
    let Some(path) = env::var_os(AUDIT_ENV) else {
        return;
    };
    match JsonlAuditLog::open(&path) {
        Ok(log) => {
            info!(path = %log.path().display(), "命令审计日志已启用");
            session.set_command_sink(Box::new(log));
        }
        Err(err) => warn!(error = %err, "无法打开审计日志，继续运行"),
    }
}

pub fn demo_session(config: &AppConfig) -> LoadedSession {
    let (snapshot, ids) = demo_snapshot();
    prepare(LoadedSession {
        session: ViewerSession::from_snapshot(config, snapshot),
        source: SceneSource::Demo,
        demo_entities: Some(ids),
    })
}

/// 内置示例：两个图层上的若干基本图元与标注。
pub fn demo_snapshot() -> (SceneSnapshot, DemoEntities) {
    let ids = DemoEntities {
        baseline: EntityId::new(1),
        circle: EntityId::new(2),
        arc: EntityId::new(3),
        outline: EntityId::new(4),
        dimension: EntityId::new(5),
        angle: EntityId::new(6),
        label: EntityId::new(7),
    };
    let annotation = "annotation";
    let entities = vec![
        Entity::new(
            ids.baseline,
            DEFAULT_LAYER,
            Geometry::Line(Line {
                start: Point2::new(0.0, 0.0),
                end: Point2::new(120.0, 0.0),
            }),
        ),
        Entity::new(
            ids.circle,
            DEFAULT_LAYER,
            Geometry::Circle(Circle {
                center: Point2::new(60.0, 40.0),
                radius: 18.0,
            }),
        ),
        Entity::new(
            ids.arc,
            DEFAULT_LAYER,
            Geometry::Arc(Arc {
                center: Point2::new(120.0, 40.0),
                radius: 25.0,
                start_angle: 0.0,
                end_angle: FRAC_PI_2,
                winding: Winding::CounterClockwise,
            }),
        ),
        Entity::new(
            ids.outline,
            DEFAULT_LAYER,
            Geometry::Polyline(Polyline {
                vertices: vec![
                    Point2::new(-20.0, -20.0),
                    Point2::new(160.0, -20.0),
                    Point2::new(160.0, 90.0),
                    Point2::new(-20.0, 90.0),
                ],
                closed: true,
            }),
        ),
        Entity::new(
            ids.dimension,
            annotation,
            Geometry::Dimension(Dimension {
                start: Point2::new(0.0, 0.0),
                end: Point2::new(120.0, 0.0),
                offset: -10.0,
                text_override: None,
            }),
        ),
        Entity::new(
            ids.angle,
            annotation,
            Geometry::AngleMeasurement(AngleMeasurement {
                vertex: Point2::new(0.0, 0.0),
                first: Point2::new(30.0, 0.0),
                second: Point2::new(20.0, 20.0),
            }),
        ),
        Entity::new(
            ids.label,
            annotation,
            Geometry::Text(Text {
                insert: Point2::new(40.0, 70.0),
                content: "zdraft demo".to_string(),
                height: 5.0,
                rotation: 0.0,
            }),
        ),
    ];
    let snapshot = SceneSnapshot {
        layers: vec![Layer::new(annotation).with_color(0x00C8FF)],
        entities,
    };
    (snapshot, ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scene_is_well_formed() {
        let (snapshot, ids) = demo_snapshot();
        assert!(snapshot.entities.iter().all(|e| e.geometry.is_well_formed()));
        assert_eq!(snapshot.entities.len(), 7);
        assert_eq!(snapshot.entities[6].id, ids.label);
    }

    #[test]
    fn missing_scene_falls_back_to_demo() {
        let loaded = load_session_or_demo(&AppConfig::default(), Some(Path::new("/nonexistent/zdraft.json")));
        assert_eq!(loaded.source, SceneSource::Demo);
        assert_eq!(loaded.session.scene().len(), 7);
        assert!(loaded.session.scene().layer("annotation").is_some());
    }

    #[test]
    fn explicit_missing_scene_is_an_error() {
        let err = load_session(&AppConfig::default(), Path::new("/nonexistent/zdraft.json")).unwrap_err();
        assert!(matches!(err, FrontendError::Io(zdraft_io::IoError::ReadError { .. })));
    }
}
