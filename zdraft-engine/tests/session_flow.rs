use std::cell::RefCell;
use std::f64::consts::PI;
use std::rc::Rc;
use std::time::Duration;

use zdraft_config::AppConfig;
use zdraft_core::document::{Circle, DEFAULT_LAYER, Entity, EntityId, Geometry, Line, Style};
use zdraft_core::geometry::{Point2, Vector2};
use zdraft_engine::command::Command;
use zdraft_engine::draft::Tool;
use zdraft_engine::grips::GripState;
use zdraft_engine::labels::internal_arc;
use zdraft_engine::session::{PointerAction, SessionEvent, ViewerSession};
use zdraft_engine::snap::SnapQuery;

fn session_with(entities: Vec<Entity>) -> ViewerSession {
    let mut session = ViewerSession::new(&AppConfig::default());
    session.execute(Command::add_entities(entities)).expect("初始实体");
    session
}

fn line(id: u64, start: (f64, f64), end: (f64, f64)) -> Entity {
    Entity::new(
        EntityId::new(id),
        DEFAULT_LAYER,
        Geometry::Line(Line {
            start: Point2::new(start.0, start.1),
            end: Point2::new(end.0, end.1),
        }),
    )
}

#[test]
fn undo_chain_restores_scene_deeply() {
    let mut session = session_with(vec![
        line(1, (0.0, 0.0), (10.0, 0.0)),
        Entity::new(
            EntityId::new(2),
            DEFAULT_LAYER,
            Geometry::Circle(Circle {
                center: Point2::new(5.0, 5.0),
                radius: 2.5,
            }),
        ),
    ]);
    let baseline = session.scene().clone();
    session
        .execute(Command::move_entities(vec![EntityId::new(1), EntityId::new(2)], Vector2::new(0.3, -0.7)))
        .expect("移动");
    session
        .execute(Command::set_style(
            vec![EntityId::new(2)],
            Style {
                color: Some(0xff0000),
                ..Style::default()
            },
        ))
        .expect("样式");
    session.set_selection(&[EntityId::new(1)]);
    session.delete_selection().expect("删除");
    assert!(session.selection().is_empty());

    for _ in 0..3 {
        assert!(session.undo().expect("撤销"));
    }
    assert_eq!(session.scene(), &baseline);
    assert_eq!(session.history().redo_len(), 3);

    while session.redo().expect("重做") {}
    assert!(!session.scene().contains(EntityId::new(1)));
    assert_eq!(session.history().undo_len(), 4);
}

#[test]
fn snap_resolution_is_deterministic() {
    let mut session = session_with(vec![
        line(1, (0.0, 0.0), (10.0, 0.0)),
        line(2, (10.0, 0.0), (10.0, 10.0)),
        line(3, (10.0, 0.0), (20.0, 0.0)),
    ]);
    let cursor = session.world_to_screen(Point2::new(10.5, 0.5));
    let first = session.snap(cursor).expect("捕捉");
    for _ in 0..10 {
        assert_eq!(session.snap(cursor), Some(first));
    }
    assert_eq!(first.point, Point2::new(10.0, 0.0));
    assert_eq!(SnapQuery::at(cursor), SnapQuery::at(cursor));
}

#[test]
fn grip_lifecycle_reports_cold_warm_hot_cold() {
    let mut session = session_with(vec![line(1, (0.0, 0.0), (40.0, 0.0))]);
    let transitions = Rc::new(RefCell::new(Vec::new()));
    let sink = transitions.clone();
    session.subscribe(move |event| {
        if let SessionEvent::GripChanged(transition) = event {
            sink.borrow_mut().push((transition.from, transition.to));
        }
    });
    session.set_selection(&[EntityId::new(1)]);
    let start = session.world_to_screen(Point2::new(0.0, 0.0));
    session.pointer_move(start);
    assert!(matches!(session.pointer_down(start).expect("按下"), PointerAction::GripPressed(_)));
    session.pointer_move(session.world_to_screen(Point2::new(-3.0, -20.0)));
    assert!(session.pointer_up(session.world_to_screen(Point2::new(-3.0, -20.0))).expect("释放"));
    assert_eq!(
        *transitions.borrow(),
        vec![
            (GripState::Cold, GripState::Warm),
            (GripState::Warm, GripState::Hot),
            (GripState::Hot, GripState::Cold),
        ]
    );
    assert_eq!(session.history().undo_len(), 2);
}

#[test]
fn cancelled_draft_leaves_history_untouched() {
    let mut session = ViewerSession::new(&AppConfig::default());
    session.set_tool(Tool::Rectangle);
    session.pointer_down(session.world_to_screen(Point2::new(1.0, 1.0))).expect("第一点");
    session.pointer_move(session.world_to_screen(Point2::new(30.0, 20.0)));
    assert!(session.workspace().preview().is_some());
    assert!(session.cancel_draft());
    assert!(session.workspace().preview().is_none());
    assert!(!session.history().can_undo());
    assert!(session.scene().is_empty());
}

#[test]
fn angle_arc_never_exceeds_half_turn() {
    let vertex = Point2::new(2.0, -1.0);
    for i in 0..24 {
        for j in 0..24 {
            if i == j {
                continue;
            }
            let a = i as f64 * PI / 12.0 + 0.01;
            let b = j as f64 * PI / 12.0 + 0.01;
            let first = Point2::new(vertex.x() + a.cos(), vertex.y() + a.sin());
            let second = Point2::new(vertex.x() + 3.0 * b.cos(), vertex.y() + 3.0 * b.sin());
            let arc = internal_arc(vertex, first, second).expect("非退化");
            assert!(arc.sweep.abs() <= PI + 1e-9, "扫掠角 {} 超过 π", arc.sweep);
        }
    }
}

#[test]
fn bulk_insert_keeps_hit_testing_correct_across_frames() {
    let mut config = AppConfig::default();
    config.spatial.bulk_threshold = 4;
    config.spatial.rebuild_chunk = 3;
    let mut session = ViewerSession::new(&config);
    let entities = (1..=12)
        .map(|i| line(i, (i as f64 * 20.0, 0.0), (i as f64 * 20.0 + 10.0, 0.0)))
        .collect();
    session.execute(Command::add_entities(entities)).expect("批量添加");

    session.tick(Duration::from_millis(16));
    let hit = session.hit_test(session.world_to_screen(Point2::new(125.0, 0.0)));
    assert_eq!(hit.map(|h| h.entity()), Some(EntityId::new(6)));
    for frame in 2..6 {
        session.tick(Duration::from_millis(frame * 16));
    }
    assert_eq!(session.scheduler().pending_tasks(), 0);
}

#[test]
fn large_bulk_edits_undo_to_identical_scene() {
    let count = 20_000u64;
    let mut session = session_with(
        (1..=count)
            .map(|i| line(i, (i as f64, 0.0), (i as f64, 5.0)))
            .collect(),
    );
    let original = session.scene().clone();
    let all: Vec<EntityId> = (1..=count).map(EntityId::new).collect();

    let every_third: Vec<EntityId> = all.iter().copied().filter(|id| id.get() % 3 == 0).collect();
    session.set_selection(&every_third);
    assert_eq!(session.selection().len(), every_third.len());
    session.delete_selection().expect("批量删除");
    assert_eq!(session.scene().len(), (count - count / 3) as usize);
    assert!(session.scene().entity(EntityId::new(3)).is_none());
    assert_eq!(session.scene().z_index(EntityId::new(4)), Some(2));

    assert!(session.undo().expect("撤销删除"));
    assert_eq!(session.scene(), &original);
    assert_eq!(session.scene().z_index(EntityId::new(count)), Some(count as usize - 1));

    session
        .execute(Command::move_entities(all, Vector2::new(0.0, 1.0)))
        .expect("批量移动");
    match &session.scene().entity(EntityId::new(count)).expect("末尾实体").geometry {
        Geometry::Line(moved) => assert!((moved.start.y() - 1.0).abs() < 1e-12),
        other => panic!("意外几何: {other:?}"),
    }
    assert!(session.undo().expect("撤销移动"));
    assert_eq!(session.scene(), &original);
}
