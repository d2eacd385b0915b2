use serde::{Deserialize, Serialize};
use zdraft_core::document::{Circle, Geometry, Line, Polyline, Rectangle};
use zdraft_core::geometry::Point2;

/// 当前绘图工具。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    #[default]
    Select,
    Line,
    Polyline,
    Circle,
    Rectangle,
}

impl Tool {
    /// 需要两个点即提交的工具。
    fn two_point(self) -> bool {
        matches!(self, Tool::Line | Tool::Circle | Tool::Rectangle)
    }
}

/// 进行中的绘图草稿。提交前随时可取消，取消不会产生任何命令。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftState {
    tool: Tool,
    points: Vec<Point2>,
}

impl DraftState {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            points: Vec::new(),
        }
    }

    #[inline]
    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// 切换工具会丢弃未提交的草稿。
    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
        self.points.clear();
    }

    #[inline]
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !self.points.is_empty()
    }

    /// 最近一个已确定的点，供正交、垂足等捕捉参考。
    pub fn last_point(&self) -> Option<Point2> {
        self.points.last().copied()
    }

    /// 加入一个（已捕捉的）点。两点工具在第二个点时返回完成的几何并清空草稿；
    /// 与上一点重合的点被忽略。
    pub fn add_point(&mut self, point: Point2) -> Option<Geometry> {
        if self.tool == Tool::Select || !point.is_finite() {
            return None;
        }
        if self.last_point().is_some_and(|last| last.distance(point) <= f64::EPSILON) {
            return None;
        }
        self.points.push(point);
        if self.tool.two_point() && self.points.len() == 2 {
            let geometry = self.build(None);
            self.points.clear();
            return geometry;
        }
        None
    }

    /// 结束多点工具。折线至少需要两个点，否则草稿保持不变并返回 `None`。
    pub fn finish(&mut self) -> Option<Geometry> {
        if self.tool != Tool::Polyline || self.points.len() < 2 {
            return None;
        }
        let geometry = self.build(None);
        self.points.clear();
        geometry
    }

    pub fn cancel(&mut self) -> bool {
        let had_points = !self.points.is_empty();
        self.points.clear();
        had_points
    }

    /// 以光标为下一个点的预览几何。
    pub fn preview(&self, cursor: Point2) -> Option<Geometry> {
        if self.points.is_empty() || !cursor.is_finite() {
            return None;
        }
        self.build(Some(cursor))
    }

    fn build(&self, cursor: Option<Point2>) -> Option<Geometry> {
        let mut points = self.points.clone();
        points.extend(cursor);
        let geometry = match self.tool {
            Tool::Select => return None,
            Tool::Line => Geometry::Line(Line {
                start: *points.first()?,
                end: *points.get(1)?,
            }),
            Tool::Circle => {
                let center = *points.first()?;
                Geometry::Circle(Circle {
                    center,
                    radius: center.distance(*points.get(1)?),
                })
            }
            Tool::Rectangle => Geometry::Rectangle(Rectangle {
                corner_a: *points.first()?,
                corner_b: *points.get(1)?,
            }),
            Tool::Polyline => {
                if points.len() < 2 {
                    return None;
                }
                Geometry::Polyline(Polyline {
                    vertices: points,
                    closed: false,
                })
            }
        };
        geometry.is_well_formed().then_some(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_commits_on_second_point() {
        let mut draft = DraftState::new(Tool::Line);
        assert!(draft.add_point(Point2::new(0.0, 0.0)).is_none());
        assert!(draft.add_point(Point2::new(0.0, 0.0)).is_none());
        let geometry = draft.add_point(Point2::new(3.0, 4.0)).expect("提交直线");
        assert!(matches!(geometry, Geometry::Line(line) if line.end == Point2::new(3.0, 4.0)));
        assert!(!draft.is_active());
    }

    #[test]
    fn polyline_requires_finish_and_can_be_cancelled() {
        let mut draft = DraftState::new(Tool::Polyline);
        draft.add_point(Point2::new(0.0, 0.0));
        assert!(draft.finish().is_none());
        assert!(draft.is_active());
        draft.add_point(Point2::new(1.0, 0.0));
        draft.add_point(Point2::new(1.0, 1.0));
        let preview = draft.preview(Point2::new(0.0, 1.0)).expect("预览");
        assert!(matches!(&preview, Geometry::Polyline(p) if p.vertices.len() == 4));
        assert!(draft.cancel());
        assert!(!draft.is_active());
        assert!(draft.finish().is_none());
    }

    #[test]
    fn circle_preview_tracks_cursor_radius() {
        let mut draft = DraftState::new(Tool::Circle);
        draft.add_point(Point2::new(1.0, 1.0));
        match draft.preview(Point2::new(4.0, 5.0)) {
            Some(Geometry::Circle(circle)) => assert!((circle.radius - 5.0).abs() < 1e-12),
            other => panic!("意外的预览: {other:?}"),
        }
    }

    #[test]
    fn switching_tool_discards_draft() {
        let mut draft = DraftState::new(Tool::Rectangle);
        draft.add_point(Point2::new(0.0, 0.0));
        draft.set_tool(Tool::Line);
        assert!(draft.points().is_empty());
        assert_eq!(draft.tool(), Tool::Line);
    }
}
