use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CompositorError;
use crate::render::DisplayList;

pub const CONTENT_SURFACE: &str = "content";
pub const INTERACTION_SURFACE: &str = "interaction";
pub const PREVIEW_SURFACE: &str = "preview";

/// 绘制面的静态描述。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSpec {
    pub name: String,
    pub z_order: i32,
    pub opaque: bool,
}

impl SurfaceSpec {
    pub fn opaque(name: impl Into<String>, z_order: i32) -> Self {
        Self {
            name: name.into(),
            z_order,
            opaque: true,
        }
    }

    pub fn transparent(name: impl Into<String>, z_order: i32) -> Self {
        Self {
            name: name.into(),
            z_order,
            opaque: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Surface {
    spec: SurfaceSpec,
    list: DisplayList,
    visible: bool,
}

impl Surface {
    #[inline]
    pub fn spec(&self) -> &SurfaceSpec {
        &self.spec
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[inline]
    pub fn list(&self) -> &DisplayList {
        &self.list
    }

    #[inline]
    pub fn list_mut(&mut self) -> &mut DisplayList {
        &mut self.list
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

/// 按固定层级叠放的多个绘制面。只有最底层可以不透明。
#[derive(Debug, Clone)]
pub struct LayerCompositor {
    surfaces: Vec<Surface>,
}

impl LayerCompositor {
    /// 校验并按层级由低到高排列。空集合、名称或层级重复、底层之上存在不透明面均被拒绝。
    pub fn new(specs: Vec<SurfaceSpec>) -> Result<Self, CompositorError> {
        if specs.is_empty() {
            return Err(CompositorError::Empty);
        }
        let mut names = HashSet::new();
        let mut orders = HashSet::new();
        for spec in &specs {
            if !names.insert(spec.name.as_str()) {
                return Err(CompositorError::DuplicateName(spec.name.clone()));
            }
            if !orders.insert(spec.z_order) {
                return Err(CompositorError::DuplicateZOrder(spec.z_order));
            }
        }
        let mut specs = specs;
        specs.sort_by_key(|spec| spec.z_order);
        if let Some(offender) = specs.iter().skip(1).find(|spec| spec.opaque) {
            return Err(CompositorError::OpaqueAboveBase(offender.name.clone()));
        }
        debug!(
            surfaces = ?specs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "合成器初始化完成"
        );
        Ok(Self {
            surfaces: specs
                .into_iter()
                .map(|spec| Surface {
                    spec,
                    list: DisplayList::new(),
                    visible: true,
                })
                .collect(),
        })
    }

    /// 内容（不透明）、交互叠加、预览三层。
    pub fn standard() -> Self {
        Self {
            surfaces: [
                SurfaceSpec::opaque(CONTENT_SURFACE, 0),
                SurfaceSpec::transparent(INTERACTION_SURFACE, 10),
                SurfaceSpec::transparent(PREVIEW_SURFACE, 20),
            ]
            .into_iter()
            .map(|spec| Surface {
                spec,
                list: DisplayList::new(),
                visible: true,
            })
            .collect(),
        }
    }

    /// 由低到高。
    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn surface(&self, name: &str) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.spec.name == name)
    }

    pub fn surface_mut(&mut self, name: &str) -> Option<&mut DisplayList> {
        self.surfaces
            .iter_mut()
            .find(|s| s.spec.name == name)
            .map(|s| &mut s.list)
    }

    pub fn set_visible(&mut self, name: &str, visible: bool) -> bool {
        match self.surfaces.iter_mut().find(|s| s.spec.name == name) {
            Some(surface) => {
                surface.visible = visible;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, name: &str) -> bool {
        match self.surface_mut(name) {
            Some(list) => {
                list.clear();
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        for surface in &mut self.surfaces {
            surface.list.clear();
        }
    }

    /// 把可见绘制面由低到高合并为一份显示列表。
    pub fn composite(&self) -> DisplayList {
        let mut out = DisplayList::new();
        for surface in self.surfaces.iter().filter(|s| s.visible) {
            out.extend_from(&surface.list);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use zdraft_core::transform::ScreenPoint;

    use super::*;
    use crate::render::{DrawOp, RenderContext};

    #[test]
    fn rejects_invalid_stacks() {
        assert_eq!(LayerCompositor::new(Vec::new()).unwrap_err(), CompositorError::Empty);
        assert_eq!(
            LayerCompositor::new(vec![SurfaceSpec::opaque("a", 0), SurfaceSpec::transparent("a", 1)])
                .unwrap_err(),
            CompositorError::DuplicateName("a".to_string())
        );
        assert_eq!(
            LayerCompositor::new(vec![SurfaceSpec::opaque("a", 0), SurfaceSpec::transparent("b", 0)])
                .unwrap_err(),
            CompositorError::DuplicateZOrder(0)
        );
        assert_eq!(
            LayerCompositor::new(vec![
                SurfaceSpec::transparent("overlay", 5),
                SurfaceSpec::opaque("base", 0),
                SurfaceSpec::opaque("late", 9),
            ])
            .unwrap_err(),
            CompositorError::OpaqueAboveBase("late".to_string())
        );
    }

    #[test]
    fn transparent_base_is_allowed_and_order_is_by_z() {
        let compositor = LayerCompositor::new(vec![
            SurfaceSpec::transparent("top", 3),
            SurfaceSpec::transparent("bottom", -1),
        ])
        .expect("合法配置");
        let names: Vec<&str> = compositor.surfaces().iter().map(Surface::name).collect();
        assert_eq!(names, vec!["bottom", "top"]);
    }

    #[test]
    fn composite_stacks_bottom_to_top_and_skips_hidden() {
        let mut compositor = LayerCompositor::standard();
        compositor
            .surface_mut(PREVIEW_SURFACE)
            .expect("preview")
            .marker(ScreenPoint::new(3.0, 3.0), 2.0, 0xff, true);
        compositor
            .surface_mut(CONTENT_SURFACE)
            .expect("content")
            .marker(ScreenPoint::new(1.0, 1.0), 2.0, 0xff, true);
        let merged = compositor.composite();
        assert!(matches!(merged.ops()[0], DrawOp::Marker { center, .. } if center == ScreenPoint::new(1.0, 1.0)));
        assert_eq!(merged.len(), 2);

        compositor.set_visible(PREVIEW_SURFACE, false);
        assert_eq!(compositor.composite().len(), 1);
        assert!(compositor.clear(CONTENT_SURFACE));
        assert!(compositor.composite().is_empty());
    }
}
