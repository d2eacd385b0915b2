use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。引擎用到的容差、倍率与样式表全部由此注入。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub snap: SnapConfig,
    #[serde(default)]
    pub spatial: SpatialConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub labels: LabelConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `ZDRAFT_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("ZDRAFT_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 视图交互参数：拾取孔径、夹点尺寸与缩放范围，单位均为屏幕像素或无量纲倍率。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub aperture_px: f64,
    pub grip_size_px: f64,
    pub grip_cold_multiplier: f64,
    pub grip_warm_multiplier: f64,
    pub grip_hot_multiplier: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub zoom_step: f64,
    pub fit_margin_px: f64,
    pub canvas_width: f64,
    pub canvas_height: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            aperture_px: 8.0,
            grip_size_px: 6.0,
            grip_cold_multiplier: 1.0,
            grip_warm_multiplier: 1.25,
            grip_hot_multiplier: 1.5,
            min_scale: 0.01,
            max_scale: 1000.0,
            zoom_step: 1.2,
            fit_margin_px: 20.0,
            canvas_width: 1280.0,
            canvas_height: 720.0,
        }
    }
}

/// 单个捕捉策略：搜索半径写作孔径的倍数。
///
/// 表内缺省的字段使用通用默认值（启用、1 倍孔径、优先级 50），
/// 而不是该策略在 [`SnapConfig::default`] 中的取值。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SnapStrategyConfig {
    pub enabled: bool,
    pub radius_multiplier: f64,
    pub priority: u8,
}

impl SnapStrategyConfig {
    pub const fn new(enabled: bool, radius_multiplier: f64, priority: u8) -> Self {
        Self {
            enabled,
            radius_multiplier,
            priority,
        }
    }
}

impl Default for SnapStrategyConfig {
    fn default() -> Self {
        Self::new(true, 1.0, 50)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    pub endpoint: SnapStrategyConfig,
    pub midpoint: SnapStrategyConfig,
    pub center: SnapStrategyConfig,
    pub grid: SnapStrategyConfig,
    pub ortho: SnapStrategyConfig,
    pub perpendicular: SnapStrategyConfig,
    pub tangent: SnapStrategyConfig,
    pub parallel: SnapStrategyConfig,
    pub extension: SnapStrategyConfig,
    /// 栅格间距（世界单位）。
    pub grid_spacing: f64,
    /// 平行/延伸探测的基准距离（像素），第 k 个探测点位于 k 倍处。
    pub probe_base_px: f64,
    pub probe_count: u32,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            endpoint: SnapStrategyConfig::new(true, 1.0, 100),
            midpoint: SnapStrategyConfig::new(true, 1.0, 100),
            center: SnapStrategyConfig::new(true, 1.0, 100),
            grid: SnapStrategyConfig::new(true, 1.0, 10),
            ortho: SnapStrategyConfig::new(true, 2.0, 40),
            perpendicular: SnapStrategyConfig::new(true, 2.0, 80),
            tangent: SnapStrategyConfig::new(true, 2.0, 80),
            parallel: SnapStrategyConfig::new(true, 3.0, 60),
            extension: SnapStrategyConfig::new(true, 3.0, 60),
            grid_spacing: 10.0,
            probe_base_px: 20.0,
            probe_count: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// 网格单元边长（像素），换算到世界单位时除以当前比例。
    pub cell_size_px: f64,
    /// 分帧重建时每次处理的实体数。
    pub rebuild_chunk: usize,
    /// 单次编辑影响实体数超过该值时改为分帧重建。
    pub bulk_threshold: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            cell_size_px: 64.0,
            rebuild_chunk: 256,
            bulk_threshold: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_depth: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 帧率统计的滚动窗口长度（帧）。
    pub metrics_window: usize,
    /// 每渲染多少帧向订阅者发布一次指标。
    pub metrics_interval: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            metrics_window: 60,
            metrics_interval: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LineWidthTable {
    pub thin: f64,
    pub normal: f64,
    pub thick: f64,
    pub extra_thick: f64,
}

impl Default for LineWidthTable {
    fn default() -> Self {
        Self {
            thin: 0.5,
            normal: 1.0,
            thick: 2.0,
            extra_thick: 3.0,
        }
    }
}

/// 虚线图案（像素，交替 实/空）。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashTable {
    pub dashed: Vec<f64>,
    pub dotted: Vec<f64>,
    pub dash_dot: Vec<f64>,
    pub center: Vec<f64>,
}

impl Default for DashTable {
    fn default() -> Self {
        Self {
            dashed: vec![6.0, 4.0],
            dotted: vec![1.0, 3.0],
            dash_dot: vec![8.0, 3.0, 1.0, 3.0],
            center: vec![12.0, 3.0, 3.0, 3.0],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub line_width_px: LineWidthTable,
    pub dash_patterns: DashTable,
    pub selection_color: u32,
    pub grip_color: u32,
    pub hot_grip_color: u32,
    pub preview_color: u32,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            line_width_px: LineWidthTable::default(),
            dash_patterns: DashTable::default(),
            selection_color: 0x3399FF,
            grip_color: 0x1E90FF,
            hot_grip_color: 0xFF3333,
            preview_color: 0x00CC88,
        }
    }
}

/// 测量标签：多行标签按行高对称排布。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub enabled: bool,
    pub line_height_px: f64,
    pub font_size_px: f64,
    pub decimals: usize,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            line_height_px: 14.0,
            font_size_px: 12.0,
            decimals: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
