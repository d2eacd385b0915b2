use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use zdraft_core::document::SceneSnapshot;
use zdraft_engine::command::{CommandRecord, CommandSink};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("读取文件 {path:?} 失败: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("写入文件 {path:?} 失败: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON 解析失败（第 {line} 行）: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("序列化失败: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("场景结构无效: {0}")]
    InvalidScene(String),
}

/// 场景加载协作方：产出交给会话的初始快照。
pub trait SceneLoader {
    fn load(&self, path: &Path) -> Result<SceneSnapshot, IoError>;
}

pub trait SceneSaver {
    fn save(&self, snapshot: &SceneSnapshot, path: &Path) -> Result<(), IoError>;
}

/// JSON 格式的场景文件。
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSceneLoader {
    pretty: bool,
}

impl JsonSceneLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存时使用缩进格式。
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    pub fn parse(&self, text: &str) -> Result<SceneSnapshot, IoError> {
        let snapshot: SceneSnapshot = serde_json::from_str(text).map_err(|source| IoError::Parse {
            line: source.line(),
            source,
        })?;
        validate_snapshot(&snapshot)?;
        Ok(snapshot)
    }
}

/// 图层名不得为空或重复。实体引用缺失图层时由场景回退到默认图层，这里只记录。
fn validate_snapshot(snapshot: &SceneSnapshot) -> Result<(), IoError> {
    let mut names = std::collections::HashSet::new();
    for layer in &snapshot.layers {
        if layer.name.trim().is_empty() {
            return Err(IoError::InvalidScene("图层名为空".to_string()));
        }
        if !names.insert(layer.name.as_str()) {
            return Err(IoError::InvalidScene(format!("图层 {} 重复", layer.name)));
        }
    }
    let malformed = snapshot
        .entities
        .iter()
        .filter(|entity| !entity.geometry.is_well_formed())
        .count();
    if malformed > 0 {
        warn!(malformed, "场景中存在几何无效的实体，渲染时将被跳过");
    }
    Ok(())
}

impl SceneLoader for JsonSceneLoader {
    fn load(&self, path: &Path) -> Result<SceneSnapshot, IoError> {
        let text = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot = self.parse(&text)?;
        info!(
            path = %path.display(),
            layers = snapshot.layers.len(),
            entities = snapshot.entities.len(),
            "场景已加载"
        );
        Ok(snapshot)
    }
}

impl SceneSaver for JsonSceneLoader {
    fn save(&self, snapshot: &SceneSnapshot, path: &Path) -> Result<(), IoError> {
        let text = if self.pretty {
            serde_json::to_string_pretty(snapshot)
        } else {
            serde_json::to_string(snapshot)
        }
        .map_err(IoError::Serialize)?;
        fs::write(path, text).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// 以 JSON Lines 追加命令记录的审计日志，每条记录写入后立即刷新。
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl JsonlAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| IoError::WriteError {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "审计日志已打开");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 本次打开后写入的记录数。
    #[inline]
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn append(&mut self, record: &CommandRecord) -> Result<(), IoError> {
        let line = serde_json::to_string(record).map_err(IoError::Serialize)?;
        let write_err = |source| IoError::WriteError {
            path: self.path.clone(),
            source,
        };
        writeln!(self.writer, "{line}").map_err(write_err)?;
        self.writer.flush().map_err(write_err)?;
        self.written += 1;
        Ok(())
    }
}

impl CommandSink for JsonlAuditLog {
    fn record(&mut self, record: &CommandRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.append(record).map_err(Into::into)
    }
}

/// 读取审计日志，按写入顺序返回记录。空行被跳过。
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<CommandRecord>, IoError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| IoError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| IoError::Parse {
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}
