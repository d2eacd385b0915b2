use thiserror::Error;
use zdraft_engine::errors::CommandError;
use zdraft_io::IoError;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("演示命令执行失败: {0}")]
    Command(#[from] CommandError),
    #[error(transparent)]
    Io(#[from] IoError),
}
