use std::io;

use derive_more::Display;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Display)]
pub enum Error {
    /// 非法参数，如空文件名、超长文件名
    #[display(fmt = "{}", _0)]
    Validation(String),
    #[display(fmt = "File '{}' does not exist", _0)]
    NotFound(String),
    #[display(fmt = "File '{}' already exists", _0)]
    AlreadyExists(String),
    /// 目录表已满，或空闲块不足
    #[display(fmt = "{}", _0)]
    Capacity(String),
    #[display(fmt = "Storage I/O failure: {}", _0)]
    StorageIo(io::Error),
    /// 文件系统已关闭，或内部不变式被破坏
    #[display(fmt = "{}", _0)]
    State(String),
}

impl Error {
    pub(crate) fn closed() -> Self {
        Self::State("File system is closed".into())
    }

    pub(crate) fn corrupted(what: impl Into<String>) -> Self {
        Self::State(what.into())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StorageIo(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::StorageIo(e)
    }
}

impl From<binrw::Error> for Error {
    fn from(e: binrw::Error) -> Self {
        match e {
            binrw::Error::Io(e) => Self::StorageIo(e),
            e => Self::State(format!("Malformed metadata: {e}")),
        }
    }
}
