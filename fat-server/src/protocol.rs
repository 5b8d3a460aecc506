//! 行协议：每行一条命令，应答以`SUCCESS:`或`ERROR:`开头

use core::fmt;

use fat::{FatFileSystem, Stat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Create(&'a str),
    Read(&'a str),
    /// 文件名，及行内剩余的全部内容
    Write(&'a str, &'a str),
    Delete(&'a str),
    List,
    Stat,
    Quit,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Err("Empty command".into());
        }

        let (verb, rest) = split_word(line);
        let (filename, payload) = split_word(rest);
        let verb = verb.to_ascii_uppercase();
        let named = |cmd: &str| {
            if filename.is_empty() {
                Err(format!("{cmd} requires a filename"))
            } else {
                Ok(filename)
            }
        };

        match verb.as_str() {
            "CREATE" => named("CREATE").map(Self::Create),
            "READ" => named("READ").map(Self::Read),
            "WRITE" => {
                let filename = named("WRITE")?;
                if payload.is_empty() {
                    Err("WRITE requires content".into())
                } else {
                    Ok(Self::Write(filename, payload))
                }
            }
            "DELETE" => named("DELETE").map(Self::Delete),
            "LIST" => Ok(Self::List),
            "STAT" => Ok(Self::Stat),
            "QUIT" | "EXIT" => Ok(Self::Quit),
            _ => Err(format!("Unknown command: {verb}")),
        }
    }

    /// 一条命令恰好对应一次文件系统调用
    pub fn execute(self, fs: &FatFileSystem) -> fat::Result<Response> {
        Ok(match self {
            Self::Create(name) => {
                fs.create(name)?;
                Response::Done(format!("File '{name}' created."))
            }
            Self::Read(name) => Response::Content(fs.read(name)?),
            Self::Write(name, content) => {
                fs.write(name, content.as_bytes())?;
                Response::Done(format!("File '{name}' written."))
            }
            Self::Delete(name) => {
                fs.delete(name)?;
                Response::Done(format!("File '{name}' deleted."))
            }
            Self::List => Response::Files(fs.list()?),
            Self::Stat => Response::Stat(fs.stat()?),
            Self::Quit => Response::Bye,
        })
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Done(String),
    Content(Vec<u8>),
    Files(Vec<String>),
    Stat(Stat),
    Bye,
    Error(String),
}

impl Response {
    /// 处理一行输入；任何失败都化为`ERROR:`应答
    pub fn respond(line: &str, fs: &FatFileSystem) -> Self {
        match Command::parse(line) {
            Ok(cmd) => cmd
                .execute(fs)
                .unwrap_or_else(|e| Self::Error(e.to_string())),
            Err(msg) => Self::Error(msg),
        }
    }

    pub fn is_bye(&self) -> bool {
        matches!(self, Self::Bye)
    }
}

/// 每行以`\n`结尾
impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done(msg) => writeln!(f, "SUCCESS: {msg}"),
            Self::Content(content) => {
                writeln!(f, "SUCCESS: {}", String::from_utf8_lossy(content))
            }
            Self::Files(files) if files.is_empty() => writeln!(f, "SUCCESS: No files"),
            Self::Files(files) => {
                writeln!(f, "SUCCESS: Files:")?;
                for (i, name) in files.iter().enumerate() {
                    writeln!(f, "  [{}] {name}", i + 1)?;
                }
                Ok(())
            }
            Self::Stat(stat) => writeln!(
                f,
                "SUCCESS: files={}/{} blocks={}/{} block_size={}",
                stat.files, stat.max_files, stat.free_blocks, stat.data_blocks, stat.block_size
            ),
            Self::Bye => writeln!(f, "SUCCESS: Disconnecting"),
            Self::Error(msg) => writeln!(f, "ERROR: {msg}"),
        }
    }
}
