use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use fat::FatFileSystem;

use crate::protocol::Response;

/// 单行上限，超出部分被丢弃
const MAX_LINE: u64 = 64 * 1024;

/// 每个连接一个线程，共享同一个文件系统句柄
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    fs: Arc<FatFileSystem>,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(addr: impl ToSocketAddrs, fs: Arc<FatFileSystem>) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            fs,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        Ok(ShutdownHandle {
            addr: self.local_addr()?,
            running: self.running.clone(),
        })
    }

    /// 阻塞地接受连接，直到[`ShutdownHandle::shutdown`]被调用
    pub fn run(self) -> io::Result<()> {
        log::info!("listening on {}", self.local_addr()?);

        for stream in self.listener.incoming() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    continue;
                }
            };

            let peer = stream
                .peer_addr()
                .map_or_else(|_| "unknown".to_owned(), |addr| addr.to_string());
            log::info!("client connected: {peer}");

            let fs = self.fs.clone();
            let spawned = thread::Builder::new()
                .name(format!("client-{peer}"))
                .spawn(move || {
                    if let Err(e) = serve(stream, &fs) {
                        log::warn!("client {peer}: {e}");
                    }
                    log::info!("client disconnected: {peer}");
                });
            if let Err(e) = spawned {
                log::error!("failed to spawn client thread: {e}");
            }
        }

        log::info!("server stopped");
        Ok(())
    }
}

/// 从其它线程停止[`Server::run`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        // 唤醒阻塞中的accept
        if let Err(e) = TcpStream::connect(self.addr) {
            log::debug!("wake-up connection failed: {e}");
        }
    }
}

/// 逐行应答，直到对端关闭或发出`QUIT`；套接字随返回一同释放
fn serve(stream: TcpStream, fs: &FatFileSystem) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let complete = match read_line(&mut reader, &mut buf)? {
            Some(complete) => complete,
            None => return Ok(()),
        };

        let response = if !complete {
            Response::Error(format!("Line exceeds {MAX_LINE} bytes"))
        } else {
            match core::str::from_utf8(&buf) {
                Ok(line) => {
                    log::debug!("received: {}", line.trim_end());
                    Response::respond(line, fs)
                }
                Err(_) => Response::Error("Command is not valid UTF-8".into()),
            }
        };

        write!(writer, "{response}")?;
        writer.flush()?;
        if response.is_bye() {
            return Ok(());
        }
    }
}

/// 读一行到`buf`。
/// `None`表示连接已关闭，`Some(false)`表示该行过长、已被截断丢弃。
fn read_line(reader: &mut impl BufRead, buf: &mut Vec<u8>) -> io::Result<Option<bool>> {
    let n = reader.by_ref().take(MAX_LINE).read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.ends_with(b"\n") || (n as u64) < MAX_LINE {
        return Ok(Some(true));
    }

    // 丢弃剩余部分
    let mut rest = Vec::new();
    loop {
        rest.clear();
        let n = reader.by_ref().take(MAX_LINE).read_until(b'\n', &mut rest)?;
        if n == 0 || rest.ends_with(b"\n") {
            return Ok(Some(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn oversized_lines_are_dropped() {
        let mut input = vec![b'x'; MAX_LINE as usize + 10];
        input.extend_from_slice(b"\nLIST\n");
        let mut reader = BufReader::new(Cursor::new(input));
        let mut buf = Vec::new();

        assert_eq!(Some(false), read_line(&mut reader, &mut buf).unwrap());
        buf.clear();
        assert_eq!(Some(true), read_line(&mut reader, &mut buf).unwrap());
        assert_eq!(b"LIST\n", buf.as_slice());
        buf.clear();
        assert_eq!(None, read_line(&mut reader, &mut buf).unwrap());
    }
}
