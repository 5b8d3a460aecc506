use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, MutexGuard};

use crate::BlockDevice;

/// 以宿主文件作为后备存储的块设备
#[derive(Debug)]
pub struct BlockFile {
    inner: Mutex<File>,
    block_size: usize,
    blocks: usize,
}

impl BlockFile {
    /// 文件长度需已设定好，末尾不足一块的部分不可寻址。
    pub fn new(fd: File, block_size: usize) -> io::Result<Self> {
        assert!(block_size > 0, "zero-sized block");
        let len = fd.metadata()?.len() as usize;

        Ok(Self {
            inner: Mutex::new(fd),
            block_size,
            blocks: len / block_size,
        })
    }

    pub const fn blocks(&self) -> usize {
        self.blocks
    }

    fn locate(&self, block_id: usize, len: usize) -> io::Result<MutexGuard<'_, File>> {
        if len != self.block_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer of {len} bytes is not a complete block"),
            ));
        }
        if block_id >= self.blocks {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("block {block_id} is beyond the device ({} blocks)", self.blocks),
            ));
        }

        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("block file lock poisoned"))?;
        file.seek(SeekFrom::Start((block_id * self.block_size) as u64))?;
        Ok(file)
    }
}

impl BlockDevice for BlockFile {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        self.locate(block_id, buf.len())?.read_exact(buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        self.locate(block_id, buf.len())?.write_all(buf)
    }

    fn sync(&self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("block file lock poisoned"))?
            .sync_data()
    }
}
