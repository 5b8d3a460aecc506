use std::io;
use std::sync::Mutex;

use crate::BlockDevice;

/// 内存盘，内容随进程消失
#[derive(Debug)]
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    block_size: usize,
}

impl RamDisk {
    pub fn new(blocks: usize, block_size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; blocks * block_size]),
            block_size,
        }
    }

    /// 整盘快照
    pub fn image(&self) -> Vec<u8> {
        self.data.lock().map(|data| data.clone()).unwrap_or_default()
    }

    fn range(&self, block_id: usize, len: usize, total: usize) -> io::Result<core::ops::Range<usize>> {
        let start = block_id * self.block_size;
        let end = start + len;
        if len != self.block_size || end > total {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block {block_id} ({len} bytes) out of range"),
            ));
        }
        Ok(start..end)
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let data = self
            .data
            .lock()
            .map_err(|_| io::Error::other("ram disk lock poisoned"))?;
        let range = self.range(block_id, buf.len(), data.len())?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| io::Error::other("ram disk lock poisoned"))?;
        let range = self.range(block_id, buf.len(), data.len())?;
        data[range].copy_from_slice(buf);
        Ok(())
    }
}
