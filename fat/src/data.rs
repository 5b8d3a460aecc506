//! 后备存储上的块读写

use std::sync::Arc;

use block_dev::BlockDevice;

use crate::{BlockId, Result};

#[derive(Debug, Clone)]
pub struct DataArea {
    /// 底层块设备的引用
    dev: Arc<dyn BlockDevice>,
    block_size: usize,
}

impl DataArea {
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        let block_size = dev.block_size();
        Self { dev, block_size }
    }

    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn read(&self, id: BlockId, buf: &mut [u8]) -> Result<()> {
        Ok(self.dev.read_block(id.index(), buf)?)
    }

    /// 写入整块，`data`不足一块的部分补零
    pub fn write(&self, id: BlockId, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= self.block_size);
        if data.len() == self.block_size {
            return Ok(self.dev.write_block(id.index(), data)?);
        }

        let mut block = vec![0; self.block_size];
        block[..data.len()].copy_from_slice(data);
        Ok(self.dev.write_block(id.index(), &block)?)
    }

    pub fn zeroize(&self, id: BlockId) -> Result<()> {
        self.write(id, &[])
    }

    /// 读取从块0开始的`blocks`个块
    pub fn read_leading(&self, blocks: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; blocks * self.block_size];
        for (i, chunk) in buf.chunks_mut(self.block_size).enumerate() {
            self.dev.read_block(i, chunk)?;
        }
        Ok(buf)
    }

    /// 从块0开始覆写，`buf`须按块对齐
    pub fn write_leading(&self, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(0, buf.len() % self.block_size);
        for (i, chunk) in buf.chunks(self.block_size).enumerate() {
            self.dev.write_block(i, chunk)?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        Ok(self.dev.sync()?)
    }
}
