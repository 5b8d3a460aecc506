use crate::volume::{BlockDescriptor, FileEntry, Signature};
use crate::{BlockId, Error, Result};

/// 存储的几何参数，创建后不可更改
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// 后备文件的总字节数
    pub total_size: u64,
    /// 目录表容量
    pub max_files: usize,
    /// 块总数，包含元数据区
    pub max_blocks: usize,
    pub block_size: usize,
}

impl Geometry {
    pub fn new(
        total_size: u64,
        max_files: usize,
        max_blocks: usize,
        block_size: usize,
    ) -> Result<Self> {
        let geometry = Self {
            total_size,
            max_files,
            max_blocks,
            block_size,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// 恰好容纳全部块的几何参数
    pub fn fitted(max_files: usize, max_blocks: usize, block_size: usize) -> Result<Self> {
        Self::new(
            (max_blocks as u64).saturating_mul(block_size as u64),
            max_files,
            max_blocks,
            block_size,
        )
    }

    /// 元数据序列化后的字节数：目录表 + 块链表 + 签名
    pub const fn meta_bytes(&self) -> usize {
        self.max_files * FileEntry::SIZE + self.max_blocks * BlockDescriptor::SIZE + Signature::SIZE
    }

    /// 元数据区占用的块数
    pub const fn meta_blocks(&self) -> usize {
        self.meta_bytes().div_ceil(self.block_size)
    }

    /// 第一个可分配的数据块
    pub const fn first_data_block(&self) -> BlockId {
        BlockId::new(self.meta_blocks() as u32)
    }

    /// 可分配给文件的块数
    pub const fn data_blocks(&self) -> usize {
        self.max_blocks - self.meta_blocks()
    }

    fn validate(&self) -> Result<()> {
        if self.max_files == 0 || self.max_blocks == 0 || self.block_size == 0 {
            return Err(Error::Validation(format!(
                "Geometry values must be positive: {self:?}"
            )));
        }
        if self.max_files > u32::MAX as usize || self.max_blocks >= u32::MAX as usize {
            return Err(Error::Validation(format!(
                "Geometry exceeds the on-disk index width: {self:?}"
            )));
        }
        if self.meta_blocks() >= self.max_blocks {
            return Err(Error::Validation(format!(
                "Metadata needs {} of {} blocks, no data block remains",
                self.meta_blocks(),
                self.max_blocks
            )));
        }
        let needed = (self.max_blocks as u64).checked_mul(self.block_size as u64);
        if needed.map_or(true, |needed| needed > self.total_size) {
            return Err(Error::Validation(format!(
                "Total size {} cannot hold {} blocks of {} bytes",
                self.total_size, self.max_blocks, self.block_size
            )));
        }
        Ok(())
    }
}
