use binrw::binrw;
use enumflags2::{bitflags, BitFlags};

use crate::{BlockId, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[bitflags]
#[repr(u8)]
pub enum BlockFlag {
    /// 已分配给某个文件，或属于元数据区
    InUse = 0b0000_0001,
    /// 元数据区，永不进入空闲池
    Reserved = 0b0000_0010,
}

/// 块链表中的一项，与数据块一一对应
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDescriptor {
    #[brw(pad_after = 3)]
    flags: u8,

    /// 链表中的下一块
    next: BlockId,
}

impl BlockDescriptor {
    pub const SIZE: usize = 1 + 3 + 4;

    pub const FREE: Self = Self {
        flags: 0,
        next: BlockId::NONE,
    };

    const RESERVED: Self = Self {
        flags: BlockFlag::InUse as u8 | BlockFlag::Reserved as u8,
        next: BlockId::NONE,
    };

    pub fn flags(&self) -> BitFlags<BlockFlag> {
        BitFlags::from_bits_truncate(self.flags)
    }

    pub fn in_use(&self) -> bool {
        self.flags().contains(BlockFlag::InUse)
    }
}

/// 块链表，即文件分配表
#[derive(Debug, Clone)]
pub struct FatArea {
    descs: Vec<BlockDescriptor>,
    /// 第一个数据块，之前的都属于元数据区
    first_data: BlockId,
}

impl FatArea {
    pub fn new(max_blocks: usize, first_data: BlockId) -> Self {
        let mut descs = vec![BlockDescriptor::FREE; max_blocks];
        descs[..first_data.index()].fill(BlockDescriptor::RESERVED);

        Self { descs, first_data }
    }

    /// 从磁盘读出的描述符重建，检查元数据区与指针范围
    pub fn from_descriptors(descs: Vec<BlockDescriptor>, first_data: BlockId) -> Result<Self> {
        let fat = Self { descs, first_data };

        for (i, desc) in fat.descs.iter().enumerate() {
            if BitFlags::<BlockFlag>::from_bits(desc.flags).is_err() {
                return Err(Error::corrupted(format!("Block {i} has unknown flags")));
            }
            let reserved = desc.flags().contains(BlockFlag::Reserved);
            if (i < first_data.index()) != reserved || (reserved && !desc.in_use()) {
                return Err(Error::corrupted(format!(
                    "Block {i} disagrees with the metadata region"
                )));
            }
            if !desc.next.is_none() && (!desc.in_use() || reserved || !fat.is_data(desc.next)) {
                return Err(Error::corrupted(format!(
                    "Block {i} links to {} illegally",
                    desc.next
                )));
            }
        }

        Ok(fat)
    }

    pub fn descriptors(&self) -> &[BlockDescriptor] {
        &self.descs
    }

    /// 空闲数据块个数
    pub fn free_count(&self) -> usize {
        self.descs[self.first_data.index()..]
            .iter()
            .filter(|desc| !desc.in_use())
            .count()
    }

    /// 获取下一个块编号。
    /// 若`id`不是已分配的数据块，则报错。
    /// `Ok(None)`表示`id`为链表上最后一个块。
    pub fn next(&self, id: BlockId) -> Result<Option<BlockId>> {
        let id = self.validate_id(id)?;
        Ok(self.descs[id.index()].next.get())
    }

    /// 从`head`开始遍历链表
    pub fn chain(&self, head: BlockId) -> Chain<'_> {
        Chain {
            fat: self,
            next: head.get(),
            budget: self.descs.len(),
        }
    }

    /// 从低到高认领`count`个空闲块并串成链表，返回链表头。
    ///
    /// 调用者需事先确认空闲块足够；扫描越界属于逻辑错误，
    /// 已认领的块会被退回。
    pub fn alloc(&mut self, count: usize) -> Result<BlockId> {
        debug_assert!(count > 0);

        let mut head = BlockId::NONE;
        let mut tail = BlockId::NONE;
        let mut claimed = 0;

        for i in self.first_data.index()..self.descs.len() {
            if claimed == count {
                break;
            }
            if self.descs[i].in_use() {
                continue;
            }

            let id = BlockId::new(i as u32);
            self.descs[i] = BlockDescriptor {
                flags: BlockFlag::InUse as u8,
                next: BlockId::NONE,
            };
            if tail.is_none() {
                head = id;
            } else {
                self.descs[tail.index()].next = id;
            }
            tail = id;
            claimed += 1;
        }

        if claimed < count {
            // 未写入任何数据，直接退回
            let mut id = head.get();
            while let Some(cur) = id {
                id = self.descs[cur.index()].next.get();
                self.descs[cur.index()] = BlockDescriptor::FREE;
            }
            return Err(Error::State(format!(
                "Allocator ran out of blocks: wanted {count}, claimed {claimed}"
            )));
        }

        log::debug!("alloc {count} blocks, head={head}");
        Ok(head)
    }

    /// 释放整个链表，返回释放的块数。
    ///
    /// 先经`zeroize`逐块清零，全部成功后才标记为空闲；
    /// 任何一步失败时块链表保持不变。
    pub fn release(
        &mut self,
        head: BlockId,
        mut zeroize: impl FnMut(BlockId) -> Result<()>,
    ) -> Result<usize> {
        let chain = self.chain(head).collect::<Result<Vec<_>>>()?;
        for &id in &chain {
            zeroize(id)?;
        }
        for id in &chain {
            self.descs[id.index()] = BlockDescriptor::FREE;
        }

        log::debug!("released {} blocks from head={head}", chain.len());
        Ok(chain.len())
    }

    /// 回收不属于任何链表的单个已分配块，调用者负责清零
    pub fn reclaim(&mut self, id: BlockId) -> Result<()> {
        let id = self.validate_id(id)?;
        self.descs[id.index()] = BlockDescriptor::FREE;
        Ok(())
    }
}

impl FatArea {
    fn is_data(&self, id: BlockId) -> bool {
        (self.first_data.index()..self.descs.len()).contains(&id.index())
    }

    fn validate_id(&self, id: BlockId) -> Result<BlockId> {
        if !self.is_data(id) {
            return Err(Error::corrupted(format!("Block {id} is not a data block")));
        }
        if !self.descs[id.index()].in_use() {
            return Err(Error::corrupted(format!("Block {id} in a chain is free")));
        }
        Ok(id)
    }
}

/// 块链表迭代器，遇到损坏的链表时产出错误后终止
#[derive(Debug)]
pub struct Chain<'a> {
    fat: &'a FatArea,
    next: Option<BlockId>,
    /// 剩余步数，用于发现环
    budget: usize,
}

impl Iterator for Chain<'_> {
    type Item = Result<BlockId>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        if self.budget == 0 {
            return Some(Err(Error::corrupted("Block chain loops")));
        }
        self.budget -= 1;

        match self.fat.next(id) {
            Ok(next) => {
                self.next = next;
                Some(Ok(id))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
