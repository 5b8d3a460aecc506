use binrw::binrw;
use derive_more::{Display, From, Into};

/// 块编号，同时也是其描述符在块链表中的索引
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    /// 空指针：链表尾，或空文件的起始块
    pub const NONE: Self = Self(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn is_none(self) -> bool {
        self.0 == Self::NONE.0
    }

    /// `NONE`映射为`None`
    pub const fn get(self) -> Option<Self> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}
