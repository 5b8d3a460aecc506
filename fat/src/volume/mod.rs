//! 卷的布局
//!
//! 目录表 | 块链表 | 签名 | (填充至块边界) | 数据块
//!
//! 前三者合称元数据区，占据编号最小的若干块，
//! 每次变更都整体重写。

mod dir_table;
mod fat;

use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

pub use self::{
    dir_table::{validate_name, DirTable, FileEntry, NAME_LEN},
    fat::{BlockDescriptor, BlockFlag, Chain, FatArea},
};
use crate::{BlockId, Error, Geometry, Result};

/// 元数据末尾的签名，记录创建时的几何参数
#[binrw]
#[brw(little, magic = b"FATS")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    max_files: u32,
    max_blocks: u32,
    block_size: u32,
}

impl Signature {
    pub const SIZE: usize = 4 + 4 + 4 + 4;

    fn of(geometry: &Geometry) -> Self {
        Self {
            max_files: geometry.max_files as u32,
            max_blocks: geometry.max_blocks as u32,
            block_size: geometry.block_size as u32,
        }
    }
}

/// 序列化元数据，长度补齐到元数据区的块边界
pub fn encode(dir: &DirTable, fat: &FatArea, geometry: &Geometry) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(geometry.meta_blocks() * geometry.block_size));

    for entry in dir.entries() {
        entry.write(&mut cursor)?;
    }
    for desc in fat.descriptors() {
        desc.write(&mut cursor)?;
    }
    Signature::of(geometry).write(&mut cursor)?;

    let mut buf = cursor.into_inner();
    debug_assert_eq!(geometry.meta_bytes(), buf.len());
    buf.resize(geometry.meta_blocks() * geometry.block_size, 0);
    Ok(buf)
}

/// 解码后的元数据
#[derive(Debug)]
pub struct Decoded {
    pub dir: DirTable,
    pub fat: FatArea,
    /// 已分配却不属于任何文件的块，由调用者清零回收
    pub orphans: Vec<BlockId>,
}

/// [`encode`]的逆过程；除孤儿块外，任何不符都视为没有有效的文件系统
pub fn decode(buf: &[u8], geometry: &Geometry) -> Result<Decoded> {
    if buf.len() < geometry.meta_bytes() {
        return Err(Error::corrupted("Metadata region is truncated"));
    }
    let mut cursor = Cursor::new(buf);

    let entries = (0..geometry.max_files)
        .map(|_| FileEntry::read(&mut cursor))
        .collect::<binrw::BinResult<Vec<_>>>()?;
    let descs = (0..geometry.max_blocks)
        .map(|_| BlockDescriptor::read(&mut cursor))
        .collect::<binrw::BinResult<Vec<_>>>()?;
    let signature = Signature::read(&mut cursor)?;

    if signature != Signature::of(geometry) {
        return Err(Error::corrupted(format!(
            "Store was created with {signature:?}, not {geometry:?}"
        )));
    }

    let dir = DirTable::from_entries(entries)?;
    let fat = FatArea::from_descriptors(descs, geometry.first_data_block())?;
    let orphans = check_ownership(&dir, &fat, geometry)?;

    Ok(Decoded { dir, fat, orphans })
}

/// 每个文件的链表长度与大小吻合，且任意块至多属于一个文件。
/// 返回无主的已分配块。
fn check_ownership(dir: &DirTable, fat: &FatArea, geometry: &Geometry) -> Result<Vec<BlockId>> {
    let mut owner = vec![false; geometry.max_blocks];

    for entry in dir.used() {
        let mut len = 0;
        for id in fat.chain(entry.head()) {
            let id = id?;
            if owner[id.index()] {
                return Err(Error::corrupted(format!(
                    "Block {id} of '{}' is shared",
                    entry.name()
                )));
            }
            owner[id.index()] = true;
            len += 1;
        }
        if len != entry.size().div_ceil(geometry.block_size) {
            return Err(Error::corrupted(format!(
                "'{}' holds {len} blocks for {} bytes",
                entry.name(),
                entry.size()
            )));
        }
    }

    let first = geometry.first_data_block().index();
    Ok((first..geometry.max_blocks)
        .filter(|&i| fat.descriptors()[i].in_use() && !owner[i])
        .map(|i| BlockId::new(i as u32))
        .collect())
}
