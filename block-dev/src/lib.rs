//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统只通过块设备驱动访问后备存储，
//! 宿主文件由 [`BlockFile`] 驱动，内存盘由 [`RamDisk`] 驱动。

mod block_file;
mod ram_disk;

use core::fmt::Debug;
use std::io;

pub use self::{block_file::BlockFile, ram_disk::RamDisk};

/// 块设备驱动特质
///
/// `buf` 的长度必须等于 [`BlockDevice::block_size`]。
pub trait BlockDevice: Debug + Send + Sync {
    fn block_size(&self) -> usize;

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()>;

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()>;

    /// 将已写入的数据落盘
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}
