//! 单文件后备存储上的简易文件分配表（FAT）文件系统
//!
//! 自上而下：
//!
//! 1. [`FatFileSystem`]：对外的句柄，负责加锁与生命周期
//! 2. 卷：目录表 + 块链表，分配与释放算法
//! 3. 数据区：经由[`block_dev::BlockDevice`]按块读写

mod block;
mod control;
mod data;
mod error;
mod geometry;
pub mod volume;

pub use self::{
    block::BlockId,
    control::{FatFileSystem, Stat},
    error::{Error, Result},
    geometry::Geometry,
    volume::NAME_LEN,
};
