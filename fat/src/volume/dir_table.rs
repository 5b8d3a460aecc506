use binrw::binrw;

use crate::{BlockId, Error, Result};

/// 文件名字段的宽度
pub const NAME_LEN: usize = 11;

/// 目录表中的一项
///
/// 空文件名表示该槽空闲，此时`size == 0`且`head == NONE`。
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// 以`\0`填充，末尾保留一个字节
    #[brw(pad_after = 1)]
    name: [u8; NAME_LEN],

    /// 实际写入的字节数
    size: u32,

    /// 首个数据块
    head: BlockId,
}

impl Default for FileEntry {
    fn default() -> Self {
        Self::FREE
    }
}

impl FileEntry {
    pub const SIZE: usize = NAME_LEN + 1 + 4 + 4;

    pub const FREE: Self = Self {
        name: [0; NAME_LEN],
        size: 0,
        head: BlockId::NONE,
    };

    /// 新建空文件的目录项
    pub fn named(name: &str) -> Result<Self> {
        validate_name(name)?;
        let mut raw = [0; NAME_LEN];
        raw[..name.len()].copy_from_slice(name.as_bytes());

        Ok(Self {
            name: raw,
            ..Self::FREE
        })
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    pub const fn size(&self) -> usize {
        self.size as usize
    }

    pub const fn head(&self) -> BlockId {
        self.head
    }

    pub fn set_chain(&mut self, head: BlockId, size: u32) {
        self.head = head;
        self.size = size;
    }

    /// 磁盘上读出的目录项是否自洽
    fn check(&self) -> Result<()> {
        if self.is_free() {
            if self.name.iter().any(|&b| b != 0) || self.size != 0 || !self.head.is_none() {
                return Err(Error::corrupted("Free directory slot carries data"));
            }
            return Ok(());
        }

        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        if self.name[len..].iter().any(|&b| b != 0) {
            return Err(Error::corrupted("Directory name has trailing garbage"));
        }
        core::str::from_utf8(&self.name[..len])
            .map_err(|_| Error::corrupted("Directory name is not UTF-8"))?;
        if self.head.is_none() != (self.size == 0) {
            return Err(Error::corrupted(format!(
                "'{}' has size {} but head {}",
                self.name(),
                self.size,
                self.head
            )));
        }
        Ok(())
    }
}

/// 文件名须非空、不超过[`NAME_LEN`]字节且不含`\0`
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("Filename cannot be empty".into()));
    }
    if name.len() > NAME_LEN {
        return Err(Error::Validation(format!(
            "Filename '{name}' is too long ({} bytes, max {NAME_LEN})",
            name.len()
        )));
    }
    if name.contains('\0') {
        return Err(Error::Validation("Filename cannot contain NUL".into()));
    }
    Ok(())
}

/// 定长目录表
#[derive(Debug, Clone)]
pub struct DirTable {
    entries: Vec<FileEntry>,
}

impl DirTable {
    pub fn new(max_files: usize) -> Self {
        Self {
            entries: vec![FileEntry::FREE; max_files],
        }
    }

    /// 从磁盘读出的目录项重建，拒绝损坏或重名的表
    pub fn from_entries(entries: Vec<FileEntry>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            entry.check()?;
            if !entry.is_free() && entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(Error::corrupted(format!(
                    "Duplicate directory name '{}'",
                    entry.name()
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// 按名查找已占用的槽
    pub fn find(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .position(|entry| !entry.is_free() && entry.name() == name)
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.entries.iter().position(FileEntry::is_free)
    }

    pub fn get(&self, slot: usize) -> &FileEntry {
        &self.entries[slot]
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut FileEntry {
        &mut self.entries[slot]
    }

    /// 已占用的槽，按槽序
    pub fn used(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|entry| !entry.is_free())
    }
}
