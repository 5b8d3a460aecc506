use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use block_dev::{BlockDevice, BlockFile};
use parking_lot::RwLock;

use crate::data::DataArea;
use crate::volume::{self, DirTable, FatArea, FileEntry};
use crate::{BlockId, Error, Geometry, Result};

/// 存储的使用情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub max_files: usize,
    pub files: usize,
    pub block_size: usize,
    /// 可分配给文件的块数
    pub data_blocks: usize,
    pub free_blocks: usize,
}

/// 文件系统句柄
///
/// 所有操作都可以从多个线程并发调用：
/// 创建、写入、删除独占整个卷，读取与列举共享。
/// 有写者排队时，后到的读者不会插队。
#[derive(Debug)]
pub struct FatFileSystem {
    geometry: Geometry,
    /// 关闭后为`None`
    volume: RwLock<Option<Volume>>,
}

impl FatFileSystem {
    /// 打开或创建后备文件，并将其长度设为`geometry.total_size`。
    pub fn open(path: impl AsRef<Path>, geometry: Geometry) -> Result<Self> {
        let path = path.as_ref();
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let existing = fd.metadata()?.len() > 0;
        fd.set_len(geometry.total_size)?;
        log::info!("store={path:?} existing={existing}");

        let dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd, geometry.block_size)?);
        Self::mount(dev, geometry)
    }

    /// 在块设备上加载文件系统，元数据无效时重新格式化。
    ///
    /// 读取设备失败不会触发格式化，而是原样返回错误。
    pub fn mount(dev: Arc<dyn BlockDevice>, geometry: Geometry) -> Result<Self> {
        if dev.block_size() != geometry.block_size {
            return Err(Error::Validation(format!(
                "Device blocks are {} bytes, geometry wants {}",
                dev.block_size(),
                geometry.block_size
            )));
        }

        let data = DataArea::new(dev);
        let volume = match Volume::load(data.clone(), geometry) {
            Ok(volume) => {
                log::info!(
                    "loaded {} files, {} free blocks",
                    volume.dir.used().count(),
                    volume.fat.free_count()
                );
                volume
            }
            Err(Error::StorageIo(e)) => {
                log::error!("failed to load file system: {e}");
                return Err(Error::StorageIo(e));
            }
            Err(e) => {
                log::warn!("no valid file system ({e}), formatting");
                Volume::format(data, geometry)?
            }
        };

        Ok(Self {
            geometry,
            volume: RwLock::new(Some(volume)),
        })
    }

    pub fn create(&self, name: &str) -> Result<()> {
        self.exclusive(|volume| volume.create(name))
    }

    /// 以`content`整体覆盖文件内容
    pub fn write(&self, name: &str, content: &[u8]) -> Result<()> {
        self.exclusive(|volume| volume.write(name, content))
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.shared(|volume| volume.read(name))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.exclusive(|volume| volume.delete(name))
    }

    /// 按目录表槽序列出文件名
    pub fn list(&self) -> Result<Vec<String>> {
        self.shared(|volume| Ok(volume.dir.used().map(|e| e.name().to_owned()).collect()))
    }

    pub fn stat(&self) -> Result<Stat> {
        self.shared(|volume| {
            Ok(Stat {
                max_files: volume.dir.capacity(),
                files: volume.dir.used().count(),
                block_size: self.geometry.block_size,
                data_blocks: self.geometry.data_blocks(),
                free_blocks: volume.fat.free_count(),
            })
        })
    }

    /// 写回元数据并释放设备；可重复调用
    pub fn close(&self) -> Result<()> {
        match self.volume.write().take() {
            Some(volume) => {
                log::info!("closing file system");
                volume.flush()
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.volume.read().is_none()
    }
}

impl FatFileSystem {
    fn shared<R>(&self, f: impl FnOnce(&Volume) -> Result<R>) -> Result<R> {
        let guard = self.volume.read();
        f(guard.as_ref().ok_or_else(Error::closed)?)
    }

    fn exclusive<R>(&self, f: impl FnOnce(&mut Volume) -> Result<R>) -> Result<R> {
        let mut guard = self.volume.write();
        f(guard.as_mut().ok_or_else(Error::closed)?)
    }
}

impl Drop for FatFileSystem {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("failed to close file system: {e}");
        }
    }
}

/// 打开的卷：内存中的两张表是权威副本，每次变更后整体写回
#[derive(Debug)]
struct Volume {
    geometry: Geometry,
    dir: DirTable,
    fat: FatArea,
    data: DataArea,
}

impl Volume {
    fn load(data: DataArea, geometry: Geometry) -> Result<Self> {
        let buf = data.read_leading(geometry.meta_blocks())?;
        let volume::Decoded { dir, fat, orphans } = volume::decode(&buf, &geometry)?;
        let mut volume = Self {
            geometry,
            dir,
            fat,
            data,
        };

        // 上次释放中途失败留下的块
        if !orphans.is_empty() {
            log::warn!("reclaiming {} orphan blocks: {orphans:?}", orphans.len());
            for id in orphans {
                volume.data.zeroize(id)?;
                volume.fat.reclaim(id)?;
            }
            volume.flush()?;
        }
        Ok(volume)
    }

    fn format(data: DataArea, geometry: Geometry) -> Result<Self> {
        let volume = Self {
            geometry,
            dir: DirTable::new(geometry.max_files),
            fat: FatArea::new(geometry.max_blocks, geometry.first_data_block()),
            data,
        };
        volume.flush()?;
        for i in geometry.first_data_block().index()..geometry.max_blocks {
            volume.data.zeroize(BlockId::new(i as u32))?;
        }
        volume.data.sync()?;

        log::info!(
            "formatted {} files x {} blocks of {} bytes, {} metadata blocks",
            geometry.max_files,
            geometry.max_blocks,
            geometry.block_size,
            geometry.meta_blocks()
        );
        Ok(volume)
    }

    fn flush(&self) -> Result<()> {
        let buf = volume::encode(&self.dir, &self.fat, &self.geometry)?;
        self.data
            .write_leading(&buf)
            .and_then(|()| self.data.sync())
            .inspect_err(|e| {
                log::error!("metadata flush failed: {e}");
            })
    }

    fn lookup(&self, name: &str) -> Result<usize> {
        self.dir
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }

    fn create(&mut self, name: &str) -> Result<()> {
        let entry = FileEntry::named(name)?;
        if self.dir.find(name).is_some() {
            return Err(Error::AlreadyExists(name.to_owned()));
        }
        let slot = self.dir.free_slot().ok_or_else(|| {
            Error::Capacity(format!(
                "Maximum number of files ({}) reached",
                self.dir.capacity()
            ))
        })?;

        *self.dir.get_mut(slot) = entry;
        if let Err(e) = self.flush() {
            *self.dir.get_mut(slot) = FileEntry::FREE;
            return Err(e);
        }
        log::debug!("created '{name}' in slot {slot}");
        Ok(())
    }

    /// 新链表先写好并落盘，再释放旧链表；
    /// 中途失败时新链表被退回，目录项保持原样。
    fn write(&mut self, name: &str, content: &[u8]) -> Result<()> {
        let slot = self.lookup(name)?;
        let block_size = self.geometry.block_size;
        let needed = content.len().div_ceil(block_size);
        let free = self.fat.free_count();
        if needed > free {
            return Err(Error::Capacity(format!(
                "File too large: {} bytes need {needed} blocks, {free} free",
                content.len()
            )));
        }
        let size = u32::try_from(content.len())
            .map_err(|_| Error::Capacity(format!("File too large: {} bytes", content.len())))?;

        let head = if needed == 0 {
            BlockId::NONE
        } else {
            self.fat.alloc(needed)?
        };
        if let Err(e) = self.fill(head, content) {
            self.discard(head);
            return Err(e);
        }

        let previous = self.dir.get(slot).clone();
        self.dir.get_mut(slot).set_chain(head, size);
        if let Err(e) = self.flush() {
            *self.dir.get_mut(slot) = previous;
            self.discard(head);
            return Err(e);
        }

        // 新内容已生效；此后的失败只会留下孤儿块，下次加载时回收
        let data = &self.data;
        let released = self
            .fat
            .release(previous.head(), |id| data.zeroize(id))
            .and_then(|released| self.flush().map(|()| released));
        match released {
            Ok(released) => log::debug!(
                "wrote {} bytes to '{name}': {needed} blocks in, {released} blocks out",
                content.len()
            ),
            Err(e) => log::error!(
                "rewrote '{name}' but its old chain from {} was not released: {e}",
                previous.head()
            ),
        }
        Ok(())
    }

    fn fill(&self, head: BlockId, content: &[u8]) -> Result<()> {
        let mut chunks = content.chunks(self.geometry.block_size);
        for id in self.fat.chain(head) {
            let chunk = chunks
                .next()
                .ok_or_else(|| Error::State(format!("Chain from {head} is too long")))?;
            self.data.write(id?, chunk)?;
        }
        if chunks.next().is_some() {
            return Err(Error::State(format!("Chain from {head} is too short")));
        }
        Ok(())
    }

    /// 退回尚未挂到目录项上的链表。
    ///
    /// 清零失败也照常释放：块里至多是本次写入的残片，
    /// 而再次分配时总会整块覆写。
    fn discard(&mut self, head: BlockId) {
        let data = &self.data;
        let released = self.fat.release(head, |id| {
            if let Err(e) = data.zeroize(id) {
                log::warn!("block {id} left dirty: {e}");
            }
            Ok(())
        });
        if let Err(e) = released {
            log::error!("failed to discard chain from {head}: {e}");
        }
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.dir.get(self.lookup(name)?);
        let size = entry.size();
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut content = Vec::with_capacity(size);
        let mut block = vec![0; self.geometry.block_size];
        for id in self.fat.chain(entry.head()) {
            if content.len() == size {
                break;
            }
            self.data.read(id?, &mut block)?;
            let take = (size - content.len()).min(block.len());
            content.extend_from_slice(&block[..take]);
        }

        if content.len() < size {
            return Err(Error::corrupted(format!(
                "Chain of '{name}' ends after {} of {size} bytes",
                content.len()
            )));
        }
        Ok(content)
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let slot = self.lookup(name)?;
        let head = self.dir.get(slot).head();

        // 释放失败时块链表未变，目录项原样保留
        let data = &self.data;
        let released = self.fat.release(head, |id| data.zeroize(id))?;
        *self.dir.get_mut(slot) = FileEntry::FREE;
        self.flush()?;
        log::debug!("deleted '{name}', {released} blocks freed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::ops::Range;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use block_dev::RamDisk;
    use parking_lot::Mutex;

    use super::*;

    fn ram(geometry: Geometry) -> (Arc<RamDisk>, FatFileSystem) {
        let disk = Arc::new(RamDisk::new(geometry.max_blocks, geometry.block_size));
        let fs = FatFileSystem::mount(disk.clone(), geometry).unwrap();
        (disk, fs)
    }

    fn small() -> Geometry {
        Geometry::fitted(5, 10, 128).unwrap()
    }

    #[test]
    fn round_trip() {
        let (_, fs) = ram(small());
        fs.create("small.txt").unwrap();
        fs.write("small.txt", b"Hello World!").unwrap();
        assert_eq!(b"Hello World!".to_vec(), fs.read("small.txt").unwrap());

        let large: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
        fs.create("large.txt").unwrap();
        fs.write("large.txt", &large).unwrap();
        assert_eq!(large, fs.read("large.txt").unwrap());
        assert_eq!(8 - 1 - 3, fs.stat().unwrap().free_blocks);
    }

    #[test]
    fn empty_files() {
        let (_, fs) = ram(small());
        fs.create("empty").unwrap();
        assert!(fs.read("empty").unwrap().is_empty());

        fs.write("empty", b"x").unwrap();
        fs.write("empty", b"").unwrap();
        assert!(fs.read("empty").unwrap().is_empty());
        assert_eq!(8, fs.stat().unwrap().free_blocks);
    }

    #[test]
    fn create_errors() {
        let (_, fs) = ram(small());
        assert!(matches!(fs.create(""), Err(Error::Validation(_))));
        assert!(matches!(
            fs.create("verylongfilename.txt"),
            Err(Error::Validation(_))
        ));

        fs.create("test.txt").unwrap();
        let err = fs.create("test.txt").unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(err.to_string().contains("already exists"));

        for i in 1..5 {
            fs.create(&format!("file{i}")).unwrap();
        }
        let err = fs.create("extra").unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
        assert!(err.to_string().contains("Maximum"));
    }

    #[test]
    fn missing_files() {
        let (_, fs) = ram(small());
        for err in [
            fs.write("ghost", b"boo").unwrap_err(),
            fs.read("ghost").unwrap_err(),
            fs.delete("ghost").unwrap_err(),
        ] {
            assert!(matches!(err, Error::NotFound(_)));
            assert!(err.to_string().contains("does not exist"));
        }
    }

    #[test]
    fn overwrite_reclaims() {
        let (_, fs) = ram(small());
        fs.create("f").unwrap();
        let before = fs.stat().unwrap().free_blocks;

        fs.write("f", &[b'a'; 300]).unwrap();
        fs.write("f", b"short").unwrap();
        assert_eq!(b"short".to_vec(), fs.read("f").unwrap());
        assert_eq!(before - 1, fs.stat().unwrap().free_blocks);
    }

    #[test]
    fn too_large_keeps_old_content() {
        let (_, fs) = ram(small());
        fs.create("f").unwrap();
        fs.write("f", b"keep me").unwrap();

        let err = fs.write("f", &[0; 8 * 128]).unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
        assert!(err.to_string().contains("too large"));
        assert_eq!(b"keep me".to_vec(), fs.read("f").unwrap());
        assert_eq!(7, fs.stat().unwrap().free_blocks);
    }

    #[test]
    fn delete_zeroizes() {
        let geometry = small();
        let (disk, fs) = ram(geometry);
        fs.create("a").unwrap();
        fs.write("a", &[0xAB; 200]).unwrap();
        assert_eq!(6, fs.stat().unwrap().free_blocks);

        fs.delete("a").unwrap();
        assert_eq!(8, fs.stat().unwrap().free_blocks);
        assert!(fs.list().unwrap().is_empty());
        let image = disk.image();
        assert!(image[geometry.meta_blocks() * geometry.block_size..]
            .iter()
            .all(|&b| b == 0));

        // 短写不会读到旧内容
        fs.create("b").unwrap();
        fs.write("b", b"hi").unwrap();
        let image = disk.image();
        let first = geometry.meta_blocks() * geometry.block_size;
        assert_eq!(b"hi", &image[first..first + 2]);
        assert!(image[first + 2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn list_in_slot_order() {
        let (_, fs) = ram(small());
        for name in ["a", "b", "c"] {
            fs.create(name).unwrap();
        }
        assert_eq!(vec!["a", "b", "c"], fs.list().unwrap());

        fs.delete("a").unwrap();
        fs.create("d").unwrap();
        assert_eq!(vec!["d", "b", "c"], fs.list().unwrap());
    }

    #[test]
    fn remount_keeps_files() {
        let geometry = small();
        let (disk, fs) = ram(geometry);
        fs.create("persist").unwrap();
        fs.write("persist", b"saveddata").unwrap();
        fs.close().unwrap();
        fs.close().unwrap();
        assert!(fs.is_closed());
        assert!(matches!(fs.read("persist"), Err(Error::State(_))));
        assert!(matches!(fs.create("x"), Err(Error::State(_))));

        let fs = FatFileSystem::mount(disk, geometry).unwrap();
        assert_eq!(b"saveddata".to_vec(), fs.read("persist").unwrap());
        assert_eq!(7, fs.stat().unwrap().free_blocks);
    }

    #[test]
    fn foreign_geometry_reformats() {
        let geometry = small();
        let (disk, fs) = ram(geometry);
        fs.create("old").unwrap();
        drop(fs);

        let other = Geometry::fitted(4, 10, 128).unwrap();
        let fs = FatFileSystem::mount(disk, other).unwrap();
        assert!(fs.list().unwrap().is_empty());
        assert_eq!(4, fs.stat().unwrap().max_files);
    }

    /// 可在运行时让指定块写入失败、或让读取全部失败的内存盘
    #[derive(Debug)]
    struct FlakyDisk {
        inner: RamDisk,
        bad_blocks: Mutex<Range<usize>>,
        unreadable: AtomicBool,
        syncs: AtomicUsize,
    }

    impl FlakyDisk {
        fn new(geometry: &Geometry) -> Arc<Self> {
            Arc::new(Self {
                inner: RamDisk::new(geometry.max_blocks, geometry.block_size),
                bad_blocks: Mutex::new(0..0),
                unreadable: AtomicBool::new(false),
                syncs: AtomicUsize::new(0),
            })
        }

        fn break_writes(&self, blocks: Range<usize>) {
            *self.bad_blocks.lock() = blocks;
        }
    }

    impl BlockDevice for FlakyDisk {
        fn block_size(&self) -> usize {
            self.inner.block_size()
        }

        fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
            if self.unreadable.load(Ordering::SeqCst) {
                return Err(io::Error::other("injected"));
            }
            self.inner.read_block(block_id, buf)
        }

        fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
            if self.bad_blocks.lock().contains(&block_id) {
                return Err(io::Error::other("injected"));
            }
            self.inner.write_block(block_id, buf)
        }

        fn sync(&self) -> io::Result<()> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// `keep`占块2，`f`的200字节占块3、4
    fn two_files(disk: &Arc<FlakyDisk>, geometry: Geometry) -> FatFileSystem {
        let fs = FatFileSystem::mount(disk.clone(), geometry).unwrap();
        fs.create("keep").unwrap();
        fs.write("keep", b"precious").unwrap();
        fs.create("f").unwrap();
        fs.write("f", &[7; 200]).unwrap();
        assert_eq!(5, fs.stat().unwrap().free_blocks);
        fs
    }

    #[test]
    fn failed_write_leaks_nothing() {
        let geometry = small();
        let disk = FlakyDisk::new(&geometry);
        let fs = FatFileSystem::mount(disk.clone(), geometry).unwrap();
        fs.create("f").unwrap();
        fs.write("f", b"original").unwrap();

        disk.break_writes(geometry.meta_blocks()..geometry.max_blocks);
        let err = fs.write("f", &[1; 500]).unwrap_err();
        assert!(matches!(err, Error::StorageIo(_)));
        disk.break_writes(0..0);

        assert_eq!(b"original".to_vec(), fs.read("f").unwrap());
        assert_eq!(7, fs.stat().unwrap().free_blocks);

        drop(fs);
        let fs = FatFileSystem::mount(disk, geometry).unwrap();
        assert_eq!(b"original".to_vec(), fs.read("f").unwrap());
    }

    #[test]
    fn every_mutation_syncs() {
        let geometry = small();
        let disk = FlakyDisk::new(&geometry);
        let fs = FatFileSystem::mount(disk.clone(), geometry).unwrap();

        let mut last = disk.syncs.load(Ordering::SeqCst);
        let mut synced = || {
            let now = disk.syncs.load(Ordering::SeqCst);
            let more = now > last;
            last = now;
            more
        };
        fs.create("f").unwrap();
        assert!(synced());
        fs.write("f", b"data").unwrap();
        assert!(synced());
        fs.read("f").unwrap();
        assert!(!synced());
        fs.delete("f").unwrap();
        assert!(synced());
    }

    #[test]
    fn failed_delete_keeps_the_file() {
        let geometry = small();
        let disk = FlakyDisk::new(&geometry);
        let fs = two_files(&disk, geometry);

        disk.break_writes(4..5);
        assert!(matches!(fs.delete("f"), Err(Error::StorageIo(_))));
        assert_eq!(vec!["keep", "f"], fs.list().unwrap());
        assert_eq!(5, fs.stat().unwrap().free_blocks);

        drop(fs);
        let fs = FatFileSystem::mount(disk.clone(), geometry).unwrap();
        assert_eq!(vec!["keep", "f"], fs.list().unwrap());
        assert_eq!(b"precious".to_vec(), fs.read("keep").unwrap());

        disk.break_writes(0..0);
        fs.delete("f").unwrap();
        assert_eq!(7, fs.stat().unwrap().free_blocks);
    }

    #[test]
    fn committed_write_survives_failed_release() {
        let geometry = small();
        let disk = FlakyDisk::new(&geometry);
        let fs = two_files(&disk, geometry);

        disk.break_writes(4..5);
        fs.write("f", b"fresh").unwrap();
        assert_eq!(b"fresh".to_vec(), fs.read("f").unwrap());
        // 旧链表仍占着块3、4
        assert_eq!(4, fs.stat().unwrap().free_blocks);

        drop(fs);
        disk.break_writes(0..0);
        let fs = FatFileSystem::mount(disk.clone(), geometry).unwrap();
        assert_eq!(vec!["keep", "f"], fs.list().unwrap());
        assert_eq!(b"precious".to_vec(), fs.read("keep").unwrap());
        assert_eq!(b"fresh".to_vec(), fs.read("f").unwrap());
        assert_eq!(6, fs.stat().unwrap().free_blocks);

        let image = disk.inner.image();
        let bs = geometry.block_size;
        assert!(image[3 * bs..5 * bs].iter().all(|&b| b == 0));
    }

    #[test]
    fn unreadable_store_is_not_reformatted() {
        let geometry = small();
        let disk = FlakyDisk::new(&geometry);
        drop(two_files(&disk, geometry));

        disk.unreadable.store(true, Ordering::SeqCst);
        let err = FatFileSystem::mount(disk.clone(), geometry).unwrap_err();
        assert!(matches!(err, Error::StorageIo(_)));
        disk.unreadable.store(false, Ordering::SeqCst);

        let fs = FatFileSystem::mount(disk, geometry).unwrap();
        assert_eq!(b"precious".to_vec(), fs.read("keep").unwrap());
        assert_eq!(vec![7; 200], fs.read("f").unwrap());
    }
}
