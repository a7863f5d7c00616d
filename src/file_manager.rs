use std::{
    collections::HashMap,
    fmt::Display,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, Write},
    path::{Path, PathBuf},
};

use log::debug;
use parking_lot::Mutex;

use crate::{
    error::{DbError, DbResult},
    page::Page,
};

/// The block id container that contains a specific block number for a specific file
#[derive(Debug, Eq, PartialEq, Clone, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub filename: String,
    pub block_num: usize,
}

impl BlockId {
    /// Sentinel block number used to lock the end of a file while it grows
    pub const END_OF_FILE: usize = usize::MAX;

    pub fn new(filename: String, block_num: usize) -> Self {
        Self {
            filename,
            block_num,
        }
    }

    /// The sentinel block that serializes `size` against `append` for `filename`
    pub fn end_of_file(filename: &str) -> Self {
        Self::new(filename.to_string(), Self::END_OF_FILE)
    }

    pub fn is_end_of_file(&self) -> bool {
        self.block_num == Self::END_OF_FILE
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_end_of_file() {
            write!(f, "[file {}, block eof]", self.filename)
        } else {
            write!(f, "[file {}, block {}]", self.filename, self.block_num)
        }
    }
}

/// The file manager struct that manages the files in the database
///
/// Every file is addressed in whole blocks. The open-file table sits behind its own
/// mutex so the manager can be shared between the log manager, the buffer pool and
/// transactions as a plain `Arc<FileManager>`.
#[derive(Debug)]
pub struct FileManager {
    db_directory: PathBuf,
    block_size: usize,
    is_new: bool,
    sync_writes: bool,
    open_files: Mutex<HashMap<String, File>>,
}

impl FileManager {
    pub fn new<P>(db_directory: &P, block_size: usize) -> DbResult<Self>
    where
        P: AsRef<Path> + ?Sized,
    {
        Self::with_sync(db_directory, block_size, false)
    }

    /// Open the directory, creating it if needed, and remove leftover temporary tables
    pub fn with_sync<P>(db_directory: &P, block_size: usize, sync_writes: bool) -> DbResult<Self>
    where
        P: AsRef<Path> + ?Sized,
    {
        let db_path = db_directory.as_ref().to_path_buf();
        let is_new = !db_path.exists();
        if is_new {
            fs::create_dir_all(&db_path)?;
        }

        //  temp tables never survive a restart
        for entry in fs::read_dir(&db_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_string_lossy().starts_with("temp")
            {
                debug!("removing stale temporary file {:?}", entry.path());
                fs::remove_file(entry.path())?;
            }
        }

        Ok(Self {
            db_directory: db_path,
            block_size,
            is_new,
            sync_writes,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the directory had to be created when this manager was opened
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn directory(&self) -> &Path {
        &self.db_directory
    }

    /// Get the length of the file in blocks
    pub fn length(&self, filename: &str) -> DbResult<usize> {
        let mut open_files = self.open_files.lock();
        let file = Self::get_file(&self.db_directory, &mut open_files, filename)?;
        let len = file.metadata()?.len() as usize;
        Ok(len / self.block_size)
    }

    /// Read the block provided by the block_id into the provided page
    ///
    /// Reading past the end of the file yields a zeroed page.
    pub fn read(&self, block_id: &BlockId, page: &mut Page) -> DbResult<()> {
        let offset = self.offset_of(block_id)?;
        let mut open_files = self.open_files.lock();
        let file = Self::get_file(&self.db_directory, &mut open_files, &block_id.filename)?;
        file.seek(io::SeekFrom::Start(offset))?;
        match file.read_exact(&mut page.contents) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                page.contents = vec![0; self.block_size];
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the page to the block provided by the block_id
    pub fn write(&self, block_id: &BlockId, page: &Page) -> DbResult<()> {
        let offset = self.offset_of(block_id)?;
        let mut open_files = self.open_files.lock();
        let file = Self::get_file(&self.db_directory, &mut open_files, &block_id.filename)?;
        file.seek(io::SeekFrom::Start(offset))?;
        file.write_all(&page.contents)?;
        file.flush()?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Append a new, empty block to the file and return its id
    pub fn append(&self, filename: &str) -> DbResult<BlockId> {
        let mut open_files = self.open_files.lock();
        let file = Self::get_file(&self.db_directory, &mut open_files, filename)?;
        let new_blk_num = file.metadata()?.len() as usize / self.block_size;
        let block_id = BlockId::new(filename.to_string(), new_blk_num);
        let offset = self.offset_of(&block_id)?;
        file.seek(io::SeekFrom::Start(offset))?;
        file.write_all(&vec![0; self.block_size])?;
        file.flush()?;
        Ok(block_id)
    }

    fn offset_of(&self, block_id: &BlockId) -> DbResult<u64> {
        if block_id.is_end_of_file() {
            return Err(DbError::BadBlock(block_id.clone()));
        }
        block_id
            .block_num
            .checked_mul(self.block_size)
            .map(|offset| offset as u64)
            .ok_or_else(|| DbError::BadBlock(block_id.clone()))
    }

    /// Get the file handle for the file with the given filename
    fn get_file<'a>(
        db_directory: &Path,
        open_files: &'a mut HashMap<String, File>,
        filename: &str,
    ) -> DbResult<&'a mut File> {
        if !open_files.contains_key(filename) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(db_directory.join(filename))?;
            open_files.insert(filename.to_string(), file);
        }
        open_files
            .get_mut(filename)
            .ok_or_else(|| DbError::Io(io::Error::new(io::ErrorKind::NotFound, filename.to_string())))
    }
}

#[cfg(test)]
mod file_manager_tests {
    use crate::{
        error::DbError,
        file_manager::{BlockId, FileManager},
        page::Page,
    };

    fn setup() -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let file_manager = FileManager::new(&dir.path().join("db"), 400).unwrap();
        (dir, file_manager)
    }

    #[test]
    fn test_new_directory_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        assert!(FileManager::new(&path, 400).unwrap().is_new());
        assert!(!FileManager::new(&path, 400).unwrap().is_new());
    }

    #[test]
    fn test_temp_files_removed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("temp3.tbl"), [0u8; 400]).unwrap();
        std::fs::write(dir.path().join("students.tbl"), [0u8; 400]).unwrap();
        let _file_manager = FileManager::new(dir.path(), 400).unwrap();
        assert!(!dir.path().join("temp3.tbl").exists());
        assert!(dir.path().join("students.tbl").exists());
    }

    #[test]
    fn test_append_and_length() {
        let (_temp_dir, file_manager) = setup();

        let filename = "testfile";
        assert_eq!(file_manager.length(filename).unwrap(), 0);

        let block_id = file_manager.append(filename).unwrap();
        assert_eq!(block_id.block_num, 0);
        assert_eq!(file_manager.length(filename).unwrap(), 1);

        let block_id_2 = file_manager.append(filename).unwrap();
        assert_eq!(block_id_2.block_num, 1);
        assert_eq!(file_manager.length(filename).unwrap(), 2);
    }

    #[test]
    fn test_write_then_read() {
        let (_temp_dir, file_manager) = setup();
        let block_id = file_manager.append("data").unwrap();

        let mut page = Page::new(400);
        page.set_int(80, 345);
        page.set_string(88, "abcdefghijklm");
        file_manager.write(&block_id, &page).unwrap();

        let mut read_back = Page::new(400);
        file_manager.read(&block_id, &mut read_back).unwrap();
        assert_eq!(read_back.get_int(80), 345);
        assert_eq!(read_back.get_string(88), "abcdefghijklm");
    }

    #[test]
    fn test_read_past_end_gives_zeroed_page() {
        let (_temp_dir, file_manager) = setup();
        let mut page = Page::new(400);
        page.set_int(0, 7);
        file_manager
            .read(&BlockId::new("empty".to_string(), 5), &mut page)
            .unwrap();
        assert_eq!(page.get_int(0), 0);
    }

    #[test]
    fn test_sentinel_block_is_rejected() {
        let (_temp_dir, file_manager) = setup();
        let mut page = Page::new(400);
        let result = file_manager.read(&BlockId::end_of_file("data"), &mut page);
        assert!(matches!(result, Err(DbError::BadBlock(_))));
    }
}
