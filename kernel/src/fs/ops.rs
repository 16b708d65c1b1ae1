//! Descriptor and path operations of the calling process.
//!
//! The descriptor table and working directory belong to the process, so
//! nothing here takes the process-table lock. I/O on a file holds that
//! file's sleep lock, which keeps the cursor consistent between processes
//! sharing it after `fork` or `dup`.

use alloc::string::String;
use alloc::sync::Arc;

use super::file::{Descriptor, OpenDir, OpenFile};
use super::{DirEntry, OpenFlags, Whence, resolve};
use crate::Kernel;
use crate::error::{SysError, SysResult};

impl Kernel {
    /// Absolute form of `path` for the calling process.
    pub fn resolve_path(&self, path: &str) -> SysResult<String> {
        if path.len() > self.config.max_path {
            return Err(SysError::InvalidArgument);
        }
        Ok(resolve(&self.current_data()?.cwd, path)?)
    }

    fn descriptor(&self, fd: usize) -> SysResult<Descriptor> {
        Ok(self.current_data()?.files.get(fd)?.clone())
    }

    fn file(&self, fd: usize) -> SysResult<Arc<OpenFile>> {
        match self.descriptor(fd)? {
            Descriptor::File(file) => Ok(file),
            Descriptor::Dir(_) => Err(SysError::IsDirectory),
            Descriptor::Console => Err(SysError::InvalidArgument),
        }
    }

    pub fn open(&self, path: &str, flags: OpenFlags) -> SysResult<usize> {
        let path = self.resolve_path(path)?;
        if self.fs.is_dir(&path) {
            return Err(SysError::IsDirectory);
        }
        let handle = self.fs.open(&path, flags)?;
        let file = Arc::new(OpenFile::new(handle, flags));
        let fd = self.current_data()?.files.install(Descriptor::File(file))?;
        log::trace!("open {path} {flags:?} -> fd {fd}");
        Ok(fd)
    }

    pub fn close(&self, fd: usize) -> SysResult<()> {
        drop(self.current_data()?.files.take(fd)?);
        Ok(())
    }

    pub fn read(&self, fd: usize, buf: &mut [u8]) -> SysResult<usize> {
        match self.descriptor(fd)? {
            Descriptor::Console => self.console_read(buf),
            Descriptor::File(file) if file.readable() => {
                let n = file.handle.lock(self).read(buf)?;
                Ok(n)
            }
            Descriptor::File(_) => Err(SysError::BadDescriptor),
            Descriptor::Dir(_) => Err(SysError::IsDirectory),
        }
    }

    pub fn write(&self, fd: usize, data: &[u8]) -> SysResult<usize> {
        match self.descriptor(fd)? {
            Descriptor::Console => {
                self.console.write(data);
                Ok(data.len())
            }
            Descriptor::File(file) if file.writable() => {
                let mut handle = file.handle.lock(self);
                if file.flags().contains(OpenFlags::APPEND) {
                    handle.seek(0, Whence::End)?;
                }
                Ok(handle.write(data)?)
            }
            Descriptor::File(_) => Err(SysError::BadDescriptor),
            Descriptor::Dir(_) => Err(SysError::IsDirectory),
        }
    }

    pub fn lseek(&self, fd: usize, offset: i64, whence: Whence) -> SysResult<u64> {
        let file = self.file(fd)?;
        let position = file.handle.lock(self).seek(offset, whence)?;
        Ok(position)
    }

    pub fn fsize(&self, fd: usize) -> SysResult<u64> {
        let file = self.file(fd)?;
        let size = file.handle.lock(self).size();
        Ok(size)
    }

    pub fn dup(&self, fd: usize) -> SysResult<usize> {
        self.current_data()?.files.dup(fd)
    }

    pub fn opendir(&self, path: &str) -> SysResult<usize> {
        let path = self.resolve_path(path)?;
        let handle = self.fs.open_dir(&path)?;
        let dir = Arc::new(OpenDir::new(handle));
        self.current_data()?.files.install(Descriptor::Dir(dir))
    }

    /// Next entry of an open directory; `None` at the end of the listing.
    pub fn readdir(&self, fd: usize) -> SysResult<Option<DirEntry>> {
        match self.descriptor(fd)? {
            Descriptor::Dir(dir) => {
                let entry = dir.handle.lock(self).next_entry()?;
                Ok(entry)
            }
            _ => Err(SysError::NotDirectory),
        }
    }

    pub fn closedir(&self, fd: usize) -> SysResult<()> {
        match self.descriptor(fd)? {
            Descriptor::Dir(_) => self.close(fd),
            _ => Err(SysError::NotDirectory),
        }
    }

    pub fn mkdir(&self, path: &str) -> SysResult<()> {
        let path = self.resolve_path(path)?;
        Ok(self.fs.mkdir(&path)?)
    }

    pub fn unlink(&self, path: &str) -> SysResult<()> {
        let path = self.resolve_path(path)?;
        Ok(self.fs.unlink(&path)?)
    }

    pub fn chdir(&self, path: &str) -> SysResult<()> {
        let path = self.resolve_path(path)?;
        if !self.fs.is_dir(&path) {
            return Err(SysError::NotDirectory);
        }
        self.current_data()?.cwd = path;
        Ok(())
    }

    pub fn getcwd(&self) -> SysResult<String> {
        Ok(self.current_data()?.cwd.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    const RW: OpenFlags = OpenFlags::READ.union(OpenFlags::WRITE).union(OpenFlags::CREATE);

    #[test]
    fn write_seek_read_through_one_descriptor() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        let fd = kernel.open("/notes", RW).unwrap();
        assert_eq!(fd, 3);
        assert_eq!(kernel.write(fd, b"hello world").unwrap(), 11);
        assert_eq!(kernel.fsize(fd), Ok(11));
        assert_eq!(kernel.lseek(fd, 6, Whence::Start), Ok(6));
        let mut buf = [0u8; 16];
        assert_eq!(kernel.read(fd, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"world");
        kernel.close(fd).unwrap();
        assert_eq!(kernel.read(fd, &mut buf), Err(SysError::BadDescriptor));
    }

    #[test]
    fn append_always_writes_at_the_end() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        testing::add_file("/log", b"one\n");
        let fd = kernel.open("/log", OpenFlags::APPEND | OpenFlags::READ).unwrap();
        kernel.write(fd, b"two\n").unwrap();
        assert_eq!(testing::file_contents("/log"), b"one\ntwo\n");
    }

    #[test]
    fn access_mode_is_enforced() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        testing::add_file("/ro", b"data");
        let fd = kernel.open("/ro", OpenFlags::READ).unwrap();
        assert_eq!(kernel.write(fd, b"x"), Err(SysError::BadDescriptor));
        assert_eq!(kernel.open("/absent", OpenFlags::READ), Err(SysError::NoEntry));
    }

    #[test]
    fn the_handle_closes_when_the_last_descriptor_goes() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        testing::add_file("/f", b"");
        let fd = kernel.open("/f", OpenFlags::READ).unwrap();
        let copy = kernel.dup(fd).unwrap();
        kernel.close(fd).unwrap();
        assert_eq!(testing::closed_files(), 0);
        kernel.close(copy).unwrap();
        assert_eq!(testing::closed_files(), 1);
    }

    #[test]
    fn descriptor_table_fills_up() {
        let kernel = testing::boot_with(|config| config.max_open_files = 4);
        testing::run_init(&kernel);
        testing::add_file("/f", b"");
        assert_eq!(kernel.open("/f", OpenFlags::READ), Ok(3));
        assert_eq!(kernel.open("/f", OpenFlags::READ), Err(SysError::NoDescriptors));
        assert_eq!(testing::closed_files(), 1);
    }

    #[test]
    fn console_descriptors_reach_the_console() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        kernel.write(1, b"hi\n").unwrap();
        assert_eq!(testing::console_output(), b"hi\n");
        assert!(kernel.console_input(b"ls\n"));
        let mut buf = [0u8; 8];
        assert_eq!(kernel.read(0, &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"ls\n");
    }

    #[test]
    fn directories_list_and_change() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        kernel.mkdir("/home").unwrap();
        assert_eq!(kernel.mkdir("/home"), Err(SysError::Exists));
        kernel.chdir("home").unwrap();
        assert_eq!(kernel.getcwd().unwrap(), "/home");
        kernel.open("a.txt", RW).unwrap();
        assert_eq!(kernel.chdir("a.txt"), Err(SysError::NotDirectory));

        let fd = kernel.opendir(".").unwrap();
        let entry = kernel.readdir(fd).unwrap().unwrap();
        assert_eq!(entry.name, "a.txt");
        assert!(!entry.is_dir);
        assert_eq!(kernel.readdir(fd), Ok(None));
        assert_eq!(kernel.closedir(0), Err(SysError::NotDirectory));
        kernel.closedir(fd).unwrap();

        kernel.chdir("..").unwrap();
        kernel.unlink("/home/a.txt").unwrap();
        assert_eq!(kernel.unlink("/home/a.txt"), Err(SysError::NoEntry));
    }
}
