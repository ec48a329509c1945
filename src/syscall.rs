//! System-call surface consumed by the (out-of-scope) trampoline
//! (`spec.md` §6, `SPEC_FULL.md` §6 "Syscall surface realization").
//!
//! Each `sys_*` function here is the core's half of one numeric
//! system call: argument parsing, user-pointer validation, and the
//! trampoline itself live in the out-of-scope syscall dispatcher
//! (`spec.md` §1); what a dispatcher calls into is exactly this
//! module, already handed a resolved `path: &str`/`buf: &mut [u8]`
//! rather than a raw user address to fetch. `halt`, `exec`, and `wait`
//! are not given `sys_*` functions here: they belong to the thread
//! scheduler and the ELF loader, both "deliberately out of scope"
//! collaborators per `spec.md` §1 — this module exposes only the
//! filesystem-mutex-synchronised `fs.cache.flush_all()` a `halt`
//! implementation would need to call before powering off.

use crate::error::{KernelError, Result};
use crate::fs::path::{namex, Path};
use crate::fs::{dirent, file::FileHandle, InodeType};
use crate::kernel::Kernel;
use crate::process::Process;
use crate::vm::mmap;

/// Descriptor reserved for the console's input stream; never consults
/// the file table (`spec.md` §4.5).
pub const STDIN_FD: usize = 0;
/// Descriptor reserved for the console's output stream.
pub const STDOUT_FD: usize = 1;

fn reject_console_fd(fd: usize) -> Result<()> {
    if fd == STDIN_FD || fd == STDOUT_FD {
        return Err(KernelError::InvalidArgument(
            "fd 0/1 are console descriptors, handled outside this crate",
        ));
    }
    Ok(())
}

/// `create(path, initial_size)` — `spec.md` §6/§4.3 "Create". Fails with
/// [`KernelError::AlreadyExists`] if `path`'s final component is already
/// present in its parent directory.
pub fn sys_create(kernel: &Kernel, process: &Process, path: &str, initial_size: u32) -> Result<()> {
    let _guard = kernel.fs_ops.lock().unwrap();
    let (parent, name) = namex(&kernel.fs, Path::new(path), process.cwd, true)?;
    let name = name.ok_or(KernelError::InvalidArgument("create: empty path"))?;

    let result = (|| -> Result<()> {
        if dirent::lookup(&kernel.fs, parent, name).is_some() {
            return Err(KernelError::AlreadyExists);
        }
        let sector = kernel
            .fs
            .free_map
            .allocate(&kernel.fs.cache, 1)
            .ok_or(KernelError::Exhausted { resource: "filesystem sectors" })?;
        let mut committed = false;
        let guard = scopeguard::guard((), |_| {
            if !committed {
                kernel.fs.free_map.release(&kernel.fs.cache, sector, 1);
            }
        });
        kernel.fs.create(sector, initial_size, InodeType::File)?;
        dirent::add(&kernel.fs, parent, name, sector)?;
        committed = true;
        drop(guard);
        Ok(())
    })();

    kernel.fs.close(parent);
    result
}

/// `remove(path)` — `spec.md` §6/§4.4 "Remove". Fails on a non-empty
/// directory or a protected entry without touching the filesystem.
pub fn sys_remove(kernel: &Kernel, process: &Process, path: &str) -> Result<()> {
    let _guard = kernel.fs_ops.lock().unwrap();
    let (parent, name) = namex(&kernel.fs, Path::new(path), process.cwd, true)?;
    let name = name.ok_or(KernelError::InvalidArgument("remove: empty path"))?;
    let result = dirent::remove(&kernel.fs, parent, name);
    kernel.fs.close(parent);
    result
}

/// `open(path) -> fd` — `spec.md` §6.
pub fn sys_open(kernel: &Kernel, process: &mut Process, path: &str) -> Result<usize> {
    let _guard = kernel.fs_ops.lock().unwrap();
    let (inode, _) = namex(&kernel.fs, Path::new(path), process.cwd, false)?;
    process.fds.get_fd(FileHandle::new(inode)).map_err(|e| {
        kernel.fs.close(inode);
        e
    })
}

/// `filesize(fd)` — `spec.md` §6.
pub fn sys_filesize(kernel: &Kernel, process: &Process, fd: usize) -> Result<u32> {
    reject_console_fd(fd)?;
    let file = process.fds.get_file(fd).ok_or(KernelError::InvalidArgument("filesize: bad fd"))?;
    Ok(kernel.fs.length(file.inode) as u32)
}

/// `read(fd, buf, n)` — `spec.md` §6. Advances the descriptor's offset
/// by the number of bytes actually transferred (possibly a short read
/// at EOF, `spec.md` §4.3 "read_at").
pub fn sys_read(kernel: &Kernel, process: &mut Process, fd: usize, buf: &mut [u8]) -> Result<usize> {
    reject_console_fd(fd)?;
    let file = process
        .fds
        .get_file_mut(fd)
        .ok_or(KernelError::InvalidArgument("read: bad fd"))?;
    let n = kernel.fs.read_at(file.inode, buf, file.offset);
    file.offset += n as u32;
    Ok(n)
}

/// `write(fd, buf, n)` — `spec.md` §6/§7. Writing to a directory is a
/// permission error; writing to a deny-write file returns 0 (`spec.md`
/// §4.3 "Deny-write"), not an error.
pub fn sys_write(kernel: &Kernel, process: &mut Process, fd: usize, buf: &[u8]) -> Result<usize> {
    reject_console_fd(fd)?;
    let file = process
        .fds
        .get_file_mut(fd)
        .ok_or(KernelError::InvalidArgument("write: bad fd"))?;
    if kernel.fs.inode_type(file.inode) == InodeType::Dir {
        return Err(KernelError::PermissionDenied);
    }
    let n = kernel.fs.write_at(file.inode, buf, file.offset)?;
    file.offset += n as u32;
    Ok(n)
}

/// `seek(fd, pos)` — `spec.md` §6.
pub fn sys_seek(process: &mut Process, fd: usize, pos: u32) -> Result<()> {
    reject_console_fd(fd)?;
    let file = process
        .fds
        .get_file_mut(fd)
        .ok_or(KernelError::InvalidArgument("seek: bad fd"))?;
    file.offset = pos;
    Ok(())
}

/// `tell(fd)` — `spec.md` §6.
pub fn sys_tell(process: &Process, fd: usize) -> Result<u32> {
    reject_console_fd(fd)?;
    let file = process.fds.get_file(fd).ok_or(KernelError::InvalidArgument("tell: bad fd"))?;
    Ok(file.offset)
}

/// `close(fd)` — `spec.md` §6/§4.3. Releases the file's deny-write hold
/// if it had one, then closes the underlying inode handle.
pub fn sys_close(kernel: &Kernel, process: &mut Process, fd: usize) -> Result<()> {
    reject_console_fd(fd)?;
    let file = process
        .fds
        .remove_fd(fd)
        .ok_or(KernelError::InvalidArgument("close: bad fd"))?;
    if file.deny_write {
        kernel.fs.allow_write(file.inode);
    }
    kernel.fs.close(file.inode);
    Ok(())
}

/// `mmap(fd, addr) -> id` — `spec.md` §6/§4.8.
pub fn sys_mmap(kernel: &Kernel, process: &mut Process, fd: usize, addr: u64) -> Result<mmap::MmapId> {
    reject_console_fd(fd)?;
    mmap::mmap(kernel, process, fd, addr)
}

/// `munmap(id)` — `spec.md` §6/§4.8.
pub fn sys_munmap(kernel: &Kernel, process: &mut Process, id: mmap::MmapId) -> Result<()> {
    mmap::munmap(&kernel.fs, process, id)
}

/// `chdir(path)` — `spec.md` §6.
pub fn sys_chdir(kernel: &Kernel, process: &mut Process, path: &str) -> Result<()> {
    let _guard = kernel.fs_ops.lock().unwrap();
    let (inode, _) = namex(&kernel.fs, Path::new(path), process.cwd, false)?;
    if kernel.fs.inode_type(inode) != InodeType::Dir {
        kernel.fs.close(inode);
        return Err(KernelError::InvalidArgument("chdir: not a directory"));
    }
    let old_cwd = process.cwd;
    process.cwd = inode;
    kernel.fs.close(old_cwd);
    Ok(())
}

/// `mkdir(path)` — `spec.md` §6/§4.4 "dir_create".
pub fn sys_mkdir(kernel: &Kernel, process: &Process, path: &str) -> Result<()> {
    let _guard = kernel.fs_ops.lock().unwrap();
    let (parent, name) = namex(&kernel.fs, Path::new(path), process.cwd, true)?;
    let name = name.ok_or(KernelError::InvalidArgument("mkdir: empty path"))?;
    let result = dirent::dir_create(&kernel.fs, parent, name);
    kernel.fs.close(parent);
    match result {
        Ok(new_dir) => {
            kernel.fs.close(new_dir);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// `readdir(fd, name_out)` — `spec.md` §6/§4.4 "Readdir". Returns
/// `Ok(None)` at EOF rather than the spec's boolean return, since the
/// entry name itself is the payload here (the caller owns copying it
/// into `name_out`, out of scope per `spec.md` §1).
pub fn sys_readdir(kernel: &Kernel, process: &mut Process, fd: usize) -> Result<Option<String>> {
    reject_console_fd(fd)?;
    let file = process
        .fds
        .get_file_mut(fd)
        .ok_or(KernelError::InvalidArgument("readdir: bad fd"))?;
    if kernel.fs.inode_type(file.inode) != InodeType::Dir {
        return Err(KernelError::InvalidArgument("readdir: not a directory"));
    }
    let inode = file.inode;
    Ok(file.dir_cursor.next(&kernel.fs, inode))
}

/// `isdir(fd)` — `spec.md` §6.
pub fn sys_isdir(kernel: &Kernel, process: &Process, fd: usize) -> Result<bool> {
    reject_console_fd(fd)?;
    let file = process.fds.get_file(fd).ok_or(KernelError::InvalidArgument("isdir: bad fd"))?;
    Ok(kernel.fs.inode_type(file.inode) == InodeType::Dir)
}

/// `inumber(fd)` — `spec.md` §6. This core has no separate inode-number
/// namespace; the backing sector number serves the same "identify this
/// file" purpose.
pub fn sys_inumber(process: &Process, fd: usize) -> Result<u32> {
    reject_console_fd(fd)?;
    let file = process.fds.get_file(fd).ok_or(KernelError::InvalidArgument("inumber: bad fd"))?;
    Ok(file.inode.sector())
}

/// `exit(status)` — `spec.md` §6 "Process exit codes": clamps `status`
/// to `[-1, 255]` and runs the fixed-order teardown of `spec.md` §5
/// (flush writable file-backed pages, release frames, release swap,
/// close every open file) via `Process::exit`.
pub fn sys_exit(kernel: &Kernel, process: &mut Process, status: i32) -> i32 {
    process.exit(kernel);
    status.clamp(-1, 255)
}
