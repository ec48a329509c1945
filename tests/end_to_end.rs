//! End-to-end scenarios from `spec.md` §8, one function per numbered
//! scenario, driven entirely through the public `syscall`/`vm` surface
//! rather than the internal `fs`/`bio` plumbing.

use std::sync::Arc;

use tinyos_core::device::mem::MemDevice;
use tinyos_core::device::Role;
use tinyos_core::fs::Fs;
use tinyos_core::kernel::Kernel;
use tinyos_core::param::{NBUF, NUM_FRAMES_W, PAGE_SIZE};
use tinyos_core::process::Process;
use tinyos_core::syscall::*;
use tinyos_core::vm::{handle_page_fault, Perm, Vma};
use tinyos_core::bio::BufferCache;

fn test_kernel(fs_sectors: u32, swap_sectors: u32) -> Kernel {
    // Best-effort: lets `RUST_LOG=tinyos_core=trace cargo test -- --nocapture`
    // surface the eviction/allocation-failure logging these tests exercise;
    // `try_init` so running scenarios in parallel doesn't panic on a second
    // call.
    let _ = env_logger::try_init();
    let fs_dev = Arc::new(MemDevice::new("fs", Role::Filesys, fs_sectors));
    let cache = BufferCache::new(fs_dev, NBUF);
    let fs = Fs::format(cache, fs_sectors);
    let swap_dev = Arc::new(MemDevice::new("swap", Role::Swap, swap_sectors));
    Kernel::new(fs, swap_dev)
}

fn page_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

/// 1. `create("a", 0); open("a")=3; write(3,"hello",5); seek(3,0);
///    read(3,buf,5)` ⇒ `buf="hello"`, return 5.
#[test]
fn scenario_1_basic_write_read() {
    let kernel = test_kernel(2048, 64);
    let mut process = Process::new(kernel.fs.root(), 0x8000_0000);

    sys_create(&kernel, &process, "a", 0).unwrap();
    let fd = sys_open(&kernel, &mut process, "a").unwrap();
    assert_eq!(sys_write(&kernel, &mut process, fd, b"hello").unwrap(), 5);
    sys_seek(&mut process, fd, 0).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(sys_read(&kernel, &mut process, fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
}

/// 2. `create("big",0); open("big")=3; write(3, pattern_of_length(130*512), 0)`
///    succeeds fully (exercises single-indirect); closing and reopening
///    yields the same bytes.
#[test]
fn scenario_2_single_indirect_round_trip() {
    let kernel = test_kernel(8192, 64);
    let mut process = Process::new(kernel.fs.root(), 0x8000_0000);

    sys_create(&kernel, &process, "big", 0).unwrap();
    let fd = sys_open(&kernel, &mut process, "big").unwrap();
    let len = 130 * 512;
    let pattern: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    assert_eq!(sys_write(&kernel, &mut process, fd, &pattern).unwrap(), len);
    sys_close(&kernel, &mut process, fd).unwrap();

    let fd2 = sys_open(&kernel, &mut process, "big").unwrap();
    let mut out = vec![0u8; len];
    let mut done = 0;
    while done < len {
        let n = sys_read(&kernel, &mut process, fd2, &mut out[done..]).unwrap();
        assert!(n > 0, "unexpected EOF before reading all bytes back");
        done += n;
    }
    assert_eq!(out, pattern);
}

/// 3. `mkdir("d"); chdir("d"); create("f",0); chdir(".."); remove("d")`
///    ⇒ last call returns false (directory non-empty);
///    `remove("d/f"); remove("d")` succeeds.
#[test]
fn scenario_3_rmdir_requires_empty() {
    let kernel = test_kernel(2048, 64);
    let mut process = Process::new(kernel.fs.root(), 0x8000_0000);

    sys_mkdir(&kernel, &process, "d").unwrap();
    sys_chdir(&kernel, &mut process, "d").unwrap();
    sys_create(&kernel, &process, "f", 0).unwrap();
    sys_chdir(&kernel, &mut process, "..").unwrap();

    assert!(sys_remove(&kernel, &process, "d").is_err());
    sys_remove(&kernel, &process, "d/f").unwrap();
    sys_remove(&kernel, &process, "d").unwrap();
}

/// 4. `open("prog")=3; mmap(3, 0x20000000)=0x20000000; read byte at
///    0x20000000` equals file byte 0; writing a writable page then
///    `munmap` leaves the file modified on disk.
#[test]
fn scenario_4_mmap_read_and_writeback() {
    let kernel = test_kernel(2048, 64);
    let mut process = Process::new(kernel.fs.root(), 0x8000_0000);

    sys_create(&kernel, &process, "prog", 0).unwrap();
    let fd = sys_open(&kernel, &mut process, "prog").unwrap();
    sys_write(&kernel, &mut process, fd, b"ABCDEFGH").unwrap();

    let addr = 0x2000_0000u64;
    let id = sys_mmap(&kernel, &mut process, fd, addr).unwrap();
    assert_eq!(id, addr);

    handle_page_fault(&kernel, &mut process, addr, true).unwrap();
    let frame = process.mapping(page_down(addr)).expect("page installed by fault");
    assert_eq!(process.frame_data(frame)[0], b'A');

    process.frame_data_mut(frame)[0] = b'Z';
    process.touch_write(page_down(addr));

    sys_munmap(&kernel, &mut process, id).unwrap();

    let fd2 = sys_open(&kernel, &mut process, "prog").unwrap();
    let mut buf = [0u8; 1];
    sys_read(&kernel, &mut process, fd2, &mut buf).unwrap();
    assert_eq!(buf[0], b'Z');
}

/// 5. Fault 1000 distinct writable pages in a process whose
///    `NUM_FRAMES_W = 160`; verify each page retains its written value
///    when refaulted.
#[test]
fn scenario_5_many_pages_survive_eviction_and_refault() {
    assert_eq!(NUM_FRAMES_W, 160, "scenario assumes the reference cap");
    let kernel = test_kernel(2048, 16_384);
    let mut process = Process::new(kernel.fs.root(), 0x8000_0000);

    const COUNT: u64 = 1000;
    let base = 0x4000_0000u64;
    let vma = Vma {
        start: base,
        end: base + COUNT * PAGE_SIZE as u64,
        perm: Perm::READ | Perm::WRITE,
        backing: None,
    };
    process.vmas.insert(vma).unwrap();

    for i in 0..COUNT {
        let addr = base + i * PAGE_SIZE as u64;
        handle_page_fault(&kernel, &mut process, addr, true).unwrap();
        let frame = process.mapping(addr).unwrap();
        process.frame_data_mut(frame)[0] = (i % 256) as u8;
        process.touch_write(addr);
    }

    for i in 0..COUNT {
        let addr = base + i * PAGE_SIZE as u64;
        if process.mapping(addr).is_none() {
            handle_page_fault(&kernel, &mut process, addr, true).unwrap();
        }
        let frame = process.mapping(addr).unwrap();
        assert_eq!(process.frame_data(frame)[0], (i % 256) as u8, "page {i} lost its value");
    }
}

/// 6. Remove an open file: subsequent reads by the holder succeed;
///    after the last close, its sectors are returned to the free map
///    (observable by allocating and getting them back).
#[test]
fn scenario_6_remove_open_file_defers_reclaim() {
    let kernel = test_kernel(2048, 64);
    let mut process = Process::new(kernel.fs.root(), 0x8000_0000);

    sys_create(&kernel, &process, "f", 512).unwrap();
    let fd = sys_open(&kernel, &mut process, "f").unwrap();
    sys_remove(&kernel, &process, "f").unwrap();

    // still usable through the held descriptor.
    assert_eq!(sys_write(&kernel, &mut process, fd, b"after-remove").unwrap(), 12);
    sys_seek(&mut process, fd, 0).unwrap();
    let mut buf = [0u8; 12];
    assert_eq!(sys_read(&kernel, &mut process, fd, &mut buf).unwrap(), 12);
    assert_eq!(&buf, b"after-remove");

    sys_close(&kernel, &mut process, fd).unwrap();
    assert!(sys_open(&kernel, &mut process, "f").is_err());

    let sector = kernel.fs.free_map.allocate(&kernel.fs.cache, 1).unwrap();
    assert!(sector > 0);
}
