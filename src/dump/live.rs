//! Capturing a core from a running process. Every thread is stopped with
//! ptrace before anything is read so the snapshot is consistent, and the
//! target is always detached (and resumed) on the way out, even on errors.
use super::{CoreImage, FilterPolicy, MemorySource, ThreadState, Vma};
use crate::space::{Error, Result};
use crate::utils;
use nix::sys::ptrace;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Stops a process, snapshots it into a core at `path`, resumes it.
pub fn dump_process<F: FilterPolicy>(pid: i32, filter: &F, path: &Path) -> Result<()> {
    let mut target = LiveProcess::attach(pid)?;
    let image = target.snapshot(filter)?;
    super::layout::write_core(&image, &mut target, path)
}

/// A ptrace-attached process. Dropping it detaches every thread.
pub struct LiveProcess {
    pid: Pid,
    tids: Vec<Pid>,
    mem: std::fs::File,
}

impl LiveProcess {
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        let mut attached: Vec<Pid> = Vec::new();

        // Threads can spawn while we're attaching, so rescan until the task
        // list stops growing. Attached threads are stopped and can't spawn
        // more, so this terminates.
        loop {
            let tids = list_tids(pid)?;
            let new: Vec<Pid> = tids.into_iter().filter(|t| !attached.contains(t)).collect();
            if new.is_empty() {
                break;
            }
            for tid in new {
                match ptrace::attach(tid) {
                    Ok(()) => {
                        match waitpid(tid, None) {
                            Ok(WaitStatus::Stopped(_, _)) => attached.push(tid),
                            Ok(status) => {
                                utils::warn(&format!("thread {tid} didn't stop: {status:?}"));
                            }
                            Err(err) => utils::warn(&format!("wait for {tid} failed: {err}")),
                        }
                    }
                    // The thread exited between the scan and the attach.
                    Err(nix::errno::Errno::ESRCH) => (),
                    Err(err) => {
                        detach_all(&attached);
                        return Err(Error::TargetUnreadable(format!(
                            "can't attach to thread {tid}: {err}"
                        )));
                    }
                }
            }
        }
        if attached.is_empty() {
            return Err(Error::TargetUnreadable(format!("process {pid} has no threads")));
        }

        let mem = std::fs::File::open(format!("/proc/{pid}/mem")).map_err(|err| {
            detach_all(&attached);
            Error::TargetUnreadable(format!("can't open /proc/{pid}/mem: {err}"))
        })?;

        // The main thread leads so its registers land first in the core.
        attached.sort_by_key(|t| (*t != pid, t.as_raw()));
        Ok(LiveProcess { pid, tids: attached, mem })
    }

    /// Reads the memory map, auxv, and per-thread registers, and applies the
    /// filter. Nothing here touches memory content; that happens while the
    /// core is written, through the [`MemorySource`] impl below.
    pub fn snapshot<F: FilterPolicy>(&mut self, filter: &F) -> Result<CoreImage> {
        let pid = self.pid.as_raw();
        let maps = proc_maps::get_process_maps(pid).map_err(|err| {
            Error::TargetUnreadable(format!("can't read maps for {pid}: {err}"))
        })?;
        let vmas: Vec<Vma> = maps
            .iter()
            .map(|m| {
                let mut flags = 0;
                if m.is_read() {
                    flags |= crate::elf::READ_FLAG;
                }
                if m.is_write() {
                    flags |= crate::elf::WRITE_FLAG;
                }
                if m.is_exec() {
                    flags |= crate::elf::EXECUTE_FLAG;
                }
                Vma {
                    start: m.start() as u64,
                    end: (m.start() + m.size()) as u64,
                    offset: m.offset as u64,
                    flags,
                    path: m.filename().map(|p| p.to_string_lossy().to_string()),
                    is_file: m.inode != 0,
                    readable: m.is_read(),
                }
            })
            .collect();

        let auxv = std::fs::read(format!("/proc/{pid}/auxv")).map_err(|err| {
            Error::TargetUnreadable(format!("can't read auxv for {pid}: {err}"))
        })?;

        let mut threads = Vec::new();
        for tid in self.tids.iter() {
            match ptrace::getregs(*tid) {
                Ok(regs) => threads.push(ThreadState {
                    tid: tid.as_raw(),
                    signal: 0,
                    registers: pt_regs_order(&regs),
                }),
                Err(err) => utils::warn(&format!("can't read registers of {tid}: {err}")),
            }
        }

        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as u64,
            _ => 4096,
        };

        Ok(CoreImage::new(pid, 0x3e, page_size, vmas, auxv, threads, filter))
    }
}

impl MemorySource for LiveProcess {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        self.mem
            .read_exact_at(buf, addr)
            .map_err(|err| Error::TargetUnreadable(format!("read at {addr:#x} failed: {err}")))
    }
}

impl Drop for LiveProcess {
    fn drop(&mut self) {
        detach_all(&self.tids);
    }
}

fn detach_all(tids: &[Pid]) {
    for tid in tids.iter() {
        if let Err(err) = ptrace::detach(*tid, None) {
            utils::warn(&format!("detach from {tid} failed: {err}"));
        }
    }
}

fn list_tids(pid: Pid) -> Result<Vec<Pid>> {
    let dir = format!("/proc/{pid}/task");
    let entries = std::fs::read_dir(&dir)
        .map_err(|err| Error::TargetUnreadable(format!("can't read {dir}: {err}")))?;
    let mut tids = Vec::new();
    for entry in entries.flatten() {
        if let Ok(tid) = entry.file_name().to_string_lossy().parse::<i32>() {
            tids.push(Pid::from_raw(tid));
        }
    }
    Ok(tids)
}

/// Flattens user_regs_struct into the order NT_PRSTATUS uses (the kernel's
/// pt_regs layout, r15 first).
fn pt_regs_order(regs: &libc::user_regs_struct) -> Vec<u64> {
    vec![
        regs.r15,
        regs.r14,
        regs.r13,
        regs.r12,
        regs.rbp,
        regs.rbx,
        regs.r11,
        regs.r10,
        regs.r9,
        regs.r8,
        regs.rax,
        regs.rcx,
        regs.rdx,
        regs.rsi,
        regs.rdi,
        regs.orig_rax,
        regs.rip,
        regs.cs,
        regs.eflags,
        regs.rsp,
        regs.ss,
        regs.fs_base,
        regs.gs_base,
        regs.ds,
        regs.es,
        regs.fs,
        regs.gs,
    ]
}
