use kestrel::syscall::handle_syscall;
use kestrel_core::testing::{catch_thread_exit, Harness};
use kestrel_process::Signo;
use linux_raw_sys::general::CLD_EXITED;
use syscalls::Sysno;

const EINVAL: isize = -22;
const ENOSYS: isize = -38;
const ECHILD: isize = -10;

fn call(harness: &Harness, sysno: Sysno, args: &[usize]) -> isize {
    let mut raw = [0; 6];
    raw[..args.len()].copy_from_slice(args);
    handle_syscall(&harness.kernel, sysno as usize, raw)
}

#[test]
fn identity_syscalls() {
    let harness = Harness::new();
    let (parent, _) = harness.spawn("/bin/sh", 0);
    let (child, thread) = harness.spawn("/bin/ls", parent.get_pid());
    harness.run_as(&thread);
    assert_eq!(call(&harness, Sysno::getpid, &[]), child.get_pid() as isize);
    assert_eq!(call(&harness, Sysno::gettid, &[]), thread.get_tid() as isize);
    assert_eq!(call(&harness, Sysno::getppid, &[]), parent.get_pid() as isize);
}

#[test]
fn errors_are_negated() {
    let harness = Harness::new();
    let (_, thread) = harness.spawn("/bin/sh", 0);
    harness.run_as(&thread);
    assert_eq!(call(&harness, Sysno::kill, &[0, Signo::SIGTERM as usize]), EINVAL);
    assert_eq!(call(&harness, Sysno::getcwd, &[0, 0]), ENOSYS);
}

#[test]
fn out_of_range_numbers_are_unimplemented() {
    let harness = Harness::new();
    let (_, thread) = harness.spawn("/bin/sh", 0);
    harness.run_as(&thread);
    let wrapped = (1usize << 32) + Sysno::getpid as usize;
    assert_eq!(handle_syscall(&harness.kernel, wrapped, [0; 6]), ENOSYS);
}

#[test]
fn kill_through_dispatch() {
    let harness = Harness::new();
    let (parent, thread) = harness.spawn("/bin/sh", 0);
    let (_, child_thread) = harness.spawn("/bin/sleep", parent.get_pid());
    harness.run_as(&thread);
    assert_eq!(
        call(&harness, Sysno::kill, &[child_thread.get_tid() as usize, Signo::SIGINT as usize]),
        0
    );
    assert_eq!(child_thread.dequeue_signal(), Some(Signo::SIGINT));
}

#[test]
fn wait4_stores_status_word() {
    let harness = Harness::new();
    let (parent, thread) = harness.spawn("/bin/sh", 0);
    let (child, _) = harness.spawn("/bin/false", parent.get_pid());
    child.set_termination_status(1);
    harness.reap_threads_and_finalize(&child);
    harness.run_as(&thread);

    let status = 0x8000;
    assert_eq!(
        call(&harness, Sysno::wait4, &[-1isize as usize, status, 0]),
        child.get_pid() as isize
    );
    assert_eq!(
        harness.user_memory.written(status),
        Some((1i32 << 8).to_ne_bytes().to_vec())
    );
}

#[test]
fn waitid_fills_siginfo() {
    let harness = Harness::new();
    let (parent, thread) = harness.spawn("/bin/sh", 0);
    let (child, _) = harness.spawn("/bin/false", parent.get_pid());
    child.set_termination_status(1);
    harness.reap_threads_and_finalize(&child);
    harness.run_as(&thread);

    let infop = 0x9000;
    let options = linux_raw_sys::general::WEXITED as usize;
    assert_eq!(call(&harness, Sysno::waitid, &[0, 0, infop, options]), 0);
    let bytes = harness.user_memory.written(infop).unwrap();
    let field = |index: usize| i32::from_ne_bytes(bytes[index * 4..index * 4 + 4].try_into().unwrap());
    assert_eq!(field(0), Signo::SIGCHLD as i32);
    assert_eq!(field(2), CLD_EXITED as i32);
    assert_eq!(field(4), child.get_pid() as i32);
    assert_eq!(field(5), 100);
    assert_eq!(field(6), 1);
}

#[test]
fn wait4_without_status_address() {
    let harness = Harness::new();
    let (parent, thread) = harness.spawn("/bin/sh", 0);
    let (child, _) = harness.spawn("/bin/true", parent.get_pid());
    harness.reap_threads_and_finalize(&child);
    harness.run_as(&thread);
    assert_eq!(
        call(&harness, Sysno::wait4, &[child.get_pid() as usize, 0, 0]),
        child.get_pid() as isize
    );
    assert_eq!(harness.user_memory.written(0), None);
    assert_eq!(call(&harness, Sysno::wait4, &[-1isize as usize, 0, 0]), ECHILD);
}

#[test]
fn exit_group_through_dispatch() {
    let harness = Harness::new();
    let (process, thread) = harness.spawn("/bin/sh", 0);
    harness.run_as(&thread);
    assert!(catch_thread_exit(|| call(&harness, Sysno::exit_group, &[3])).is_err());
    assert_eq!(process.termination_status(), 3);
    assert!(thread.should_die());
}
