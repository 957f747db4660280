//! Interactive shell.
//!
//! A line-oriented command loop over the keyboard ring with a handful of
//! builtins on top of the VFS, the scheduler, and the heap counters. The
//! shell owns the current working directory that the syscall table
//! exposes to user programs.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::Mutex;

use crate::drivers::keyboard::{self, KEY_BACKSPACE, KEY_ENTER};
use crate::error::FsError;
use crate::fs::{self, OpenFlags};

/// Current working directory. Empty means `/`.
static CWD: Mutex<String> = Mutex::new(String::new());

/// The current working directory as an absolute path.
pub fn cwd() -> String {
    let guard = CWD.lock();
    if guard.is_empty() {
        "/".to_string()
    } else {
        guard.clone()
    }
}

/// Replace the current working directory. The caller has verified the
/// path names a directory.
pub fn set_cwd(path: &str) {
    let mut guard = CWD.lock();
    guard.clear();
    if path != "/" {
        guard.push_str(path);
    }
}

/// Join a possibly-relative argument onto the cwd.
pub fn resolve_path(arg: &str) -> String {
    if arg.starts_with('/') {
        return arg.to_string();
    }
    let base = cwd();
    if base == "/" {
        format!("/{}", arg)
    } else {
        format!("{}/{}", base, arg)
    }
}

/// Execute one command line.
pub fn execute(line: &str) {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return;
    };
    let args: Vec<&str> = parts.collect();

    let result = match cmd {
        "ls" => builtin_ls(args.first().copied()),
        "cat" => match args.first() {
            Some(path) => builtin_cat(path),
            None => usage("cat <file>"),
        },
        "echo" => builtin_echo(&args),
        "rm" => match args.first() {
            Some(path) => fs::with_vfs(|vfs| vfs.unlink(&resolve_path(path))),
            None => usage("rm <file>"),
        },
        "mkdir" => match args.first() {
            Some(path) => fs::with_vfs(|vfs| vfs.mkdir(&resolve_path(path))),
            None => usage("mkdir <dir>"),
        },
        "mv" => match (args.first(), args.get(1)) {
            (Some(old), Some(new)) => {
                fs::with_vfs(|vfs| vfs.rename(&resolve_path(old), &resolve_path(new)))
            }
            _ => usage("mv <old> <new>"),
        },
        "cd" => builtin_cd(args.first().copied()),
        "pwd" => {
            println!("{}", cwd());
            Ok(())
        }
        "ps" => {
            builtin_ps();
            Ok(())
        }
        "free" => {
            builtin_free();
            Ok(())
        }
        "uptime" => {
            println!("up {} ticks ({} ms)", crate::timer::uptime_ticks(), crate::timer::uptime_ms());
            Ok(())
        }
        "help" => {
            println!("builtins: ls cat echo rm mkdir mv cd pwd ps free uptime help");
            Ok(())
        }
        other => {
            println!("{}: command not found", other);
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("{}: {}", cmd, e);
    }
}

fn usage(text: &str) -> Result<(), FsError> {
    println!("usage: {}", text);
    Ok(())
}

fn builtin_ls(arg: Option<&str>) -> Result<(), FsError> {
    let path = arg.map(resolve_path).unwrap_or_else(cwd);
    fs::with_vfs(|vfs| {
        let fd = vfs.open(&path, OpenFlags::RDONLY)?;
        loop {
            match vfs.readdir(fd) {
                Ok(Some(entry)) => println!("{}", entry.name),
                Ok(None) => break,
                Err(e) => {
                    let _ = vfs.close(fd);
                    return Err(e);
                }
            }
        }
        vfs.close(fd)
    })
}

fn builtin_cat(arg: &str) -> Result<(), FsError> {
    let text = fs::with_vfs(|vfs| vfs.read_text(&resolve_path(arg)))?;
    print!("{}", text);
    if !text.ends_with('\n') {
        println!();
    }
    Ok(())
}

/// `echo words...` or `echo words... > file`.
fn builtin_echo(args: &[&str]) -> Result<(), FsError> {
    if let Some(split) = args.iter().position(|a| *a == ">") {
        let Some(target) = args.get(split + 1) else {
            return usage("echo <text> > <file>");
        };
        let text = format!("{}\n", args[..split].join(" "));
        return fs::with_vfs(|vfs| vfs.write_text(&resolve_path(target), &text));
    }
    println!("{}", args.join(" "));
    Ok(())
}

fn builtin_cd(arg: Option<&str>) -> Result<(), FsError> {
    let path = match arg {
        Some(path) => resolve_path(path),
        None => "/".to_string(),
    };
    let stat = fs::with_vfs(|vfs| vfs.stat(&path))?;
    if !stat.is_dir() {
        return Err(FsError::NotDir);
    }
    set_cwd(&path);
    Ok(())
}

fn builtin_ps() {
    println!("  PID STATE       TICKS NAME");
    crate::sched::for_each_process(|pcb| {
        println!(
            "{:5} {:<11} {:5} {}",
            pcb.pid,
            format!("{:?}", pcb.state),
            pcb.ticks,
            pcb.name
        );
    });
}

fn builtin_free() {
    let heap = crate::mm::heap::stats();
    let (free_pages, total_pages) = {
        let pmm = crate::mm::FRAME_ALLOCATOR.lock();
        (pmm.free_pages(), pmm.total_pages())
    };
    println!(
        "heap: {} bytes in {} allocations (peak {} bytes / {})",
        heap.active_bytes, heap.active_count, heap.peak_bytes, heap.peak_count
    );
    println!(
        "phys: {}/{} pages free",
        free_pages, total_pages
    );

    // Allocations older than ~10 seconds are leak suspects.
    let threshold = crate::config::TICK_HZ as u64 * 10;
    let mut suspects = 0usize;
    crate::mm::heap::leak_scan(threshold, |_, _, _| suspects += 1);
    if suspects > 0 {
        println!("leak scan: {} allocations older than 10s", suspects);
    }
}

/// Shell process entry: banner, then the prompt loop.
pub fn run() {
    println!("Welcome to cupid-os!");
    println!("type 'help' for builtins");
    print!("{} $ ", cwd());

    let mut line = String::new();
    loop {
        while let Some(key) = keyboard::read_key() {
            match key {
                KEY_ENTER | b'\r' => {
                    println!();
                    execute(&line);
                    line.clear();
                    print!("{} $ ", cwd());
                }
                KEY_BACKSPACE => {
                    if line.pop().is_some() {
                        print!("\x08 \x08");
                    }
                }
                0x20..=0x7E => {
                    line.push(key as char);
                    print!("{}", key as char);
                }
                _ => {}
            }
        }
        crate::sched::yield_now();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;
    use alloc::sync::Arc;

    /// Mount a root ramfs on the global VFS once; tests share it and use
    /// distinct filenames.
    fn ensure_root() {
        fs::with_vfs(|vfs| {
            let _ = vfs.mount("/", Arc::new(RamFs::new()));
        });
    }

    // All cwd-dependent assertions live in one test: CWD is a process
    // global and the harness runs tests concurrently.
    #[test]
    fn test_cwd_resolve_and_cd_flow() {
        ensure_root();
        set_cwd("/");
        assert_eq!(resolve_path("/a/b"), "/a/b");
        assert_eq!(resolve_path("x.txt"), "/x.txt");
        set_cwd("/home");
        assert_eq!(resolve_path("x.txt"), "/home/x.txt");
        set_cwd("/");

        execute("mkdir /shell_t2");
        let stat = fs::with_vfs(|vfs| vfs.stat("/shell_t2")).expect("dir exists");
        assert!(stat.is_dir());

        assert!(builtin_cd(Some("/shell_t2")).is_ok());
        assert_eq!(cwd(), "/shell_t2");
        // cd to a file fails and leaves cwd alone.
        execute("echo x > /shell_t2/f.txt");
        assert_eq!(
            builtin_cd(Some("/shell_t2/f.txt")).unwrap_err(),
            FsError::NotDir
        );
        assert_eq!(cwd(), "/shell_t2");
        set_cwd("/");
    }

    #[test]
    fn test_echo_redirect_then_cat_roundtrip() {
        ensure_root();
        execute("echo hello > /shell_t1.txt");
        let text = fs::with_vfs(|vfs| vfs.read_text("/shell_t1.txt")).expect("file written");
        assert_eq!(text, "hello\n");
    }

    #[test]
    fn test_rm_removes_file() {
        ensure_root();
        execute("echo data > /shell_t3.txt");
        execute("rm /shell_t3.txt");
        assert_eq!(
            fs::with_vfs(|vfs| vfs.stat("/shell_t3.txt")).unwrap_err(),
            FsError::NoEnt
        );
    }

    #[test]
    fn test_mv_uses_generic_rename() {
        ensure_root();
        execute("echo move me > /shell_t4.txt");
        execute("mv /shell_t4.txt /shell_t4_renamed.txt");
        let text =
            fs::with_vfs(|vfs| vfs.read_text("/shell_t4_renamed.txt")).expect("renamed file");
        assert_eq!(text, "move me\n");
        assert_eq!(
            fs::with_vfs(|vfs| vfs.stat("/shell_t4.txt")).unwrap_err(),
            FsError::NoEnt
        );
    }
}
