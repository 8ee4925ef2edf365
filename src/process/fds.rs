/*!
 * Descriptor Wiring
 * Turns resolved open modes into child stdio and extra descriptors
 *
 * Standard descriptors go through tokio's `Stdio`. Descriptors 3 and up are
 * installed with `dup2` between fork and exec; piped ones are socketpairs so
 * the same end can carry messages both ways.
 */

use crate::core::limits::STANDARD_FD_COUNT;
use crate::stdio::StdioMode;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::process::Stdio;
use tokio::process::Command;

/// Descriptors prepared for one spawn
#[derive(Debug)]
pub(super) struct Wiring {
    standard: Vec<Option<Stdio>>,
    /// (target descriptor, child-side end)
    extra: Vec<(RawFd, OwnedFd)>,
    /// Parent-side ends of piped extra descriptors, by index
    parent_ends: Vec<Option<UnixStream>>,
}

impl Wiring {
    pub(super) fn prepare(modes: &[StdioMode]) -> io::Result<Self> {
        let mut wiring = Self {
            standard: Vec::with_capacity(STANDARD_FD_COUNT),
            extra: Vec::new(),
            parent_ends: (0..modes.len()).map(|_| None).collect(),
        };

        for (index, mode) in modes.iter().enumerate() {
            if index < STANDARD_FD_COUNT {
                wiring.standard.push(Some(standard_stdio(index, *mode)?));
                continue;
            }

            let target = index as RawFd;
            let child_end = match mode {
                StdioMode::Pipe | StdioMode::Overlapped => {
                    let (parent, child) = UnixStream::pair()?;
                    wiring.parent_ends[index] = Some(parent);
                    OwnedFd::from(child)
                }
                StdioMode::Ignore => OwnedFd::from(
                    std::fs::OpenOptions::new()
                        .read(true)
                        .write(true)
                        .open("/dev/null")?,
                ),
                StdioMode::Inherit => dup_parent_fd(target)?,
                StdioMode::Fd(fd) => dup_parent_fd(*fd as RawFd)?,
            };
            wiring.extra.push((target, child_end));
        }

        Ok(wiring)
    }

    /// Configure the command; child-side ends stay alive until `self` drops
    pub(super) fn install(&mut self, command: &mut Command) {
        let mut standard = self.standard.iter_mut().map(Option::take);
        if let Some(Some(stdin)) = standard.next() {
            command.stdin(stdin);
        }
        if let Some(Some(stdout)) = standard.next() {
            command.stdout(stdout);
        }
        if let Some(Some(stderr)) = standard.next() {
            command.stderr(stderr);
        }

        if self.extra.is_empty() {
            return;
        }

        let mappings: Vec<(RawFd, RawFd)> = self
            .extra
            .iter()
            .map(|(target, end)| (end.as_raw_fd(), *target))
            .collect();

        // SAFETY: the hook only calls fcntl/dup2, which are async-signal-safe,
        // and writes into a buffer allocated before fork
        unsafe {
            command.pre_exec(move_descriptors(mappings));
        }
    }

    /// Take the parent-side end of a piped extra descriptor
    pub(super) fn take_parent_end(&mut self, index: usize) -> Option<UnixStream> {
        self.parent_ends.get_mut(index).and_then(Option::take)
    }
}

fn standard_stdio(index: usize, mode: StdioMode) -> io::Result<Stdio> {
    Ok(match mode {
        StdioMode::Pipe | StdioMode::Overlapped => Stdio::piped(),
        StdioMode::Ignore => Stdio::null(),
        StdioMode::Inherit => Stdio::inherit(),
        StdioMode::Fd(fd) if fd as usize == index => Stdio::inherit(),
        StdioMode::Fd(fd) => Stdio::from(dup_parent_fd(fd as RawFd)?),
    })
}

/// Duplicate one of the parent's open descriptors
fn dup_parent_fd(fd: RawFd) -> io::Result<OwnedFd> {
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("descriptor {} is not open in the parent", fd),
        ));
    }
    // SAFETY: checked open above and only borrowed for the duplication
    unsafe { BorrowedFd::borrow_raw(fd) }.try_clone_to_owned()
}

/// Pre-exec hook placing each source descriptor at its target number
///
/// Sources are first moved above every target so that installing one
/// mapping never clobbers the source of another.
fn move_descriptors(
    mappings: Vec<(RawFd, RawFd)>,
) -> impl FnMut() -> io::Result<()> + Send + Sync + 'static {
    let base = mappings.iter().map(|(_, target)| *target).max().unwrap_or(0) + 1;
    let mut staged: Vec<RawFd> = vec![-1; mappings.len()];

    move || {
        for ((source, _), slot) in mappings.iter().zip(staged.iter_mut()) {
            let fd = unsafe { libc::fcntl(*source, libc::F_DUPFD_CLOEXEC, base) };
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }
            *slot = fd;
        }
        for ((_, target), staged) in mappings.iter().zip(staged.iter()) {
            if unsafe { libc::dup2(*staged, *target) } == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}
