use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, OwnedFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use super::jobs::CancelToken;

const POLL_MS: u16 = 50;

/// The shell's standard input as handed to a built-in stage. Once the
/// stage is cancelled reads report end of file, so an interrupted built-in
/// stops consuming what the user types next.
pub struct TerminalInput {
    file: File,
    cancel: CancelToken,
}

impl TerminalInput {
    pub fn stdin(cancel: CancelToken) -> io::Result<TerminalInput> {
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(TerminalInput::from_fd(fd, cancel))
    }

    pub fn from_fd(fd: OwnedFd, cancel: CancelToken) -> TerminalInput {
        TerminalInput {
            file: File::from(fd),
            cancel,
        }
    }

    /// Waits until the descriptor is readable. `false` once cancelled.
    fn wait_readable(&self) -> io::Result<bool> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(POLL_MS)) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(_) => return Ok(true),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Read for TerminalInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.wait_readable()? {
            return Ok(0);
        }
        self.file.read(buf)
    }
}
