use std::ffi::c_int;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

/// Set by the SIGINT handler; the only process-wide shell state.
static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Records a Ctrl-C for the foreground wait loop to pick up.
extern "C" fn sigint_handler(_sig: c_int) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

/// Installs the SIGINT handler so Ctrl-C cancels the foreground pipeline
/// instead of the shell.
pub fn install_handlers() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(sigint_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // The handler only touches an atomic.
    unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(())
}

/// Consumes a pending interrupt.
pub fn take_interrupt() -> bool {
    SIGINT_RECEIVED.swap(false, Ordering::SeqCst)
}

pub fn clear_interrupt() {
    SIGINT_RECEIVED.store(false, Ordering::SeqCst);
}

/// Sends SIGTERM to a child. A child that already exited is not an error.
pub fn terminate(child: &Child) -> nix::Result<()> {
    match kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        result => result,
    }
}
