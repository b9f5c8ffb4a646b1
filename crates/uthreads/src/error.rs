//! Error kinds and the stderr diagnostic contract.

use crate::Tid;
use thiserror::Error;

/// Recoverable failures of the public thread API.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("quantum length must be positive")]
    InvalidQuantum,
    #[error("the thread library is not initialized")]
    NotInitialized,
    #[error("no available slot for new thread")]
    OutOfSlots,
    #[error("thread {0} does not exist")]
    UnknownThread(Tid),
    #[error("thread 0 cannot be blocked")]
    BlockedMain,
    #[error("thread 0 cannot be put to sleep")]
    SleptMain,
}

/// Emit the diagnostic line for `err` and hand it back to the caller.
///
/// Every recoverable failure crosses the public boundary through here, so
/// callers that ignore the `Result` still see the message on stderr.
pub(crate) fn reject<T>(err: Error) -> Result<T, Error> {
    eprintln!("system error: {err}");
    Err(err)
}

/// A platform primitive failed; the scheduling contract can no longer be
/// enforced. Prints the diagnostic and exits with a failure status.
pub(crate) fn die(what: &str) -> ! {
    eprintln!("system error: {what}");
    std::process::exit(1);
}
