//! Retryability classification for handler and transport errors.
//!
//! Rules are checked in precedence order. Each rule looks at every error in
//! the `source()` chain before the next rule is considered, so a timeout
//! wrapped inside an application error still counts as a timeout.

use crate::{Cancelled, Code, Status};
use std::error::Error;
use std::io;

#[cfg(any(target_os = "linux", target_os = "android"))]
const ENOBUFS: i32 = 105;
#[cfg(windows)]
const ENOBUFS: i32 = 10055;
#[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
const ENOBUFS: i32 = 55;

type Rule = fn(&(dyn Error + 'static)) -> Option<bool>;

const RULES: [Rule; 5] = [
    deadline_exceeded,
    cancelled,
    end_of_stream,
    connection_error,
    remote_status,
];

/// Decide whether a failure is transient and worth re-dispatching.
///
/// `None` (no error) is never retryable; anything not recognized is treated
/// as permanent.
pub fn is_retryable(err: Option<&(dyn Error + 'static)>) -> bool {
    let Some(err) = err else {
        return false;
    };

    let chain: Vec<&(dyn Error + 'static)> = chain(err).collect();
    for rule in RULES {
        if let Some(verdict) = chain.iter().find_map(|e| rule(*e)) {
            return verdict;
        }
    }

    false
}

/// Convenience for `anyhow` errors returned by handlers
pub fn is_retryable_anyhow(err: &anyhow::Error) -> bool {
    is_retryable(Some(&**err))
}

fn chain<'a>(
    err: &'a (dyn Error + 'static),
) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(err), |e: &&'a (dyn Error + 'static)| (*e).source())
}

fn io_kind<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a io::Error> {
    err.downcast_ref::<io::Error>()
}

fn deadline_exceeded(err: &(dyn Error + 'static)) -> Option<bool> {
    if err.is::<tokio::time::error::Elapsed>() {
        return Some(true);
    }
    if let Some(status) = err.downcast_ref::<Status>() {
        if status.code == Code::DeadlineExceeded {
            return Some(true);
        }
    }
    if let Some(io_err) = io_kind(err) {
        if io_err.kind() == io::ErrorKind::TimedOut || is_temporary_dns_failure(io_err) {
            return Some(true);
        }
    }
    None
}

fn cancelled(err: &(dyn Error + 'static)) -> Option<bool> {
    if err.is::<Cancelled>() {
        return Some(false);
    }
    match err.downcast_ref::<Status>() {
        Some(status) if status.code == Code::Cancelled => Some(false),
        _ => None,
    }
}

fn end_of_stream(err: &(dyn Error + 'static)) -> Option<bool> {
    match io_kind(err) {
        Some(io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => Some(true),
        _ => None,
    }
}

fn connection_error(err: &(dyn Error + 'static)) -> Option<bool> {
    let io_err = io_kind(err)?;
    let transient = matches!(
        io_err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
    ) || io_err.raw_os_error() == Some(ENOBUFS);

    transient.then_some(true)
}

fn remote_status(err: &(dyn Error + 'static)) -> Option<bool> {
    let status = err.downcast_ref::<Status>()?;
    match status.code {
        Code::DeadlineExceeded | Code::ResourceExhausted | Code::Unavailable | Code::Aborted => {
            Some(true)
        }
        Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::PermissionDenied
        | Code::FailedPrecondition
        | Code::Unimplemented
        | Code::Unauthenticated => Some(false),
        _ => None,
    }
}

// getaddrinfo reports EAI_AGAIN (WSATRY_AGAIN on Windows) through the error text only
fn is_temporary_dns_failure(err: &io::Error) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("temporary failure in name resolution")
        || text.contains("temporary error occurred on server name resolution")
}
