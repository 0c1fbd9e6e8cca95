//! Utility functions for socket operations

use std::io;

/// Check if running as root
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Whether a socket creation error means the process lacks privileges
pub fn is_permission_error(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error()
            .map(|code| code == libc::EPERM || code == libc::EACCES)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Whether a socket creation error means the kernel has no ICMP support
pub fn is_protocol_unavailable(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error()
            .map(|code| code == libc::EPROTONOSUPPORT || code == libc::EAFNOSUPPORT)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}
