//! Kernel RTT estimate for an established TCP socket.

use std::os::fd::AsRawFd;

/// Smoothed RTT and its variance as tracked by the kernel, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelRtt {
    pub rtt_us: u32,
    pub rttvar_us: u32,
}

impl KernelRtt {
    /// The kernel has no estimate yet.
    pub fn is_zero(&self) -> bool {
        self.rtt_us == 0 && self.rttvar_us == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RttError {
    #[error("TCP_INFO is not available on this platform")]
    Unsupported,
    #[error("getsockopt(TCP_INFO) failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Read `tcpi_rtt` / `tcpi_rttvar` from the socket. Zeros are a valid answer.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn kernel_rtt<S: AsRawFd>(socket: &S) -> Result<KernelRtt, RttError> {
    let fd = socket.as_raw_fd();
    // SAFETY: tcp_info is plain old data; all-zero is a valid value.
    let mut info: libc::tcp_info = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::tcp_info>() as libc::socklen_t;

    // SAFETY: `info` and `len` outlive the call and `len` matches the buffer.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_INFO,
            (&mut info as *mut libc::tcp_info).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(KernelRtt {
        rtt_us: info.tcpi_rtt,
        rttvar_us: info.tcpi_rttvar,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn kernel_rtt<S: AsRawFd>(_socket: &S) -> Result<KernelRtt, RttError> {
    Err(RttError::Unsupported)
}
