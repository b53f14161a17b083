use std::{io, net::TcpStream, os::unix::io::AsRawFd};

/// Tunes the kernel send/receive socket buffers via a raw fd, since
/// `std::net::TcpStream` doesn't expose `setsockopt` itself.
pub fn set_socket_buf_size(stream: &TcpStream, send_bytes: usize, recv_bytes: usize) -> io::Result<()> {
    let fd = stream.as_raw_fd();
    set_opt(fd, libc::SO_SNDBUF, send_bytes)?;
    set_opt(fd, libc::SO_RCVBUF, recv_bytes)?;
    Ok(())
}

fn set_opt(fd: i32, opt: i32, value: usize) -> io::Result<()> {
    let value = value as libc::c_int;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            opt,
            &raw const value as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}
