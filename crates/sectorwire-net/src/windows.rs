//! Windows driver issuing requests directly to the AFD kernel driver.
//!
//! Winsock's recvfrom path has a known defect that can corrupt the
//! returned peer address under load; submitting IOCTL_AFD_RECEIVE_DATAGRAM
//! against the socket's base handle sidesteps it and skips one dispatch
//! layer. Requests are overlapped NtDeviceIoControlFile calls; the
//! completion channel is an I/O completion port associated with each base
//! handle. Every in-flight operation pins its own heap context (status
//! block, info structs, scatter/gather descriptors, and the owned buffer)
//! until its completion packet is consumed.

#![allow(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

use crate::afd::{
    AFD_OVERLAPPED, IOCTL_AFD_POLL, IOCTL_AFD_RECEIVE, IOCTL_AFD_RECEIVE_DATAGRAM,
    TDI_RECEIVE_NORMAL,
};
use crate::driver::{RawCompletion, SocketDriver};
use crate::event::{CompletionStatus, OpKind, PollEvents, Token};
use crate::{NetError, OverlappedBuffer, Result, SocketId};
use std::collections::HashMap;
use std::ffi::c_void;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::windows::io::RawSocket;
use std::ptr;
use std::sync::Mutex;
use std::time::Duration;
use windows_sys::Wdk::Storage::FileSystem::{NtCancelIoFileEx, NtDeviceIoControlFile};
use windows_sys::Win32::Foundation::{
    CloseHandle, RtlNtStatusToDosError, ERROR_ABANDONED_WAIT_0, HANDLE, INVALID_HANDLE_VALUE,
    NTSTATUS, STATUS_CANCELLED, STATUS_NOT_FOUND, STATUS_SUCCESS, WAIT_TIMEOUT,
};
use windows_sys::Win32::Networking::WinSock::{
    send, WSAGetLastError, WSAIoctl, AF_INET, AF_INET6, SIO_BASE_HANDLE, SOCKADDR_IN, SOCKADDR_IN6,
    SOCKADDR_STORAGE, SOCKET, SOCKET_ERROR,
};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatusEx, PostQueuedCompletionStatus,
    IO_STATUS_BLOCK, OVERLAPPED_ENTRY,
};

const STATUS_PENDING: NTSTATUS = 0x103;
const COMPLETION_BATCH: usize = 64;

#[repr(C)]
struct AfdPollHandleInfo {
    handle: HANDLE,
    events: u32,
    status: NTSTATUS,
}

#[repr(C)]
struct AfdPollInfo {
    timeout: i64,
    number_of_handles: u32,
    exclusive: u32,
    handles: [AfdPollHandleInfo; 1],
}

#[repr(C)]
struct WsaBuf {
    len: u32,
    buf: *mut u8,
}

#[repr(C)]
struct AfdRecvInfo {
    buffer_array: *mut WsaBuf,
    buffer_count: u32,
    afd_flags: u32,
    tdi_flags: u32,
}

#[repr(C)]
struct AfdRecvDatagramInfo {
    buffer_array: *mut WsaBuf,
    buffer_count: u32,
    afd_flags: u32,
    tdi_flags: u32,
    address: *mut SOCKADDR_STORAGE,
    address_length: *mut i32,
}

/// Heap-pinned state of one in-flight operation.
///
/// The kernel writes through pointers into this struct until the
/// completion packet is delivered, so it must not move or drop earlier;
/// `Box::into_raw` on submit and `Box::from_raw` on completion receipt
/// bracket that window exactly.
struct OpContext {
    iosb: IO_STATUS_BLOCK,
    token: Token,
    op: OpKind,
    buffer: Option<OverlappedBuffer>,
    wsabufs: Vec<WsaBuf>,
    poll_info: AfdPollInfo,
    recv_info: AfdRecvInfo,
    dgram_info: AfdRecvDatagramInfo,
    addr: SOCKADDR_STORAGE,
    addr_len: i32,
}

impl OpContext {
    fn new(token: Token, op: OpKind, buffer: Option<OverlappedBuffer>) -> Box<Self> {
        let mut ctx = Box::new(Self {
            iosb: unsafe { std::mem::zeroed() },
            token,
            op,
            buffer,
            wsabufs: Vec::new(),
            poll_info: unsafe { std::mem::zeroed() },
            recv_info: unsafe { std::mem::zeroed() },
            dgram_info: unsafe { std::mem::zeroed() },
            addr: unsafe { std::mem::zeroed() },
            addr_len: std::mem::size_of::<SOCKADDR_STORAGE>() as i32,
        });
        if let Some(buffer) = &mut ctx.buffer {
            ctx.wsabufs = buffer
                .segments_mut()
                .iter_mut()
                .map(|segment| WsaBuf {
                    len: segment.len() as u32,
                    buf: segment.as_mut_ptr(),
                })
                .collect();
        }
        ctx
    }
}

struct SockEntry {
    socket: SOCKET,
    base: HANDLE,
}

/// Socket driver backed by the AFD kernel interface and an I/O completion
/// port
pub struct AfdDriver {
    port: HANDLE,
    sockets: Mutex<HashMap<u64, SockEntry>>,
}

// The port handle and per-socket base handles are only touched through
// synchronized or kernel-serialized calls.
unsafe impl Send for AfdDriver {}
unsafe impl Sync for AfdDriver {}

impl AfdDriver {
    /// Create a driver with a fresh completion port
    pub fn new() -> Result<Self> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 1) };
        if port == 0 {
            return Err(NetError::Io(std::io::Error::last_os_error()));
        }
        Ok(Self {
            port,
            sockets: Mutex::new(HashMap::new()),
        })
    }

    /// Register a connected or bound socket with the driver.
    ///
    /// Resolves the socket's base provider handle and associates it with
    /// the completion port; the returned id addresses all submissions.
    pub fn register_socket(&self, socket: RawSocket) -> Result<SocketId> {
        let socket = socket as SOCKET;
        let mut base: SOCKET = 0;
        let mut returned: u32 = 0;
        let result = unsafe {
            WSAIoctl(
                socket,
                SIO_BASE_HANDLE,
                ptr::null(),
                0,
                &mut base as *mut _ as *mut c_void,
                std::mem::size_of::<SOCKET>() as u32,
                &mut returned,
                ptr::null_mut(),
                None,
            )
        };
        if result == SOCKET_ERROR {
            return Err(NetError::Io(std::io::Error::from_raw_os_error(unsafe {
                WSAGetLastError()
            })));
        }

        let base_handle = base as HANDLE;
        let associated = unsafe { CreateIoCompletionPort(base_handle, self.port, 0, 0) };
        if associated == 0 {
            return Err(NetError::Io(std::io::Error::last_os_error()));
        }

        let id = SocketId(base as u64);
        self.lock_sockets().insert(
            id.0,
            SockEntry {
                socket,
                base: base_handle,
            },
        );
        tracing::debug!("registered {} (base handle {:#x})", id, base as usize);
        Ok(id)
    }

    fn lock_sockets(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SockEntry>> {
        self.sockets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn base_of(&self, socket: SocketId) -> Result<HANDLE> {
        self.lock_sockets()
            .get(&socket.0)
            .map(|entry| entry.base)
            .ok_or(NetError::UnknownSocket(socket))
    }

    /// Issue one overlapped device control, transferring the pinned
    /// context to the kernel on success
    fn submit(
        &self,
        handle: HANDLE,
        code: u32,
        mut ctx: Box<OpContext>,
        input: (*const c_void, u32),
        output: (*mut c_void, u32),
    ) -> Result<()> {
        let iosb = &mut ctx.iosb as *mut IO_STATUS_BLOCK;
        let raw = Box::into_raw(ctx);
        let status = unsafe {
            NtDeviceIoControlFile(
                handle,
                0,
                None,
                raw as *const c_void,
                iosb,
                code,
                input.0,
                input.1,
                output.0,
                output.1,
            )
        };

        if status >= 0 || status == STATUS_PENDING {
            // Success or pending: the completion packet will carry the
            // context back through the port.
            Ok(())
        } else {
            // Immediate failure: no packet will be queued, reclaim now.
            let _ = unsafe { Box::from_raw(raw) };
            Err(NetError::Io(std::io::Error::from_raw_os_error(unsafe {
                RtlNtStatusToDosError(status) as i32
            })))
        }
    }
}

impl Drop for AfdDriver {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}

impl SocketDriver for AfdDriver {
    fn submit_poll(&self, socket: SocketId, events: PollEvents, token: Token) -> Result<()> {
        let base = self.base_of(socket)?;
        let mut ctx = OpContext::new(token, OpKind::Poll, None);
        ctx.poll_info = AfdPollInfo {
            timeout: i64::MAX,
            number_of_handles: 1,
            exclusive: 0,
            handles: [AfdPollHandleInfo {
                handle: base,
                events: events.raw(),
                status: STATUS_SUCCESS,
            }],
        };
        let info = &mut ctx.poll_info as *mut AfdPollInfo;
        let len = std::mem::size_of::<AfdPollInfo>() as u32;
        self.submit(
            base,
            IOCTL_AFD_POLL,
            ctx,
            (info as *const c_void, len),
            (info as *mut c_void, len),
        )
    }

    fn submit_receive(
        &self,
        socket: SocketId,
        buffer: OverlappedBuffer,
        token: Token,
    ) -> Result<()> {
        let base = self.base_of(socket)?;
        let mut ctx = OpContext::new(token, OpKind::Receive, Some(buffer));
        ctx.recv_info = AfdRecvInfo {
            buffer_array: ctx.wsabufs.as_mut_ptr(),
            buffer_count: ctx.wsabufs.len() as u32,
            afd_flags: AFD_OVERLAPPED,
            tdi_flags: TDI_RECEIVE_NORMAL,
        };
        let info = &ctx.recv_info as *const AfdRecvInfo;
        let len = std::mem::size_of::<AfdRecvInfo>() as u32;
        self.submit(
            base,
            IOCTL_AFD_RECEIVE,
            ctx,
            (info as *const c_void, len),
            (ptr::null_mut(), 0),
        )
    }

    fn submit_receive_datagram(
        &self,
        socket: SocketId,
        buffer: OverlappedBuffer,
        token: Token,
    ) -> Result<()> {
        let base = self.base_of(socket)?;
        let mut ctx = OpContext::new(token, OpKind::ReceiveDatagram, Some(buffer));
        ctx.dgram_info = AfdRecvDatagramInfo {
            buffer_array: ctx.wsabufs.as_mut_ptr(),
            buffer_count: ctx.wsabufs.len() as u32,
            afd_flags: AFD_OVERLAPPED,
            tdi_flags: TDI_RECEIVE_NORMAL,
            address: &mut ctx.addr,
            address_length: &mut ctx.addr_len,
        };
        let info = &ctx.dgram_info as *const AfdRecvDatagramInfo;
        let len = std::mem::size_of::<AfdRecvDatagramInfo>() as u32;
        self.submit(
            base,
            IOCTL_AFD_RECEIVE_DATAGRAM,
            ctx,
            (info as *const c_void, len),
            (ptr::null_mut(), 0),
        )
    }

    fn submit_send(&self, socket: SocketId, buffer: OverlappedBuffer, token: Token) -> Result<()> {
        // Sends ride the socket itself after send-readiness; only the
        // three receive/poll operations go to the kernel interface.
        let raw_socket = self
            .lock_sockets()
            .get(&socket.0)
            .map(|entry| entry.socket)
            .ok_or(NetError::UnknownSocket(socket))?;

        let mut sent_total = 0usize;
        let mut error: Option<i32> = None;
        'outer: for segment in buffer.segments() {
            let mut offset = 0usize;
            while offset < segment.len() {
                let sent = unsafe {
                    send(
                        raw_socket,
                        segment[offset..].as_ptr(),
                        (segment.len() - offset) as i32,
                        0,
                    )
                };
                if sent == SOCKET_ERROR {
                    error = Some(unsafe { WSAGetLastError() });
                    break 'outer;
                }
                offset += sent as usize;
                sent_total += sent as usize;
            }
        }

        let mut ctx = OpContext::new(token, OpKind::Send, Some(buffer));
        ctx.iosb.Information = sent_total;
        ctx.iosb.Anonymous.Status = match error {
            None => STATUS_SUCCESS,
            Some(code) => {
                ctx.iosb.Information = 0;
                code
            }
        };
        let raw = Box::into_raw(ctx);
        let posted = unsafe {
            PostQueuedCompletionStatus(self.port, sent_total as u32, 0, raw as *mut _)
        };
        if posted == 0 {
            let _ = unsafe { Box::from_raw(raw) };
            return Err(NetError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn cancel(&self, socket: SocketId) -> Result<()> {
        let base = self.base_of(socket)?;
        let mut iosb: IO_STATUS_BLOCK = unsafe { std::mem::zeroed() };
        let status = unsafe { NtCancelIoFileEx(base, ptr::null_mut(), &mut iosb) };
        // STATUS_NOT_FOUND means nothing was outstanding; that is not an
        // error for an asynchronous cancel request.
        if status < 0 && status != STATUS_NOT_FOUND {
            return Err(NetError::Io(std::io::Error::from_raw_os_error(unsafe {
                RtlNtStatusToDosError(status) as i32
            })));
        }
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>, out: &mut Vec<RawCompletion>) -> Result<()> {
        let millis = match timeout {
            None => u32::MAX,
            Some(t) => t.as_millis().min(u128::from(u32::MAX - 1)) as u32,
        };

        let mut entries: [OVERLAPPED_ENTRY; COMPLETION_BATCH] = unsafe { std::mem::zeroed() };
        let mut removed: u32 = 0;
        let ok = unsafe {
            GetQueuedCompletionStatusEx(
                self.port,
                entries.as_mut_ptr(),
                COMPLETION_BATCH as u32,
                &mut removed,
                millis,
                0,
            )
        };
        if ok == 0 {
            let error = std::io::Error::last_os_error();
            return match error.raw_os_error() {
                Some(code) if code as u32 == WAIT_TIMEOUT => Ok(()),
                Some(code) if code as u32 == ERROR_ABANDONED_WAIT_0 => Ok(()),
                _ => Err(NetError::Io(error)),
            };
        }

        for entry in entries.iter().take(removed as usize) {
            if entry.lpOverlapped.is_null() {
                continue;
            }
            let ctx = unsafe { Box::from_raw(entry.lpOverlapped as *mut OpContext) };
            out.push(resolve_completion(*ctx));
        }
        Ok(())
    }
}

/// Translate a reclaimed context into a raw completion record
fn resolve_completion(ctx: OpContext) -> RawCompletion {
    let status_code = unsafe { ctx.iosb.Anonymous.Status };
    let status = match status_code {
        STATUS_SUCCESS => CompletionStatus::Success,
        STATUS_CANCELLED => CompletionStatus::Canceled,
        code => CompletionStatus::Error(unsafe { RtlNtStatusToDosError(code) as i32 }),
    };

    let (bytes, events) = match ctx.op {
        OpKind::Poll => (0, ctx.poll_info.handles[0].events),
        _ => (ctx.iosb.Information, 0),
    };

    let peer = if ctx.op == OpKind::ReceiveDatagram && status.is_success() {
        sockaddr_to_addr(&ctx.addr, ctx.addr_len)
    } else {
        None
    };

    RawCompletion {
        token: ctx.token,
        op: ctx.op,
        status,
        bytes,
        events,
        peer,
        buffer: ctx.buffer,
    }
}

/// Decode a sockaddr written by the kernel into a std address
fn sockaddr_to_addr(storage: &SOCKADDR_STORAGE, len: i32) -> Option<SocketAddr> {
    match storage.ss_family {
        AF_INET => {
            if (len as usize) < std::mem::size_of::<SOCKADDR_IN>() {
                return None;
            }
            let v4 = unsafe { &*(storage as *const _ as *const SOCKADDR_IN) };
            let ip = Ipv4Addr::from(u32::from_be(unsafe { v4.sin_addr.S_un.S_addr }));
            Some(SocketAddr::V4(SocketAddrV4::new(
                ip,
                u16::from_be(v4.sin_port),
            )))
        }
        AF_INET6 => {
            if (len as usize) < std::mem::size_of::<SOCKADDR_IN6>() {
                return None;
            }
            let v6 = unsafe { &*(storage as *const _ as *const SOCKADDR_IN6) };
            let ip = Ipv6Addr::from(unsafe { v6.sin6_addr.u.Byte });
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(v6.sin6_port),
                v6.sin6_flowinfo,
                unsafe { v6.Anonymous.sin6_scope_id },
            )))
        }
        _ => None,
    }
}
