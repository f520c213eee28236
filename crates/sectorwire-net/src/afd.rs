//! Control-code encoding for the network stack's kernel driver.
//!
//! Winsock is a dispatch layer over the kernel-mode network driver (AFD).
//! Requests are addressed to it with a control code packed as
//! `(device_class << 12) | (operation << 2) | transfer_method`. Only three
//! operations are ever issued from this crate: receive, receive-datagram,
//! and poll. This module is the single place that knows the raw encoding;
//! everything above it works with typed values.

/// Device class of the network driver
pub const FSCTL_AFD_BASE: u32 = 0x12; // FILE_DEVICE_NETWORK

/// Buffered transfer method
pub const METHOD_BUFFERED: u32 = 0;
/// Neither-buffered-nor-direct transfer method
pub const METHOD_NEITHER: u32 = 3;

/// Receive operation code
pub const AFD_RECEIVE: u32 = 5;
/// Receive-datagram operation code
pub const AFD_RECEIVE_DATAGRAM: u32 = 6;
/// Poll operation code
pub const AFD_POLL: u32 = 9;

/// Pack a control code for the network driver
pub const fn control_code(operation: u32, method: u32) -> u32 {
    (FSCTL_AFD_BASE << 12) | (operation << 2) | method
}

/// Control code for an overlapped stream receive
pub const IOCTL_AFD_RECEIVE: u32 = control_code(AFD_RECEIVE, METHOD_NEITHER);
/// Control code for an overlapped datagram receive
pub const IOCTL_AFD_RECEIVE_DATAGRAM: u32 = control_code(AFD_RECEIVE_DATAGRAM, METHOD_NEITHER);
/// Control code for an overlapped poll
pub const IOCTL_AFD_POLL: u32 = control_code(AFD_POLL, METHOD_BUFFERED);

/// Request flag: skip the fast I/O path
pub const AFD_NO_FAST_IO: u32 = 0x0000_0001;
/// Request flag: overlapped submission
pub const AFD_OVERLAPPED: u32 = 0x0000_0002;
/// Request flag: complete immediately when possible
pub const AFD_IMMEDIATE: u32 = 0x0000_0004;

/// TDI receive flag: normal data
pub const TDI_RECEIVE_NORMAL: u32 = 0x0000_0020;
/// TDI receive flag: expedited data
pub const TDI_RECEIVE_EXPEDITED: u32 = 0x0000_0040;
/// TDI receive flag: peek without consuming
pub const TDI_RECEIVE_PEEK: u32 = 0x0000_0080;
/// TDI receive flag: partial message acceptable
pub const TDI_RECEIVE_PARTIAL: u32 = 0x0000_0010;
/// TDI receive flag: only complete for an entire message
pub const TDI_RECEIVE_ENTIRE_MESSAGE: u32 = 0x0000_0400;
