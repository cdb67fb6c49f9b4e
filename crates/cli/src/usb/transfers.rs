//! USB transfer execution
//!
//! Synchronous rusb calls for the AOA control requests and a libusb-driven
//! isochronous IN transfer, with errors mapped to protocol error codes.

use libusb1_sys as ffi;
use libusb1_sys::constants::{
    LIBUSB_ERROR_ACCESS, LIBUSB_ERROR_BUSY, LIBUSB_ERROR_INTERRUPTED, LIBUSB_ERROR_INVALID_PARAM,
    LIBUSB_ERROR_NO_DEVICE, LIBUSB_ERROR_NOT_SUPPORTED, LIBUSB_TRANSFER_COMPLETED,
    LIBUSB_TRANSFER_NO_DEVICE, LIBUSB_TRANSFER_OVERFLOW, LIBUSB_TRANSFER_STALL,
    LIBUSB_TRANSFER_TIMED_OUT, LIBUSB_TRANSFER_TYPE_ISOCHRONOUS,
};
use protocol::{ControlSetup, Direction, IsoPacket, UsbError};
use rusb::{Context, DeviceHandle, UsbContext};
use std::ffi::{c_int, c_uint, c_void};
use std::ptr;
use std::time::Duration;
use tracing::{debug, warn};

/// Host-to-device control transfer
pub fn control_out(
    handle: &DeviceHandle<Context>,
    setup: ControlSetup,
    data: &[u8],
    timeout: Duration,
) -> Result<(), UsbError> {
    debug_assert_eq!(setup.direction, Direction::Out);
    debug!(
        "Control OUT: request_type={:#x}, request={}, value={:#x}, index={:#x}, data_len={}",
        setup.request_type(),
        setup.request.code(),
        setup.value,
        setup.index,
        data.len()
    );

    match handle.write_control(
        setup.request_type(),
        setup.request.code(),
        setup.value,
        setup.index,
        data,
        timeout,
    ) {
        Ok(_len) => Ok(()),
        Err(e) => {
            warn!("Control transfer {} failed: {}", setup.request, e);
            Err(map_rusb_error(e))
        }
    }
}

/// Device-to-host control transfer reading up to `length` bytes
pub fn control_in(
    handle: &DeviceHandle<Context>,
    setup: ControlSetup,
    length: u16,
    timeout: Duration,
) -> Result<Vec<u8>, UsbError> {
    debug_assert_eq!(setup.direction, Direction::In);
    let mut buffer = vec![0u8; length as usize];

    match handle.read_control(
        setup.request_type(),
        setup.request.code(),
        setup.value,
        setup.index,
        &mut buffer,
        timeout,
    ) {
        Ok(len) => {
            buffer.truncate(len);
            debug!("Control IN {} returned {} bytes", setup.request, len);
            Ok(buffer)
        }
        Err(e) => {
            warn!("Control transfer {} failed: {}", setup.request, e);
            Err(map_rusb_error(e))
        }
    }
}

/// Isochronous IN transfer
///
/// rusb only wraps libusb's synchronous API, so this submits an asynchronous
/// libusb transfer and drives the event loop on the calling thread until its
/// callback fires. `endpoint` is the endpoint number; the IN direction bit is
/// added here.
pub fn isochronous_in(
    handle: &DeviceHandle<Context>,
    endpoint: u8,
    packet_sizes: &[u32],
    timeout: Duration,
) -> Result<Vec<IsoPacket>, UsbError> {
    if packet_sizes.is_empty() {
        return Ok(Vec::new());
    }
    let address = endpoint_in_address(endpoint);
    let total: usize = packet_sizes.iter().map(|size| *size as usize).sum();
    let num_packets = c_int::try_from(packet_sizes.len()).map_err(|_| UsbError::InvalidParam)?;
    let length = c_int::try_from(total).map_err(|_| UsbError::InvalidParam)?;
    let timeout_ms = c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX);

    debug!(
        "Isochronous IN: endpoint={:#x}, packets={}, bytes={}",
        address, num_packets, total
    );

    let mut buffer = vec![0u8; total];
    let mut completed: c_int = 0;
    let completed_ptr: *mut c_int = &mut completed;

    // SAFETY: the transfer is allocated with `num_packets` descriptors and
    // freed before returning. `buffer` and `completed` outlive it: the event
    // loop below runs until the callback has fired, cancelling on error.
    unsafe {
        let transfer = ffi::libusb_alloc_transfer(num_packets);
        if transfer.is_null() {
            return Err(UsbError::Other {
                message: "failed to allocate isochronous transfer".to_string(),
            });
        }

        (*transfer).dev_handle = handle.as_raw();
        (*transfer).endpoint = address;
        (*transfer).transfer_type = LIBUSB_TRANSFER_TYPE_ISOCHRONOUS;
        (*transfer).timeout = timeout_ms;
        (*transfer).buffer = buffer.as_mut_ptr();
        (*transfer).length = length;
        (*transfer).num_iso_packets = num_packets;
        (*transfer).callback = transfer_complete;
        (*transfer).user_data = completed_ptr.cast::<c_void>();

        let descriptors = ptr::addr_of_mut!((*transfer).iso_packet_desc)
            .cast::<ffi::libusb_iso_packet_descriptor>();
        for (i, size) in packet_sizes.iter().enumerate() {
            (*descriptors.add(i)).length = *size;
        }

        let rc = ffi::libusb_submit_transfer(transfer);
        if rc < 0 {
            ffi::libusb_free_transfer(transfer);
            warn!("Isochronous submit on {:#x} failed: {}", address, rc);
            return Err(map_libusb_error(rc));
        }

        let context = handle.context().as_raw();
        while *completed_ptr == 0 {
            let rc = ffi::libusb_handle_events_completed(context, completed_ptr);
            if rc < 0 && rc != LIBUSB_ERROR_INTERRUPTED {
                warn!("Event handling failed during isochronous IN: {}", rc);
                ffi::libusb_cancel_transfer(transfer);
            }
        }

        let status = (*transfer).status;
        let outcomes: Vec<(c_int, c_uint)> = (0..packet_sizes.len())
            .map(|i| {
                let descriptor = &*descriptors.add(i);
                (descriptor.status, descriptor.actual_length)
            })
            .collect();
        ffi::libusb_free_transfer(transfer);

        if status != LIBUSB_TRANSFER_COMPLETED {
            warn!("Isochronous IN on {:#x} ended with status {}", address, status);
            return Err(map_transfer_status(status));
        }
        Ok(collect_packets(&buffer, packet_sizes, &outcomes))
    }
}

extern "system" fn transfer_complete(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: user_data is the `completed` flag of the isochronous_in call
    // that is blocked in the event loop for this transfer.
    unsafe {
        *(*transfer).user_data.cast::<c_int>() = 1;
    }
}

/// IN endpoint address for an endpoint number
fn endpoint_in_address(endpoint: u8) -> u8 {
    0x80 | (endpoint & 0x0f)
}

/// Split a transfer buffer into packets
///
/// Packet `i` starts at the sum of the requested sizes before it. Packets
/// whose own status is not COMPLETED are dropped.
fn collect_packets(
    buffer: &[u8],
    packet_sizes: &[u32],
    outcomes: &[(c_int, c_uint)],
) -> Vec<IsoPacket> {
    let mut packets = Vec::with_capacity(outcomes.len());
    let mut offset = 0usize;
    for (size, (status, actual)) in packet_sizes.iter().zip(outcomes) {
        let size = *size as usize;
        if *status == LIBUSB_TRANSFER_COMPLETED {
            let len = (*actual as usize).min(size);
            if let Some(data) = buffer.get(offset..offset + len) {
                packets.push(IsoPacket::new(data.to_vec()));
            }
        } else {
            debug!("Dropping isochronous packet with status {}", status);
        }
        offset += size;
    }
    packets
}

/// Map a failed libusb transfer status to protocol::UsbError
fn map_transfer_status(status: c_int) -> UsbError {
    match status {
        LIBUSB_TRANSFER_TIMED_OUT => UsbError::Timeout,
        LIBUSB_TRANSFER_STALL => UsbError::Pipe,
        LIBUSB_TRANSFER_NO_DEVICE => UsbError::NoDevice,
        LIBUSB_TRANSFER_OVERFLOW => UsbError::Overflow,
        _ => UsbError::Io,
    }
}

/// Map a libusb return code to protocol::UsbError
fn map_libusb_error(rc: c_int) -> UsbError {
    match rc {
        LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
        LIBUSB_ERROR_BUSY => UsbError::Busy,
        LIBUSB_ERROR_NOT_SUPPORTED => UsbError::NotSupported,
        LIBUSB_ERROR_INVALID_PARAM => UsbError::InvalidParam,
        LIBUSB_ERROR_ACCESS => UsbError::Access,
        _ => UsbError::Io,
    }
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
