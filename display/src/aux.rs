//! Auxiliary channel protocol — native and tunneled two-wire transactions
//!
//! The AUX engine is a shared, half-duplex, slow side channel to the display
//! sink. Software hands it a ≤20-byte frame (header plus ≤16 payload bytes),
//! kicks the control register, and polls completion. The sink answers every
//! request with Ack, Nack, or Defer in the first reply byte; Defer means
//! "retry later" and is recovered here with a bounded backoff, Nack is a hard
//! rejection and never retried.
//!
//! Larger two-wire (I2C-style) transfers are tunneled: the logical transfer
//! is cut into ≤16-byte chunks, each wrapped in its own channel transaction,
//! with a middle-of-transaction flag keeping the downstream bus open between
//! chunks.
//!
//! The device's coarse lock is held for the whole logical transaction; the
//! channel cannot interleave two masters.

use alloc::vec::Vec;

use crate::clock::SignalType;
use crate::error::{DisplayError, Result};
use crate::hw::{retry_bounded, wait_for, Attempt, HostOps};
use crate::regs::{self, AuxCtl};
use crate::topology::{PortId, SinkCache, SINK_IDENT_LEN};
use crate::Device;

// ═══════════════════════════════════════════════════════════════════════════════
// Protocol Constants
// ═══════════════════════════════════════════════════════════════════════════════

/// Payload ceiling per transaction.
pub const AUX_MAX_PAYLOAD: usize = 16;
/// Whole-frame ceiling: 4-byte header plus payload.
pub const AUX_FRAME_LEN: usize = 20;

/// Defer recovery: total submissions before giving up.
const DEFER_ATTEMPTS: u32 = 7;
const DEFER_DELAY_US: u64 = 400;

/// Submission while the previous transaction is still in flight.
const BUSY_ATTEMPTS: u32 = 3;
const BUSY_DELAY_US: u64 = 1_000;

/// Software budget for one hardware round-trip.
const COMPLETION_BUDGET_US: u64 = 10_000;

/// Conventional two-wire address of a sink's identification ROM.
const EDID_I2C_ADDRESS: u32 = 0x50;
/// Identification ROM block size.
const EDID_BLOCK_LEN: usize = 128;

// Request nibbles. The tunneled ops also carry the middle-of-transaction bit.
const OP_I2C_WRITE: u8 = 0x0;
const OP_I2C_READ: u8 = 0x1;
const OP_I2C_WRITE_STATUS: u8 = 0x2;
const OP_MOT: u8 = 0x4;
const OP_NATIVE_WRITE: u8 = 0x8;
const OP_NATIVE_READ: u8 = 0x9;

// Reply nibble bits. Native and tunneled outcomes occupy separate bit pairs.
const REPLY_NACK: u8 = 0x1;
const REPLY_DEFER: u8 = 0x2;
const REPLY_I2C_NACK: u8 = 0x4;
const REPLY_I2C_DEFER: u8 = 0x8;

// ═══════════════════════════════════════════════════════════════════════════════
// Requests
// ═══════════════════════════════════════════════════════════════════════════════

/// Transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxOp {
    NativeRead,
    NativeWrite,
    I2cRead,
    I2cWrite,
    I2cWriteStatus,
}

impl AuxOp {
    fn is_read(&self) -> bool {
        matches!(self, AuxOp::NativeRead | AuxOp::I2cRead)
    }

    fn is_tunneled(&self) -> bool {
        matches!(self, AuxOp::I2cRead | AuxOp::I2cWrite | AuxOp::I2cWriteStatus)
    }

    fn nibble(&self, mot: bool) -> u8 {
        let base = match self {
            AuxOp::NativeRead => OP_NATIVE_READ,
            AuxOp::NativeWrite => OP_NATIVE_WRITE,
            AuxOp::I2cRead => OP_I2C_READ,
            AuxOp::I2cWrite => OP_I2C_WRITE,
            AuxOp::I2cWriteStatus => OP_I2C_WRITE_STATUS,
        };
        if mot && self.is_tunneled() {
            base | OP_MOT
        } else {
            base
        }
    }
}

/// One request/reply unit. Created per call, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct AuxRequest<'a> {
    pub op: AuxOp,
    /// Keep the downstream two-wire bus open after this chunk
    pub mot: bool,
    /// 20-bit target address (register address, or two-wire device address
    /// for tunneled ops)
    pub address: u32,
    /// Write payload; empty for reads
    pub payload: &'a [u8],
    /// Expected reply bytes for reads; 0 for writes
    pub read_len: u8,
}

impl<'a> AuxRequest<'a> {
    pub fn native_read(address: u32, len: u8) -> Self {
        Self { op: AuxOp::NativeRead, mot: false, address, payload: &[], read_len: len }
    }

    pub fn native_write(address: u32, payload: &'a [u8]) -> Self {
        Self { op: AuxOp::NativeWrite, mot: false, address, payload, read_len: 0 }
    }

    fn i2c(op: AuxOp, address: u32, payload: &'a [u8], read_len: u8, mot: bool) -> Self {
        Self { op, mot, address, payload, read_len }
    }

    /// Encode into a channel frame. Zero-length transactions are bare
    /// 3-byte headers (the tunneled address-only select); everything else
    /// appends the length byte and, for writes, the payload.
    fn encode(&self, frame: &mut [u8; AUX_FRAME_LEN]) -> Result<usize> {
        if self.address > 0xF_FFFF
            || self.payload.len() > AUX_MAX_PAYLOAD
            || self.read_len as usize > AUX_MAX_PAYLOAD
        {
            return Err(DisplayError::InvalidConfiguration);
        }
        if self.op.is_read() && !self.payload.is_empty() {
            return Err(DisplayError::InvalidConfiguration);
        }

        frame[0] = (self.op.nibble(self.mot) << 4) | ((self.address >> 16) as u8 & 0xF);
        frame[1] = (self.address >> 8) as u8;
        frame[2] = self.address as u8;

        let length = if self.op.is_read() { self.read_len as usize } else { self.payload.len() };
        if length == 0 {
            return Ok(3);
        }
        frame[3] = (length - 1) as u8;
        if self.op.is_read() {
            Ok(4)
        } else {
            frame[4..4 + self.payload.len()].copy_from_slice(self.payload);
            Ok(4 + self.payload.len())
        }
    }
}

/// Sink's answer, classified from the first reply byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyKind {
    Ack,
    Nack,
    Defer,
}

fn classify_reply(first: u8, tunneled: bool) -> ReplyKind {
    let code = first >> 4;
    if code & REPLY_NACK != 0 {
        ReplyKind::Nack
    } else if code & REPLY_DEFER != 0 {
        ReplyKind::Defer
    } else if tunneled && code & REPLY_I2C_NACK != 0 {
        ReplyKind::Nack
    } else if tunneled && code & REPLY_I2C_DEFER != 0 {
        ReplyKind::Defer
    } else {
        ReplyKind::Ack
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Channel Engine
// ═══════════════════════════════════════════════════════════════════════════════

impl<H: HostOps> Device<H> {
    /// Run one AUX transaction, with the protocol's full recovery policy.
    /// Returns the reply payload (empty for writes).
    pub fn aux_transfer(&self, channel: u8, request: &AuxRequest) -> Result<Vec<u8>> {
        let _state = self.state.lock();
        self.aux_transfer_locked(channel, request)
    }

    /// Transaction body; the caller holds the device lock.
    pub(crate) fn aux_transfer_locked(
        &self,
        channel: u8,
        request: &AuxRequest,
    ) -> Result<Vec<u8>> {
        let mut frame = [0u8; AUX_FRAME_LEN];
        let send_len = request.encode(&mut frame)?;

        retry_bounded(&self.host, DEFER_ATTEMPTS, DEFER_DELAY_US, DisplayError::Timeout, || {
            let reply = match self.aux_submit(channel, &frame[..send_len]) {
                Ok(r) => r,
                Err(e) => return Attempt::Fail(e),
            };
            if reply.is_empty() {
                // A completed transaction always carries at least the
                // command byte; an empty one is a channel fault.
                return Attempt::Fail(DisplayError::Io);
            }
            match classify_reply(reply[0], request.op.is_tunneled()) {
                ReplyKind::Ack => {
                    let mut data = reply;
                    data.remove(0);
                    if request.op.is_read() {
                        data.truncate(request.read_len as usize);
                    } else {
                        data.clear();
                    }
                    Attempt::Done(data)
                }
                ReplyKind::Nack => {
                    log::warn!("[AUX] ch{} nack at {:#07X}", channel, request.address);
                    Attempt::Fail(DisplayError::TransactionRejected)
                }
                ReplyKind::Defer => {
                    log::debug!("[AUX] ch{} defer at {:#07X}", channel, request.address);
                    Attempt::Again
                }
            }
        })
    }

    /// Push one frame through the channel hardware and collect the raw
    /// reply. Handles the submission-busy condition and the channel-level
    /// fault flags, not the protocol reply codes.
    fn aux_submit(&self, channel: u8, frame: &[u8]) -> Result<Vec<u8>> {
        let ctl_addr = regs::aux::ctl(channel);

        // A previous transaction may still be in flight.
        retry_bounded(&self.host, BUSY_ATTEMPTS, BUSY_DELAY_US, DisplayError::Busy, || {
            let ctl = self.host.read_register(ctl_addr);
            if AuxCtl::from_bits_truncate(ctl).contains(AuxCtl::SEND_BUSY) {
                Attempt::Again
            } else {
                Attempt::Done(())
            }
        })?;

        // Load the frame into the data registers, big-endian within each
        // word, then kick the transaction.
        for word in 0..regs::aux::DATA_WORDS {
            self.host
                .write_register(regs::aux::data(channel, word), pack_word(frame, word as usize));
        }
        self.host
            .write_register(ctl_addr, regs::aux_ctl_word(frame.len() as u32, self.aux_clock_div));

        if !wait_for(&self.host, COMPLETION_BUDGET_US, || {
            let ctl = self.host.read_register(ctl_addr);
            !AuxCtl::from_bits_truncate(ctl).contains(AuxCtl::SEND_BUSY)
        }) {
            log::warn!("[AUX] ch{} stuck busy", channel);
            return Err(DisplayError::Timeout);
        }

        // Latch and clear completion status.
        let status = self.host.read_register(ctl_addr);
        self.host.write_register(ctl_addr, status);

        let flags = AuxCtl::from_bits_truncate(status);
        if flags.contains(AuxCtl::TIMEOUT_ERROR) {
            return Err(DisplayError::Timeout);
        }
        if flags.contains(AuxCtl::RECEIVE_ERROR) {
            return Err(DisplayError::Io);
        }
        if !flags.contains(AuxCtl::DONE) {
            return Err(DisplayError::Io);
        }

        let count = (regs::aux_message_size(status) as usize).min(AUX_FRAME_LEN);
        let mut reply = Vec::with_capacity(count);
        for i in 0..count {
            let word = self.host.read_register(regs::aux::data(channel, (i / 4) as u32));
            reply.push((word >> (8 * (3 - (i % 4)))) as u8);
        }
        Ok(reply)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tunneled Two-Wire Transfers
    // ═══════════════════════════════════════════════════════════════════════

    /// Tunneled two-wire read of `len` bytes from device `i2c_address`.
    pub fn i2c_read(&self, channel: u8, i2c_address: u8, len: usize) -> Result<Vec<u8>> {
        let _state = self.state.lock();
        self.i2c_read_locked(channel, i2c_address, len)
    }

    fn i2c_read_locked(&self, channel: u8, i2c_address: u8, len: usize) -> Result<Vec<u8>> {
        let address = i2c_address as u32;

        // Address-only select opens the bus toward the target.
        let start = AuxRequest::i2c(AuxOp::I2cRead, address, &[], 0, true);
        self.aux_transfer_locked(channel, &start)?;

        let mut data = Vec::with_capacity(len);
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(AUX_MAX_PAYLOAD);
            let last = remaining == chunk;
            let request = AuxRequest::i2c(AuxOp::I2cRead, address, &[], chunk as u8, !last);
            let reply = self.aux_transfer_locked(channel, &request)?;
            if reply.is_empty() {
                return Err(DisplayError::Io);
            }
            remaining -= reply.len().min(remaining);
            data.extend_from_slice(&reply);
        }
        Ok(data)
    }

    /// Tunneled two-wire write to device `i2c_address`.
    pub fn i2c_write(&self, channel: u8, i2c_address: u8, data: &[u8]) -> Result<()> {
        let _state = self.state.lock();
        let address = i2c_address as u32;

        let start = AuxRequest::i2c(AuxOp::I2cWrite, address, &[], 0, true);
        self.aux_transfer_locked(channel, &start)?;

        let mut offset = 0;
        while offset < data.len() {
            let chunk = (data.len() - offset).min(AUX_MAX_PAYLOAD);
            let last = offset + chunk == data.len();
            let request =
                AuxRequest::i2c(AuxOp::I2cWrite, address, &data[offset..offset + chunk], 0, !last);
            self.aux_transfer_locked(channel, &request)?;
            offset += chunk;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sink Probing
    // ═══════════════════════════════════════════════════════════════════════

    /// Probe the sink behind `port`: read its identification block, cache it
    /// on the port, and negotiate the signal type from the port's
    /// capabilities. `Ok(None)` means nothing answered (cache set Absent).
    pub fn probe_sink(&self, port: PortId) -> Result<Option<SignalType>> {
        use crate::topology::PortCaps;

        let mut state = self.state.lock();
        let (channel, caps) = {
            let p = state.port(port)?;
            (p.aux_channel, p.caps)
        };

        let dp_capable = caps.intersects(PortCaps::DISPLAY_PORT | PortCaps::EDP);
        let probe = if dp_capable {
            // DisplayPort sinks answer native reads of the capability block.
            self.aux_transfer_locked(
                channel,
                &AuxRequest::native_read(0x000, SINK_IDENT_LEN as u8),
            )
        } else {
            // TMDS sinks only expose their identification ROM.
            self.i2c_read_locked(channel, EDID_I2C_ADDRESS as u8, SINK_IDENT_LEN)
        };

        match probe {
            Ok(bytes) => {
                let mut block = [0u8; SINK_IDENT_LEN];
                let n = bytes.len().min(SINK_IDENT_LEN);
                block[..n].copy_from_slice(&bytes[..n]);

                let signal = if dp_capable {
                    if caps.contains(PortCaps::EDP) { SignalType::Edp } else { SignalType::DisplayPort }
                } else if caps.contains(PortCaps::HDMI) {
                    SignalType::Hdmi
                } else {
                    SignalType::Dvi
                };

                let p = state.port_mut(port)?;
                p.sink = SinkCache::Present(block);
                p.negotiated = Some(signal);
                log::info!("[AUX] {} sink present, negotiated {}", port, signal.name());
                Ok(Some(signal))
            }
            Err(DisplayError::InvalidConfiguration) => Err(DisplayError::InvalidConfiguration),
            Err(e) => {
                let p = state.port_mut(port)?;
                p.sink = SinkCache::Absent;
                p.negotiated = None;
                log::info!("[AUX] {} no sink ({})", port, e);
                Ok(None)
            }
        }
    }

    /// Link symbol rate advertised in the cached identification block,
    /// in kHz. Byte 1 counts 270 MHz units.
    pub fn sink_link_rate_khz(&self, port: PortId) -> Result<u32> {
        let state = self.state.lock();
        match state.port(port)?.sink {
            SinkCache::Present(block) => Ok(block[1] as u32 * 27_000),
            _ => Err(DisplayError::InvalidConfiguration),
        }
    }

    /// Bulk identification ROM read over the tunneled two-wire path.
    pub fn read_sink_edid(&self, port: PortId) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let channel = state.port(port)?.aux_channel;
        drop(state);
        self.i2c_read(channel, EDID_I2C_ADDRESS as u8, EDID_BLOCK_LEN)
    }
}

/// Pack frame bytes into one 32-bit data register, first byte in the top
/// lane.
fn pack_word(frame: &[u8], word: usize) -> u32 {
    let mut value = 0u32;
    for lane in 0..4 {
        let idx = word * 4 + lane;
        if idx < frame.len() {
            value |= (frame[idx] as u32) << (8 * (3 - lane));
        }
    }
    value
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
