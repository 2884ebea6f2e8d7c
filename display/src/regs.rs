//! Display Engine Register Definitions — Larkspur LK-1/LK-2/LK-3
//!
//! Register offsets and field layouts for the display blocks this core
//! programs. Offsets are relative to the display MMIO window the host maps.
//!
//! Register namespaces:
//! - PLL_*  : Pixel clock synthesizers (one instance per pipe)
//! - AUX_*  : Auxiliary channel engines (one instance per port)
//! - BUF_*  : Output buffers / port drivers
//! - TRANS_*: Timing generators (transcoders)
//! - PIPE_* : Pixel pipes
//! - PLANE_*: Pixel source planes
//! - PP_*   : Panel power sequencer (embedded panels)
//! - INT_*  : Display interrupt status (vertical blank)

use bitflags::bitflags;

use crate::clock::ClockParams;

// ═══════════════════════════════════════════════════════════════════════════════
// PLL — Pixel Clock Synthesizer (one instance per pipe)
// ═══════════════════════════════════════════════════════════════════════════════

/// Synthesizer register block — per-instance config/enable words
pub mod pll {
    pub const BASE: u32 = 0x6000;
    pub const STRIDE: u32 = 0x20;

    /// Config word 0: DCO multiplier (integer + 15-bit fraction)
    pub const CFG0_OFFSET: u32 = 0x00;
    /// Config word 1: divider chain + center frequency select
    pub const CFG1_OFFSET: u32 = 0x04;
    /// Enable/status word
    pub const ENABLE_OFFSET: u32 = 0x08;

    /// ENABLE word bits
    pub const ENABLE: u32 = 1 << 31;
    pub const LOCKED: u32 = 1 << 30;
    pub const POWER_STATE: u32 = 1 << 26;

    // CFG0 fields
    pub const CFG0_DCO_INTEGER_MASK: u32 = 0x3FF; // bits 9:0
    pub const CFG0_DCO_FRACTION_SHIFT: u32 = 10; // bits 24:10
    pub const CFG0_DCO_FRACTION_MASK: u32 = 0x7FFF;

    // CFG1 fields
    pub const CFG1_CENTRAL_FREQ_MASK: u32 = 0x3; // bits 1:0
    pub const CFG1_PDIV_SHIFT: u32 = 2; // bits 5:2
    pub const CFG1_PDIV_MASK: u32 = 0xF;
    pub const CFG1_KDIV_SHIFT: u32 = 6; // bits 8:6
    pub const CFG1_KDIV_MASK: u32 = 0x7;
    pub const CFG1_QDIV_MODE: u32 = 1 << 9;
    pub const CFG1_QDIV_RATIO_SHIFT: u32 = 10; // bits 17:10
    pub const CFG1_QDIV_RATIO_MASK: u32 = 0xFF;

    pub fn cfg0(instance: u8) -> u32 {
        BASE + instance as u32 * STRIDE + CFG0_OFFSET
    }

    pub fn cfg1(instance: u8) -> u32 {
        BASE + instance as u32 * STRIDE + CFG1_OFFSET
    }

    pub fn enable(instance: u8) -> u32 {
        BASE + instance as u32 * STRIDE + ENABLE_OFFSET
    }
}

/// Encode a P divider value into its one-hot CFG1 field code.
/// Only 2/3/5/7 exist in silicon.
pub fn pdiv_code(p: u32) -> u32 {
    match p {
        2 => 0b0001,
        3 => 0b0010,
        5 => 0b0100,
        7 => 0b1000,
        _ => 0,
    }
}

/// Decode a one-hot P divider field code back to its value.
pub fn pdiv_value(code: u32) -> u32 {
    match code {
        0b0001 => 2,
        0b0010 => 3,
        0b0100 => 5,
        0b1000 => 7,
        _ => 0,
    }
}

/// Encode a K divider value into its CFG1 field code. The K stage supports
/// 1/2/3/5; 5 is the hardware's reset code 0.
pub fn kdiv_code(k: u32) -> u32 {
    match k {
        1 => 0b001,
        2 => 0b010,
        3 => 0b100,
        5 => 0b000,
        _ => 0b111,
    }
}

/// Decode a K divider field code back to its value.
pub fn kdiv_value(code: u32) -> u32 {
    match code {
        0b001 => 1,
        0b010 => 2,
        0b100 => 3,
        0b000 => 5,
        _ => 0,
    }
}

/// Encode a center frequency (kHz) into the 2-bit CFG1 select field.
pub fn central_freq_code(khz: u64) -> u32 {
    match khz {
        9_600_000 => 0,
        9_000_000 => 1,
        8_400_000 => 3,
        _ => 0,
    }
}

/// Pack synthesizer parameters into the two hardware config words.
/// Returns (cfg0, cfg1).
pub fn pack_clock_config(params: &ClockParams) -> (u32, u32) {
    let cfg0 = (params.dco_integer() as u32 & pll::CFG0_DCO_INTEGER_MASK)
        | ((params.dco_fraction() as u32 & pll::CFG0_DCO_FRACTION_MASK)
            << pll::CFG0_DCO_FRACTION_SHIFT);

    let (p, q, k) = params.dividers();
    let mut cfg1 = central_freq_code(params.central_khz())
        | (pdiv_code(p) << pll::CFG1_PDIV_SHIFT)
        | (kdiv_code(k) << pll::CFG1_KDIV_SHIFT)
        | ((q & pll::CFG1_QDIV_RATIO_MASK) << pll::CFG1_QDIV_RATIO_SHIFT);
    if q != 1 {
        cfg1 |= pll::CFG1_QDIV_MODE;
    }
    (cfg0, cfg1)
}

/// Unpack the DCO multiplier and divider chain from the two config words.
/// Returns (dco_integer, dco_fraction, p, q, k). Used by state read-back.
pub fn unpack_clock_config(cfg0: u32, cfg1: u32) -> (u16, u16, u32, u32, u32) {
    let dco_integer = (cfg0 & pll::CFG0_DCO_INTEGER_MASK) as u16;
    let dco_fraction =
        ((cfg0 >> pll::CFG0_DCO_FRACTION_SHIFT) & pll::CFG0_DCO_FRACTION_MASK) as u16;
    let p = pdiv_value((cfg1 >> pll::CFG1_PDIV_SHIFT) & pll::CFG1_PDIV_MASK);
    let k = kdiv_value((cfg1 >> pll::CFG1_KDIV_SHIFT) & pll::CFG1_KDIV_MASK);
    let q = if cfg1 & pll::CFG1_QDIV_MODE != 0 {
        (cfg1 >> pll::CFG1_QDIV_RATIO_SHIFT) & pll::CFG1_QDIV_RATIO_MASK
    } else {
        1
    };
    (dco_integer, dco_fraction, p, q, k)
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUX — Auxiliary Channel Engines (one instance per port)
// ═══════════════════════════════════════════════════════════════════════════════

/// Auxiliary channel register block
pub mod aux {
    pub const BASE: u32 = 0x9000;
    pub const STRIDE: u32 = 0x100;

    /// Control/status word
    pub const CTL_OFFSET: u32 = 0x00;
    /// Five 32-bit data words = the 20-byte frame buffer
    pub const DATA_OFFSET: u32 = 0x04;
    /// Number of data words per channel
    pub const DATA_WORDS: u32 = 5;

    // CTL packed fields (flag bits live in AuxCtl below)
    pub const CTL_TIMEOUT_SELECT_SHIFT: u32 = 26; // bits 27:26
    pub const CTL_TIMEOUT_SELECT_MASK: u32 = 0x3;
    pub const CTL_MESSAGE_SIZE_SHIFT: u32 = 20; // bits 24:20
    pub const CTL_MESSAGE_SIZE_MASK: u32 = 0x1F;
    pub const CTL_PRECHARGE_SHIFT: u32 = 16; // bits 19:16
    pub const CTL_PRECHARGE_MASK: u32 = 0xF;
    pub const CTL_CLOCK_DIVIDER_MASK: u32 = 0x7FF; // bits 10:0

    /// Longest timeout the hardware offers (code 3 = 1.6 ms per try)
    pub const TIMEOUT_1600US: u32 = 3;
    /// Precharge time in 2-symbol units
    pub const PRECHARGE_DEFAULT: u32 = 5;

    pub fn ctl(channel: u8) -> u32 {
        BASE + channel as u32 * STRIDE + CTL_OFFSET
    }

    pub fn data(channel: u8, word: u32) -> u32 {
        BASE + channel as u32 * STRIDE + DATA_OFFSET + word * 4
    }
}

bitflags! {
    /// AUX control word flag bits. The error and done bits are
    /// write-one-to-clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuxCtl: u32 {
        const SEND_BUSY     = 1 << 31;
        const DONE          = 1 << 30;
        const INTERRUPT_EN  = 1 << 29;
        const TIMEOUT_ERROR = 1 << 28;
        const RECEIVE_ERROR = 1 << 25;
    }
}

impl AuxCtl {
    /// All write-one-to-clear status bits.
    pub fn status_bits() -> Self {
        Self::DONE | Self::TIMEOUT_ERROR | Self::RECEIVE_ERROR
    }
}

/// Assemble the AUX control word for a submission: busy start bit, status
/// clears, message size, and the fixed timing-tuning fields.
pub fn aux_ctl_word(message_size: u32, clock_divider: u32) -> u32 {
    (AuxCtl::SEND_BUSY | AuxCtl::status_bits()).bits()
        | (aux::TIMEOUT_1600US << aux::CTL_TIMEOUT_SELECT_SHIFT)
        | ((message_size & aux::CTL_MESSAGE_SIZE_MASK) << aux::CTL_MESSAGE_SIZE_SHIFT)
        | (aux::PRECHARGE_DEFAULT << aux::CTL_PRECHARGE_SHIFT)
        | (clock_divider & aux::CTL_CLOCK_DIVIDER_MASK)
}

/// Received byte count from a completed transaction's status word.
pub fn aux_message_size(status: u32) -> u32 {
    (status >> aux::CTL_MESSAGE_SIZE_SHIFT) & aux::CTL_MESSAGE_SIZE_MASK
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUF — Output Buffers / Port Drivers
// ═══════════════════════════════════════════════════════════════════════════════

/// Output buffer control block, one instance per port
pub mod buf {
    pub const BASE: u32 = 0xA000;
    pub const STRIDE: u32 = 0x80;

    pub const CTL_OFFSET: u32 = 0x00;

    pub const CTL_ENABLE: u32 = 1 << 31;
    /// Buffer reports idle while its lanes are powered down
    pub const CTL_IDLE: u32 = 1 << 3;

    pub fn ctl(port: u8) -> u32 {
        BASE + port as u32 * STRIDE + CTL_OFFSET
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANS — Timing Generators (Transcoders)
// ═══════════════════════════════════════════════════════════════════════════════

/// Transcoder block, one instance per pipe
pub mod trans {
    pub const BASE: u32 = 0xB000;
    pub const STRIDE: u32 = 0x100;

    pub const CONF_OFFSET: u32 = 0x00;

    pub const CONF_ENABLE: u32 = 1 << 31;
    /// Live state bit, lags the enable by up to a frame
    pub const CONF_STATE: u32 = 1 << 30;

    pub fn conf(pipe: u8) -> u32 {
        BASE + pipe as u32 * STRIDE + CONF_OFFSET
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPE / PLANE — Pixel Pipes and Source Planes
// ═══════════════════════════════════════════════════════════════════════════════

/// Pixel pipe block
pub mod pipe {
    pub const BASE: u32 = 0xC000;
    pub const STRIDE: u32 = 0x100;

    pub const CONF_OFFSET: u32 = 0x00;

    pub const CONF_ENABLE: u32 = 1 << 31;

    pub fn conf(pipe: u8) -> u32 {
        BASE + pipe as u32 * STRIDE + CONF_OFFSET
    }
}

/// Plane block — each pipe owns a fixed window of plane instances
pub mod plane {
    pub const BASE: u32 = 0xD000;
    pub const PIPE_STRIDE: u32 = 0x400;
    pub const PLANE_STRIDE: u32 = 0x100;

    pub const CTL_OFFSET: u32 = 0x00;
    pub const STRIDE_OFFSET: u32 = 0x04;
    pub const POS_OFFSET: u32 = 0x08;
    pub const SIZE_OFFSET: u32 = 0x0C;
    pub const SURF_OFFSET: u32 = 0x10;

    pub const CTL_ENABLE: u32 = 1 << 31;
    pub const CTL_FORMAT_SHIFT: u32 = 24; // bits 27:24
    pub const CTL_FORMAT_MASK: u32 = 0xF;

    fn base(pipe: u8, plane: u8) -> u32 {
        BASE + pipe as u32 * PIPE_STRIDE + plane as u32 * PLANE_STRIDE
    }

    pub fn ctl(pipe: u8, plane: u8) -> u32 {
        base(pipe, plane) + CTL_OFFSET
    }

    pub fn stride(pipe: u8, plane: u8) -> u32 {
        base(pipe, plane) + STRIDE_OFFSET
    }

    pub fn pos(pipe: u8, plane: u8) -> u32 {
        base(pipe, plane) + POS_OFFSET
    }

    pub fn size(pipe: u8, plane: u8) -> u32 {
        base(pipe, plane) + SIZE_OFFSET
    }

    pub fn surf(pipe: u8, plane: u8) -> u32 {
        base(pipe, plane) + SURF_OFFSET
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PP — Panel Power Sequencer (embedded panels only)
// ═══════════════════════════════════════════════════════════════════════════════

pub mod panel {
    pub const CONTROL: u32 = 0xE000;
    pub const STATUS: u32 = 0xE004;

    /// Target power state requested by software
    pub const CONTROL_POWER_ON: u32 = 1 << 0;
    /// Actual panel power state, asserts after the panel's T1+T2 delay
    pub const STATUS_ON: u32 = 1 << 31;
}

// ═══════════════════════════════════════════════════════════════════════════════
// INT — Display Interrupt Status
// ═══════════════════════════════════════════════════════════════════════════════

pub mod intr {
    pub const BASE: u32 = 0xF000;
    pub const STRIDE: u32 = 0x10;

    pub const STATUS_OFFSET: u32 = 0x00;

    /// Vertical blank pending, write-one-to-clear
    pub const VBLANK_PENDING: u32 = 1 << 0;

    pub fn status(pipe: u8) -> u32 {
        BASE + pipe as u32 * STRIDE + STATUS_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_addressing() {
        assert_eq!(pll::cfg0(0), 0x6000);
        assert_eq!(pll::cfg1(2), 0x6044);
        assert_eq!(aux::ctl(1), 0x9100);
        assert_eq!(aux::data(0, 4), 0x9014);
        assert_eq!(buf::ctl(3), 0xA180);
        assert_eq!(intr::status(2), 0xF020);
    }

    #[test]
    fn test_divider_field_codes() {
        for p in [2u32, 3, 5, 7] {
            assert_eq!(pdiv_value(pdiv_code(p)), p);
        }
        for k in [1u32, 2, 3, 5] {
            assert_eq!(kdiv_value(kdiv_code(k)), k);
        }
        assert_eq!(central_freq_code(8_400_000), 3);
        assert_eq!(central_freq_code(9_000_000), 1);
        assert_eq!(central_freq_code(9_600_000), 0);
    }

    #[test]
    fn test_aux_ctl_word_layout() {
        let w = aux_ctl_word(20, 0x30);
        assert_ne!(w & AuxCtl::SEND_BUSY.bits(), 0);
        assert_ne!(w & AuxCtl::DONE.bits(), 0);
        assert_eq!(aux_message_size(w), 20);
        assert_eq!(w & aux::CTL_CLOCK_DIVIDER_MASK, 0x30);
        assert_eq!(
            (w >> aux::CTL_TIMEOUT_SELECT_SHIFT) & aux::CTL_TIMEOUT_SELECT_MASK,
            aux::TIMEOUT_1600US
        );
        assert_eq!(
            (w >> aux::CTL_PRECHARGE_SHIFT) & aux::CTL_PRECHARGE_MASK,
            aux::PRECHARGE_DEFAULT
        );
    }
}
