//! Pixel Clock Synthesizer — divider/multiplier parameter computation
//!
//! Pure numeric component: given a target pixel frequency, the reference
//! crystal, the hardware generation, and the signal type, produce the DCO
//! multiplier and divider chain the synthesizer needs, or a definite failure.
//! No hardware access; identical inputs always yield identical output.
//!
//! Three synthesizer designs shipped across the Larkspur generations:
//! - **LK-1** (`Gen1`): wide two-stage divider search against three fixed
//!   center frequencies with an asymmetric tolerance window.
//! - **LK-2** (`Gen2`): same search for TMDS signals; fixed per-link-rate
//!   parameter tables for DisplayPort.
//! - **LK-3** (`Gen3`): free-running DCO search over [7998, 10000] MHz for
//!   TMDS; four fixed DCO tuples for DisplayPort.
//!
//! All arithmetic is integer-only in kHz. The multiplier is fixed-point with
//! a 15-bit fraction, matching the hardware config word.

use crate::error::{DisplayError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Generations and Signal Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Display engine generation. Fixed per device, selects the synthesizer
/// design and the pipe count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// LK-1: wide two-stage divider search
    Gen1,
    /// LK-2: LK-1 search for TMDS, link-rate tables for DisplayPort
    Gen2,
    /// LK-3: DCO search, fourth pipe
    Gen3,
}

impl Generation {
    /// Number of pixel pipes this generation carries.
    pub fn pipe_count(&self) -> u8 {
        match self {
            Generation::Gen1 | Generation::Gen2 => 3,
            Generation::Gen3 => 4,
        }
    }
}

/// Signal type a port can carry or has negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Hdmi,
    Dvi,
    DisplayPort,
    /// Embedded DisplayPort (internal panel, panel-power sequenced)
    Edp,
}

impl SignalType {
    pub fn is_display_port(&self) -> bool {
        matches!(self, SignalType::DisplayPort | SignalType::Edp)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SignalType::Hdmi => "HDMI",
            SignalType::Dvi => "DVI",
            SignalType::DisplayPort => "DisplayPort",
            SignalType::Edp => "eDP",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type
// ═══════════════════════════════════════════════════════════════════════════════

/// LK-1 style search result: divider chain, chosen center, DCO multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WideSearchParams {
    pub p: u32,
    pub q: u32,
    pub k: u32,
    /// Center frequency the winning candidate was measured against
    pub central_khz: u64,
    /// Winning DCO frequency
    pub dco_khz: u64,
    pub dco_integer: u16,
    pub dco_fraction: u16,
}

/// LK-2 DisplayPort table row, resolved for the device's reference clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTableParams {
    /// Link rate this row serves, in kHz of symbol clock
    pub link_khz: u32,
    pub p: u32,
    pub q: u32,
    pub k: u32,
    pub dco_khz: u64,
    pub dco_integer: u16,
    pub dco_fraction: u16,
}

/// LK-3 DCO search result (or fixed DisplayPort tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcoSearchParams {
    pub p: u32,
    pub q: u32,
    pub k: u32,
    pub dco_khz: u64,
    pub dco_integer: u16,
    pub dco_fraction: u16,
}

/// Synthesizer output. Immutable once produced; the sequencer consumes it
/// by value exactly once when arming the clock registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockParams {
    WideSearch(WideSearchParams),
    LinkTable(LinkTableParams),
    DcoSearch(DcoSearchParams),
}

impl ClockParams {
    pub fn dividers(&self) -> (u32, u32, u32) {
        match self {
            ClockParams::WideSearch(p) => (p.p, p.q, p.k),
            ClockParams::LinkTable(p) => (p.p, p.q, p.k),
            ClockParams::DcoSearch(p) => (p.p, p.q, p.k),
        }
    }

    pub fn total_divider(&self) -> u32 {
        let (p, q, k) = self.dividers();
        p * q * k
    }

    pub fn dco_khz(&self) -> u64 {
        match self {
            ClockParams::WideSearch(p) => p.dco_khz,
            ClockParams::LinkTable(p) => p.dco_khz,
            ClockParams::DcoSearch(p) => p.dco_khz,
        }
    }

    pub fn dco_integer(&self) -> u16 {
        match self {
            ClockParams::WideSearch(p) => p.dco_integer,
            ClockParams::LinkTable(p) => p.dco_integer,
            ClockParams::DcoSearch(p) => p.dco_integer,
        }
    }

    pub fn dco_fraction(&self) -> u16 {
        match self {
            ClockParams::WideSearch(p) => p.dco_fraction,
            ClockParams::LinkTable(p) => p.dco_fraction,
            ClockParams::DcoSearch(p) => p.dco_fraction,
        }
    }

    /// Center frequency for the config word select field. Zero for the
    /// free-running designs (field code 0).
    pub fn central_khz(&self) -> u64 {
        match self {
            ClockParams::WideSearch(p) => p.central_khz,
            _ => 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entry Point
// ═══════════════════════════════════════════════════════════════════════════════

/// Compute synthesizer parameters for a pixel (or DisplayPort symbol) clock.
///
/// For DisplayPort signals on Gen2/Gen3, `target_khz` is the standard link
/// symbol rate (162000/216000/270000/324000/432000/540000/810000).
pub fn compute_clock(
    target_khz: u32,
    reference_khz: u32,
    generation: Generation,
    signal: SignalType,
) -> Result<ClockParams> {
    if target_khz == 0 || reference_khz == 0 {
        return Err(DisplayError::InvalidConfiguration);
    }

    match generation {
        Generation::Gen1 => wide_search(target_khz, reference_khz).map(ClockParams::WideSearch),
        Generation::Gen2 => {
            if signal.is_display_port() {
                link_table_lookup(target_khz, reference_khz).map(ClockParams::LinkTable)
            } else {
                wide_search(target_khz, reference_khz).map(ClockParams::WideSearch)
            }
        }
        Generation::Gen3 => {
            if signal.is_display_port() {
                dco_link_tuple(target_khz, reference_khz).map(ClockParams::DcoSearch)
            } else {
                dco_search(target_khz, reference_khz).map(ClockParams::DcoSearch)
            }
        }
    }
}

/// Fixed-point DCO multiplier: integer plus 15-bit rounded fraction of the
/// reference clock.
fn dco_multiplier(dco_khz: u64, reference_khz: u64) -> (u16, u16) {
    let mut integer = dco_khz / reference_khz;
    let remainder = dco_khz % reference_khz;
    let mut fraction = (remainder * 32768 + reference_khz / 2) / reference_khz;
    if fraction == 32768 {
        integer += 1;
        fraction = 0;
    }
    (integer as u16, fraction as u16)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LK-1 Wide Two-Stage Search
// ═══════════════════════════════════════════════════════════════════════════════

/// Candidate DCO center frequencies, kHz.
const CENTER_FREQUENCIES_KHZ: [u64; 3] = [8_400_000, 9_000_000, 9_600_000];

/// Deviation tolerance in basis points: tight above center, loose below.
const MAX_POS_DEVIATION_BP: u64 = 100;
const MAX_NEG_DEVIATION_BP: u64 = 600;

/// Total dividers the two-stage chain can realize. Even candidates are
/// preferred by scan order; odd candidates extend coverage at the low end.
const WIDE_EVEN_DIVIDERS: [u64; 36] = [
    4, 6, 8, 10, 12, 14, 16, 18, 20, 24, 28, 30, 32, 36, 40, 42, 44, 48, 52, 54, 56, 60, 64, 66,
    68, 70, 72, 76, 78, 80, 84, 88, 90, 92, 96, 98,
];
const WIDE_ODD_DIVIDERS: [u64; 7] = [3, 5, 7, 9, 15, 21, 35];

fn wide_search(target_khz: u32, reference_khz: u32) -> Result<WideSearchParams> {
    // The analog front end runs at five times the pixel rate.
    let afe_khz = 5 * target_khz as u64;

    // (deviation, center, divider, dco)
    let mut best: Option<(u64, u64, u64, u64)> = None;

    'centers: for &central in CENTER_FREQUENCIES_KHZ.iter() {
        for &divider in WIDE_EVEN_DIVIDERS.iter().chain(WIDE_ODD_DIVIDERS.iter()) {
            let dco = divider * afe_khz;
            let (delta, limit) = if dco >= central {
                (dco - central, MAX_POS_DEVIATION_BP)
            } else {
                (central - dco, MAX_NEG_DEVIATION_BP)
            };
            let deviation_bp = delta * 10_000 / central;
            if deviation_bp > limit {
                continue;
            }
            if best.map_or(true, |(d, _, _, _)| deviation_bp < d) {
                best = Some((deviation_bp, central, divider, dco));
            }
            if deviation_bp == 0 {
                break 'centers;
            }
        }
    }

    let (deviation, central_khz, divider, dco_khz) = best.ok_or(DisplayError::NoSolutionFound)?;
    let (p, q, k) = split_wide_divider(divider).ok_or(DisplayError::NoSolutionFound)?;
    let (dco_integer, dco_fraction) = dco_multiplier(dco_khz, reference_khz as u64);

    log::debug!(
        "[CLOCK] wide search: target={} kHz dco={} kHz center={} dev={}bp div={}={}x{}x{}",
        target_khz, dco_khz, central_khz, deviation, divider, p, q, k
    );

    Ok(WideSearchParams {
        p,
        q,
        k,
        central_khz,
        dco_khz,
        dco_integer,
        dco_fraction,
    })
}

/// Split a winning total divider into the (P, Q, K) chain stages.
/// Every divider in the scan lists decomposes; anything else is refused.
fn split_wide_divider(divider: u64) -> Option<(u32, u32, u32)> {
    if divider % 2 == 0 {
        let half = divider / 2;
        let (p, q, k) = match half {
            1 | 2 | 3 | 5 => (2, 1, half as u32),
            _ if half % 2 == 0 => (2, (half / 2) as u32, 2),
            _ if half % 3 == 0 => (3, (half / 3) as u32, 2),
            _ if half % 7 == 0 => (7, (half / 7) as u32, 2),
            _ => return None,
        };
        Some((p, q, k))
    } else {
        match divider {
            3 | 9 => Some((3, 1, (divider / 3) as u32)),
            5 | 7 => Some((divider as u32, 1, 1)),
            15 => Some((3, 1, 5)),
            21 => Some((7, 1, 3)),
            35 => Some((7, 1, 5)),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LK-2 DisplayPort Link Tables
// ═══════════════════════════════════════════════════════════════════════════════

/// One DisplayPort table row, pre-resolved for a specific reference clock.
struct LinkRow {
    link_khz: u32,
    p: u32,
    q: u32,
    k: u32,
    dco_khz: u64,
    dco_integer: u16,
    dco_fraction: u16,
}

const LINK_ROW_FALLBACK: usize = 2; // the 2.7 Gbps row

/// Row set for a 24 MHz reference crystal.
const LINK_ROWS_24MHZ: [LinkRow; 7] = [
    LinkRow { link_khz: 162_000, p: 5, q: 1, k: 2, dco_khz: 8_100_000, dco_integer: 337, dco_fraction: 16384 },
    LinkRow { link_khz: 216_000, p: 2, q: 2, k: 2, dco_khz: 8_640_000, dco_integer: 360, dco_fraction: 0 },
    LinkRow { link_khz: 270_000, p: 3, q: 1, k: 2, dco_khz: 8_100_000, dco_integer: 337, dco_fraction: 16384 },
    LinkRow { link_khz: 324_000, p: 5, q: 1, k: 1, dco_khz: 8_100_000, dco_integer: 337, dco_fraction: 16384 },
    LinkRow { link_khz: 432_000, p: 2, q: 1, k: 2, dco_khz: 8_640_000, dco_integer: 360, dco_fraction: 0 },
    LinkRow { link_khz: 540_000, p: 3, q: 1, k: 1, dco_khz: 8_100_000, dco_integer: 337, dco_fraction: 16384 },
    LinkRow { link_khz: 810_000, p: 2, q: 1, k: 1, dco_khz: 8_100_000, dco_integer: 337, dco_fraction: 16384 },
];

/// Row set for a 19.2 MHz reference crystal.
const LINK_ROWS_19P2MHZ: [LinkRow; 7] = [
    LinkRow { link_khz: 162_000, p: 5, q: 1, k: 2, dco_khz: 8_100_000, dco_integer: 421, dco_fraction: 28672 },
    LinkRow { link_khz: 216_000, p: 2, q: 2, k: 2, dco_khz: 8_640_000, dco_integer: 450, dco_fraction: 0 },
    LinkRow { link_khz: 270_000, p: 3, q: 1, k: 2, dco_khz: 8_100_000, dco_integer: 421, dco_fraction: 28672 },
    LinkRow { link_khz: 324_000, p: 5, q: 1, k: 1, dco_khz: 8_100_000, dco_integer: 421, dco_fraction: 28672 },
    LinkRow { link_khz: 432_000, p: 2, q: 1, k: 2, dco_khz: 8_640_000, dco_integer: 450, dco_fraction: 0 },
    LinkRow { link_khz: 540_000, p: 3, q: 1, k: 1, dco_khz: 8_100_000, dco_integer: 421, dco_fraction: 28672 },
    LinkRow { link_khz: 810_000, p: 2, q: 1, k: 1, dco_khz: 8_100_000, dco_integer: 421, dco_fraction: 28672 },
];

fn link_table_lookup(target_khz: u32, reference_khz: u32) -> Result<LinkTableParams> {
    // 38.4 MHz parts run the synthesizer off the halved reference.
    let rows: &[LinkRow; 7] = match reference_khz {
        24_000 => &LINK_ROWS_24MHZ,
        19_200 | 38_400 => &LINK_ROWS_19P2MHZ,
        _ => return Err(DisplayError::InvalidConfiguration),
    };

    let row = rows
        .iter()
        .find(|r| r.link_khz == target_khz)
        .unwrap_or_else(|| {
            log::warn!("[CLOCK] unknown link rate {} kHz, using 2.7 Gbps row", target_khz);
            &rows[LINK_ROW_FALLBACK]
        });

    Ok(LinkTableParams {
        link_khz: row.link_khz,
        p: row.p,
        q: row.q,
        k: row.k,
        dco_khz: row.dco_khz,
        dco_integer: row.dco_integer,
        dco_fraction: row.dco_fraction,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// LK-3 DCO Search
// ═══════════════════════════════════════════════════════════════════════════════

const DCO_MIN_KHZ: u64 = 7_998_000;
const DCO_MAX_KHZ: u64 = 10_000_000;
const DCO_MID_KHZ: u64 = 8_999_000;

/// Divider candidates for the LK-3 chain, even values first.
const DCO_DIVIDERS: [u64; 46] = [
    2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 24, 28, 30, 32, 36, 40, 42, 44, 48, 50, 52, 54, 56, 60,
    64, 66, 68, 70, 72, 76, 78, 80, 84, 88, 90, 92, 96, 98, 100, 102, 3, 5, 7, 9, 15, 21,
];

fn dco_search(target_khz: u32, reference_khz: u32) -> Result<DcoSearchParams> {
    let afe_khz = 5 * target_khz as u64;

    // (distance from midpoint, divider, dco)
    let mut best: Option<(u64, u64, u64)> = None;
    for &divider in DCO_DIVIDERS.iter() {
        let dco = divider * afe_khz;
        if dco < DCO_MIN_KHZ || dco > DCO_MAX_KHZ {
            continue;
        }
        let distance = if dco >= DCO_MID_KHZ { dco - DCO_MID_KHZ } else { DCO_MID_KHZ - dco };
        if best.map_or(true, |(d, _, _)| distance < d) {
            best = Some((distance, divider, dco));
        }
    }

    let (_, divider, dco_khz) = best.ok_or(DisplayError::NoSolutionFound)?;
    let (p, q, k) = split_dco_divider(divider).ok_or(DisplayError::NoSolutionFound)?;
    let (dco_integer, dco_fraction) = dco_multiplier(dco_khz, reference_khz as u64);

    log::debug!(
        "[CLOCK] dco search: target={} kHz dco={} kHz div={}={}x{}x{}",
        target_khz, dco_khz, divider, p, q, k
    );

    Ok(DcoSearchParams { p, q, k, dco_khz, dco_integer, dco_fraction })
}

/// Split an LK-3 total divider into (P, Q, K). Rule order matters: the
/// first matching form wins.
fn split_dco_divider(divider: u64) -> Option<(u32, u32, u32)> {
    if divider % 2 == 0 {
        if divider == 2 {
            Some((2, 1, 1))
        } else if divider % 4 == 0 {
            Some((2, (divider / 4) as u32, 2))
        } else if divider % 6 == 0 {
            Some((3, (divider / 6) as u32, 2))
        } else if divider % 5 == 0 {
            Some((5, (divider / 10) as u32, 2))
        } else if divider % 14 == 0 {
            Some((7, (divider / 14) as u32, 2))
        } else {
            None
        }
    } else {
        match divider {
            3 | 5 | 7 => Some((divider as u32, 1, 1)),
            9 | 15 | 21 => Some(((divider / 3) as u32, 1, 3)),
            _ => None,
        }
    }
}

/// Fixed LK-3 DisplayPort tuples, keyed by link rate.
const DCO_LINK_TUPLES: [(u32, u32, u32, u32, u64); 4] = [
    // (link_khz, p, q, k, dco_khz)
    (162_000, 5, 1, 2, 8_100_000),
    (270_000, 3, 1, 2, 8_100_000),
    (540_000, 3, 1, 1, 8_100_000),
    (810_000, 2, 1, 1, 8_100_000),
];

const DCO_TUPLE_FALLBACK: usize = 1; // the 2.7 Gbps tuple

fn dco_link_tuple(target_khz: u32, reference_khz: u32) -> Result<DcoSearchParams> {
    let &(_, p, q, k, dco_khz) = DCO_LINK_TUPLES
        .iter()
        .find(|t| t.0 == target_khz)
        .unwrap_or_else(|| {
            log::warn!("[CLOCK] unknown link rate {} kHz, using 2.7 Gbps tuple", target_khz);
            &DCO_LINK_TUPLES[DCO_TUPLE_FALLBACK]
        });

    let (dco_integer, dco_fraction) = dco_multiplier(dco_khz, reference_khz as u64);
    Ok(DcoSearchParams { p, q, k, dco_khz, dco_integer, dco_fraction })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
