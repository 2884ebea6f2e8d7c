//! Larkspur GPU display engine core
//!
//! The clock-generation and output-topology heart of the Larkspur display
//! driver: pixel-clock synthesizer parameter search, scarce pipe allocation
//! across output ports, the ordered enable/disable walk over the signal
//! chain, and the auxiliary channel protocol used to negotiate with sinks.
//!
//! Architecture:
//! ```text
//! host driver ──► Device (coarse lock over all shared state)
//!                   ├── clock      pure divider/multiplier search
//!                   ├── topology   ports / pipes / planes + allocator
//!                   ├── sequencer  ClockSource→…→Plane ordered walk
//!                   ├── aux        native + tunneled sink transactions
//!                   └── vblank     irq-side ack + counting semaphore
//! ```
//!
//! Everything hardware-facing goes through the host-supplied [`HostOps`]
//! collaborator; the core itself maps no MMIO and registers no interrupts.
//! Bus enumeration, framebuffer memory, and the window-system command
//! surface live in the host driver, not here.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod aux;
pub mod clock;
pub mod error;
pub mod hw;
pub mod regs;
pub mod sequencer;
pub mod topology;
pub mod vblank;

pub use aux::{AuxOp, AuxRequest};
pub use clock::{compute_clock, ClockParams, Generation, SignalType};
pub use error::{DisplayError, Result};
pub use hw::HostOps;
pub use sequencer::{Stage, StageEvent};
pub use topology::{Assignment, PipeId, PortCaps, PortConfig, PortId};

use spin::Mutex;

use topology::DeviceState;
use vblank::VblankState;

/// One display engine instance.
///
/// Owns the single coarse lock guarding the binding table, clock registers,
/// and AUX channels — several accelerant clones may drive the same hardware
/// concurrently, and a mode-set or AUX transaction holds the lock for its
/// whole duration. The vblank counters sit outside the lock; the interrupt
/// path never contends with a mode-set.
pub struct Device<H: HostOps> {
    pub(crate) host: H,
    pub(crate) generation: Generation,
    pub(crate) reference_khz: u32,
    /// AUX bit-clock divider, reference in half-MHz units
    pub(crate) aux_clock_div: u32,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) vblank: VblankState,
}

impl<H: HostOps> Device<H> {
    /// Build a device context for a generation's fixed pipe complement and
    /// the connectors the board wires up.
    pub fn new(
        host: H,
        generation: Generation,
        reference_khz: u32,
        ports: &[PortConfig],
    ) -> Result<Self> {
        if reference_khz == 0 || ports.is_empty() {
            return Err(DisplayError::InvalidConfiguration);
        }
        log::info!(
            "[DISPLAY] {:?}: {} pipes, {} ports, {} kHz reference",
            generation,
            generation.pipe_count(),
            ports.len(),
            reference_khz
        );
        Ok(Self {
            host,
            generation,
            reference_khz,
            aux_clock_div: reference_khz / 500,
            state: Mutex::new(DeviceState::new(generation.pipe_count(), ports)),
            vblank: VblankState::new(),
        })
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn reference_khz(&self) -> u32 {
        self.reference_khz
    }

    /// Synthesizer search against this device's reference clock and
    /// generation. Pure; takes no lock.
    pub fn compute_clock(&self, target_khz: u32, signal: SignalType) -> Result<ClockParams> {
        clock::compute_clock(target_khz, self.reference_khz, self.generation, signal)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Test Support — scripted register file standing in for the hardware
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod testutil {
    use alloc::collections::{BTreeMap, VecDeque};
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};

    use crate::clock::Generation;
    use crate::hw::HostOps;
    use crate::regs::{self, AuxCtl};
    use crate::topology::{PipeId, PortCaps, PortConfig, PortId, SinkCache, SINK_IDENT_LEN};
    use crate::Device;

    /// One scripted AUX completion: extra status flags plus reply bytes.
    pub struct AuxScript {
        flags: u32,
        reply: Vec<u8>,
    }

    impl AuxScript {
        pub fn reply(bytes: &[u8]) -> Self {
            Self { flags: 0, reply: bytes.to_vec() }
        }

        pub fn fault(flags: AuxCtl) -> Self {
            Self { flags: flags.bits(), reply: Vec::new() }
        }
    }

    /// Scripted register file with a tiny behavioral model of the display
    /// blocks the core polls: PLL lock follows the enable bit, panel power
    /// follows its control bit, and the AUX engine completes submissions
    /// from a per-channel reply script (or stays busy when the script runs
    /// dry). Time is virtual and advanced by `sleep_us`.
    pub struct MockHost {
        regs: RefCell<BTreeMap<u32, u32>>,
        reads: RefCell<BTreeMap<u32, u32>>,
        writes: RefCell<Vec<(u32, u32)>>,
        clock_us: Cell<u64>,
        prefs: RefCell<BTreeMap<PortId, PipeId>>,
        aux_scripts: RefCell<BTreeMap<u8, VecDeque<AuxScript>>>,
        aux_frames: RefCell<BTreeMap<u8, Vec<Vec<u8>>>>,
        aux_submissions: RefCell<BTreeMap<u8, u32>>,
        pll_lock_fails: Cell<bool>,
        panel_power_fails: Cell<bool>,
    }

    impl MockHost {
        pub fn new() -> Self {
            Self {
                regs: RefCell::new(BTreeMap::new()),
                reads: RefCell::new(BTreeMap::new()),
                writes: RefCell::new(Vec::new()),
                clock_us: Cell::new(1_000),
                prefs: RefCell::new(BTreeMap::new()),
                aux_scripts: RefCell::new(BTreeMap::new()),
                aux_frames: RefCell::new(BTreeMap::new()),
                aux_submissions: RefCell::new(BTreeMap::new()),
                pll_lock_fails: Cell::new(false),
                panel_power_fails: Cell::new(false),
            }
        }

        /// Peek a register without counting the access.
        pub fn register(&self, addr: u32) -> u32 {
            self.regs.borrow().get(&addr).copied().unwrap_or(0)
        }

        pub fn reads_of(&self, addr: u32) -> u32 {
            self.reads.borrow().get(&addr).copied().unwrap_or(0)
        }

        pub fn writes_to(&self, addr: u32) -> Vec<u32> {
            self.writes
                .borrow()
                .iter()
                .filter(|(a, _)| *a == addr)
                .map(|(_, v)| *v)
                .collect()
        }

        pub fn set_pipe_preference(&self, port: PortId, pipe: PipeId) {
            self.prefs.borrow_mut().insert(port, pipe);
        }

        pub fn push_aux_reply(&self, channel: u8, script: AuxScript) {
            self.aux_scripts.borrow_mut().entry(channel).or_default().push_back(script);
        }

        /// Leave the channel's busy bit stuck high before any submission.
        pub fn set_aux_busy(&self, channel: u8) {
            self.regs
                .borrow_mut()
                .insert(regs::aux::ctl(channel), AuxCtl::SEND_BUSY.bits());
        }

        pub fn aux_submissions(&self, channel: u8) -> u32 {
            self.aux_submissions.borrow().get(&channel).copied().unwrap_or(0)
        }

        /// Frames submitted on a channel, as raw bytes.
        pub fn aux_frames(&self, channel: u8) -> Vec<Vec<u8>> {
            self.aux_frames.borrow().get(&channel).cloned().unwrap_or_default()
        }

        pub fn fail_pll_lock(&self, fail: bool) {
            self.pll_lock_fails.set(fail);
        }

        pub fn fail_panel_power(&self, fail: bool) {
            self.panel_power_fails.set(fail);
        }

        fn aux_channel_of(addr: u32) -> Option<u8> {
            let span = regs::aux::STRIDE * 8;
            if addr >= regs::aux::BASE && addr < regs::aux::BASE + span {
                let rel = addr - regs::aux::BASE;
                if rel % regs::aux::STRIDE == regs::aux::CTL_OFFSET {
                    return Some((rel / regs::aux::STRIDE) as u8);
                }
            }
            None
        }

        fn pll_enable_of(addr: u32) -> bool {
            let span = regs::pll::STRIDE * crate::vblank::MAX_PIPES as u32;
            addr >= regs::pll::BASE
                && addr < regs::pll::BASE + span
                && (addr - regs::pll::BASE) % regs::pll::STRIDE == regs::pll::ENABLE_OFFSET
        }

        fn complete_aux(&self, channel: u8, kick: u32) {
            // Capture the submitted frame from the freshly written data
            // registers.
            let size = ((kick >> regs::aux::CTL_MESSAGE_SIZE_SHIFT)
                & regs::aux::CTL_MESSAGE_SIZE_MASK) as usize;
            let mut frame = Vec::with_capacity(size);
            for i in 0..size.min(crate::aux::AUX_FRAME_LEN) {
                let word = self.register(regs::aux::data(channel, (i / 4) as u32));
                frame.push((word >> (8 * (3 - (i % 4)))) as u8);
            }
            self.aux_frames.borrow_mut().entry(channel).or_default().push(frame);
            *self.aux_submissions.borrow_mut().entry(channel).or_default() += 1;

            let script = self.aux_scripts.borrow_mut().entry(channel).or_default().pop_front();
            let Some(script) = script else {
                // Nothing answers: the transaction hangs busy.
                self.regs.borrow_mut().insert(regs::aux::ctl(channel), kick);
                return;
            };

            // Write the reply into the data registers and complete.
            for (i, chunk) in script.reply.chunks(4).enumerate() {
                let mut word = 0u32;
                for (lane, &b) in chunk.iter().enumerate() {
                    word |= (b as u32) << (8 * (3 - lane));
                }
                self.regs.borrow_mut().insert(regs::aux::data(channel, i as u32), word);
            }
            let status = (kick
                & !(AuxCtl::SEND_BUSY | AuxCtl::status_bits()).bits()
                & !(regs::aux::CTL_MESSAGE_SIZE_MASK << regs::aux::CTL_MESSAGE_SIZE_SHIFT))
                | AuxCtl::DONE.bits()
                | script.flags
                | ((script.reply.len() as u32) << regs::aux::CTL_MESSAGE_SIZE_SHIFT);
            self.regs.borrow_mut().insert(regs::aux::ctl(channel), status);
        }
    }

    impl HostOps for MockHost {
        fn read_register(&self, addr: u32) -> u32 {
            *self.reads.borrow_mut().entry(addr).or_default() += 1;
            self.register(addr)
        }

        fn write_register(&self, addr: u32, value: u32) {
            self.writes.borrow_mut().push((addr, value));

            if Self::pll_enable_of(addr) {
                let mut v = value;
                if value & regs::pll::ENABLE != 0 && !self.pll_lock_fails.get() {
                    v |= regs::pll::LOCKED;
                } else {
                    v &= !regs::pll::LOCKED;
                }
                self.regs.borrow_mut().insert(addr, v);
                return;
            }

            if addr == regs::panel::CONTROL {
                self.regs.borrow_mut().insert(addr, value);
                if !self.panel_power_fails.get() {
                    let status = if value & regs::panel::CONTROL_POWER_ON != 0 {
                        regs::panel::STATUS_ON
                    } else {
                        0
                    };
                    self.regs.borrow_mut().insert(regs::panel::STATUS, status);
                }
                return;
            }

            if let Some(channel) = Self::aux_channel_of(addr) {
                if value & AuxCtl::SEND_BUSY.bits() != 0 {
                    self.complete_aux(channel, value);
                } else {
                    // Write-one-to-clear status acknowledge.
                    let cur = self.register(addr);
                    self.regs
                        .borrow_mut()
                        .insert(addr, cur & !(value & AuxCtl::status_bits().bits()));
                }
                return;
            }

            self.regs.borrow_mut().insert(addr, value);
        }

        fn pipe_preference(&self, port: PortId) -> Option<PipeId> {
            self.prefs.borrow().get(&port).copied()
        }

        fn sleep_us(&self, us: u64) {
            self.clock_us.set(self.clock_us.get() + us);
        }

        fn ticks_us(&self) -> u64 {
            self.clock_us.get()
        }
    }

    /// Device over a fresh mock with `n_ports` identical connectors
    /// (HDMI/DVI/DisplayPort capable, AUX channel = port index).
    pub fn test_device(generation: Generation, n_ports: u8) -> Device<MockHost> {
        let ports: Vec<PortConfig> = (0..n_ports)
            .map(|i| PortConfig {
                caps: PortCaps::HDMI | PortCaps::DVI | PortCaps::DISPLAY_PORT,
                aux_channel: i,
            })
            .collect();
        Device::new(MockHost::new(), generation, 24_000, &ports).unwrap()
    }

    /// Mark a port's sink as present without running a probe.
    pub fn connect_sink(dev: &Device<MockHost>, port: PortId) {
        dev.state.lock().port_mut(port).unwrap().sink =
            SinkCache::Present([0u8; SINK_IDENT_LEN]);
    }
}
