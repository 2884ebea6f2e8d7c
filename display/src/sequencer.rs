//! Enable/disable sequencing across the signal chain
//!
//! Bringing a port up walks five hardware stages in a fixed order:
//!
//! ```text
//! ClockSource → OutputBuffer → TimingGenerator → Pipe → Plane
//! ```
//!
//! Tearing down walks the exact reverse. The ordering is a hard correctness
//! requirement — enabling a later stage against a dead earlier stage leaves
//! the chain in an undefined state (visible corruption, or a clock domain
//! that cannot be shut down later) — so the sequencer owns the walk and
//! callers cannot reorder it.
//!
//! Readiness at each stage is awaited by polling: PLL lock within 5 ms,
//! panel power (embedded panels) within 300 ms. A timeout is fatal to this
//! port's attempt and surfaces without internal retry; the caller may retry
//! the whole mode-set.

use crate::clock::{ClockParams, SignalType};
use crate::error::{DisplayError, Result};
use crate::hw::{wait_for, HostOps};
use crate::regs;
use crate::topology::{PipeId, PortId};
use crate::Device;

// ═══════════════════════════════════════════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════════════════════════════════════════

/// One link of the signal chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ClockSource,
    OutputBuffer,
    TimingGenerator,
    Pipe,
    Plane,
}

/// Enable walk order; disable is the exact reverse.
pub const ENABLE_ORDER: [Stage; 5] = [
    Stage::ClockSource,
    Stage::OutputBuffer,
    Stage::TimingGenerator,
    Stage::Pipe,
    Stage::Plane,
];

/// One recorded stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEvent {
    pub port: PortId,
    pub stage: Stage,
    pub enabled: bool,
}

/// PLL lock budget.
const PLL_LOCK_BUDGET_US: u64 = 5_000;
/// Panel power rail budget (T1+T2 of slow embedded panels).
const PANEL_POWER_BUDGET_US: u64 = 300_000;

// ═══════════════════════════════════════════════════════════════════════════════
// Sequencer
// ═══════════════════════════════════════════════════════════════════════════════

impl<H: HostOps> Device<H> {
    /// Bring the full signal chain up for a bound port. Consumes the
    /// synthesizer output; re-tuning requires computing a fresh one.
    pub fn enable(&self, port: PortId, params: ClockParams) -> Result<()> {
        let mut state = self.state.lock();
        let pipe = state.port(port)?.bound_pipe.ok_or(DisplayError::NotBound)?;
        if state.pipe(pipe)?.enabled {
            return Err(DisplayError::InvalidConfiguration);
        }
        let embedded_panel =
            matches!(state.port(port)?.negotiated, Some(SignalType::Edp));

        log::info!("[SEQ] enabling {} on {}", port, pipe);
        for stage in ENABLE_ORDER {
            match stage {
                Stage::ClockSource => self.enable_clock_source(pipe, &params)?,
                Stage::OutputBuffer => self.enable_output_buffer(port),
                Stage::TimingGenerator => {
                    self.enable_timing_generator(pipe, embedded_panel)?
                }
                Stage::Pipe => {
                    self.host
                        .write_register(regs::pipe::conf(pipe.0), regs::pipe::CONF_ENABLE);
                    state.pipe_mut(pipe)?.enabled = true;
                }
                Stage::Plane => {
                    let planes = &mut state.pipe_mut(pipe)?.planes;
                    for plane in planes.iter_mut() {
                        let ctl = regs::plane::CTL_ENABLE
                            | (plane.format.ctl_code() << regs::plane::CTL_FORMAT_SHIFT);
                        self.host
                            .write_register(regs::plane::stride(pipe.0, plane.index), plane.stride);
                        self.host.write_register(
                            regs::plane::pos(pipe.0, plane.index),
                            (plane.position.1 << 16) | plane.position.0,
                        );
                        self.host.write_register(
                            regs::plane::size(pipe.0, plane.index),
                            (plane.size.1 << 16) | plane.size.0,
                        );
                        self.host
                            .write_register(regs::plane::surf(pipe.0, plane.index), plane.surface);
                        self.host.write_register(regs::plane::ctl(pipe.0, plane.index), ctl);
                        plane.enabled = true;
                    }
                }
            }
            state.stage_trace.push(StageEvent { port, stage, enabled: true });
        }
        Ok(())
    }

    /// Tear the signal chain down, Plane back to ClockSource.
    pub fn disable(&self, port: PortId) -> Result<()> {
        let mut state = self.state.lock();
        let pipe = state.port(port)?.bound_pipe.ok_or(DisplayError::NotBound)?;
        if !state.pipe(pipe)?.enabled {
            return Err(DisplayError::InvalidConfiguration);
        }
        let embedded_panel =
            matches!(state.port(port)?.negotiated, Some(SignalType::Edp));

        log::info!("[SEQ] disabling {} on {}", port, pipe);
        for stage in ENABLE_ORDER.iter().rev() {
            match stage {
                Stage::Plane => {
                    let planes = &mut state.pipe_mut(pipe)?.planes;
                    for plane in planes.iter_mut() {
                        self.host.write_register(regs::plane::ctl(pipe.0, plane.index), 0);
                        plane.enabled = false;
                    }
                }
                Stage::Pipe => {
                    self.host.write_register(regs::pipe::conf(pipe.0), 0);
                    state.pipe_mut(pipe)?.enabled = false;
                }
                Stage::TimingGenerator => {
                    self.disable_timing_generator(pipe, embedded_panel)?
                }
                Stage::OutputBuffer => {
                    self.host.write_register(regs::buf::ctl(port.0), 0);
                }
                Stage::ClockSource => {
                    self.host.write_register(regs::pll::enable(pipe.0), 0);
                }
            }
            state.stage_trace.push(StageEvent { port, stage: *stage, enabled: false });
        }
        Ok(())
    }

    /// Drain the recorded stage-transition trace.
    pub fn take_stage_trace(&self) -> alloc::vec::Vec<StageEvent> {
        core::mem::take(&mut self.state.lock().stage_trace)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stage bodies
    // ═══════════════════════════════════════════════════════════════════════

    /// Arm the synthesizer config words and spin up the PLL.
    fn enable_clock_source(&self, pipe: PipeId, params: &ClockParams) -> Result<()> {
        let (cfg0, cfg1) = regs::pack_clock_config(params);
        self.host.write_register(regs::pll::cfg0(pipe.0), cfg0);
        self.host.write_register(regs::pll::cfg1(pipe.0), cfg1);
        self.host.write_register(regs::pll::enable(pipe.0), regs::pll::ENABLE);

        let locked = wait_for(&self.host, PLL_LOCK_BUDGET_US, || {
            self.host.read_register(regs::pll::enable(pipe.0)) & regs::pll::LOCKED != 0
        });
        if !locked {
            log::error!("[SEQ] PLL {} failed to lock", pipe.0);
            return Err(DisplayError::HardwareTimeout);
        }
        log::debug!("[SEQ] PLL {} locked at {} kHz DCO", pipe.0, params.dco_khz());
        Ok(())
    }

    fn enable_output_buffer(&self, port: PortId) {
        self.host.write_register(regs::buf::ctl(port.0), regs::buf::CTL_ENABLE);
        // Post the write; lane power-up needs no further handshake.
        let _ = self.host.read_register(regs::buf::ctl(port.0));
    }

    /// Enable the transcoder. Embedded panels get their power rail brought
    /// up first and that rail is slow.
    fn enable_timing_generator(&self, pipe: PipeId, embedded_panel: bool) -> Result<()> {
        if embedded_panel {
            self.host
                .write_register(regs::panel::CONTROL, regs::panel::CONTROL_POWER_ON);
            let powered = wait_for(&self.host, PANEL_POWER_BUDGET_US, || {
                self.host.read_register(regs::panel::STATUS) & regs::panel::STATUS_ON != 0
            });
            if !powered {
                log::error!("[SEQ] panel power did not come up");
                return Err(DisplayError::HardwareTimeout);
            }
        }
        self.host
            .write_register(regs::trans::conf(pipe.0), regs::trans::CONF_ENABLE);
        Ok(())
    }

    fn disable_timing_generator(&self, pipe: PipeId, embedded_panel: bool) -> Result<()> {
        self.host.write_register(regs::trans::conf(pipe.0), 0);
        if embedded_panel {
            self.host.write_register(regs::panel::CONTROL, 0);
            let off = wait_for(&self.host, PANEL_POWER_BUDGET_US, || {
                self.host.read_register(regs::panel::STATUS) & regs::panel::STATUS_ON == 0
            });
            if !off {
                log::error!("[SEQ] panel power stuck on");
                return Err(DisplayError::HardwareTimeout);
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Generation;
    use crate::testutil::test_device;
    use crate::topology::{Plane, PlaneFormat};

    fn params_for(dev: &crate::Device<crate::testutil::MockHost>) -> ClockParams {
        dev.compute_clock(148_500, SignalType::Hdmi).unwrap()
    }

    #[test]
    fn test_enable_trace_is_exact_stage_order() {
        let dev = test_device(Generation::Gen1, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        dev.enable(PortId(0), params_for(&dev)).unwrap();

        let trace = dev.take_stage_trace();
        let stages: alloc::vec::Vec<Stage> = trace.iter().map(|e| e.stage).collect();
        assert_eq!(stages, ENABLE_ORDER);
        assert!(trace.iter().all(|e| e.enabled && e.port == PortId(0)));
    }

    #[test]
    fn test_disable_trace_is_exact_reverse() {
        let dev = test_device(Generation::Gen1, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        dev.enable(PortId(0), params_for(&dev)).unwrap();
        dev.take_stage_trace();

        dev.disable(PortId(0)).unwrap();
        let trace = dev.take_stage_trace();
        let stages: alloc::vec::Vec<Stage> = trace.iter().map(|e| e.stage).collect();
        let mut reversed = ENABLE_ORDER;
        reversed.reverse();
        assert_eq!(stages, reversed);
        assert!(trace.iter().all(|e| !e.enabled));
    }

    #[test]
    fn test_enable_arms_clock_and_chain_registers() {
        let dev = test_device(Generation::Gen1, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        let params = params_for(&dev);
        let (cfg0, cfg1) = regs::pack_clock_config(&params);
        dev.enable(PortId(0), params).unwrap();

        assert_eq!(dev.host.register(regs::pll::cfg0(0)), cfg0);
        assert_eq!(dev.host.register(regs::pll::cfg1(0)), cfg1);
        assert_ne!(dev.host.register(regs::pll::enable(0)) & regs::pll::ENABLE, 0);
        assert_ne!(dev.host.register(regs::buf::ctl(0)) & regs::buf::CTL_ENABLE, 0);
        assert_ne!(dev.host.register(regs::trans::conf(0)) & regs::trans::CONF_ENABLE, 0);
        assert_ne!(dev.host.register(regs::pipe::conf(0)) & regs::pipe::CONF_ENABLE, 0);
    }

    #[test]
    fn test_enable_requires_binding() {
        let dev = test_device(Generation::Gen1, 1);
        let params = params_for(&dev);
        assert_eq!(dev.enable(PortId(0), params), Err(DisplayError::NotBound));
    }

    #[test]
    fn test_double_enable_rejected() {
        let dev = test_device(Generation::Gen1, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        dev.enable(PortId(0), params_for(&dev)).unwrap();
        assert_eq!(
            dev.enable(PortId(0), params_for(&dev)),
            Err(DisplayError::InvalidConfiguration)
        );
    }

    #[test]
    fn test_disable_requires_enabled_pipe() {
        let dev = test_device(Generation::Gen1, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        assert_eq!(dev.disable(PortId(0)), Err(DisplayError::InvalidConfiguration));
    }

    #[test]
    fn test_unbind_refused_while_enabled() {
        let dev = test_device(Generation::Gen1, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        dev.enable(PortId(0), params_for(&dev)).unwrap();
        assert_eq!(dev.unbind(PortId(0)), Err(DisplayError::InvalidConfiguration));
        dev.disable(PortId(0)).unwrap();
        dev.unbind(PortId(0)).unwrap();
    }

    #[test]
    fn test_pll_lock_timeout_is_fatal_and_unretried() {
        let dev = test_device(Generation::Gen1, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        dev.host.fail_pll_lock(true);
        let r = dev.enable(PortId(0), params_for(&dev));
        assert_eq!(r, Err(DisplayError::HardwareTimeout));
        // Nothing past the failing stage ran, and the failed stage was not
        // recorded as completed.
        assert!(dev.take_stage_trace().is_empty());
        assert_eq!(dev.host.register(regs::buf::ctl(0)), 0);
    }

    #[test]
    fn test_embedded_panel_power_sequencing() {
        let dev = test_device(Generation::Gen2, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        dev.state.lock().port_mut(PortId(0)).unwrap().negotiated = Some(SignalType::Edp);
        let params = dev.compute_clock(270_000, SignalType::Edp).unwrap();
        dev.enable(PortId(0), params).unwrap();
        assert_ne!(
            dev.host.register(regs::panel::CONTROL) & regs::panel::CONTROL_POWER_ON,
            0
        );
        dev.disable(PortId(0)).unwrap();
        assert_eq!(dev.host.register(regs::panel::CONTROL), 0);
    }

    #[test]
    fn test_panel_power_timeout_stops_mid_sequence() {
        let dev = test_device(Generation::Gen2, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        dev.state.lock().port_mut(PortId(0)).unwrap().negotiated = Some(SignalType::Edp);
        dev.host.fail_panel_power(true);
        let params = dev.compute_clock(270_000, SignalType::Edp).unwrap();
        let r = dev.enable(PortId(0), params);
        assert_eq!(r, Err(DisplayError::HardwareTimeout));
        let trace = dev.take_stage_trace();
        let stages: alloc::vec::Vec<Stage> = trace.iter().map(|e| e.stage).collect();
        assert_eq!(stages, [Stage::ClockSource, Stage::OutputBuffer]);
        // The pipe was never reached.
        assert_eq!(dev.host.register(regs::pipe::conf(0)), 0);
    }

    #[test]
    fn test_planes_programmed_and_flagged() {
        let dev = test_device(Generation::Gen1, 1);
        dev.bind(PortId(0), PipeId(0)).unwrap();
        dev.state.lock().pipe_mut(PipeId(0)).unwrap().planes.push(Plane {
            index: 0,
            enabled: false,
            format: PlaneFormat::Xrgb8888,
            stride: 1920 * 4,
            size: (1920, 1080),
            position: (0, 0),
            surface: 0x40_0000,
        });
        dev.enable(PortId(0), params_for(&dev)).unwrap();

        assert_eq!(dev.host.register(regs::plane::surf(0, 0)), 0x40_0000);
        assert_eq!(dev.host.register(regs::plane::stride(0, 0)), 1920 * 4);
        assert_ne!(dev.host.register(regs::plane::ctl(0, 0)) & regs::plane::CTL_ENABLE, 0);
        assert!(dev.state.lock().pipe(PipeId(0)).unwrap().planes[0].enabled);

        dev.disable(PortId(0)).unwrap();
        assert_eq!(dev.host.register(regs::plane::ctl(0, 0)), 0);
        assert!(!dev.state.lock().pipe(PipeId(0)).unwrap().planes[0].enabled);
    }
}
