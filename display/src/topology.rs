//! Output topology — ports, pipes, planes, and the binding table
//!
//! One physical port type carries every signal flavor on this hardware, so a
//! port is a single record with a capability set and a negotiated signal
//! type; there is no per-signal subtype. Pipes are the scarce resource: a
//! generation has 3 or 4 of them, fixed for the device's lifetime, and the
//! allocator hands them to connected ports.
//!
//! Binding bookkeeping is an explicit map (port id → pipe id) plus the
//! per-record back-references, all guarded by the device's single coarse
//! lock. The firmware-wired preference phase may knowingly alias one pipe to
//! two ports (clone output); that is logged and reported, not rejected.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

use crate::clock::SignalType;
use crate::error::{DisplayError, Result};
use crate::hw::HostOps;
use crate::sequencer::StageEvent;
use crate::Device;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers and Capability Sets
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable index of a physical output connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortId(pub u8);

/// Stable index of a pixel-timing pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PipeId(pub u8);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe {}", self.0)
    }
}

bitflags! {
    /// Signal types a port's wiring can carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortCaps: u8 {
        const HDMI         = 1 << 0;
        const DVI          = 1 << 1;
        const DISPLAY_PORT = 1 << 2;
        const EDP          = 1 << 3;
    }
}

impl PortCaps {
    pub fn supports(&self, signal: SignalType) -> bool {
        match signal {
            SignalType::Hdmi => self.contains(Self::HDMI),
            SignalType::Dvi => self.contains(Self::DVI),
            SignalType::DisplayPort => self.contains(Self::DISPLAY_PORT),
            SignalType::Edp => self.contains(Self::EDP),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// Sink identification block size, bytes.
pub const SINK_IDENT_LEN: usize = 16;

/// Cached sink identification, filled by probing over the auxiliary channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCache {
    /// Never probed since reset
    Uninitialized,
    /// Sink answered; identification block cached
    Present([u8; SINK_IDENT_LEN]),
    /// Probe ran and nothing answered
    Absent,
}

/// One physical output connector.
#[derive(Debug, Clone)]
pub struct Port {
    pub index: PortId,
    pub caps: PortCaps,
    /// Auxiliary channel engine wired to this connector
    pub aux_channel: u8,
    pub sink: SinkCache,
    /// Set only after a successful sink probe
    pub negotiated: Option<SignalType>,
    /// Non-owning reference to the bound pipe
    pub bound_pipe: Option<PipeId>,
}

impl Port {
    pub fn is_connected(&self) -> bool {
        matches!(self.sink, SinkCache::Present(_))
    }
}

/// Static description of a connector, supplied by the host at bring-up.
#[derive(Debug, Clone, Copy)]
pub struct PortConfig {
    pub caps: PortCaps,
    pub aux_channel: u8,
}

/// Pixel format of a plane's source surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneFormat {
    Xrgb8888,
    Argb8888,
    Rgb565,
}

impl PlaneFormat {
    /// Control-register field code.
    pub fn ctl_code(&self) -> u32 {
        match self {
            PlaneFormat::Xrgb8888 => 0x4,
            PlaneFormat::Argb8888 => 0x6,
            PlaneFormat::Rgb565 => 0x1,
        }
    }
}

/// One pixel source attached to a pipe.
#[derive(Debug, Clone)]
pub struct Plane {
    pub index: u8,
    pub enabled: bool,
    pub format: PlaneFormat,
    /// Bytes per source row
    pub stride: u32,
    /// Source width/height in pixels
    pub size: (u32, u32),
    /// Position on the pipe's output
    pub position: (u32, u32),
    /// Backing surface address in the display aperture
    pub surface: u32,
}

/// Panel/window scaling sub-resource, owned by its pipe.
#[derive(Debug, Clone, Default)]
pub struct Scaler {
    pub enabled: bool,
    pub src: (u32, u32),
    pub dst: (u32, u32),
}

/// One pixel-timing-generator instance.
#[derive(Debug, Clone)]
pub struct Pipe {
    pub index: PipeId,
    pub enabled: bool,
    /// Back-reference to the driving port
    pub bound_port: Option<PortId>,
    pub scaler: Scaler,
    pub planes: Vec<Plane>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Device State (behind the coarse lock)
// ═══════════════════════════════════════════════════════════════════════════════

/// All mutable topology state. One instance per device, owned by the device
/// context and guarded by its single lock.
pub struct DeviceState {
    pub ports: Vec<Port>,
    pub pipes: Vec<Pipe>,
    /// Explicit binding map; the record back-references mirror it
    pub bindings: BTreeMap<PortId, PipeId>,
    /// Stage transitions recorded by the sequencer
    pub stage_trace: Vec<StageEvent>,
}

impl DeviceState {
    pub fn new(pipe_count: u8, port_configs: &[PortConfig]) -> Self {
        let ports = port_configs
            .iter()
            .enumerate()
            .map(|(i, cfg)| Port {
                index: PortId(i as u8),
                caps: cfg.caps,
                aux_channel: cfg.aux_channel,
                sink: SinkCache::Uninitialized,
                negotiated: None,
                bound_pipe: None,
            })
            .collect();
        let pipes = (0..pipe_count)
            .map(|i| Pipe {
                index: PipeId(i),
                enabled: false,
                bound_port: None,
                scaler: Scaler::default(),
                planes: Vec::new(),
            })
            .collect();
        Self {
            ports,
            pipes,
            bindings: BTreeMap::new(),
            stage_trace: Vec::new(),
        }
    }

    pub fn port(&self, id: PortId) -> Result<&Port> {
        self.ports.get(id.0 as usize).ok_or(DisplayError::InvalidConfiguration)
    }

    pub fn port_mut(&mut self, id: PortId) -> Result<&mut Port> {
        self.ports.get_mut(id.0 as usize).ok_or(DisplayError::InvalidConfiguration)
    }

    pub fn pipe(&self, id: PipeId) -> Result<&Pipe> {
        self.pipes.get(id.0 as usize).ok_or(DisplayError::InvalidConfiguration)
    }

    pub fn pipe_mut(&mut self, id: PipeId) -> Result<&mut Pipe> {
        self.pipes.get_mut(id.0 as usize).ok_or(DisplayError::InvalidConfiguration)
    }

    /// Lowest-index pipe not claimed by any binding.
    fn first_free_pipe(&self) -> Option<PipeId> {
        self.pipes
            .iter()
            .map(|p| p.index)
            .find(|id| !self.bindings.values().any(|b| b == id))
    }

    /// Claim `pipe` for `port`. The port must be unbound (reassignment
    /// requires an explicit unbind) and the pipe must be free.
    pub fn bind(&mut self, port: PortId, pipe: PipeId) -> Result<()> {
        if self.port(port)?.bound_pipe.is_some() {
            return Err(DisplayError::InvalidConfiguration);
        }
        if self.pipe(pipe)?.bound_port.is_some() {
            return Err(DisplayError::ResourceExhausted);
        }
        self.bindings.insert(port, pipe);
        self.port_mut(port)?.bound_pipe = Some(pipe);
        self.pipe_mut(pipe)?.bound_port = Some(port);
        log::info!("[PIPE] bound {} -> {}", port, pipe);
        Ok(())
    }

    /// Claim `pipe` for `port` unconditionally — the firmware-wired
    /// preference path. Returns the other port already on this pipe when the
    /// claim aliases it (clone output).
    pub fn force_bind(&mut self, port: PortId, pipe: PipeId) -> Result<Option<PortId>> {
        let previous = self
            .pipe(pipe)?
            .bound_port
            .filter(|&other| other != port);
        if let Some(old_pipe) = self.port(port)?.bound_pipe {
            if old_pipe != pipe {
                self.release_binding(port, old_pipe)?;
            }
        }
        self.bindings.insert(port, pipe);
        self.port_mut(port)?.bound_pipe = Some(pipe);
        self.pipe_mut(pipe)?.bound_port = Some(port);
        Ok(previous)
    }

    /// Return `port`'s pipe to the free set. Refused while the pipe is still
    /// enabled.
    pub fn unbind(&mut self, port: PortId) -> Result<()> {
        let pipe = self.port(port)?.bound_pipe.ok_or(DisplayError::NotBound)?;
        if self.pipe(pipe)?.enabled {
            return Err(DisplayError::InvalidConfiguration);
        }
        self.release_binding(port, pipe)?;
        log::info!("[PIPE] unbound {} from {}", port, pipe);
        Ok(())
    }

    fn release_binding(&mut self, port: PortId, pipe: PipeId) -> Result<()> {
        self.bindings.remove(&port);
        self.port_mut(port)?.bound_pipe = None;
        // Keep the back-reference consistent: if a clone sibling still maps
        // to this pipe, it becomes the referenced driver.
        let sibling = self
            .bindings
            .iter()
            .find(|(_, &p)| p == pipe)
            .map(|(&other, _)| other);
        self.pipe_mut(pipe)?.bound_port = sibling;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Two-Phase Assignment
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-port outcome of an assignment pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// Port got a pipe of its own
    Bound(PipeId),
    /// Port shares its pipe with another port (firmware-wired clone)
    Shared(PipeId),
    /// No unbound pipe was left for this port
    Exhausted,
}

impl<H: HostOps> Device<H> {
    /// Explicitly claim a pipe for a port.
    pub fn bind(&self, port: PortId, pipe: PipeId) -> Result<()> {
        self.state.lock().bind(port, pipe)
    }

    /// Release a port's pipe.
    pub fn unbind(&self, port: PortId) -> Result<()> {
        self.state.lock().unbind(port)
    }

    /// Assign pipes to every connected port.
    ///
    /// Phase 1 honors hardware-wired pipe preferences, even when the wired
    /// pipe is already claimed (the aliasing is diagnosed, not rejected).
    /// Phase 2 hands remaining connected ports the first unbound pipe in
    /// index order. The pass never aborts early: a port that cannot be
    /// served is recorded as `Exhausted` and the rest still get pipes.
    pub fn assign_pipes(&self) -> BTreeMap<PortId, Assignment> {
        let mut state = self.state.lock();
        let mut outcomes = BTreeMap::new();

        let connected: Vec<PortId> = state
            .ports
            .iter()
            .filter(|p| p.is_connected())
            .map(|p| p.index)
            .collect();

        // Phase 1: firmware-wired preferences.
        for &port in connected.iter() {
            let Some(pipe) = self.host.pipe_preference(port) else { continue };
            match state.force_bind(port, pipe) {
                Ok(None) => {
                    log::info!("[PIPE] {} wired to {}", port, pipe);
                    outcomes.insert(port, Assignment::Bound(pipe));
                }
                Ok(Some(other)) => {
                    log::warn!(
                        "[PIPE] {} wired to {} already driven by {} (clone output)",
                        port, pipe, other
                    );
                    outcomes.insert(port, Assignment::Shared(pipe));
                    outcomes.insert(other, Assignment::Shared(pipe));
                }
                Err(_) => {
                    // Preference names a pipe this generation does not have;
                    // fall through to phase 2.
                    log::warn!("[PIPE] {} reports invalid wired pipe {}", port, pipe);
                }
            }
        }

        // Phase 2: first-free scan for everything still unbound.
        for &port in connected.iter() {
            let already = state
                .port(port)
                .map(|p| p.bound_pipe.is_some())
                .unwrap_or(false);
            if already {
                continue;
            }
            match state.first_free_pipe() {
                Some(pipe) => {
                    if state.bind(port, pipe).is_ok() {
                        outcomes.insert(port, Assignment::Bound(pipe));
                    }
                }
                None => {
                    log::warn!("[PIPE] no free pipe for {}", port);
                    outcomes.insert(port, Assignment::Exhausted);
                }
            }
        }

        outcomes
    }

    /// Replace a pipe's plane set. Planes live and die with mode changes;
    /// the new set is programmed at the next enable.
    pub fn set_planes(&self, pipe: PipeId, planes: Vec<Plane>) -> Result<()> {
        let mut state = self.state.lock();
        if state.pipe(pipe)?.enabled {
            return Err(DisplayError::InvalidConfiguration);
        }
        state.pipe_mut(pipe)?.planes = planes;
        Ok(())
    }

    /// Configure the pipe's scaler sub-resource.
    pub fn configure_scaler(&self, pipe: PipeId, scaler: Scaler) -> Result<()> {
        let mut state = self.state.lock();
        state.pipe_mut(pipe)?.scaler = scaler;
        Ok(())
    }

    /// Human-readable topology dump for diagnostics.
    pub fn summary(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut lines = Vec::new();
        lines.push(format!(
            "{} pipe(s), {} port(s), {} binding(s)",
            state.pipes.len(),
            state.ports.len(),
            state.bindings.len()
        ));
        for port in state.ports.iter() {
            let sink = match port.sink {
                SinkCache::Uninitialized => "unprobed",
                SinkCache::Present(_) => "present",
                SinkCache::Absent => "absent",
            };
            let mut line = format!("  {}: sink {}", port.index, sink);
            if let Some(signal) = port.negotiated {
                line.push_str(&format!(", {}", signal.name()));
            }
            if let Some(pipe) = port.bound_pipe {
                line.push_str(&format!(", {}", pipe));
            }
            lines.push(line);
        }
        for pipe in state.pipes.iter() {
            lines.push(format!(
                "  {}: {}, {} plane(s)",
                pipe.index,
                if pipe.enabled { "enabled" } else { "disabled" },
                pipe.planes.len()
            ));
        }
        lines
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
