//! The display
//!
//! A [`Display`] mirrors the modesetting object graph of one device: a [`Pipe`] per crtc,
//! each owning its [`Plane`]s, and an [`Output`] per connector. Capabilities (universal
//! planes, atomic modesetting) are negotiated once on creation.
//!
//! Mutating pipes, planes and outputs only changes local state. Nothing reaches the driver
//! until [`Display::commit`] or [`Display::try_commit_atomic`] is called.
//!
//! ```no_run
//! # use kms_display::{device::{DrmKmsDevice, Framebuffer}, display::Display, commit::CommitStyle};
//! # fn run(file: std::fs::File, fb: Framebuffer) -> Result<(), kms_display::Error> {
//! let mut display = Display::new(DrmKmsDevice::new(file))?;
//! let (pipe, output) = display.pipes_with_valid_output().next().unwrap();
//! display.output_mut(output).unwrap().set_pipe(Some(pipe));
//! display.output_plane_mut(output, 0).unwrap().set_fb(Some(fb));
//! display.commit(CommitStyle::Atomic)?;
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info, info_span, warn};

use crate::device::{ClientCapability, ConnectorId, CrtcId, KmsDevice, ObjectRef, PlaneId};
use crate::error::{Error, ProbeError};
use crate::output::Output;
use crate::pipe::{Pipe, PipeId, PipeMask};
use crate::plane::{Plane, PlaneKind};
use crate::probe::{probe_connector, ConnectorConfig, ProbeMode};
use crate::props::{self, PlaneProperty, PropertyName, PropertyTable, ResolvedProperty};

/// Options controlling capability negotiation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Do not enable atomic modesetting, even if the driver supports it
    pub force_legacy: bool,
    /// Do not enable universal planes (and thereby atomic modesetting)
    pub disable_universal_planes: bool,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|x| matches!(x.to_lowercase().as_str(), "1" | "true" | "yes" | "y"))
        .unwrap_or(false)
}

impl DisplayOptions {
    /// Read the options from `KMS_DISPLAY_USE_LEGACY` and `KMS_DISPLAY_NO_UNIVERSAL_PLANES`
    pub fn from_env() -> DisplayOptions {
        let options = DisplayOptions {
            force_legacy: env_flag("KMS_DISPLAY_USE_LEGACY"),
            disable_universal_planes: env_flag("KMS_DISPLAY_NO_UNIVERSAL_PLANES"),
        };
        if options.force_legacy {
            info!("KMS_DISPLAY_USE_LEGACY is set. Skipping atomic modesetting.");
        }
        if options.disable_universal_planes {
            info!("KMS_DISPLAY_NO_UNIVERSAL_PLANES is set. Skipping universal planes.");
        }
        options
    }
}

/// Modesetting state of a device
#[derive(Debug)]
pub struct Display<D: KmsDevice> {
    pub(crate) device: D,
    pub(crate) crtcs: Vec<CrtcId>,
    pub(crate) pipes: Vec<Pipe>,
    pub(crate) outputs: Vec<Output>,
    pub(crate) is_atomic: bool,
    pub(crate) has_universal_planes: bool,
    pub(crate) span: tracing::Span,
}

impl<D: KmsDevice> Display<D> {
    /// Create a display, reading [`DisplayOptions`] from the environment
    pub fn new(device: D) -> Result<Self, Error> {
        Self::with_options(device, DisplayOptions::from_env())
    }

    /// Create a display with explicit options.
    ///
    /// Negotiates capabilities, builds a pipe per crtc and probes every connector.
    /// Connectors failing to probe become invalid outputs.
    pub fn with_options(device: D, options: DisplayOptions) -> Result<Self, Error> {
        let span = info_span!("kms_display");

        let (is_atomic, has_universal_planes, crtcs, pipes, outputs) = {
            let _guard = span.enter();

            let is_atomic = !options.force_legacy
                && !options.disable_universal_planes
                && device.enable_client_capability(ClientCapability::Atomic).is_ok();
            // the atomic capability implies universal planes
            let has_universal_planes = is_atomic
                || (!options.disable_universal_planes
                    && device
                        .enable_client_capability(ClientCapability::UniversalPlanes)
                        .is_ok());
            info!(is_atomic, has_universal_planes, "Negotiated display capabilities");

            let resources = device.resources().map_err(|source| Error::Access {
                errmsg: "Error loading drm resources",
                source,
            })?;
            let mut crtcs = resources.crtcs;
            if crtcs.len() > PipeId::MAX {
                warn!("Device exposes {} crtcs, only using the first {}", crtcs.len(), PipeId::MAX);
                crtcs.truncate(PipeId::MAX);
            }

            let pipes = build_pipes(&device, &crtcs, has_universal_planes, is_atomic)?;
            let outputs = resources
                .connectors
                .iter()
                .map(|id| {
                    let allowed = PipeMask::first_n(crtcs.len());
                    output_from_probe(*id, probe_output(&device, *id, &crtcs, allowed, ProbeMode::Current))
                })
                .collect::<Vec<_>>();

            (is_atomic, has_universal_planes, crtcs, pipes, outputs)
        };

        Ok(Display {
            device,
            crtcs,
            pipes,
            outputs,
            is_atomic,
            has_universal_planes,
            span,
        })
    }

    /// The underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Whether atomic commits are available
    pub fn is_atomic(&self) -> bool {
        self.is_atomic
    }

    /// Whether the driver exposes primary and cursor planes
    pub fn has_universal_planes(&self) -> bool {
        self.has_universal_planes
    }

    /// Number of pipes
    pub fn n_pipes(&self) -> usize {
        self.pipes.len()
    }

    /// All pipes, in crtc order
    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    /// Pipe by identity
    pub fn pipe(&self, pipe: PipeId) -> Option<&Pipe> {
        self.pipes.get(pipe.index())
    }

    /// Mutable pipe by identity
    pub fn pipe_mut(&mut self, pipe: PipeId) -> Option<&mut Pipe> {
        self.pipes.get_mut(pipe.index())
    }

    /// Pipe driven by a crtc
    pub fn pipe_by_crtc(&self, crtc: CrtcId) -> Option<PipeId> {
        self.crtcs
            .iter()
            .position(|c| *c == crtc)
            .map(PipeId::from_index)
    }

    /// All outputs, including invalid ones
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Output by index
    pub fn output(&self, index: usize) -> Option<&Output> {
        self.outputs.get(index)
    }

    /// Mutable output by index
    pub fn output_mut(&mut self, index: usize) -> Option<&mut Output> {
        self.outputs.get_mut(index)
    }

    /// Index of the output with the given name
    pub fn output_by_name(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|output| output.name() == name)
    }

    /// Index of the output of a connector
    pub fn output_by_connector(&self, connector: ConnectorId) -> Option<usize> {
        self.outputs.iter().position(|output| output.id() == connector)
    }

    /// Valid outputs with an attached sink
    pub fn connected_outputs(&self) -> impl Iterator<Item = (usize, &Output)> {
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, output)| output.is_valid() && output.is_connected())
    }

    /// Every pipe paired with every connected output it can drive
    pub fn pipes_with_valid_output(&self) -> impl Iterator<Item = (PipeId, usize)> + '_ {
        self.pipes.iter().flat_map(move |pipe| {
            let id = pipe.id();
            self.valid_outputs_on_pipe(id).map(move |output| (id, output))
        })
    }

    /// Connected outputs able to use a pipe
    pub fn valid_outputs_on_pipe(&self, pipe: PipeId) -> impl Iterator<Item = usize> + '_ {
        self.connected_outputs()
            .filter(move |(_, output)| output.valid_pipes().contains(pipe))
            .map(|(idx, _)| idx)
    }

    /// Whether an output can be driven by a pipe
    pub fn pipe_connector_valid(&self, pipe: PipeId, output: usize) -> bool {
        self.outputs
            .get(output)
            .map_or(false, |output| output.valid_pipes().contains(pipe))
    }

    /// Union of the pending pipes of all valid outputs
    pub fn pipes_in_use(&self) -> PipeMask {
        self.outputs
            .iter()
            .filter(|output| output.is_valid())
            .fold(PipeMask::empty(), |mask, output| mask | output.pending_pipe_mask())
    }

    /// A plane of the pipe an output is pending on
    pub fn output_plane_mut(&mut self, output: usize, plane: usize) -> Option<&mut Plane> {
        let pipe = self.outputs.get(output)?.pending_pipe()?;
        self.pipes.get_mut(pipe.index())?.plane_mut(plane)
    }

    /// First plane of a kind on the pipe an output is pending on
    pub fn output_plane_of_kind_mut(&mut self, output: usize, kind: PlaneKind) -> Option<&mut Plane> {
        let pipe = self.outputs.get(output)?.pending_pipe()?;
        self.pipes.get_mut(pipe.index())?.plane_of_kind_mut(kind)
    }

    /// Look up any crtc property of a pipe by name
    pub fn pipe_property(&self, pipe: PipeId, name: &str) -> Result<ResolvedProperty, Error> {
        let crtc = self.pipe(pipe).map(Pipe::crtc).ok_or(Error::UnknownPipe(pipe))?;
        props::resolve(&self.device, ObjectRef::Crtc(crtc), name)
    }

    /// Whether any pipe, plane or output has uncommitted changes
    pub fn is_dirty(&self) -> bool {
        self.pipes.iter().any(Pipe::is_dirty) || self.outputs.iter().any(Output::is_dirty)
    }

    /// Rebuild every output from a fresh connector list
    ///
    /// Pending assignments are lost, every output starts at its current driver binding.
    #[profiling::function]
    pub fn reprobe_outputs(&mut self) -> Result<(), Error> {
        let _guard = self.span.enter();
        let resources = self.device.resources().map_err(|source| Error::Access {
            errmsg: "Error loading drm resources",
            source,
        })?;
        let allowed = PipeMask::first_n(self.crtcs.len());
        self.outputs = resources
            .connectors
            .iter()
            .map(|id| {
                let probed = probe_output(&self.device, *id, &self.crtcs, allowed, ProbeMode::Current);
                output_from_probe(*id, probed)
            })
            .collect();
        info!("Reprobed {} outputs", self.outputs.len());
        Ok(())
    }

    /// Probe a single output again.
    ///
    /// The pending pipe and mode override survive. If probing fails the output becomes
    /// invalid and the error is returned.
    pub fn refresh_output(&mut self, index: usize, mode: ProbeMode) -> Result<(), Error> {
        let _guard = self.span.enter();
        let Some(old) = self.outputs.get(index) else {
            return Err(Error::UnknownOutput(index));
        };
        let id = old.id();
        let allowed = PipeMask::first_n(self.crtcs.len());
        let result = probe_output(&self.device, id, &self.crtcs, allowed, mode);
        let failed = result.is_err();

        let mut output = output_from_probe(id, result);
        if output.is_valid() {
            output.pending_pipe = old.pending_pipe;
            output.override_mode = old.override_mode.clone();
            output.mode_changed = old.mode_changed;
        }
        self.outputs[index] = output;

        if failed {
            return Err(Error::InvalidOutput(self.outputs[index].name.clone()));
        }
        Ok(())
    }
}

impl<D: KmsDevice> Drop for Display<D> {
    fn drop(&mut self) {
        let _guard = self.span.enter();
        for blob in self.pipes.iter().flat_map(Pipe::blobs) {
            if let Err(err) = self.device.destroy_blob(blob) {
                warn!("Failed to destroy property blob {}: {}", blob, err);
            }
        }
    }
}

fn probe_output<D: KmsDevice>(
    device: &D,
    id: ConnectorId,
    crtcs: &[CrtcId],
    allowed: PipeMask,
    mode: ProbeMode,
) -> Result<ConnectorConfig, ProbeError> {
    let mut config = probe_connector(device, id, crtcs, allowed, mode)?;
    match PropertyTable::resolve(device, ObjectRef::Connector(id)) {
        Ok(table) => config.props = table,
        Err(err) => debug!(connector = %id, "Failed to resolve connector properties: {}", err),
    }
    Ok(config)
}

fn output_from_probe(id: ConnectorId, result: Result<ConnectorConfig, ProbeError>) -> Output {
    match result {
        Ok(config) => {
            let name = config.connector().name();
            info!(
                output = name.as_str(),
                connected = config.is_connected(),
                pipe = ?config.pipe(),
                "Probed output"
            );
            Output::new(id, name, Some(config))
        }
        Err(err) => {
            warn!(connector = %id, "Output is not usable: {}", err);
            let name = match err {
                ProbeError::NoValidCrtc { name, .. } => name,
                ProbeError::Access { .. } => format!("Unknown-{}", id),
            };
            Output::new(id, name, None)
        }
    }
}

fn plane_kind<D: KmsDevice>(
    device: &D,
    id: PlaneId,
    props: &PropertyTable<PlaneProperty>,
) -> Result<PlaneKind, Error> {
    if let Some(entry) = props.entry(PlaneProperty::Type) {
        return Ok(PlaneKind::from_type_property(entry.value));
    }
    match props::resolve(device, ObjectRef::Plane(id), PlaneProperty::Type.name()) {
        Ok(prop) => Ok(PlaneKind::from_type_property(prop.value)),
        Err(Error::PropertyNotFound(_)) => Ok(PlaneKind::Overlay),
        Err(err) => Err(err),
    }
}

struct PlaneCandidate {
    id: PlaneId,
    kind: PlaneKind,
    props: PropertyTable<PlaneProperty>,
}

fn push_plane(planes: &mut Vec<Plane>, pipe: PipeId, kind: PlaneKind, candidate: Option<&PlaneCandidate>) {
    let mut plane = Plane::new(pipe, planes.len(), kind, candidate.map(|c| c.id));
    if let Some(candidate) = candidate {
        plane.set_properties(candidate.props.clone());
    }
    planes.push(plane);
}

fn build_pipes<D: KmsDevice>(
    device: &D,
    crtcs: &[CrtcId],
    universal: bool,
    atomic: bool,
) -> Result<Vec<Pipe>, Error> {
    let plane_ids = device.plane_ids().map_err(|source| Error::Access {
        errmsg: "Error loading planes",
        source,
    })?;

    let all_pipes = PipeMask::first_n(crtcs.len());
    let mut candidates: Vec<Vec<PlaneCandidate>> = crtcs.iter().map(|_| Vec::new()).collect();
    for id in plane_ids {
        let info = device.plane(id).map_err(|source| Error::Access {
            errmsg: "Error loading plane info",
            source,
        })?;
        let props = if atomic {
            PropertyTable::resolve(device, ObjectRef::Plane(id))?
        } else {
            PropertyTable::empty()
        };
        let kind = if universal {
            plane_kind(device, id, &props)?
        } else {
            PlaneKind::Overlay
        };
        for pipe in (info.possible_crtcs & all_pipes).iter() {
            candidates[pipe.index()].push(PlaneCandidate {
                id,
                kind,
                props: props.clone(),
            });
        }
    }

    crtcs
        .iter()
        .zip(candidates)
        .enumerate()
        .map(|(idx, (crtc, candidates))| {
            let pipe_id = PipeId::from_index(idx);
            let enabled = device
                .crtc(*crtc)
                .map_err(|source| Error::Access {
                    errmsg: "Error loading crtc info",
                    source,
                })?
                .mode
                .is_some();

            let mut planes = Vec::with_capacity(candidates.len() + 2);
            let primary = candidates.iter().find(|c| c.kind == PlaneKind::Primary);
            push_plane(&mut planes, pipe_id, PlaneKind::Primary, primary);
            for overlay in candidates.iter().filter(|c| c.kind == PlaneKind::Overlay) {
                push_plane(&mut planes, pipe_id, PlaneKind::Overlay, Some(overlay));
            }
            match candidates.iter().find(|c| c.kind == PlaneKind::Cursor) {
                Some(cursor) => push_plane(&mut planes, pipe_id, PlaneKind::Cursor, Some(cursor)),
                // legacy cursor ioctls drive a cursor without a plane object
                None if !universal => push_plane(&mut planes, pipe_id, PlaneKind::Cursor, None),
                None => {}
            }

            let mut pipe = Pipe::new(pipe_id, *crtc, enabled, planes);
            match PropertyTable::resolve(device, ObjectRef::Crtc(*crtc)) {
                Ok(table) => pipe.set_properties(table),
                Err(err) if atomic => return Err(err),
                Err(err) => debug!(crtc = %crtc, "Failed to resolve crtc properties: {}", err),
            }
            debug!(
                pipe = %pipe_id,
                crtc = %crtc,
                planes = pipe.planes().len(),
                enabled,
                "Created pipe"
            );
            Ok(pipe)
        })
        .collect()
}
