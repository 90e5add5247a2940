use std::io;

use smallvec::SmallVec;
use tracing::{debug, info, instrument, trace, warn};

use super::{CommitStyle, PipePlan};
use crate::device::{ConnectorId, KmsDevice, ObjectRef};
use crate::display::Display;
use crate::error::Error;
use crate::mode::ModeInfo;
use crate::pipe::{ColorProperty, PipeChanges};
use crate::plane::{PlaneChanges, PlaneKind};
use crate::props::{ConnectorProperty, CrtcProperty, PlaneProperty};

const GEOMETRY: PlaneChanges = PlaneChanges::FB.union(PlaneChanges::POSITION).union(PlaneChanges::SIZE);

/// Counts applied driver calls to tell plain failures from partial ones
#[derive(Debug, Default)]
struct CallSequence {
    applied: usize,
}

impl CallSequence {
    fn error(&self, object: ObjectRef, errmsg: &'static str, source: io::Error) -> Error {
        if self.applied == 0 {
            Error::Access { errmsg, source }
        } else {
            Error::PartialApplyFailure {
                applied: self.applied,
                object,
                errmsg,
                source,
            }
        }
    }

    fn call(&mut self, object: ObjectRef, errmsg: &'static str, result: io::Result<()>) -> Result<(), Error> {
        match result {
            Ok(()) => {
                self.applied += 1;
                trace!(?object, applied = self.applied, "Driver call applied");
                Ok(())
            }
            Err(source) => {
                warn!(?object, applied = self.applied, "{}: {}", errmsg, source);
                Err(self.error(object, errmsg, source))
            }
        }
    }
}

impl<D: KmsDevice> Display<D> {
    /// Commit through the legacy per-object calls.
    ///
    /// Order: crtcs losing their output are turned off, modesets follow, then planes,
    /// then crtc and connector properties. Every object is confirmed as soon as its call
    /// succeeded, so a failure in the middle leaves the already applied objects clean.
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    #[profiling::function]
    pub(super) fn commit_legacy(&mut self, style: CommitStyle) -> Result<(), Error> {
        let plans = self.plan()?;
        self.validate_legacy(style, &plans)?;

        let mut seq = CallSequence::default();
        self.legacy_disable_pipes(&mut seq, &plans)?;
        self.legacy_modeset(&mut seq, style, &plans)?;
        for idx in 0..self.pipes.len() {
            self.legacy_planes(&mut seq, style, idx, &plans[idx])?;
        }
        self.legacy_crtc_properties(&mut seq)?;
        self.legacy_connector_properties(&mut seq)?;

        debug!(applied = seq.applied, ?style, "Legacy commit done");
        Ok(())
    }

    fn validate_legacy(&self, style: CommitStyle, plans: &[PipePlan]) -> Result<(), Error> {
        for (pipe, plan) in self.pipes.iter().zip(plans) {
            let crtc = pipe.object();
            let primary = pipe.primary_plane();

            for plane in pipe.planes() {
                if plane.is_dirty() && plane.fb().is_some() && !plan.is_active() {
                    return Err(Error::PipeInactive(pipe.id()));
                }
                if plane.changes().contains(PlaneChanges::ROTATION) {
                    let object = plane.drm_plane().map(ObjectRef::Plane).unwrap_or(crtc);
                    plane.properties().require(object, PlaneProperty::Rotation)?;
                }
            }

            if plan.is_active() && primary.fb().is_none() {
                let primary_changed = style == CommitStyle::Legacy && primary.changes().intersects(GEOMETRY);
                if plan.modeset || primary_changed {
                    return Err(Error::PrimaryPlaneRequired(pipe.id()));
                }
            }

            if pipe.changes.contains(PipeChanges::BACKGROUND) {
                pipe.props.require(crtc, CrtcProperty::Background)?;
            }
            if pipe.changes.contains(PipeChanges::COLOR_MGMT) {
                for color in pipe.pending_colors() {
                    pipe.props.require(crtc, color.crtc_property())?;
                }
            }
        }

        for config in self.outputs.iter().filter_map(|output| output.config()) {
            if config.scaling_mode_changed() && config.scaling_mode().is_some() {
                config.props.require(config.object(), ConnectorProperty::ScalingMode)?;
            }
        }

        Ok(())
    }

    fn legacy_disable_pipes(&mut self, seq: &mut CallSequence, plans: &[PipePlan]) -> Result<(), Error> {
        for (pipe, plan) in self.pipes.iter_mut().zip(plans) {
            if !plan.disables() {
                continue;
            }
            let crtc = pipe.crtc();
            seq.call(
                ObjectRef::Crtc(crtc),
                "Failed to disable crtc",
                self.device.set_crtc(crtc, None, (0, 0), &[], None),
            )?;
            pipe.enabled = false;
            info!(pipe = %pipe.id(), "Pipe disabled");

            for output in self.outputs.iter_mut() {
                if output.active_pipe() == Some(pipe.id()) {
                    output.confirm_disabled();
                }
            }
        }
        Ok(())
    }

    fn legacy_modeset(
        &mut self,
        seq: &mut CallSequence,
        style: CommitStyle,
        plans: &[PipePlan],
    ) -> Result<(), Error> {
        for (pipe, plan) in self.pipes.iter_mut().zip(plans) {
            let (Some(output_idx), true) = (plan.output, plan.modeset) else {
                continue;
            };
            let output = &self.outputs[output_idx];
            let Some(mode) = output.mode().cloned() else {
                return Err(Error::NoMode(output.name().to_string()));
            };
            let connector = output.id();
            let crtc = pipe.crtc();
            let primary = pipe.primary_plane();
            let src = primary.src();

            seq.call(
                ObjectRef::Crtc(crtc),
                "Failed to set crtc",
                self.device.set_crtc(
                    crtc,
                    primary.fb().map(|fb| fb.id),
                    (src.x.trunc(), src.y.trunc()),
                    &[connector],
                    Some(&mode),
                ),
            )?;
            pipe.enabled = true;
            info!(output = output.name(), pipe = %pipe.id(), mode = %mode, "Output enabled");

            for (idx, other) in self.outputs.iter_mut().enumerate() {
                if idx != output_idx && other.active_pipe() == Some(pipe.id()) {
                    other.confirm_disabled();
                }
            }
            self.outputs[output_idx].confirm(Some(crtc));
            if style == CommitStyle::Legacy {
                pipe.primary_plane_mut().confirm(GEOMETRY);
            }
        }
        Ok(())
    }

    fn legacy_planes(
        &mut self,
        seq: &mut CallSequence,
        style: CommitStyle,
        pipe_idx: usize,
        plan: &PipePlan,
    ) -> Result<(), Error> {
        let binding: Option<(ConnectorId, ModeInfo)> = plan.output.and_then(|idx| {
            let output = &self.outputs[idx];
            output.mode().map(|mode| (output.id(), mode.clone()))
        });
        let device = &self.device;
        let pipe = &mut self.pipes[pipe_idx];
        let crtc = pipe.crtc();

        for plane in pipe.planes.iter_mut().filter(|plane| plane.is_dirty()) {
            let changes = plane.changes();
            let geometry = changes & GEOMETRY;

            if !geometry.is_empty() {
                match (style, plane.kind(), &binding) {
                    (CommitStyle::Legacy, PlaneKind::Primary, Some((connector, mode))) => {
                        if let Some(fb) = plane.fb() {
                            let src = plane.src();
                            seq.call(
                                ObjectRef::Crtc(crtc),
                                "Failed to set primary framebuffer",
                                device.set_crtc(
                                    crtc,
                                    Some(fb.id),
                                    (src.x.trunc(), src.y.trunc()),
                                    &[*connector],
                                    Some(mode),
                                ),
                            )?;
                        }
                    }
                    (CommitStyle::Legacy, PlaneKind::Cursor, Some(_)) => {
                        if geometry.intersects(PlaneChanges::FB | PlaneChanges::SIZE) {
                            seq.call(
                                ObjectRef::Crtc(crtc),
                                "Failed to set cursor",
                                device.set_cursor(crtc, plane.fb()),
                            )?;
                        }
                        if geometry.contains(PlaneChanges::POSITION) && plane.fb().is_some() {
                            seq.call(
                                ObjectRef::Crtc(crtc),
                                "Failed to move cursor",
                                device.move_cursor(crtc, plane.position()),
                            )?;
                        }
                    }
                    // a disabled crtc takes its legacy primary and cursor down with it
                    (CommitStyle::Legacy, PlaneKind::Primary | PlaneKind::Cursor, None) => {}
                    _ => {
                        if let Some(drm_plane) = plane.drm_plane() {
                            let (fb, dst, src) = match plane.fb() {
                                Some(fb) => {
                                    let (x, y) = plane.position();
                                    let (w, h) = plane.size();
                                    (Some(fb.id), (x, y, w, h), plane.src().bits())
                                }
                                None => (None, (0, 0, 0, 0), (0, 0, 0, 0)),
                            };
                            seq.call(
                                ObjectRef::Plane(drm_plane),
                                "Failed to set plane",
                                device.set_plane(drm_plane, crtc, fb, dst, src),
                            )?;
                        }
                    }
                }
                plane.confirm(geometry);
            }

            if changes.contains(PlaneChanges::ROTATION) {
                if let Some(drm_plane) = plane.drm_plane() {
                    let object = ObjectRef::Plane(drm_plane);
                    let prop = plane.properties().require(object, PlaneProperty::Rotation)?;
                    seq.call(
                        object,
                        "Failed to set plane rotation",
                        device.set_object_property(object, prop, plane.rotation().bits() as u64),
                    )?;
                }
                plane.confirm(PlaneChanges::ROTATION);
            }
        }

        Ok(())
    }

    fn legacy_crtc_properties(&mut self, seq: &mut CallSequence) -> Result<(), Error> {
        let device = &self.device;

        for pipe in self.pipes.iter_mut() {
            let crtc = pipe.object();

            if pipe.changes.contains(PipeChanges::BACKGROUND) {
                let prop = pipe.props.require(crtc, CrtcProperty::Background)?;
                seq.call(
                    crtc,
                    "Failed to set background color",
                    device.set_object_property(crtc, prop, pipe.background),
                )?;
                pipe.changes.remove(PipeChanges::BACKGROUND);
            }

            if pipe.changes.contains(PipeChanges::COLOR_MGMT) {
                let colors: SmallVec<[ColorProperty; 3]> = pipe.pending_colors().collect();
                for color in colors {
                    let prop = pipe.props.require(crtc, color.crtc_property())?;
                    let blob = match pipe.color_data(color) {
                        Some(data) => Some(device.create_blob(data).map_err(|source| {
                            seq.error(crtc, "Failed to create Property Blob for color management", source)
                        })?),
                        None => None,
                    };
                    let result = seq.call(
                        crtc,
                        "Failed to set color management property",
                        device.set_object_property(crtc, prop, blob.map_or(0, |b| b.0 as u64)),
                    );
                    if let Err(err) = result {
                        if let Some(blob) = blob {
                            if let Err(err) = device.destroy_blob(blob) {
                                warn!("Failed to destroy property blob {}: {}", blob, err);
                            }
                        }
                        return Err(err);
                    }
                    let slot = &mut pipe.color_blobs[color.index()];
                    if let Some(old) = std::mem::replace(slot, blob) {
                        if let Err(err) = device.destroy_blob(old) {
                            warn!("Failed to destroy old property blob {}: {}", old, err);
                        }
                    }
                }
                pipe.changes.remove(PipeChanges::COLOR_MGMT);
            }
        }
        Ok(())
    }

    fn legacy_connector_properties(&mut self, seq: &mut CallSequence) -> Result<(), Error> {
        for output in self.outputs.iter_mut() {
            let Some(config) = output.config() else {
                continue;
            };
            if !config.scaling_mode_changed() {
                continue;
            }
            if let Some(value) = config.scaling_mode() {
                let object = config.object();
                let prop = config.props.require(object, ConnectorProperty::ScalingMode)?;
                seq.call(
                    object,
                    "Failed to set scaling mode",
                    self.device.set_object_property(object, prop, value),
                )?;
            }
            output.confirm_scaling_mode();
        }
        Ok(())
    }
}
