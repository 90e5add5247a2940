use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, info, instrument, trace, warn};

use super::{AtomicCommitFlags, CommitStyle, PipePlan};
use crate::device::{BlobId, KmsDevice, ObjectRef, PropertyId};
use crate::display::Display;
use crate::error::Error;
use crate::pipe::{ColorProperty, PipeChanges, PipeId};
use crate::plane::PlaneChanges;
use crate::props::{ConnectorProperty, CrtcProperty, PlaneProperty};

/// Property assignments of an atomic commit, grouped by object in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicRequest {
    objects: IndexMap<ObjectRef, SmallVec<[(PropertyId, u64); 8]>>,
}

impl AtomicRequest {
    /// An empty request
    pub fn new() -> AtomicRequest {
        AtomicRequest::default()
    }

    /// Set a property of an object, replacing an earlier value of the same property
    pub fn add_property(&mut self, object: ObjectRef, property: PropertyId, value: u64) {
        let props = self.objects.entry(object).or_default();
        match props.iter_mut().find(|(prop, _)| *prop == property) {
            Some(entry) => entry.1 = value,
            None => props.push((property, value)),
        }
    }

    /// Value assigned to a property of an object
    pub fn get(&self, object: ObjectRef, property: PropertyId) -> Option<u64> {
        self.objects
            .get(&object)?
            .iter()
            .find(|(prop, _)| *prop == property)
            .map(|(_, value)| *value)
    }

    /// Whether the request touches an object
    pub fn contains_object(&self, object: ObjectRef) -> bool {
        self.objects.contains_key(&object)
    }

    /// Whether the request assigns nothing
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of property assignments
    pub fn len(&self) -> usize {
        self.objects.values().map(SmallVec::len).sum()
    }

    /// Objects and their assignments, in insertion order
    pub fn objects(&self) -> impl Iterator<Item = (ObjectRef, &[(PropertyId, u64)])> {
        self.objects.iter().map(|(object, props)| (*object, props.as_slice()))
    }
}

/// A built request together with the blobs it references
#[derive(Debug, Default)]
struct AtomicPlan {
    request: AtomicRequest,
    created: Vec<BlobId>,
    modes: Vec<(usize, Option<BlobId>)>,
    colors: Vec<(usize, ColorProperty, Option<BlobId>)>,
    modeset: Option<PipeId>,
}

impl AtomicPlan {
    fn release<D: KmsDevice>(&mut self, device: &D) {
        for blob in self.created.drain(..) {
            if let Err(err) = device.destroy_blob(blob) {
                warn!("Failed to destroy property blob {}: {}", blob, err);
            }
        }
    }
}

fn replace_blob<D: KmsDevice>(device: &D, slot: &mut Option<BlobId>, blob: Option<BlobId>) {
    if let Some(old) = std::mem::replace(slot, blob) {
        if let Err(err) = device.destroy_blob(old) {
            warn!("Failed to destroy old property blob {}: {}", old, err);
        }
    }
}

impl<D: KmsDevice> Display<D> {
    /// Commit every pending change in a single atomic request.
    ///
    /// A request changing the mode or active state of any pipe requires
    /// [`AtomicCommitFlags::ALLOW_MODESET`], else [`Error::ModesetNotAllowed`] is returned.
    /// With [`AtomicCommitFlags::TEST_ONLY`] the request is only validated by the driver.
    ///
    /// Local state only changes if a real commit succeeds. A rejected request returns
    /// [`Error::CommitRejected`] and can be retried, e.g. with smaller planes:
    ///
    /// ```no_run
    /// # use kms_display::{commit::AtomicCommitFlags, display::Display, device::KmsDevice, pipe::PipeId};
    /// # fn shrink<D: KmsDevice>(display: &mut Display<D>, pipe: PipeId) -> Result<(), kms_display::Error> {
    /// let flags = AtomicCommitFlags::ALLOW_MODESET;
    /// while display.try_commit_atomic(flags | AtomicCommitFlags::TEST_ONLY).is_err() {
    ///     let plane = display.pipe_mut(pipe).unwrap().plane_mut(1).unwrap();
    ///     let (w, h) = plane.size();
    ///     plane.set_size(w / 2, h / 2);
    /// }
    /// display.try_commit_atomic(flags)
    /// # }
    /// ```
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    #[profiling::function]
    pub fn try_commit_atomic(&mut self, flags: AtomicCommitFlags) -> Result<(), Error> {
        if !self.is_atomic {
            return Err(Error::UnsupportedCommitStyle(CommitStyle::Atomic));
        }

        let plans = self.plan()?;
        let mut plan = AtomicPlan::default();
        if let Err(err) = self.build_atomic_request(&plans, &mut plan) {
            plan.release(&self.device);
            return Err(err);
        }

        if plan.request.is_empty() {
            trace!("Nothing to commit");
            return Ok(());
        }
        if let Some(pipe) = plan.modeset {
            if !flags.contains(AtomicCommitFlags::ALLOW_MODESET) {
                plan.release(&self.device);
                return Err(Error::ModesetNotAllowed(pipe));
            }
        }

        let test_only = flags.contains(AtomicCommitFlags::TEST_ONLY);
        debug!(?flags, "Committing: {:?}", plan.request);
        if let Err(source) = self.device.atomic_commit(flags, &plan.request) {
            warn!(test_only, "Atomic commit rejected: {}", source);
            plan.release(&self.device);
            return Err(Error::CommitRejected { test_only, source });
        }

        if test_only {
            trace!("Test commit accepted");
            plan.release(&self.device);
            return Ok(());
        }

        self.confirm_atomic(plan);
        Ok(())
    }

    #[profiling::function]
    fn build_atomic_request(&self, plans: &[PipePlan], plan: &mut AtomicPlan) -> Result<(), Error> {
        let device = &self.device;

        for (idx, (pipe, pipe_plan)) in self.pipes.iter().zip(plans).enumerate() {
            let crtc = pipe.object();

            if pipe_plan.changes_mode() {
                plan.modeset.get_or_insert(pipe.id());
                let mode_id = pipe.props.require(crtc, CrtcProperty::ModeId)?;
                let active = pipe.props.require(crtc, CrtcProperty::Active)?;
                match pipe_plan.output.map(|output| &self.outputs[output]) {
                    Some(output) => {
                        let mode = output
                            .mode()
                            .ok_or_else(|| Error::NoMode(output.name().to_string()))?;
                        let blob = device.create_mode_blob(mode).map_err(|source| Error::Access {
                            errmsg: "Failed to create Property Blob for mode",
                            source,
                        })?;
                        plan.created.push(blob);
                        plan.request.add_property(crtc, mode_id, blob.0 as u64);
                        plan.request.add_property(crtc, active, 1);
                        plan.modes.push((idx, Some(blob)));
                    }
                    None => {
                        plan.request.add_property(crtc, mode_id, 0);
                        plan.request.add_property(crtc, active, 0);
                        plan.modes.push((idx, None));
                    }
                }
            }

            if pipe.changes.contains(PipeChanges::BACKGROUND) {
                let prop = pipe.props.require(crtc, CrtcProperty::Background)?;
                plan.request.add_property(crtc, prop, pipe.background);
            }

            if pipe.changes.contains(PipeChanges::COLOR_MGMT) {
                for color in pipe.pending_colors() {
                    let prop = pipe.props.require(crtc, color.crtc_property())?;
                    let blob = match pipe.color_data(color) {
                        Some(data) => {
                            let blob = device.create_blob(data).map_err(|source| Error::Access {
                                errmsg: "Failed to create Property Blob for color management",
                                source,
                            })?;
                            plan.created.push(blob);
                            Some(blob)
                        }
                        None => None,
                    };
                    plan.request.add_property(crtc, prop, blob.map_or(0, |b| b.0 as u64));
                    plan.colors.push((idx, color, blob));
                }
            }

            for plane in pipe.planes.iter().filter(|plane| plane.is_dirty()) {
                let Some(drm_plane) = plane.drm_plane() else {
                    continue;
                };
                let object = ObjectRef::Plane(drm_plane);
                let props = plane.properties();
                let changes = plane.changes();
                let mut set = |name: PlaneProperty, value: u64| -> Result<(), Error> {
                    let prop = props.require(object, name)?;
                    plan.request.add_property(object, prop, value);
                    Ok(())
                };

                let (x, y) = plane.position();
                let (w, h) = plane.size();
                match plane.fb() {
                    Some(fb) if changes.contains(PlaneChanges::FB) => {
                        let src = plane.src();
                        set(PlaneProperty::FbId, fb.id.0 as u64)?;
                        set(PlaneProperty::CrtcId, pipe.crtc().0 as u64)?;
                        set(PlaneProperty::SrcX, src.x.bits() as u64)?;
                        set(PlaneProperty::SrcY, src.y.bits() as u64)?;
                        set(PlaneProperty::SrcW, src.w.bits() as u64)?;
                        set(PlaneProperty::SrcH, src.h.bits() as u64)?;
                        // an enabled plane needs its whole destination
                        set(PlaneProperty::CrtcX, x as i64 as u64)?;
                        set(PlaneProperty::CrtcY, y as i64 as u64)?;
                        set(PlaneProperty::CrtcW, w as u64)?;
                        set(PlaneProperty::CrtcH, h as u64)?;
                    }
                    None if changes.contains(PlaneChanges::FB) => {
                        set(PlaneProperty::FbId, 0)?;
                        set(PlaneProperty::CrtcId, 0)?;
                    }
                    _ => {}
                }
                if changes.contains(PlaneChanges::POSITION) {
                    set(PlaneProperty::CrtcX, x as i64 as u64)?;
                    set(PlaneProperty::CrtcY, y as i64 as u64)?;
                }
                if changes.contains(PlaneChanges::SIZE) {
                    set(PlaneProperty::CrtcW, w as u64)?;
                    set(PlaneProperty::CrtcH, h as u64)?;
                }
                if changes.contains(PlaneChanges::ROTATION) {
                    set(PlaneProperty::Rotation, plane.rotation().bits() as u64)?;
                }
            }
        }

        for output in &self.outputs {
            let Some(config) = output.config() else {
                continue;
            };
            let object = config.object();
            if output.pipe_changed() {
                let prop = config.props.require(object, ConnectorProperty::CrtcId)?;
                let crtc = output
                    .pending_pipe()
                    .map_or(0, |pipe| self.pipes[pipe.index()].crtc().0 as u64);
                plan.request.add_property(object, prop, crtc);
            }
            if let (true, Some(value)) = (config.scaling_mode_changed(), config.scaling_mode()) {
                let prop = config.props.require(object, ConnectorProperty::ScalingMode)?;
                plan.request.add_property(object, prop, value);
            }
        }

        Ok(())
    }

    fn confirm_atomic(&mut self, plan: AtomicPlan) {
        let device = &self.device;

        for (idx, blob) in plan.modes {
            let pipe = &mut self.pipes[idx];
            replace_blob(device, &mut pipe.mode_blob, blob);
            pipe.enabled = blob.is_some();
            info!(pipe = %pipe.id(), enabled = pipe.enabled, "Pipe modeset");
        }
        for (idx, color, blob) in plan.colors {
            replace_blob(device, &mut self.pipes[idx].color_blobs[color.index()], blob);
        }

        for pipe in &mut self.pipes {
            pipe.changes = PipeChanges::empty();
            for plane in &mut pipe.planes {
                plane.confirm(PlaneChanges::all());
            }
        }

        for output in &mut self.outputs {
            if output.needs_modeset() {
                let crtc = output.pending_pipe().map(|pipe| self.pipes[pipe.index()].crtc());
                info!(output = output.name(), ?crtc, "Output bound");
                output.confirm(crtc);
            }
            output.confirm_scaling_mode();
        }
    }
}
