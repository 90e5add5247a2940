//! In-memory [`KmsDevice`] used by the unit tests
//!
//! Object ids are allocated from disjoint ranges so a mixed up id fails loudly.
//! Every mutating driver call that succeeds is recorded as a [`Call`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;

use super::{
    BlobId, ClientCapability, ConnectionState, ConnectorId, ConnectorInfo, ConnectorKind, CrtcId, CrtcInfo,
    EncoderId, EncoderInfo, Framebuffer, FramebufferId, KmsDevice, ObjectRef, PlaneId, PlaneInfo, PropertyId,
    PropertyInfo, PropertyKind, Resources,
};
use crate::commit::{AtomicCommitFlags, AtomicRequest};
use crate::mode::{ModeFlags, ModeInfo, ModeTypeFlags};
use crate::pipe::PipeMask;
use crate::plane::PlaneKind;

const CRTC_BASE: u32 = 100;
const CONNECTOR_BASE: u32 = 200;
const ENCODER_BASE: u32 = 300;
const PLANE_BASE: u32 = 400;
const PROPERTY_BASE: u32 = 1000;
const BLOB_BASE: u32 = 2000;

const PLANE_PROPERTIES: &[&str] = &[
    "type", "FB_ID", "CRTC_ID", "SRC_X", "SRC_Y", "SRC_W", "SRC_H", "CRTC_X", "CRTC_Y", "CRTC_W", "CRTC_H",
    "rotation",
];
const CRTC_PROPERTIES: &[&str] = &[
    "ACTIVE",
    "MODE_ID",
    "OUT_FENCE_PTR",
    "background_color",
    "DEGAMMA_LUT",
    "CTM",
    "GAMMA_LUT",
];
const CONNECTOR_PROPERTIES: &[&str] = &["EDID", "DPMS", "CRTC_ID", "scaling mode"];

/// The 1080p60 CEA mode
pub fn mode_1080p() -> ModeInfo {
    ModeInfo {
        clock: 148500,
        hdisplay: 1920,
        hsync_start: 2008,
        hsync_end: 2052,
        htotal: 2200,
        hskew: 0,
        vdisplay: 1080,
        vsync_start: 1084,
        vsync_end: 1089,
        vtotal: 1125,
        vscan: 0,
        vrefresh: 60,
        flags: ModeFlags::PHSYNC | ModeFlags::PVSYNC,
        mode_type: ModeTypeFlags::PREFERRED | ModeTypeFlags::DRIVER,
        name: "1920x1080".into(),
    }
}

fn property_kind(name: &str) -> PropertyKind {
    let values = |names: &[&str]| {
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.to_string(), idx as u64))
            .collect::<Vec<_>>()
    };
    match name {
        "type" => PropertyKind::Enum(values(&["Overlay", "Primary", "Cursor"])),
        "rotation" => PropertyKind::Bitmask(values(&["rotate-0", "rotate-90", "rotate-180", "rotate-270"])),
        "scaling mode" => PropertyKind::Enum(values(&["None", "Full", "Center", "Full aspect"])),
        "DPMS" => PropertyKind::Enum(values(&["On", "Standby", "Suspend", "Off"])),
        "FB_ID" | "CRTC_ID" => PropertyKind::Object,
        "ACTIVE" => PropertyKind::Boolean,
        "CRTC_X" | "CRTC_Y" => PropertyKind::SignedRange {
            min: i32::MIN as i64,
            max: i32::MAX as i64,
        },
        "MODE_ID" | "EDID" | "DEGAMMA_LUT" | "CTM" | "GAMMA_LUT" => PropertyKind::Blob,
        "OUT_FENCE_PTR" => PropertyKind::Range { min: 0, max: u64::MAX },
        _ => PropertyKind::Range {
            min: 0,
            max: u32::MAX as u64,
        },
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// A recorded driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetCrtc {
        crtc: CrtcId,
        fb: Option<FramebufferId>,
        pos: (u32, u32),
        connectors: Vec<ConnectorId>,
        mode: Option<ModeInfo>,
    },
    SetPlane {
        plane: PlaneId,
        crtc: CrtcId,
        fb: Option<FramebufferId>,
        dst: (i32, i32, u32, u32),
        src: (u32, u32, u32, u32),
    },
    SetCursor {
        crtc: CrtcId,
        fb: Option<FramebufferId>,
    },
    MoveCursor {
        crtc: CrtcId,
        pos: (i32, i32),
    },
    SetProperty {
        object: ObjectRef,
        property: PropertyId,
        value: u64,
    },
    AtomicCommit {
        flags: AtomicCommitFlags,
        request: AtomicRequest,
    },
}

/// Description of a mocked connector
#[derive(Debug, Clone)]
pub struct MockConnector {
    kind: ConnectorKind,
    state: ConnectionState,
    possible: Option<u32>,
    bound: Option<usize>,
    modes: Vec<ModeInfo>,
}

impl MockConnector {
    /// A connected HDMI connector offering 1080p
    pub fn connected() -> MockConnector {
        MockConnector {
            kind: ConnectorKind::HDMIA,
            state: ConnectionState::Connected,
            possible: None,
            bound: None,
            modes: vec![mode_1080p()],
        }
    }

    /// An HDMI connector without sink
    pub fn disconnected() -> MockConnector {
        MockConnector {
            state: ConnectionState::Disconnected,
            modes: Vec::new(),
            ..MockConnector::connected()
        }
    }

    pub fn kind(mut self, kind: ConnectorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Pipes the encoder of this connector can use
    pub fn possible(mut self, bits: u32) -> Self {
        self.possible = Some(bits);
        self
    }

    /// Start out lit on the given pipe, with the first mode
    pub fn bound_to(mut self, pipe: usize) -> Self {
        self.bound = Some(pipe);
        self
    }

    pub fn modes(mut self, modes: Vec<ModeInfo>) -> Self {
        self.modes = modes;
        self
    }
}

/// Builder for a [`MockDevice`]
#[derive(Debug, Clone)]
pub struct MockBuilder {
    pipes: usize,
    overlays: usize,
    cursor: bool,
    atomic: bool,
    universal: bool,
    connectors: Vec<MockConnector>,
    without_crtc: Vec<&'static str>,
    without_plane: Vec<&'static str>,
}

impl MockBuilder {
    pub fn pipes(mut self, count: usize) -> Self {
        self.pipes = count;
        self
    }

    /// Overlay planes per pipe
    pub fn overlays(mut self, count: usize) -> Self {
        self.overlays = count;
        self
    }

    pub fn cursor(mut self, cursor: bool) -> Self {
        self.cursor = cursor;
        self
    }

    /// Whether the atomic capability can be enabled
    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    /// Whether the universal planes capability can be enabled
    pub fn universal(mut self, universal: bool) -> Self {
        self.universal = universal;
        self
    }

    pub fn connector(mut self, connector: MockConnector) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn without_crtc_property(mut self, name: &'static str) -> Self {
        self.without_crtc.push(name);
        self
    }

    pub fn without_plane_property(mut self, name: &'static str) -> Self {
        self.without_plane.push(name);
        self
    }

    pub fn build(self) -> MockDevice {
        let mut properties: Vec<PropertyInfo> = Vec::new();
        let mut intern = |name: &str| -> PropertyId {
            match properties.iter().find(|prop| prop.name == name) {
                Some(prop) => prop.id,
                None => {
                    let id = PropertyId(PROPERTY_BASE + 1 + properties.len() as u32);
                    properties.push(PropertyInfo {
                        id,
                        name: name.to_string(),
                        kind: property_kind(name),
                    });
                    id
                }
            }
        };
        let mut props_of = |names: &[&str], without: &[&str]| {
            names
                .iter()
                .filter(|name| !without.iter().any(|w| *w == **name))
                .map(|name| intern(name))
                .collect::<Vec<_>>()
        };
        let plane_props = props_of(PLANE_PROPERTIES, &self.without_plane);
        let crtc_props = props_of(CRTC_PROPERTIES, &self.without_crtc);
        let connector_props = props_of(CONNECTOR_PROPERTIES, &[]);

        let crtcs = (0..self.pipes)
            .map(|idx| CrtcId(CRTC_BASE + 1 + idx as u32))
            .collect::<Vec<_>>();

        let mut planes = Vec::new();
        for pipe in 0..self.pipes {
            let mut kinds = vec![PlaneKind::Primary];
            kinds.extend(std::iter::repeat(PlaneKind::Overlay).take(self.overlays));
            if self.cursor {
                kinds.push(PlaneKind::Cursor);
            }
            for kind in kinds {
                planes.push(MockPlane {
                    id: PlaneId(PLANE_BASE + 1 + planes.len() as u32),
                    pipe,
                    kind,
                });
            }
        }

        let mut kind_ids: HashMap<ConnectorKind, u32> = HashMap::new();
        let mut bindings = HashMap::new();
        let mut crtc_modes = vec![None; self.pipes];
        let connectors = self
            .connectors
            .into_iter()
            .enumerate()
            .map(|(idx, spec)| {
                let kind_id = kind_ids.entry(spec.kind).or_insert(0);
                *kind_id += 1;
                let id = ConnectorId(CONNECTOR_BASE + 1 + idx as u32);
                if let Some(pipe) = spec.bound {
                    bindings.insert(id, crtcs[pipe]);
                    crtc_modes[pipe] = Some(spec.modes.first().cloned().unwrap_or_else(ModeInfo::fallback));
                }
                MockConnectorState {
                    id,
                    encoder: EncoderId(ENCODER_BASE + 1 + idx as u32),
                    kind_id: *kind_id,
                    possible: spec
                        .possible
                        .map(PipeMask::from_bits)
                        .unwrap_or_else(|| PipeMask::first_n(self.pipes)),
                    spec,
                }
            })
            .collect();

        MockDevice {
            crtcs,
            planes,
            connectors,
            properties,
            plane_props,
            crtc_props,
            connector_props,
            supports_atomic: self.atomic,
            supports_universal: self.universal,
            atomic_enabled: Cell::new(false),
            universal_enabled: Cell::new(false),
            crtc_modes: RefCell::new(crtc_modes),
            bindings: RefCell::new(bindings),
            blobs: RefCell::new(BTreeMap::new()),
            next_blob: Cell::new(BLOB_BASE + 1),
            created_blobs: Cell::new(0),
            calls: RefCell::new(Vec::new()),
            mutations: Cell::new(0),
            fail_at: Cell::new(None),
            fail_forced_probe: Cell::new(false),
            atomic_hook: RefCell::new(None),
        }
    }
}

#[derive(Debug, Clone)]
struct MockPlane {
    id: PlaneId,
    pipe: usize,
    kind: PlaneKind,
}

#[derive(Debug, Clone)]
struct MockConnectorState {
    id: ConnectorId,
    encoder: EncoderId,
    kind_id: u32,
    possible: PipeMask,
    spec: MockConnector,
}

#[derive(Debug, Clone)]
enum Blob {
    Data(Vec<u8>),
    Mode(ModeInfo),
}

type AtomicHook = Box<dyn Fn(AtomicCommitFlags, &AtomicRequest) -> io::Result<()>>;

/// A fake drm device
pub struct MockDevice {
    crtcs: Vec<CrtcId>,
    planes: Vec<MockPlane>,
    connectors: Vec<MockConnectorState>,
    properties: Vec<PropertyInfo>,
    plane_props: Vec<PropertyId>,
    crtc_props: Vec<PropertyId>,
    connector_props: Vec<PropertyId>,
    supports_atomic: bool,
    supports_universal: bool,
    atomic_enabled: Cell<bool>,
    universal_enabled: Cell<bool>,
    crtc_modes: RefCell<Vec<Option<ModeInfo>>>,
    bindings: RefCell<HashMap<ConnectorId, CrtcId>>,
    blobs: RefCell<BTreeMap<BlobId, Blob>>,
    next_blob: Cell<u32>,
    created_blobs: Cell<usize>,
    calls: RefCell<Vec<Call>>,
    mutations: Cell<usize>,
    fail_at: Cell<Option<usize>>,
    fail_forced_probe: Cell<bool>,
    atomic_hook: RefCell<Option<AtomicHook>>,
}

impl fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDevice")
            .field("crtcs", &self.crtcs)
            .field("planes", &self.planes)
            .field("connectors", &self.connectors)
            .field("atomic_enabled", &self.atomic_enabled)
            .field("universal_enabled", &self.universal_enabled)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl MockDevice {
    pub fn builder() -> MockBuilder {
        MockBuilder {
            pipes: 1,
            overlays: 0,
            cursor: true,
            atomic: false,
            universal: true,
            connectors: Vec::new(),
            without_crtc: Vec::new(),
            without_plane: Vec::new(),
        }
    }

    pub fn crtc_ids(&self) -> Vec<CrtcId> {
        self.crtcs.clone()
    }

    pub fn connector_ids(&self) -> Vec<ConnectorId> {
        self.connectors.iter().map(|c| c.id).collect()
    }

    /// Planes of a pipe as currently reported by [`KmsDevice::plane_ids`]
    pub fn plane_ids_of_pipe(&self, pipe: usize) -> Vec<PlaneId> {
        self.visible_planes()
            .filter(|plane| plane.pipe == pipe)
            .map(|plane| plane.id)
            .collect()
    }

    pub fn property_id(&self, name: &str) -> Option<PropertyId> {
        self.properties.iter().find(|prop| prop.name == name).map(|prop| prop.id)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Fail the `index`th mutating call from now on, counting from zero
    pub fn fail_call(&self, index: usize) {
        self.mutations.set(0);
        self.fail_at.set(Some(index));
    }

    pub fn fail_forced_probe(&self, fail: bool) {
        self.fail_forced_probe.set(fail);
    }

    /// Decide the outcome of atomic commits, before they are applied
    pub fn set_atomic_hook<F>(&self, hook: F)
    where
        F: Fn(AtomicCommitFlags, &AtomicRequest) -> io::Result<()> + 'static,
    {
        *self.atomic_hook.borrow_mut() = Some(Box::new(hook));
    }

    pub fn clear_atomic_hook(&self) {
        *self.atomic_hook.borrow_mut() = None;
    }

    pub fn blob_mode(&self, blob: BlobId) -> Option<ModeInfo> {
        match self.blobs.borrow().get(&blob) {
            Some(Blob::Mode(mode)) => Some(mode.clone()),
            _ => None,
        }
    }

    pub fn blob_data(&self, blob: BlobId) -> Option<Vec<u8>> {
        match self.blobs.borrow().get(&blob) {
            Some(Blob::Data(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Blobs created and not destroyed yet, in ascending order
    pub fn live_blobs(&self) -> Vec<BlobId> {
        self.blobs.borrow().keys().copied().collect()
    }

    /// Number of blobs ever created
    pub fn created_blobs(&self) -> usize {
        self.created_blobs.get()
    }

    /// Mode the crtc of a pipe is currently running
    pub fn crtc_mode(&self, pipe: usize) -> Option<ModeInfo> {
        self.crtc_modes.borrow()[pipe].clone()
    }

    fn visible_planes(&self) -> impl Iterator<Item = &MockPlane> {
        let universal = self.universal_enabled.get();
        self.planes
            .iter()
            .filter(move |plane| universal || plane.kind == PlaneKind::Overlay)
    }

    fn pipe_of(&self, crtc: CrtcId) -> io::Result<usize> {
        self.crtcs
            .iter()
            .position(|c| *c == crtc)
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn connector_state(&self, id: ConnectorId) -> io::Result<&MockConnectorState> {
        self.connectors
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn mutate(&self, call: Call) -> io::Result<()> {
        let index = self.mutations.get();
        self.mutations.set(index + 1);
        if self.fail_at.get() == Some(index) {
            self.fail_at.set(None);
            return Err(errno(libc::EINVAL));
        }
        self.calls.borrow_mut().push(call);
        Ok(())
    }

    fn bind(&self, crtc: CrtcId, connectors: &[ConnectorId], mode: Option<ModeInfo>) -> io::Result<()> {
        let pipe = self.pipe_of(crtc)?;
        let mut bindings = self.bindings.borrow_mut();
        bindings.retain(|_, bound| *bound != crtc);
        for connector in connectors {
            bindings.insert(*connector, crtc);
        }
        self.crtc_modes.borrow_mut()[pipe] = mode;
        Ok(())
    }

    fn apply_atomic(&self, request: &AtomicRequest) -> io::Result<()> {
        let active = self.property_id("ACTIVE");
        let mode_id = self.property_id("MODE_ID");
        let crtc_id = self.property_id("CRTC_ID");

        for (object, props) in request.objects() {
            match object {
                ObjectRef::Crtc(crtc) => {
                    let pipe = self.pipe_of(crtc)?;
                    for (prop, value) in props {
                        if Some(*prop) == mode_id {
                            self.crtc_modes.borrow_mut()[pipe] = self.blob_mode(BlobId(*value as u32));
                        } else if Some(*prop) == active && *value == 0 {
                            self.crtc_modes.borrow_mut()[pipe] = None;
                        }
                    }
                }
                ObjectRef::Connector(connector) => {
                    for (prop, value) in props {
                        if Some(*prop) == crtc_id {
                            let mut bindings = self.bindings.borrow_mut();
                            if *value == 0 {
                                bindings.remove(&connector);
                            } else {
                                bindings.insert(connector, CrtcId(*value as u32));
                            }
                        }
                    }
                }
                ObjectRef::Plane(_) => {}
            }
        }
        Ok(())
    }
}

impl KmsDevice for MockDevice {
    fn enable_client_capability(&self, cap: ClientCapability) -> io::Result<()> {
        match cap {
            ClientCapability::Atomic if self.supports_atomic => {
                self.atomic_enabled.set(true);
                self.universal_enabled.set(true);
                Ok(())
            }
            ClientCapability::UniversalPlanes if self.supports_universal => {
                self.universal_enabled.set(true);
                Ok(())
            }
            _ => Err(errno(libc::EINVAL)),
        }
    }

    fn resources(&self) -> io::Result<Resources> {
        Ok(Resources {
            crtcs: self.crtcs.clone(),
            connectors: self.connector_ids(),
            encoders: self.connectors.iter().map(|c| c.encoder).collect(),
        })
    }

    fn plane_ids(&self) -> io::Result<Vec<PlaneId>> {
        Ok(self.visible_planes().map(|plane| plane.id).collect())
    }

    fn connector(&self, id: ConnectorId, force_probe: bool) -> io::Result<ConnectorInfo> {
        if force_probe && self.fail_forced_probe.get() {
            return Err(errno(libc::EIO));
        }
        let state = self.connector_state(id)?;
        let bound = self.bindings.borrow().contains_key(&id);
        Ok(ConnectorInfo {
            id,
            kind: state.spec.kind,
            kind_id: state.kind_id,
            state: state.spec.state,
            modes: state.spec.modes.clone(),
            encoders: vec![state.encoder],
            current_encoder: bound.then_some(state.encoder),
        })
    }

    fn encoder(&self, id: EncoderId) -> io::Result<EncoderInfo> {
        let state = self
            .connectors
            .iter()
            .find(|c| c.encoder == id)
            .ok_or_else(|| errno(libc::ENOENT))?;
        Ok(EncoderInfo {
            id,
            crtc: self.bindings.borrow().get(&state.id).copied(),
            possible_crtcs: state.possible,
        })
    }

    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo> {
        let pipe = self.pipe_of(id)?;
        Ok(CrtcInfo {
            id,
            mode: self.crtc_modes.borrow()[pipe].clone(),
            framebuffer: None,
        })
    }

    fn plane(&self, id: PlaneId) -> io::Result<PlaneInfo> {
        let plane = self
            .planes
            .iter()
            .find(|plane| plane.id == id)
            .ok_or_else(|| errno(libc::ENOENT))?;
        Ok(PlaneInfo {
            id,
            crtc: None,
            framebuffer: None,
            possible_crtcs: PipeMask::from_bits(1 << plane.pipe),
        })
    }

    fn object_properties(&self, object: ObjectRef) -> io::Result<Vec<(PropertyId, u64)>> {
        match object {
            ObjectRef::Plane(id) => {
                let plane = self
                    .planes
                    .iter()
                    .find(|plane| plane.id == id)
                    .ok_or_else(|| errno(libc::ENOENT))?;
                let kind = match plane.kind {
                    PlaneKind::Overlay => 0,
                    PlaneKind::Primary => 1,
                    PlaneKind::Cursor => 2,
                };
                Ok(self.values(&self.plane_props, |name| match name {
                    "type" => kind,
                    "rotation" => 1,
                    _ => 0,
                }))
            }
            ObjectRef::Crtc(id) => {
                let pipe = self.pipe_of(id)?;
                let active = self.crtc_modes.borrow()[pipe].is_some() as u64;
                Ok(self.values(&self.crtc_props, |name| if name == "ACTIVE" { active } else { 0 }))
            }
            ObjectRef::Connector(id) => {
                self.connector_state(id)?;
                let crtc = self.bindings.borrow().get(&id).map_or(0, |crtc| crtc.0 as u64);
                Ok(self.values(&self.connector_props, |name| if name == "CRTC_ID" { crtc } else { 0 }))
            }
        }
    }

    fn property(&self, id: PropertyId) -> io::Result<PropertyInfo> {
        self.properties
            .iter()
            .find(|prop| prop.id == id)
            .cloned()
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn create_blob(&self, data: &[u8]) -> io::Result<BlobId> {
        Ok(self.insert_blob(Blob::Data(data.to_vec())))
    }

    fn create_mode_blob(&self, mode: &ModeInfo) -> io::Result<BlobId> {
        Ok(self.insert_blob(Blob::Mode(mode.clone())))
    }

    fn destroy_blob(&self, blob: BlobId) -> io::Result<()> {
        self.blobs
            .borrow_mut()
            .remove(&blob)
            .map(|_| ())
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        fb: Option<FramebufferId>,
        pos: (u32, u32),
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> io::Result<()> {
        self.pipe_of(crtc)?;
        self.mutate(Call::SetCrtc {
            crtc,
            fb,
            pos,
            connectors: connectors.to_vec(),
            mode: mode.cloned(),
        })?;
        self.bind(crtc, connectors, mode.cloned())
    }

    fn set_plane(
        &self,
        plane: PlaneId,
        crtc: CrtcId,
        fb: Option<FramebufferId>,
        dst: (i32, i32, u32, u32),
        src: (u32, u32, u32, u32),
    ) -> io::Result<()> {
        self.mutate(Call::SetPlane {
            plane,
            crtc,
            fb,
            dst,
            src,
        })
    }

    fn set_cursor(&self, crtc: CrtcId, fb: Option<&Framebuffer>) -> io::Result<()> {
        self.mutate(Call::SetCursor {
            crtc,
            fb: fb.map(|fb| fb.id),
        })
    }

    fn move_cursor(&self, crtc: CrtcId, pos: (i32, i32)) -> io::Result<()> {
        self.mutate(Call::MoveCursor { crtc, pos })
    }

    fn set_object_property(&self, object: ObjectRef, property: PropertyId, value: u64) -> io::Result<()> {
        self.mutate(Call::SetProperty {
            object,
            property,
            value,
        })
    }

    fn atomic_commit(&self, flags: AtomicCommitFlags, request: &AtomicRequest) -> io::Result<()> {
        if !self.atomic_enabled.get() {
            return Err(errno(libc::EINVAL));
        }
        if let Some(hook) = self.atomic_hook.borrow().as_ref() {
            hook(flags, request)?;
        }
        self.mutate(Call::AtomicCommit {
            flags,
            request: request.clone(),
        })?;
        if !flags.contains(AtomicCommitFlags::TEST_ONLY) {
            self.apply_atomic(request)?;
        }
        Ok(())
    }
}

impl MockDevice {
    fn values(&self, ids: &[PropertyId], value_of: impl Fn(&str) -> u64) -> Vec<(PropertyId, u64)> {
        ids.iter()
            .map(|id| {
                let name = self
                    .properties
                    .iter()
                    .find(|prop| prop.id == *id)
                    .map_or("", |prop| prop.name.as_str());
                (*id, value_of(name))
            })
            .collect()
    }

    fn insert_blob(&self, blob: Blob) -> BlobId {
        let id = BlobId(self.next_blob.get());
        self.next_blob.set(id.0 + 1);
        self.created_blobs.set(self.created_blobs.get() + 1);
        self.blobs.borrow_mut().insert(id, blob);
        id
    }
}
