use std::io;
use std::os::unix::io::{AsFd, BorrowedFd};

use drm::control::{
    self, atomic::AtomicModeReq, connector, crtc, encoder, framebuffer, plane, property,
    Device as ControlDevice, ResourceHandle,
};
use drm::Device as BasicDevice;
use tracing::{error, info, trace};

use super::{
    BlobId, ClientCapability, ConnectionState, ConnectorId, ConnectorInfo, ConnectorKind, CrtcId, CrtcInfo,
    EncoderId, EncoderInfo, Framebuffer, FramebufferId, KmsDevice, ObjectRef, PlaneId, PlaneInfo, PropertyId,
    PropertyInfo, PropertyKind, Resources,
};
use crate::commit::{AtomicCommitFlags, AtomicRequest};
use crate::mode::{ModeFlags, ModeInfo, ModeTypeFlags};
use crate::pipe::{PipeId, PipeMask};

/// [`KmsDevice`] backed by an open drm node
///
/// On creation the device tries to become drm master and drops the master lock again
/// when it is dropped.
#[derive(Debug)]
pub struct DrmKmsDevice<A: AsFd> {
    fd: A,
    privileged: bool,
}

impl<A: AsFd> AsFd for DrmKmsDevice<A> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
impl<A: AsFd> BasicDevice for DrmKmsDevice<A> {}
impl<A: AsFd> ControlDevice for DrmKmsDevice<A> {}

impl<A: AsFd> DrmKmsDevice<A> {
    /// Wrap an open drm node
    pub fn new(fd: A) -> Self {
        let mut dev = DrmKmsDevice { fd, privileged: false };
        // we want to modeset, so we better be the master, if we run via a tty session
        if dev.acquire_master_lock().is_err() {
            info!("Unable to become drm master, assuming unprivileged mode");
        } else {
            dev.privileged = true;
        }
        dev
    }

    /// Whether the device holds the drm master lock
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// The wrapped file descriptor
    pub fn fd(&self) -> &A {
        &self.fd
    }
}

impl<A: AsFd> Drop for DrmKmsDevice<A> {
    fn drop(&mut self) {
        if self.privileged {
            if let Err(err) = self.release_master_lock() {
                error!("Failed to drop drm master state. Error: {}", err);
            }
        }
    }
}

fn handle<T: From<control::RawResourceHandle>>(raw: u32) -> io::Result<T> {
    control::from_u32(raw).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
}

fn raw<T: Into<control::RawResourceHandle>>(handle: T) -> u32 {
    handle.into().get()
}

fn mode_from_drm(mode: control::Mode) -> ModeInfo {
    let raw: drm_ffi::drm_mode_modeinfo = mode.into();
    let name = raw.name.iter().take_while(|c| **c != 0).map(|c| *c as u8).collect::<Vec<_>>();
    ModeInfo {
        clock: raw.clock,
        hdisplay: raw.hdisplay,
        hsync_start: raw.hsync_start,
        hsync_end: raw.hsync_end,
        htotal: raw.htotal,
        hskew: raw.hskew,
        vdisplay: raw.vdisplay,
        vsync_start: raw.vsync_start,
        vsync_end: raw.vsync_end,
        vtotal: raw.vtotal,
        vscan: raw.vscan,
        vrefresh: raw.vrefresh,
        flags: ModeFlags::from_bits_truncate(raw.flags),
        mode_type: ModeTypeFlags::from_bits_truncate(raw.type_),
        name: String::from_utf8_lossy(&name).into_owned(),
    }
}

fn mode_to_drm(mode: &ModeInfo) -> control::Mode {
    let mut name = [0 as libc::c_char; 32];
    for (dst, src) in name.iter_mut().zip(mode.name.bytes().take(31)) {
        *dst = src as libc::c_char;
    }
    control::Mode::from(drm_ffi::drm_mode_modeinfo {
        clock: mode.clock,
        hdisplay: mode.hdisplay,
        hsync_start: mode.hsync_start,
        hsync_end: mode.hsync_end,
        htotal: mode.htotal,
        hskew: mode.hskew,
        vdisplay: mode.vdisplay,
        vsync_start: mode.vsync_start,
        vsync_end: mode.vsync_end,
        vtotal: mode.vtotal,
        vscan: mode.vscan,
        vrefresh: mode.vrefresh,
        flags: mode.flags.bits(),
        type_: mode.mode_type.bits(),
        name,
    })
}

fn connector_kind(interface: connector::Interface) -> ConnectorKind {
    use connector::Interface;

    match interface {
        Interface::VGA => ConnectorKind::VGA,
        Interface::DVII => ConnectorKind::DVII,
        Interface::DVID => ConnectorKind::DVID,
        Interface::DVIA => ConnectorKind::DVIA,
        Interface::Composite => ConnectorKind::Composite,
        Interface::SVideo => ConnectorKind::SVideo,
        Interface::LVDS => ConnectorKind::LVDS,
        Interface::Component => ConnectorKind::Component,
        Interface::NinePinDIN => ConnectorKind::NinePinDIN,
        Interface::DisplayPort => ConnectorKind::DisplayPort,
        Interface::HDMIA => ConnectorKind::HDMIA,
        Interface::HDMIB => ConnectorKind::HDMIB,
        Interface::TV => ConnectorKind::TV,
        Interface::EmbeddedDisplayPort => ConnectorKind::EmbeddedDisplayPort,
        Interface::Virtual => ConnectorKind::Virtual,
        Interface::DSI => ConnectorKind::DSI,
        Interface::DPI => ConnectorKind::DPI,
        Interface::Writeback => ConnectorKind::Writeback,
        Interface::SPI => ConnectorKind::SPI,
        Interface::USB => ConnectorKind::USB,
        _ => ConnectorKind::Unknown,
    }
}

fn enum_values(values: &property::EnumValues) -> Vec<(String, u64)> {
    let (_, entries) = values.values();
    entries
        .iter()
        .map(|entry| (entry.name().to_string_lossy().into_owned(), entry.value()))
        .collect()
}

impl<A: AsFd> DrmKmsDevice<A> {
    fn pipe_mask(&self, filter: control::CrtcListFilter) -> io::Result<PipeMask> {
        let resources = ControlDevice::resource_handles(self)?;
        let allowed = resources.filter_crtcs(filter);
        Ok(resources
            .crtcs()
            .iter()
            .take(PipeId::MAX)
            .enumerate()
            .filter(|(_, crtc)| allowed.contains(crtc))
            .map(|(idx, _)| PipeId::from_index(idx))
            .collect())
    }

    fn raw_object(&self, object: ObjectRef) -> io::Result<control::RawResourceHandle> {
        Ok(match object {
            ObjectRef::Plane(id) => handle::<plane::Handle>(id.0)?.into(),
            ObjectRef::Crtc(id) => handle::<crtc::Handle>(id.0)?.into(),
            ObjectRef::Connector(id) => handle::<connector::Handle>(id.0)?.into(),
        })
    }

    fn properties_of<T: ResourceHandle>(&self, handle: T) -> io::Result<Vec<(PropertyId, u64)>> {
        let props = self.get_properties(handle)?;
        Ok(props
            .into_iter()
            .map(|(prop, value)| (PropertyId(raw(prop)), value))
            .collect())
    }
}

impl<A: AsFd> KmsDevice for DrmKmsDevice<A> {
    fn enable_client_capability(&self, cap: ClientCapability) -> io::Result<()> {
        let cap = match cap {
            ClientCapability::UniversalPlanes => drm::ClientCapability::UniversalPlanes,
            ClientCapability::Atomic => drm::ClientCapability::Atomic,
        };
        self.set_client_capability(cap, true)
    }

    fn resources(&self) -> io::Result<Resources> {
        let res = ControlDevice::resource_handles(self)?;
        Ok(Resources {
            crtcs: res.crtcs().iter().map(|h| CrtcId(raw(*h))).collect(),
            connectors: res.connectors().iter().map(|h| ConnectorId(raw(*h))).collect(),
            encoders: res.encoders().iter().map(|h| EncoderId(raw(*h))).collect(),
        })
    }

    fn plane_ids(&self) -> io::Result<Vec<PlaneId>> {
        Ok(self
            .plane_handles()?
            .into_iter()
            .map(|h| PlaneId(raw(h)))
            .collect())
    }

    fn connector(&self, id: ConnectorId, force_probe: bool) -> io::Result<ConnectorInfo> {
        let info = self.get_connector(handle::<connector::Handle>(id.0)?, force_probe)?;
        Ok(ConnectorInfo {
            id,
            kind: connector_kind(info.interface()),
            kind_id: info.interface_id(),
            state: match info.state() {
                connector::State::Connected => ConnectionState::Connected,
                connector::State::Disconnected => ConnectionState::Disconnected,
                connector::State::Unknown => ConnectionState::Unknown,
            },
            modes: info.modes().iter().copied().map(mode_from_drm).collect(),
            encoders: info.encoders().iter().map(|h| EncoderId(raw(*h))).collect(),
            current_encoder: info.current_encoder().map(|h| EncoderId(raw(h))),
        })
    }

    fn encoder(&self, id: EncoderId) -> io::Result<EncoderInfo> {
        let info = self.get_encoder(handle::<encoder::Handle>(id.0)?)?;
        Ok(EncoderInfo {
            id,
            crtc: info.crtc().map(|h| CrtcId(raw(h))),
            possible_crtcs: self.pipe_mask(info.possible_crtcs())?,
        })
    }

    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo> {
        let info = self.get_crtc(handle::<crtc::Handle>(id.0)?)?;
        Ok(CrtcInfo {
            id,
            mode: info.mode().map(mode_from_drm),
            framebuffer: info.framebuffer().map(|h| FramebufferId(raw(h))),
        })
    }

    fn plane(&self, id: PlaneId) -> io::Result<PlaneInfo> {
        let info = self.get_plane(handle::<plane::Handle>(id.0)?)?;
        Ok(PlaneInfo {
            id,
            crtc: info.crtc().map(|h| CrtcId(raw(h))),
            framebuffer: info.framebuffer().map(|h| FramebufferId(raw(h))),
            possible_crtcs: self.pipe_mask(info.possible_crtcs())?,
        })
    }

    fn object_properties(&self, object: ObjectRef) -> io::Result<Vec<(PropertyId, u64)>> {
        match object {
            ObjectRef::Plane(id) => self.properties_of(handle::<plane::Handle>(id.0)?),
            ObjectRef::Crtc(id) => self.properties_of(handle::<crtc::Handle>(id.0)?),
            ObjectRef::Connector(id) => self.properties_of(handle::<connector::Handle>(id.0)?),
        }
    }

    fn property(&self, id: PropertyId) -> io::Result<PropertyInfo> {
        let info = self.get_property(handle::<property::Handle>(id.0)?)?;
        let kind = match info.value_type() {
            property::ValueType::Boolean => PropertyKind::Boolean,
            property::ValueType::UnsignedRange(min, max) => PropertyKind::Range { min, max },
            property::ValueType::SignedRange(min, max) => PropertyKind::SignedRange { min, max },
            property::ValueType::Enum(values) => PropertyKind::Enum(enum_values(&values)),
            // bit names are not reported for bitmask properties
            property::ValueType::Bitmask => PropertyKind::Bitmask(Vec::new()),
            property::ValueType::Blob => PropertyKind::Blob,
            property::ValueType::Object
            | property::ValueType::CRTC
            | property::ValueType::Connector
            | property::ValueType::Encoder
            | property::ValueType::Framebuffer
            | property::ValueType::Plane
            | property::ValueType::Property => PropertyKind::Object,
            _ => PropertyKind::Unknown,
        };
        Ok(PropertyInfo {
            id,
            name: info.name().to_string_lossy().into_owned(),
            kind,
        })
    }

    fn create_blob(&self, data: &[u8]) -> io::Result<BlobId> {
        let mut data = data.to_vec();
        let blob = drm_ffi::mode::create_property_blob(self.as_fd(), &mut data)?;
        trace!(blob = blob.blob_id, len = data.len(), "Created property blob");
        Ok(BlobId(blob.blob_id))
    }

    fn create_mode_blob(&self, mode: &ModeInfo) -> io::Result<BlobId> {
        match self.create_property_blob(&mode_to_drm(mode))? {
            property::Value::Blob(id) => Ok(BlobId(id as u32)),
            _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }

    fn destroy_blob(&self, blob: BlobId) -> io::Result<()> {
        self.destroy_property_blob(blob.0 as u64)
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        fb: Option<FramebufferId>,
        pos: (u32, u32),
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> io::Result<()> {
        let fb = fb.map(|fb| handle::<framebuffer::Handle>(fb.0)).transpose()?;
        let connectors = connectors
            .iter()
            .map(|conn| handle::<connector::Handle>(conn.0))
            .collect::<io::Result<Vec<_>>>()?;
        ControlDevice::set_crtc(
            self,
            handle::<crtc::Handle>(crtc.0)?,
            fb,
            pos,
            &connectors,
            mode.map(mode_to_drm),
        )
    }

    fn set_plane(
        &self,
        plane: PlaneId,
        crtc: CrtcId,
        fb: Option<FramebufferId>,
        dst: (i32, i32, u32, u32),
        src: (u32, u32, u32, u32),
    ) -> io::Result<()> {
        let fb = fb.map(|fb| handle::<framebuffer::Handle>(fb.0)).transpose()?;
        ControlDevice::set_plane(
            self,
            handle::<plane::Handle>(plane.0)?,
            handle::<crtc::Handle>(crtc.0)?,
            fb,
            0,
            dst,
            src,
        )
    }

    fn set_cursor(&self, crtc: CrtcId, fb: Option<&Framebuffer>) -> io::Result<()> {
        // the legacy cursor ioctl takes a gem handle instead of a framebuffer
        let (buffer, width, height) = match fb {
            Some(fb) => {
                let info = self.get_framebuffer(handle::<framebuffer::Handle>(fb.id.0)?)?;
                let buffer = info
                    .buffer()
                    .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
                (u32::from(buffer), fb.width, fb.height)
            }
            None => (0, 0, 0),
        };
        #[allow(deprecated)]
        drm_ffi::mode::set_cursor(self.as_fd(), crtc.0, buffer, width, height)?;
        Ok(())
    }

    #[allow(deprecated)]
    fn move_cursor(&self, crtc: CrtcId, pos: (i32, i32)) -> io::Result<()> {
        ControlDevice::move_cursor(self, handle::<crtc::Handle>(crtc.0)?, pos)
    }

    fn set_object_property(&self, object: ObjectRef, property: PropertyId, value: u64) -> io::Result<()> {
        let prop = handle::<property::Handle>(property.0)?;
        match object {
            ObjectRef::Plane(id) => self.set_property(handle::<plane::Handle>(id.0)?, prop, value),
            ObjectRef::Crtc(id) => self.set_property(handle::<crtc::Handle>(id.0)?, prop, value),
            ObjectRef::Connector(id) => self.set_property(handle::<connector::Handle>(id.0)?, prop, value),
        }
    }

    fn atomic_commit(&self, flags: AtomicCommitFlags, request: &AtomicRequest) -> io::Result<()> {
        let mut req = AtomicModeReq::new();
        for (object, props) in request.objects() {
            let object = self.raw_object(object)?;
            for (prop, value) in props {
                req.add_raw_property(object, handle::<property::Handle>(prop.0)?, *value);
            }
        }
        let flags = control::AtomicCommitFlags::from_bits_truncate(flags.bits());
        ControlDevice::atomic_commit(self, flags, req)
    }
}
