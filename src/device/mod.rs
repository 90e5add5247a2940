//! Driver access
//!
//! Everything the display model needs from the kernel goes through the [`KmsDevice`] trait.
//! It is a thin, object-safe mirror of the `drm::control::Device` calls used for modesetting:
//! resource enumeration, property discovery, blob management, the legacy per-object calls
//! and the atomic commit ioctl.
//!
//! The values handed out by a [`KmsDevice`] are plain snapshots ([`ConnectorInfo`],
//! [`EncoderInfo`], ...). They hold no driver handles and never change after creation.
//!
//! With the `backend_drm` feature [`DrmKmsDevice`] implements the trait on top of an open
//! drm node.

use std::fmt;
use std::io;

use crate::commit::{AtomicCommitFlags, AtomicRequest};
use crate::mode::ModeInfo;
use crate::pipe::PipeMask;

#[cfg(feature = "backend_drm")]
mod drm;
#[cfg(feature = "backend_drm")]
pub use self::drm::DrmKmsDevice;

#[cfg(test)]
pub(crate) mod mock;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> u32 {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(
    /// Driver id of a connector
    ConnectorId
);
object_id!(
    /// Driver id of an encoder
    EncoderId
);
object_id!(
    /// Driver id of a crtc
    CrtcId
);
object_id!(
    /// Driver id of a plane
    PlaneId
);
object_id!(
    /// Driver id of a property
    PropertyId
);
object_id!(
    /// Driver id of a framebuffer
    FramebufferId
);
object_id!(
    /// Driver id of a property blob
    BlobId
);

/// A driver object that carries properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    /// A plane
    Plane(PlaneId),
    /// A crtc
    Crtc(CrtcId),
    /// A connector
    Connector(ConnectorId),
}

impl ObjectRef {
    /// Raw driver id of the object
    pub fn raw(&self) -> u32 {
        match self {
            ObjectRef::Plane(id) => id.0,
            ObjectRef::Crtc(id) => id.0,
            ObjectRef::Connector(id) => id.0,
        }
    }
}

/// Client capabilities a display may ask the driver for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientCapability {
    /// Expose primary and cursor planes as regular plane objects
    UniversalPlanes,
    /// Enable the atomic modesetting api
    Atomic,
}

/// Snapshot of the modesetting resources of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    /// Crtcs in driver order. The position of a crtc is its pipe index.
    pub crtcs: Vec<CrtcId>,
    /// Connectors in driver order
    pub connectors: Vec<ConnectorId>,
    /// Encoders in driver order
    pub encoders: Vec<EncoderId>,
}

/// Connection status reported for a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A sink is attached
    Connected,
    /// Nothing is attached
    Disconnected,
    /// The driver cannot tell
    Unknown,
}

/// Type of a connector, as reported by the kernel
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorKind {
    Unknown,
    VGA,
    DVII,
    DVID,
    DVIA,
    Composite,
    SVideo,
    LVDS,
    Component,
    NinePinDIN,
    DisplayPort,
    HDMIA,
    HDMIB,
    TV,
    EmbeddedDisplayPort,
    Virtual,
    DSI,
    DPI,
    Writeback,
    SPI,
    USB,
}

impl ConnectorKind {
    /// Name used by the kernel for this connector type
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Unknown => "Unknown",
            ConnectorKind::VGA => "VGA",
            ConnectorKind::DVII => "DVI-I",
            ConnectorKind::DVID => "DVI-D",
            ConnectorKind::DVIA => "DVI-A",
            ConnectorKind::Composite => "Composite",
            ConnectorKind::SVideo => "SVIDEO",
            ConnectorKind::LVDS => "LVDS",
            ConnectorKind::Component => "Component",
            ConnectorKind::NinePinDIN => "DIN",
            ConnectorKind::DisplayPort => "DP",
            ConnectorKind::HDMIA => "HDMI-A",
            ConnectorKind::HDMIB => "HDMI-B",
            ConnectorKind::TV => "TV",
            ConnectorKind::EmbeddedDisplayPort => "eDP",
            ConnectorKind::Virtual => "Virtual",
            ConnectorKind::DSI => "DSI",
            ConnectorKind::DPI => "DPI",
            ConnectorKind::Writeback => "Writeback",
            ConnectorKind::SPI => "SPI",
            ConnectorKind::USB => "USB",
        }
    }
}

impl From<u32> for ConnectorKind {
    fn from(raw: u32) -> Self {
        match raw {
            1 => ConnectorKind::VGA,
            2 => ConnectorKind::DVII,
            3 => ConnectorKind::DVID,
            4 => ConnectorKind::DVIA,
            5 => ConnectorKind::Composite,
            6 => ConnectorKind::SVideo,
            7 => ConnectorKind::LVDS,
            8 => ConnectorKind::Component,
            9 => ConnectorKind::NinePinDIN,
            10 => ConnectorKind::DisplayPort,
            11 => ConnectorKind::HDMIA,
            12 => ConnectorKind::HDMIB,
            13 => ConnectorKind::TV,
            14 => ConnectorKind::EmbeddedDisplayPort,
            15 => ConnectorKind::Virtual,
            16 => ConnectorKind::DSI,
            17 => ConnectorKind::DPI,
            18 => ConnectorKind::Writeback,
            19 => ConnectorKind::SPI,
            20 => ConnectorKind::USB,
            _ => ConnectorKind::Unknown,
        }
    }
}

/// Snapshot of a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    /// Driver id
    pub id: ConnectorId,
    /// Connector type
    pub kind: ConnectorKind,
    /// Index of this connector among the connectors of the same type (starting at 1)
    pub kind_id: u32,
    /// Connection status
    pub state: ConnectionState,
    /// Modes advertised by the sink, in driver order
    pub modes: Vec<ModeInfo>,
    /// Encoders able to feed this connector
    pub encoders: Vec<EncoderId>,
    /// Encoder currently feeding this connector
    pub current_encoder: Option<EncoderId>,
}

impl ConnectorInfo {
    /// Kernel style name of the connector, e.g. `HDMI-A-1`
    pub fn name(&self) -> String {
        format!("{}-{}", self.kind.as_str(), self.kind_id)
    }
}

/// Snapshot of an encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// Driver id
    pub id: EncoderId,
    /// Crtc currently driving this encoder
    pub crtc: Option<CrtcId>,
    /// Pipes this encoder can be driven by
    pub possible_crtcs: PipeMask,
}

/// Snapshot of a crtc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcInfo {
    /// Driver id
    pub id: CrtcId,
    /// Currently programmed mode, if the crtc is enabled
    pub mode: Option<ModeInfo>,
    /// Currently scanned out framebuffer
    pub framebuffer: Option<FramebufferId>,
}

/// Snapshot of a plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Driver id
    pub id: PlaneId,
    /// Crtc the plane is currently bound to
    pub crtc: Option<CrtcId>,
    /// Framebuffer currently shown by the plane
    pub framebuffer: Option<FramebufferId>,
    /// Pipes this plane can be used on
    pub possible_crtcs: PipeMask,
}

/// Value type of a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    /// Unknown or unsupported type
    Unknown,
    /// Boolean flag
    Boolean,
    /// Unsigned range
    Range {
        /// Minimum value
        min: u64,
        /// Maximum value
        max: u64,
    },
    /// Signed range
    SignedRange {
        /// Minimum value
        min: i64,
        /// Maximum value
        max: i64,
    },
    /// One of the listed values
    Enum(Vec<(String, u64)>),
    /// Any combination of the listed bits. Values are bit positions.
    Bitmask(Vec<(String, u64)>),
    /// Blob id
    Blob,
    /// Id of another driver object
    Object,
}

/// Description of a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Driver id
    pub id: PropertyId,
    /// Name of the property
    pub name: String,
    /// Value type
    pub kind: PropertyKind,
}

/// Opaque reference to a framebuffer created outside of this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framebuffer {
    /// Driver id
    pub id: FramebufferId,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Framebuffer {
    /// Create a new framebuffer reference
    pub fn new(id: impl Into<FramebufferId>, width: u32, height: u32) -> Self {
        Framebuffer {
            id: id.into(),
            width,
            height,
        }
    }
}

/// Modesetting interface of a drm device
///
/// All calls are synchronous. Implementations must not cache mutable driver state,
/// the display model does its own bookkeeping.
pub trait KmsDevice {
    /// Ask the driver to enable a client capability
    fn enable_client_capability(&self, cap: ClientCapability) -> io::Result<()>;

    /// Enumerate crtcs, connectors and encoders
    fn resources(&self) -> io::Result<Resources>;
    /// Enumerate planes.
    ///
    /// Without [`ClientCapability::UniversalPlanes`] drivers only report overlay planes.
    fn plane_ids(&self) -> io::Result<Vec<PlaneId>>;
    /// Load a connector. `force_probe` triggers a full detection cycle on the driver side.
    fn connector(&self, id: ConnectorId, force_probe: bool) -> io::Result<ConnectorInfo>;
    /// Load an encoder
    fn encoder(&self, id: EncoderId) -> io::Result<EncoderInfo>;
    /// Load a crtc
    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo>;
    /// Load a plane
    fn plane(&self, id: PlaneId) -> io::Result<PlaneInfo>;

    /// Properties attached to an object together with their current values
    fn object_properties(&self, object: ObjectRef) -> io::Result<Vec<(PropertyId, u64)>>;
    /// Describe a property
    fn property(&self, id: PropertyId) -> io::Result<PropertyInfo>;

    /// Upload opaque data as a property blob
    fn create_blob(&self, data: &[u8]) -> io::Result<BlobId>;
    /// Upload a mode as a property blob
    fn create_mode_blob(&self, mode: &ModeInfo) -> io::Result<BlobId>;
    /// Release a property blob
    fn destroy_blob(&self, blob: BlobId) -> io::Result<()>;

    /// Legacy modeset. `fb: None` with no connectors disables the crtc.
    fn set_crtc(
        &self,
        crtc: CrtcId,
        fb: Option<FramebufferId>,
        pos: (u32, u32),
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> io::Result<()>;
    /// Legacy plane update. `dst` is `(x, y, w, h)` on the crtc, `src` is `(x, y, w, h)`
    /// inside the framebuffer in 16.16 fixed point. `fb: None` disables the plane.
    fn set_plane(
        &self,
        plane: PlaneId,
        crtc: CrtcId,
        fb: Option<FramebufferId>,
        dst: (i32, i32, u32, u32),
        src: (u32, u32, u32, u32),
    ) -> io::Result<()>;
    /// Legacy cursor image update, `None` hides the cursor
    fn set_cursor(&self, crtc: CrtcId, fb: Option<&Framebuffer>) -> io::Result<()>;
    /// Legacy cursor move
    fn move_cursor(&self, crtc: CrtcId, pos: (i32, i32)) -> io::Result<()>;
    /// Set a single property outside of an atomic commit
    fn set_object_property(&self, object: ObjectRef, property: PropertyId, value: u64) -> io::Result<()>;

    /// Submit an atomic request
    fn atomic_commit(&self, flags: AtomicCommitFlags, request: &AtomicRequest) -> io::Result<()>;
}
