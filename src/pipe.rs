//! Pipes
//!
//! One [`Pipe`] exists per crtc of the device. It owns its planes and the crtc level state:
//! background color, color management blobs and the mode blob it was last committed with.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::device::{BlobId, CrtcId, ObjectRef};
use crate::plane::{Plane, PlaneKind};
use crate::props::{CrtcProperty, PropertyTable};

/// Identity of a pipe, the index of its crtc in driver order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(u8);

impl PipeId {
    /// Largest number of pipes a display can track
    pub const MAX: usize = 32;

    /// Pipe with the given index.
    ///
    /// # Panics
    ///
    /// If `index` is not below [`PipeId::MAX`]
    pub const fn from_index(index: usize) -> PipeId {
        assert!(index < Self::MAX, "pipe index out of range");
        PipeId(index as u8)
    }

    /// Index of the pipe
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", (b'A' + self.0) as char)
    }
}

/// A set of pipes, as a bitmask over pipe indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PipeMask(u32);

impl PipeMask {
    /// The empty set
    pub const fn empty() -> PipeMask {
        PipeMask(0)
    }

    /// The first `count` pipes
    pub fn first_n(count: usize) -> PipeMask {
        if count >= PipeId::MAX {
            PipeMask(u32::MAX)
        } else {
            PipeMask((1u32 << count) - 1)
        }
    }

    /// Mask from its raw bit representation
    pub const fn from_bits(bits: u32) -> PipeMask {
        PipeMask(bits)
    }

    /// Raw bit representation
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether the set is empty
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether `pipe` is in the set
    pub const fn contains(&self, pipe: PipeId) -> bool {
        self.0 & (1 << pipe.0) != 0
    }

    /// Add `pipe` to the set
    pub fn insert(&mut self, pipe: PipeId) {
        self.0 |= 1 << pipe.0;
    }

    /// Remove `pipe` from the set
    pub fn remove(&mut self, pipe: PipeId) {
        self.0 &= !(1 << pipe.0);
    }

    /// Lowest pipe of the set
    pub fn first(&self) -> Option<PipeId> {
        self.iter().next()
    }

    /// Pipes of the set in ascending order
    pub fn iter(&self) -> impl Iterator<Item = PipeId> {
        let bits = self.0;
        (0..PipeId::MAX)
            .filter(move |idx| bits & (1 << idx) != 0)
            .map(PipeId::from_index)
    }
}

impl From<PipeId> for PipeMask {
    fn from(pipe: PipeId) -> Self {
        PipeMask(1 << pipe.0)
    }
}

impl FromIterator<PipeId> for PipeMask {
    fn from_iter<T: IntoIterator<Item = PipeId>>(iter: T) -> Self {
        iter.into_iter().fold(PipeMask::empty(), |mask, pipe| mask | pipe.into())
    }
}

impl BitOr for PipeMask {
    type Output = PipeMask;

    fn bitor(self, rhs: PipeMask) -> PipeMask {
        PipeMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for PipeMask {
    fn bitor_assign(&mut self, rhs: PipeMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PipeMask {
    type Output = PipeMask;

    fn bitand(self, rhs: PipeMask) -> PipeMask {
        PipeMask(self.0 & rhs.0)
    }
}

bitflags::bitflags! {
    /// Pipe attributes changed since the last commit
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PipeChanges: u8 {
        /// Background color
        const BACKGROUND    = 0b01;
        /// Any of the color management blobs
        const COLOR_MGMT    = 0b10;
    }
}

/// Color management blobs of a crtc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorProperty {
    /// Lookup table applied before the color matrix
    DegammaLut,
    /// Color transformation matrix
    Ctm,
    /// Lookup table applied after the color matrix
    GammaLut,
}

impl ColorProperty {
    pub(crate) const ALL: [ColorProperty; 3] =
        [ColorProperty::DegammaLut, ColorProperty::Ctm, ColorProperty::GammaLut];

    /// Crtc property carrying this blob
    pub fn crtc_property(self) -> CrtcProperty {
        match self {
            ColorProperty::DegammaLut => CrtcProperty::DegammaLut,
            ColorProperty::Ctm => CrtcProperty::Ctm,
            ColorProperty::GammaLut => CrtcProperty::GammaLut,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Pack a 16 bit per channel color into the `background_color` layout
pub fn background_color(red: u16, green: u16, blue: u16) -> u64 {
    ((blue as u64) << 32) | ((green as u64) << 16) | red as u64
}

/// A pipe, driven by one crtc
#[derive(Debug)]
pub struct Pipe {
    pub(crate) id: PipeId,
    pub(crate) crtc: CrtcId,
    pub(crate) enabled: bool,
    pub(crate) planes: Vec<Plane>,
    pub(crate) background: u64,
    pub(crate) color: [Option<Vec<u8>>; 3],
    pub(crate) color_blobs: [Option<BlobId>; 3],
    pub(crate) mode_blob: Option<BlobId>,
    pub(crate) changes: PipeChanges,
    pub(crate) props: PropertyTable<CrtcProperty>,
}

impl Pipe {
    pub(crate) fn new(id: PipeId, crtc: CrtcId, enabled: bool, planes: Vec<Plane>) -> Pipe {
        Pipe {
            id,
            crtc,
            enabled,
            planes,
            background: 0,
            color: [None, None, None],
            color_blobs: [None; 3],
            mode_blob: None,
            changes: PipeChanges::empty(),
            props: PropertyTable::empty(),
        }
    }

    pub(crate) fn set_properties(&mut self, props: PropertyTable<CrtcProperty>) {
        if let Some(entry) = props.entry(CrtcProperty::Background) {
            self.background = entry.value;
        }
        self.props = props;
    }

    /// Identity of this pipe
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Crtc driving this pipe
    pub fn crtc(&self) -> CrtcId {
        self.crtc
    }

    pub(crate) fn object(&self) -> ObjectRef {
        ObjectRef::Crtc(self.crtc)
    }

    /// Whether the crtc was running after the last commit
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Planes of this pipe: primary first, cursor last
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Mutable access to the planes of this pipe
    pub fn planes_mut(&mut self) -> &mut [Plane] {
        &mut self.planes
    }

    /// Plane by index
    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }

    /// Mutable plane by index
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut Plane> {
        self.planes.get_mut(index)
    }

    /// First plane of the given kind
    pub fn plane_of_kind(&self, kind: PlaneKind) -> Option<&Plane> {
        self.planes.iter().find(|plane| plane.kind() == kind)
    }

    /// Mutable first plane of the given kind
    pub fn plane_of_kind_mut(&mut self, kind: PlaneKind) -> Option<&mut Plane> {
        self.planes.iter_mut().find(|plane| plane.kind() == kind)
    }

    /// The primary plane.
    ///
    /// Every pipe has one, it is synthesized if the driver does not expose it.
    pub fn primary_plane(&self) -> &Plane {
        &self.planes[0]
    }

    /// Mutable primary plane
    pub fn primary_plane_mut(&mut self) -> &mut Plane {
        &mut self.planes[0]
    }

    /// The cursor plane, if the pipe has one
    pub fn cursor_plane(&self) -> Option<&Plane> {
        self.planes.last().filter(|plane| plane.is_cursor())
    }

    /// Mutable cursor plane
    pub fn cursor_plane_mut(&mut self) -> Option<&mut Plane> {
        self.planes.last_mut().filter(|plane| plane.is_cursor())
    }

    /// Background color in the `background_color` layout
    pub fn background(&self) -> u64 {
        self.background
    }

    /// Set the background color, see [`background_color`]
    pub fn set_background(&mut self, color: u64) {
        self.background = color;
        self.changes |= PipeChanges::BACKGROUND;
    }

    /// Pending data of a color management blob
    pub fn color_data(&self, prop: ColorProperty) -> Option<&[u8]> {
        self.color[prop.index()].as_deref()
    }

    /// Blob currently committed for a color management property
    pub fn color_blob(&self, prop: ColorProperty) -> Option<BlobId> {
        self.color_blobs[prop.index()]
    }

    /// Set raw color management data, `None` clears the property.
    ///
    /// The data is uploaded on the next commit.
    pub fn set_color(&mut self, prop: ColorProperty, data: Option<&[u8]>) {
        self.color[prop.index()] = data.map(<[u8]>::to_vec);
        self.changes |= PipeChanges::COLOR_MGMT;
    }

    /// Set the degamma lookup table
    pub fn set_degamma_lut(&mut self, data: Option<&[u8]>) {
        self.set_color(ColorProperty::DegammaLut, data)
    }

    /// Set the color transformation matrix
    pub fn set_ctm(&mut self, data: Option<&[u8]>) {
        self.set_color(ColorProperty::Ctm, data)
    }

    /// Set the gamma lookup table
    pub fn set_gamma_lut(&mut self, data: Option<&[u8]>) {
        self.set_color(ColorProperty::GammaLut, data)
    }

    /// Mode blob of the last commit
    pub fn mode_blob(&self) -> Option<BlobId> {
        self.mode_blob
    }

    /// Attributes changed since the last commit
    pub fn changes(&self) -> PipeChanges {
        self.changes
    }

    /// Whether the pipe or any of its planes changed since the last commit
    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty() || self.planes.iter().any(Plane::is_dirty)
    }

    /// Resolved crtc properties
    pub fn properties(&self) -> &PropertyTable<CrtcProperty> {
        &self.props
    }

    /// Color properties with something to set or clear
    pub(crate) fn pending_colors(&self) -> impl Iterator<Item = ColorProperty> + '_ {
        ColorProperty::ALL.into_iter().filter(|color| {
            self.color[color.index()].is_some() || self.color_blobs[color.index()].is_some()
        })
    }

    pub(crate) fn blobs(&self) -> impl Iterator<Item = BlobId> + '_ {
        self.mode_blob.iter().chain(self.color_blobs.iter().flatten()).copied()
    }
}
