//! Planes
//!
//! A [`Plane`] is a surface composited by its pipe. It is owned by exactly one
//! [`Pipe`](crate::pipe::Pipe) and only ever changes local state, the driver is
//! touched by [`Display::commit`](crate::display::Display::commit).

use crate::device::{Framebuffer, PlaneId, PropertyKind};
use crate::error::Error;
use crate::mode::Fixed;
use crate::pipe::PipeId;
use crate::props::{PlaneProperty, PropertyTable};

bitflags::bitflags! {
    /// Plane rotation and reflection, as understood by the `rotation` property
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Rotation: u8 {
        /// No rotation
        const ROTATE_0      =   0b00000001;
        /// 90 degree counter clockwise
        const ROTATE_90     =   0b00000010;
        /// 180 degree
        const ROTATE_180    =   0b00000100;
        /// 270 degree counter clockwise
        const ROTATE_270    =   0b00001000;
        /// Mirrored along the x axis
        const REFLECT_X     =   0b00010000;
        /// Mirrored along the y axis
        const REFLECT_Y     =   0b00100000;
    }
}

impl Rotation {
    const ROTATE_MASK: Rotation = Rotation::ROTATE_0
        .union(Rotation::ROTATE_90)
        .union(Rotation::ROTATE_180)
        .union(Rotation::ROTATE_270);

    /// Rotation bits a driver advertises through the values of its `rotation` property
    pub fn supported_by(kind: &PropertyKind) -> Rotation {
        let values = match kind {
            PropertyKind::Bitmask(values) | PropertyKind::Enum(values) => values,
            _ => return Rotation::empty(),
        };
        values
            .iter()
            .filter(|(_, bit)| *bit < 8)
            .fold(Rotation::empty(), |acc, (_, bit)| {
                acc | Rotation::from_bits_truncate(1 << bit)
            })
    }

    /// Whether exactly one rotation angle is set
    pub fn is_normalized(&self) -> bool {
        self.intersection(Rotation::ROTATE_MASK).bits().count_ones() == 1
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Rotation::ROTATE_0
    }
}

bitflags::bitflags! {
    /// Plane attributes changed since the last commit
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PlaneChanges: u8 {
        /// Framebuffer or source rectangle
        const FB        = 0b0001;
        /// Destination position
        const POSITION  = 0b0010;
        /// Destination size
        const SIZE      = 0b0100;
        /// Rotation
        const ROTATION  = 0b1000;
    }
}

/// Kind of a plane, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneKind {
    /// The plane scanned out by a legacy modeset
    Primary,
    /// Any additional plane
    Overlay,
    /// The hardware cursor
    Cursor,
}

impl PlaneKind {
    /// Map the value of the `type` plane property
    pub fn from_type_property(value: u64) -> PlaneKind {
        match value {
            1 => PlaneKind::Primary,
            2 => PlaneKind::Cursor,
            _ => PlaneKind::Overlay,
        }
    }
}

/// Source rectangle of a plane inside its framebuffer, in 16.16 fixed point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceRect {
    /// X offset
    pub x: Fixed,
    /// Y offset
    pub y: Fixed,
    /// Width
    pub w: Fixed,
    /// Height
    pub h: Fixed,
}

impl SourceRect {
    /// Raw fixed point values in `(x, y, w, h)` order
    pub fn bits(&self) -> (u32, u32, u32, u32) {
        (self.x.bits(), self.y.bits(), self.w.bits(), self.h.bits())
    }
}

/// A plane of a pipe
#[derive(Debug, Clone)]
pub struct Plane {
    pipe: PipeId,
    index: usize,
    kind: PlaneKind,
    drm_plane: Option<PlaneId>,
    fb: Option<Framebuffer>,
    position: (i32, i32),
    size: (u32, u32),
    src: SourceRect,
    rotation: Rotation,
    supported_rotations: Rotation,
    changes: PlaneChanges,
    props: PropertyTable<PlaneProperty>,
}

impl Plane {
    pub(crate) fn new(pipe: PipeId, index: usize, kind: PlaneKind, drm_plane: Option<PlaneId>) -> Plane {
        Plane {
            pipe,
            index,
            kind,
            drm_plane,
            fb: None,
            position: (0, 0),
            size: (0, 0),
            src: SourceRect::default(),
            rotation: Rotation::ROTATE_0,
            supported_rotations: Rotation::empty(),
            changes: PlaneChanges::empty(),
            props: PropertyTable::empty(),
        }
    }

    pub(crate) fn set_properties(&mut self, props: PropertyTable<PlaneProperty>) {
        self.supported_rotations = props
            .entry(PlaneProperty::Rotation)
            .map(|entry| Rotation::supported_by(&entry.kind))
            .unwrap_or_else(Rotation::empty);
        self.props = props;
    }

    /// Pipe this plane belongs to
    pub fn pipe(&self) -> PipeId {
        self.pipe
    }

    /// Index of this plane inside its pipe
    pub fn index(&self) -> usize {
        self.index
    }

    /// Kind of this plane
    pub fn kind(&self) -> PlaneKind {
        self.kind
    }

    /// Whether this is the primary plane of its pipe
    pub fn is_primary(&self) -> bool {
        self.kind == PlaneKind::Primary
    }

    /// Whether this is the cursor plane of its pipe
    pub fn is_cursor(&self) -> bool {
        self.kind == PlaneKind::Cursor
    }

    /// Driver plane object backing this plane.
    ///
    /// Without universal planes the primary and cursor planes have no driver object.
    pub fn drm_plane(&self) -> Option<PlaneId> {
        self.drm_plane
    }

    /// Bound framebuffer, `None` if the plane is disabled
    pub fn fb(&self) -> Option<&Framebuffer> {
        self.fb.as_ref()
    }

    /// Destination position on the crtc
    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    /// Destination size on the crtc
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Source rectangle inside the framebuffer
    pub fn src(&self) -> SourceRect {
        self.src
    }

    /// Current rotation
    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Rotations the driver accepts for this plane, empty if the plane cannot be rotated
    pub fn supported_rotations(&self) -> Rotation {
        self.supported_rotations
    }

    /// Attributes changed since the last commit
    pub fn changes(&self) -> PlaneChanges {
        self.changes
    }

    /// Whether any attribute changed since the last commit
    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Resolved properties of the backing driver plane
    pub fn properties(&self) -> &PropertyTable<PlaneProperty> {
        &self.props
    }

    /// Bind a framebuffer, or disable the plane with `None`.
    ///
    /// Binding resets the source rectangle and the destination size to the whole framebuffer.
    /// Disabling keeps the geometry for a later re-enable.
    pub fn set_fb(&mut self, fb: Option<Framebuffer>) {
        if let Some(fb) = fb.as_ref() {
            self.src = SourceRect {
                x: Fixed::ZERO,
                y: Fixed::ZERO,
                w: Fixed::saturating_from_u32(fb.width),
                h: Fixed::saturating_from_u32(fb.height),
            };
            if self.size != (fb.width, fb.height) {
                self.size = (fb.width, fb.height);
                self.changes |= PlaneChanges::SIZE;
            }
        }
        self.fb = fb;
        self.changes |= PlaneChanges::FB;
    }

    /// Move the plane on the crtc
    pub fn set_position(&mut self, x: i32, y: i32) {
        self.position = (x, y);
        self.changes |= PlaneChanges::POSITION;
    }

    /// Scale the plane on the crtc
    pub fn set_size(&mut self, w: u32, h: u32) {
        self.size = (w, h);
        self.changes |= PlaneChanges::SIZE;
    }

    /// Move the source rectangle inside the framebuffer
    pub fn set_src_position(&mut self, x: Fixed, y: Fixed) {
        self.src.x = x;
        self.src.y = y;
        self.changes |= PlaneChanges::FB;
    }

    /// Resize the source rectangle inside the framebuffer
    pub fn set_src_size(&mut self, w: Fixed, h: Fixed) {
        self.src.w = w;
        self.src.h = h;
        self.changes |= PlaneChanges::FB;
    }

    /// Rotate the plane.
    ///
    /// Fails with [`Error::UnsupportedRotation`] if the plane has no rotation property,
    /// the value does not name exactly one angle or the driver does not advertise it.
    pub fn set_rotation(&mut self, rotation: Rotation) -> Result<(), Error> {
        let supported = self.props.contains(PlaneProperty::Rotation)
            && rotation.is_normalized()
            && (self.supported_rotations.is_empty() || self.supported_rotations.contains(rotation));
        if !supported {
            return Err(Error::UnsupportedRotation {
                pipe: self.pipe,
                plane: self.index,
                rotation,
            });
        }

        self.rotation = rotation;
        self.changes |= PlaneChanges::ROTATION;
        Ok(())
    }

    pub(crate) fn confirm(&mut self, changes: PlaneChanges) {
        self.changes.remove(changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PropertyId, PropertyKind};
    use crate::props::ResolvedProperty;

    fn rotation_prop(values: &[(&str, u64)]) -> ResolvedProperty {
        ResolvedProperty {
            id: PropertyId(1),
            value: 1,
            kind: PropertyKind::Bitmask(values.iter().map(|(n, v)| (n.to_string(), *v)).collect()),
        }
    }

    fn plane() -> Plane {
        Plane::new(PipeId::from_index(0), 1, PlaneKind::Overlay, Some(PlaneId(40)))
    }

    #[test]
    fn disable_keeps_geometry() {
        let mut plane = plane();
        plane.set_fb(Some(Framebuffer::new(7, 1920, 1080)));
        plane.set_position(10, 20);
        plane.confirm(PlaneChanges::all());

        plane.set_fb(None);
        assert!(plane.fb().is_none());
        assert_eq!(plane.changes(), PlaneChanges::FB);
        assert_eq!(plane.position(), (10, 20));
        assert_eq!(plane.size(), (1920, 1080));
    }

    #[test]
    fn set_fb_covers_whole_framebuffer() {
        let mut plane = plane();
        plane.set_fb(Some(Framebuffer::new(7, 256, 128)));
        assert_eq!(plane.size(), (256, 128));
        assert_eq!(plane.src().w, Fixed::from_int(256));
        assert_eq!(plane.src().h, Fixed::from_int(128));
        assert_eq!(plane.changes(), PlaneChanges::FB | PlaneChanges::SIZE);

        plane.confirm(PlaneChanges::all());
        plane.set_src_position(Fixed::from_f64(0.5), Fixed::ZERO);
        assert_eq!(plane.changes(), PlaneChanges::FB);
    }

    #[test]
    fn oversized_framebuffer_saturates_source() {
        let mut plane = plane();
        plane.set_fb(Some(Framebuffer::new(7, 70_000, 65_536)));
        assert_eq!(plane.size(), (70_000, 65_536));
        assert_eq!(plane.src().w, Fixed::from_int(u16::MAX));
        assert_eq!(plane.src().h, Fixed::from_int(u16::MAX));
    }

    #[test]
    fn rotation_requires_property() {
        let mut plane = plane();
        assert!(matches!(
            plane.set_rotation(Rotation::ROTATE_90),
            Err(Error::UnsupportedRotation { plane: 1, .. })
        ));
        assert_eq!(plane.rotation(), Rotation::ROTATE_0);
        assert!(!plane.is_dirty());
    }

    #[test]
    fn rotation_checks_advertised_values() {
        let mut plane = plane();
        let mut props = PropertyTable::empty();
        props.insert(
            PlaneProperty::Rotation,
            rotation_prop(&[("rotate-0", 0), ("rotate-180", 2), ("reflect-x", 4)]),
        );
        plane.set_properties(props);

        assert_eq!(
            plane.supported_rotations(),
            Rotation::ROTATE_0 | Rotation::ROTATE_180 | Rotation::REFLECT_X
        );
        assert!(plane.set_rotation(Rotation::ROTATE_90).is_err());
        assert!(plane.set_rotation(Rotation::empty()).is_err());
        assert!(plane.set_rotation(Rotation::ROTATE_0 | Rotation::ROTATE_180).is_err());
        assert!(plane.set_rotation(Rotation::ROTATE_180 | Rotation::REFLECT_X).is_ok());
        assert_eq!(plane.changes(), PlaneChanges::ROTATION);
    }

    #[test]
    fn plane_type_values() {
        assert_eq!(PlaneKind::from_type_property(0), PlaneKind::Overlay);
        assert_eq!(PlaneKind::from_type_property(1), PlaneKind::Primary);
        assert_eq!(PlaneKind::from_type_property(2), PlaneKind::Cursor);
    }
}
