//! Property resolution
//!
//! Property ids are assigned by the driver and are not stable, so every object resolves the
//! properties it needs by name once, when it is created. The result is kept in a
//! [`PropertyTable`], a dense array indexed by a closed set of property names.
//!
//! A property that the driver does not expose simply stays unresolved. Callers treat that
//! as a missing capability, the commit engine only complains if an attribute that maps to
//! such a property actually changed.

use std::fmt;
use std::marker::PhantomData;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::device::{KmsDevice, ObjectRef, PropertyId, PropertyKind};
use crate::error::{Error, PropertyNotFound};

/// A closed set of property names of one object type
pub trait PropertyName: Copy + Eq + fmt::Debug + 'static {
    /// Every name of the set, in index order
    const ALL: &'static [Self];

    /// Name of the property as reported by the driver
    fn name(self) -> &'static str;

    /// Dense index of the name inside [`PropertyName::ALL`]
    fn index(self) -> usize;
}

macro_rules! property_names {
    (
        $(#[$meta:meta])* $vis:vis enum $ty:ident {
            $($(#[$vmeta:meta])* $variant:ident => $name:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $ty {
            $($(#[$vmeta])* $variant,)*
        }

        impl PropertyName for $ty {
            const ALL: &'static [Self] = &[$($ty::$variant,)*];

            fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)*
                }
            }

            fn index(self) -> usize {
                self as usize
            }
        }
    };
}

property_names! {
    /// Plane properties used by the commit engine
    pub enum PlaneProperty {
        /// Source x in 16.16
        SrcX => "SRC_X",
        /// Source y in 16.16
        SrcY => "SRC_Y",
        /// Source width in 16.16
        SrcW => "SRC_W",
        /// Source height in 16.16
        SrcH => "SRC_H",
        /// Destination x on the crtc
        CrtcX => "CRTC_X",
        /// Destination y on the crtc
        CrtcY => "CRTC_Y",
        /// Destination width on the crtc
        CrtcW => "CRTC_W",
        /// Destination height on the crtc
        CrtcH => "CRTC_H",
        /// Bound framebuffer
        FbId => "FB_ID",
        /// Bound crtc
        CrtcId => "CRTC_ID",
        /// Plane type (primary, overlay, cursor)
        Type => "type",
        /// Rotation bitmask
        Rotation => "rotation",
    }
}

property_names! {
    /// Crtc properties used by the commit engine
    pub enum CrtcProperty {
        /// Background color, 16 bits per channel
        Background => "background_color",
        /// Color transformation matrix blob
        Ctm => "CTM",
        /// Degamma lookup table blob
        DegammaLut => "DEGAMMA_LUT",
        /// Gamma lookup table blob
        GammaLut => "GAMMA_LUT",
        /// Mode blob
        ModeId => "MODE_ID",
        /// Whether the crtc is running
        Active => "ACTIVE",
    }
}

property_names! {
    /// Connector properties used by the commit engine
    pub enum ConnectorProperty {
        /// Scaling mode enum
        ScalingMode => "scaling mode",
        /// Bound crtc
        CrtcId => "CRTC_ID",
    }
}

/// A resolved property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProperty {
    /// Driver id of the property
    pub id: PropertyId,
    /// Value at resolution time
    pub value: u64,
    /// Value type and, for enums and bitmasks, the possible values
    pub kind: PropertyKind,
}

/// Resolve a single property of an object by name
///
/// This is a linear scan over the properties the driver reports for `object`.
pub fn resolve<D: KmsDevice + ?Sized>(
    dev: &D,
    object: ObjectRef,
    name: &str,
) -> Result<ResolvedProperty, Error> {
    let props = dev
        .object_properties(object)
        .map_err(|source| Error::Access {
            errmsg: "Failed to get properties of object",
            source,
        })?;

    for (id, value) in props {
        match dev.property(id) {
            Ok(info) if info.name == name => {
                return Ok(ResolvedProperty {
                    id,
                    value,
                    kind: info.kind,
                })
            }
            Ok(_) => {}
            Err(err) => debug!(?object, property = %id, "Failed to get property info: {}", err),
        }
    }

    Err(PropertyNotFound {
        object,
        name: name.to_string(),
    }
    .into())
}

/// Resolved property ids of one object, indexed by name
#[derive(Clone, PartialEq, Eq)]
pub struct PropertyTable<P: PropertyName> {
    entries: SmallVec<[Option<ResolvedProperty>; 12]>,
    _names: PhantomData<P>,
}

impl<P: PropertyName> Default for PropertyTable<P> {
    fn default() -> Self {
        PropertyTable {
            entries: P::ALL.iter().map(|_| None).collect(),
            _names: PhantomData,
        }
    }
}

impl<P: PropertyName> fmt::Debug for PropertyTable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                P::ALL
                    .iter()
                    .filter_map(|name| self.entry(*name).map(|entry| (name.name(), entry.id))),
            )
            .finish()
    }
}

impl<P: PropertyName> PropertyTable<P> {
    /// A table with no resolved property
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve every name of `P` on `object` in a single pass over its property list
    pub fn resolve<D: KmsDevice + ?Sized>(dev: &D, object: ObjectRef) -> Result<Self, Error> {
        let mut table = Self::empty();
        let props = dev
            .object_properties(object)
            .map_err(|source| Error::Access {
                errmsg: "Failed to get properties of object",
                source,
            })?;

        for (id, value) in props {
            let info = match dev.property(id) {
                Ok(info) => info,
                Err(err) => {
                    debug!(?object, property = %id, "Failed to get property info: {}", err);
                    continue;
                }
            };
            if let Some(name) = P::ALL.iter().find(|name| name.name() == info.name) {
                table.entries[name.index()] = Some(ResolvedProperty {
                    id,
                    value,
                    kind: info.kind,
                });
            }
        }

        trace!(?object, "Resolved properties: {:?}", table);
        Ok(table)
    }

    /// Resolved id of a property
    pub fn get(&self, name: P) -> Option<PropertyId> {
        self.entry(name).map(|entry| entry.id)
    }

    /// Full resolution result of a property
    pub fn entry(&self, name: P) -> Option<&ResolvedProperty> {
        self.entries.get(name.index()).and_then(Option::as_ref)
    }

    /// Whether a property was resolved
    pub fn contains(&self, name: P) -> bool {
        self.get(name).is_some()
    }

    /// Whether no property was resolved at all
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, name: P, property: ResolvedProperty) {
        self.entries[name.index()] = Some(property);
    }

    pub(crate) fn require(&self, object: ObjectRef, name: P) -> Result<PropertyId, Error> {
        self.get(name).ok_or(Error::MissingProperty {
            object,
            name: name.name(),
        })
    }
}
