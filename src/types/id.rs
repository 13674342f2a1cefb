// ABOUTME: Phantom-typed identifiers for engine objects.
// ABOUTME: Keeps container, image, and exec IDs from being passed for one another.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Marker types for the phantom parameter. Empty enums cannot be built.
pub enum ContainerMarker {}
pub enum ImageMarker {}
pub enum ExecMarker {}

/// An engine-assigned identifier (or name) of a specific kind of object.
///
/// The engine accepts either a full ID, a unique prefix, or a name wherever
/// an ID is expected, so no format validation happens here.
///
/// IDs of different kinds do not mix:
///
/// ```compile_fail
/// use dockwire::types::{ContainerId, ExecId};
///
/// fn takes_container(_id: ContainerId) {}
///
/// takes_container(ExecId::new("4f66ad9a0b2e"));
/// ```
#[must_use = "IDs reference engine objects and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The first twelve characters, the way the engine CLI abbreviates IDs.
    pub fn short(&self) -> &str {
        match self.value.char_indices().nth(12) {
            Some((idx, _)) => &self.value[..idx],
            None => &self.value,
        }
    }

    /// Percent-encoded form for use as a path segment.
    pub fn path_segment(&self) -> String {
        urlencoding::encode(&self.value).into_owned()
    }

    pub fn into_inner(self) -> String {
        self.value
    }
}

// T is only a marker, so these impls must not require T: Trait.

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

pub type ContainerId = Id<ContainerMarker>;
pub type ImageId = Id<ImageMarker>;
pub type ExecId = Id<ExecMarker>;
