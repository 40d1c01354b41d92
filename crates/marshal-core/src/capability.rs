//! Stable capability identities.
//!
//! A [`CapabilityId`] is derived from a type's declaring module path and its
//! name, so the same type always maps to the same identity within a build.
//! Services and plugins use it to de-duplicate registrations and to look each
//! other up.

use std::any::type_name;
use std::fmt;

/// Identity of a capability: declaring module plus type name.
///
/// # Example
///
/// ```
/// use marshal_core::CapabilityId;
///
/// struct Keyring;
/// let id = CapabilityId::of::<Keyring>();
/// assert_eq!(id.name(), "Keyring");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId {
    module: &'static str,
    name: &'static str,
}

impl CapabilityId {
    /// Creates an identity from explicit parts.
    #[must_use]
    pub const fn new(module: &'static str, name: &'static str) -> Self {
        Self { module, name }
    }

    /// Derives the identity of `T`.
    ///
    /// Trait objects map to the trait's path (`dyn` and auto-trait bounds are
    /// dropped) and generic arguments are ignored.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        let full = type_name::<T>();
        let without_dyn = full.strip_prefix("dyn ").unwrap_or(full);
        let without_bounds = without_dyn
            .split_once(" + ")
            .map_or(without_dyn, |(head, _)| head);
        let base = without_bounds
            .split_once('<')
            .map_or(without_bounds, |(head, _)| head);
        match base.rsplit_once("::") {
            Some((module, name)) => Self { module, name },
            None => Self {
                module: "",
                name: base,
            },
        }
    }

    /// Declaring module path.
    #[must_use]
    pub const fn module(&self) -> &'static str {
        self.module
    }

    /// Type name without its module path.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_empty() {
            f.write_str(self.name)
        } else {
            write!(f, "{}.{}", self.module, self.name)
        }
    }
}
