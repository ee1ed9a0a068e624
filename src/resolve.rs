//! Merging partial user options with per-service defaults.
//!
//! User-facing option records hold `Option<T>` for every field. A field is
//! taken from the defaults when it is `None` or when it holds the type's
//! unset sentinel (see [`Unset`]). Ports never use a zero sentinel; they are
//! described by [`PortChoice`] instead.

use std::path::PathBuf;
use std::time::Duration;

/// Values that can carry an "unset" sentinel in addition to `None`.
pub trait Unset {
    fn is_unset(&self) -> bool;
}

impl Unset for String {
    fn is_unset(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Unset for PathBuf {
    fn is_unset(&self) -> bool {
        self.as_os_str().is_empty()
    }
}

impl Unset for Duration {
    fn is_unset(&self) -> bool {
        self.is_zero()
    }
}

impl Unset for bool {
    fn is_unset(&self) -> bool {
        false
    }
}

impl Unset for PortChoice {
    fn is_unset(&self) -> bool {
        false
    }
}

/// Pick `value` unless it is absent or unset, otherwise `default`.
pub fn resolve_field<T: Unset + Clone>(value: &Option<T>, default: &T) -> T {
    match value {
        Some(v) if !v.is_unset() => v.clone(),
        _ => default.clone(),
    }
}

/// Like [`resolve_field`] for fields whose default may itself be absent.
pub fn resolve_optional<T: Unset + Clone>(value: &Option<T>, default: &Option<T>) -> Option<T> {
    match value {
        Some(v) if !v.is_unset() => Some(v.clone()),
        _ => default.clone().filter(|v| !v.is_unset()),
    }
}

/// How a container port is published on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortChoice {
    /// Reserve a free host port through the [`PortAllocator`](crate::ports::PortAllocator).
    #[default]
    Allocate,
    /// Publish on exactly this host port. Collisions are the caller's problem.
    Fixed(u16),
    /// Do not publish this port at all.
    Unpublished,
}

impl PortChoice {
    pub fn is_published(&self) -> bool {
        !matches!(self, Self::Unpublished)
    }
}

impl From<u16> for PortChoice {
    fn from(port: u16) -> Self {
        Self::Fixed(port)
    }
}
