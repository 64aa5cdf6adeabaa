//! Provenance tokens attached to bindings and error messages.

use std::borrow::Cow;
use std::fmt;
use std::panic::Location;

/// Where a binding or declaration came from.
///
/// Sources are opaque to the container: they are preserved, compared for
/// duplicate detection and carried into error messages, never interpreted.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub enum Source {
    /// Nothing is known about the origin.
    #[default]
    Unknown,
    /// A location in user code, usually captured with [`Source::caller`].
    Location(&'static Location<'static>),
    /// A free-form label supplied by a front-end.
    Label(Cow<'static, str>),
    /// Synthesised by the just-in-time resolver.
    JustInTime,
    /// Provided by the container itself.
    Framework,
}

impl Source {
    /// Captures the location of the caller.
    ///
    /// Propagates through other `#[track_caller]` functions, so element
    /// constructors record the line that declared the element.
    #[track_caller]
    #[inline]
    pub fn caller() -> Self {
        Source::Location(Location::caller())
    }

    /// A labelled source.
    pub fn label(label: impl Into<Cow<'static, str>>) -> Self {
        Source::Label(label.into())
    }

    /// Returns `true` unless this is [`Source::Unknown`].
    pub fn is_known(&self) -> bool {
        !matches!(self, Source::Unknown)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Unknown => f.write_str("[unknown source]"),
            Source::Location(location) => {
                write!(f, "{}:{}:{}", location.file(), location.line(), location.column())
            }
            Source::Label(label) => f.write_str(label),
            Source::JustInTime => f.write_str("[just-in-time binding]"),
            Source::Framework => f.write_str("[framework]"),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn declare() -> Source {
        Source::caller()
    }

    #[test]
    fn caller_points_at_declaration() {
        let source = declare();
        assert!(source.to_string().contains("source.rs"));
        assert!(source.is_known());
    }

    #[test]
    fn distinct_call_sites_differ() {
        let a = Source::caller();
        let b = Source::caller();
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_is_default() {
        assert_eq!(Source::default(), Source::Unknown);
        assert!(!Source::Unknown.is_known());
        assert_eq!(Source::label("module A").to_string(), "module A");
    }
}
