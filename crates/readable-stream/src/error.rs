//! Error and reason types for readable-stream operations.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// An opaque, reference-counted cancellation or error reason.
///
/// Reasons are supplied by application code (through `error()`, `cancel()`,
/// an abort signal, or a failing sink) and are carried through the engine
/// without being inspected or replaced. Cloning a `Reason` shares the same
/// underlying value, so identity can be checked with [`Reason::ptr_eq`].
#[derive(Clone)]
pub struct Reason(Arc<dyn Any + Send + Sync>);

/// Reason produced when both branches of a tee are cancelled.
#[derive(Debug, Clone)]
pub struct CompositeReason(pub Vec<Reason>);

/// Default reason carried by an abort signal fired without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the operation was aborted")]
pub struct AbortError;

impl Reason {
    /// Wraps an arbitrary value as a reason.
    pub fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self(Arc::new(value))
    }

    /// Convenience constructor for a plain message reason.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }

    /// Builds the combined reason forwarded upstream by a fully cancelled tee.
    pub fn composite(reasons: impl IntoIterator<Item = Reason>) -> Self {
        Self::new(CompositeReason(reasons.into_iter().collect()))
    }

    /// Returns a reference to the wrapped value if it is of type `V`.
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.0.downcast_ref::<V>()
    }

    /// Returns the member reasons if this is a tee composite.
    pub fn as_composite(&self) -> Option<&[Reason]> {
        self.downcast_ref::<CompositeReason>().map(|c| c.0.as_slice())
    }

    /// Returns the message if the reason wraps a `String` or `&'static str`.
    pub fn as_message(&self) -> Option<&str> {
        self.downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.downcast_ref::<&'static str>().copied())
    }

    /// Returns `true` if both handles refer to the same reason value.
    pub fn ptr_eq(&self, other: &Reason) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = self.as_message() {
            return f.debug_tuple("Reason").field(&message).finish();
        }
        if let Some(parts) = self.as_composite() {
            return f.debug_tuple("Reason").field(&parts).finish();
        }
        if let Some(err) = self.downcast_ref::<StreamError>() {
            return f.debug_tuple("Reason").field(err).finish();
        }
        f.write_str("Reason(<opaque>)")
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = self.as_message() {
            return f.write_str(message);
        }
        if let Some(err) = self.downcast_ref::<StreamError>() {
            return write!(f, "{err}");
        }
        if let Some(err) = self.downcast_ref::<AbortError>() {
            return write!(f, "{err}");
        }
        if let Some(parts) = self.as_composite() {
            f.write_str("[")?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{part}")?;
            }
            return f.write_str("]");
        }
        f.write_str("<opaque reason>")
    }
}

/// Errors that can occur in stream operations.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Protocol misuse: double lock, read after release, wrong reader mode.
    #[error("type error: {0}")]
    Type(String),

    /// Controller call made while the stream is no longer readable.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A strategy value (high-water mark or chunk size) is out of range.
    #[error("range error: {0}")]
    Range(String),

    /// Application-supplied reason from `error()`, `cancel()` or a sink.
    #[error("stream errored: {0}")]
    Stream(Reason),

    /// Teardown triggered by an abort signal.
    #[error("aborted: {0}")]
    Aborted(Reason),
}

impl StreamError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Returns `true` if this error reports misuse of the API rather than a
    /// stream failure. Protocol errors never change stream state.
    #[inline]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Type(_) | Self::InvalidState(_) | Self::Range(_))
    }

    /// Returns `true` if this error carries an application or abort reason.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Aborted(_))
    }

    /// Returns the carried reason, if any.
    pub fn reason(&self) -> Option<&Reason> {
        match self {
            Self::Stream(reason) | Self::Aborted(reason) => Some(reason),
            _ => None,
        }
    }

    /// Converts into a reason, unwrapping a carried reason unchanged and
    /// wrapping protocol errors.
    pub fn into_reason(self) -> Reason {
        match self {
            Self::Stream(reason) | Self::Aborted(reason) => reason,
            other => Reason::new(other),
        }
    }
}
