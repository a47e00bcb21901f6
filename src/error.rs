//! Error types shared across kf. Most functions return a concrete error enum from their own
//! module, but anything that crosses a module boundary (mutators, callbacks, CLI plumbing) is
//! converted into the opaque boxed `Error` defined here.
use std::any::Any;
use std::fmt::{self, Display};

/// Trait for errors that may be returned by kf or by user supplied callbacks. It only sets up the
/// bounds we need, since most of the public api deals in boxed errors that get sent between
/// threads.
pub trait KfError: std::error::Error + Send + Sync + 'static + Any {
    fn as_any(&self) -> &dyn Any;

    fn as_std_error(&self) -> &(dyn std::error::Error + 'static);
}
impl<T> KfError for T
where
    T: std::error::Error + Send + Sync + 'static + Any,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_std_error(&self) -> &(dyn std::error::Error + 'static) {
        self
    }
}

pub type Error = Box<dyn KfError>;

impl dyn KfError {
    /// convenience function for downcasting the error to a concrete type
    pub fn as_type<T: KfError>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// convenience function for checking whether the error is of the given concrete type.
    /// If `is_type::<MyType>()` returns true, then calling `as_type::<MyType>()` will return
    /// `Some`.
    pub fn is_type<T: KfError>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl<T> From<T> for Error
where
    T: KfError,
{
    fn from(e: T) -> Error {
        Box::new(e)
    }
}

/// A misconfiguration caused by the user, for example a required flag left empty or a malformed
/// value in the `config-defaults` ConfigMap. These are expected mistakes, so callers showing
/// usage help should suppress it for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> ConfigError {
        ConfigError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.message.as_str())
    }
}

impl std::error::Error for ConfigError {}

/// Returns true if the error is a `ConfigError`.
pub fn is_config_error(err: &Error) -> bool {
    err.is_type::<ConfigError>()
}

/// Usage help is only useful when the failure might be a usage problem, which a `ConfigError`
/// is not.
pub fn should_show_usage(err: &Error) -> bool {
    !is_config_error(err)
}

/// A plain message error, used where a callback needs to fail with nothing more than text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageError(pub String);

impl Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl std::error::Error for MessageError {}

pub fn message(msg: impl Into<String>) -> Error {
    Box::new(MessageError(msg.into()))
}
