//! Error type and category model.
//!
//! An [`Error`] is a tagged diagnostic: a pointer to a [`ErrorCategory`]
//! descriptor, an integer code, and an optional message. The none value
//! carries no category; `has_error()` is true exactly when a category is
//! present.
//!
//! Categories are compared by identity, never by name. Built-in categories
//! cover OS call failures ("syscall"), IO-style code+message failures
//! ("io"), and the library's own diagnostics ("event"). Arbitrary named
//! categories are interned in a process-wide registry so the same name
//! always yields the same pointer.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;

/// Polymorphic descriptor for a family of error codes.
pub trait ErrorCategory: Send + Sync + 'static {
    /// Returns the category name.
    fn name(&self) -> &'static str;

    /// Renders a human-readable description of the given code.
    fn information(&self, code: i32) -> String;
}

fn same_category(a: &'static dyn ErrorCategory, b: &'static dyn ErrorCategory) -> bool {
    // Identity comparison on the data pointer; vtable pointers may differ
    // across codegen units for the same object.
    std::ptr::eq(
        (a as *const dyn ErrorCategory).cast::<()>(),
        (b as *const dyn ErrorCategory).cast::<()>(),
    )
}

struct SyscallCategory;

impl ErrorCategory for SyscallCategory {
    fn name(&self) -> &'static str {
        "syscall"
    }

    fn information(&self, code: i32) -> String {
        format!("syscall[error] errno: {code}")
    }
}

struct IoCategory;

impl ErrorCategory for IoCategory {
    fn name(&self) -> &'static str {
        "io"
    }

    fn information(&self, code: i32) -> String {
        format!("io[error] ec: {code}")
    }
}

struct GeneralCategory {
    name: &'static str,
}

impl ErrorCategory for GeneralCategory {
    fn name(&self) -> &'static str {
        self.name
    }

    fn information(&self, code: i32) -> String {
        format!("{}[error] ec: {code}", self.name)
    }
}

/// Returns the category for OS call failures.
#[must_use]
pub fn syscall_category() -> &'static dyn ErrorCategory {
    static CATEGORY: SyscallCategory = SyscallCategory;
    &CATEGORY
}

/// Returns the category for IO-style code+message failures.
#[must_use]
pub fn io_category() -> &'static dyn ErrorCategory {
    static CATEGORY: IoCategory = IoCategory;
    &CATEGORY
}

/// Returns the interned category for the given name.
///
/// Calling twice with the same name yields the same pointer, so identity
/// comparison of categories remains meaningful for user-defined names.
#[must_use]
pub fn general_category(name: &str) -> &'static dyn ErrorCategory {
    static REGISTRY: OnceLock<Mutex<HashMap<String, &'static GeneralCategory>>> = OnceLock::new();
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock();
    if let Some(category) = map.get(name) {
        return *category;
    }
    let leaked_name: &'static str = Box::leak(name.to_owned().into_boxed_str());
    let category: &'static GeneralCategory =
        Box::leak(Box::new(GeneralCategory { name: leaked_name }));
    map.insert(leaked_name.to_owned(), category);
    category
}

/// Diagnostic codes raised by the event core itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum EventError {
    /// Every input to an `any` combination rejected.
    PromiseAnyExhausted = 1,
    /// A `race` combination was built from no inputs.
    PromiseRaceEmpty = 2,
    /// The message loop is shutting down.
    LoopShutdown = 3,
    /// Reserved for event kinds the loop does not understand.
    UnsupportedEvent = 4,
    /// A continuation or coroutine frame panicked; the payload is carried
    /// in the error message.
    ContinuationPanic = 5,
}

impl EventError {
    fn describe(self) -> &'static str {
        match self {
            Self::PromiseAnyExhausted => "promise any operation failed",
            Self::PromiseRaceEmpty => "promise race operation failed",
            Self::LoopShutdown => "event loop shutdown",
            Self::UnsupportedEvent => "event unsupported",
            Self::ContinuationPanic => "continuation panicked",
        }
    }
}

struct EventCategory;

impl ErrorCategory for EventCategory {
    fn name(&self) -> &'static str {
        "event"
    }

    fn information(&self, code: i32) -> String {
        let label = match code {
            1 => EventError::PromiseAnyExhausted.describe(),
            2 => EventError::PromiseRaceEmpty.describe(),
            3 => EventError::LoopShutdown.describe(),
            4 => EventError::UnsupportedEvent.describe(),
            5 => EventError::ContinuationPanic.describe(),
            _ => "none",
        };
        format!("event[{label}]")
    }
}

/// Returns the category for the event core's own diagnostics.
#[must_use]
pub fn event_category() -> &'static dyn ErrorCategory {
    static CATEGORY: EventCategory = EventCategory;
    &CATEGORY
}

/// A tagged diagnostic: category pointer, integer code, optional message.
#[derive(Clone, Default)]
pub struct Error {
    code: i32,
    category: Option<&'static dyn ErrorCategory>,
    message: Option<String>,
}

impl Error {
    /// Code carried by the none value.
    pub const NO_ERROR_CODE: i32 = 0;

    /// Creates the none value: no category, code zero, no message.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates an error in the given category.
    #[must_use]
    pub fn new(category: &'static dyn ErrorCategory, code: i32) -> Self {
        Self {
            code,
            category: Some(category),
            message: None,
        }
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Creates a "syscall" error from an OS errno value.
    #[must_use]
    pub fn sys(errno: i32) -> Self {
        Self::new(syscall_category(), errno)
    }

    /// Creates an "io" error from a code and message. A zero code yields
    /// the none value.
    #[must_use]
    pub fn io(code: i32, message: impl Into<String>) -> Self {
        if code == Self::NO_ERROR_CODE {
            return Self::none();
        }
        Self::new(io_category(), code).with_message(message)
    }

    /// Creates an error in a named general-purpose category.
    #[must_use]
    pub fn general(category: &str, code: i32, message: impl Into<String>) -> Self {
        Self::new(general_category(category), code).with_message(message)
    }

    /// Creates an error in the event core's own category.
    #[must_use]
    pub fn event(code: EventError) -> Self {
        Self::new(event_category(), code as i32)
    }

    /// Creates an event error with a message.
    #[must_use]
    pub fn event_with(code: EventError, message: impl Into<String>) -> Self {
        Self::event(code).with_message(message)
    }

    /// Returns the integer code.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the category, if any.
    #[must_use]
    pub fn category(&self) -> Option<&'static dyn ErrorCategory> {
        self.category
    }

    /// Returns true if this value carries an error.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.category.is_some()
    }

    /// Returns true if this is the none value.
    #[must_use]
    pub fn is_none(&self) -> bool {
        !self.has_error()
    }

    /// Returns true if this error belongs to the "syscall" category.
    #[must_use]
    pub fn is_sys(&self) -> bool {
        self.in_category(syscall_category())
    }

    /// Returns true if this error belongs to the "io" category.
    #[must_use]
    pub fn is_io(&self) -> bool {
        self.in_category(io_category())
    }

    /// Returns true if this error belongs to the given category.
    #[must_use]
    pub fn in_category(&self, category: &'static dyn ErrorCategory) -> bool {
        self.category.is_some_and(|c| same_category(c, category))
    }

    /// Renders the category's description of the code, or "no error".
    #[must_use]
    pub fn information(&self) -> String {
        self.category
            .map_or_else(|| "no error".to_owned(), |c| c.information(self.code))
    }

    /// Returns the attached message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Removes and returns the attached message.
    pub fn take_message(&mut self) -> Option<String> {
        self.message.take()
    }

    /// Renders information and message together.
    #[must_use]
    pub fn details(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {message}", self.information()),
            None => self.information(),
        }
    }

    /// Resets to the none value.
    pub fn clear(&mut self) {
        self.code = Self::NO_ERROR_CODE;
        self.category = None;
        self.message = None;
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        let categories_match = match (self.category, other.category) {
            (Some(a), Some(b)) => same_category(a, b),
            (None, None) => true,
            _ => false,
        };
        categories_match && self.code == other.code && self.message == other.message
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("category", &self.category.map(ErrorCategory::name))
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.details())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::sys(errno),
            None => Self::io(1, err.to_string()),
        }
    }
}

impl From<EventError> for Error {
    fn from(code: EventError) -> Self {
        Self::event(code)
    }
}
