//! Verge Configuration
//!
//! Everything the session controller reads from or writes to disk apart
//! from the diagnostic logs:
//!
//! - the proxy engine's config document, checked and repaired by
//!   [`ConfigValidator`] before every file-backed start
//! - persisted user [`Preferences`] (boot auto-start, last session)
//! - [`ServiceSettings`], the controller's own TOML tuning file
//! - the on-disk layout rooted at one base directory ([`ServicePaths`])

mod atomic;
mod error;
mod preferences;
mod session;
mod settings;
mod validator;

pub use error::ConfigError;
pub use preferences::{PreferenceStore, Preferences};
pub use session::SessionParams;
pub use settings::{MIN_LOG_FILE_BYTES, ServicePaths, ServiceSettings};
pub use validator::{
    ConfigDocument, ConfigValidator, ControlAddress, FieldPresence, CONTROL_DIRECTIVE,
    DEFAULT_CONFIG, DEFAULT_CONTROL_HOST, DEFAULT_CONTROL_PORT, INJECTED_HEADER, REQUIRED_FIELDS,
    SECRET_DIRECTIVE,
};
