//! Bundled handlers.

mod reloader;

pub use reloader::{DEFAULT_LABEL_SELECTOR, RELOADER_NAME, Reloader};
