//! Types shared by the Google Drive tool server crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
