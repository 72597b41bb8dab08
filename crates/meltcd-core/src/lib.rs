pub mod application;
pub mod apply;
pub mod config;
pub mod credential;
pub mod duration;
pub mod error;
pub mod io;
pub mod manifest;
pub mod paths;
pub mod reconcile;
pub mod registry;
pub mod source;
pub mod store;

pub use error::{MeltcdError, Result};
