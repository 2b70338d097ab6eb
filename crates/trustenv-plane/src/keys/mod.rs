//! Owner key management

mod registry;

pub use registry::{KeyRegistry, RegistryError, SYSTEM_OWNER};
