//! Built-in components
//!
//! - [`zone`]: geographic regions with live occupancy counts and
//!   storage-backed CRUD
//! - [`isy994`]: setup and options flows for Universal Devices ISY controllers
//! - [`version`]: setup flow choosing where version information comes from

pub mod isy994;
pub mod version;
pub mod zone;
