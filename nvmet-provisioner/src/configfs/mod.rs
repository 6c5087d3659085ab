pub mod attr;
pub mod error;
pub mod layout;
pub mod types;

pub use error::{ConfigfsError, Result};
pub use layout::{ConfigfsLayout, NAMESPACE_ID, PORT_ID};
pub use types::{AddressFamily, DevicePath, DriveUuid, SubsystemName, Transport};
