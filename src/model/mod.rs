pub mod device;
pub mod domain;
pub mod pool;

pub use device::{Device, DeviceAssignment, DeviceClass, DeviceKey};
pub use domain::{Domain, DomainClass, PowerState, StorageUsage, VmRef};
pub use pool::Pool;
