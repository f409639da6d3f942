// ── Domain model ──

pub mod credentials;
pub mod device;

pub use credentials::{CredentialRecord, TokenBundle};
pub use device::{DeviceSnapshot, ResolvedDevice};
