//! Configuration and snapshot types shared by the client, the connection
//! manager and the subscription registry.

pub mod connection_options;
pub mod registry_config;
pub mod remote_error;
pub mod subscription_id;
pub mod subscription_info;
pub mod subscription_options;
pub mod subscription_status;

#[cfg(test)]
mod tests;

pub use connection_options::ConnectionOptions;
pub use registry_config::RegistryConfig;
pub use remote_error::RemoteError;
pub use subscription_id::SubscriptionId;
pub use subscription_info::SubscriptionInfo;
pub use subscription_options::{SubscriptionOptions, SubscriptionPriority};
pub use subscription_status::SubscriptionStatus;
