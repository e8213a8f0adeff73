pub mod config;
pub mod debounce;
pub mod decryption;
pub mod error;
pub mod events;
pub mod filter;
pub mod gateway;
pub mod providers;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod store;
pub mod timeout;
pub mod tokio_tools;
pub mod transition;
pub mod transport;
pub mod types;

#[cfg(test)]
pub mod test_support;

pub use config::SyncConfig;
pub use error::{ErrorClass, Operation, ProviderError, SyncError, SyncResult};
pub use events::TableEvent;
pub use gateway::{GatewayConfig, HttpGateway};
pub use providers::Providers;
pub use session::TableSync;
pub use store::{StateStore, TableState};
pub use transport::{EventTransport, WsPushConfig, WsPushProvider};
