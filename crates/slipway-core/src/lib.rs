pub mod error;
pub mod models;
pub mod secrets;
pub mod settings;
pub mod store;

pub use error::DeployError;
pub use secrets::{CodecError, SecretCodec};
pub use settings::Settings;
