//! Configuration: the environment contract and the on-disk layout.
//!
//! Every value arrives through environment variables and passes through the
//! validation coercers; a missing required credential is a configuration
//! error surfaced before anything starts. There is no config file and no
//! dynamic evaluation anywhere in the path.

mod layout;
mod settings;

pub use layout::DataLayout;
pub use settings::{ConfigError, PublishSettings, Settings, TrendSettings};
