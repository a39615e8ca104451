pub mod cmd;
pub mod config;
pub mod context;
pub mod error;
pub mod k8s;
pub mod kafka;
pub mod keycloak;
pub mod olm;
pub mod operator;
pub mod probe;
pub mod registry;
pub mod scenarios;
pub mod storage;
pub mod suite;
pub mod wait;

pub use crate::config::{Flags, SuiteConfig};
pub use crate::error::{Error, Result};
pub use crate::suite::Suite;
