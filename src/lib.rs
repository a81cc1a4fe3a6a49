pub mod config;
pub mod dns;
pub mod dnssec;
pub mod error;
pub mod resolver;
pub mod smessage;

pub use config::Config;
pub use dns::DnsPacket;
pub use resolver::{UpstreamResolver, ValidatedResponse, ValidatingResolver};
pub use smessage::{SMessage, SecurityStatus};
