pub mod blocking;
pub mod client;
pub mod config;
pub mod dns;
pub mod error;
pub mod zone;

pub use dns::DNSPacket;
pub use zone::{ZoneError, ZoneManager};
