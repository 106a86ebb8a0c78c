pub mod answer;
pub mod apex;
pub mod contents;
pub mod errors;
pub mod manager;
pub mod record;
pub mod refresh;
pub mod storage;
pub mod tree;
pub mod types;

pub use apex::{ApexZone, ZoneKind, ZoneSettings};
pub use contents::{RecordSet, ZoneContents};
pub use errors::{Result, ZoneError};
pub use manager::ZoneManager;
pub use record::{RecordInfo, ZoneRecord};
pub use refresh::{RefreshTimer, SyncState};
pub use storage::{JsonZoneStorage, ZoneSnapshot, ZoneStorage};
pub use tree::DomainTree;
pub use types::{
    DnssecStatus, SignedZone, ZoneInfo, ZoneNotify, ZoneSigner, ZoneTransfer, ZoneType, ZoneUpdate, ZonesPage,
};

/// Zone constants
pub mod constants {
    /// Zones per page when a listing does not ask for a size
    pub const DEFAULT_ZONES_PER_PAGE: usize = 10;

    /// Delay before a triggered refresh runs (5 seconds)
    pub const DEFAULT_TRIGGER_DELAY_MS: u64 = 5000;
}
