// Sysmex XP analyzer driver.
//
// Bridges an ASTM E1381/E1394-97 hematology analyzer to an HL7 v2.5.1 LIS
// by implementing the IHE LAB-27 (query), LAB-28 (order download) and
// LAB-29 (result upload) transactions. The link layer, record grammar,
// LIVD mapping and translation live here; LIS transport and archiving are
// pluggable collaborators.

pub mod coordinator;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod mapping;
pub mod protocol;
pub mod supervisor;
pub mod translate;
pub mod types;
pub mod upstream;

pub use driver::SysmexDriver;
pub use error::{BridgeError, BridgeResult};
pub use mapping::MappingTable;
pub use types::{AnalyzerConfig, ConnectionKind, ConnectionPolicy, LinkConnectionState, LinkMode};
pub use upstream::{FileArchiver, HttpUpstream, MessageArchiver, NullArchiver, UpstreamClient};
