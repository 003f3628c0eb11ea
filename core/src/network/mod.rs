pub mod address;
pub mod packet_capture;
pub mod extract;
pub mod filter;
pub mod dedup;
pub mod geo;
pub mod analysis;

#[cfg(test)]
pub(crate) mod test_support;

pub use address::{MalformedAddressError, NetworkAddress};
pub use packet_capture::{CaptureRecordSource, LinkType, PacketRecord, PcapFileSource};
pub use extract::{AddressExtractor, Endpoints, Role};
pub use filter::{PrivateAddressFilter, PrivateRange};
pub use dedup::DeduplicationTracker;
pub use geo::{GeoLocation, GeolocationResolver, LocationLookup, LookupResult, MaxMindDatabase, QueryError};
pub use analysis::{
    lookup_listed, AnalysisPipeline, CancelFlag, CancellationToken, OutputFormat, OutputSink, PipelineOptions,
    PipelineState, RunReport, RunSummary, StateHandle, StdoutSink,
};
