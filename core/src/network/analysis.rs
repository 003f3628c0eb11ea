use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use super::address::NetworkAddress;
use super::dedup::DeduplicationTracker;
use super::extract::{AddressExtractor, Role};
use super::filter::PrivateAddressFilter;
use super::geo::{GeolocationResolver, LocationLookup, LookupResult, MaxMindDatabase};
use super::packet_capture::{CaptureRecordSource, PacketRecord, PcapFileSource, DEFAULT_BUFFER_SIZE};
use crate::utils::{current_timestamp, format_capture_time, format_timestamp, generate_session_id};
use crate::{GeoTraceError, Result};

/// Polled by the pipeline once per record.
pub trait CancellationToken {
    fn is_requested(&self) -> bool;
}

/// Shared stop flag, safe to set from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancellationToken for CancelFlag {
    fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationToken for NeverCancel {
    fn is_requested(&self) -> bool {
        false
    }
}

/// Receives one line per reported result.
pub trait OutputSink {
    fn emit(&mut self, line: &str);
}

impl OutputSink for Vec<String> {
    fn emit(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

impl OutputSink for crossbeam_channel::Sender<String> {
    fn emit(&mut self, line: &str) {
        if self.send(line.to_string()).is_err() {
            log::debug!("Output receiver dropped, discarding line");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&mut self, line: &str) {
        println!("{}", line);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = GeoTraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(GeoTraceError::Configuration(format!("Unknown output format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Idle,
            1 => PipelineState::Running,
            2 => PipelineState::Completed,
            3 => PipelineState::Cancelled,
            _ => PipelineState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Cancelled | PipelineState::Failed)
    }
}

/// Current state of a pipeline, readable from other threads while it runs
/// and after `run` has consumed it.
#[derive(Debug, Clone)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(PipelineState::Idle as u8)))
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: PipelineState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::Cancelled => "cancelled",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub records: u64,
    pub ipv4_records: u64,
    pub private_skipped: u64,
    pub duplicates_skipped: u64,
    pub malformed_skipped: u64,
    pub located: u64,
    pub not_found: u64,
    pub lookup_errors: u64,
}

impl RunSummary {
    fn start() -> Self {
        Self {
            run_id: generate_session_id(),
            started_at: format_timestamp(current_timestamp()),
            ..Self::default()
        }
    }

    fn finish(&mut self) {
        self.finished_at = Some(format_timestamp(current_timestamp()));
    }

    /// Number of result lines sent to the sink.
    pub fn emitted(&self) -> u64 {
        self.located + self.not_found + self.lookup_errors
    }

    fn record_result(&mut self, result: &LookupResult) {
        match result {
            LookupResult::Located(_) => self.located += 1,
            LookupResult::NotFound => self.not_found += 1,
            LookupResult::Error { .. } => self.lookup_errors += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub state: PipelineState,
    pub summary: RunSummary,
}

#[derive(Serialize)]
struct ReportLine<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    address: NetworkAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    seen_at: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a LookupResult>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    private: bool,
}

#[derive(Debug, Clone, Copy)]
struct LineFormatter {
    format: OutputFormat,
}

impl LineFormatter {
    fn result_line(&self, role: Option<Role>, address: NetworkAddress, seen_at: Option<&str>, result: &LookupResult) -> String {
        let text = || {
            let label = role.map(Role::label).unwrap_or("IP");
            format!("{}: {} Geolocation: {}", label, address, result.describe(address))
        };
        match self.format {
            OutputFormat::Text => text(),
            OutputFormat::Json => self.json(&ReportLine {
                role,
                address,
                seen_at,
                result: Some(result),
                private: false,
            })
            .unwrap_or_else(text),
        }
    }

    fn private_line(&self, address: NetworkAddress) -> String {
        let text = || format!("Private IP: {}", address);
        match self.format {
            OutputFormat::Text => text(),
            OutputFormat::Json => self.json(&ReportLine {
                role: None,
                address,
                seen_at: None,
                result: None,
                private: true,
            })
            .unwrap_or_else(text),
        }
    }

    fn json(&self, line: &ReportLine<'_>) -> Option<String> {
        serde_json::to_string(line)
            .map_err(|e| log::warn!("Falling back to text output: {}", e))
            .ok()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub format: OutputFormat,
    pub max_packets: Option<usize>,
    pub buffer_size: usize,
    pub filter: PrivateAddressFilter,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            max_packets: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            filter: PrivateAddressFilter::canonical(),
        }
    }
}

/// One analysis run over one capture.
///
/// `run` consumes the pipeline, so the resolver and its database are
/// dropped whichever way the run ends.
pub struct AnalysisPipeline<S, D: LocationLookup> {
    source: S,
    resolver: GeolocationResolver<D>,
    extractor: AddressExtractor,
    filter: PrivateAddressFilter,
    tracker: DeduplicationTracker,
    formatter: LineFormatter,
    max_packets: Option<usize>,
    state: StateHandle,
    summary: RunSummary,
}

impl AnalysisPipeline<PcapFileSource, MaxMindDatabase> {
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(capture_path: P, database_path: Q, options: PipelineOptions) -> Result<Self> {
        let source = PcapFileSource::open(capture_path, options.buffer_size)?;
        let resolver = GeolocationResolver::open(database_path)?;
        Ok(Self::new(source, resolver, options))
    }
}

impl<S: CaptureRecordSource, D: LocationLookup> AnalysisPipeline<S, D> {
    pub fn new(source: S, resolver: GeolocationResolver<D>, options: PipelineOptions) -> Self {
        Self {
            source,
            resolver,
            extractor: AddressExtractor::new(),
            filter: options.filter,
            tracker: DeduplicationTracker::new(),
            formatter: LineFormatter { format: options.format },
            max_packets: options.max_packets,
            state: StateHandle::new(),
            summary: RunSummary::start(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Handle that keeps reporting the state once `run` takes the pipeline.
    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.summary.run_id
    }

    /// Drives the run to a terminal state. A capture read failure is
    /// returned as `Err` and leaves the state handle at `Failed`; lines
    /// emitted before it are not retracted.
    pub fn run(mut self, cancel: &dyn CancellationToken, sink: &mut dyn OutputSink) -> Result<RunReport> {
        self.state.set(PipelineState::Running);
        log::info!("Starting analysis run {}", self.summary.run_id);

        let outcome = self.drive(cancel, sink);
        self.summary.finish();

        match outcome {
            Ok(state) => {
                self.state.set(state);
                log_summary(state, &self.summary);
                Ok(RunReport {
                    state,
                    summary: self.summary.clone(),
                })
            }
            Err(e) => {
                self.state.set(PipelineState::Failed);
                log::error!("Analysis run {} failed: {}", self.summary.run_id, e);
                log_summary(PipelineState::Failed, &self.summary);
                Err(e)
            }
        }
    }

    fn drive(&mut self, cancel: &dyn CancellationToken, sink: &mut dyn OutputSink) -> Result<PipelineState> {
        loop {
            if cancel.is_requested() {
                log::info!("Analysis stopped by user after {} records", self.summary.records);
                return Ok(PipelineState::Cancelled);
            }

            if let Some(max) = self.max_packets {
                if self.summary.records >= max as u64 {
                    log::info!("Reached maximum packet count: {}", max);
                    return Ok(PipelineState::Completed);
                }
            }

            let record = match self.source.next_record()? {
                Some(record) => record,
                None => return Ok(PipelineState::Completed),
            };
            self.summary.records += 1;
            self.process_record(&record, sink);
        }
    }

    fn process_record(&mut self, record: &PacketRecord, sink: &mut dyn OutputSink) {
        let endpoints = match self.extractor.extract(record) {
            Some(endpoints) => endpoints,
            None => return,
        };
        self.summary.ipv4_records += 1;

        let seen_at = match self.formatter.format {
            OutputFormat::Json => format_capture_time(record.ts_sec, record.ts_usec),
            OutputFormat::Text => None,
        };

        for (role, address) in endpoints.candidates() {
            if self.filter.is_private(address) {
                log::debug!("Skipping private {}: {}", role.label(), address);
                self.summary.private_skipped += 1;
                continue;
            }
            if !self.tracker.should_process(address) {
                self.summary.duplicates_skipped += 1;
                continue;
            }

            let result = self.resolver.resolve(address);
            self.summary.record_result(&result);
            let line = self.formatter.result_line(Some(role), address, seen_at.as_deref(), &result);
            sink.emit(&line);
        }
    }
}

fn log_summary(state: PipelineState, summary: &RunSummary) {
    log::info!(
        "Analysis {} ({}): {} records, {} IPv4, {} located, {} not found, {} errors, {} private skipped, {} duplicates skipped",
        state,
        summary.run_id,
        summary.records,
        summary.ipv4_records,
        summary.located,
        summary.not_found,
        summary.lookup_errors,
        summary.private_skipped,
        summary.duplicates_skipped,
    );
}

/// Resolves a list of textual addresses with the same filter and dedup
/// rules as a capture run. Malformed entries are logged and skipped;
/// private entries are reported without a lookup.
pub fn lookup_listed<D, I, T>(
    inputs: I,
    filter: &PrivateAddressFilter,
    resolver: &mut GeolocationResolver<D>,
    format: OutputFormat,
    sink: &mut dyn OutputSink,
) -> RunSummary
where
    D: LocationLookup,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let formatter = LineFormatter { format };
    let mut tracker = DeduplicationTracker::new();
    let mut summary = RunSummary::start();

    for input in inputs {
        let input = input.as_ref().trim();
        if input.is_empty() {
            continue;
        }
        summary.records += 1;

        let address = match NetworkAddress::parse(input) {
            Ok(address) => address,
            Err(e) => {
                log::warn!("{}", e);
                summary.malformed_skipped += 1;
                continue;
            }
        };

        if !tracker.should_process(address) {
            summary.duplicates_skipped += 1;
            continue;
        }

        if filter.is_private(address) {
            summary.private_skipped += 1;
            sink.emit(&formatter.private_line(address));
            continue;
        }

        let result = resolver.resolve(address);
        summary.record_result(&result);
        sink.emit(&formatter.result_line(None, address, None, &result));
    }

    summary.finish();
    summary
}
