use crossbeam_channel::{unbounded, Receiver};
use std::thread::{self, JoinHandle};
use crate::network::analysis::{AnalysisPipeline, CancelFlag, PipelineState, RunReport, StateHandle};
use crate::network::geo::LocationLookup;
use crate::network::packet_capture::CaptureRecordSource;
use crate::{GeoTraceError, Result};

/// Runs one pipeline on a dedicated thread. Lines arrive on `lines()` and
/// the channel closes when the run ends.
pub struct AnalysisWorker {
    handle: JoinHandle<Result<RunReport>>,
    cancel: CancelFlag,
    state: StateHandle,
    lines: Receiver<String>,
}

impl AnalysisWorker {
    pub fn spawn<S, D>(pipeline: AnalysisPipeline<S, D>) -> Result<Self>
    where
        S: CaptureRecordSource + Send + 'static,
        D: LocationLookup + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let cancel = CancelFlag::new();
        let token = cancel.clone();
        let run_id = pipeline.run_id().to_string();
        let state = pipeline.state_handle();

        let handle = thread::Builder::new()
            .name(format!("analysis-{}", &run_id[..8.min(run_id.len())]))
            .spawn(move || {
                let mut sink = tx;
                pipeline.run(&token, &mut sink)
            })?;

        Ok(Self {
            handle,
            cancel,
            state,
            lines: rx,
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn lines(&self) -> Receiver<String> {
        self.lines.clone()
    }

    pub fn join(self) -> Result<RunReport> {
        self.handle
            .join()
            .map_err(|_| GeoTraceError::Worker("analysis thread panicked".to_string()))?
    }
}
