//! Batch replacement of images across pages.
//!
//! A run walks the plan's pages in order. For each page it scans the content
//! stream, matches the found images against the plan's pairs, and rewrites
//! the owning resource tables in place. The document is locked for one page
//! at a time; cancellation is checked before each page. A single background
//! run reports through a channel of [`RunEvent`]s: one `Progress` per page
//! followed by exactly one terminal event.

use lopdf::{Document, ObjectId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::document::{SharedDocument, WriteLease};
use crate::encode::{encode_image, transparent_placeholder};
use crate::error::{Error, Result};
use crate::plan::{MatchStrategy, Replacement, ReplacementPair, ReplacementPlan};
use crate::raster::{extract_raster, RawRaster};
use crate::scanner::{page_ids, FoundImages, ImageScanner, ResourceTable};

/// Counts reported when a run ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Image instances replaced
    pub replaced: usize,
    /// Recovered per-page and per-image failures
    pub errors: usize,
    pub pages_processed: usize,
    pub pages_total: usize,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }
}

/// Notification from a run, in order
#[derive(Debug)]
pub enum RunEvent {
    /// Percentage of target pages processed, 0..=100
    Progress(u8),
    Completed(RunSummary),
    /// Unrecoverable failure; substitutions made so far stay in place
    Failed { error: Error, summary: RunSummary },
    /// Stopped before the next page; substitutions made so far stay in place
    Cancelled(RunSummary),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunEvent::Progress(_))
    }

    fn state(&self) -> RunState {
        match self {
            RunEvent::Progress(_) => RunState::Running,
            RunEvent::Completed(_) => RunState::Completed,
            RunEvent::Failed { .. } => RunState::Failed,
            RunEvent::Cancelled(_) => RunState::Cancelled,
        }
    }
}

fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (processed * 100 / total).min(100) as u8
}

/// Lazily decoded source raster of a pair
enum SourceRaster {
    Pending,
    Ready(Arc<RawRaster>),
    Unusable,
}

/// Synchronous core of one run
struct BatchRun<'a> {
    plan: &'a ReplacementPlan,
    document: &'a SharedDocument,
    cancel: &'a AtomicBool,
    scanner: ImageScanner,
    /// Replacement image object per pair, built on first use
    targets: Vec<Option<ObjectId>>,
    sources: Vec<SourceRaster>,
    summary: RunSummary,
}

impl<'a> BatchRun<'a> {
    fn new(plan: &'a ReplacementPlan, document: &'a SharedDocument, cancel: &'a AtomicBool) -> Self {
        let pairs = plan.pairs().len();
        Self {
            plan,
            document,
            cancel,
            scanner: ImageScanner::new(),
            targets: vec![None; pairs],
            sources: (0..pairs).map(|_| SourceRaster::Pending).collect(),
            summary: RunSummary {
                pages_total: plan.pages().len(),
                ..RunSummary::default()
            },
        }
    }

    /// Process every target page, emitting progress through `emit`
    fn execute(mut self, mut emit: impl FnMut(RunEvent)) -> RunEvent {
        let plan = self.plan;
        let document = self.document;
        info!(
            pairs = plan.pairs().len(),
            pages = plan.pages().len(),
            strategy = ?plan.strategy(),
            "replacement run started"
        );

        let page_map = match document.read(page_ids) {
            Ok(map) => map,
            Err(error) => return self.fail(error),
        };

        if plan.pages().is_empty() {
            emit(RunEvent::Progress(100));
        }

        for (index, &page) in plan.pages().iter().enumerate() {
            if self.cancel.load(Ordering::Acquire) {
                info!(processed = self.summary.pages_processed, "replacement run cancelled");
                return RunEvent::Cancelled(self.summary);
            }

            let outcome = document.write_leased(|doc| self.process_page(doc, &page_map, page));
            match outcome {
                Ok(Ok(replaced)) => self.summary.replaced += replaced,
                Ok(Err(error)) | Err(error) => return self.fail(error),
            }

            self.summary.pages_processed = index + 1;
            emit(RunEvent::Progress(percent(index + 1, self.summary.pages_total)));
        }

        if self.summary.errors > 0 {
            warn!(errors = self.summary.errors, "replacement finished with recovered errors");
        }
        info!(
            replaced = self.summary.replaced,
            errors = self.summary.errors,
            pages = self.summary.pages_processed,
            "replacement run completed"
        );
        RunEvent::Completed(self.summary)
    }

    fn fail(self, error: Error) -> RunEvent {
        warn!(%error, processed = self.summary.pages_processed, "replacement run failed");
        RunEvent::Failed {
            error,
            summary: self.summary,
        }
    }

    /// Returns the number of substitutions; errors returned here end the run
    fn process_page(&mut self, doc: &mut Document, page_map: &BTreeMap<u32, ObjectId>, page: u32) -> Result<usize> {
        let Some(&page_id) = page_map.get(&page) else {
            warn!(page, "target page does not exist");
            self.summary.errors += 1;
            return Ok(0);
        };

        let found = match self.scanner.scan_page(doc, page, page_id) {
            Ok(found) => found,
            Err(error) if error.is_recoverable() => {
                warn!(page, %error, "page skipped");
                self.summary.errors += 1;
                return Ok(0);
            }
            Err(error) => return Err(error),
        };

        match self.plan.strategy() {
            MatchStrategy::ByName => self.replace_by_name(doc, page, &found),
            MatchStrategy::ByPixelContent => self.replace_by_content(doc, page, &found),
        }
    }

    fn replace_by_name(&mut self, doc: &mut Document, page: u32, found: &FoundImages) -> Result<usize> {
        let plan = self.plan;
        let mut replaced = 0;
        for (index, pair) in plan.pairs().iter().enumerate() {
            let Some(image) = found.get(&pair.source_name) else {
                continue;
            };
            if image.width != pair.width || image.height != pair.height {
                debug!(
                    page,
                    name = %pair.source_name,
                    found = ?(image.width, image.height),
                    wanted = ?(pair.width, pair.height),
                    "same name, different size; left alone"
                );
                continue;
            }

            let target = self.target_image(doc, index)?;
            if self.substitute(doc, page, &image.table, &image.name, target) {
                replaced += 1;
            }
        }
        Ok(replaced)
    }

    fn replace_by_content(&mut self, doc: &mut Document, page: u32, found: &FoundImages) -> Result<usize> {
        let mut replaced = 0;
        let mut replaced_names: HashSet<&str> = HashSet::new();
        // decoded found images for this page only; None marks a failed decode
        let mut page_rasters: HashMap<ObjectId, Option<Arc<RawRaster>>> = HashMap::new();

        let plan = self.plan;
        for (index, pair) in plan.pairs().iter().enumerate() {
            let Some(source) = self.source_raster(doc, index) else {
                continue;
            };
            let source_id = pair.source_image;

            for image in found.iter() {
                if replaced_names.contains(image.name.as_str()) {
                    continue;
                }

                let candidate = if image.image == source_id {
                    Some(Arc::clone(&source))
                } else {
                    page_rasters
                        .entry(image.image)
                        .or_insert_with(|| match extract_raster(doc, image.image) {
                            Ok(raster) => Some(Arc::new(raster)),
                            Err(error) => {
                                warn!(page, name = %image.name, %error, "cannot decode image for comparison");
                                self.summary.errors += 1;
                                None
                            }
                        })
                        .clone()
                };
                let Some(candidate) = candidate else {
                    continue;
                };

                if source.same_pixels(&candidate) {
                    let target = self.target_image(doc, index)?;
                    if self.substitute(doc, page, &image.table, &image.name, target) {
                        replaced_names.insert(image.name.as_str());
                        replaced += 1;
                    }
                    break;
                }
            }
        }
        Ok(replaced)
    }

    fn substitute(
        &mut self,
        doc: &mut Document,
        page: u32,
        table: &ResourceTable,
        name: &str,
        target: ObjectId,
    ) -> bool {
        match table.put(doc, name, target) {
            Ok(()) => {
                debug!(page, name, target = ?target, "image replaced");
                true
            }
            Err(error) => {
                warn!(page, name, %error, "cannot update resource table");
                self.summary.errors += 1;
                false
            }
        }
    }

    /// Decoded source raster of a pair, decoded at most once per run
    fn source_raster(&mut self, doc: &Document, index: usize) -> Option<Arc<RawRaster>> {
        if let SourceRaster::Pending = self.sources[index] {
            let plan = self.plan;
            let pair = &plan.pairs()[index];
            self.sources[index] = match extract_raster(doc, pair.source_image) {
                Ok(raster) => SourceRaster::Ready(Arc::new(raster)),
                Err(error) => {
                    warn!(name = %pair.source_name, %error, "cannot decode requested image; pair skipped");
                    self.summary.errors += 1;
                    SourceRaster::Unusable
                }
            };
        }
        match &self.sources[index] {
            SourceRaster::Ready(raster) => Some(Arc::clone(raster)),
            _ => None,
        }
    }

    /// Replacement image object of a pair, added to the document at most once per run
    fn target_image(&mut self, doc: &mut Document, index: usize) -> Result<ObjectId> {
        if let Some(id) = self.targets[index] {
            return Ok(id);
        }

        let plan = self.plan;
        let pair: &ReplacementPair = &plan.pairs()[index];
        let encoded = match plan.replacement() {
            Replacement::Hide => encode_image(&transparent_placeholder(pair.width, pair.height), plan.encoding())?,
            Replacement::Image(image) => encode_image(image, plan.encoding())?,
        };
        let id = encoded.add_to(doc);
        debug!(name = %pair.source_name, target = ?id, "built replacement image");

        self.targets[index] = Some(id);
        Ok(id)
    }
}

/// Handle to a run started with [`submit`]
#[derive(Debug)]
pub struct RunHandle {
    events: flume::Receiver<RunEvent>,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<RunState>>,
    worker: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Ask the run to stop before its next page
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Progress and completion events, in order
    pub fn events(&self) -> &flume::Receiver<RunEvent> {
        &self.events
    }

    pub fn state(&self) -> RunState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block until the run ends, dropping progress events
    pub fn wait(mut self) -> RunEvent {
        let terminal = loop {
            match self.events.recv() {
                Ok(event) if event.is_terminal() => break event,
                Ok(_) => continue,
                Err(_) => {
                    break RunEvent::Failed {
                        error: Error::DocumentClosed,
                        summary: RunSummary::default(),
                    }
                }
            }
        };
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        terminal
    }
}

fn set_state(state: &Mutex<RunState>, next: RunState) {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    debug_assert!(!guard.is_terminal(), "run already finished");
    *guard = next;
}

/// Start a background run against the document.
///
/// Fails with [`Error::Busy`] if another run holds the document. The plan is
/// moved into the run, so later changes to the caller's selection have no
/// effect on it.
pub fn submit(plan: ReplacementPlan, document: &SharedDocument) -> Result<RunHandle> {
    let lease = document.try_lease()?;

    let (sender, receiver) = flume::unbounded();
    let cancel = Arc::new(AtomicBool::new(false));
    let state = Arc::new(Mutex::new(RunState::Idle));
    set_state(&state, RunState::Running);

    let worker = {
        let document = document.clone();
        let cancel = Arc::clone(&cancel);
        let state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("image-replace".to_string())
            .spawn(move || run_worker(lease, plan, document, cancel, state, sender))?
    };

    Ok(RunHandle {
        events: receiver,
        cancel,
        state,
        worker: Some(worker),
    })
}

fn run_worker(
    lease: WriteLease,
    plan: ReplacementPlan,
    document: SharedDocument,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<RunState>>,
    sender: flume::Sender<RunEvent>,
) {
    let terminal = BatchRun::new(&plan, &document, &cancel).execute(|event| {
        let _ = sender.send(event);
    });
    // release the document before anyone sees the terminal state
    drop(lease);
    set_state(&state, terminal.state());
    let _ = sender.send(terminal);
}

/// Run a plan on the calling thread and return its counts.
///
/// Fails with [`Error::Busy`] if a background run holds the document, or with
/// the run's fatal error.
pub fn run(plan: &ReplacementPlan, document: &SharedDocument) -> Result<RunSummary> {
    let _lease = document.try_lease()?;
    let cancel = AtomicBool::new(false);
    match BatchRun::new(plan, document, &cancel).execute(|_| {}) {
        RunEvent::Completed(summary) | RunEvent::Cancelled(summary) => Ok(summary),
        RunEvent::Failed { error, .. } => Err(error),
        RunEvent::Progress(_) => unreachable!("execute returns a terminal event"),
    }
}
