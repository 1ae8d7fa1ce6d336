//! End-to-end `run` pipeline: input CSV → observe → normalize → arbitrate →
//! report extraction → classify → output CSVs.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use mneprofiler_arbiter::{merge, ArbitrationPolicy};
use mneprofiler_classifier::Classification;
use mneprofiler_normalize::{normalize, RawObservation};
use mneprofiler_shared::{
    AppConfig, Enterprise, FieldKind, ProfilerError, Result, RunId, SourceKind, SourceRecord,
};

use crate::output;

/// Everything the pipeline needs from the outside world, behind one seam so
/// batches run against stubs in tests. The live wiring is
/// [`crate::live::LiveCollaborators`].
pub trait Collaborators: Send + Sync {
    /// Raw observations from every configured source. Per-source failures
    /// are logged and skipped inside; only fatal errors surface.
    fn observations(
        &self,
        enterprise: &Enterprise,
    ) -> impl Future<Output = Result<Vec<(SourceKind, RawObservation)>>> + Send;

    /// Try to recover `missing` figures from the enterprise's annual
    /// report. `None` when no report can be resolved or read.
    fn report_observation(
        &self,
        enterprise: &Enterprise,
        website: Option<&str>,
        missing: &[FieldKind],
    ) -> impl Future<Output = Result<Option<RawObservation>>> + Send;

    /// Classify a free-text activity description into a NACE code.
    fn classify(&self, activity: &str) -> impl Future<Output = Result<Classification>> + Send;
}

/// Outcome for one enterprise. A failed enterprise still yields a row with
/// all fields absent; the batch never loses an input line.
#[derive(Debug)]
pub struct EnterpriseOutcome {
    pub enterprise: Enterprise,
    /// Every contributing normalized record, winners and losers alike.
    pub records: Vec<SourceRecord>,
    pub profile: Option<mneprofiler_shared::MergedProfile>,
    pub classification: Option<Classification>,
    /// What went wrong, when something did.
    pub error: Option<String>,
}

impl EnterpriseOutcome {
    fn failed(enterprise: Enterprise, error: impl Into<String>) -> Self {
        Self {
            enterprise,
            records: Vec::new(),
            profile: None,
            classification: None,
            error: Some(error.into()),
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: RunId,
    /// Input enterprises, all of them present in the extraction output.
    pub enterprises: usize,
    /// Enterprises whose row carries an error.
    pub failed: usize,
    /// Enterprises that received a NACE code.
    pub classified: usize,
    pub discovery_path: PathBuf,
    pub extraction_path: PathBuf,
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting batch status.
pub trait ProgressReporter: Send + Sync {
    /// Called once before the first enterprise starts.
    fn started(&self, total: usize);
    /// Called as each enterprise finishes, in completion order.
    fn enterprise_done(&self, enterprise: &Enterprise, ok: bool);
    /// Called when the batch completes.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn started(&self, _total: usize) {}
    fn enterprise_done(&self, _enterprise: &Enterprise, _ok: bool) {}
    fn done(&self, _report: &PipelineReport) {}
}

/// Run the full profiling pipeline over a batch of enterprises.
///
/// Enterprises run concurrently up to the configured limit. A failure in
/// one enterprise is isolated to its own rows; a fatal configuration error
/// stops new enterprises from launching and aborts the remainder.
#[instrument(skip_all, fields(enterprises = enterprises.len()))]
pub async fn run_pipeline<C>(
    config: Arc<AppConfig>,
    enterprises: Vec<Enterprise>,
    collaborators: Arc<C>,
    progress: Arc<dyn ProgressReporter>,
) -> Result<PipelineReport>
where
    C: Collaborators + 'static,
{
    let start = Instant::now();
    let run_id = RunId::new();
    let total = enterprises.len();
    info!(%run_id, total, "starting profiling run");

    let policy = Arc::new(ArbitrationPolicy::from_config(&config.arbitration)?);
    let output_dir = PathBuf::from(&config.pipeline.output_dir);
    std::fs::create_dir_all(&output_dir).map_err(|e| ProfilerError::io(&output_dir, e))?;

    progress.started(total);

    let semaphore = Arc::new(Semaphore::new(config.pipeline.concurrency.max(1) as usize));
    let fatal = Arc::new(AtomicBool::new(false));
    let mut tasks: JoinSet<(usize, EnterpriseOutcome)> = JoinSet::new();
    let mut outcomes: Vec<Option<EnterpriseOutcome>> = Vec::with_capacity(total);
    outcomes.resize_with(total, || None);

    for (idx, enterprise) in enterprises.into_iter().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProfilerError::config("concurrency limiter closed unexpectedly"))?;

        if fatal.load(Ordering::SeqCst) {
            outcomes[idx] = Some(EnterpriseOutcome::failed(
                enterprise,
                "aborted after fatal configuration error",
            ));
            continue;
        }

        let config = Arc::clone(&config);
        let collaborators = Arc::clone(&collaborators);
        let policy = Arc::clone(&policy);
        let progress = Arc::clone(&progress);
        let fatal = Arc::clone(&fatal);
        tasks.spawn(async move {
            let _permit = permit;
            let outcome =
                match profile_enterprise(&config, &*collaborators, &policy, &enterprise).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        if matches!(e, ProfilerError::Config { .. }) {
                            fatal.store(true, Ordering::SeqCst);
                        }
                        warn!(enterprise = %enterprise.id, error = %e, "enterprise failed");
                        EnterpriseOutcome::failed(enterprise, e.to_string())
                    }
                };
            progress.enterprise_done(&outcome.enterprise, outcome.error.is_none());
            (idx, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (idx, outcome) =
            joined.map_err(|e| ProfilerError::config(format!("worker task panicked: {e}")))?;
        outcomes[idx] = Some(outcome);
    }
    let outcomes: Vec<EnterpriseOutcome> = outcomes.into_iter().flatten().collect();

    let discovery_path = output_dir.join("discovery.csv");
    let extraction_path = output_dir.join("extraction.csv");
    output::write_discovery(&discovery_path, &outcomes)?;
    output::write_extraction(&extraction_path, &outcomes)?;

    let report = PipelineReport {
        run_id,
        enterprises: outcomes.len(),
        failed: outcomes.iter().filter(|o| o.error.is_some()).count(),
        classified: outcomes
            .iter()
            .filter(|o| o.classification.is_some())
            .count(),
        discovery_path,
        extraction_path,
        elapsed: start.elapsed(),
    };
    progress.done(&report);
    info!(
        run_id = %report.run_id,
        enterprises = report.enterprises,
        failed = report.failed,
        classified = report.classified,
        elapsed_ms = report.elapsed.as_millis(),
        "profiling run complete"
    );
    Ok(report)
}

/// Profile a single enterprise: observe, normalize, arbitrate, fill gaps
/// from the annual report, classify.
#[instrument(skip_all, fields(enterprise = %enterprise.id))]
async fn profile_enterprise<C: Collaborators>(
    config: &AppConfig,
    collaborators: &C,
    policy: &ArbitrationPolicy,
    enterprise: &Enterprise,
) -> Result<EnterpriseOutcome> {
    let observations = collaborators.observations(enterprise).await?;
    let mut records: Vec<SourceRecord> = observations
        .iter()
        .map(|(source, raw)| normalize(raw, *source, &config.reporting))
        .collect();
    let mut profile = merge(enterprise, &records, policy);

    let missing: Vec<FieldKind> = FieldKind::ALL
        .iter()
        .copied()
        .filter(|kind| kind.is_numeric() && profile.field(*kind).is_none())
        .collect();
    if !missing.is_empty() {
        let website = profile
            .field(FieldKind::Website)
            .and_then(|f| f.value.as_text())
            .map(str::to_string);
        match collaborators
            .report_observation(enterprise, website.as_deref(), &missing)
            .await
        {
            Ok(Some(raw)) => {
                records.push(normalize(&raw, SourceKind::ReportDerived, &config.reporting));
                profile = merge(enterprise, &records, policy);
            }
            Ok(None) => {}
            Err(e) if matches!(e, ProfilerError::Config { .. }) => return Err(e),
            Err(e) => {
                warn!(enterprise = %enterprise.id, error = %e, "report recovery failed, figures stay absent");
            }
        }
    }

    // Integrity defects (e.g. a code missing from the section mapping) are
    // recorded on the outcome; the row with the merged figures still goes
    // out. Transient/malformed classifier trouble just leaves the code
    // absent.
    let mut error = None;
    let classification = match profile
        .field(FieldKind::Activity)
        .and_then(|f| f.value.as_text())
    {
        Some(activity) => match collaborators.classify(activity).await {
            Ok(classification) => Some(classification),
            Err(e) if matches!(e, ProfilerError::Config { .. }) => return Err(e),
            Err(e @ ProfilerError::DataIntegrity { .. }) => {
                warn!(enterprise = %enterprise.id, error = %e, "classification hit a data defect");
                error = Some(e.to_string());
                None
            }
            Err(e) => {
                warn!(enterprise = %enterprise.id, error = %e, "classification failed, code stays absent");
                None
            }
        },
        None => None,
    };

    Ok(EnterpriseOutcome {
        enterprise: enterprise.clone(),
        records,
        profile: Some(profile),
        classification,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use mneprofiler_normalize::RawField;

    fn enterprise(id: &str, name: &str) -> Enterprise {
        Enterprise {
            id: id.into(),
            name: name.into(),
            country_hint: None,
            ticker_hint: None,
        }
    }

    /// One canned classifier behavior per test.
    enum StubClassify {
        Code(Classification),
        Outage,
        BadMapping,
    }

    /// Stub sources: canned observations per enterprise name, a canned
    /// report, and a fixed classification.
    struct StubCollaborators {
        observations: BTreeMap<String, Vec<(SourceKind, RawObservation)>>,
        report: Option<RawObservation>,
        classify: StubClassify,
        fail_for: Option<String>,
        report_requests: Mutex<Vec<Vec<FieldKind>>>,
    }

    impl StubCollaborators {
        fn new() -> Self {
            Self {
                observations: BTreeMap::new(),
                report: None,
                classify: StubClassify::Code(Classification {
                    code: "27.20".into(),
                    section: 'C',
                }),
                fail_for: None,
                report_requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Collaborators for StubCollaborators {
        async fn observations(
            &self,
            enterprise: &Enterprise,
        ) -> Result<Vec<(SourceKind, RawObservation)>> {
            if self.fail_for.as_deref() == Some(enterprise.id.as_str()) {
                return Err(ProfilerError::integrity("stub integrity failure"));
            }
            Ok(self
                .observations
                .get(&enterprise.id)
                .cloned()
                .unwrap_or_default())
        }

        async fn report_observation(
            &self,
            _enterprise: &Enterprise,
            _website: Option<&str>,
            missing: &[FieldKind],
        ) -> Result<Option<RawObservation>> {
            self.report_requests
                .lock()
                .expect("lock")
                .push(missing.to_vec());
            Ok(self.report.clone())
        }

        async fn classify(&self, _activity: &str) -> Result<Classification> {
            match &self.classify {
                StubClassify::Code(c) => Ok(c.clone()),
                StubClassify::Outage => Err(ProfilerError::transient("stub classifier down")),
                StubClassify::BadMapping => {
                    Err(ProfilerError::integrity("code 99.99 not in section mapping"))
                }
            }
        }
    }

    fn observation(fields: &[(&str, &str)]) -> RawObservation {
        let mut obs = RawObservation::new("https://stub.example.com/doc");
        for (name, value) in fields {
            obs = obs.with_field(
                name,
                RawField {
                    value: (*value).to_string(),
                    ..Default::default()
                },
            );
        }
        obs
    }

    fn config(dir: &std::path::Path) -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        config.pipeline.output_dir = dir.to_string_lossy().into_owned();
        config.pipeline.concurrency = 2;
        Arc::new(config)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_input_enterprise_gets_an_extraction_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut stub = StubCollaborators::new();
        stub.observations.insert(
            "MNE001".into(),
            vec![(
                SourceKind::Registry,
                observation(&[
                    ("turnover", "120 million"),
                    ("employees", "4500"),
                    ("assets", "300 million"),
                    ("activity", "battery manufacturing"),
                    ("country", "France"),
                ]),
            )],
        );
        stub.fail_for = Some("MNE002".into());

        let report = run_pipeline(
            config(dir.path()),
            vec![enterprise("MNE001", "Acme"), enterprise("MNE002", "Bolt")],
            Arc::new(stub),
            Arc::new(SilentProgress),
        )
        .await
        .expect("pipeline");

        assert_eq!(report.enterprises, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.classified, 1);

        let extraction = std::fs::read_to_string(&report.extraction_path).expect("extraction");
        let lines: Vec<&str> = extraction.lines().collect();
        assert_eq!(lines.len(), 3, "header plus one row per input enterprise");
        assert!(lines[1].starts_with("MNE001;Acme;120000000;4500;300000000;"));
        assert!(lines[1].contains(";27.20;C;FR"));
        // The failed enterprise keeps its identity, everything else blank.
        assert_eq!(lines[2], "MNE002;Bolt;;;;;;;;");
    }

    #[tokio::test]
    async fn report_fills_only_missing_numeric_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut stub = StubCollaborators::new();
        stub.observations.insert(
            "MNE001".into(),
            vec![(
                SourceKind::Registry,
                observation(&[("employees", "4500"), ("activity", "retail")]),
            )],
        );
        stub.report = Some(observation(&[
            ("turnover", "2.5 billion"),
            ("assets", "1 billion"),
        ]));

        let report = run_pipeline(
            config(dir.path()),
            vec![enterprise("MNE001", "Acme")],
            Arc::new(stub),
            Arc::new(SilentProgress),
        )
        .await
        .expect("pipeline");
        assert_eq!(report.failed, 0);

        let extraction = std::fs::read_to_string(&report.extraction_path).expect("extraction");
        let row = extraction.lines().nth(1).expect("row");
        assert!(row.contains(";2500000000;4500;1000000000;"));
    }

    #[tokio::test]
    async fn report_is_not_consulted_when_figures_are_complete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut stub = StubCollaborators::new();
        stub.observations.insert(
            "MNE001".into(),
            vec![(
                SourceKind::Registry,
                observation(&[
                    ("turnover", "1 million"),
                    ("employees", "10"),
                    ("assets", "2 million"),
                ]),
            )],
        );
        let stub = Arc::new(stub);

        run_pipeline(
            config(dir.path()),
            vec![enterprise("MNE001", "Acme")],
            Arc::clone(&stub),
            Arc::new(SilentProgress),
        )
        .await
        .expect("pipeline");

        assert!(stub.report_requests.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn classifier_outage_leaves_code_absent_not_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut stub = StubCollaborators::new();
        stub.observations.insert(
            "MNE001".into(),
            vec![(
                SourceKind::Registry,
                observation(&[("turnover", "1 million"), ("activity", "retail")]),
            )],
        );
        stub.classify = StubClassify::Outage;

        let report = run_pipeline(
            config(dir.path()),
            vec![enterprise("MNE001", "Acme")],
            Arc::new(stub),
            Arc::new(SilentProgress),
        )
        .await
        .expect("pipeline");

        assert_eq!(report.failed, 0);
        assert_eq!(report.classified, 0);
        let extraction = std::fs::read_to_string(&report.extraction_path).expect("extraction");
        let row = extraction.lines().nth(1).expect("row");
        assert!(row.contains(";retail;;;"));
    }

    #[tokio::test]
    async fn integrity_defect_is_surfaced_but_the_row_survives() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut stub = StubCollaborators::new();
        stub.observations.insert(
            "MNE001".into(),
            vec![(
                SourceKind::Registry,
                observation(&[("turnover", "1 million"), ("activity", "retail")]),
            )],
        );
        stub.classify = StubClassify::BadMapping;

        let report = run_pipeline(
            config(dir.path()),
            vec![enterprise("MNE001", "Acme")],
            Arc::new(stub),
            Arc::new(SilentProgress),
        )
        .await
        .expect("pipeline");

        // The data defect counts as a failure in the report, unlike a
        // transient classifier outage.
        assert_eq!(report.failed, 1);
        assert_eq!(report.classified, 0);
        // The merged figures still go out on the row.
        let extraction = std::fs::read_to_string(&report.extraction_path).expect("extraction");
        let row = extraction.lines().nth(1).expect("row");
        assert!(row.contains(";1000000;"));
        assert!(row.contains(";retail;;;"));
    }

    #[tokio::test]
    async fn discovery_lists_every_contributing_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut stub = StubCollaborators::new();
        stub.observations.insert(
            "MNE001".into(),
            vec![
                (SourceKind::Registry, observation(&[("turnover", "1 million")])),
                (
                    SourceKind::Encyclopedic,
                    observation(&[("turnover", "1.1 million")]),
                ),
            ],
        );

        let report = run_pipeline(
            config(dir.path()),
            vec![enterprise("MNE001", "Acme")],
            Arc::new(stub),
            Arc::new(SilentProgress),
        )
        .await
        .expect("pipeline");

        let discovery = std::fs::read_to_string(&report.discovery_path).expect("discovery");
        let lines: Vec<&str> = discovery.lines().collect();
        // Loser of the arbitration is still reported.
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().any(|l| l.contains(";registry;")));
        assert!(lines.iter().any(|l| l.contains(";encyclopedic;")));
    }
}
