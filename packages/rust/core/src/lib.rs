//! Pipeline orchestrator: batches enterprises through observe → normalize
//! → arbitrate → report recovery → classify, and emits the tabular output.

pub mod live;
pub mod output;
pub mod pipeline;

pub use live::LiveCollaborators;
pub use output::{read_enterprises, write_discovery, write_extraction};
pub use pipeline::{
    run_pipeline, Collaborators, EnterpriseOutcome, PipelineReport, ProgressReporter,
    SilentProgress,
};
