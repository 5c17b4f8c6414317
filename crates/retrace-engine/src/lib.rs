pub mod clock;
pub mod config;
pub mod corrections;
pub mod dom;
pub mod extract;
pub mod formatter;
pub mod recovery;
pub mod replay;
pub mod resolution;
pub mod verifier;
pub mod wait;

pub use clock::{CancelFlag, Clock, Deadline, ManualClock, SystemClock};
pub use corrections::{CorrectionSink, CorrectionStore, NullSink};
pub use dom::{DomAccessor, SnapshotDom};
pub use extract::FeatureExtractor;
pub use recovery::RecoveryEngine;
pub use replay::{ActionError, ActionPerformer, StepReplayer, StepReport, StepStatus, WorkflowReport};
pub use resolution::{CandidateFinder, ResolveOptions, Resolver};
pub use retrace_common as model;
pub use verifier::Verifier;
pub use wait::StateWaiter;
