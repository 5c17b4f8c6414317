pub mod condition;
pub mod error;
pub mod locator;
pub mod protocol;
pub mod result;
pub mod scope;
pub mod step;

pub use condition::{ElementCheck, ElementCondition, StateCheck, StateCondition, SuccessCondition};
pub use error::DomError;
pub use locator::{Disambiguator, LocatorBundle, LocatorStrategy, StrategyFeatures, StrategyKind};
pub use protocol::{ElementInfo, ElementState, NodeId, PageInfo};
pub use result::{
    Candidate, FailureDescriptor, ReplayFailure, ResolveMetrics, ResolveOutcome, ResolveResult,
    VerificationResult, WaitResult,
};
pub use scope::Scope;
pub use step::{ActionKind, RecordedStep, StepPayload};
