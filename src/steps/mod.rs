//! 具体 step：澄清 → 细化 → 发现 → 规划

pub mod clarification;
pub mod discovery;
pub mod planning;
pub mod refinement;

pub use clarification::{
    ClarificationInput, ClarificationOutcome, ClarificationState, ClarificationStep,
    ClarifyingQuestion,
};
pub use discovery::{DiscoveredFile, DiscoveryInput, DiscoveryOutcome, DiscoveryState, DiscoveryStep};
pub use planning::{PlanDraft, PlanTask, PlanningInput, PlanningOutcome, PlanningState, PlanningStep};
pub use refinement::{
    Clarification, RefinementInput, RefinementOutcome, RefinementState, RefinementStep,
};
