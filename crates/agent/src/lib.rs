pub mod decision;
pub mod dispatch;
pub mod event;
pub mod prompt;
pub mod runtime;
pub mod scratchpad;
pub mod traits;

pub use decision::{AgentDecision, DecisionAction, DecisionStatus};
pub use dispatch::{Dispatched, Dispatcher};
pub use event::{AgentEvent, EventSink};
pub use prompt::PromptBuilder;
pub use runtime::{AgentLoop, RunOutcome};
pub use scratchpad::{CompletionReason, EntryKind, Scratchpad, ScratchpadEntry, ScratchpadStats};
pub use traits::{CompletionModel, CompletionRequest, ContextExtractor, ExtractedContext, PageObserver, PageSnapshot};
