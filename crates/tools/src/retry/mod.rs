pub mod blockers;
pub mod policy;

pub use blockers::{
    default_strategies, BlockerHost, BlockerStrategy, CookieConsentStrategy, DismissAction, ModalDialogStrategy,
    PageProbe, ProbeElement, SignupOverlayStrategy,
};
pub use policy::{classify, FailureClass, RetryOutcome, RetryPolicy};
