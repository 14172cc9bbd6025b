//! Advisory bridge port trait.

use crate::domain::error::EngineError;
use crate::domain::fusion::AdvisoryOpinion;

pub trait AdvisoryPort {
    /// Opinion on `symbol` given the textual rendering of its signal bundle.
    /// Failures are reported as `AdvisoryUnavailable` and never abort a run.
    fn opinion(&self, symbol: &str, prompt: &str) -> Result<AdvisoryOpinion, EngineError>;
}

impl<T: AdvisoryPort + ?Sized> AdvisoryPort for &T {
    fn opinion(&self, symbol: &str, prompt: &str) -> Result<AdvisoryOpinion, EngineError> {
        (**self).opinion(symbol, prompt)
    }
}
