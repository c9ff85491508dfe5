//! Sheet: cell storage, calculation order and the pass loop.

mod pass;
mod state;

pub use pass::{CallStatus, DirectiveHandler, PassEnd, PassOutcome};
pub use state::{DEFAULT_MAX_EVALUATIONS, Sheet};
