//! Adaptive macro selection for build nodes.
//!
//! A "macro" is a named prompt/strategy variant competing for selection at a
//! build node. Each macro is modeled as a bandit arm with a Beta-distribution
//! success posterior; [`BanditSelector`] picks arms by Thompson sampling and
//! [`CiFeedbackProcessor`] feeds post-hoc CI outcomes back into the posteriors.

pub mod feedback;
pub mod selector;

pub use feedback::{CiFeedbackProcessor, CiResult, MacroRecord};
pub use selector::{BanditSelector, MacroStats};
