pub mod correlator;
pub mod events;
pub mod fingerprint;
pub mod model;
pub mod rules;

pub use correlator::IssueCorrelator;
pub use events::{BroadcastPublisher, IssueEvent, IssuePublisher, RecordingPublisher};
pub use fingerprint::{fingerprint, normalize_error_pattern};
pub use model::{
    Issue, IssueAction, IssueCategory, IssueError, IssueStatus, Occurrence, Severity,
};
pub use rules::{classify, generate_title, impact_score, Classification};
