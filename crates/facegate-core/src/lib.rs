//! facegate-core — Identity data model, enrollment store, and the contracts
//! for the face detector and identity matcher collaborators.

pub mod detector;
pub mod matcher;
pub mod store;
pub mod types;

pub use detector::{DetectorError, DisabledDetector, FaceDetector, ScrfdDetector};
pub use matcher::{CommandMatcher, IdentityMatcher, MatchToken, MatcherError};
pub use store::{DirectoryStore, EnrollmentStore, StoreError};
pub use types::{Capture, CapturePurpose, EnrollmentRecord, FaceRegion, VerificationOutcome};
