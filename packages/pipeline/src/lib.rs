// ABOUTME: Pentest pipeline crate wiring recon, analysis, exploitation, and patching
// ABOUTME: The runner module owns phase ordering and failure policy

pub mod analyze;
pub mod exploit;
pub mod github;
pub mod runner;

pub use analyze::{AnalyzerError, PatchSuggestion, VulnAnalyzer};
pub use exploit::{ExploitOutcome, SqliExploiter};
pub use github::{GithubError, PatchSubmission, PullRequestClient};
pub use runner::{PentestPipeline, PipelineError, RunSummary};
