pub mod error;
pub mod mission;
pub mod session;
pub mod velocity;

#[cfg(test)]
mod testutil;

pub use error::FlightError;
pub use mission::{AbortReason, MissionUploader, UploadConfig, UploadError, UploadPhase};
pub use session::{
    FlightSession, SessionConfig, SessionReport, SessionState, Strategy, TimingConfig,
};
pub use velocity::{VelocityConfig, VelocityController};

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Run a suspension point under the session's cancellation token.
/// `None` means the token fired first.
pub(crate) async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
