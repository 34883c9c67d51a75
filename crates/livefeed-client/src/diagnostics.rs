//! Where contained failures are reported.

use crate::error::ClientError;

/// Receives failures that are contained rather than returned: malformed
/// frames and failing subscribers.
pub trait DiagnosticSink: Send + Sync + 'static {
    fn report(&self, error: &ClientError);
}

/// Logs every report at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
    fn report(&self, error: &ClientError) {
        tracing::warn!("{}", error);
    }
}

impl<F> DiagnosticSink for F
where
    F: Fn(&ClientError) + Send + Sync + 'static,
{
    fn report(&self, error: &ClientError) {
        self(error)
    }
}
