//! Run failure reporting.

use std::any::Any;

use thiserror::Error;

/// Why a BSP run terminated without completing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// A processor called [`Processor::abort`][crate::Processor::abort].
    /// Every other processor was released from its barrier and unwound; the
    /// message is the one supplied by the first aborting processor.
    #[error("BSP run aborted: {message}")]
    Aborted {
        /// The message passed to the first abort call.
        message: String,
    },

    /// A processor's entry code panicked outside of an abort. The runtime
    /// treats this like an abort so the remaining processors unwind instead
    /// of deadlocking at the next barrier.
    #[error("processor {pid} panicked: {message}")]
    ProcessorPanicked {
        /// The processor whose entry code panicked first.
        pid: usize,
        /// The panic payload, rendered as text.
        message: String,
    },
}

/// Panic payload used to unwind a processor's stack after an abort.
///
/// Raised by abort itself and by every barrier exit that observes the abort
/// flag; caught at the worker-thread root so the unwind never crosses the
/// runtime boundary.
pub(crate) struct AbortSignal;

/// Renders an arbitrary panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(&message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(RunError: Send, Sync, Debug);

    #[test]
    fn aborted_formats_message() {
        let error = RunError::Aborted {
            message: "determinant is singular".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "BSP run aborted: determinant is singular"
        );
    }

    #[test]
    fn panicked_formats_pid_and_message() {
        let error = RunError::ProcessorPanicked {
            pid: 3,
            message: "index out of bounds".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "processor 3 panicked: index out of bounds"
        );
    }

    #[test]
    fn panic_message_handles_common_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new("owned message".to_string());
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
