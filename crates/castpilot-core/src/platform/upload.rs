//! Chunked resumable upload state machine shared by platform adapters that
//! require multi-phase upload (INIT → APPEND(chunk) → FINALIZE → POLL).
//!
//! Per spec §4.3 and §9: the state machine is a plain value with one method
//! per phase, and the poll wait uses the clock abstraction so tests can
//! drive it deterministically instead of sleeping in wall-clock time.

use async_trait::async_trait;

use crate::clock::Clock;
use crate::error::PlatformError;

/// Default chunk size for platforms that don't declare their own (5 MiB,
/// spec §4.3's example figure).
pub const DEFAULT_CHUNK_BYTES: usize = 5 * 1024 * 1024;

const POLL_INITIAL_DELAY_MS: u64 = 1_000;
const POLL_MAX_DELAY_MS: u64 = 30_000;
const POLL_CEILING_MS: u64 = 10 * 60 * 1000;

/// Whether a platform reports the upload ready, still processing, or
/// failed, on each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Ready,
    InProgress,
    Failed,
}

/// The per-platform transport an adapter implements to plug into the
/// shared chunked-upload state machine. Each method corresponds to one
/// phase; the state machine in this module owns sequencing, chunk
/// slicing, and poll backoff.
#[async_trait]
pub trait ChunkedUploadTransport: Send + Sync {
    /// Start an upload session, returning an opaque session id.
    async fn init(&self, total_size_bytes: u64) -> Result<String, PlatformError>;

    /// Upload one chunk at `offset`.
    async fn append(&self, session_id: &str, offset: u64, chunk: &[u8]) -> Result<(), PlatformError>;

    /// Finalize the session once all chunks are appended.
    async fn finalize(&self, session_id: &str) -> Result<(), PlatformError>;

    /// Poll processing status; returns the platform's post id and URL once
    /// `ProcessingState::Ready`.
    async fn poll(&self, session_id: &str) -> Result<(ProcessingState, Option<(String, String)>), PlatformError>;
}

/// Drive an entire chunked upload: init, append every chunk, finalize, then
/// poll until ready with capped exponential backoff, bounded by a 10-minute
/// hard ceiling (spec §4.3).
pub async fn run_chunked_upload(
    transport: &dyn ChunkedUploadTransport,
    bytes: &[u8],
    chunk_size: usize,
    clock: &dyn Clock,
    sleep: impl Fn(std::time::Duration) -> futures_sleep::BoxSleep,
) -> Result<(String, String), PlatformError> {
    let session_id = transport.init(bytes.len() as u64).await?;

    for (i, chunk) in bytes.chunks(chunk_size.max(1)).enumerate() {
        let offset = (i * chunk_size) as u64;
        transport.append(&session_id, offset, chunk).await?;
    }

    transport.finalize(&session_id).await?;

    poll_until_ready(transport, &session_id, clock, sleep).await
}

/// Poll `session_id` until ready, failed, or the 10-minute ceiling expires.
pub async fn poll_until_ready(
    transport: &dyn ChunkedUploadTransport,
    session_id: &str,
    clock: &dyn Clock,
    sleep: impl Fn(std::time::Duration) -> futures_sleep::BoxSleep,
) -> Result<(String, String), PlatformError> {
    let start = clock.now_utc();
    let mut delay_ms = POLL_INITIAL_DELAY_MS;

    loop {
        let (state, result) = transport.poll(session_id).await?;
        match state {
            ProcessingState::Ready => {
                let (id, url) = result.ok_or(PlatformError::Transient {
                    message: "platform reported ready with no post id".to_string(),
                })?;
                return Ok((id, url));
            }
            ProcessingState::Failed => {
                return Err(PlatformError::Transient {
                    message: "platform reported processing failure".to_string(),
                });
            }
            ProcessingState::InProgress => {}
        }

        let elapsed_ms = (clock.now_utc() - start).num_milliseconds().max(0) as u64;
        if elapsed_ms >= POLL_CEILING_MS {
            return Err(PlatformError::UploadProcessingTimeout { waited_ms: elapsed_ms });
        }

        sleep(std::time::Duration::from_millis(delay_ms)).await;
        delay_ms = (delay_ms * 2).min(POLL_MAX_DELAY_MS);
    }
}

/// A tiny indirection so this module doesn't hard-depend on `tokio::time`
/// at the type level, keeping `run_chunked_upload`/`poll_until_ready`
/// testable with an instant, non-sleeping stub.
pub mod futures_sleep {
    use std::future::Future;
    use std::pin::Pin;

    pub type BoxSleep = Pin<Box<dyn Future<Output = ()> + Send>>;

    pub fn tokio_sleep(duration: std::time::Duration) -> BoxSleep {
        Box::pin(tokio::time::sleep(duration))
    }

    pub fn no_op_sleep(_duration: std::time::Duration) -> BoxSleep {
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::clock::VirtualClock;

    struct ReadyAfterNPolls {
        polls_until_ready: usize,
        calls: AtomicUsize,
        appended: Mutex<Vec<(u64, usize)>>,
    }

    #[async_trait]
    impl ChunkedUploadTransport for ReadyAfterNPolls {
        async fn init(&self, _total_size_bytes: u64) -> Result<String, PlatformError> {
            Ok("session-1".to_string())
        }

        async fn append(&self, _session_id: &str, offset: u64, chunk: &[u8]) -> Result<(), PlatformError> {
            self.appended.lock().unwrap().push((offset, chunk.len()));
            Ok(())
        }

        async fn finalize(&self, _session_id: &str) -> Result<(), PlatformError> {
            Ok(())
        }

        async fn poll(&self, _session_id: &str) -> Result<(ProcessingState, Option<(String, String)>), PlatformError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call + 1 >= self.polls_until_ready {
                Ok((ProcessingState::Ready, Some(("post-1".to_string(), "https://x/post-1".to_string()))))
            } else {
                Ok((ProcessingState::InProgress, None))
            }
        }
    }

    #[tokio::test]
    async fn chunks_are_sliced_at_requested_size() {
        let transport = ReadyAfterNPolls {
            polls_until_ready: 1,
            calls: AtomicUsize::new(0),
            appended: Mutex::new(Vec::new()),
        };
        let clock = VirtualClock::at(chrono::Utc::now());
        let bytes = vec![0u8; 25];
        let result = run_chunked_upload(&transport, &bytes, 10, &clock, futures_sleep::no_op_sleep)
            .await
            .unwrap();
        assert_eq!(result.0, "post-1");

        let appended = transport.appended.lock().unwrap();
        assert_eq!(appended.len(), 3);
        assert_eq!(appended[0], (0, 10));
        assert_eq!(appended[1], (10, 10));
        assert_eq!(appended[2], (20, 5));
    }

    #[tokio::test]
    async fn polls_until_ready_then_returns_post_id() {
        let transport = ReadyAfterNPolls {
            polls_until_ready: 3,
            calls: AtomicUsize::new(0),
            appended: Mutex::new(Vec::new()),
        };
        let clock = VirtualClock::at(chrono::Utc::now());
        let result = poll_until_ready(&transport, "session-1", &clock, futures_sleep::no_op_sleep)
            .await
            .unwrap();
        assert_eq!(result, ("post-1".to_string(), "https://x/post-1".to_string()));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    struct NeverReady;

    #[async_trait]
    impl ChunkedUploadTransport for NeverReady {
        async fn init(&self, _total_size_bytes: u64) -> Result<String, PlatformError> {
            Ok("s".to_string())
        }
        async fn append(&self, _session_id: &str, _offset: u64, _chunk: &[u8]) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn finalize(&self, _session_id: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn poll(&self, _session_id: &str) -> Result<(ProcessingState, Option<(String, String)>), PlatformError> {
            Ok((ProcessingState::InProgress, None))
        }
    }

    #[tokio::test]
    async fn ceiling_exceeded_yields_upload_processing_timeout() {
        let transport = NeverReady;
        let start = chrono::Utc::now();
        let clock = VirtualClock::at(start);

        // Advance the virtual clock past the ceiling on every sleep call
        // instead of actually sleeping, so the test completes instantly.
        let clock_ref = &clock;
        let result = poll_until_ready(&transport, "s", &clock, |_d| {
            clock_ref.advance(chrono::Duration::milliseconds(POLL_CEILING_MS as i64 + 1));
            futures_sleep::no_op_sleep(std::time::Duration::from_millis(0))
        })
        .await;

        assert!(matches!(
            result,
            Err(PlatformError::UploadProcessingTimeout { .. })
        ));
    }
}
