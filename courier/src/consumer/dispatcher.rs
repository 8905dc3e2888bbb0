use super::MessageHandler;
use crate::diagnostics::DiagnosticEmitter;
use crate::transport::{Claim, ConsumerMessage, EnvelopeMessage, GroupSession};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Outcome counters of one processed claim
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct ClaimStats {
    pub handled: u64,
    pub failed: u64,
    pub undecodable: u64,
}

/// Processes the messages of one claim and applies the commit policy
pub(super) struct ClaimDispatcher {
    pub session: Arc<dyn GroupSession>,
    pub handler: Arc<dyn MessageHandler>,
    pub diagnostics: Arc<dyn DiagnosticEmitter>,
    pub group_id: String,
    pub commit_after_failure: bool,
}

impl ClaimDispatcher {
    /// Runs until the claim's message stream ends
    #[instrument(level = "debug", skip(self, claim), fields(topic = %claim.topic, partition = claim.partition))]
    pub async fn run(self, claim: Claim) -> ClaimStats {
        let mut messages = claim.messages;
        let mut stats = ClaimStats::default();

        debug!(initial_offset = claim.initial_offset, "Processing claim");

        while let Some(message) = messages.next().await {
            self.dispatch(&message, &mut stats).await;
        }

        debug!(?stats, "Claim finished");

        stats
    }

    async fn dispatch(&self, message: &ConsumerMessage, stats: &mut ClaimStats) {
        let context = message.context().with_group(self.group_id.as_str());
        self.diagnostics.debug("Message received", &context);

        let envelope = match message.parse_envelope() {
            Ok(envelope) => envelope,
            Err(error) => {
                stats.undecodable += 1;
                self.diagnostics
                    .error("Message could not be decoded", &error, &context);
                return;
            }
        };

        match self.handler.handle(self.session.context(), envelope).await {
            Ok(()) => {
                stats.handled += 1;
                self.session.mark_message(message);
            }
            Err(error) => {
                stats.failed += 1;
                self.diagnostics
                    .error("Message handler failed", error.as_ref(), &context);

                if self.commit_after_failure {
                    self.session.mark_message(message);
                }
            }
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::diagnostics::{RecordingEmitter, Severity};
    use crate::implementation::json;
    use crate::{BoxedError, EmptyResult, Envelope};
    use async_trait::async_trait;
    use chrono::Utc;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct StagingSession {
        marked: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl GroupSession for StagingSession {
        fn generation(&self) -> u64 {
            1
        }

        fn member_id(&self) -> &str {
            "member"
        }

        fn context(&self) -> CancellationToken {
            CancellationToken::new()
        }

        fn mark_message(&self, message: &ConsumerMessage) {
            self.marked.lock().unwrap().push(message.offset);
        }

        async fn end(&self) -> EmptyResult {
            Ok(())
        }
    }

    fn message(offset: i64, payload: Vec<u8>) -> ConsumerMessage {
        ConsumerMessage {
            topic: "sessions".into(),
            partition: 0,
            offset,
            key: "key".into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    fn envelope(data: &str) -> Vec<u8> {
        json::encode(&Envelope::new("created", data)).unwrap()
    }

    /// Claim with a well-formed message, a malformed one, one the handler rejects and another well-formed one
    fn claim() -> Claim {
        let messages = vec![
            message(0, envelope("ok")),
            message(1, b"garbage".to_vec()),
            message(2, envelope("fail")),
            message(3, envelope("ok")),
        ];

        Claim {
            topic: "sessions".into(),
            partition: 0,
            initial_offset: 0,
            messages: stream::iter(messages).boxed(),
        }
    }

    async fn reject_failures(_: CancellationToken, envelope: Envelope) -> EmptyResult {
        if envelope.data() == "fail" {
            Err(BoxedError::from("refused"))
        } else {
            Ok(())
        }
    }

    async fn dispatch(commit_after_failure: bool) -> (Vec<i64>, ClaimStats, RecordingEmitter) {
        let session = Arc::new(StagingSession::default());
        let recorder = RecordingEmitter::default();

        let dispatcher = ClaimDispatcher {
            session: session.clone(),
            handler: Arc::new(reject_failures),
            diagnostics: Arc::new(recorder.clone()),
            group_id: "group".into(),
            commit_after_failure,
        };

        let stats = dispatcher.run(claim()).await;
        let marked = session.marked.lock().unwrap().clone();

        (marked, stats, recorder)
    }

    #[tokio::test]
    async fn leave_failures_unmarked_by_default() {
        let (marked, stats, recorder) = dispatch(false).await;

        assert_eq!(marked, vec![0, 3]);
        assert_eq!(
            stats,
            ClaimStats {
                handled: 2,
                failed: 1,
                undecodable: 1
            }
        );
        assert_eq!(recorder.count(Severity::Debug, "Message received"), 4);
        assert_eq!(recorder.count(Severity::Error, "Message handler failed"), 1);
    }

    #[tokio::test]
    async fn mark_failures_when_asked_to() {
        let (marked, _, _) = dispatch(true).await;

        assert_eq!(marked, vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn never_mark_undecodable_messages() {
        let (marked, _, recorder) = dispatch(true).await;

        assert!(!marked.contains(&1));

        let decode = recorder.matching(Severity::Error, "Message could not be decoded");
        assert_eq!(decode.len(), 1);
        assert_eq!(decode[0].context.offset(), Some(1));
        assert_eq!(decode[0].context.group_id(), Some("group"));
        assert_eq!(decode[0].context.payload(), Some("garbage"));
    }
}
