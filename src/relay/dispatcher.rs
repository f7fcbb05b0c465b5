//! Command dispatch.
//!
//! Applies decoded [`CommandFrame`]s to the chat session. `create` and
//! `delete` fan out over the configured recipients one at a time; a failing
//! recipient is logged and recorded, and the remaining recipients are still
//! processed.

use std::sync::Arc;

use super::frame::{CommandFrame, CommandKind, RecipientFailure};
use crate::chat::{ChatSession, Jid};
use crate::markup;

/// What a single frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handshake acknowledged by the control API.
    Verified,
    /// A `create` or `delete` ran against every recipient.
    Completed(DispatchReport),
    /// Unrecognized frame type; nothing happened.
    Ignored,
}

/// Per-recipient results of a `create` or `delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Which command ran.
    pub command: CommandKind,
    /// Command id.
    pub id: String,
    /// Recipients the chat session accepted.
    pub delivered: usize,
    /// Recipients that failed, in configured order.
    pub failures: Vec<RecipientFailure>,
}

/// Executes commands against the chat session.
pub struct Dispatcher {
    chat: Arc<dyn ChatSession>,
    recipients: Vec<String>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher for `recipients` (raw identity strings, in send order).
    pub fn new(chat: Arc<dyn ChatSession>, recipients: Vec<String>) -> Self {
        Self { chat, recipients }
    }

    /// The chat session commands are applied to.
    pub fn chat(&self) -> Arc<dyn ChatSession> {
        Arc::clone(&self.chat)
    }

    /// Configured recipient identities.
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Apply one frame.
    pub async fn dispatch(&self, frame: CommandFrame) -> DispatchOutcome {
        match frame {
            CommandFrame::Verified => {
                log::info!("[Dispatcher] Logged into API");
                DispatchOutcome::Verified
            }
            CommandFrame::Create { id, content } => {
                let text = markup::translate(&content);
                let report = self
                    .for_each_recipient(CommandKind::Create, id, |jid, id| {
                        let chat = Arc::clone(&self.chat);
                        let text = text.clone();
                        async move { chat.send_message(&jid, &id, &text).await }
                    })
                    .await;
                DispatchOutcome::Completed(report)
            }
            CommandFrame::Delete { id } => {
                let report = self
                    .for_each_recipient(CommandKind::Delete, id, |jid, id| {
                        let chat = Arc::clone(&self.chat);
                        async move { chat.revoke_message(&jid, &id).await }
                    })
                    .await;
                DispatchOutcome::Completed(report)
            }
            CommandFrame::Unknown => DispatchOutcome::Ignored,
        }
    }

    /// Run `op` for every recipient in order, isolating failures.
    ///
    /// Identities are parsed per command so a bad entry only costs that
    /// one recipient.
    async fn for_each_recipient<F, Fut, T>(&self, command: CommandKind, id: String, op: F) -> DispatchReport
    where
        F: Fn(Jid, String) -> Fut,
        Fut: std::future::Future<Output = Result<T, crate::chat::ChatError>>,
    {
        let mut report = DispatchReport {
            command,
            id,
            delivered: 0,
            failures: Vec::new(),
        };

        for raw in &self.recipients {
            let result = match raw.parse::<Jid>() {
                Ok(jid) => op(jid, report.id.clone()).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match result {
                Ok(_) => {
                    log::debug!("[Dispatcher] {} {} -> {}", command, report.id, raw);
                    report.delivered += 1;
                }
                Err(error) => {
                    log::warn!("[Dispatcher] {} {} failed for {}: {}", command, report.id, raw, error);
                    report.failures.push(RecipientFailure {
                        recipient: raw.clone(),
                        error,
                    });
                }
            }
        }

        log::info!(
            "[Dispatcher] {} {}: {} delivered, {} failed",
            command,
            report.id,
            report.delivered,
            report.failures.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::broadcast;

    use super::*;
    use crate::chat::{ChatError, ChatEvent, Receipt};

    /// Records every call; fails sends to identities listed in `reject`.
    #[derive(Default)]
    struct RecordingChat {
        calls: Mutex<Vec<(String, String, String, String)>>,
        reject: Vec<String>,
    }

    impl RecordingChat {
        fn calls(&self) -> Vec<(String, String, String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, op: &str, jid: &Jid, id: &str, text: &str) -> Result<Receipt, ChatError> {
            self.calls
                .lock()
                .unwrap()
                .push((op.to_string(), jid.to_string(), id.to_string(), text.to_string()));
            if self.reject.contains(&jid.to_string()) {
                return Err(ChatError::Rejected("not allowed".to_string()));
            }
            Ok(Receipt {
                id: id.to_string(),
                timestamp: Utc::now(),
            })
        }
    }

    #[async_trait]
    impl ChatSession for RecordingChat {
        async fn send_message(&self, to: &Jid, id: &str, text: &str) -> Result<Receipt, ChatError> {
            self.record("send", to, id, text)
        }

        async fn revoke_message(&self, chat: &Jid, id: &str) -> Result<Receipt, ChatError> {
            self.record("revoke", chat, id, "")
        }

        fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
            broadcast::channel(1).1
        }

        async fn disconnect(&self) {}
    }

    fn recipients(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_translates_and_sends_to_every_recipient() {
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = Dispatcher::new(chat.clone(), recipients(&["1@g.us", "2@s.whatsapp.net"]));

        let outcome = dispatcher
            .dispatch(CommandFrame::Create {
                id: "M1".to_string(),
                content: "<p><strong>hi</strong></p>".to_string(),
            })
            .await;

        let calls = chat.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ("send".into(), "1@g.us".into(), "M1".into(), "*hi*".into()));
        assert_eq!(calls[1].1, "2@s.whatsapp.net");
        assert_eq!(
            outcome,
            DispatchOutcome::Completed(DispatchReport {
                command: CommandKind::Create,
                id: "M1".to_string(),
                delivered: 2,
                failures: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_recipient_does_not_block_the_others() {
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = Dispatcher::new(chat.clone(), recipients(&["1@g.us", "not-a-jid", "3@g.us"]));

        let outcome = dispatcher
            .dispatch(CommandFrame::Create {
                id: "M2".to_string(),
                content: "x".to_string(),
            })
            .await;

        let sent: Vec<String> = chat.calls().into_iter().map(|c| c.1).collect();
        assert_eq!(sent, vec!["1@g.us", "3@g.us"]);
        let DispatchOutcome::Completed(report) = outcome else {
            panic!("expected a report");
        };
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].recipient, "not-a-jid");
    }

    #[tokio::test]
    async fn test_rejected_send_does_not_block_the_others() {
        let chat = Arc::new(RecordingChat {
            reject: vec!["1@g.us".to_string()],
            ..RecordingChat::default()
        });
        let dispatcher = Dispatcher::new(chat.clone(), recipients(&["1@g.us", "2@g.us"]));

        let outcome = dispatcher
            .dispatch(CommandFrame::Delete { id: "M3".to_string() })
            .await;

        assert_eq!(chat.calls().len(), 2);
        let DispatchOutcome::Completed(report) = outcome else {
            panic!("expected a report");
        };
        assert_eq!(report.command, CommandKind::Delete);
        assert_eq!(report.delivered, 1);
        assert!(report.failures[0].error.contains("not allowed"));
    }

    #[tokio::test]
    async fn test_delete_revokes_for_every_recipient() {
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = Dispatcher::new(chat.clone(), recipients(&["1@g.us", "2@g.us"]));

        dispatcher.dispatch(CommandFrame::Delete { id: "M4".to_string() }).await;

        let calls = chat.calls();
        assert!(calls.iter().all(|c| c.0 == "revoke" && c.2 == "M4"));
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn test_verified_and_unknown_have_no_side_effects() {
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = Dispatcher::new(chat.clone(), recipients(&["1@g.us"]));

        assert_eq!(dispatcher.dispatch(CommandFrame::Verified).await, DispatchOutcome::Verified);
        assert_eq!(dispatcher.dispatch(CommandFrame::Unknown).await, DispatchOutcome::Ignored);
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_recipients_is_an_empty_report() {
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = Dispatcher::new(chat, Vec::new());

        let outcome = dispatcher.dispatch(CommandFrame::Delete { id: "M5".to_string() }).await;
        let DispatchOutcome::Completed(report) = outcome else {
            panic!("expected a report");
        };
        assert_eq!(report.delivered, 0);
        assert!(report.failures.is_empty());
    }
}
