//! Browser host backed by the extension on the other end of stdio.
//!
//! Tab requests go out as framed messages carrying a query id and block the caller until the
//! reader thread routes the matching `tabReply` back, or the reply timeout elapses.

use rd_auth::AuthResponder;
use rd_auth::AuthResponse;
use rd_auth::PromptHost;
use rd_auth::PromptMessage;
use rd_auth::TabHost;
use rd_auth::TabInfo;
use rd_core::PromptChannelId;
use rd_core::RequestId;
use rd_core::TabId;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use rd_ipc::FrameLimits;
use rd_ipc::HostMessage;
use rd_ipc::TabReplyOutcome;
use rd_ipc::write_message;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;

/// Shared writer for host → extension frames.
pub struct Outbox<W> {
    writer: Arc<Mutex<W>>,
    max_message_bytes: usize,
}

impl<W> Clone for Outbox<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            max_message_bytes: self.max_message_bytes,
        }
    }
}

impl<W: Write> Outbox<W> {
    pub fn new(writer: W, limits: FrameLimits) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            max_message_bytes: limits.max_outbound_bytes,
        }
    }

    pub fn send(&self, message: &HostMessage) -> TrackerResult<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_message(&mut *writer, message, self.max_message_bytes)
    }
}

/// Tab queries waiting for their `tabReply`.
#[derive(Clone, Default)]
pub struct PendingQueries {
    waiting: Arc<Mutex<HashMap<u64, mpsc::Sender<TabReplyOutcome>>>>,
}

impl PendingQueries {
    fn register(&self, query_id: u64) -> mpsc::Receiver<TabReplyOutcome> {
        let (sender, receiver) = mpsc::channel();
        self.lock().insert(query_id, sender);
        receiver
    }

    fn forget(&self, query_id: u64) {
        self.lock().remove(&query_id);
    }

    /// Hands a reply to its waiting caller; `false` for unknown or timed-out queries.
    pub fn complete(&self, query_id: u64, outcome: TabReplyOutcome) -> bool {
        let Some(waiter) = self.lock().remove(&query_id) else {
            return false;
        };
        waiter.send(outcome).is_ok()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<TabReplyOutcome>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct StdioHost<W> {
    outbox: Outbox<W>,
    queries: PendingQueries,
    next_query: AtomicU64,
    reply_timeout: Duration,
}

impl<W: Write> StdioHost<W> {
    pub fn new(outbox: Outbox<W>, queries: PendingQueries, reply_timeout: Duration) -> Self {
        Self {
            outbox,
            queries,
            next_query: AtomicU64::new(1),
            reply_timeout,
        }
    }

    fn request<F>(&self, build: F) -> TrackerResult<TabReplyOutcome>
    where
        F: FnOnce(u64) -> HostMessage,
    {
        let query_id = self.next_query.fetch_add(1, Ordering::Relaxed);
        let replies = self.queries.register(query_id);
        if let Err(error) = self.outbox.send(&build(query_id)) {
            self.queries.forget(query_id);
            return Err(error);
        }

        match replies.recv_timeout(self.reply_timeout) {
            Ok(TabReplyOutcome::Failed { message }) => {
                Err(TrackerError::new("tabs.request_failed", message))
            }
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                self.queries.forget(query_id);
                Err(TrackerError::new(
                    "tabs.reply_timeout",
                    format!(
                        "no reply to tab query {query_id} within {} ms",
                        self.reply_timeout.as_millis()
                    ),
                ))
            }
        }
    }

    fn request_tab<F>(&self, build: F) -> TrackerResult<TabInfo>
    where
        F: FnOnce(u64) -> HostMessage,
    {
        match self.request(build)? {
            TabReplyOutcome::Tab(tab) => Ok(tab),
            other => Err(TrackerError::new(
                "tabs.unexpected_reply",
                format!("expected tab details, got {other:?}"),
            )),
        }
    }
}

impl<W: Write> TabHost for StdioHost<W> {
    fn get_tab(&self, tab: TabId) -> TrackerResult<TabInfo> {
        self.request_tab(|query_id| HostMessage::GetTab {
            query_id,
            tab_id: tab,
        })
    }

    fn duplicate_tab(&self, tab: TabId) -> TrackerResult<TabId> {
        let duplicate = self.request_tab(|query_id| HostMessage::DuplicateTab {
            query_id,
            tab_id: tab,
        })?;
        Ok(duplicate.id)
    }

    fn remove_tab(&self, tab: TabId) -> TrackerResult<()> {
        self.request(|query_id| HostMessage::RemoveTab {
            query_id,
            tab_id: tab,
        })?;
        Ok(())
    }

    fn navigate_tab(&self, tab: TabId, url: &str) -> TrackerResult<()> {
        self.request(|query_id| HostMessage::NavigateTab {
            query_id,
            tab_id: tab,
            url: url.to_owned(),
        })?;
        Ok(())
    }

    fn create_tab(&self, url: &str, active: bool) -> TrackerResult<TabId> {
        let created = self.request_tab(|query_id| HostMessage::CreateTab {
            query_id,
            url: url.to_owned(),
            active,
        })?;
        Ok(created.id)
    }
}

impl<W: Write> PromptHost for StdioHost<W> {
    fn open_prompt(
        &self,
        channel: PromptChannelId,
        tab: TabId,
        message: &PromptMessage,
    ) -> TrackerResult<()> {
        self.outbox.send(&HostMessage::OpenPrompt {
            channel,
            tab_id: tab,
            message: message.clone(),
        })
    }
}

impl<W: Write> AuthResponder for StdioHost<W> {
    fn answer_auth(&self, request: &RequestId, response: &AuthResponse) -> TrackerResult<()> {
        self.outbox.send(&HostMessage::AuthDecision {
            request_id: request.clone(),
            response: response.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::Outbox;
    use super::PendingQueries;
    use super::StdioHost;
    use rd_auth::AuthResponder;
    use rd_auth::AuthResponse;
    use rd_auth::TabHost;
    use rd_auth::TabInfo;
    use rd_core::RequestId;
    use rd_core::TabId;
    use rd_ipc::FrameLimits;
    use rd_ipc::TabReplyOutcome;
    use rd_ipc::read_frame;
    use serde_json::Value;
    use std::io::Cursor;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::PoisonError;
    use std::thread;
    use std::time::Duration;

    /// Writer whose bytes stay readable after being handed to an [`Outbox`].
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn frames(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner).clone();
            let mut reader = Cursor::new(bytes);
            let mut frames = Vec::new();
            while let Ok(Some(payload)) = read_frame(&mut reader, 1024 * 1024) {
                frames.push(serde_json::from_slice(&payload).unwrap_or_else(|error| panic!("{error}")));
            }
            frames
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn host(timeout: Duration) -> (StdioHost<SharedBuffer>, PendingQueries, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let queries = PendingQueries::default();
        let outbox = Outbox::new(buffer.clone(), FrameLimits::default());
        (StdioHost::new(outbox, queries.clone(), timeout), queries, buffer)
    }

    fn reply_when_asked(queries: PendingQueries, query_id: u64, outcome: TabReplyOutcome) {
        thread::spawn(move || {
            for _ in 0..500 {
                if queries.complete(query_id, outcome.clone()) {
                    return;
                }
                thread::sleep(Duration::from_millis(2));
            }
        });
    }

    #[test]
    fn tab_request_waits_for_matching_reply() {
        let (host, queries, buffer) = host(Duration::from_secs(5));
        let tab = TabInfo {
            id: TabId(3),
            url: "https://example.com/".to_owned(),
            active: true,
        };
        reply_when_asked(queries.clone(), 1, TabReplyOutcome::Tab(tab.clone()));

        assert_eq!(host.get_tab(TabId(3)), Ok(tab));
        assert_eq!(queries.len(), 0);
        let frames = buffer.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "getTab");
        assert_eq!(frames[0]["queryId"], 1);
        assert_eq!(frames[0]["tabId"], 3);
    }

    #[test]
    fn failed_reply_becomes_error() {
        let (host, queries, _buffer) = host(Duration::from_secs(5));
        reply_when_asked(
            queries,
            1,
            TabReplyOutcome::Failed {
                message: "No tab with id: 9".to_owned(),
            },
        );
        let removed = host.remove_tab(TabId(9));
        assert!(removed.is_err_and(|error| error.code == "tabs.request_failed"));
    }

    #[test]
    fn missing_reply_times_out_and_is_forgotten() {
        let (host, queries, _buffer) = host(Duration::from_millis(20));
        let created = host.create_tab("https://riddler.app/login", true);
        assert!(created.is_err_and(|error| error.code == "tabs.reply_timeout"));
        assert_eq!(queries.len(), 0);
        assert!(!queries.complete(1, TabReplyOutcome::Done));
    }

    #[test]
    fn auth_answer_is_sent_without_waiting() {
        let (host, queries, buffer) = host(Duration::from_millis(20));
        assert!(host.answer_auth(&RequestId::new("8"), &AuthResponse::NativeDialog).is_ok());
        assert_eq!(queries.len(), 0);
        let frames = buffer.frames();
        assert_eq!(frames[0]["type"], "authDecision");
        assert_eq!(frames[0]["response"]["action"], "nativeDialog");
    }
}
