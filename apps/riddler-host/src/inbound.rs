//! Reader side of the extension channel.

use crate::host::Outbox;
use crate::host::PendingQueries;
use rd_backend::VisitedResponse;
use rd_ipc::ExtensionMessage;
use rd_ipc::FrameLimits;
use rd_ipc::HostMessage;
use rd_ipc::decode_payload;
use rd_ipc::read_frame;
use rd_tracker::SnapshotReader;
use rd_tracker::TrackerEvent;
use std::io::Read;
use std::io::Write;
use std::sync::mpsc::Sender;

/// Reads extension frames until end of stream or `shutdown`, forwarding tracker events to the
/// dispatcher. Tab replies and URL lookups are answered here without touching the dispatcher.
pub fn pump<R, W>(
    input: &mut R,
    limits: FrameLimits,
    events: &Sender<TrackerEvent>,
    queries: &PendingQueries,
    reader: &SnapshotReader,
    outbox: &Outbox<W>,
) where
    R: Read,
    W: Write,
{
    loop {
        let payload = match read_frame(input, limits.max_inbound_bytes) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::info!("extension closed the channel");
                break;
            }
            Err(error) => {
                tracing::error!(%error, "extension channel unreadable");
                break;
            }
        };

        let message = match decode_payload::<ExtensionMessage>(&payload) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, "extension message skipped");
                continue;
            }
        };

        let event = match message {
            ExtensionMessage::TabReply { query_id, outcome } => {
                if !queries.complete(query_id, outcome) {
                    tracing::debug!(query_id, "late tab reply dropped");
                }
                continue;
            }
            ExtensionMessage::ResolveUrl { query_id, url } => {
                let resolved = reader.resolve(&url);
                let answer = HostMessage::Resolved {
                    query_id,
                    riddle: resolved.as_ref().map(|resolved| resolved.riddle.clone()),
                    path: resolved.map(|resolved| resolved.path),
                    redirect: reader.blacklist_redirect(&url),
                };
                if let Err(error) = outbox.send(&answer) {
                    tracing::warn!(query_id, %error, "url resolution not delivered");
                }
                continue;
            }
            ExtensionMessage::Shutdown => break,
            other => into_event(other),
        };

        let Some(event) = event else {
            continue;
        };
        if events.send(event).is_err() {
            return;
        }
    }

    let _ = events.send(TrackerEvent::Shutdown);
}

fn into_event(message: ExtensionMessage) -> Option<TrackerEvent> {
    Some(match message {
        ExtensionMessage::ResponseCompleted {
            tab_id,
            url,
            status_code,
            location,
            content_location,
        } => TrackerEvent::ResponseCompleted {
            tab: tab_id,
            response: VisitedResponse {
                url,
                status_code,
                location,
                content_location,
            },
        },
        ExtensionMessage::AuthRequired(challenge) => TrackerEvent::AuthRequired(challenge),
        ExtensionMessage::TabLoading {
            tab_id,
            url,
            active,
        } => TrackerEvent::TabLoading {
            tab: tab_id,
            url,
            active,
        },
        ExtensionMessage::TabRemoved { tab_id } => TrackerEvent::TabRemoved { tab: tab_id },
        ExtensionMessage::PromptReply { channel, reply } => {
            TrackerEvent::PromptReply { channel, reply }
        }
        ExtensionMessage::TabReply { .. }
        | ExtensionMessage::ResolveUrl { .. }
        | ExtensionMessage::Shutdown => return None,
    })
}
