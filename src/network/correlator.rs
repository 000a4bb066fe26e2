//! Response correlation
//!
//! RCON has no "more data follows" flag, so every command is followed by an
//! empty response-type sentinel frame under the next id. Servers answer in
//! order, so the sentinel's echo arrives only after every frame of the
//! preceding reply. Seeing the sentinel id closes the reply.

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::protocol::{Frame, IdAllocator, PacketType, AUTH_FAILED_ID};

/// Failure delivered through a request's reply slot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Authentication rejected by server")]
    AuthenticationRejected,

    #[error("Request {id} unresolved: {reason}")]
    Unresolved { id: i32, reason: String },
}

/// Complete reply to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Id the request was sent under
    pub id: i32,
    /// Concatenated body of every reply frame
    pub body: Bytes,
    /// Number of frames the reply spanned
    pub frames: usize,
}

impl Response {
    /// Body decoded as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub type RequestResult = Result<Response, RequestError>;

/// What became of a dispatched frame
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The request with this id was resolved
    Resolved { id: i32 },
    /// The frame was appended to the request's reply
    Accumulated { id: i32, first: bool },
    /// Frame belonged to a pending request but carries nothing to keep
    Ignored { id: i32 },
    /// Pending authentications were rejected
    AuthRejected { count: usize },
    /// No request claims the frame
    Notification(Frame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Auth,
    Command,
}

struct PendingRequest {
    kind: RequestKind,
    accumulated: BytesMut,
    frames: usize,
    reply: oneshot::Sender<RequestResult>,
}

impl PendingRequest {
    fn resolve(self, id: i32) {
        let response = Response {
            id,
            body: self.accumulated.freeze(),
            frames: self.frames,
        };
        // Receiver may have been dropped by a caller that gave up
        let _ = self.reply.send(Ok(response));
    }

    fn fail(self, error: RequestError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Maps in-flight request ids to their reply slots
pub struct Correlator {
    ids: IdAllocator,
    pending: HashMap<i32, PendingRequest>,
    /// sentinel id -> original request id
    sentinels: HashMap<i32, i32>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::with_ids(IdAllocator::new())
    }

    pub fn with_ids(ids: IdAllocator) -> Self {
        Self {
            ids,
            pending: HashMap::new(),
            sentinels: HashMap::new(),
        }
    }

    /// Register a request and return the frames to write for it.
    ///
    /// Non-auth requests are followed by a sentinel frame under the next id.
    pub fn register(
        &mut self,
        kind: PacketType,
        body: Bytes,
        reply: oneshot::Sender<RequestResult>,
    ) -> Vec<Frame> {
        self.sweep_abandoned();

        let id = self.ids.next_id();
        let request_kind = if kind.is_auth_request() {
            RequestKind::Auth
        } else {
            RequestKind::Command
        };

        self.pending.insert(
            id,
            PendingRequest {
                kind: request_kind,
                accumulated: BytesMut::new(),
                frames: 0,
                reply,
            },
        );

        let mut frames = vec![Frame::new(id, kind, body)];
        if request_kind == RequestKind::Command {
            let sentinel = self.ids.next_id();
            self.sentinels.insert(sentinel, id);
            frames.push(Frame::sentinel(sentinel));
        }
        frames
    }

    /// Route one inbound frame
    pub fn dispatch(&mut self, frame: Frame) -> Dispatch {
        if let Some(id) = self.sentinels.remove(&frame.id) {
            return match self.pending.remove(&id) {
                Some(request) => {
                    request.resolve(id);
                    Dispatch::Resolved { id }
                }
                None => Dispatch::Ignored { id },
            };
        }

        let id = frame.id;
        match self.pending.get(&id).map(|request| request.kind) {
            Some(RequestKind::Auth) => {
                if frame.kind != PacketType::AUTH_RESPONSE {
                    // Servers send an empty RESPONSE_VALUE ahead of the auth answer
                    return Dispatch::Ignored { id };
                }
                if let Some(request) = self.pending.remove(&id) {
                    request.resolve(id);
                }
                return Dispatch::Resolved { id };
            }
            Some(RequestKind::Command) => {
                if let Some(request) = self.pending.get_mut(&id) {
                    let first = request.frames == 0;
                    request.accumulated.extend_from_slice(&frame.body);
                    request.frames += 1;
                    return Dispatch::Accumulated { id, first };
                }
            }
            None => {}
        }

        if id == AUTH_FAILED_ID && frame.kind == PacketType::AUTH_RESPONSE {
            let count = self.fail_where(RequestKind::Auth, || RequestError::AuthenticationRejected);
            if count > 0 {
                return Dispatch::AuthRejected { count };
            }
        }

        Dispatch::Notification(frame)
    }

    /// Fail every outstanding request and forget all sentinels
    pub fn fail_all(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for (id, request) in self.pending.drain() {
            request.fail(RequestError::Unresolved {
                id,
                reason: reason.to_string(),
            });
        }
        self.sentinels.clear();
        count
    }

    fn fail_where(&mut self, kind: RequestKind, error: impl Fn() -> RequestError) -> usize {
        let ids: Vec<i32> = self
            .pending
            .iter()
            .filter(|(_, request)| request.kind == kind)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(request) = self.pending.remove(id) {
                request.fail(error());
            }
        }
        ids.len()
    }

    /// Drop auth requests whose caller stopped waiting. Commands are cleaned
    /// up by their sentinel.
    fn sweep_abandoned(&mut self) {
        self.pending
            .retain(|_, request| request.kind != RequestKind::Auth || !request.reply.is_closed());
    }

    /// Number of requests awaiting a reply
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of sentinels not yet echoed
    pub fn sentinel_len(&self) -> usize {
        self.sentinels.len()
    }

    pub fn is_pending(&self, id: i32) -> bool {
        self.pending.contains_key(&id)
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot::error::TryRecvError;

    fn register(
        correlator: &mut Correlator,
        kind: PacketType,
        body: &'static str,
    ) -> (Vec<Frame>, oneshot::Receiver<RequestResult>) {
        let (tx, rx) = oneshot::channel();
        let frames = correlator.register(kind, Bytes::from(body), tx);
        (frames, rx)
    }

    #[test]
    fn test_command_is_followed_by_sentinel() {
        let mut correlator = Correlator::with_ids(IdAllocator::starting_after(4));
        let (frames, _rx) = register(&mut correlator, PacketType::EXEC_COMMAND, "status");

        assert_eq!(
            frames,
            vec![
                Frame::new(5, PacketType::EXEC_COMMAND, "status"),
                Frame::sentinel(6),
            ]
        );
        assert_eq!(correlator.pending_len(), 1);
        assert_eq!(correlator.sentinel_len(), 1);
        assert!(!correlator.is_pending(6));
    }

    #[test]
    fn test_auth_has_no_sentinel() {
        let mut correlator = Correlator::new();
        let (frames, _rx) = register(&mut correlator, PacketType::AUTH, "secret");

        assert_eq!(frames, vec![Frame::new(1, PacketType::AUTH, "secret")]);
        assert_eq!(correlator.sentinel_len(), 0);
    }

    #[test]
    fn test_status_scenario() {
        let mut correlator = Correlator::with_ids(IdAllocator::starting_after(4));
        let (_, mut rx) = register(&mut correlator, PacketType::EXEC_COMMAND, "status");

        let reply = Frame::new(5, PacketType::RESPONSE_VALUE, "hostname: foo\n");
        assert_eq!(
            correlator.dispatch(reply),
            Dispatch::Accumulated { id: 5, first: true }
        );
        assert_eq!(correlator.dispatch(Frame::sentinel(6)), Dispatch::Resolved { id: 5 });

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.text(), "hostname: foo\n");
        assert_eq!(response.frames, 1);
        assert_eq!(correlator.pending_len(), 0);
        assert_eq!(correlator.sentinel_len(), 0);
    }

    #[test]
    fn test_multi_packet_reply_resolves_once_at_sentinel() {
        let mut correlator = Correlator::with_ids(IdAllocator::starting_after(9));
        let (_, mut rx) = register(&mut correlator, PacketType::EXEC_COMMAND, "cvarlist");

        for (i, chunk) in ["a", "b", "c"].iter().enumerate() {
            let dispatch = correlator.dispatch(Frame::new(10, PacketType::RESPONSE_VALUE, *chunk));
            assert_eq!(dispatch, Dispatch::Accumulated { id: 10, first: i == 0 });
            assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        }

        let dispatch = correlator.dispatch(Frame::sentinel(11));
        assert_eq!(dispatch, Dispatch::Resolved { id: 10 });

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.body, Bytes::from("abc"));
        assert_eq!(response.frames, 3);
        assert_eq!(correlator.pending_len(), 0);
    }

    #[test]
    fn test_unmatched_frame_is_a_notification() {
        let mut correlator = Correlator::new();
        let (_, mut rx) = register(&mut correlator, PacketType::EXEC_COMMAND, "status");

        let push = Frame::new(0, PacketType::RESPONSE_VALUE, "L 10/18/2026 - player joined");
        assert_eq!(correlator.dispatch(push.clone()), Dispatch::Notification(push));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(correlator.pending_len(), 1);
    }

    #[test]
    fn test_concurrent_requests_get_their_own_results() {
        let mut correlator = Correlator::new();
        let (_, mut first) = register(&mut correlator, PacketType::EXEC_COMMAND, "one");
        let (_, mut second) = register(&mut correlator, PacketType::EXEC_COMMAND, "two");

        correlator.dispatch(Frame::new(1, PacketType::RESPONSE_VALUE, "1"));
        correlator.dispatch(Frame::sentinel(2));
        correlator.dispatch(Frame::new(3, PacketType::RESPONSE_VALUE, "2"));
        correlator.dispatch(Frame::sentinel(4));

        assert_eq!(first.try_recv().unwrap().unwrap().text(), "1");
        assert_eq!(second.try_recv().unwrap().unwrap().text(), "2");
    }

    #[test]
    fn test_auth_ignores_empty_response_value() {
        let mut correlator = Correlator::new();
        let (_, mut rx) = register(&mut correlator, PacketType::AUTH, "secret");

        assert_eq!(
            correlator.dispatch(Frame::new(1, PacketType::RESPONSE_VALUE, "")),
            Dispatch::Ignored { id: 1 }
        );
        assert_eq!(
            correlator.dispatch(Frame::new(1, PacketType::AUTH_RESPONSE, "")),
            Dispatch::Resolved { id: 1 }
        );

        let response = rx.try_recv().unwrap().unwrap();
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_auth_failure_marker_rejects_pending_auth() {
        let mut correlator = Correlator::new();
        let (_, mut rx) = register(&mut correlator, PacketType::AUTH, "wrongpass");

        assert_eq!(
            correlator.dispatch(Frame::new(AUTH_FAILED_ID, PacketType::AUTH_RESPONSE, "")),
            Dispatch::AuthRejected { count: 1 }
        );
        assert_eq!(rx.try_recv(), Ok(Err(RequestError::AuthenticationRejected)));
        assert_eq!(correlator.pending_len(), 0);
    }

    #[test]
    fn test_failure_marker_without_pending_auth_is_a_notification() {
        let mut correlator = Correlator::new();
        let frame = Frame::new(AUTH_FAILED_ID, PacketType::AUTH_RESPONSE, "");
        assert_eq!(correlator.dispatch(frame.clone()), Dispatch::Notification(frame));
    }

    #[test]
    fn test_sentinel_cleans_up_abandoned_command() {
        let mut correlator = Correlator::new();
        let (_, rx) = register(&mut correlator, PacketType::EXEC_COMMAND, "status");
        drop(rx);

        assert_eq!(correlator.dispatch(Frame::sentinel(2)), Dispatch::Resolved { id: 1 });
        assert_eq!(correlator.pending_len(), 0);
    }

    #[test]
    fn test_abandoned_auth_is_swept_on_next_register() {
        let mut correlator = Correlator::new();
        let (_, rx) = register(&mut correlator, PacketType::AUTH, "secret");
        drop(rx);
        assert_eq!(correlator.pending_len(), 1);

        let (_, _rx) = register(&mut correlator, PacketType::EXEC_COMMAND, "status");
        assert!(!correlator.is_pending(1));
        assert_eq!(correlator.pending_len(), 1);
    }

    #[test]
    fn test_fail_all_resolves_outstanding_requests() {
        let mut correlator = Correlator::new();
        let (_, mut rx) = register(&mut correlator, PacketType::EXEC_COMMAND, "status");

        assert_eq!(correlator.fail_all("connection closed"), 1);
        assert_eq!(
            rx.try_recv(),
            Ok(Err(RequestError::Unresolved {
                id: 1,
                reason: "connection closed".to_string(),
            }))
        );
        assert_eq!(correlator.sentinel_len(), 0);
    }
}
