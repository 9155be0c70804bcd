//! Asynchronous signaling pipeline
//!
//! Anything that needs an offer/answer exchange is queued here and answered
//! through [`Gateway::push_event`] by a single worker. The gateway merges the
//! pushed answer into its own state, which it cannot do while it is still
//! inside the `handle_message` call that delivered the offer.

pub mod sdp;

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use rtpforward_protocol::{Event, Jsep, JsepType};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::session::Session;

/// A deferred message, owned by the queue until processed
pub struct SignalingMessage {
    pub session: Arc<Session>,
    pub transaction: Option<String>,
    pub body: Value,
    pub jsep: Option<Value>,
}

pub enum SignalingCommand {
    Message(SignalingMessage),
    Shutdown,
}

pub type SignalingSender = mpsc::UnboundedSender<SignalingCommand>;
pub type SignalingReceiver = mpsc::UnboundedReceiver<SignalingCommand>;

pub fn channel() -> (SignalingSender, SignalingReceiver) {
    mpsc::unbounded_channel()
}

/// Process queued messages in order until the shutdown sentinel arrives or
/// every sender is gone.
///
/// `relay_poll` is set when the feedback relay is enabled.
pub async fn run(mut rx: SignalingReceiver, gateway: Arc<dyn Gateway>, relay_poll: Option<Duration>) {
    tracing::info!("Signaling worker started");

    while let Some(command) = rx.recv().await {
        match command {
            SignalingCommand::Message(msg) => process(&gateway, relay_poll, msg),
            SignalingCommand::Shutdown => break,
        }
    }

    tracing::info!("Signaling worker stopped");
}

/// Handle one deferred message and push the outcome to the gateway.
pub fn process(gateway: &Arc<dyn Gateway>, relay_poll: Option<Duration>, msg: SignalingMessage) {
    let session = &msg.session;
    let handle = session.handle();

    if session.is_destroyed() {
        tracing::debug!("Session {} is gone, discarding queued message", handle);
        return;
    }

    tracing::debug!("Session {}: processing body {}", handle, msg.body);

    let (event, jsep) = match msg.jsep.as_ref() {
        None => (Event::ok(), None),
        Some(offer) => match answer_offer(session, offer) {
            Ok(answer) => (Event::ok(), Some(answer)),
            Err(e) => {
                tracing::error!("Session {}: {}", handle, e);
                (e.to_event(), None)
            }
        },
    };

    let answered = jsep.is_some();
    let start = Instant::now();
    let result = gateway.push_event(handle, msg.transaction.as_deref(), event.to_value(), jsep);
    tracing::debug!(
        "Session {}: pushed event in {:?} ({})",
        handle,
        start.elapsed(),
        if result.is_ok() { "ok" } else { "failed" }
    );

    match result {
        // Renegotiated, the session is live again and so is its feedback
        Ok(()) if answered => {
            session.clear_hang_up();
            if let Some(poll) = relay_poll {
                match session.start_relay(gateway, poll) {
                    Ok(true) => tracing::info!("Session {}: feedback relay resumed", handle),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Session {}: feedback relay not resumed: {}", handle, e),
                }
            }
        }
        Ok(()) => {}
        Err(e) => tracing::warn!("Session {}: could not push event: {}", handle, e),
    }
}

fn answer_offer(session: &Session, jsep: &Value) -> Result<Value> {
    let jsep = Jsep::from_value(jsep)?;
    if jsep.kind != JsepType::Offer {
        return Err(Error::InvalidElement(format!("jsep type {:?}", jsep.kind)));
    }
    let offer = jsep.sdp.ok_or(Error::MissingElement("sdp"))?;

    tracing::info!("Session {}: answering SDP offer", session.handle());
    tracing::trace!("Session {}: offer {}", session.handle(), offer);

    let negotiation = session.negotiation();
    let answer = sdp::negotiate(
        &offer,
        sdp::Preferences {
            audio: negotiation.requested_audio,
            video: negotiation.requested_video,
        },
    )?;

    match answer.video {
        Some(codec) => tracing::info!("Session {}: negotiated video codec is {}", session.handle(), codec),
        None => tracing::info!("Session {}: no video for this session", session.handle()),
    }
    if let Some(codec) = answer.audio {
        tracing::info!("Session {}: negotiated audio codec is {}", session.handle(), codec);
    }
    session.set_negotiated(answer.audio, answer.video);

    Ok(Jsep::answer(answer.sdp).to_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SessionHandle;
    use crate::gateway::testing::RecordingGateway;
    use crate::session::{ForwardTarget, TargetPorts};
    use rtpforward_media::VideoCodec;
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn recorder() -> (Arc<RecordingGateway>, Arc<dyn Gateway>) {
        let recorder = Arc::new(RecordingGateway::default());
        let gateway: Arc<dyn Gateway> = recorder.clone();
        (recorder, gateway)
    }

    fn message(session: &Arc<Session>, jsep: Option<Value>) -> SignalingMessage {
        SignalingMessage {
            session: session.clone(),
            transaction: Some("tx1".to_string()),
            body: json!({}),
            jsep,
        }
    }

    #[test]
    fn test_offer_is_answered() {
        let (recorder, gateway) = recorder();
        let session = Arc::new(Session::new(SessionHandle(1)));
        session.hang_up();

        let offer = json!({ "type": "offer", "sdp": sdp::tests::BROWSER_OFFER });
        process(&gateway, None, message(&session, Some(offer)));

        let pushed = recorder.pushed.lock();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].transaction.as_deref(), Some("tx1"));
        assert_eq!(pushed[0].event, json!({ "rtpforward": "event", "result": "ok" }));
        let jsep = pushed[0].jsep.as_ref().unwrap();
        assert_eq!(jsep["type"], "answer");
        assert!(jsep["sdp"].as_str().unwrap().contains("VP8/90000"));

        assert_eq!(session.negotiated_video(), Some(VideoCodec::Vp8));
        assert!(!session.is_hanging_up());
    }

    #[test]
    fn test_answer_resumes_feedback_relay() {
        let (_, gateway) = recorder();
        let session = Arc::new(Session::new(SessionHandle(1)));
        let ports = TargetPorts {
            video_rtp: 5000,
            video_rtcp: 5001,
            audio_rtp: 5002,
            audio_rtcp: 5003,
        };
        let target = ForwardTarget::open(Ipv4Addr::LOCALHOST, ports, Ipv4Addr::LOCALHOST).unwrap();
        session.replace_target(Some(Arc::new(target)));
        let poll = Duration::from_millis(20);

        assert!(session.start_relay(&gateway, poll).unwrap());
        session.hang_up();
        session.stop_relays();
        assert!(!session.has_running_relay());

        let offer = json!({ "type": "offer", "sdp": sdp::tests::BROWSER_OFFER });
        process(&gateway, Some(poll), message(&session, Some(offer)));
        assert!(session.has_running_relay());

        // a second answer does not stack another relay
        assert!(!session.start_relay(&gateway, poll).unwrap());
        session.close();
        assert!(!session.has_running_relay());
    }

    #[test]
    fn test_bad_offer_pushes_error() {
        let (recorder, gateway) = recorder();
        let session = Arc::new(Session::new(SessionHandle(1)));

        let offer = json!({ "type": "offer", "sdp": "garbage" });
        process(&gateway, None, message(&session, Some(offer)));

        let pushed = recorder.pushed.lock();
        assert_eq!(pushed[0].event["error_code"], 414);
        assert!(pushed[0].jsep.is_none());
        assert_eq!(session.negotiated_video(), None);
    }

    #[test]
    fn test_message_without_offer_is_acknowledged() {
        let (recorder, gateway) = recorder();
        let session = Arc::new(Session::new(SessionHandle(1)));
        process(&gateway, None, message(&session, None));

        let pushed = recorder.pushed.lock();
        assert_eq!(pushed[0].event, json!({ "rtpforward": "event", "result": "ok" }));
        assert!(pushed[0].jsep.is_none());
    }

    #[test]
    fn test_destroyed_session_is_skipped() {
        let (recorder, gateway) = recorder();
        let session = Arc::new(Session::new(SessionHandle(1)));
        session.mark_destroyed(Instant::now());
        process(&gateway, None, message(&session, None));
        assert!(recorder.pushed.lock().is_empty());
    }

    #[test]
    fn test_answer_type_is_rejected() {
        let (recorder, gateway) = recorder();
        let session = Arc::new(Session::new(SessionHandle(1)));
        let jsep = json!({ "type": "answer", "sdp": sdp::tests::BROWSER_OFFER });
        process(&gateway, None, message(&session, Some(jsep)));
        assert_eq!(recorder.pushed.lock()[0].event["error_code"], 413);
    }

    #[tokio::test]
    async fn test_worker_stops_on_sentinel() {
        let gateway = Arc::new(RecordingGateway::default());
        let (tx, rx) = channel();
        let session = Arc::new(Session::new(SessionHandle(9)));

        tx.send(SignalingCommand::Message(message(&session, None))).ok();
        tx.send(SignalingCommand::Shutdown).ok();
        tx.send(SignalingCommand::Message(message(&session, None))).ok();

        run(rx, gateway.clone(), None).await;
        assert_eq!(gateway.pushed.lock().len(), 1);
    }
}
