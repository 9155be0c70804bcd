//! Synchronous control-message handling
//!
//! Runs on the gateway's calling thread. Policy fields are applied on every
//! message, `configure`/`pli`/`fir`/`remb` are answered immediately, and
//! everything else is handed to the signaling worker.

use serde_json::Value;
use std::net::Ipv4Addr;
use std::sync::Arc;

use rtpforward_media::{AudioCodec, VideoCodec, rtcp};
use rtpforward_protocol::{ControlMessage, Event, Request};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::session::{ForwardTarget, PolicyUpdate, Session, TargetPorts};

/// Largest accepted `drop_probability`, in parts per thousand
pub const MAX_DROP_PERMILLE: u16 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Answer right away with this event
    Reply(Event),
    /// Queue for the signaling worker
    Deferred,
}

/// A validated `configure` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configure {
    pub address: Ipv4Addr,
    pub ports: TargetPorts,
    pub audio: Option<AudioCodec>,
    pub video: Option<VideoCodec>,
}

pub fn handle_message(
    gateway: &Arc<dyn Gateway>,
    config: &Config,
    session: &Session,
    body: Option<&Value>,
    has_jsep: bool,
) -> Result<Outcome> {
    let body = body.ok_or(Error::NoMessage)?;
    let msg = ControlMessage::from_value(body)?;

    let policy = policy_update(&msg)?;
    session.apply_policy(&policy);

    let Some(name) = msg.request.as_deref() else {
        return Ok(Outcome::Deferred);
    };
    let Some(request) = Request::parse(name) else {
        tracing::debug!("Session {}: request {:?} goes to the signaling worker", session.handle(), name);
        return Ok(Outcome::Deferred);
    };

    // The answer would never be pushed, so do not leave the browser waiting for one
    if has_jsep {
        return Err(Error::InvalidElement(format!(
            "request {:?} does not take a JSEP",
            name
        )));
    }

    let event = match request {
        Request::Configure => {
            let request = parse_configure(&msg)?;
            configure(gateway, config, session, request)?;
            Event::configured()
        }
        Request::Pli => {
            gateway.relay_rtcp(session.handle(), true, &rtcp::pli()?)?;
            tracing::debug!("Session {}: sent PLI", session.handle());
            Event::ok()
        }
        Request::Fir => {
            let seq = session.next_fir_seq();
            gateway.relay_rtcp(session.handle(), true, &rtcp::fir(seq)?)?;
            tracing::debug!("Session {}: sent FIR #{}", session.handle(), seq);
            Event::ok()
        }
        Request::Remb => {
            let bitrate = msg.bitrate.ok_or(Error::MissingElement("bitrate"))?;
            if bitrate == 0 {
                return Err(Error::InvalidElement("bitrate must be positive".to_string()));
            }
            gateway.relay_rtcp(session.handle(), true, &rtcp::remb(bitrate)?)?;
            tracing::debug!("Session {}: sent REMB {} bps", session.handle(), bitrate);
            Event::ok()
        }
    };

    Ok(Outcome::Reply(event))
}

/// Collect the policy fields, rejecting the whole set if any is out of range
pub fn policy_update(msg: &ControlMessage) -> Result<PolicyUpdate> {
    if let Some(p) = msg.drop_probability {
        if p > MAX_DROP_PERMILLE {
            return Err(Error::InvalidElement(format!(
                "drop_probability {} exceeds {}",
                p, MAX_DROP_PERMILLE
            )));
        }
    }

    Ok(PolicyUpdate {
        enable_video_on_keyframe: msg.enable_video_on_keyframe,
        disable_video_on_packetloss: msg.disable_video_on_packetloss,
        video_enabled: msg.video_enabled,
        audio_enabled: msg.audio_enabled,
        drop_permille: msg.drop_probability,
        drop_video_packets: msg.drop_video_packets,
        drop_audio_packets: msg.drop_audio_packets,
    })
}

/// Validate every `configure` field, stopping at the first bad one.
pub fn parse_configure(msg: &ControlMessage) -> Result<Configure> {
    let ports = TargetPorts {
        video_rtp: required_port(msg.sendport_video_rtp, "sendport_video_rtp")?,
        video_rtcp: required_port(msg.sendport_video_rtcp, "sendport_video_rtcp")?,
        audio_rtp: required_port(msg.sendport_audio_rtp, "sendport_audio_rtp")?,
        audio_rtcp: required_port(msg.sendport_audio_rtcp, "sendport_audio_rtcp")?,
    };

    let address = msg
        .sendipv4
        .as_deref()
        .ok_or(Error::MissingElement("sendipv4"))?;
    let address: Ipv4Addr = address
        .parse()
        .map_err(|_| Error::InvalidElement(format!("sendipv4 {:?}", address)))?;

    let audio = msg
        .negotiate_acodec
        .as_deref()
        .map(str::parse::<AudioCodec>)
        .transpose()
        .map_err(|e| Error::InvalidElement(e.to_string()))?;
    let video = msg
        .negotiate_vcodec
        .as_deref()
        .map(str::parse::<VideoCodec>)
        .transpose()
        .map_err(|e| Error::InvalidElement(e.to_string()))?;

    Ok(Configure {
        address,
        ports,
        audio,
        video,
    })
}

fn required_port(port: Option<u16>, field: &'static str) -> Result<u16> {
    match port {
        None => Err(Error::MissingElement(field)),
        Some(0) => Err(Error::InvalidElement(format!("{} must not be 0", field))),
        Some(port) => Ok(port),
    }
}

/// Replace the session's outbound target.
///
/// The previous socket is closed before the new one is opened: the target is
/// unpublished first, then its relay workers are joined so none of them still
/// holds a handle on it. Joining blocks for up to one relay poll interval.
pub fn configure(
    gateway: &Arc<dyn Gateway>,
    config: &Config,
    session: &Session,
    request: Configure,
) -> Result<()> {
    let handle = session.handle();

    let had_target = session.replace_target(None).is_some();
    session.join_relays();
    if had_target {
        tracing::debug!("Session {}: closed previous sending socket", handle);
    }

    let target = ForwardTarget::open(request.address, request.ports, config.multicast_interface)
        .map_err(Error::SocketCreate)?;

    if request.address.is_multicast() {
        tracing::warn!(
            "Session {}: forwarding to multicast group {} with TTL 0. Whether the \
             packets stay on this host is up to the OS; verify they are not routed \
             into networks where their privacy could be compromised.",
            handle,
            request.address
        );
        tracing::warn!(
            "Session {}: multicasting from interface {}",
            handle,
            config.multicast_interface
        );
    }

    tracing::info!(
        "Session {}: forwarding to {} video {}/{} audio {}/{}",
        handle,
        request.address,
        request.ports.video_rtp,
        request.ports.video_rtcp,
        request.ports.audio_rtp,
        request.ports.audio_rtcp
    );

    session.set_requested_codecs(request.audio, request.video);
    session.replace_target(Some(Arc::new(target)));

    if config.feedback_relay {
        if let Err(e) = session.start_relay(gateway, config.feedback_poll()) {
            tracing::warn!("Session {}: feedback relay not started: {}", handle, e);
        }
    }
    Ok(())
}
