//! Per-packet forwarding decisions
//!
//! Runs on the gateway's media thread for every packet, so nothing here
//! blocks on anything but the outbound `send_to`.

use rand::Rng;

use rtpforward_media::rtp::{self, RtpView};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No target configured yet
    NotConfigured,
    /// Random drop from `drop_probability`
    Simulated,
    /// One-shot drop counter
    OneShot,
    /// Stream disabled by policy
    Disabled,
    /// The socket refused the packet
    SendFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Sent to this destination port
    Forwarded(u16),
    Dropped(DropReason),
}

/// Forward one RTP packet from the browser.
pub fn forward_rtp(session: &Session, video: bool, buf: &[u8]) -> Verdict {
    let draw = rand::thread_rng().gen_range(0..1000);
    forward_rtp_with(session, video, buf, draw)
}

/// Forward one RTP packet, with `draw` in `0..1000` standing in for the
/// random loss-simulation sample.
pub fn forward_rtp_with(session: &Session, video: bool, buf: &[u8], draw: u16) -> Verdict {
    let Some(target) = session.target() else {
        return Verdict::Dropped(DropReason::NotConfigured);
    };

    if draw < session.drop_permille() {
        return Verdict::Dropped(DropReason::Simulated);
    }

    if video && session.take_video_drop() {
        tracing::debug!("Session {}: dropping video packet on request", session.handle());
        return Verdict::Dropped(DropReason::OneShot);
    }
    if !video && session.take_audio_drop() {
        tracing::debug!("Session {}: dropping audio packet on request", session.handle());
        return Verdict::Dropped(DropReason::OneShot);
    }

    if video {
        track_video(session, buf);
    }

    let enabled = if video {
        session.video_enabled()
    } else {
        session.audio_enabled()
    };
    if !enabled {
        return Verdict::Dropped(DropReason::Disabled);
    }

    let port = target.ports().rtp(video);
    match target.send(port, buf) {
        Ok(_) => Verdict::Forwarded(port),
        Err(e) => {
            tracing::trace!("Session {}: send to port {} failed: {}", session.handle(), port, e);
            Verdict::Dropped(DropReason::SendFailed)
        }
    }
}

/// Loss detection and keyframe gating. Runs on every video packet that
/// survived the simulated drops, whether or not video is enabled, so a
/// disabled stream keeps its sequence tracking and can be re-enabled.
fn track_video(session: &Session, buf: &[u8]) {
    let packet = match RtpView::parse(buf) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::trace!("Session {}: unparsable video packet: {}", session.handle(), e);
            return;
        }
    };

    let seq = packet.sequence_number();
    let last = session.swap_last_video_seq(seq);
    let missed = rtp::missed_packets(last, seq);

    if missed > 0 {
        tracing::warn!(
            "Session {}: missed {} video packets before {}",
            session.handle(),
            missed,
            seq
        );
        if session.disable_video_on_packetloss() && session.video_enabled() {
            tracing::warn!("Session {}: packet loss, disabling video", session.handle());
            session.set_video_enabled(false);
        }
    }

    if let Some(codec) = session.negotiated_video() {
        if codec.is_keyframe(packet.payload) {
            tracing::debug!("Session {}: {} keyframe at {}", session.handle(), codec, seq);
            if session.enable_video_on_keyframe() && !session.video_enabled() {
                tracing::warn!("Session {}: keyframe, enabling video", session.handle());
                session.set_video_enabled(true);
            }
        }
    }
}

/// Forward one RTCP packet from the browser, unmodified.
pub fn forward_rtcp(session: &Session, video: bool, buf: &[u8]) -> Verdict {
    let Some(target) = session.target() else {
        return Verdict::Dropped(DropReason::NotConfigured);
    };

    let port = target.ports().rtcp(video);
    match target.send(port, buf) {
        Ok(_) => Verdict::Forwarded(port),
        Err(e) => {
            tracing::trace!("Session {}: send to port {} failed: {}", session.handle(), port, e);
            Verdict::Dropped(DropReason::SendFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SessionHandle;
    use crate::session::{ForwardTarget, PolicyUpdate, TargetPorts};
    use rtpforward_media::{AudioCodec, VideoCodec};
    use std::net::{Ipv4Addr, UdpSocket};
    use std::sync::Arc;
    use std::time::Duration;

    struct Receiver {
        video: UdpSocket,
        audio: UdpSocket,
    }

    impl Receiver {
        fn new() -> Self {
            let video = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            let audio = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            video.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
            audio.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
            Self { video, audio }
        }

        fn ports(&self) -> TargetPorts {
            let video = self.video.local_addr().unwrap().port();
            let audio = self.audio.local_addr().unwrap().port();
            TargetPorts {
                video_rtp: video,
                video_rtcp: video,
                audio_rtp: audio,
                audio_rtcp: audio,
            }
        }
    }

    fn configured_session(rx: &Receiver) -> Session {
        let session = Session::new(SessionHandle(1));
        let target = ForwardTarget::open(Ipv4Addr::LOCALHOST, rx.ports(), Ipv4Addr::LOCALHOST).unwrap();
        session.replace_target(Some(Arc::new(target)));
        session
    }

    /// VP8 packet; `key` sets the keyframe bit pattern
    fn vp8_packet(seq: u16, key: bool) -> Vec<u8> {
        let mut buf = vec![0x80, 96, (seq >> 8) as u8, seq as u8, 0, 0, 0, 1, 0, 0, 0, 1];
        buf.push(0x10); // S=1, PID=0
        if key {
            buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x9d, 0x01, 0x2a, 0x80, 0x02, 0xe0, 0x01]);
        } else {
            buf.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        }
        buf
    }

    #[test]
    fn test_unconfigured_session_drops() {
        let session = Session::new(SessionHandle(1));
        assert_eq!(
            forward_rtp_with(&session, true, &vp8_packet(1, false), 999),
            Verdict::Dropped(DropReason::NotConfigured)
        );
        assert_eq!(
            forward_rtcp(&session, false, &[0x80, 200, 0, 1]),
            Verdict::Dropped(DropReason::NotConfigured)
        );
    }

    #[test]
    fn test_forwards_bytes_unchanged() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        let packet = vp8_packet(100, false);

        assert_eq!(
            forward_rtp_with(&session, true, &packet, 999),
            Verdict::Forwarded(rx.ports().video_rtp)
        );

        let mut buf = [0u8; 1500];
        let len = rx.video.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], &packet[..]);
    }

    #[test]
    fn test_drop_probability_threshold() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        session.apply_policy(&PolicyUpdate {
            drop_permille: Some(300),
            ..Default::default()
        });

        let audio = [0x80, 111, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0xfc];
        assert_eq!(
            forward_rtp_with(&session, false, &audio, 299),
            Verdict::Dropped(DropReason::Simulated)
        );
        assert!(matches!(forward_rtp_with(&session, false, &audio, 300), Verdict::Forwarded(_)));

        session.apply_policy(&PolicyUpdate {
            drop_permille: Some(1000),
            ..Default::default()
        });
        assert_eq!(
            forward_rtp_with(&session, false, &audio, 999),
            Verdict::Dropped(DropReason::Simulated)
        );
    }

    #[test]
    fn test_one_shot_video_drops() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        session.apply_policy(&PolicyUpdate {
            drop_video_packets: Some(2),
            ..Default::default()
        });

        let verdicts: Vec<_> = (1..=3)
            .map(|seq| forward_rtp_with(&session, true, &vp8_packet(seq, false), 999))
            .collect();
        assert_eq!(verdicts[0], Verdict::Dropped(DropReason::OneShot));
        assert_eq!(verdicts[1], Verdict::Dropped(DropReason::OneShot));
        assert!(matches!(verdicts[2], Verdict::Forwarded(_)));
    }

    #[test]
    fn test_loss_disables_until_keyframe() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        session.set_negotiated(Some(AudioCodec::Opus), Some(VideoCodec::Vp8));
        session.apply_policy(&PolicyUpdate {
            disable_video_on_packetloss: Some(true),
            enable_video_on_keyframe: Some(true),
            ..Default::default()
        });

        assert!(matches!(forward_rtp_with(&session, true, &vp8_packet(10, false), 999), Verdict::Forwarded(_)));
        // 11 and 12 are lost
        assert_eq!(
            forward_rtp_with(&session, true, &vp8_packet(13, false), 999),
            Verdict::Dropped(DropReason::Disabled)
        );
        assert!(!session.video_enabled());
        assert_eq!(
            forward_rtp_with(&session, true, &vp8_packet(14, false), 999),
            Verdict::Dropped(DropReason::Disabled)
        );
        assert!(matches!(forward_rtp_with(&session, true, &vp8_packet(15, true), 999), Verdict::Forwarded(_)));
        assert!(session.video_enabled());
    }

    #[test]
    fn test_loss_keeps_video_when_policy_off() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        session.set_negotiated(None, Some(VideoCodec::Vp8));

        assert!(matches!(forward_rtp_with(&session, true, &vp8_packet(10, false), 999), Verdict::Forwarded(_)));
        // 11 through 19 are lost
        assert!(matches!(forward_rtp_with(&session, true, &vp8_packet(20, false), 999), Verdict::Forwarded(_)));
        assert!(session.video_enabled());
    }

    #[test]
    fn test_keyframe_never_disables_video() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        session.set_negotiated(None, Some(VideoCodec::Vp8));
        session.apply_policy(&PolicyUpdate {
            enable_video_on_keyframe: Some(true),
            ..Default::default()
        });

        for seq in 1..=3 {
            assert!(matches!(forward_rtp_with(&session, true, &vp8_packet(seq, true), 999), Verdict::Forwarded(_)));
            assert!(session.video_enabled());
        }

        session.apply_policy(&PolicyUpdate {
            enable_video_on_keyframe: Some(false),
            ..Default::default()
        });
        assert!(matches!(forward_rtp_with(&session, true, &vp8_packet(4, true), 999), Verdict::Forwarded(_)));
        assert!(session.video_enabled());
    }

    #[test]
    fn test_keyframe_ignored_without_negotiated_codec() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        session.apply_policy(&PolicyUpdate {
            video_enabled: Some(false),
            enable_video_on_keyframe: Some(true),
            ..Default::default()
        });

        assert_eq!(
            forward_rtp_with(&session, true, &vp8_packet(1, true), 999),
            Verdict::Dropped(DropReason::Disabled)
        );
        assert!(!session.video_enabled());
    }

    #[test]
    fn test_wraparound_is_not_loss() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        session.apply_policy(&PolicyUpdate {
            disable_video_on_packetloss: Some(true),
            ..Default::default()
        });

        forward_rtp_with(&session, true, &vp8_packet(65535, false), 999);
        forward_rtp_with(&session, true, &vp8_packet(0, false), 999);
        forward_rtp_with(&session, true, &vp8_packet(0, false), 999);
        assert!(session.video_enabled());
    }

    #[test]
    fn test_unparsable_video_still_forwarded() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        assert!(matches!(forward_rtp_with(&session, true, &[0x80, 0x60], 999), Verdict::Forwarded(_)));
    }

    #[test]
    fn test_rtcp_passthrough() {
        let rx = Receiver::new();
        let session = configured_session(&rx);
        let report = [0x81, 201, 0, 7, 0, 0, 0, 1];
        assert_eq!(forward_rtcp(&session, false, &report), Verdict::Forwarded(rx.ports().audio_rtcp));

        let mut buf = [0u8; 64];
        let len = rx.audio.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], &report);
    }
}
