//! RTCP feedback synthesis
//!
//! The gateway rewrites the SSRCs of relayed feedback for the peer it is sent
//! to, so every SSRC here is left at zero.

use webrtc::rtcp::payload_feedbacks::full_intra_request::{FirEntry, FullIntraRequest};
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use webrtc::util::marshal::Marshal;

use crate::MediaError;

pub const PLI_LEN: usize = 12;
pub const FIR_LEN: usize = 20;
/// REMB with a single SSRC entry
pub const REMB_LEN: usize = 24;

/// Picture Loss Indication
pub fn pli() -> Result<Vec<u8>, MediaError> {
    let packet = PictureLossIndication {
        sender_ssrc: 0,
        media_ssrc: 0,
    };
    Ok(packet.marshal()?.to_vec())
}

/// Full Intra Request with the given command sequence number
pub fn fir(sequence_number: u8) -> Result<Vec<u8>, MediaError> {
    let packet = FullIntraRequest {
        sender_ssrc: 0,
        media_ssrc: 0,
        fir: vec![FirEntry {
            ssrc: 0,
            sequence_number,
        }],
    };
    Ok(packet.marshal()?.to_vec())
}

/// Receiver Estimated Maximum Bitrate, in bits per second
pub fn remb(bitrate: u32) -> Result<Vec<u8>, MediaError> {
    let packet = ReceiverEstimatedMaximumBitrate {
        sender_ssrc: 0,
        bitrate: bitrate as f32,
        ssrcs: vec![0],
    };
    Ok(packet.marshal()?.to_vec())
}

/// Cheap check that a datagram looks like a compound RTCP packet
/// (version 2, packet type in the RTCP range of RFC 5761 section 4).
pub fn is_rtcp(buf: &[u8]) -> bool {
    buf.len() >= 8 && buf[0] >> 6 == 2 && (192..=223).contains(&buf[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pli_layout() {
        let buf = pli().unwrap();
        assert_eq!(buf.len(), PLI_LEN);
        // V=2, FMT=1, PT=PSFB
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 206);
        assert!(is_rtcp(&buf));
    }

    #[test]
    fn test_fir_carries_sequence_number() {
        let buf = fir(7).unwrap();
        assert_eq!(buf.len(), FIR_LEN);
        assert_eq!(buf[0] & 0x1f, 4);
        assert_eq!(buf[16], 7);
    }

    #[test]
    fn test_remb_layout() {
        let buf = remb(500_000).unwrap();
        assert_eq!(buf.len(), REMB_LEN);
        assert_eq!(buf[0] & 0x1f, 15);
        assert_eq!(&buf[12..16], b"REMB");
        // one SSRC entry
        assert_eq!(buf[16], 1);
    }

    #[test]
    fn test_is_rtcp() {
        assert!(!is_rtcp(&[0x80, 96, 0, 1, 0, 0, 0, 0]));
        assert!(!is_rtcp(&[0x81, 201]));
        assert!(is_rtcp(&[0x81, 201, 0, 1, 0, 0, 0, 0]));
    }
}
