//! RTP header access and loss accounting

use webrtc::rtp::header::Header;
use webrtc::util::marshal::Unmarshal;

use crate::MediaError;

/// A parsed header plus a borrowed view of the payload (padding removed)
#[derive(Debug)]
pub struct RtpView<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

impl<'a> RtpView<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, MediaError> {
        let mut reader = buf;
        let header = Header::unmarshal(&mut reader)?;
        let mut payload = reader;

        if header.padding {
            let padding = payload.last().copied().unwrap_or(0) as usize;
            if padding == 0 || padding > payload.len() {
                return Err(MediaError::Padding);
            }
            payload = &payload[..payload.len() - padding];
        }

        Ok(Self { header, payload })
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }
}

/// Number of packets missing between two consecutive video sequence numbers.
///
/// `last == 0` means nothing has been seen yet. A sequence number that is not
/// greater than the last one is a 16-bit wrap or a duplicate and is not
/// counted as loss. Duplicates are deliberately 0 rather than `cur - last - 1`
/// wrapped to 65535: a retransmitted packet must not switch video off.
pub fn missed_packets(last: u16, current: u16) -> u16 {
    if last == 0 || current <= last {
        0
    } else {
        current - last - 1
    }
}
