use bytes::Bytes;

/// Transport-neutral push frame.
///
/// Transports convert their native frame representation into `PushFrame`; everything above the
/// transport only sees this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<PushCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl PushFrame {
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn text_static(s: &'static str) -> Self {
        Self::Text(Bytes::from_static(s.as_bytes()))
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<Bytes>) -> Self {
        Self::Close(Some(PushCloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    /// Keep-alive frames carry no application payload.
    #[inline]
    pub fn is_control(&self) -> bool {
        matches!(self, PushFrame::Ping(_) | PushFrame::Pong(_))
    }
}

impl PushCloseFrame {
    pub fn describe(&self) -> String {
        format!(
            "code={} reason={}",
            self.code,
            String::from_utf8_lossy(self.reason.as_ref())
        )
    }
}

/// Borrow the payload of data frames without allocation.
#[inline]
pub fn frame_payload(frame: &PushFrame) -> Option<&[u8]> {
    match frame {
        PushFrame::Text(bytes) | PushFrame::Binary(bytes) => Some(bytes.as_ref()),
        PushFrame::Ping(_) | PushFrame::Pong(_) | PushFrame::Close(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_only_exposed_for_data_frames() {
        assert_eq!(frame_payload(&PushFrame::text_static("{}")), Some(&b"{}"[..]));
        assert_eq!(
            frame_payload(&PushFrame::Binary(Bytes::from_static(b"\x01"))),
            Some(&b"\x01"[..])
        );
        assert!(frame_payload(&PushFrame::Ping(Bytes::from_static(b"p"))).is_none());
        assert!(frame_payload(&PushFrame::close(1000, "bye")).is_none());
    }

    #[test]
    fn close_frame_description_is_lossy_utf8() {
        let close = PushCloseFrame {
            code: 1001,
            reason: Bytes::from_static(b"going away"),
        };
        assert_eq!(close.describe(), "code=1001 reason=going away");
    }
}
