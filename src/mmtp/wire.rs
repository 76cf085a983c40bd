//! MMTP protobuf frames.
//!
//! Only the parts of the MMTP schema the gateway speaks are declared here; anything else a
//! router sends decodes with the unknown fields skipped.

use prost::Message;
use uuid::Uuid;

#[derive(Clone, PartialEq, Message)]
pub struct MmtpMessage {
    #[prost(enumeration = "MsgType", tag = "1")]
    pub msg_type: i32,
    #[prost(string, tag = "2")]
    pub uuid: String,
    #[prost(oneof = "mmtp_message::Body", tags = "3, 4")]
    pub body: Option<mmtp_message::Body>,
}

pub mod mmtp_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "3")]
        ProtocolMessage(super::ProtocolMessage),
        #[prost(message, tag = "4")]
        ResponseMessage(super::ResponseMessage),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MsgType {
    UnspecifiedMessage = 0,
    ProtocolMessage = 1,
    ResponseMessage = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtocolMessage {
    #[prost(enumeration = "ProtocolMessageType", tag = "1")]
    pub protocol_msg_type: i32,
    #[prost(oneof = "protocol_message::Body", tags = "4, 7, 8")]
    pub body: Option<protocol_message::Body>,
}

pub mod protocol_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "4")]
        SendMessage(super::SendMessage),
        #[prost(message, tag = "7")]
        DisconnectMessage(super::Disconnect),
        #[prost(message, tag = "8")]
        ConnectMessage(super::Connect),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolMessageType {
    UnspecifiedMessage = 0,
    SubscribeMessage = 1,
    UnsubscribeMessage = 2,
    SendMessage = 3,
    ReceiveMessage = 4,
    FetchMessage = 5,
    DisconnectMessage = 6,
    ConnectMessage = 7,
}

#[derive(Clone, PartialEq, Message)]
pub struct SendMessage {
    #[prost(message, optional, tag = "1")]
    pub application_message: Option<ApplicationMessage>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Connect {
    #[prost(string, optional, tag = "1")]
    pub own_mrn: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Disconnect {}

#[derive(Clone, PartialEq, Message)]
pub struct ApplicationMessage {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ApplicationMessageHeader>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ApplicationMessageHeader {
    #[prost(string, tag = "1")]
    pub subject: String,
    /// Unix seconds after which routers may discard the message.
    #[prost(int64, tag = "3")]
    pub expires: i64,
    #[prost(string, tag = "4")]
    pub sender: String,
    #[prost(uint32, tag = "6")]
    pub body_size_num_bytes: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseMessage {
    #[prost(string, tag = "1")]
    pub response_to_uuid: String,
    #[prost(enumeration = "ResponseEnum", tag = "2")]
    pub response: i32,
    #[prost(string, optional, tag = "4")]
    pub reason_text: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ResponseEnum {
    UnspecifiedResponse = 0,
    Good = 1,
    Error = 2,
}

impl MmtpMessage {
    fn protocol(kind: ProtocolMessageType, body: protocol_message::Body) -> Self {
        Self {
            msg_type: MsgType::ProtocolMessage as i32,
            uuid: Uuid::new_v4().to_string(),
            body: Some(mmtp_message::Body::ProtocolMessage(ProtocolMessage {
                protocol_msg_type: kind as i32,
                body: Some(body),
            })),
        }
    }

    pub fn connect(own_mrn: &str) -> Self {
        Self::protocol(
            ProtocolMessageType::ConnectMessage,
            protocol_message::Body::ConnectMessage(Connect {
                own_mrn: Some(own_mrn.to_string()),
            }),
        )
    }

    pub fn disconnect() -> Self {
        Self::protocol(
            ProtocolMessageType::DisconnectMessage,
            protocol_message::Body::DisconnectMessage(Disconnect {}),
        )
    }

    pub fn send(application_message: ApplicationMessage) -> Self {
        Self::protocol(
            ProtocolMessageType::SendMessage,
            protocol_message::Body::SendMessage(SendMessage {
                application_message: Some(application_message),
            }),
        )
    }

    /// A router's answer to the message identified by `response_to`.
    pub fn response(response_to: &str, response: ResponseEnum, reason_text: Option<String>) -> Self {
        Self {
            msg_type: MsgType::ResponseMessage as i32,
            uuid: Uuid::new_v4().to_string(),
            body: Some(mmtp_message::Body::ResponseMessage(ResponseMessage {
                response_to_uuid: response_to.to_string(),
                response: response as i32,
                reason_text,
            })),
        }
    }

    pub fn to_frame(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(frame)
    }

    pub fn protocol_message(&self) -> Option<&ProtocolMessage> {
        match &self.body {
            Some(mmtp_message::Body::ProtocolMessage(message)) => Some(message),
            _ => None,
        }
    }

    /// The application message carried by a SEND, if this is one.
    pub fn application_message(&self) -> Option<&ApplicationMessage> {
        match self.protocol_message()?.body.as_ref()? {
            protocol_message::Body::SendMessage(send) => send.application_message.as_ref(),
            _ => None,
        }
    }
}

impl ApplicationMessage {
    /// Builds a message for `subject`; `signature` must cover [`signature_input`] of the same fields.
    pub fn new(subject: &str, expires: i64, sender: &str, body: Vec<u8>, signature: Vec<u8>) -> Self {
        Self {
            header: Some(ApplicationMessageHeader {
                subject: subject.to_string(),
                expires,
                sender: sender.to_string(),
                body_size_num_bytes: body.len() as u32,
            }),
            signature,
            body,
        }
    }
}

/// Bytes an application message signature is computed over: subject, expiry, sender, body
/// length and body, with the numbers in decimal.
pub fn signature_input(subject: &str, expires: i64, sender: &str, body: &[u8]) -> Vec<u8> {
    let expires = expires.to_string();
    let body_len = body.len().to_string();

    let mut input =
        Vec::with_capacity(subject.len() + expires.len() + sender.len() + body_len.len() + body.len());
    input.extend_from_slice(subject.as_bytes());
    input.extend_from_slice(expires.as_bytes());
    input.extend_from_slice(sender.as_bytes());
    input.extend_from_slice(body_len.as_bytes());
    input.extend_from_slice(body);
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_carries_own_mrn_and_fresh_uuid() {
        let first = MmtpMessage::connect("urn:mrn:gw");
        let second = MmtpMessage::connect("urn:mrn:gw");

        assert_ne!(first.uuid, second.uuid);
        assert!(Uuid::parse_str(&first.uuid).is_ok());
        assert_eq!(first.msg_type(), MsgType::ProtocolMessage);

        let protocol = first.protocol_message().unwrap();
        assert_eq!(protocol.protocol_msg_type(), ProtocolMessageType::ConnectMessage);
        match protocol.body.as_ref().unwrap() {
            protocol_message::Body::ConnectMessage(connect) => {
                assert_eq!(connect.own_mrn.as_deref(), Some("urn:mrn:gw"))
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn send_survives_the_wire() {
        let message = MmtpMessage::send(ApplicationMessage::new(
            "s124",
            1_700_000_000,
            "urn:mrn:gw",
            b"hello".to_vec(),
            vec![1, 2, 3],
        ));
        let decoded = MmtpMessage::from_frame(&message.to_frame()).unwrap();

        assert_eq!(decoded, message);
        let app = decoded.application_message().unwrap();
        let header = app.header.as_ref().unwrap();
        assert_eq!(header.subject, "s124");
        assert_eq!(header.body_size_num_bytes, 5);
        assert_eq!(app.signature, vec![1, 2, 3]);
    }

    #[test]
    fn signature_input_concatenates_fields_in_order() {
        let input = signature_input("subj", 42, "urn:mrn:gw", b"abc");
        assert_eq!(input, b"subj42urn:mrn:gw3abc".to_vec());
    }

    #[test]
    fn response_references_original_uuid() {
        let response = MmtpMessage::response("abc", ResponseEnum::Error, Some("denied".into()));
        let decoded = MmtpMessage::from_frame(&response.to_frame()).unwrap();

        assert_eq!(decoded.msg_type(), MsgType::ResponseMessage);
        match decoded.body {
            Some(mmtp_message::Body::ResponseMessage(r)) => {
                assert_eq!(r.response_to_uuid, "abc");
                assert_eq!(r.response(), ResponseEnum::Error);
                assert_eq!(r.reason_text.as_deref(), Some("denied"));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn garbage_frames_fail_to_decode() {
        assert!(MmtpMessage::from_frame(&[0xff, 0xff, 0xff]).is_err());
    }
}
