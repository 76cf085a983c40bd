#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use p384::SecretKey;
use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use secom_mms_gateway::app::ports::{SecomClient, SecomClientFactory};
use secom_mms_gateway::domain::secom::SubscriptionResponseObject;
use secom_mms_gateway::domain::{AckType, Subscription, SubscriptionRequest};
use secom_mms_gateway::error::{ClientError, SessionError};
use secom_mms_gateway::mmtp::session::{CloseReason, Dialer, Link, LinkEvent};
use secom_mms_gateway::mmtp::wire::{MmtpMessage, ResponseEnum};

pub const UID_OID: [u64; 7] = [0, 9, 2342, 19200300, 100, 1, 1];

/// Writes `<alias>.key.pem` and `<alias>.crt.pem` for a self-signed P-384 identity; returns the DER.
pub fn write_identity(dir: &Path, alias: &str, mrn: &str) -> Vec<u8> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, alias);
    name.push(DnType::CustomDnType(UID_OID.to_vec()), mrn);
    params.distinguished_name = name;
    let cert = params.self_signed(&key_pair).unwrap();

    let secret = SecretKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
    let key_pem = secret.to_pkcs8_pem(pkcs8::LineEnding::LF).unwrap();
    fs::write(dir.join(format!("{alias}.key.pem")), key_pem.as_bytes()).unwrap();
    fs::write(dir.join(format!("{alias}.crt.pem")), cert.pem()).unwrap();
    cert.der().to_vec()
}

/// Router side of one in-memory link.
pub struct FakeRouter {
    frames: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<LinkEvent>,
}

impl FakeRouter {
    pub async fn next_message(&mut self) -> MmtpMessage {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("link closed");
        MmtpMessage::from_frame(&frame).unwrap()
    }

    pub async fn respond(&self, to: &str, response: ResponseEnum) {
        let frame = MmtpMessage::response(to, response, None).to_frame();
        self.events.send(LinkEvent::Frame(frame)).await.unwrap();
    }

    pub async fn drop_connection(&self) {
        self.events
            .send(LinkEvent::Closed(CloseReason::abnormal("router went away")))
            .await
            .unwrap();
    }
}

/// Dialer handing each successful link to the test; attempts listed in `refuse` fail.
pub struct LoopbackDialer {
    pub attempts: AtomicU32,
    refuse: Vec<u32>,
    routers: mpsc::UnboundedSender<FakeRouter>,
}

impl LoopbackDialer {
    pub fn new(refuse: Vec<u32>) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRouter>) {
        let (routers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                attempts: AtomicU32::new(0),
                refuse,
                routers,
            }),
            rx,
        )
    }
}

#[async_trait]
impl Dialer for LoopbackDialer {
    async fn dial(&self) -> Result<Link, SessionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refuse.contains(&attempt) {
            return Err(SessionError::Connect(format!("attempt {attempt} refused")));
        }
        let (outbound, frames) = mpsc::channel(16);
        let (events, inbound) = mpsc::channel(16);
        let _ = self.routers.send(FakeRouter { frames, events });
        Ok(Link { outbound, inbound })
    }
}

pub async fn next_router(routers: &mut mpsc::UnboundedReceiver<FakeRouter>) -> FakeRouter {
    tokio::time::timeout(Duration::from_secs(5), routers.recv())
        .await
        .expect("timed out waiting for a dial")
        .unwrap()
}

/// Records every call a remote SECOM service would see, per service MRN.
#[derive(Default)]
pub struct RemoteLog {
    pub creates: AtomicUsize,
    pub subscribes: AtomicUsize,
    pub removals: AtomicUsize,
    pub acks: Mutex<Vec<(String, Option<Uuid>, AckType)>>,
}

pub struct RecordingClient {
    service_mrn: String,
    log: Arc<RemoteLog>,
}

#[async_trait]
impl SecomClient for RecordingClient {
    async fn subscribe(&self, _: &SubscriptionRequest) -> Result<SubscriptionResponseObject, ClientError> {
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.log.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(SubscriptionResponseObject {
            subscription_identifier: Some(Uuid::new_v4()),
            response_text: Some("Subscription successfully created".into()),
        })
    }

    async fn remove_subscription(&self, _: Uuid) -> Result<(), ClientError> {
        self.log.removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn acknowledge(&self, transaction_id: Option<Uuid>, ack_type: AckType) -> Result<(), ClientError> {
        self.log
            .acks
            .lock()
            .await
            .push((self.service_mrn.clone(), transaction_id, ack_type));
        Ok(())
    }
}

pub struct RecordingFactory(pub Arc<RemoteLog>);

impl SecomClientFactory for RecordingFactory {
    fn create(&self, subscription: &Subscription) -> Result<Arc<dyn SecomClient>, ClientError> {
        self.0.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingClient {
            service_mrn: subscription.service_mrn.clone(),
            log: self.0.clone(),
        }))
    }
}
