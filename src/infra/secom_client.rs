//! HTTP client for remote SECOM services.
//!
//! Requests carry a signed envelope: the envelope is serialised to JSON, signed with the
//! gateway's SECOM key, and the hex signature sent alongside it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Identity, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::ports::{CertificateProvider, SecomClient, SecomClientFactory, SignatureProvider};
use crate::domain::secom::{
    EnvelopeAckObject, EnvelopeRemoveSubscriptionObject, EnvelopeSubscriptionObject,
    SignedEnvelope, SubscriptionResponseObject,
};
use crate::domain::{AckType, Subscription, SubscriptionRequest};
use crate::error::ClientError;
use crate::infra::keystore::Keystore;

pub struct HttpSecomClient {
    http: reqwest::Client,
    base_url: Url,
    signer: Arc<dyn SignatureProvider>,
    certificates: Arc<dyn CertificateProvider>,
}

impl HttpSecomClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        signer: Arc<dyn SignatureProvider>,
        certificates: Arc<dyn CertificateProvider>,
    ) -> Result<Self, ClientError> {
        // Url::join drops the last path segment unless the base ends in '/'.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|_| ClientError::InvalidUrl(base_url.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http,
            base_url,
            signer,
            certificates,
        })
    }

    fn sign<E: Serialize>(&self, envelope: E) -> Result<SignedEnvelope<E>, ClientError> {
        let canonical = serde_json::to_vec(&envelope)?;
        let signature = self.signer.sign(&canonical, self.signer.key_alias())?;
        Ok(SignedEnvelope {
            envelope,
            envelope_signature: hex::encode(signature),
        })
    }

    async fn exchange<E: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &SignedEnvelope<E>,
    ) -> Result<R, ClientError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|_| ClientError::InvalidUrl(format!("{}{path}", self.base_url)))?;
        debug!(%url, %method, "Calling SECOM service");

        let response = self.http.request(method, url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::from_slice(b"{}")?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl SecomClient for HttpSecomClient {
    async fn subscribe(&self, request: &SubscriptionRequest) -> Result<SubscriptionResponseObject, ClientError> {
        let body = self.sign(EnvelopeSubscriptionObject {
            container_type: request.container_type,
            data_product_type: request.data_product_type,
            data_reference: request.data_reference,
            stamp: self.certificates.envelope_stamp()?,
        })?;
        let response: SubscriptionResponseObject =
            self.exchange(Method::POST, "v1/subscription", &body).await?;
        info!(
            service = %self.base_url,
            subscription_id = ?response.subscription_identifier,
            "Subscribed to SECOM service"
        );
        Ok(response)
    }

    async fn remove_subscription(&self, subscription_id: Uuid) -> Result<(), ClientError> {
        let body = self.sign(EnvelopeRemoveSubscriptionObject {
            subscription_identifier: subscription_id,
            stamp: self.certificates.envelope_stamp()?,
        })?;
        let _: serde_json::Value = self.exchange(Method::DELETE, "v1/subscription", &body).await?;
        info!(service = %self.base_url, %subscription_id, "Removed SECOM subscription");
        Ok(())
    }

    async fn acknowledge(&self, transaction_id: Option<Uuid>, ack_type: AckType) -> Result<(), ClientError> {
        let body = self.sign(EnvelopeAckObject {
            created_at: Utc::now(),
            transaction_identifier: transaction_id,
            ack_type,
            stamp: self.certificates.envelope_stamp()?,
        })?;
        let _: serde_json::Value = self.exchange(Method::POST, "v1/acknowledgement", &body).await?;
        debug!(service = %self.base_url, transaction_id = ?transaction_id, "Acknowledgement delivered");
        Ok(())
    }
}

/// Builds mutual-TLS clients presenting the gateway's SECOM identity.
pub struct HttpSecomClientFactory {
    keystore: Arc<Keystore>,
    tls_alias: String,
    signer: Arc<dyn SignatureProvider>,
    certificates: Arc<dyn CertificateProvider>,
    timeout: Duration,
}

impl HttpSecomClientFactory {
    pub fn new(
        keystore: Arc<Keystore>,
        tls_alias: impl Into<String>,
        signer: Arc<dyn SignatureProvider>,
        certificates: Arc<dyn CertificateProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            keystore,
            tls_alias: tls_alias.into(),
            signer,
            certificates,
            timeout,
        }
    }
}

impl SecomClientFactory for HttpSecomClientFactory {
    fn create(&self, subscription: &Subscription) -> Result<Arc<dyn SecomClient>, ClientError> {
        let identity_pem = self.keystore.identity_pem(&self.tls_alias)?;
        let identity = Identity::from_pem(&identity_pem)?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .timeout(self.timeout)
            .build()?;

        let client = HttpSecomClient::new(
            http,
            &subscription.service_url,
            self.signer.clone(),
            self.certificates.clone(),
        )?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::secom::{AcknowledgementObject, RemoveSubscriptionObject, SubscriptionRequestObject};
    use crate::domain::{ContainerType, DataProductType};
    use crate::infra::certificate;
    use crate::infra::keystore::tests::write_identity;
    use crate::infra::signer::{KeystoreSigner, SignatureAlgorithm};
    use axum::extract::Json;
    use axum::routing::post;
    use axum::{Extension, Router};
    use std::net::TcpListener;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    type Captured = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    async fn record(
        Extension(captured): Extension<Captured>,
        method: Method,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        captured.lock().await.push((method.to_string(), body));
        Json(serde_json::json!({
            "subscriptionIdentifier": "5b2f3d84-8a4c-4ad6-9e8b-55d1c4f0c7aa",
            "responseText": "ok"
        }))
    }

    async fn fake_service() -> (String, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route("/api/v1/subscription", post(record).delete(record))
            .route("/api/v1/acknowledgement", post(record))
            .layer(Extension(captured.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(hyper::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));
        (format!("http://{addr}/api"), captured)
    }

    fn signer(dir: &TempDir) -> Arc<KeystoreSigner> {
        write_identity(dir.path(), "secom", None);
        let keystore = Arc::new(Keystore::new(dir.path(), None, None));
        Arc::new(KeystoreSigner::new(keystore, SignatureAlgorithm::Sha3_384WithEcdsa, "secom"))
    }

    fn client(base: &str, signer: Arc<KeystoreSigner>) -> HttpSecomClient {
        HttpSecomClient::new(reqwest::Client::new(), base, signer.clone(), signer).unwrap()
    }

    #[tokio::test]
    async fn subscribe_posts_a_verifiable_signed_envelope() {
        let dir = TempDir::new().unwrap();
        let signer = signer(&dir);
        let (base, captured) = fake_service().await;
        let client = client(&base, signer.clone());

        let response = client
            .subscribe(&SubscriptionRequest {
                container_type: Some(ContainerType::S100DataSet),
                data_product_type: Some(DataProductType::S124),
                data_reference: None,
            })
            .await
            .unwrap();
        assert_eq!(
            response.subscription_identifier,
            Some(Uuid::parse_str("5b2f3d84-8a4c-4ad6-9e8b-55d1c4f0c7aa").unwrap())
        );

        let captured = captured.lock().await;
        let (method, body) = &captured[0];
        assert_eq!(method, "POST");
        let request: SubscriptionRequestObject = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(request.envelope.data_product_type, Some(DataProductType::S124));

        let canonical = serde_json::to_vec(&request.envelope).unwrap();
        let signature = hex::decode(&request.envelope_signature).unwrap();
        let cert = certificate::certificate_der(
            request.envelope.stamp.envelope_signature_certificate.as_bytes(),
        )
        .unwrap();
        assert!(signer.verify(&canonical, &signature, &cert));
    }

    #[tokio::test]
    async fn remove_and_acknowledge_hit_their_endpoints() {
        let dir = TempDir::new().unwrap();
        let (base, captured) = fake_service().await;
        let client = client(&base, signer(&dir));

        let subscription_id = Uuid::new_v4();
        client.remove_subscription(subscription_id).await.unwrap();
        let transaction_id = Uuid::new_v4();
        client
            .acknowledge(Some(transaction_id), AckType::DeliveredAck)
            .await
            .unwrap();

        let captured = captured.lock().await;
        assert_eq!(captured[0].0, "DELETE");
        let removal: RemoveSubscriptionObject = serde_json::from_value(captured[0].1.clone()).unwrap();
        assert_eq!(removal.envelope.subscription_identifier, subscription_id);

        let ack: AcknowledgementObject = serde_json::from_value(captured[1].1.clone()).unwrap();
        assert_eq!(ack.envelope.ack_type, AckType::DeliveredAck);
        assert_eq!(ack.envelope.transaction_identifier, Some(transaction_id));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (base, _) = fake_service().await;
        let client = client(&format!("{base}/missing"), signer(&dir));

        let result = client.remove_subscription(Uuid::new_v4()).await;
        assert!(matches!(result, Err(ClientError::Rejected { status: 404, .. })));
    }

    #[test]
    fn invalid_service_url_is_refused() {
        let dir = TempDir::new().unwrap();
        let signer = signer(&dir);
        assert!(matches!(
            HttpSecomClient::new(reqwest::Client::new(), "not a url", signer.clone(), signer.clone()),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpSecomClient::new(reqwest::Client::new(), "ftp://files.example.org", signer.clone(), signer),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
