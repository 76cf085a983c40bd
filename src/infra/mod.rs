// Adapters behind the application ports
pub mod certificate;
pub mod keystore;
pub mod secom_client;
pub mod signer;
pub mod subscription_store;
pub mod ws_dialer;
