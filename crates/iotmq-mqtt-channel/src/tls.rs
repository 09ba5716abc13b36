//! TLS configuration for mTLS connections to AWS IoT Core.
//!
//! Loads X.509 device certificate, private key, and CA certificate
//! from PEM files and configures rumqttc's TLS transport. Failures are
//! reported as [`MqttError::Certificate`] since they rarely fix themselves
//! on retry.

use rumqttc::Transport;

use crate::config::TlsFiles;
use crate::error::{MqttError, MqttResult};

/// Build a TLS transport from certificate file paths.
///
/// Uses `TlsConfiguration::Simple` which reads PEM-encoded files:
/// - CA certificate (e.g., AmazonRootCA1.pem)
/// - Device certificate (X.509, issued by AWS IoT)
/// - Device private key
pub fn load_tls_transport(files: &TlsFiles) -> MqttResult<Transport> {
    let ca = read_pem(&files.ca_cert_path, "CA cert")?;
    let client_cert = read_pem(&files.client_cert_path, "client cert")?;
    let client_key = read_pem(&files.client_key_path, "client key")?;

    Ok(Transport::tls_with_config(
        rumqttc::TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((client_cert, client_key)),
        },
    ))
}

fn read_pem(path: &str, what: &str) -> MqttResult<Vec<u8>> {
    let bytes = std::fs::read(path)
        .map_err(|e| MqttError::Certificate(format!("failed to read {what} '{path}': {e}")))?;
    if bytes.is_empty() {
        return Err(MqttError::Certificate(format!("{what} '{path}' is empty")));
    }
    Ok(bytes)
}
