use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use super::error::ClusterError;

/// TLS settings forwarded verbatim to the transport-security collaborator.
///
/// The coordinator never inspects these beyond checking that an enabled
/// record is complete.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TransportSecurityConfig {
    /// Enables TLS between members.
    pub enabled: bool,
    /// Keystore holding the member certificate.
    pub keystore_path: PathBuf,
    /// Keystore password.
    #[serde(deserialize_with = "deserialize_secret")]
    pub keystore_password: Option<SecretString>,
    /// Key/trust manager algorithm.
    pub algorithm: String,
    /// TLS protocol version label.
    pub protocol: String,
    /// Name of the context factory the transport layer should use.
    pub context_factory: String,
}

impl Default for TransportSecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keystore_path: PathBuf::from("keystore.jks"),
            keystore_password: None,
            algorithm: "SunX509".to_string(),
            protocol: "TLS".to_string(),
            context_factory: "basic".to_string(),
        }
    }
}

impl TransportSecurityConfig {
    pub(crate) fn validate(&self) -> Result<(), ClusterError> {
        if !self.enabled {
            return Ok(());
        }
        if self.keystore_path.as_os_str().is_empty() {
            return Err(ClusterError::config(
                "transport_security.keystore_path is required when TLS is enabled",
            ));
        }
        if self.keystore_password.is_none() {
            return Err(ClusterError::config(
                "transport_security.keystore_password is required when TLS is enabled",
            ));
        }
        Ok(())
    }

    /// Keystore location handed to the TLS layer.
    #[must_use]
    pub fn keystore_path(&self) -> &Path {
        &self.keystore_path
    }
}

/// Symmetric cipher settings forwarded verbatim to the encryption collaborator.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SymmetricEncryptionConfig {
    /// Enables symmetric encryption of member traffic.
    pub enabled: bool,
    /// Cipher algorithm name.
    pub algorithm: String,
    /// Shared key material.
    #[serde(deserialize_with = "deserialize_secret")]
    pub key: Option<SecretString>,
    /// Salt used when deriving the secret key.
    pub salt: Option<String>,
    /// Pass phrase used when deriving the secret key.
    #[serde(deserialize_with = "deserialize_secret")]
    pub passphrase: Option<SecretString>,
    /// Key-derivation iteration count.
    pub iteration_count: u32,
}

impl Default for SymmetricEncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: "PBEWithMD5AndDES".to_string(),
            key: None,
            salt: None,
            passphrase: None,
            iteration_count: 19,
        }
    }
}

impl SymmetricEncryptionConfig {
    pub(crate) fn validate(&self) -> Result<(), ClusterError> {
        if !self.enabled {
            return Ok(());
        }
        if self.algorithm.trim().is_empty() {
            return Err(ClusterError::config(
                "symmetric_encryption.algorithm must not be empty",
            ));
        }
        if self.salt.as_deref().is_none_or(str::is_empty) {
            return Err(ClusterError::config(
                "symmetric_encryption.salt is required when encryption is enabled",
            ));
        }
        if self.passphrase.is_none() {
            return Err(ClusterError::config(
                "symmetric_encryption.passphrase is required when encryption is enabled",
            ));
        }
        if self.iteration_count == 0 {
            return Err(ClusterError::config(
                "symmetric_encryption.iteration_count must be at least 1",
            ));
        }
        Ok(())
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|secret| SecretString::new(secret.into())))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config: TransportSecurityConfig = toml::from_str(
            r#"
            enabled = true
            keystore_password = "hunter2"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert_eq!(
            config.keystore_password.as_ref().unwrap().expose_secret(),
            "hunter2"
        );
    }

    #[test]
    fn enabled_tls_needs_a_password() {
        let config = TransportSecurityConfig {
            enabled: true,
            ..TransportSecurityConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_encryption_needs_salt_and_passphrase() {
        let mut config = SymmetricEncryptionConfig {
            enabled: true,
            passphrase: Some(SecretString::new("open-sesame".to_string().into())),
            ..SymmetricEncryptionConfig::default()
        };
        assert!(config.validate().is_err());
        config.salt = Some("pepper".to_string());
        assert!(config.validate().is_ok());
    }
}
