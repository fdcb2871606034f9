use serde::{Deserialize, Serialize};

/// Where the broker lives and how to authenticate against it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Comma-separated `host:port` list.
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub security: SecurityConfig,
    // Never read from the config file, only from the environment.
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_client_id() -> String {
    "gateway".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: default_client_id(),
            security: SecurityConfig::default(),
            password: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(tag = "type", content = "config")]
pub enum SecurityConfig {
    #[default]
    Plaintext,
    Ssl {
        ca_location: Option<String>,
        certificate_location: Option<String>,
        key_location: Option<String>,
        key_password: Option<String>,
    },
    SaslSsl {
        mechanism: SaslMechanism,
        username: String,
        // Password comes from GATEWAY_SASL_PASSWORD
        ca_location: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain,
    ScramSha256,
    ScramSha512,
    Gssapi,
    OAuthBearer,
}

impl SaslMechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
            SaslMechanism::Gssapi => "GSSAPI",
            SaslMechanism::OAuthBearer => "OAUTHBEARER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sasl_security_parses_from_tagged_toml() {
        let cluster: ClusterConfig = toml::from_str(
            r#"
            brokers = "kafka-1:9093,kafka-2:9093"
            [security]
            type = "SaslSsl"
            config = { mechanism = "ScramSha512", username = "svc" }
            "#,
        )
        .unwrap();

        assert_eq!(cluster.client_id, "gateway");
        match cluster.security {
            SecurityConfig::SaslSsl {
                mechanism,
                username,
                ca_location,
            } => {
                assert_eq!(mechanism.as_str(), "SCRAM-SHA-512");
                assert_eq!(username, "svc");
                assert!(ca_location.is_none());
            }
            other => panic!("unexpected security config: {:?}", other),
        }
    }
}
