use std::time::Duration;

use rumqttc::{MqttOptions, QoS, TlsConfiguration, Transport};

use crate::config::MqttConfig;
use crate::error::{Error, Result};

/// Map a numeric QoS level to the MQTT enum.
pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(Error::Mqtt(format!(
            "Invalid QoS level {}. Expected 0, 1 or 2",
            other
        ))),
    }
}

/// Build MQTT client options from the broker configuration.
///
/// The transport is TLS whenever a CA certificate is configured, plain TCP
/// otherwise.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions> {
    let mut options = MqttOptions::new(&config.client_id, &config.hostname, config.port);
    options
        .set_keep_alive(Duration::from_secs(config.keep_alive_secs))
        .set_clean_session(true);

    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }

    if let Some(cert) = &config.cert {
        let ca = std::fs::read(cert).map_err(|e| {
            Error::Mqtt(format!(
                "Failed to read CA certificate '{}': {}",
                cert.display(),
                e
            ))
        })?;

        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
    }

    tracing::info!(
        host = %config.hostname,
        port = config.port,
        tls = config.uses_tls(),
        client_id = %config.client_id,
        "Prepared MQTT session options"
    );

    Ok(options)
}
