use super::{EmitFlags, EndpointOption, EndpointOptions, FramePublisher, TransportError};
use zenoh::bytes::Encoding;
use zenoh::pubsub::Publisher;
use zenoh::qos::{CongestionControl, Priority};
use zenoh::Wait;

/// Zenoh caps each per-priority transmission queue at this many batches
const MAX_QUEUE_SIZE: usize = 16;

/// Publishing endpoint backed by a zenoh peer session.
///
/// The session listens on `tcp/0.0.0.0:<port>`; subscribers connect to it
/// directly. Scouting is disabled so the endpoint never dials out on its own.
pub struct ZenohEndpoint {
    port: u16,
    key_expr: String,
    options: EndpointOptions,
    session: zenoh::Session,
    publisher: Option<Publisher<'static>>,
}

impl ZenohEndpoint {
    /// Bind a publisher for `key_expr` on the given TCP port.
    ///
    /// Failing to open the session (port in use, invalid locator) is fatal:
    /// no endpoint is returned.
    pub fn bind(
        port: u16,
        key_expr: impl Into<String>,
        options: &EndpointOptions,
    ) -> Result<Self, TransportError> {
        let key_expr = key_expr.into();
        let bind_err = |reason: String| TransportError::Bind { port, reason };

        let mut config = zenoh::Config::default();
        config
            .insert_json5("mode", r#""peer""#)
            .map_err(|e| bind_err(format!("Failed to set Zenoh mode: {}", e)))?;
        config
            .insert_json5("listen/endpoints", &format!(r#"["tcp/0.0.0.0:{}"]"#, port))
            .map_err(|e| bind_err(format!("Failed to set listen endpoint: {}", e)))?;
        config
            .insert_json5("scouting/multicast/enabled", "false")
            .map_err(|e| bind_err(format!("Failed to disable multicast: {}", e)))?;
        config
            .insert_json5("scouting/gossip/enabled", "false")
            .map_err(|e| bind_err(format!("Failed to disable gossip: {}", e)))?;
        apply_session_tuning(&mut config, options);

        let session = zenoh::open(config)
            .wait()
            .map_err(|e| bind_err(format!("Failed to open Zenoh session: {}", e)))?;

        let publisher = declare_publisher(&session, &key_expr, options)
            .map_err(|e| bind_err(e.to_string()))?;

        log::info!(
            "Publishing '{}' on tcp/0.0.0.0:{} (conflate={}, immediate={}, hwm={})",
            key_expr,
            port,
            options.conflate,
            options.immediate,
            options.send_hwm
        );

        Ok(Self {
            port,
            key_expr,
            options: options.clone(),
            session,
            publisher: Some(publisher),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn key_expr(&self) -> &str {
        &self.key_expr
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }
}

/// Session-wide tuning. The delivery policy does not depend on these keys,
/// so a value the transport rejects is reported and ignored.
fn apply_session_tuning(config: &mut zenoh::Config, options: &EndpointOptions) {
    let queue_size = options.send_hwm.clamp(1, MAX_QUEUE_SIZE);
    if let Err(e) = config.insert_json5(
        "transport/link/tx/queue/size/data",
        &queue_size.to_string(),
    ) {
        log::warn!("Ignoring send high-water-mark {}: {}", options.send_hwm, e);
    }

    if let Some(bytes) = options.send_buffer {
        if let Err(e) = config.insert_json5("transport/link/tcp/so_sndbuf", &bytes.to_string()) {
            log::warn!("Ignoring send buffer size {}: {}", bytes, e);
        }
    }
}

fn declare_publisher(
    session: &zenoh::Session,
    key_expr: &str,
    options: &EndpointOptions,
) -> Result<Publisher<'static>, TransportError> {
    let congestion_control = if options.conflate {
        CongestionControl::Drop
    } else {
        CongestionControl::Block
    };

    session
        .declare_publisher(key_expr.to_string())
        .congestion_control(congestion_control)
        .priority(Priority::Data)
        .express(options.immediate)
        .wait()
        .map_err(|e| TransportError::Zenoh(format!("Failed to declare publisher: {}", e)))
}

impl FramePublisher for ZenohEndpoint {
    fn configure(&mut self, option: EndpointOption) -> Result<(), TransportError> {
        match option {
            // Link-level settings are fixed once the session is open
            EndpointOption::SendHighWaterMark(_) | EndpointOption::SendBuffer(_) => {
                Err(TransportError::RequiresRebind(option))
            }
            EndpointOption::Conflate(_) | EndpointOption::Immediate(_) => {
                if self.publisher.is_none() {
                    return Err(TransportError::Closed);
                }
                let mut options = self.options.clone();
                options.apply(option);

                // The current publisher stays live unless its replacement exists
                let replacement = declare_publisher(&self.session, &self.key_expr, &options)?;
                if let Some(old) = self.publisher.replace(replacement) {
                    if let Err(e) = old.undeclare().wait() {
                        log::warn!("[{}] Failed to undeclare publisher: {}", self.key_expr, e);
                    }
                }
                self.options = options;
                log::debug!("[{}] Reconfigured publisher: {:?}", self.key_expr, option);
                Ok(())
            }
        }
    }

    fn emit(&mut self, payload: Vec<u8>, flags: EmitFlags) -> Result<(), TransportError> {
        let publisher = self.publisher.as_ref().ok_or(TransportError::Closed)?;

        let encoding = flags
            .content_type
            .map(Encoding::from)
            .unwrap_or(Encoding::ZENOH_BYTES);
        let put = publisher.put(payload).encoding(encoding);
        let result = match flags.sequence {
            Some(sequence) => put.attachment(sequence.to_le_bytes().to_vec()).wait(),
            None => put.wait(),
        };

        result.map_err(|e| TransportError::Zenoh(e.to_string()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let Some(publisher) = self.publisher.take() else {
            return Ok(());
        };

        if let Err(e) = publisher.undeclare().wait() {
            log::warn!("[{}] Failed to undeclare publisher: {}", self.key_expr, e);
        }
        self.session
            .close()
            .wait()
            .map_err(|e| TransportError::Zenoh(format!("Failed to close session: {}", e)))?;

        log::info!("Closed endpoint tcp/0.0.0.0:{}", self.port);
        Ok(())
    }
}

impl Drop for ZenohEndpoint {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_redeclares_publisher() {
        let mut endpoint =
            ZenohEndpoint::bind(47521, "camera/reconfigure", &EndpointOptions::default()).unwrap();
        assert_eq!(endpoint.port(), 47521);
        assert_eq!(endpoint.key_expr(), "camera/reconfigure");

        endpoint.configure(EndpointOption::Conflate(false)).unwrap();
        endpoint.configure(EndpointOption::Immediate(false)).unwrap();
        assert!(!endpoint.options().conflate);
        assert!(!endpoint.options().immediate);

        // Still publishing after the swap
        endpoint.emit(vec![1, 2, 3], EmitFlags::default()).unwrap();
    }

    #[test]
    fn test_link_options_require_rebind() {
        let mut endpoint =
            ZenohEndpoint::bind(47522, "camera/rebind", &EndpointOptions::default()).unwrap();
        assert!(matches!(
            endpoint.configure(EndpointOption::SendBuffer(4096)),
            Err(TransportError::RequiresRebind(EndpointOption::SendBuffer(4096)))
        ));
        assert_eq!(endpoint.options().send_buffer, None);
        endpoint.emit(vec![0], EmitFlags::default()).unwrap();
    }

    #[test]
    fn test_closed_endpoint_rejects_configure_and_emit() {
        let mut endpoint =
            ZenohEndpoint::bind(47523, "camera/closed", &EndpointOptions::default()).unwrap();
        endpoint.close().unwrap();
        endpoint.close().unwrap();

        assert!(matches!(
            endpoint.configure(EndpointOption::Conflate(false)),
            Err(TransportError::Closed)
        ));
        assert!(endpoint.options().conflate);
        assert!(matches!(
            endpoint.emit(vec![0], EmitFlags::default()),
            Err(TransportError::Closed)
        ));
    }
}
