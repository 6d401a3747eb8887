/*!
 * Protocol definitions for LabFlow.
 *
 * A protocol handler is a pure byte-level codec for one instrument family.
 * It never performs I/O. Every handler can build an identification probe and
 * judge the reply; command encoders and decoders live on the concrete types.
 */
use std::fmt::Debug;
use std::sync::Arc;

use crate::device::DeviceType;
use crate::protocols::{DensitometerProtocol, PumpProtocol};

/// A fixed-length command frame
pub type CommandFrame = [u8; 5];

/// The capability set shared by every protocol handler
///
/// Identification assumes reply spaces are disjoint across families. When two
/// handlers could accept the same bytes, the one registered first wins.
pub trait ProtocolHandler: Send + Sync + Debug {
    /// Get the protocol name
    fn name(&self) -> &'static str;

    /// The instrument family this protocol identifies
    fn device_type(&self) -> DeviceType;

    /// The frame sent to ask "are you one of mine?"
    fn identification_probe(&self) -> &'static [u8];

    /// Exact byte count of the identification reply
    fn identification_response_size(&self) -> usize;

    /// Whether `data` is this family's identification reply
    fn parse_identification_response(&self, data: &[u8]) -> bool;
}

/// Ordered list of known protocols
///
/// Discovery tries handlers in registration order, so the order is part of
/// the contract.
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    handlers: Vec<Arc<dyn ProtocolHandler>>,
}

impl ProtocolRegistry {
    /// Create an empty protocol registry
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// The built-in protocols in priority order: pump, then densitometer
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PumpProtocol);
        registry.register(DensitometerProtocol);
        registry
    }

    /// Append a handler at the lowest priority
    pub fn register<P: ProtocolHandler + 'static>(&mut self, handler: P) {
        self.handlers.push(Arc::new(handler));
    }

    /// Handlers in priority order
    pub fn handlers(&self) -> &[Arc<dyn ProtocolHandler>] {
        &self.handlers
    }

    /// The first handler for a device type
    pub fn for_device_type(&self, device_type: DeviceType) -> Option<&Arc<dyn ProtocolHandler>> {
        self.handlers
            .iter()
            .find(|handler| handler.device_type() == device_type)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_order() {
        let registry = ProtocolRegistry::with_defaults();
        let order: Vec<DeviceType> = registry
            .handlers()
            .iter()
            .map(|h| h.device_type())
            .collect();
        assert_eq!(order, vec![DeviceType::Pump, DeviceType::Densitometer]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lookup_by_device_type() {
        let registry = ProtocolRegistry::with_defaults();
        let handler = registry.for_device_type(DeviceType::Densitometer).unwrap();
        assert_eq!(handler.name(), "densitometer");

        assert!(ProtocolRegistry::new()
            .for_device_type(DeviceType::Pump)
            .is_none());
    }

    #[test]
    fn test_identification_frames_are_disjoint() {
        let registry = ProtocolRegistry::with_defaults();
        for handler in registry.handlers() {
            for other in registry.handlers() {
                if handler.name() == other.name() {
                    continue;
                }
                let size = other.identification_response_size();
                let reply: Vec<u8> = match other.device_type() {
                    DeviceType::Pump => PumpProtocol::IDENTIFICATION_RESPONSE.to_vec(),
                    DeviceType::Densitometer => {
                        DensitometerProtocol::IDENTIFICATION_RESPONSE.to_vec()
                    }
                };
                assert_eq!(reply.len(), size);
                assert!(!handler.parse_identification_response(&reply));
            }
        }
    }
}
