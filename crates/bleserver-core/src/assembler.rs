//! Assembly of logical requests from independent characteristic writes
//!
//! A voice-call request is complete as soon as its number is written. A
//! message request needs both the destination number and the body; the two
//! writes may arrive in either order and are correlated per connected device.
//! Once a request completes, the partial state for that device is cleared so a
//! later lone write cannot complete against a stale partner value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{
    CALL_NUMBER_CHARACTERISTIC_UUID, MESSAGE_NUMBER_CHARACTERISTIC_UUID,
    MESSAGE_SERVICE_UUID, MESSAGE_TEXT_CHARACTERISTIC_UUID, VOICE_CALL_SERVICE_UUID,
};
use crate::types::DeviceAddress;

// ----------------------------------------------------------------------------
// Assembled Requests
// ----------------------------------------------------------------------------

/// A complete logical request ready for dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssembledRequest {
    Call { number: String },
    Message { number: String, text: String },
}

/// Message fields received so far from one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingMessage {
    pub number: Option<String>,
    pub text: Option<String>,
}

impl PendingMessage {
    fn is_empty(&self) -> bool {
        self.number.is_none() && self.text.is_none()
    }

    fn take_complete(&mut self) -> Option<AssembledRequest> {
        if self.number.is_some() && self.text.is_some() {
            let number = self.number.take()?;
            let text = self.text.take()?;
            Some(AssembledRequest::Message { number, text })
        } else {
            None
        }
    }
}

/// Empty payloads count as "not written"
fn non_empty(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(payload).into_owned())
    }
}

// ----------------------------------------------------------------------------
// Request Assembler
// ----------------------------------------------------------------------------

/// Per-device accumulator of partial requests
#[derive(Debug, Default)]
pub struct RequestAssembler {
    pending: HashMap<DeviceAddress, PendingMessage>,
}

impl RequestAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one characteristic write; returns a request once it is complete
    pub fn on_write(
        &mut self,
        device: &DeviceAddress,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Option<AssembledRequest> {
        if service == VOICE_CALL_SERVICE_UUID && characteristic == CALL_NUMBER_CHARACTERISTIC_UUID {
            return match non_empty(payload) {
                Some(number) => Some(AssembledRequest::Call { number }),
                None => {
                    debug!("Ignoring empty call number from {}", device);
                    None
                }
            };
        }

        if service != MESSAGE_SERVICE_UUID {
            return None;
        }
        let is_number = characteristic == MESSAGE_NUMBER_CHARACTERISTIC_UUID;
        if !is_number && characteristic != MESSAGE_TEXT_CHARACTERISTIC_UUID {
            return None;
        }

        let value = non_empty(payload);
        let pending = self.pending.entry(device.clone()).or_default();
        if is_number {
            pending.number = value;
        } else {
            pending.text = value;
        }

        let completed = pending.take_complete();
        if pending.is_empty() {
            self.pending.remove(device);
        }
        completed
    }

    /// Drop any partially assembled request from `device`
    pub fn reset(&mut self, device: &DeviceAddress) -> bool {
        let dropped = self.pending.remove(device);
        if let Some(ref partial) = dropped {
            debug!(
                "Discarding partial message from {} (number: {}, text: {})",
                device,
                partial.number.is_some(),
                partial.text.is_some()
            );
        }
        dropped.is_some()
    }

    /// Drop all partial state
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self, device: &DeviceAddress) -> Option<&PendingMessage> {
        self.pending.get(device)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceAddress {
        DeviceAddress::new("AA:BB:CC:DD:EE:FF")
    }

    fn write_number(asm: &mut RequestAssembler, value: &str) -> Option<AssembledRequest> {
        asm.on_write(
            &device(),
            MESSAGE_SERVICE_UUID,
            MESSAGE_NUMBER_CHARACTERISTIC_UUID,
            value.as_bytes(),
        )
    }

    fn write_text(asm: &mut RequestAssembler, value: &str) -> Option<AssembledRequest> {
        asm.on_write(
            &device(),
            MESSAGE_SERVICE_UUID,
            MESSAGE_TEXT_CHARACTERISTIC_UUID,
            value.as_bytes(),
        )
    }

    #[test]
    fn test_call_completes_immediately() {
        let mut asm = RequestAssembler::new();
        let request = asm.on_write(
            &device(),
            VOICE_CALL_SERVICE_UUID,
            CALL_NUMBER_CHARACTERISTIC_UUID,
            b"911",
        );
        assert_eq!(
            request,
            Some(AssembledRequest::Call {
                number: "911".into()
            })
        );
        assert_eq!(asm.pending_count(), 0);
    }

    #[test]
    fn test_empty_call_number_ignored() {
        let mut asm = RequestAssembler::new();
        let request = asm.on_write(
            &device(),
            VOICE_CALL_SERVICE_UUID,
            CALL_NUMBER_CHARACTERISTIC_UUID,
            b"",
        );
        assert_eq!(request, None);
    }

    #[test]
    fn test_message_needs_both_fields() {
        let mut asm = RequestAssembler::new();
        assert_eq!(write_number(&mut asm, "+15551234567"), None);
        assert_eq!(
            asm.pending(&device()).and_then(|p| p.number.as_deref()),
            Some("+15551234567")
        );
        assert_eq!(
            write_text(&mut asm, "hello"),
            Some(AssembledRequest::Message {
                number: "+15551234567".into(),
                text: "hello".into(),
            })
        );
        assert_eq!(asm.pending_count(), 0);
    }

    #[test]
    fn test_completion_clears_partner_field() {
        let mut asm = RequestAssembler::new();
        write_number(&mut asm, "+15551234567");
        assert!(write_text(&mut asm, "hello").is_some());

        // A lone text write starts a new cycle rather than reusing the old number
        assert_eq!(write_text(&mut asm, "world"), None);
        assert_eq!(
            write_number(&mut asm, "+15550000000"),
            Some(AssembledRequest::Message {
                number: "+15550000000".into(),
                text: "world".into(),
            })
        );
    }

    #[test]
    fn test_later_write_overwrites_field() {
        let mut asm = RequestAssembler::new();
        write_text(&mut asm, "first");
        write_text(&mut asm, "second");
        assert_eq!(
            write_number(&mut asm, "42"),
            Some(AssembledRequest::Message {
                number: "42".into(),
                text: "second".into(),
            })
        );
    }

    #[test]
    fn test_empty_write_clears_field() {
        let mut asm = RequestAssembler::new();
        write_number(&mut asm, "42");
        write_number(&mut asm, "");
        assert_eq!(asm.pending_count(), 0);
        assert_eq!(write_text(&mut asm, "hi"), None);
    }

    #[test]
    fn test_devices_do_not_share_state() {
        let mut asm = RequestAssembler::new();
        let other = DeviceAddress::new("11:22:33:44:55:66");
        write_number(&mut asm, "42");
        let request = asm.on_write(
            &other,
            MESSAGE_SERVICE_UUID,
            MESSAGE_TEXT_CHARACTERISTIC_UUID,
            b"hi",
        );
        assert_eq!(request, None);
        assert_eq!(asm.pending_count(), 2);
    }

    #[test]
    fn test_reset_discards_partial_state() {
        let mut asm = RequestAssembler::new();
        write_number(&mut asm, "42");
        assert!(asm.reset(&device()));
        assert!(!asm.reset(&device()));
        assert_eq!(write_text(&mut asm, "hi"), None);
    }

    #[test]
    fn test_unknown_characteristic_is_ignored() {
        let mut asm = RequestAssembler::new();
        let request = asm.on_write(
            &device(),
            MESSAGE_SERVICE_UUID,
            CALL_NUMBER_CHARACTERISTIC_UUID,
            b"42",
        );
        assert_eq!(request, None);
        assert_eq!(asm.pending_count(), 0);
    }
}
