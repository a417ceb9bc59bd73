//! Static description of the GATT services exposed by the peripheral
//!
//! Two primary services are published, in this order:
//!
//! - Voice call service with a single read/write `call number` characteristic
//! - Message service with read/write `message number` and `message text`
//!   characteristics

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Service UUID carried in the advertising payload
pub const ADVERTISED_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000B81D_0000_1000_8000_00805F9B34FB);

/// Voice call service
pub const VOICE_CALL_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFE0_0000_1000_8000_00805F9B34FB);

/// Destination number for a voice call
pub const CALL_NUMBER_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000FFE1_0000_1000_8000_00805F9B34FB);

/// Short message service
pub const MESSAGE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFD0_0000_1000_8000_00805F9B34FB);

/// Destination number for a short message
pub const MESSAGE_NUMBER_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000FFD1_0000_1000_8000_00805F9B34FB);

/// Body of a short message
pub const MESSAGE_TEXT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000FFD2_0000_1000_8000_00805F9B34FB);

/// Characteristic User Description descriptor
pub const USER_DESCRIPTION_DESCRIPTOR_UUID: Uuid =
    Uuid::from_u128(0x00002901_0000_1000_8000_00805F9B34FB);

/// Bluetooth base UUID; UUIDs differing only in bits 96..128 have a 16-bit alias
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;

/// Returns the 16-bit alias of `uuid` if it lies on the Bluetooth base UUID
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let alias = value >> 96;
    if alias <= u16::MAX as u128 && value & !(0xFFFF_FFFF_u128 << 96) == BLUETOOTH_BASE_UUID {
        Some(alias as u16)
    } else {
        None
    }
}

// ----------------------------------------------------------------------------
// Properties and Permissions
// ----------------------------------------------------------------------------

/// Operations a characteristic supports (ATT property bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Access permissions required on an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributePermissions(u16);

impl AttributePermissions {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x10);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AttributePermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ----------------------------------------------------------------------------
// Descriptors
// ----------------------------------------------------------------------------

/// Kind of a GATT service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    Primary,
    Secondary,
}

/// Attribute descriptor attached to a characteristic, with its initial value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub uuid: Uuid,
    pub value: String,
}

/// Immutable description of a characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: AttributePermissions,
    pub descriptors: Vec<AttributeDescriptor>,
}

impl CharacteristicDescriptor {
    /// Characteristic that can be read and written by the central, labelled
    /// with a user description
    pub fn read_write(uuid: Uuid, description: &str) -> Self {
        Self {
            uuid,
            properties: CharacteristicProperties::READ | CharacteristicProperties::WRITE,
            permissions: AttributePermissions::READ | AttributePermissions::WRITE,
            descriptors: vec![AttributeDescriptor {
                uuid: USER_DESCRIPTION_DESCRIPTOR_UUID,
                value: description.to_string(),
            }],
        }
    }
}

/// Immutable description of a service and its ordered characteristics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub kind: ServiceKind,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    pub fn primary(uuid: Uuid, characteristics: Vec<CharacteristicDescriptor>) -> Self {
        Self {
            uuid,
            kind: ServiceKind::Primary,
            characteristics,
        }
    }
}

/// Address of a characteristic within its owning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

pub const CALL_NUMBER: CharacteristicRef =
    CharacteristicRef::new(VOICE_CALL_SERVICE_UUID, CALL_NUMBER_CHARACTERISTIC_UUID);
pub const MESSAGE_NUMBER: CharacteristicRef =
    CharacteristicRef::new(MESSAGE_SERVICE_UUID, MESSAGE_NUMBER_CHARACTERISTIC_UUID);
pub const MESSAGE_TEXT: CharacteristicRef =
    CharacteristicRef::new(MESSAGE_SERVICE_UUID, MESSAGE_TEXT_CHARACTERISTIC_UUID);

// ----------------------------------------------------------------------------
// Catalog
// ----------------------------------------------------------------------------

/// Describe the services to register, in registration order
pub fn describe_services() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor::primary(
            VOICE_CALL_SERVICE_UUID,
            vec![CharacteristicDescriptor::read_write(
                CALL_NUMBER_CHARACTERISTIC_UUID,
                "Call number",
            )],
        ),
        ServiceDescriptor::primary(
            MESSAGE_SERVICE_UUID,
            vec![
                CharacteristicDescriptor::read_write(
                    MESSAGE_NUMBER_CHARACTERISTIC_UUID,
                    "Message number",
                ),
                CharacteristicDescriptor::read_write(MESSAGE_TEXT_CHARACTERISTIC_UUID, "Message text"),
            ],
        ),
    ]
}

/// Every descriptor of the catalog with its initial value
pub fn descriptor_refs() -> impl Iterator<Item = (CharacteristicRef, AttributeDescriptor)> {
    describe_services().into_iter().flat_map(|service| {
        let service_uuid = service.uuid;
        service.characteristics.into_iter().flat_map(move |c| {
            let characteristic = CharacteristicRef::new(service_uuid, c.uuid);
            c.descriptors
                .into_iter()
                .map(move |descriptor| (characteristic, descriptor))
        })
    })
}

/// Every characteristic of the catalog, addressed by service
pub fn characteristic_refs() -> impl Iterator<Item = CharacteristicRef> {
    describe_services().into_iter().flat_map(|service| {
        let service_uuid = service.uuid;
        service
            .characteristics
            .into_iter()
            .map(move |c| CharacteristicRef::new(service_uuid, c.uuid))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order_and_shape() {
        let services = describe_services();
        assert_eq!(services.len(), 2);

        assert_eq!(services[0].uuid, VOICE_CALL_SERVICE_UUID);
        assert_eq!(services[0].kind, ServiceKind::Primary);
        let call: Vec<_> = services[0].characteristics.iter().map(|c| c.uuid).collect();
        assert_eq!(call, vec![CALL_NUMBER_CHARACTERISTIC_UUID]);

        assert_eq!(services[1].uuid, MESSAGE_SERVICE_UUID);
        let message: Vec<_> = services[1].characteristics.iter().map(|c| c.uuid).collect();
        assert_eq!(
            message,
            vec![
                MESSAGE_NUMBER_CHARACTERISTIC_UUID,
                MESSAGE_TEXT_CHARACTERISTIC_UUID
            ]
        );
    }

    #[test]
    fn test_catalog_is_deterministic() {
        assert_eq!(describe_services(), describe_services());
    }

    #[test]
    fn test_characteristics_are_read_write() {
        for service in describe_services() {
            for c in &service.characteristics {
                assert!(c.properties.contains(CharacteristicProperties::READ));
                assert!(c.properties.contains(CharacteristicProperties::WRITE));
                assert!(!c.properties.contains(CharacteristicProperties::NOTIFY));
                assert!(c.permissions.contains(AttributePermissions::READ));
                assert!(c.permissions.contains(AttributePermissions::WRITE));
            }
        }
    }

    #[test]
    fn test_short_uuid_alias() {
        assert_eq!(short_uuid(&ADVERTISED_SERVICE_UUID), Some(0xB81D));
        assert_eq!(short_uuid(&CALL_NUMBER_CHARACTERISTIC_UUID), Some(0xFFE1));
        let custom = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
        assert_eq!(short_uuid(&custom), None);
    }

    #[test]
    fn test_every_characteristic_has_a_user_description() {
        let labels: Vec<_> = descriptor_refs()
            .map(|(characteristic, descriptor)| {
                assert_eq!(descriptor.uuid, USER_DESCRIPTION_DESCRIPTOR_UUID);
                (characteristic, descriptor.value)
            })
            .collect();
        assert_eq!(
            labels,
            vec![
                (CALL_NUMBER, "Call number".to_string()),
                (MESSAGE_NUMBER, "Message number".to_string()),
                (MESSAGE_TEXT, "Message text".to_string()),
            ]
        );
    }

    #[test]
    fn test_characteristic_refs_cover_catalog() {
        let refs: Vec<_> = characteristic_refs().collect();
        assert_eq!(refs, vec![CALL_NUMBER, MESSAGE_NUMBER, MESSAGE_TEXT]);
    }
}
