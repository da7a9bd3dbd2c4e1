use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RANDOM_STRING_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locations {
    pub primary: String,
    pub secondary: String,
}

impl Locations {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

/// Substitution parameters for one scenario run.
///
/// `random_integer` keeps container names globally unique, `random_string`
/// does the same for leaf names that only allow short lowercase values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestData {
    pub resource_type: String,
    pub resource_label: String,
    pub random_integer: i64,
    pub random_string: String,
    pub locations: Locations,
}

impl TestData {
    pub fn new(
        resource_type: impl Into<String>,
        resource_label: impl Into<String>,
        random_integer: i64,
        random_string: impl Into<String>,
        locations: Locations,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_label: resource_label.into(),
            random_integer,
            random_string: random_string.into(),
            locations,
        }
    }

    /// Derive the random values from a caller-supplied seed. The same seed
    /// always yields the same names.
    pub fn seeded(
        resource_type: impl Into<String>,
        resource_label: impl Into<String>,
        seed: Uuid,
        locations: Locations,
    ) -> Self {
        let bytes = seed.as_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        let random_integer = (u64::from_be_bytes(head) % 1_000_000_000_000) as i64;
        let random_string: String = bytes[8..8 + RANDOM_STRING_LEN]
            .iter()
            .map(|b| NAME_ALPHABET[*b as usize % NAME_ALPHABET.len()] as char)
            .collect();
        Self::new(resource_type, resource_label, random_integer, random_string, locations)
    }

    /// State address of the resource under test, e.g. `azurerm_storage_share.test`.
    pub fn resource_name(&self) -> String {
        format!("{}.{}", self.resource_type, self.resource_label)
    }
}
