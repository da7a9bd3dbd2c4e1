use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::TestData;
use crate::error::FixtureError;
use crate::hcl::Document;
use crate::{key_vault_secret, storage_share};

/// Every scenario variant the generator knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    KeyVaultSecretBasic,
    KeyVaultSecretBasicClassic,
    KeyVaultSecretRequiresImport,
    KeyVaultSecretComplete,
    KeyVaultSecretBasicUpdated,
    StorageShareBasic,
    StorageShareRequiresImport,
    StorageShareMetadata,
    StorageShareMetadataUpdated,
    StorageShareAcl,
    StorageShareAclUpdated,
    StorageShareAclReplaced,
    StorageShareUpdateQuota,
}

impl TemplateId {
    pub const ALL: [TemplateId; 13] = [
        TemplateId::KeyVaultSecretBasic,
        TemplateId::KeyVaultSecretBasicClassic,
        TemplateId::KeyVaultSecretRequiresImport,
        TemplateId::KeyVaultSecretComplete,
        TemplateId::KeyVaultSecretBasicUpdated,
        TemplateId::StorageShareBasic,
        TemplateId::StorageShareRequiresImport,
        TemplateId::StorageShareMetadata,
        TemplateId::StorageShareMetadataUpdated,
        TemplateId::StorageShareAcl,
        TemplateId::StorageShareAclUpdated,
        TemplateId::StorageShareAclReplaced,
        TemplateId::StorageShareUpdateQuota,
    ];

    /// Resource type under test for this template's family.
    pub fn resource_type(&self) -> &'static str {
        match self.family() {
            "key_vault_secret" => key_vault_secret::RESOURCE_TYPE,
            _ => storage_share::RESOURCE_TYPE,
        }
    }

    pub fn family(&self) -> &'static str {
        self.parts().0
    }

    pub fn variant(&self) -> &'static str {
        self.parts().1
    }

    fn parts(&self) -> (&'static str, &'static str) {
        match self {
            TemplateId::KeyVaultSecretBasic => ("key_vault_secret", "basic"),
            TemplateId::KeyVaultSecretBasicClassic => ("key_vault_secret", "basic_classic"),
            TemplateId::KeyVaultSecretRequiresImport => ("key_vault_secret", "requires_import"),
            TemplateId::KeyVaultSecretComplete => ("key_vault_secret", "complete"),
            TemplateId::KeyVaultSecretBasicUpdated => ("key_vault_secret", "basic_updated"),
            TemplateId::StorageShareBasic => ("storage_share", "basic"),
            TemplateId::StorageShareRequiresImport => ("storage_share", "requires_import"),
            TemplateId::StorageShareMetadata => ("storage_share", "metadata"),
            TemplateId::StorageShareMetadataUpdated => ("storage_share", "metadata_updated"),
            TemplateId::StorageShareAcl => ("storage_share", "acl"),
            TemplateId::StorageShareAclUpdated => ("storage_share", "acl_updated"),
            TemplateId::StorageShareAclReplaced => ("storage_share", "acl_replaced"),
            TemplateId::StorageShareUpdateQuota => ("storage_share", "update_quota"),
        }
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (family, variant) = self.parts();
        write!(f, "{}/{}", family, variant)
    }
}

impl FromStr for TemplateId {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateId::ALL
            .iter()
            .copied()
            .find(|t| t.to_string() == s)
            .ok_or_else(|| FixtureError::UnknownTemplate(s.to_string()))
    }
}

/// A generated configuration: the structured document and its rendered text.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    template: TemplateId,
    document: Document,
    text: String,
}

impl Fixture {
    pub fn template(&self) -> TemplateId {
        self.template
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Produce the configuration for `template` with `data` substituted in.
pub fn generate(template: TemplateId, data: &TestData) -> Fixture {
    let document = match template {
        TemplateId::KeyVaultSecretBasic => key_vault_secret::basic(data),
        TemplateId::KeyVaultSecretBasicClassic => key_vault_secret::basic_classic(data),
        TemplateId::KeyVaultSecretRequiresImport => key_vault_secret::requires_import(data),
        TemplateId::KeyVaultSecretComplete => key_vault_secret::complete(data),
        TemplateId::KeyVaultSecretBasicUpdated => key_vault_secret::basic_updated(data),
        TemplateId::StorageShareBasic => storage_share::basic(data),
        TemplateId::StorageShareRequiresImport => storage_share::requires_import(data),
        TemplateId::StorageShareMetadata => storage_share::metadata(data),
        TemplateId::StorageShareMetadataUpdated => storage_share::metadata_updated(data),
        TemplateId::StorageShareAcl => storage_share::acl_single(data),
        TemplateId::StorageShareAclUpdated => storage_share::acl_updated(data),
        TemplateId::StorageShareAclReplaced => storage_share::acl_replaced(data),
        TemplateId::StorageShareUpdateQuota => storage_share::update_quota(data),
    };
    let text = document.render();
    Fixture {
        template,
        document,
        text,
    }
}
