//! In-memory keystore
//!
//! Arena of consumers, resource data groups and resource data. Groups and
//! access rights refer to other records by index, so the keystore owns every
//! record and no record owns another.

use super::secure_content::{
    AccessRight, CEKParams, Compression, Consumer, EncryptionAlgorithm, KEKParams, ResourceData,
    ResourceDataGroup,
};
use crate::crypto::random_bytes;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Keystore of a secure 3MF package
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    uuid: String,
    consumers: Vec<Consumer>,
    groups: Vec<ResourceDataGroup>,
    resources: Vec<ResourceData>,
    // Keyed by part name without the leading '/'
    path_index: HashMap<String, usize>,
}

/// Normalize a part path to the form used as index key
fn path_key(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

impl KeyStore {
    /// Create an empty keystore with a random UUID
    pub fn new() -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    /// A keystore without resource data produces no manifest on save
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Keystore UUID
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Replace the keystore UUID
    pub fn set_uuid(&mut self, uuid: impl Into<String>) {
        self.uuid = uuid.into();
    }

    /// Register a consumer, returning its index
    pub fn add_consumer(&mut self, consumer: Consumer) -> Result<usize> {
        if self.find_consumer_index(&consumer.consumer_id).is_some() {
            return Err(Error::DuplicateResource(format!(
                "consumer '{}'",
                consumer.consumer_id
            )));
        }
        self.consumers.push(consumer);
        Ok(self.consumers.len() - 1)
    }

    /// Find a consumer by its identifier
    pub fn find_consumer(&self, consumer_id: &str) -> Option<&Consumer> {
        self.consumers.iter().find(|c| c.consumer_id == consumer_id)
    }

    /// Index of a consumer, as referenced by `accessright/@consumerindex`
    pub fn find_consumer_index(&self, consumer_id: &str) -> Option<usize> {
        self.consumers
            .iter()
            .position(|c| c.consumer_id == consumer_id)
    }

    /// Consumer at `index`
    pub fn consumer(&self, index: usize) -> Option<&Consumer> {
        self.consumers.get(index)
    }

    /// All consumers in manifest order
    pub fn consumers(&self) -> &[Consumer] {
        &self.consumers
    }

    /// Create a group with a freshly generated content key
    ///
    /// The group is open: its access rights get wrapped and its members get
    /// new IVs on the next save.
    pub fn add_resource_data_group(&mut self) -> usize {
        let key = random_bytes(EncryptionAlgorithm::Aes256Gcm.key_size());
        self.add_resource_data_group_with_key(uuid::Uuid::new_v4().to_string(), key)
    }

    /// Create an open group with a caller supplied key and key UUID
    pub fn add_resource_data_group_with_key(&mut self, key_uuid: impl Into<String>, key: Vec<u8>) -> usize {
        self.groups
            .push(ResourceDataGroup::with_new_key(key_uuid.into(), key));
        self.groups.len() - 1
    }

    /// Add a group read from a manifest
    pub(crate) fn push_loaded_group(&mut self, group: ResourceDataGroup) -> usize {
        self.groups.push(group);
        self.groups.len() - 1
    }

    /// Group at `index`
    pub fn group(&self, index: usize) -> Option<&ResourceDataGroup> {
        self.groups.get(index)
    }

    pub(crate) fn group_mut(&mut self, index: usize) -> Option<&mut ResourceDataGroup> {
        self.groups.get_mut(index)
    }

    /// All groups in manifest order
    pub fn groups(&self) -> &[ResourceDataGroup] {
        &self.groups
    }

    /// Find a group index by key UUID
    pub fn find_group(&self, key_uuid: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.key_uuid == key_uuid)
    }

    /// Grant a consumer access to a group's key
    ///
    /// The access right starts without a cipher value and is marked new: the
    /// next save must wrap it successfully.
    pub fn add_access_right(
        &mut self,
        group_index: usize,
        consumer_id: &str,
        kek_params: KEKParams,
    ) -> Result<()> {
        let consumer_index = self
            .find_consumer_index(consumer_id)
            .ok_or_else(|| Error::ConsumerNotFound(consumer_id.to_string()))?;
        let group = self
            .groups
            .get_mut(group_index)
            .ok_or_else(|| Error::GroupNotFound(format!("group index {}", group_index)))?;
        if group.find_access_right(consumer_index).is_some() {
            return Err(Error::DuplicateResource(format!(
                "access right for consumer '{}' in group '{}'",
                consumer_id, group.key_uuid
            )));
        }
        group.access_rights.push(AccessRight {
            consumer_index,
            kek_params,
            cipher_value: Vec::new(),
            new: true,
        });
        Ok(())
    }

    /// Bind a part path to a group
    ///
    /// IV and tag are filled in by the writer engine.
    pub fn add_resource_data(
        &mut self,
        group_index: usize,
        path: &str,
        algorithm: EncryptionAlgorithm,
        compression: Compression,
    ) -> Result<usize> {
        if group_index >= self.groups.len() {
            return Err(Error::GroupNotFound(format!(
                "group index {} for '{}'",
                group_index, path
            )));
        }
        self.insert_resource_data(ResourceData {
            path: format!("/{}", path_key(path)),
            group_index,
            cek_params: CEKParams {
                encryption_algorithm: algorithm,
                compression,
                ..Default::default()
            },
        })
    }

    /// Insert a fully populated record, rejecting duplicate paths
    pub(crate) fn insert_resource_data(&mut self, resource: ResourceData) -> Result<usize> {
        let key = path_key(&resource.path).to_string();
        if self.path_index.contains_key(&key) {
            return Err(Error::DuplicateResource(format!(
                "resource data path '{}'",
                resource.path
            )));
        }
        self.resources.push(resource);
        self.path_index.insert(key, self.resources.len() - 1);
        Ok(self.resources.len() - 1)
    }

    /// Find resource data by part path (leading `/` optional)
    pub fn find_resource_data(&self, path: &str) -> Option<&ResourceData> {
        self.path_index
            .get(path_key(path))
            .and_then(|&i| self.resources.get(i))
    }

    /// Mutable lookup by part path
    pub fn find_resource_data_mut(&mut self, path: &str) -> Option<&mut ResourceData> {
        let index = *self.path_index.get(path_key(path))?;
        self.resources.get_mut(index)
    }

    /// Group owning the resource data of a part path
    pub fn find_group_by_resource_data_path(&self, path: &str) -> Option<&ResourceDataGroup> {
        self.find_resource_data(path)
            .and_then(|rd| self.groups.get(rd.group_index))
    }

    /// Remove the resource data of a part, making it plaintext on next save
    pub fn remove_resource_data(&mut self, path: &str) -> Option<ResourceData> {
        let index = self.path_index.remove(path_key(path))?;
        let removed = self.resources.remove(index);
        self.path_index = self
            .resources
            .iter()
            .enumerate()
            .map(|(i, rd)| (path_key(&rd.path).to_string(), i))
            .collect();
        Some(removed)
    }

    /// All resource data in manifest order
    pub fn resource_data(&self) -> &[ResourceData] {
        &self.resources
    }

    pub(crate) fn resource_data_mut(&mut self) -> &mut [ResourceData] {
        &mut self.resources
    }

    /// Resource data indices belonging to a group
    pub fn group_members(&self, group_index: usize) -> impl Iterator<Item = usize> + '_ {
        self.resources
            .iter()
            .enumerate()
            .filter(move |(_, rd)| rd.group_index == group_index)
            .map(|(i, _)| i)
    }
}
