//! Record storage for a single zone.
//!
//! A `ZoneContents` is treated as an immutable snapshot once published:
//! writers clone it, modify the clone and swap the new value in, so readers
//! holding the old `Arc` keep a consistent view.

use super::record::{ZoneRecord, is_in_zone};
use super::tree::DomainTree;
use super::{Result, ZoneError};
use crate::dns::enums::DNSResourceType;
use crate::dns::resource::{DNSResource, DNSResourceData, SoaData, normalize_name};
use std::collections::BTreeMap;

pub type RecordSet = BTreeMap<DNSResourceType, Vec<ZoneRecord>>;

#[derive(Clone, Debug, Default)]
pub struct ZoneContents {
    apex: String,
    nodes: DomainTree<RecordSet>,
}

impl ZoneContents {
    pub fn new(apex: &str) -> Self {
        Self {
            apex: normalize_name(apex),
            nodes: DomainTree::new(),
        }
    }

    /// Build contents from a record list, e.g. a zone transfer or a snapshot
    pub fn from_records(apex: &str, records: impl IntoIterator<Item = ZoneRecord>) -> Result<Self> {
        let mut contents = Self::new(apex);
        for record in records {
            contents.add(record)?;
        }
        Ok(contents)
    }

    pub fn apex(&self) -> &str {
        &self.apex
    }

    pub fn soa_record(&self) -> Option<&ZoneRecord> {
        self.get(&self.apex, DNSResourceType::SOA).first()
    }

    pub fn soa(&self) -> Option<&SoaData> {
        self.soa_record().and_then(|record| record.record.soa())
    }

    /// Records of one type at `name`, including disabled ones
    pub fn get(&self, name: &str, rtype: DNSResourceType) -> &[ZoneRecord] {
        self.nodes
            .get(name)
            .and_then(|set| set.get(&rtype))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Enabled records of one type at `name`
    pub fn get_enabled(&self, name: &str, rtype: DNSResourceType) -> Vec<&ZoneRecord> {
        self.get(name, rtype)
            .iter()
            .filter(|record| !record.is_disabled())
            .collect()
    }

    pub fn record_set(&self, name: &str) -> Option<&RecordSet> {
        self.nodes.get(name)
    }

    pub fn node_exists(&self, name: &str) -> bool {
        self.nodes.node_exists(name)
    }

    pub fn closest_encloser(&self, name: &str) -> String {
        self.nodes.closest_encloser(name)
    }

    /// Owner names holding records on the path from the apex down to `name`
    pub fn names_above(&self, name: &str) -> Vec<String> {
        self.nodes
            .ancestors(name)
            .into_iter()
            .map(|(owner, _)| owner)
            .filter(|owner| is_in_zone(owner, &self.apex))
            .collect()
    }

    fn check_owner(&self, record: &DNSResource) -> Result<String> {
        let owner = record.name();
        if !is_in_zone(&owner, &self.apex) {
            return Err(ZoneError::InvalidRecord(format!(
                "{} is outside zone {}",
                owner, self.apex
            )));
        }
        if record.rtype == DNSResourceType::SOA {
            if owner != self.apex {
                return Err(ZoneError::InvalidRecord(format!(
                    "SOA record must be at the zone apex {}",
                    self.apex
                )));
            }
            if record.soa().is_none() {
                return Err(ZoneError::InvalidRecord("SOA record without SOA data".to_string()));
            }
        }
        Ok(owner)
    }

    /// Add a record. An SOA replaces the existing one; a record already
    /// present by identity is left alone and `false` is returned.
    pub fn add(&mut self, record: ZoneRecord) -> Result<bool> {
        let owner = self.check_owner(&record.record)?;
        let rtype = record.rtype();

        let set = self.nodes.get_or_insert_with(&owner, RecordSet::new);
        let records = set.entry(rtype).or_default();

        if rtype == DNSResourceType::SOA {
            *records = vec![record];
            return Ok(true);
        }

        if records.iter().any(|existing| existing.same_identity(&record.record)) {
            return Ok(false);
        }
        records.push(record);
        Ok(true)
    }

    /// Replace the whole RRset of `rtype` at `name`; an empty list removes it
    pub fn set_rrset(&mut self, name: &str, rtype: DNSResourceType, records: Vec<ZoneRecord>) -> Result<()> {
        let name = normalize_name(name);
        for record in &records {
            let owner = self.check_owner(&record.record)?;
            if owner != name || record.rtype() != rtype {
                return Err(ZoneError::InvalidRecord(format!(
                    "record {} {:?} does not belong to RRset {} {:?}",
                    owner,
                    record.rtype(),
                    name,
                    rtype
                )));
            }
        }
        if rtype == DNSResourceType::SOA && records.len() > 1 {
            return Err(ZoneError::InvalidRecord("only one SOA record is allowed".to_string()));
        }

        if records.is_empty() {
            self.remove_rrset(&name, rtype);
            return Ok(());
        }

        let mut unique: Vec<ZoneRecord> = Vec::with_capacity(records.len());
        for record in records {
            if !unique.iter().any(|existing| existing.same_identity(&record.record)) {
                unique.push(record);
            }
        }

        self.nodes
            .get_or_insert_with(&name, RecordSet::new)
            .insert(rtype, unique);
        Ok(())
    }

    /// Remove one record by identity
    pub fn remove(&mut self, record: &DNSResource) -> bool {
        let owner = record.name();
        let Some(set) = self.nodes.get_mut(&owner) else {
            return false;
        };
        let Some(records) = set.get_mut(&record.rtype) else {
            return false;
        };

        let before = records.len();
        records.retain(|existing| !existing.same_identity(record));
        let removed = records.len() != before;

        if records.is_empty() {
            set.remove(&record.rtype);
        }
        if set.is_empty() {
            self.nodes.remove(&owner);
        }
        removed
    }

    pub fn remove_rrset(&mut self, name: &str, rtype: DNSResourceType) -> bool {
        let Some(set) = self.nodes.get_mut(name) else {
            return false;
        };
        let removed = set.remove(&rtype).is_some();
        if set.is_empty() {
            self.nodes.remove(name);
        }
        removed
    }

    /// Swap `old` for `new`, keeping the stored metadata of `old`
    pub fn update(&mut self, old: &DNSResource, new: DNSResource) -> Result<bool> {
        let owner = old.name();
        let Some(info) = self
            .get(&owner, old.rtype)
            .iter()
            .find(|existing| existing.same_identity(old))
            .map(|existing| existing.info.clone())
        else {
            return Ok(false);
        };

        self.check_owner(&new)?;
        self.remove(old);
        self.add(ZoneRecord::with_info(new, info))?;
        Ok(true)
    }

    /// Drop every record whose type matches `predicate`
    pub fn remove_types(&mut self, predicate: impl Fn(DNSResourceType) -> bool) {
        let owners: Vec<String> = self.nodes.iter().map(|(owner, _)| owner).collect();
        for owner in owners {
            if let Some(set) = self.nodes.get_mut(&owner) {
                set.retain(|rtype, _| !predicate(*rtype));
                if set.is_empty() {
                    self.nodes.remove(&owner);
                }
            }
        }
    }

    /// Advance the SOA serial by one in sequence space
    pub fn bump_serial(&mut self) -> Result<()> {
        let apex = self.apex.clone();
        let set = self.nodes.get_mut(&apex).ok_or(ZoneError::MissingSOA)?;
        let soa_record = set
            .get_mut(&DNSResourceType::SOA)
            .and_then(|records| records.first_mut())
            .ok_or(ZoneError::MissingSOA)?;

        let next = soa_record
            .record
            .soa()
            .map(SoaData::with_next_serial)
            .ok_or(ZoneError::MissingSOA)?;
        soa_record.record.rdata = DNSResourceData::SOA(next);
        Ok(())
    }

    /// All records, the apex SOA first
    pub fn records(&self) -> impl Iterator<Item = &ZoneRecord> {
        let soa = self.soa_record();
        soa.into_iter().chain(
            self.nodes
                .iter()
                .flat_map(|(_, set)| set.values().flatten())
                .filter(|record| record.rtype() != DNSResourceType::SOA),
        )
    }

    /// Records at `domain` and everything below it
    pub fn records_below(&self, domain: &str) -> Vec<ZoneRecord> {
        self.nodes
            .iter_from(domain)
            .flat_map(|(_, set)| set.values().flatten())
            .cloned()
            .collect()
    }

    pub fn sub_domains(&self, domain: &str) -> Vec<String> {
        self.nodes.child_labels(domain)
    }

    pub fn len(&self) -> usize {
        self.nodes
            .values()
            .map(|set| set.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
