//! Authoritative response generation
//!
//! Builds responses from a zone snapshot: direct answers for Primary and
//! Secondary zones, referrals for Stub zones and delegations, and the
//! forwarder record for Forwarder zones.

use super::contents::ZoneContents;
use super::record::{ZoneRecord, is_in_zone};
use crate::dns::DNSPacket;
use crate::dns::enums::{DNSResourceType, ResponseCode};
use crate::dns::resource::DNSResource;
use tracing::debug;

/// Longest CNAME chain followed inside one zone
const MAX_CNAME_HOPS: usize = 8;

fn response_skeleton(request: &DNSPacket, recursion_allowed: bool) -> DNSPacket {
    let mut response = DNSPacket::response_to(request);
    response.header.ra = recursion_allowed;
    response
}

fn enabled_resources<'a>(records: impl IntoIterator<Item = &'a ZoneRecord>) -> Vec<DNSResource> {
    records
        .into_iter()
        .filter(|record| !record.is_disabled())
        .map(|record| record.record.clone())
        .collect()
}

/// Apex SOA for negative answers, TTL capped at the SOA minimum
fn negative_soa(contents: &ZoneContents) -> Option<DNSResource> {
    let record = contents.soa_record()?;
    let mut soa = record.record.clone();
    if let Some(data) = record.record.soa() {
        soa.ttl = soa.ttl.min(data.minimum);
    }
    Some(soa)
}

/// Address records for the NS targets in `ns`: in-zone A/AAAA first, then
/// glue stored on the NS records themselves
fn glue_for(contents: &ZoneContents, ns: &[&ZoneRecord]) -> Vec<DNSResource> {
    let mut additional: Vec<DNSResource> = Vec::new();

    for record in ns {
        let Some(target) = record.rdata().target_name() else {
            continue;
        };

        let mut found = Vec::new();
        if is_in_zone(target, contents.apex()) {
            for rtype in [DNSResourceType::A, DNSResourceType::AAAA] {
                found.extend(enabled_resources(contents.get(target, rtype)));
            }
        }
        if found.is_empty() {
            found.extend(record.info.glue.iter().cloned());
        }

        for glue in found {
            if !additional.contains(&glue) {
                additional.push(glue);
            }
        }
    }

    additional
}

/// Referral to the NS set at `owner`
fn referral(mut response: DNSPacket, contents: &ZoneContents, owner: &str) -> DNSPacket {
    let ns = contents.get_enabled(owner, DNSResourceType::NS);
    response.header.aa = false;
    response.authorities = ns.iter().map(|record| record.record.clone()).collect();
    response.resources = glue_for(contents, &ns);
    response.update_counts();
    response
}

/// Answer from zone data, for Primary and Secondary zones
pub fn authoritative_answer(contents: &ZoneContents, request: &DNSPacket, recursion_allowed: bool) -> DNSPacket {
    let mut response = response_skeleton(request, recursion_allowed);
    let Some(question) = request.question() else {
        response.set_rcode(ResponseCode::FormatError);
        response.update_counts();
        return response;
    };

    let qname = question.name();
    let qtype = question.qtype;
    let apex = contents.apex();

    // Delegation below the apex takes precedence over anything at or under the cut
    for owner in contents.names_above(&qname) {
        if owner == apex {
            continue;
        }
        if owner == qname && qtype == DNSResourceType::DS {
            continue;
        }
        if !contents.get_enabled(&owner, DNSResourceType::NS).is_empty() {
            debug!("Delegation response for {} at {}", qname, owner);
            return referral(response, contents, &owner);
        }
    }

    response.header.aa = true;

    if has_enabled_records(contents, &qname) {
        answer_at(&mut response, contents, &qname, &qname, qtype);
    } else if contents.node_exists(&qname) {
        debug!("NoData response for {} (empty non-terminal)", qname);
        response.authorities.extend(negative_soa(contents));
    } else {
        let encloser = contents.closest_encloser(&qname);
        let wildcard = if encloser.is_empty() {
            "*".to_string()
        } else {
            format!("*.{}", encloser)
        };

        if is_in_zone(&encloser, apex) && has_enabled_records(contents, &wildcard) {
            debug!("Wildcard response for {} from {}", qname, wildcard);
            answer_at(&mut response, contents, &wildcard, &qname, qtype);
        } else {
            debug!("NXDomain response for {}", qname);
            response.set_rcode(ResponseCode::NameError);
            response.authorities.extend(negative_soa(contents));
        }
    }

    response.update_counts();
    response
}

fn has_enabled_records(contents: &ZoneContents, name: &str) -> bool {
    contents
        .record_set(name)
        .is_some_and(|set| set.values().flatten().any(|record| !record.is_disabled()))
}

/// Fill the answer for `qtype` from the records stored at `source`, owned
/// as `owner` (they differ for wildcard synthesis)
fn answer_at(response: &mut DNSPacket, contents: &ZoneContents, source: &str, owner: &str, qtype: DNSResourceType) {
    let Some(set) = contents.record_set(source) else {
        return;
    };

    let rename = |record: &ZoneRecord| {
        if source == owner {
            record.record.clone()
        } else {
            record.resource_as(owner)
        }
    };

    if qtype == DNSResourceType::ANY {
        response.answers.extend(
            set.values()
                .flatten()
                .filter(|record| !record.is_disabled())
                .map(rename),
        );
        return;
    }

    let matching: Vec<DNSResource> = set
        .get(&qtype)
        .into_iter()
        .flatten()
        .filter(|record| !record.is_disabled())
        .map(rename)
        .collect();
    if !matching.is_empty() {
        response.answers.extend(matching);
        return;
    }

    let cname = set
        .get(&DNSResourceType::CNAME)
        .and_then(|records| records.iter().find(|record| !record.is_disabled()));
    if let Some(cname) = cname {
        response.answers.push(rename(cname));
        follow_cname(response, contents, cname, qtype);
        return;
    }

    response.authorities.extend(negative_soa(contents));
}

/// Chase a CNAME chain while its targets stay inside the zone
fn follow_cname(response: &mut DNSPacket, contents: &ZoneContents, start: &ZoneRecord, qtype: DNSResourceType) {
    let mut target = start.rdata().target_name().map(str::to_string);

    for _ in 0..MAX_CNAME_HOPS {
        let Some(name) = target.take() else {
            return;
        };
        if !is_in_zone(&name, contents.apex()) {
            return;
        }

        let direct = contents.get_enabled(&name, qtype);
        if !direct.is_empty() {
            response.answers.extend(direct.into_iter().map(|record| record.record.clone()));
            return;
        }

        let next = contents.get_enabled(&name, DNSResourceType::CNAME);
        let Some(next) = next.first() else {
            return;
        };
        if response.answers.contains(&next.record) {
            return;
        }
        response.answers.push(next.record.clone());
        target = next.rdata().target_name().map(str::to_string);
    }
}

/// Referral to the stub apex NS set, never a direct answer
pub fn stub_referral(contents: &ZoneContents, request: &DNSPacket, recursion_allowed: bool) -> DNSPacket {
    let response = response_skeleton(request, recursion_allowed);
    referral(response, contents, contents.apex())
}

/// Response carrying the zone's forwarder records in the authority section
pub fn forwarder_response(contents: &ZoneContents, request: &DNSPacket, recursion_allowed: bool) -> DNSPacket {
    let mut response = response_skeleton(request, recursion_allowed);
    response.authorities = enabled_resources(contents.get(contents.apex(), DNSResourceType::FWD));
    response.update_counts();
    response
}
