// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Change-log directive grammar and translation into [`DynamicUpdate`]s.
//!
//! Every [`ChangeRecord`] carries one directive:
//!
//! ```text
//! RELOAD
//! INSERT <zone> <name> <type> <ttl> <answer>
//! UPDATE <zone> <name> <type> <ttl> <answer>
//! DELETE <zone> <name> <type> [<ttl> <answer>]
//! DELETE-IP <zone> <name> <type> <ip>
//! DELETE-IFACE-IP <zone> <name> <type> <interface-id>
//! ```
//!
//! The text is parsed once into a [`Directive`]; nothing downstream looks at
//! the raw string again. The answer is the remainder of the line, so TXT data
//! containing spaces survives the round trip.
//!
//! # Example
//!
//! ```rust
//! use dnssync::translator::UpdateTranslator;
//! use dnssync::model::{ChangeRecord, UpdateOperation};
//!
//! let record = ChangeRecord {
//!     serial: 2,
//!     update: "UPDATE example.com www A 30 10.0.0.7".to_string(),
//!     created_at: chrono::Utc::now(),
//! };
//!
//! let translator = UpdateTranslator::new(30, Vec::new());
//! let updates = translator.translate(&record).unwrap();
//! assert_eq!(updates[0].operation, UpdateOperation::Delete);
//! assert_eq!(updates[1].operation, UpdateOperation::Insert);
//! ```

use crate::dns_errors::ChangeParseError;
use crate::model::{
    address_record_type, is_address_type, ChangeRecord, DynamicUpdate, Subnet, UpdateOperation,
};
use crate::network::{rev_zone_name, zone_chunk_for};
use std::fmt;
use std::net::IpAddr;

const RELOAD: &str = "RELOAD";
const INSERT: &str = "INSERT";
const UPDATE: &str = "UPDATE";
const DELETE: &str = "DELETE";
const DELETE_IP: &str = "DELETE-IP";
const DELETE_IFACE_IP: &str = "DELETE-IFACE-IP";

/// Zone, owner name and record type addressed by a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOwner {
    pub zone: String,
    pub name: String,
    pub rectype: String,
}

impl RecordOwner {
    #[must_use]
    pub fn new(zone: &str, name: &str, rectype: &str) -> Self {
        Self {
            zone: zone.to_string(),
            name: name.to_string(),
            rectype: rectype.to_string(),
        }
    }
}

/// A parsed change-log directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Reload,
    Insert {
        owner: RecordOwner,
        ttl: u32,
        answer: String,
    },
    Update {
        owner: RecordOwner,
        ttl: u32,
        answer: String,
    },
    /// Instance-level when `value` carries a TTL and answer, type-level otherwise
    Delete {
        owner: RecordOwner,
        value: Option<(u32, String)>,
    },
    DeleteIp {
        owner: RecordOwner,
        ip: IpAddr,
    },
    DeleteIfaceIp {
        owner: RecordOwner,
        iface_id: u64,
    },
}

impl Directive {
    /// Parse the directive text of the change record with `serial`.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeParseError`] for empty text, an unknown action, the
    /// wrong number of fields, or a TTL/IP/interface id that does not parse.
    pub fn parse(serial: u64, text: &str) -> Result<Self, ChangeParseError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let Some((&action, fields)) = tokens.split_first() else {
            return Err(ChangeParseError::Empty { serial });
        };

        let arity = |expected: &'static str| ChangeParseError::WrongArity {
            serial,
            directive: text.trim().to_string(),
            expected,
        };

        match action {
            RELOAD => {
                if fields.is_empty() {
                    Ok(Self::Reload)
                } else {
                    Err(arity("no arguments"))
                }
            }
            INSERT | UPDATE => {
                if fields.len() < 5 {
                    return Err(arity("<zone> <name> <type> <ttl> <answer>"));
                }
                let owner = owner_from(fields);
                let ttl = parse_ttl(serial, fields[3])?;
                let answer = answer_text(text).to_string();
                if action == INSERT {
                    Ok(Self::Insert { owner, ttl, answer })
                } else {
                    Ok(Self::Update { owner, ttl, answer })
                }
            }
            DELETE => match fields.len() {
                3 => Ok(Self::Delete {
                    owner: owner_from(fields),
                    value: None,
                }),
                n if n >= 5 => Ok(Self::Delete {
                    owner: owner_from(fields),
                    value: Some((parse_ttl(serial, fields[3])?, answer_text(text).to_string())),
                }),
                _ => Err(arity("<zone> <name> <type> [<ttl> <answer>]")),
            },
            DELETE_IP => {
                if fields.len() != 4 {
                    return Err(arity("<zone> <name> <type> <ip>"));
                }
                let ip = fields[3]
                    .parse::<IpAddr>()
                    .map_err(|_| ChangeParseError::InvalidField {
                        serial,
                        field: "ip",
                        value: fields[3].to_string(),
                    })?;
                Ok(Self::DeleteIp {
                    owner: owner_from(fields),
                    ip,
                })
            }
            DELETE_IFACE_IP => {
                if fields.len() != 4 {
                    return Err(arity("<zone> <name> <type> <interface-id>"));
                }
                let iface_id = fields[3]
                    .parse::<u64>()
                    .map_err(|_| ChangeParseError::InvalidField {
                        serial,
                        field: "interface id",
                        value: fields[3].to_string(),
                    })?;
                Ok(Self::DeleteIfaceIp {
                    owner: owner_from(fields),
                    iface_id,
                })
            }
            other => Err(ChangeParseError::UnknownAction {
                serial,
                action: other.to_string(),
            }),
        }
    }
}

/// The directive text after the action, zone, name, type and TTL tokens,
/// with inner whitespace kept as written.
fn answer_text(text: &str) -> &str {
    let mut rest = text.trim_start();
    for _ in 0..5 {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest.trim_end()
}

fn owner_from(fields: &[&str]) -> RecordOwner {
    RecordOwner::new(fields[0], fields[1], fields[2])
}

fn parse_ttl(serial: u64, raw: &str) -> Result<u32, ChangeParseError> {
    raw.parse().map_err(|_| ChangeParseError::InvalidField {
        serial,
        field: "ttl",
        value: raw.to_string(),
    })
}

impl fmt::Display for RecordOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.zone, self.name, self.rectype)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reload => f.write_str(RELOAD),
            Self::Insert { owner, ttl, answer } => write!(f, "{INSERT} {owner} {ttl} {answer}"),
            Self::Update { owner, ttl, answer } => write!(f, "{UPDATE} {owner} {ttl} {answer}"),
            Self::Delete { owner, value: None } => write!(f, "{DELETE} {owner}"),
            Self::Delete {
                owner,
                value: Some((ttl, answer)),
            } => write!(f, "{DELETE} {owner} {ttl} {answer}"),
            Self::DeleteIp { owner, ip } => write!(f, "{DELETE_IP} {owner} {ip}"),
            Self::DeleteIfaceIp { owner, iface_id } => {
                write!(f, "{DELETE_IFACE_IP} {owner} {iface_id}")
            }
        }
    }
}

/// Turns change records into [`DynamicUpdate`]s.
///
/// Holds the subnets used to route address records to their reverse zone.
#[derive(Debug, Clone)]
pub struct UpdateTranslator {
    default_ttl: u32,
    subnets: Vec<Subnet>,
}

impl UpdateTranslator {
    #[must_use]
    pub fn new(default_ttl: u32, subnets: Vec<Subnet>) -> Self {
        Self {
            default_ttl,
            subnets,
        }
    }

    /// Translate one change record.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeParseError`] if the directive is malformed. The caller
    /// must abort the attempt rather than skip the record.
    pub fn translate(&self, record: &ChangeRecord) -> Result<Vec<DynamicUpdate>, ChangeParseError> {
        let directive = Directive::parse(record.serial, &record.update)?;
        Ok(self.expand(&directive))
    }

    /// Expand a parsed directive into the updates that apply it.
    #[must_use]
    pub fn expand(&self, directive: &Directive) -> Vec<DynamicUpdate> {
        match directive {
            Directive::Reload => vec![DynamicUpdate::reload()],
            Directive::Insert { owner, ttl, answer } => vec![self.record_update(
                UpdateOperation::Insert,
                owner,
                Some(*ttl),
                Some(answer),
            )],
            Directive::Update { owner, ttl, answer } => {
                let insert =
                    self.record_update(UpdateOperation::Insert, owner, Some(*ttl), Some(answer));
                // Type-level delete of whatever the name held before
                let delete =
                    DynamicUpdate::new(UpdateOperation::Delete, &owner.zone, &owner.name, &insert.rectype);
                vec![delete, insert]
            }
            Directive::Delete { owner, value: None } => {
                let mut delete =
                    DynamicUpdate::new(UpdateOperation::Delete, &owner.zone, &owner.name, &owner.rectype);
                delete.ttl = Some(self.default_ttl);
                vec![delete]
            }
            Directive::Delete {
                owner,
                value: Some((ttl, answer)),
            } => vec![self.record_update(
                UpdateOperation::Delete,
                owner,
                Some(*ttl),
                Some(answer),
            )],
            Directive::DeleteIp { owner, ip } => self.delete_both_families(owner, Some(*ip)),
            Directive::DeleteIfaceIp { owner, .. } => self.delete_both_families(owner, None),
        }
    }

    fn record_update(
        &self,
        operation: UpdateOperation,
        owner: &RecordOwner,
        ttl: Option<u32>,
        answer: Option<&String>,
    ) -> DynamicUpdate {
        let mut update = DynamicUpdate::new(operation, &owner.zone, &owner.name, &owner.rectype);
        update.ttl = ttl.map(|ttl| if ttl == 0 { self.default_ttl } else { ttl });
        update.answer = answer.cloned();

        let Some(ip) = answer.and_then(|a| a.parse::<IpAddr>().ok()) else {
            return update;
        };
        if ip.is_ipv6() {
            update.rectype = address_record_type(&ip).to_string();
        }
        if is_address_type(&update.rectype) {
            self.route_to_reverse(&mut update, ip);
        }
        update
    }

    fn delete_both_families(&self, owner: &RecordOwner, ip: Option<IpAddr>) -> Vec<DynamicUpdate> {
        ["A", "AAAA"]
            .into_iter()
            .map(|rectype| {
                let mut delete =
                    DynamicUpdate::new(UpdateOperation::Delete, &owner.zone, &owner.name, rectype);
                if let Some(ip) = ip.filter(|ip| address_record_type(ip) == rectype) {
                    self.route_to_reverse(&mut delete, ip);
                }
                delete
            })
            .collect()
    }

    fn route_to_reverse(&self, update: &mut DynamicUpdate, ip: IpAddr) {
        update.ip = Some(ip);
        if let Some(subnet) = self.containing_subnet(&ip, Subnet::serves_reverse) {
            update.subnet = Some(subnet.cidr);
            update.rev_zone = zone_chunk_for(&ip, &subnet.cidr).map(|chunk| rev_zone_name(&chunk));
        } else if let Some(subnet) = self.containing_subnet(&ip, |subnet| subnet.allow_dns) {
            update.subnet = Some(subnet.cidr);
        }
    }

    /// Most specific subnet containing `ip` among those `eligible` keeps.
    ///
    /// Reverse routing only looks at subnets serving reverse zones, matching
    /// the most specific served chunk a full reload writes the PTR into.
    fn containing_subnet<P>(&self, ip: &IpAddr, eligible: P) -> Option<&Subnet>
    where
        P: Fn(&Subnet) -> bool,
    {
        self.subnets
            .iter()
            .filter(|subnet| eligible(subnet) && subnet.cidr.contains(ip))
            .max_by_key(|subnet| subnet.cidr.prefix_len())
    }
}

#[cfg(test)]
#[path = "translator_tests.rs"]
mod translator_tests;
