//! Families sheet: one row per member, grouped by the `family` column.
//!
//! A family is identified by its head's national id. Family-level contact
//! fields come from the head row.

use std::collections::HashMap;

use tracing::instrument;

use almoner_beneficiaries::{Family, FamilyPatch, NewFamily, NewPerson, normalize_national_id};
use almoner_core::Entity;
use almoner_deliveries::Delivery;
use almoner_infra::fanout::propagate_family_summaries;
use almoner_infra::store::{FamilyFilter, Page, RecordStore};

use crate::error::{ImportError, RowError};
use crate::plan::{ImportKind, ImportReport, Keyed, ensure_unique, partition, submit};
use crate::schema::{Schema, optional, required};
use crate::sheet::Sheet;

pub const SCHEMA: Schema = Schema {
    columns: &[
        required("family"),
        required("name"),
        required("surname"),
        optional("national_id"),
        required("gender"),
        optional("birth_date"),
        required("family_head"),
        optional("phone"),
        optional("address"),
        optional("observations"),
    ],
};

#[derive(Debug, Clone)]
struct MemberRow {
    row: usize,
    group: String,
    person: NewPerson,
    phone: Option<String>,
    address: Option<String>,
    observations: Option<String>,
}

/// One family per group, keyed by the head's national id.
pub fn parse(sheet: &Sheet) -> Result<Vec<Keyed<String, NewFamily>>, ImportError> {
    let rows = SCHEMA.parse_rows(sheet, |row| {
        let group = row.required_text("family");
        let name = row.required_text("name");
        let surname = row.required_text("surname");
        let gender = row.parse("gender");
        let birth_date = row.date("birth_date");
        let family_head = row.yes_no("family_head");
        Some(MemberRow {
            row: row.number(),
            group,
            person: NewPerson {
                name,
                surname,
                national_id: normalize_national_id(row.text("national_id").as_deref()),
                gender: gender?,
                birth_date,
                family_head: family_head?,
            },
            phone: row.text("phone"),
            address: row.text("address"),
            observations: row.text("observations"),
        })
    })?;

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<MemberRow>> = HashMap::new();
    for member in rows {
        let entry = groups.entry(member.group.clone()).or_insert_with(|| {
            order.push(member.group.clone());
            Vec::new()
        });
        entry.push(member);
    }

    let mut families = Vec::with_capacity(order.len());
    let mut invalid = Vec::new();
    for group in order {
        let members = groups.remove(&group).unwrap_or_default();
        match build_family(&group, members) {
            Ok(family) => families.push(family),
            Err(e) => invalid.push(e),
        }
    }
    if !invalid.is_empty() {
        return Err(ImportError::InvalidRows(invalid));
    }

    ensure_unique(&families, "family head national id")?;
    let members: Vec<Keyed<String, ()>> = families
        .iter()
        .flat_map(|f| {
            f.candidate
                .members
                .iter()
                .filter_map(|m| m.national_id.clone())
                .map(|nid| Keyed {
                    key: nid,
                    row: f.row,
                    candidate: (),
                })
        })
        .collect();
    ensure_unique(&members, "member national id")?;
    Ok(families)
}

fn build_family(group: &str, members: Vec<MemberRow>) -> Result<Keyed<String, NewFamily>, RowError> {
    let first_row = members.first().map(|m| m.row).unwrap_or_default();
    let heads: Vec<&MemberRow> = members.iter().filter(|m| m.person.family_head).collect();
    let head = match heads.as_slice() {
        [head] => *head,
        _ => {
            return Err(RowError {
                row: first_row,
                errors: vec![format!(
                    "family '{group}' needs exactly one family_head = yes row (found {})",
                    heads.len()
                )],
            });
        }
    };
    let Some(key) = head.person.national_id.clone() else {
        return Err(RowError {
            row: head.row,
            errors: vec![format!("family '{group}': the head needs a national_id")],
        });
    };
    let head_row = head.row;
    let (phone, address, observations) =
        (head.phone.clone(), head.address.clone(), head.observations.clone());
    Ok(Keyed {
        key,
        row: head_row,
        candidate: NewFamily {
            phone,
            address,
            observations,
            members: members.into_iter().map(|m| m.person).collect(),
        },
    })
}

#[instrument(skip(families, deliveries, sheet), fields(rows = sheet.rows().len()), err)]
pub async fn import(
    families: &dyn RecordStore<Family>,
    deliveries: &dyn RecordStore<Delivery>,
    sheet: &Sheet,
) -> Result<ImportReport, ImportError> {
    let candidates = parse(sheet)?;

    // One lookup covers both the natural-key match and the cross-family
    // national id check: a family's head is also one of its members.
    let nids: Vec<String> = candidates
        .iter()
        .flat_map(|k| k.candidate.members.iter().filter_map(|m| m.national_id.clone()))
        .collect();
    let filter = FamilyFilter {
        member_national_id_any: Some(nids),
        ..FamilyFilter::default()
    };
    let holders = families.get_multi(&filter, Page::all()).await?;
    let existing: HashMap<String, Family> = holders
        .iter()
        .filter_map(|f| {
            let head_nid = f.head()?.national_id.clone()?;
            candidates
                .iter()
                .any(|k| k.key == head_nid)
                .then(|| (head_nid, f.clone()))
        })
        .collect();

    for keyed in &candidates {
        let matched = existing.get(&keyed.key).map(Family::id);
        for nid in keyed.candidate.members.iter().filter_map(|m| m.national_id.as_deref()) {
            if let Some(other) = holders
                .iter()
                .find(|f| Some(f.id()) != matched && f.national_ids().any(|n| n == nid))
            {
                return Err(ImportError::Conflict(format!(
                    "row {}: national id {nid} already belongs to family {}",
                    keyed.row,
                    other.id()
                )));
            }
        }
    }

    let plan = partition(candidates, existing);
    let inserts = plan
        .inserts
        .into_iter()
        .map(|k| Family::create(k.candidate))
        .collect::<Result<Vec<_>, _>>()?;
    let updates = plan
        .updates
        .into_iter()
        .map(|(mut stored, k)| {
            let NewFamily {
                phone,
                address,
                observations,
                members,
            } = k.candidate;
            stored.apply_patch(FamilyPatch {
                phone,
                address,
                observations,
            });
            stored.replace_members(members)?;
            Ok(stored)
        })
        .collect::<Result<Vec<_>, ImportError>>()?;

    let submitted = submit(families, inserts, updates.clone()).await?;
    let changed: Vec<Family> = updates
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !submitted.rejected_updates.contains(i))
        .map(|(_, f)| f)
        .collect();
    let propagated = propagate_family_summaries(deliveries, &changed).await?;

    Ok(ImportReport {
        inserted: submitted.inserted,
        updated: submitted.updated,
        failed: submitted.failed,
        propagated,
        ..ImportReport::new(ImportKind::Families)
    })
}
