//! Patients sheet, keyed by national id.

use std::collections::HashMap;

use tracing::instrument;

use almoner_beneficiaries::{NewPatient, Patient, PatientPatch, normalize_national_id};
use almoner_infra::store::{Page, PatientFilter, RecordStore};

use crate::error::ImportError;
use crate::plan::{ImportKind, ImportReport, Keyed, ensure_unique, partition, submit};
use crate::schema::{Schema, optional, required};
use crate::sheet::Sheet;

pub const SCHEMA: Schema = Schema {
    columns: &[
        required("name"),
        required("surname"),
        required("national_id"),
        required("gender"),
        optional("birth_date"),
        optional("phone"),
        optional("address"),
        optional("observations"),
    ],
};

/// Validated rows keyed by normalized national id.
pub fn parse(sheet: &Sheet) -> Result<Vec<Keyed<String, NewPatient>>, ImportError> {
    let rows = SCHEMA.parse_rows(sheet, |row| {
        let name = row.required_text("name");
        let surname = row.required_text("surname");
        let national_id = normalize_national_id(row.text("national_id").as_deref());
        let gender = row.parse("gender");
        let birth_date = row.date("birth_date");
        Some(Keyed {
            key: national_id.clone()?,
            row: row.number(),
            candidate: NewPatient {
                name,
                surname,
                national_id: national_id?,
                gender: gender?,
                birth_date,
                phone: row.text("phone"),
                address: row.text("address"),
                observations: row.text("observations"),
            },
        })
    })?;
    ensure_unique(&rows, "national id")?;
    Ok(rows)
}

#[instrument(skip(patients, sheet), fields(rows = sheet.rows().len()), err)]
pub async fn import(
    patients: &dyn RecordStore<Patient>,
    sheet: &Sheet,
) -> Result<ImportReport, ImportError> {
    let candidates = parse(sheet)?;

    let filter = PatientFilter {
        national_id_any: Some(candidates.iter().map(|k| k.key.clone()).collect()),
        ..PatientFilter::default()
    };
    let existing: HashMap<String, Patient> = patients
        .get_multi(&filter, Page::all())
        .await?
        .into_iter()
        .map(|p| (p.national_id().to_string(), p))
        .collect();
    let plan = partition(candidates, existing);

    let inserts = plan
        .inserts
        .into_iter()
        .map(|k| Patient::create(k.candidate))
        .collect::<Result<Vec<_>, _>>()?;
    let updates = plan
        .updates
        .into_iter()
        .map(|(mut stored, k)| {
            stored.apply_patch(PatientPatch::from(k.candidate))?;
            Ok(stored)
        })
        .collect::<Result<Vec<_>, ImportError>>()?;

    let submitted = submit(patients, inserts, updates).await?;
    Ok(ImportReport {
        inserted: submitted.inserted,
        updated: submitted.updated,
        failed: submitted.failed,
        ..ImportReport::new(ImportKind::Patients)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use almoner_infra::store::InMemoryRecordStore;

    const HEADER: [&str; 8] = [
        "name",
        "surname",
        "national_id",
        "gender",
        "birth_date",
        "phone",
        "address",
        "observations",
    ];

    #[test]
    fn duplicate_national_ids_are_rejected() {
        let sheet = Sheet::from_rows(
            HEADER,
            &[
                vec!["Ana", "Gil", "x1", "female", "", "", "", ""],
                vec!["Eva", "Gil", "X1", "female", "", "", "", ""],
            ],
        );
        assert!(matches!(
            parse(&sheet),
            Err(ImportError::DuplicateKey { first: 2, second: 3, .. })
        ));
    }

    #[test]
    fn bad_enum_and_missing_column_are_reported_per_row() {
        let sheet = Sheet::from_rows(
            HEADER,
            &[vec!["Ana", "", "1", "robot", "", "", "", ""]],
        );
        let Err(ImportError::InvalidRows(rows)) = parse(&sheet) else {
            panic!("expected invalid rows");
        };
        assert_eq!(rows[0].row, 2);
        assert_eq!(rows[0].errors.len(), 2);
    }

    #[tokio::test]
    async fn existing_national_ids_are_updated_new_ones_inserted() {
        let store = InMemoryRecordStore::<Patient>::new();
        let first = Sheet::from_rows(
            HEADER,
            &[vec!["Ana", "Gil", "1", "female", "1980-05-01", "600", "", ""]],
        );
        let report = import(&store, &first).await.unwrap();
        assert_eq!((report.inserted, report.updated), (1, 0));

        let second = Sheet::from_rows(
            HEADER,
            &[
                vec!["Ana", "Gil", "1", "female", "", "611", "", ""],
                vec!["Luis", "Paz", "2", "MALE", "", "", "", ""],
            ],
        );
        let report = import(&store, &second).await.unwrap();
        assert_eq!(report.kind, ImportKind::Patients);
        assert_eq!((report.inserted, report.updated, report.failed), (1, 1, 0));

        let ana = store
            .get(&PatientFilter::by_national_id("1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ana.phone.as_deref(), Some("611"));
        assert_eq!(ana.version(), 1);
        assert_eq!(store.count(&PatientFilter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn a_bad_row_aborts_before_any_write() {
        let store = InMemoryRecordStore::<Patient>::new();
        let sheet = Sheet::from_rows(
            HEADER,
            &[
                vec!["Ana", "Gil", "1", "female", "", "", "", ""],
                vec!["Luis", "Paz", "", "male", "", "", "", ""],
            ],
        );
        assert!(import(&store, &sheet).await.is_err());
        assert_eq!(store.count(&PatientFilter::all()).await.unwrap(), 0);
    }
}
