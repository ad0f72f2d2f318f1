use core::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use almoner_core::{DomainError, DomainResult, PersonId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl FromStr for Gender {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(DomainError::bad_request(format!(
                "invalid gender '{other}' (expected male, female or other)"
            ))),
        }
    }
}

/// Canonical form of a national id: trimmed, upper-case, `None` when blank.
pub fn normalize_national_id(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

/// A family member. Owned by exactly one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub surname: String,
    #[serde(default)]
    pub national_id: Option<String>,
    pub gender: Gender,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub family_head: bool,
}

impl Person {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.surname)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPerson {
    pub name: String,
    pub surname: String,
    #[serde(default)]
    pub national_id: Option<String>,
    pub gender: Gender,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub family_head: bool,
}

impl NewPerson {
    pub(crate) fn into_person(self, id: PersonId) -> DomainResult<Person> {
        let name = required("name", &self.name)?;
        let surname = required("surname", &self.surname)?;
        Ok(Person {
            id,
            name,
            surname,
            national_id: normalize_national_id(self.national_id.as_deref()),
            gender: self.gender,
            birth_date: self.birth_date,
            family_head: self.family_head,
        })
    }
}

pub(crate) fn required(field: &str, value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::bad_request(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_parses_case_insensitively() {
        assert_eq!("FEMALE".parse::<Gender>().unwrap(), Gender::Female);
        assert_eq!(" male".parse::<Gender>().unwrap(), Gender::Male);
        assert!(matches!("x".parse::<Gender>(), Err(DomainError::BadRequest(_))));
    }

    #[test]
    fn national_id_is_normalized() {
        assert_eq!(normalize_national_id(Some(" 123a ")), Some("123A".to_string()));
        assert_eq!(normalize_national_id(Some("  ")), None);
        assert_eq!(normalize_national_id(None), None);
    }

    #[test]
    fn gender_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Gender::Other).unwrap(), "other");
    }
}
