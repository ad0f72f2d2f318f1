use serde::{Deserialize, Serialize};

use almoner_core::{DomainError, DomainResult, Entity, FamilyId, PersonId};

use crate::person::{NewPerson, Person};

/// Denormalized copy of a family embedded in the records that reference it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySummary {
    pub head_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFamily {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
    pub members: Vec<NewPerson>,
}

/// Contact fields of a family; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyPatch {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

/// Family record with embedded members.
///
/// Whenever the family has members, exactly one of them is the family head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    id: FamilyId,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    observations: Option<String>,
    #[serde(default)]
    members: Vec<Person>,
    #[serde(default)]
    version: u64,
}

impl Family {
    pub fn create(new: NewFamily) -> DomainResult<Self> {
        let mut family = Self {
            id: FamilyId::new(),
            phone: clean(new.phone),
            address: clean(new.address),
            observations: clean(new.observations),
            members: Vec::new(),
            version: 0,
        };
        family.replace_members(new.members)?;
        Ok(family)
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn observations(&self) -> Option<&str> {
        self.observations.as_deref()
    }

    pub fn members(&self) -> &[Person] {
        &self.members
    }

    pub fn member(&self, person_id: PersonId) -> Option<&Person> {
        self.members.iter().find(|p| p.id == person_id)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn head(&self) -> Option<&Person> {
        self.members.iter().find(|p| p.family_head)
    }

    pub fn national_ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().filter_map(|p| p.national_id.as_deref())
    }

    pub fn summary(&self) -> FamilySummary {
        FamilySummary {
            head_name: self.head().map(Person::full_name).unwrap_or_default(),
            phone: self.phone.clone(),
            address: self.address.clone(),
        }
    }

    pub fn apply_patch(&mut self, patch: FamilyPatch) {
        if patch.phone.is_some() {
            self.phone = clean(patch.phone);
        }
        if patch.address.is_some() {
            self.address = clean(patch.address);
        }
        if patch.observations.is_some() {
            self.observations = clean(patch.observations);
        }
    }

    pub fn add_member(&mut self, new: NewPerson) -> DomainResult<PersonId> {
        let person = new.into_person(PersonId::new())?;
        if person.family_head && self.head().is_some() {
            return Err(DomainError::bad_request("family already has a head"));
        }
        if !person.family_head && self.members.is_empty() {
            return Err(DomainError::bad_request(
                "the first member of a family must be its head",
            ));
        }
        if let Some(nid) = person.national_id.as_deref() {
            if self.national_ids().any(|existing| existing == nid) {
                return Err(DomainError::conflict(format!(
                    "national id {nid} already belongs to this family"
                )));
            }
        }
        let id = person.id;
        self.members.push(person);
        Ok(id)
    }

    /// Remove a member. The head can only go once every other member is gone.
    pub fn remove_member(&mut self, person_id: PersonId) -> DomainResult<Person> {
        let idx = self
            .members
            .iter()
            .position(|p| p.id == person_id)
            .ok_or_else(|| DomainError::not_found(format!("person {person_id}")))?;
        if self.members[idx].family_head && self.members.len() > 1 {
            return Err(DomainError::bad_request(
                "cannot remove the family head while other members exist",
            ));
        }
        Ok(self.members.remove(idx))
    }

    /// Replace the member list, keeping the ids of members matched by national id.
    pub fn replace_members(&mut self, members: Vec<NewPerson>) -> DomainResult<()> {
        let mut next: Vec<Person> = Vec::with_capacity(members.len());
        for new in members {
            let mut person = new.into_person(PersonId::new())?;
            if let Some(nid) = person.national_id.as_deref() {
                if next.iter().any(|p| p.national_id.as_deref() == Some(nid)) {
                    return Err(DomainError::conflict(format!(
                        "national id {nid} appears twice in the family"
                    )));
                }
                if let Some(existing) = self
                    .members
                    .iter()
                    .find(|p| p.national_id.as_deref() == Some(nid))
                {
                    person.id = existing.id;
                }
            }
            next.push(person);
        }

        let heads = next.iter().filter(|p| p.family_head).count();
        if next.is_empty() {
            return Err(DomainError::bad_request("a family needs at least one member"));
        }
        if heads != 1 {
            return Err(DomainError::bad_request(format!(
                "a family needs exactly one head (found {heads})"
            )));
        }

        self.members = next;
        Ok(())
    }
}

impl Entity for Family {
    type Id = FamilyId;

    fn id(&self) -> FamilyId {
        self.id
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::person::Gender;

    fn person(name: &str, nid: Option<&str>, head: bool) -> NewPerson {
        NewPerson {
            name: name.to_string(),
            surname: "Garcia".to_string(),
            national_id: nid.map(str::to_string),
            gender: Gender::Female,
            birth_date: None,
            family_head: head,
        }
    }

    fn family(members: Vec<NewPerson>) -> DomainResult<Family> {
        Family::create(NewFamily {
            phone: Some(" 600111222 ".to_string()),
            address: Some("Main St 1".to_string()),
            observations: None,
            members,
        })
    }

    #[test]
    fn create_requires_exactly_one_head() {
        assert!(matches!(
            family(vec![person("Ana", None, false)]),
            Err(DomainError::BadRequest(_))
        ));
        assert!(matches!(
            family(vec![person("Ana", None, true), person("Eva", None, true)]),
            Err(DomainError::BadRequest(_))
        ));
        let f = family(vec![person("Ana", Some("1a"), true), person("Eva", None, false)]).unwrap();
        assert_eq!(f.head().unwrap().name, "Ana");
        assert_eq!(f.head().unwrap().national_id.as_deref(), Some("1A"));
        assert_eq!(f.phone(), Some("600111222"));
    }

    #[test]
    fn create_rejects_repeated_national_id() {
        let err = family(vec![person("Ana", Some("1"), true), person("Eva", Some("1"), false)])
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn cannot_add_second_head() {
        let mut f = family(vec![person("Ana", None, true)]).unwrap();
        let err = f.add_member(person("Eva", None, true)).unwrap_err();
        assert!(matches!(err, DomainError::BadRequest(_)));
        f.add_member(person("Eva", None, false)).unwrap();
        assert_eq!(f.members().len(), 2);
    }

    #[test]
    fn head_cannot_be_removed_while_others_exist() {
        let mut f = family(vec![person("Ana", None, true), person("Eva", None, false)]).unwrap();
        let head = f.head().unwrap().id;
        let other = f.members()[1].id;

        assert!(matches!(f.remove_member(head), Err(DomainError::BadRequest(_))));
        f.remove_member(other).unwrap();
        f.remove_member(head).unwrap();
        assert!(f.members().is_empty());
    }

    #[test]
    fn remove_unknown_member_is_not_found() {
        let mut f = family(vec![person("Ana", None, true)]).unwrap();
        assert!(matches!(
            f.remove_member(PersonId::new()),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn replace_members_keeps_ids_matched_by_national_id() {
        let mut f = family(vec![person("Ana", Some("1"), true), person("Eva", Some("2"), false)])
            .unwrap();
        let ana = f.members()[0].id;

        f.replace_members(vec![
            person("Ana Maria", Some("1"), true),
            person("Luz", Some("3"), false),
        ])
        .unwrap();

        assert_eq!(f.members()[0].id, ana);
        assert_eq!(f.members()[0].name, "Ana Maria");
        assert_eq!(f.members().len(), 2);
    }

    #[test]
    fn summary_reflects_head_and_contact() {
        let mut f = family(vec![person("Ana", None, true)]).unwrap();
        f.apply_patch(FamilyPatch {
            phone: Some("699".to_string()),
            ..FamilyPatch::default()
        });
        let s = f.summary();
        assert_eq!(s.head_name, "Ana Garcia");
        assert_eq!(s.phone.as_deref(), Some("699"));
        assert_eq!(s.address.as_deref(), Some("Main St 1"));
    }
}
