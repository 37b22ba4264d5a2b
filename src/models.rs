use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity types, declared in global lock-acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Country,
    JobRequisition,
    Candidate,
    Application,
    Tag,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Country,
        EntityKind::JobRequisition,
        EntityKind::Candidate,
        EntityKind::Application,
        EntityKind::Tag,
    ];

    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Country => "Countries",
            EntityKind::JobRequisition => "Requisitions",
            EntityKind::Candidate => "Candidates",
            EntityKind::Application => "Applications",
            EntityKind::Tag => "Tags",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Country => "Country",
            EntityKind::JobRequisition => "Job Requisition",
            EntityKind::Candidate => "Candidate",
            EntityKind::Application => "Application",
            EntityKind::Tag => "Tag",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A record kept in its own collection and mirrored by an `EntityCache`.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    /// Fields loaded on refresh. Mirror fields are never projected.
    const FIELDS: &'static [&'static str];

    fn id(&self) -> i64;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Country {
    #[serde(rename = "ID")]
    pub id: i64,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Tag {
    #[serde(rename = "ID")]
    pub id: i64,
    pub label: String,
}

impl Tag {
    pub fn labelled(label: &str) -> Self {
        Self {
            id: 0,
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Application {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "CandidateProfileID")]
    pub candidate_profile_id: i64,
    #[serde(rename = "JobRequisitionID")]
    pub job_requisition_id: i64,
    pub salary_expectation: String,
    pub application_source: String,
    pub time_of_experience: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Candidate {
    #[serde(rename = "ID")]
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: String,
    pub tags: Vec<Tag>,
    #[serde(rename = "CountryID")]
    pub country_id: i64,
    pub country: Option<Country>, // mirror of Countries
    pub jobs_applied: Vec<Application>, // mirror of Applications
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct JobRequisition {
    #[serde(rename = "ID")]
    pub id: i64,
    pub title: String,
    pub job_description: String,
    pub posting_status: bool,
    #[serde(rename = "CountryID")]
    pub country_id: i64,
    pub country: Option<Country>, // mirror of Countries
    pub applicants: Vec<Application>, // mirror of Applications
}

impl Document for Country {
    const KIND: EntityKind = EntityKind::Country;
    const FIELDS: &'static [&'static str] = &["ID", "Name", "Code"];

    fn id(&self) -> i64 {
        self.id
    }
}

impl Document for Tag {
    const KIND: EntityKind = EntityKind::Tag;
    const FIELDS: &'static [&'static str] = &["ID", "Label"];

    fn id(&self) -> i64 {
        self.id
    }
}

impl Document for Application {
    const KIND: EntityKind = EntityKind::Application;
    const FIELDS: &'static [&'static str] = &[
        "ID",
        "CandidateProfileID",
        "JobRequisitionID",
        "SalaryExpectation",
        "ApplicationSource",
        "TimeOfExperience",
    ];

    fn id(&self) -> i64 {
        self.id
    }
}

impl Document for Candidate {
    const KIND: EntityKind = EntityKind::Candidate;
    const FIELDS: &'static [&'static str] = &[
        "ID",
        "FirstName",
        "LastName",
        "Email",
        "Address",
        "Tags",
        "CountryID",
    ];

    fn id(&self) -> i64 {
        self.id
    }
}

impl Document for JobRequisition {
    const KIND: EntityKind = EntityKind::JobRequisition;
    const FIELDS: &'static [&'static str] = &[
        "ID",
        "Title",
        "JobDescription",
        "PostingStatus",
        "CountryID",
    ];

    fn id(&self) -> i64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_uses_document_field_names() {
        let c = Candidate {
            id: 3,
            first_name: "Ana".into(),
            country_id: 1,
            ..Default::default()
        };
        let doc = serde_json::to_value(&c).unwrap();
        assert_eq!(doc["ID"], json!(3));
        assert_eq!(doc["FirstName"], json!("Ana"));
        assert_eq!(doc["CountryID"], json!(1));
        assert!(doc["JobsApplied"].as_array().unwrap().is_empty());
    }

    #[test]
    fn projected_document_fills_mirrors_with_defaults() {
        let doc = json!({"ID": 2, "Title": "Engineer", "JobDescription": "Build", "PostingStatus": true});
        let jr: JobRequisition = serde_json::from_value(doc).unwrap();
        assert_eq!(jr.id, 2);
        assert!(jr.posting_status);
        assert!(jr.applicants.is_empty());
        assert_eq!(jr.country, None);
    }

    #[test]
    fn kinds_sort_in_lock_order() {
        let mut kinds = vec![EntityKind::Tag, EntityKind::Country, EntityKind::Application];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![EntityKind::Country, EntityKind::Application, EntityKind::Tag]
        );
    }
}
