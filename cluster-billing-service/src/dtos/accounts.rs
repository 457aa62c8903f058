use crate::error::BillingError;
use crate::models::{
    split_composite, AccountType, AdminDetails, Company, CreateBillingAccount, ProjectId, ProjectRef,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBillingAccountRequest {
    #[validate(length(min = 1, message = "At least one billing admin is required"), nested)]
    pub billing_admins: Vec<AdminRequest>,
    pub account_type: AccountType,
    #[serde(default)]
    #[validate(nested)]
    pub company: CompanyRequest,
    #[serde(default)]
    #[validate(nested)]
    pub projects: Vec<ProjectRefRequest>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[serde(default)]
    pub phone_number: String,
    #[validate(length(min = 1, message = "Admin name is required"))]
    pub name: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRequest {
    #[serde(default)]
    pub is_company: bool,
    #[serde(default)]
    pub tax_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRefRequest {
    #[validate(custom(function = "validate_project_id"))]
    pub project_id: String,
    #[serde(default = "default_project_state")]
    pub state: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_project_state() -> String {
    "active".to_string()
}

fn validate_project_id(value: &str) -> Result<(), ValidationError> {
    if split_composite(value).is_none() {
        let mut error = ValidationError::new("project_id");
        error.message = Some("Project id must look like <cluster>:<project>".into());
        return Err(error);
    }
    Ok(())
}

impl CreateBillingAccountRequest {
    /// Convert a validated request into account input.
    pub fn into_input(self, now: DateTime<Utc>) -> Result<CreateBillingAccount, BillingError> {
        let projects = self
            .projects
            .into_iter()
            .map(|p| {
                Ok(ProjectRef {
                    project_id: ProjectId::parse(&p.project_id)?,
                    state: p.state,
                    created_at: p.created_at.unwrap_or(now),
                })
            })
            .collect::<Result<Vec<_>, BillingError>>()?;

        let mut seen = HashSet::new();
        if let Some(duplicate) = projects.iter().find(|p| !seen.insert(&p.project_id)) {
            return Err(BillingError::InvalidInput(format!(
                "project {} is listed more than once",
                duplicate.project_id
            )));
        }

        Ok(CreateBillingAccount {
            billing_admins: self
                .billing_admins
                .into_iter()
                .map(|a| AdminDetails {
                    uuid: Uuid::new_v4(),
                    email: a.email,
                    phone_number: a.phone_number,
                    name: a.name,
                })
                .collect(),
            account_type: self.account_type,
            company: Company {
                is_company: self.company.is_company,
                tax_id: self.company.tax_id,
                name: self.company.name,
            },
            projects,
        })
    }
}
