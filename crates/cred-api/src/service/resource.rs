use tracing::info;
use validator::Validate;

use cred_db::Database;
use cred_types::api::CreateResourceRequest;
use cred_types::models::Resource;

use crate::error::AppError;

pub struct ResourceService<'a> {
    db: &'a Database,
}

impl<'a> ResourceService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create(&self, mut req: CreateResourceRequest) -> Result<Resource, AppError> {
        req.name = req.name.trim().to_string();
        req.validate()?;

        let mut actions: Vec<String> = Vec::with_capacity(req.actions.len());
        for action in req.actions.iter().map(|a| a.trim()) {
            if action.is_empty() {
                return Err(AppError::BadRequest("Resource actions cannot be blank".into()));
            }
            if !actions.iter().any(|a| a == action) {
                actions.push(action.to_string());
            }
        }

        let row = self.db.create_resource(&req.name, &actions)?;
        info!("Created resource '{}' with {} actions", row.name, row.actions.len());
        Ok(row.into_model())
    }

    pub fn list(&self) -> Result<Vec<Resource>, AppError> {
        Ok(self
            .db
            .list_resources()?
            .into_iter()
            .map(|row| row.into_model())
            .collect())
    }
}
