use tracing::info;
use uuid::Uuid;

use crate::errors::{LedgerError, RecordKind};
use crate::ledger::{Category, CategoryKind};
use crate::storage::{atomically, UnitOfWork};

use super::{ServiceResult, Session};

/// Category directory consulted by the ledger writer.
pub struct CategoryService;

impl CategoryService {
    pub fn add(
        session: Session<'_>,
        owner_id: Uuid,
        name: &str,
        kind: CategoryKind,
    ) -> ServiceResult<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::invalid("category name must not be empty"));
        }
        let normalized = name.to_ascii_lowercase();
        let category = Category::new(owner_id, name, kind);
        atomically(session.store, session.attempts(), |uow| {
            let duplicate = uow
                .owned_categories(owner_id)?
                .iter()
                .any(|existing| existing.name.trim().to_ascii_lowercase() == normalized);
            if duplicate {
                return Err(LedgerError::invalid(format!(
                    "Category `{}` already exists",
                    category.name
                )));
            }
            uow.put_category(category.clone())
        })?;
        info!(category_id = %category.id, ?kind, "added category");
        Self::get(session, owner_id, category.id)
    }

    pub fn get(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<Category> {
        session
            .store
            .category(id)?
            .filter(|category| category.is_owned_by(owner_id))
            .ok_or_else(|| LedgerError::not_found(RecordKind::Category, id))
    }

    pub fn list(session: Session<'_>, owner_id: Uuid) -> ServiceResult<Vec<Category>> {
        let mut categories: Vec<Category> = session
            .store
            .categories()?
            .into_iter()
            .filter(|category| category.is_owned_by(owner_id))
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    /// Resolves an owned category of the expected kind inside a unit of work.
    pub(crate) fn require(
        uow: &mut UnitOfWork<'_>,
        owner_id: Uuid,
        id: Uuid,
        kind: CategoryKind,
    ) -> ServiceResult<Category> {
        let category = uow
            .category(id)?
            .filter(|category| category.is_owned_by(owner_id))
            .cloned()
            .ok_or_else(|| LedgerError::not_found(RecordKind::Category, id))?;
        if category.kind != kind {
            return Err(LedgerError::invalid(format!(
                "category `{}` is a {:?} category",
                category.name, category.kind
            )));
        }
        Ok(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::MemoryStore;

    #[test]
    fn add_rejects_duplicate_names_ignoring_case() {
        let store = MemoryStore::new();
        let config = EngineConfig::default();
        let session = Session::new(&store, &config);
        let owner = Uuid::new_v4();

        CategoryService::add(session, owner, "Groceries", CategoryKind::Expense).unwrap();
        let err = CategoryService::add(session, owner, "  groceries ", CategoryKind::Income).unwrap_err();
        assert!(matches!(err, LedgerError::ValidationFailed(ref msg) if msg.contains("exists")));
        assert_eq!(CategoryService::list(session, owner).unwrap().len(), 1);

        CategoryService::add(session, Uuid::new_v4(), "Groceries", CategoryKind::Expense).unwrap();
    }
}
