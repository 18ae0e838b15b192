//! In-process intake registry.

use intake_core::collaborators::{CollaboratorError, IntakeRegistry};
use intake_core::event::EventType;
use intake_core::ids::IntakeId;
use intake_core::intake::IntakeDefinition;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Errors loading intake definitions.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The definitions document is not valid JSON of the expected shape.
    #[error("Invalid intake definitions: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two definitions share an id.
    #[error("Duplicate intake definition: {0}")]
    Duplicate(IntakeId),
}

/// Intake definitions held in memory, typically loaded once at startup.
#[derive(Debug, Default)]
pub struct InMemoryIntakeRegistry {
    intakes: RwLock<HashMap<IntakeId, IntakeDefinition>>,
}

impl InMemoryIntakeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `definitions`; later entries replace earlier ones.
    #[must_use]
    pub fn with_definitions(definitions: impl IntoIterator<Item = IntakeDefinition>) -> Self {
        let registry = Self::new();
        for definition in definitions {
            registry.insert(definition);
        }
        registry
    }

    /// Parse a JSON array of definitions.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the document does not parse or repeats an id.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let definitions: Vec<IntakeDefinition> = serde_json::from_str(json)?;
        let mut map = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            if map.contains_key(&definition.id) {
                return Err(RegistryError::Duplicate(definition.id));
            }
            map.insert(definition.id.clone(), definition);
        }
        Ok(Self {
            intakes: RwLock::new(map),
        })
    }

    /// Add or replace a definition.
    pub fn insert(&self, definition: IntakeDefinition) {
        self.intakes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.id.clone(), definition);
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intakes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Event types that trigger a delivery for at least one intake.
    ///
    /// Empty when no intake has a destination.
    #[must_use]
    pub fn delivery_triggers(&self) -> BTreeSet<EventType> {
        self.intakes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|definition| definition.destination.as_ref())
            .flat_map(|destination| destination.deliver_on.iter().copied())
            .collect()
    }
}

impl IntakeRegistry for InMemoryIntakeRegistry {
    fn get(
        &self,
        intake_id: IntakeId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IntakeDefinition>, CollaboratorError>> + Send + '_>> {
        let found = self
            .intakes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&intake_id)
            .cloned();
        Box::pin(async move { Ok(found) })
    }
}
