use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::error::FatalDataError;

/// Set of struct names in use. A name can be claimed once until it is released.
///
/// [`StructRegistry::global`] is the process-wide instance clients use by default;
/// isolated instances keep tests and embedded clients from colliding.
#[derive(Debug, Clone, Default)]
pub struct StructRegistry {
    state: Arc<Mutex<RegistryState>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_generation: u64,
    claims: BTreeMap<String, u64>,
}

/// Proof of one claim. Releasing it frees the name only while that claim is still the
/// current one, so a claim forgotten by [`StructRegistry::reset`] cannot free a newer one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken {
    name: String,
    generation: u64,
}

impl ClaimToken {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl StructRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<StructRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    pub fn claim(&self, name: &str) -> Result<ClaimToken, FatalDataError> {
        let mut state = self.lock();
        if state.claims.contains_key(name) {
            return Err(FatalDataError::DuplicateStruct {
                name: name.to_string(),
            });
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        state.claims.insert(name.to_string(), generation);
        Ok(ClaimToken {
            name: name.to_string(),
            generation,
        })
    }

    /// Returns whether the name was freed.
    pub fn release(&self, token: &ClaimToken) -> bool {
        let mut state = self.lock();
        if state.claims.get(&token.name) == Some(&token.generation) {
            state.claims.remove(&token.name);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().claims.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().claims.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().claims.is_empty()
    }

    /// Forgets every claim. Structs built before the reset keep working but no longer
    /// block their names.
    pub fn reset(&self) {
        self.lock().claims.clear();
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
