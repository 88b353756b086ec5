use relay_llm::ProviderKind;
use std::sync::RwLock;

/// Operator-selected provider tried first, held for the life of the process.
#[derive(Debug, Default)]
pub struct ProviderPreference {
    current: RwLock<Option<ProviderKind>>,
}

impl ProviderPreference {
    pub fn get(&self) -> Option<ProviderKind> {
        match self.current.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Returns the previous preference.
    pub fn set(&self, kind: Option<ProviderKind>) -> Option<ProviderKind> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, kind)
    }
}
