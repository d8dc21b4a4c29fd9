use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::Driver;
use crate::error::DriverError;

/// Resolves `{language -> backend}` exactly the way a cloud-provider
/// registry resolves `{cloud -> driver}`: a flat map built once at startup
/// from configuration, with an unconfigured language failing the same way
/// an unconfigured cloud would.
pub struct DriverRegistry {
    backends: HashMap<String, Arc<dyn Driver>>,
    language_backend: HashMap<String, String>,
}

impl DriverRegistry {
    pub fn new(backends: HashMap<String, Arc<dyn Driver>>, language_backend: HashMap<String, String>) -> Self {
        Self { backends, language_backend }
    }

    pub fn resolve(&self, language: &str) -> Result<Arc<dyn Driver>, DriverError> {
        let backend_name = self
            .language_backend
            .get(language)
            .ok_or_else(|| DriverError::DriverNotConfigured(language.to_string()))?;
        self.backends
            .get(backend_name)
            .cloned()
            .ok_or_else(|| DriverError::DriverNotConfigured(backend_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessDriver;

    #[test]
    fn resolves_configured_language_to_its_backend() {
        let mut backends: HashMap<String, Arc<dyn Driver>> = HashMap::new();
        backends.insert("process".to_string(), Arc::new(ProcessDriver::new()));
        let mut language_backend = HashMap::new();
        language_backend.insert("python".to_string(), "process".to_string());

        let registry = DriverRegistry::new(backends, language_backend);
        let driver = registry.resolve("python").unwrap();
        assert_eq!(driver.name(), "process");
    }

    #[test]
    fn unconfigured_language_is_rejected() {
        let registry = DriverRegistry::new(HashMap::new(), HashMap::new());
        let err = registry.resolve("python").unwrap_err();
        assert!(matches!(err, DriverError::DriverNotConfigured(_)));
    }

    #[test]
    fn language_mapped_to_a_missing_backend_is_rejected() {
        let mut language_backend = HashMap::new();
        language_backend.insert("python".to_string(), "gvisor".to_string());
        let registry = DriverRegistry::new(HashMap::new(), language_backend);
        let err = registry.resolve("python").unwrap_err();
        assert!(matches!(err, DriverError::DriverNotConfigured(_)));
    }
}
