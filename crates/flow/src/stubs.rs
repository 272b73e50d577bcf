// Archivo: stubs.rs
// Propósito: fuente de definiciones en memoria para pruebas y wiring
// rápido. No es durable.
use crate::domain::FlowDefinition;
use crate::errors::{FlowError, Result};
use crate::repository::FlowDefinitionSource;
use std::sync::{Mutex, MutexGuard};

/// Fuente mutable en memoria. Las pruebas la usan para simular cambios de
/// configuración (detener un flujo, activar test mode, retirar un flujo).
#[derive(Debug, Default)]
pub struct InMemoryFlowSource {
    definitions: Mutex<Vec<FlowDefinition>>,
}

impl InMemoryFlowSource {
    pub fn new(definitions: Vec<FlowDefinition>) -> Self {
        Self { definitions: Mutex::new(definitions) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<FlowDefinition>>> {
        self.definitions.lock().map_err(|e| FlowError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    /// Inserta o reemplaza una definición por nombre.
    pub fn upsert(&self, definition: FlowDefinition) -> Result<()> {
        let mut defs = self.lock()?;
        match defs.iter_mut().find(|d| d.name == definition.name) {
            Some(existing) => *existing = definition,
            None => defs.push(definition),
        }
        Ok(())
    }

    /// Elimina la definición; devuelve `true` si existía.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut defs = self.lock()?;
        let before = defs.len();
        defs.retain(|d| d.name != name);
        Ok(defs.len() != before)
    }

    pub fn set_running(&self, name: &str, running: bool) -> Result<()> {
        let mut defs = self.lock()?;
        let def = defs.iter_mut()
                      .find(|d| d.name == name)
                      .ok_or_else(|| FlowError::UnknownFlow(name.to_string()))?;
        def.running = running;
        Ok(())
    }

    pub fn set_test_mode(&self, name: &str, test_mode: bool) -> Result<()> {
        let mut defs = self.lock()?;
        let def = defs.iter_mut()
                      .find(|d| d.name == name)
                      .ok_or_else(|| FlowError::UnknownFlow(name.to_string()))?;
        def.test_mode = test_mode;
        Ok(())
    }
}

impl FlowDefinitionSource for InMemoryFlowSource {
    fn load_definitions(&self) -> Result<Vec<FlowDefinition>> {
        Ok(self.lock()?.clone())
    }
}
