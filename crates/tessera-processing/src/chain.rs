//! Generator selection
//!
//! Picks the generator responsible for a file from the configured descriptors. Selection is a
//! pure function of the descriptor list, the extension and the size.

use tessera_core::models::{GeneratorDescriptor, SkipReason};

/// Outcome of walking the generator chain for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<'a> {
    Generator(&'a GeneratorDescriptor),
    /// The file is served as-is; no thumbnail is produced.
    DirectServe,
    NoGeneratorApplicable,
}

impl Selection<'_> {
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Selection::Generator(_) => None,
            Selection::DirectServe => Some(SkipReason::DirectServe),
            Selection::NoGeneratorApplicable => Some(SkipReason::NoGeneratorApplicable),
        }
    }
}

/// Ordered view over the generator descriptors
#[derive(Debug, Clone)]
pub struct GeneratorChain {
    descriptors: Vec<GeneratorDescriptor>,
}

impl GeneratorChain {
    /// Sorts by ascending priority. Ties are broken by name so the order never depends on
    /// configuration order.
    pub fn new(mut descriptors: Vec<GeneratorDescriptor>) -> Self {
        descriptors.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[GeneratorDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, name: &str) -> Option<&GeneratorDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn select(&self, extension: &str, size: u64) -> Selection<'_> {
        for descriptor in self.descriptors.iter().filter(|d| d.enabled) {
            if descriptor.serves_directly(extension) {
                return Selection::DirectServe;
            }
            if descriptor.accepts(extension, size) {
                return Selection::Generator(descriptor);
            }
        }
        Selection::NoGeneratorApplicable
    }
}
