//! Extensions bundled with the Operarius gateway.
//!
//! Each extension is exposed as a factory in [`builtin_catalog`]; a manifest in
//! the extension directory selects it by name:
//!
//! ```json
//! { "factory": "filesystem", "config": { "allowedDirectories": ["./data"] } }
//! ```

pub mod example;
pub mod filesystem;

pub use example::ExampleExtension;
pub use filesystem::{FileSystemConfig, FileSystemExtension};

use operarius_core::extension::ExtensionCatalog;

/// Catalog with every bundled extension factory.
pub fn builtin_catalog() -> ExtensionCatalog {
    ExtensionCatalog::new()
        .with(filesystem::FACTORY, FileSystemExtension::factory)
        .with(example::FACTORY, ExampleExtension::factory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.names(), vec!["example", "filesystem"]);
    }
}
