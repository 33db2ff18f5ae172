//! Types for use when configuring the fetcher module.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> PfResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| PfError::other_src("encode", e))?,
    )
    .map_err(|e| PfError::other_src("decode", e))
}

/// Denotes a type used to configure a specific fetcher module.
///
/// The types behind this trait are for configuration that cannot be changed
/// at runtime, the likes of which might be found in a configuration file.
/// Serialization should be tolerant to missing properties, setting sane
/// defaults, because the file is edited by humans.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Module-keyed configuration.
///
/// Each module owns one top-level entry, named after the module, holding
/// its [ModConfig] type. Entries for modules that are not in use are
/// ignored, and absent entries yield the module's defaults.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// Add a module's default configuration under its module name.
    ///
    /// Used when generating a default or example configuration file.
    /// Refuses to overwrite an entry that already exists.
    pub fn add_default_module_config<M: ModConfig>(
        &mut self,
        module_name: String,
    ) -> PfResult<()> {
        if self.0.contains_key(&module_name) {
            return Err(PfError::other(format!(
                "Refusing to overwrite conflicting module name: {module_name}"
            )));
        }
        self.0.insert(module_name, tc(&M::default())?);
        Ok(())
    }

    /// Extract a module's configuration by module name.
    ///
    /// Missing entries produce `M::default()`.
    pub fn get_module_config<M: ModConfig>(
        &self,
        module_name: &str,
    ) -> PfResult<M> {
        self.0
            .get(module_name)
            .map(tc)
            .unwrap_or_else(|| Ok(M::default()))
    }
}
