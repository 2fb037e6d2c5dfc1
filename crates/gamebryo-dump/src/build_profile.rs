//! Build classification from captured module names.
//!
//! The four shipped builds of the title lay out TESForm-derived structs
//! differently; every PDB-declared member offset must be corrected by an
//! additive shift before it matches the dump:
//!
//! | Build            | Module-name keyword            | shift |
//! |------------------|--------------------------------|-------|
//! | Debug            | "Debug" without "MemDebug"     | 4     |
//! | Release MemDebug | "MemDebug"                     | 4     |
//! | Release Beta     | "Release_Beta" / "ReleaseBeta" | 16    |
//! | Release          | a `Fallout*.exe` module        | 16    |
//! | Unknown          | none of the above              | 0     |
//!
//! Struct sizes shift by the same amount. DNAM-style intra-block relative
//! offsets and standalone non-TESForm structs (LoadedLandData,
//! NiGeometryData, NiPixelData) do NOT shift.

use crate::memory_map::Module;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildKind {
    Debug,
    ReleaseMemDebug,
    ReleaseBeta,
    Release,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProfile {
    pub kind: BuildKind,
    /// Additive correction applied to every PDB-derived member offset.
    pub shift: u32,
}

impl BuildProfile {
    /// Classify the build by inspecting module filenames.
    pub fn detect(modules: &[Module]) -> Self {
        let names: Vec<&str> = modules.iter().map(|m| m.name.as_str()).collect();

        if names
            .iter()
            .any(|n| n.contains("Debug") && !n.contains("MemDebug"))
        {
            return Self::from_kind(BuildKind::Debug);
        }
        if names.iter().any(|n| n.contains("MemDebug")) {
            return Self::from_kind(BuildKind::ReleaseMemDebug);
        }
        if names
            .iter()
            .any(|n| n.contains("Release_Beta") || n.contains("ReleaseBeta"))
        {
            return Self::from_kind(BuildKind::ReleaseBeta);
        }
        if names.iter().any(|n| is_game_executable(n)) {
            return Self::from_kind(BuildKind::Release);
        }
        Self::from_kind(BuildKind::Unknown)
    }

    /// The canonical profile for a known build kind.
    pub fn from_kind(kind: BuildKind) -> Self {
        let shift = match kind {
            BuildKind::Debug | BuildKind::ReleaseMemDebug => 4,
            BuildKind::ReleaseBeta | BuildKind::Release => 16,
            BuildKind::Unknown => 0,
        };
        Self { kind, shift }
    }
}

/// True for `Fallout*.exe` style module names (path prefixes stripped).
fn is_game_executable(name: &str) -> bool {
    let base = name
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(name);
    base.starts_with("Fallout") && base.to_ascii_lowercase().ends_with(".exe")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> Module {
        Module {
            name: name.to_string(),
            base_va: 0x8200_0000,
            size: 0x10_0000,
            timestamp: 0,
        }
    }

    #[test]
    fn test_detect_debug() {
        let p = BuildProfile::detect(&[module("Fallout3_Debug.exe")]);
        assert_eq!(p.kind, BuildKind::Debug);
        assert_eq!(p.shift, 4);
    }

    #[test]
    fn test_detect_memdebug() {
        let p = BuildProfile::detect(&[module("Fallout3_MemDebug.exe")]);
        assert_eq!(p.kind, BuildKind::ReleaseMemDebug);
        assert_eq!(p.shift, 4);
    }

    #[test]
    fn test_detect_release_beta() {
        let p = BuildProfile::detect(&[module("Fallout3_Release_Beta.exe")]);
        assert_eq!(p.kind, BuildKind::ReleaseBeta);
        assert_eq!(p.shift, 16);

        let p = BuildProfile::detect(&[module("FalloutReleaseBeta.exe")]);
        assert_eq!(p.kind, BuildKind::ReleaseBeta);
    }

    #[test]
    fn test_detect_release() {
        let p = BuildProfile::detect(&[
            module("xboxkrnl.exe"),
            module("D:\\media\\Fallout3.exe"),
        ]);
        assert_eq!(p.kind, BuildKind::Release);
        assert_eq!(p.shift, 16);
    }

    #[test]
    fn test_detect_unknown() {
        let p = BuildProfile::detect(&[module("SomeOther.exe")]);
        assert_eq!(p.kind, BuildKind::Unknown);
        assert_eq!(p.shift, 0);
    }

    #[test]
    fn test_memdebug_not_misread_as_debug() {
        // "MemDebug" contains "Debug" as a substring but must classify as
        // Release MemDebug; the Debug rule excludes it explicitly.
        let p = BuildProfile::detect(&[module("FalloutMemDebug.exe"), module("core.dll")]);
        assert_eq!(p.kind, BuildKind::ReleaseMemDebug);
    }
}
